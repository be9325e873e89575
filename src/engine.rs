// ===============================
// src/engine.rs
// ===============================
//
// Top-level coordinator: one loop consumes market events strictly in
// arrival order (book sync correctness depends on it), a low-priority
// once-per-second tick drives the stale-order sweep and heartbeat, and
// Ctrl-C triggers a bulk cancel before exit.
//

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::domain::MarketEvent;
use crate::manager::OrderManager;

pub struct TradingEngine {
    rx: mpsc::Receiver<MarketEvent>,
    manager: OrderManager,
}

impl TradingEngine {
    pub fn new(rx: mpsc::Receiver<MarketEvent>, manager: OrderManager) -> Self {
        Self { rx, manager }
    }

    /// Runs until Ctrl-C or until the feed channel closes.
    pub async fn run(mut self) {
        let mut housekeeping = interval(Duration::from_secs(1));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_seen: u64 = 0;

        loop {
            tokio::select! {
                maybe_ev = self.rx.recv() => {
                    match maybe_ev {
                        Some(ev) => {
                            events_seen += 1;
                            self.manager.handle_event(ev).await;
                        }
                        None => {
                            warn!("market data channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = housekeeping.tick() => {
                    self.manager.sweep_stale().await;
                    info!(events = events_seen, position = self.manager.position(), "heartbeat");
                    events_seen = 0;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        // Leave nothing resting on the exchange.
        self.manager.cancel_all().await;
    }
}
