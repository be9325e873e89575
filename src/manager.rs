// ===============================
// src/manager.rs
// ===============================
//
// Order manager: owns the book, the risk gate and the per-side resting
// order indexes; consumes decoded market events and reconciles desired
// quotes against whatever is currently resting.
//
// Everything here runs on the single event-processing task, and every REST
// call is awaited inline, so order-management calls are serialized per
// symbol and the book/index/risk structures need no locks.
//

use std::time::Instant;

use ahash::AHashMap as HashMap;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::binance::{client_order_id, parse_levels, timestamp_ms};
use crate::book::{BookMetrics, DiffResult, OrderBook};
use crate::config::Config;
use crate::domain::{
    DepthDiff, Event, MarketEvent, Order, OrderStatus, Px, Side, Signal, TradeTick,
};
use crate::gateway::BinanceGateway;
use crate::metrics::{
    BEST_ASK, BEST_BID, BOOK_RESYNCS, BOOK_SYNCED, EVENTS, ORDERS_CANCELED, ORDERS_PLACED,
    ORDERS_REJECTED, POSITION, RESTING_ORDERS, SIGNAL_STATE,
};
use crate::risk::RiskManager;

/// One tracked resting order.
#[derive(Debug, Clone)]
pub struct RestingEntry {
    /// Exchange-assigned order id.
    pub oid: u64,
    /// Our client id, kept for timeout resolution and logs.
    pub client_id: String,
    /// Signal that was current when the order was placed.
    pub signal: Signal,
    pub placed_at: Instant,
}

/// Per-side price -> resting order mapping. At most one tracked order per
/// price; an insert at an occupied price replaces the slot.
#[derive(Debug)]
pub struct RestingOrderIndex {
    orders: HashMap<Px, RestingEntry>,
}

impl RestingOrderIndex {
    pub fn new() -> Self {
        Self { orders: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn insert(&mut self, price: Px, entry: RestingEntry) {
        self.orders.insert(price, entry);
    }

    /// Remove the entry at `price`, but only if it still holds `oid`. Guards
    /// against a cancel acknowledgement racing a newer order into the slot.
    pub fn remove_if_match(&mut self, price: Px, oid: u64) -> bool {
        match self.orders.get(&price) {
            Some(entry) if entry.oid == oid => {
                self.orders.remove(&price);
                true
            }
            _ => false,
        }
    }

    /// Is there a tracked order at `price` placed under `signal`?
    pub fn matches(&self, price: Px, signal: Signal) -> bool {
        self.orders
            .get(&price)
            .map(|e| e.signal == signal)
            .unwrap_or(false)
    }

    /// Orders that no longer belong: wrong price or stamped with a signal
    /// that is no longer current.
    pub fn mismatched(&self, target: Px, signal: Signal) -> Vec<(Px, u64)> {
        self.orders
            .iter()
            .filter(|(px, e)| **px != target || e.signal != signal)
            .map(|(px, e)| (*px, e.oid))
            .collect()
    }

    /// Orders resting longer than `max_age`, with their price retained so
    /// the caller can update this index on confirmed cancellation.
    pub fn stale(&self, now: Instant, max_age: std::time::Duration) -> Vec<(Px, u64)> {
        self.orders
            .iter()
            .filter(|(_, e)| now.duration_since(e.placed_at) > max_age)
            .map(|(px, e)| (*px, e.oid))
            .collect()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }
}

/// Signal and two-sided target quotes from the current book metrics. An
/// up-leaning book keeps the bid at best and lifts the ask one tick above
/// best; a down-leaning book mirrors that; a balanced book joins both
/// bests. Targets are already rounded by construction (raw tick domain).
pub fn compute_quotes(m: &BookMetrics, tick: i64) -> (Signal, Px, Px) {
    if m.weighted_midprice > m.midprice {
        (Signal::Up, m.best_bid, Px(m.best_ask.0 + tick))
    } else if m.weighted_midprice < m.midprice {
        (Signal::Down, Px(m.best_bid.0 - tick), m.best_ask)
    } else {
        (Signal::Neutral, m.best_bid, m.best_ask)
    }
}

pub struct OrderManager {
    cfg: Config,
    book: OrderBook,
    risk: RiskManager,
    gateway: BinanceGateway,
    bids: RestingOrderIndex,
    asks: RestingOrderIndex,
    signal: Signal,
    /// Set while the position sits outside bounds; blocks new placements.
    halted: bool,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl OrderManager {
    pub fn new(cfg: Config, gateway: BinanceGateway, rec_tx: Option<mpsc::Sender<Event>>) -> Self {
        let book = OrderBook::new(cfg.quoting.px_scale);
        let risk = RiskManager::new(cfg.risk.clone());
        Self {
            cfg,
            book,
            risk,
            gateway,
            bids: RestingOrderIndex::new(),
            asks: RestingOrderIndex::new(),
            signal: Signal::Neutral,
            halted: false,
            rec_tx,
        }
    }

    pub fn position(&self) -> f64 {
        self.risk.position()
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(ev);
        }
    }

    fn index(&self, side: Side) -> &RestingOrderIndex {
        match side { Side::Buy => &self.bids, Side::Sell => &self.asks }
    }

    fn index_mut(&mut self, side: Side) -> &mut RestingOrderIndex {
        match side { Side::Buy => &mut self.bids, Side::Sell => &mut self.asks }
    }

    /// Entry point for every decoded market event, in arrival order.
    pub async fn handle_event(&mut self, ev: MarketEvent) {
        if self.rec_tx.is_some() {
            self.record(Event::Md(ev.clone()));
        }
        match ev {
            MarketEvent::Depth(diff) => {
                EVENTS.with_label_values(&["depth"]).inc();
                self.on_depth(diff).await;
            }
            MarketEvent::Trade(trade) => {
                EVENTS.with_label_values(&["trade"]).inc();
                self.on_trade(trade);
            }
            MarketEvent::Unknown => {
                EVENTS.with_label_values(&["unknown"]).inc();
                return;
            }
        }

        if self.book.is_synced() {
            self.reconcile_quotes().await;
        }
    }

    async fn on_depth(&mut self, diff: DepthDiff) {
        match self.book.apply_diff(&diff) {
            DiffResult::Applied | DiffResult::Stale => {}
            DiffResult::Gap => {
                // The gapped diff is dropped; a fresh snapshot replaces it.
                warn!(
                    first_id = diff.first_id,
                    final_id = diff.final_id,
                    last_sequence_id = self.book.last_sequence_id(),
                    "book out of sync, fetching snapshot"
                );
                BOOK_SYNCED.set(0);
                self.resync().await;
            }
        }
    }

    /// Snapshot fetch with unbounded retries and a fixed delay, applied in
    /// place on the existing book.
    async fn resync(&mut self) {
        BOOK_RESYNCS.inc();
        loop {
            match self.gateway.depth_snapshot(&self.cfg.symbol).await {
                Ok(snap) => {
                    let scale = self.cfg.quoting.px_scale;
                    let bids = parse_levels(&snap.bids, scale);
                    let asks = parse_levels(&snap.asks, scale);
                    self.book.apply_snapshot(snap.last_update_id, bids, asks);
                    BOOK_SYNCED.set(1);
                    info!(
                        last_update_id = snap.last_update_id,
                        symbol = %self.cfg.symbol,
                        "book synchronized from snapshot"
                    );
                    return;
                }
                Err(e) => {
                    warn!(%e, "snapshot fetch failed, retrying");
                    sleep(self.cfg.net.resync_delay).await;
                }
            }
        }
    }

    fn on_trade(&mut self, trade: TradeTick) {
        let position = self.risk.update_position(trade.qty, trade.is_maker_sell);
        POSITION.set(position);
        self.record(Event::Fill {
            qty: trade.qty,
            is_maker_sell: trade.is_maker_sell,
            position,
        });
    }

    /// One reconciliation pass: derive target quotes, then per side cancel
    /// whatever no longer matches and place the missing quote. Cancels run
    /// before placements so a price level never carries more than the
    /// intended resting size.
    async fn reconcile_quotes(&mut self) {
        let Some(metrics) = self.book.compute_metrics() else {
            return;
        };
        let (signal, target_bid, target_ask) = compute_quotes(&metrics, self.cfg.quoting.tick);
        self.signal = signal;
        SIGNAL_STATE.set(signal.as_gauge());
        BEST_BID.set(metrics.best_bid.to_f64(self.cfg.quoting.px_scale));
        BEST_ASK.set(metrics.best_ask.to_f64(self.cfg.quoting.px_scale));

        // Position-breach policy: cancel everything once, place nothing
        // while the breach persists.
        if self.risk.breached() {
            if !self.halted {
                error!(
                    position = self.risk.position(),
                    "POSITION LIMIT BREACHED - cancelling all orders and halting quoting"
                );
                self.halted = true;
                self.cancel_all().await;
            }
            return;
        }
        if self.halted {
            self.halted = false;
            info!(position = self.risk.position(), "position back within limits, quoting resumed");
        }

        self.reconcile_side(Side::Buy, target_bid).await;
        self.reconcile_side(Side::Sell, target_ask).await;
    }

    async fn reconcile_side(&mut self, side: Side, target: Px) {
        let signal = self.signal;
        for (price, oid) in self.index(side).mismatched(target, signal) {
            self.cancel(side, price, oid).await;
        }
        if !self.index(side).matches(target, signal) {
            self.place_order(side, target, self.cfg.quoting.quote_qty).await;
        }
    }

    /// Cancel any resting order older than the configured timeout,
    /// regardless of price/signal match. Driven by the housekeeping tick.
    pub async fn sweep_stale(&mut self) {
        let now = Instant::now();
        let max_age = self.cfg.quoting.stale_timeout;
        for side in [Side::Buy, Side::Sell] {
            for (price, oid) in self.index(side).stale(now, max_age) {
                info!(oid, side = side.as_api(), "cancelling stale order");
                self.cancel(side, price, oid).await;
            }
        }
    }

    async fn place_order(&mut self, side: Side, price: Px, quantity: f64) {
        let mut order = Order {
            id: client_order_id(),
            symbol: self.cfg.symbol.clone(),
            side,
            price,
            quantity,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            creation_time_ms: timestamp_ms() as i64,
        };

        if let Err(e) = self.risk.validate(&order) {
            // Local policy rejection: the order never reaches the network.
            warn!(%e, side = side.as_api(), price = %price.to_api(self.cfg.quoting.price_precision), "risk rejected order");
            ORDERS_REJECTED.with_label_values(&["risk"]).inc();
            return;
        }

        let result = self
            .gateway
            .place_limit_order(
                &self.cfg.symbol,
                side,
                price,
                self.cfg.quoting.price_precision,
                quantity,
                &order.id,
            )
            .await;

        match result {
            Ok(ack) => {
                let entry = RestingEntry {
                    oid: ack.order_id,
                    client_id: order.id.clone(),
                    signal: self.signal,
                    placed_at: Instant::now(),
                };
                self.index_mut(side).insert(price, entry);
                ORDERS_PLACED.inc();
                RESTING_ORDERS
                    .with_label_values(&[side.as_api()])
                    .set(self.index(side).len() as i64);
                info!(
                    oid = ack.order_id,
                    client_id = %order.id,
                    side = side.as_api(),
                    price = %ack
                        .price
                        .as_deref()
                        .unwrap_or(&price.to_api(self.cfg.quoting.price_precision)),
                    quantity,
                    signal = ?self.signal,
                    "order placed"
                );
                self.record(Event::Ord(order));
            }
            Err(e) => {
                order.status = OrderStatus::Rejected;
                ORDERS_REJECTED.with_label_values(&["exchange"]).inc();
                error!(%e, side = side.as_api(), "order placement failed");
                if e.is_timeout() {
                    // The exchange may have accepted the order even though
                    // we never saw the response. Resolve the ambiguity with
                    // a best-effort cancel by client id so nothing rests
                    // untracked.
                    if let Err(e2) =
                        self.gateway.cancel_by_client_id(&self.cfg.symbol, &order.id).await
                    {
                        warn!(%e2, client_id = %order.id, "timeout-resolution cancel failed");
                    }
                }
                self.record(Event::Ord(order));
            }
        }
    }

    async fn cancel(&mut self, side: Side, price: Px, oid: u64) {
        match self.gateway.cancel_order(&self.cfg.symbol, oid).await {
            Ok(()) => {
                // Only drop the slot if it still holds this order.
                if self.index_mut(side).remove_if_match(price, oid) {
                    ORDERS_CANCELED.inc();
                    RESTING_ORDERS
                        .with_label_values(&[side.as_api()])
                        .set(self.index(side).len() as i64);
                    info!(oid, side = side.as_api(), "order cancelled");
                }
            }
            Err(e) => {
                // Leave state unchanged; the mismatch is detected again on
                // the next reconciliation pass.
                warn!(%e, oid, "cancel failed");
            }
        }
    }

    /// Bulk cancel on shutdown (and on a position breach). On success all
    /// local tracking is cleared unconditionally.
    pub async fn cancel_all(&mut self) {
        match self.gateway.cancel_all(&self.cfg.symbol).await {
            Ok(()) => {
                self.bids.clear();
                self.asks.clear();
                for side in [Side::Buy, Side::Sell] {
                    RESTING_ORDERS.with_label_values(&[side.as_api()]).set(0);
                }
                info!(symbol = %self.cfg.symbol, "all open orders cancelled");
                self.record(Event::Note("cancel_all".to_string()));
            }
            Err(e) => {
                error!(%e, "bulk cancel failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metrics(wmid: f64, bb: f64, ba: f64) -> BookMetrics {
        BookMetrics {
            weighted_midprice: wmid,
            best_bid: Px::from_f64(bb, 100),
            best_ask: Px::from_f64(ba, 100),
            midprice: (bb + ba) / 2.0,
        }
    }

    fn entry(oid: u64, signal: Signal) -> RestingEntry {
        RestingEntry {
            oid,
            client_id: format!("CL-0-{oid}"),
            signal,
            placed_at: Instant::now(),
        }
    }

    #[test]
    fn up_signal_lifts_the_ask_only() {
        let m = metrics(10.008, 10.00, 10.01);
        let (signal, bid, ask) = compute_quotes(&m, 1);
        assert_eq!(signal, Signal::Up);
        assert_eq!(bid, Px(1000));
        assert_eq!(ask, Px(1002)); // best_ask + one tick, never below best
    }

    #[test]
    fn down_signal_drops_the_bid_only() {
        let m = metrics(10.002, 10.00, 10.01);
        let (signal, bid, ask) = compute_quotes(&m, 1);
        assert_eq!(signal, Signal::Down);
        assert_eq!(bid, Px(999)); // best_bid - one tick, never above best
        assert_eq!(ask, Px(1001));
    }

    #[test]
    fn balanced_book_joins_both_bests() {
        let mut m = metrics(0.0, 10.00, 10.01);
        m.weighted_midprice = m.midprice;
        let (signal, bid, ask) = compute_quotes(&m, 1);
        assert_eq!(signal, Signal::Neutral);
        assert_eq!(bid, Px(1000));
        assert_eq!(ask, Px(1001));
    }

    #[test]
    fn index_keeps_one_order_per_price() {
        let mut idx = RestingOrderIndex::new();
        idx.insert(Px(1000), entry(1, Signal::Up));
        idx.insert(Px(1000), entry(2, Signal::Up));
        assert_eq!(idx.len(), 1);
        // removal is guarded by id: the stale ack for order 1 is a no-op
        assert!(!idx.remove_if_match(Px(1000), 1));
        assert_eq!(idx.len(), 1);
        assert!(idx.remove_if_match(Px(1000), 2));
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn signal_flip_marks_orders_for_cancellation() {
        // resting at 10.00 tagged Up; signal flips to Down with a new target
        let mut idx = RestingOrderIndex::new();
        idx.insert(Px(1000), entry(7, Signal::Up));

        let cancels = idx.mismatched(Px(999), Signal::Down);
        assert_eq!(cancels, vec![(Px(1000), 7)]);

        assert!(idx.remove_if_match(Px(1000), 7));
        // nothing matches at the new target, so a placement is due
        assert!(!idx.matches(Px(999), Signal::Down));
    }

    #[test]
    fn matching_order_is_left_alone() {
        let mut idx = RestingOrderIndex::new();
        idx.insert(Px(1000), entry(7, Signal::Up));
        assert!(idx.mismatched(Px(1000), Signal::Up).is_empty());
        assert!(idx.matches(Px(1000), Signal::Up));
        // same price, flipped signal -> no longer desired
        assert!(!idx.matches(Px(1000), Signal::Down));
        assert_eq!(idx.mismatched(Px(1000), Signal::Down), vec![(Px(1000), 7)]);
    }

    #[test]
    fn staleness_retains_price_and_side_association() {
        let mut idx = RestingOrderIndex::new();
        let placed = Instant::now();
        let mut old = entry(3, Signal::Neutral);
        old.placed_at = placed;
        idx.insert(Px(1000), old);
        let mut fresh = entry(4, Signal::Neutral);
        fresh.placed_at = placed + Duration::from_secs(45);
        idx.insert(Px(1001), fresh);

        // evaluated a minute after the first placement
        let stale = idx.stale(placed + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(stale, vec![(Px(1000), 3)]);
        // the price came back with the id, so the index can be updated
        assert!(idx.remove_if_match(Px(1000), 3));
        assert_eq!(idx.len(), 1);
    }
}
