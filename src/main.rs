// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : mm_bot_rust — async single-symbol market-making engine in Rust
Module  : main.rs

Summary : Maintains a synchronized local order book from the Binance diff
          stream, derives an imbalance signal and two-sided quotes, and
          manages resting limit orders under hard position/size limits.
          Prometheus metrics and an optional JSONL event recorder ride
          along.
=============================================================================
*/
mod binance; // signing + wire models
mod book;
mod config;
mod domain;
mod engine;
mod feed; // market data WS client
mod gateway; // signed REST (orders + snapshot)
mod manager;
mod metrics;
mod recorder;
mod risk;

use tokio::sync::mpsc;
use tracing::info;

use crate::domain::{Event, MarketEvent};
use crate::engine::TradingEngine;
use crate::gateway::BinanceGateway;
use crate::manager::OrderManager;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let cfg = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cfg.metrics_port));

    let mode_str = match cfg.mode {
        config::MarketMode::BinanceSandbox => "binance_sandbox",
        config::MarketMode::BinanceMainnet => "binance_mainnet",
    };
    info!(
        mode = %mode_str,
        symbol = %cfg.symbol,
        ws = %cfg.ws_url,
        rest = %cfg.rest_url,
        quote_qty = cfg.quoting.quote_qty,
        max_long = cfg.risk.max_long,
        max_short = cfg.risk.max_short,
        max_order_size = cfg.risk.max_order_size,
        "startup config"
    );

    // ---- Recorder (optional) ----
    let rec_tx = cfg.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- Market data feed -> engine ----
    let (md_tx, md_rx) = mpsc::channel::<MarketEvent>(4096);
    tokio::spawn(feed::run(cfg.clone(), md_tx));

    // ---- Order manager + engine ----
    let gateway = BinanceGateway::new(cfg.rest_url.clone(), cfg.credentials.clone(), &cfg.net)
        .expect("http client build failed");
    let manager = OrderManager::new(cfg, gateway, rec_tx);
    TradingEngine::new(md_rx, manager).run().await;

    info!("engine stopped");
}
