// ===============================
// src/metrics.rs
// ===============================

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Market data / book --------
pub static EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("md_events_total", "decoded market data events (label: type)"),
        &["type"],
    )
    .unwrap()
});

pub static BOOK_SYNCED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("book_synced", "1 while the local book is sequence-synced").unwrap());

pub static BOOK_RESYNCS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("book_resyncs_total", "snapshot resynchronizations").unwrap());

pub static BEST_BID: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("best_bid", "best bid price").unwrap());

pub static BEST_ASK: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("best_ask", "best ask price").unwrap());

pub static SIGNAL_STATE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("signal_state", "book imbalance signal: 1 up, -1 down, 0 neutral").unwrap()
});

// -------- Orders / risk --------
pub static ORDERS_PLACED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("orders_placed_total", "orders accepted by the exchange").unwrap());

pub static ORDERS_CANCELED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("orders_canceled_total", "confirmed cancellations").unwrap());

pub static ORDERS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_rejected_total", "rejected orders (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

pub static RESTING_ORDERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("resting_orders", "tracked resting orders per side"),
        &["side"],
    )
    .unwrap()
});

pub static POSITION: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position", "signed net position").unwrap());

// -------- Stream health --------
pub static WS_CONNECTED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ws_connected", "1 if the market data WS is subscribed").unwrap());

pub static WS_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ws_reconnects_total", "market data WS reconnect attempts").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(EVENTS.clone())),
        REGISTRY.register(Box::new(BOOK_SYNCED.clone())),
        REGISTRY.register(Box::new(BOOK_RESYNCS.clone())),
        REGISTRY.register(Box::new(BEST_BID.clone())),
        REGISTRY.register(Box::new(BEST_ASK.clone())),
        REGISTRY.register(Box::new(SIGNAL_STATE.clone())),
        REGISTRY.register(Box::new(ORDERS_PLACED.clone())),
        REGISTRY.register(Box::new(ORDERS_CANCELED.clone())),
        REGISTRY.register(Box::new(ORDERS_REJECTED.clone())),
        REGISTRY.register(Box::new(RESTING_ORDERS.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
    ] {
        let _ = m;
    }
}

// Encode everything in Prometheus text format.
fn encode_metrics() -> Vec<u8> {
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&REGISTRY.gather(), &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Answer one request (any path) with the metrics dump. Tiny HTTP 1.1
// responder, no routing needed for a scrape endpoint.
fn handle_client(mut stream: TcpStream) {
    // Drain a bit of the request; we never parse it.
    let mut req_buf = [0u8; 1024];
    let _ = stream.read(&mut req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Scrape endpoint on a dedicated OS thread (keeps the Tokio runtime clean).
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        tracing::info!(%addr, "metrics endpoint listening");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}
