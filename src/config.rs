// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : mm_bot_rust — async single-symbol market-making engine in Rust
Module  : config.rs

Summary : Maintains a synchronized local order book from the Binance diff
          stream, derives an imbalance signal and two-sided quotes, and
          manages resting limit orders under hard position/size limits.
          Prometheus metrics and an optional JSONL event recorder ride
          along.
=============================================================================
*/
//
// All tuning comes from the environment (plus .env via dotenvy). Everything
// is collected into one `Config` built once at startup and handed to the
// components that need it; nothing reads env after `load()` returns.
//

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Which Binance endpoints to talk to.
#[derive(Clone, Debug)]
pub enum MarketMode {
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn from_env(key: &str, default_mode: MarketMode) -> MarketMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "binance_sandbox" => MarketMode::BinanceSandbox,
            "binance_mainnet" => MarketMode::BinanceMainnet,
            _ => default_mode,
        }
    }

    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::BinanceSandbox => "wss://testnet.binance.vision/ws",
            MarketMode::BinanceMainnet => "wss://stream.binance.com:9443/ws",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::BinanceSandbox => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet => "https://api.binance.com",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

/// Hard position / order-size limits. `position` lives in RiskManager; these
/// bounds never change for the lifetime of the session.
#[derive(Clone, Debug)]
pub struct RiskLimits {
    pub max_long: f64,
    pub max_short: f64, // <= 0
    pub max_order_size: f64,
}

/// Instrument and quoting parameters.
#[derive(Clone, Debug)]
pub struct QuoteParams {
    /// Fixed size of each resting quote.
    pub quote_qty: f64,
    /// Price increment used for quote adjustment, in raw ticks.
    pub tick: i64,
    /// Decimal places of the instrument's price.
    pub price_precision: u32,
    /// 10^price_precision; raw ticks per 1.0 of quote currency.
    pub px_scale: i64,
    /// Resting orders older than this are canceled regardless of price.
    pub stale_timeout: Duration,
}

/// Network pacing knobs shared by feed, snapshot fetch and REST gateway.
#[derive(Clone, Debug)]
pub struct NetParams {
    pub reconnect_delay: Duration,
    pub resync_delay: Duration,
    pub request_timeout: Duration,
    pub recv_window: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub symbol: String,
    pub mode: MarketMode,
    pub ws_url: String,
    pub rest_url: String,
    pub metrics_port: u16,
    pub record_file: Option<String>,
    pub credentials: ApiCredentials,
    pub risk: RiskLimits,
    pub quoting: QuoteParams,
    pub net: NetParams,
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn load() -> Config {
    // Make sure .env is read (API keys, SYMBOL, RECORD_FILE, ...)
    let _ = dotenv();

    let symbol = env::var("SYMBOL")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .to_ascii_uppercase();

    let mode = MarketMode::from_env("MARKET_MODE", MarketMode::BinanceSandbox);
    let ws_url = env::var("BINANCE_WS_URL").unwrap_or_else(|_| mode.default_ws_url().to_string());
    let rest_url =
        env::var("BINANCE_REST_URL").unwrap_or_else(|_| mode.default_rest_url().to_string());

    let credentials = ApiCredentials {
        key: env::var("BINANCE_API_KEY").expect("BINANCE_API_KEY missing"),
        secret: env::var("BINANCE_API_SECRET").expect("BINANCE_API_SECRET missing"),
    };

    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let record_file = env::var("RECORD_FILE").ok();

    // ===== Risk limits =====
    let max_long = env_f64("MAX_LONG", 50.0);
    // Short bound is a floor on the signed position and must be <= 0.
    let max_short = env_f64("MAX_SHORT", -50.0).min(0.0);
    let max_order_size = env_f64("MAX_ORDER_SIZE", 10.0);
    let risk = RiskLimits { max_long, max_short, max_order_size };

    // ===== Instrument / quoting =====
    let price_precision = env_u64("PRICE_PRECISION", 2) as u32;
    let px_scale = 10_i64.pow(price_precision);
    let tick_px = env_f64("TICK", 0.01);
    let tick = ((tick_px * px_scale as f64).round() as i64).max(1);
    let quoting = QuoteParams {
        quote_qty: env_f64("QUOTE_QTY", 0.6),
        tick,
        price_precision,
        px_scale,
        stale_timeout: Duration::from_secs(env_u64("STALE_TIMEOUT_SECS", 30)),
    };

    // ===== Network =====
    let net = NetParams {
        reconnect_delay: Duration::from_secs(env_u64("RECONNECT_DELAY_SECS", 5)),
        resync_delay: Duration::from_secs(env_u64("RESYNC_DELAY_SECS", 1)),
        request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 5)),
        recv_window: env_u64("BINANCE_RECV_WINDOW", 5000),
    };

    Config {
        symbol,
        mode,
        ws_url,
        rest_url,
        metrics_port,
        record_file,
        credentials,
        risk,
        quoting,
        net,
    }
}
