// ===============================
// src/domain.rs
// ===============================
//
// Shared value types. Prices are kept as scaled integers (`Px`) so they can
// be used as exact map keys; the scale is 10^PRICE_PRECISION and lives in
// config. Quantities stay f64 (the exchange reports them as decimal strings
// and they are never used as keys).
//

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn as_api(&self) -> &'static str {
        match self { Side::Buy => "BUY", Side::Sell => "SELL" }
    }
}

/// Directional bias derived from book imbalance. Stamped onto every resting
/// order at placement time so a flip invalidates the old quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Signal { Up, Down, Neutral }

impl Signal {
    pub fn as_gauge(&self) -> i64 {
        match self { Signal::Up => 1, Signal::Down => -1, Signal::Neutral => 0 }
    }
}

/// Exact price key: raw ticks at `px_scale` units per 1.0 of quote currency.
/// `px_scale = 10^PRICE_PRECISION`, e.g. 100 for a 0.01-precision instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Px(pub i64);

impl Px {
    pub fn from_f64(px: f64, px_scale: i64) -> Self {
        Px((px * px_scale as f64).round() as i64)
    }

    /// Parse an exchange decimal string ("25.35190000") into raw ticks.
    pub fn parse(s: &str, px_scale: i64) -> Option<Self> {
        s.trim().parse::<f64>().ok().map(|v| Self::from_f64(v, px_scale))
    }

    pub fn to_f64(self, px_scale: i64) -> f64 {
        self.0 as f64 / px_scale as f64
    }

    /// Render with the instrument's price precision, for REST parameters.
    pub fn to_api(self, precision: u32) -> String {
        let scale = 10_i64.pow(precision);
        format!("{:.*}", precision as usize, self.0 as f64 / scale as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderStatus { Pending, Filled, Canceled, Rejected }

/// Value type for an order we intend to rest on the exchange. Owned by the
/// order manager from creation until terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Px,
    pub quantity: f64,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub creation_time_ms: i64,
}

// ---- Market data events (decoded once at the feed boundary) ----

/// Incremental depth update; `first_id`/`final_id` are the exchange's
/// `U`/`u` update ids used for gap detection.
#[derive(Debug, Clone, Serialize)]
pub struct DepthDiff {
    pub first_id: u64,
    pub final_id: u64,
    pub bids: Vec<(Px, f64)>,
    pub asks: Vec<(Px, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeTick {
    pub price: Px,
    pub qty: f64,
    /// True when the maker side of the trade was a sell.
    pub is_maker_sell: bool,
}

#[derive(Debug, Clone, Serialize)]
pub enum MarketEvent {
    Depth(DepthDiff),
    Trade(TradeTick),
    /// Anything the feed does not recognize (subscription acks, new frame
    /// types). Dropped downstream, counted in metrics.
    Unknown,
}

// ---- Recorder events (JSONL sink) ----

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Md(MarketEvent),
    Ord(Order),
    Fill { qty: f64, is_maker_sell: bool, position: f64 },
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_parse_and_render() {
        let px = Px::parse("25.3519", 100).unwrap();
        assert_eq!(px, Px(2535));
        assert_eq!(px.to_api(2), "25.35");
        assert_eq!(Px::parse("10", 100), Some(Px(1000)));
        assert_eq!(Px::parse("junk", 100), None);
    }

    #[test]
    fn px_ordering_is_exact() {
        // 10.07 is not representable in binary floating point, but its
        // scaled key is exact and compares cleanly against neighbours.
        let a = Px::from_f64(10.07, 100);
        let b = Px::from_f64(10.08, 100);
        assert_eq!(a, Px(1007));
        assert!(a < b);
        assert_eq!(Px::from_f64(10.07, 100), a);
    }
}
