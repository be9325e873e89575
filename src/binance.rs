// ===============================
// src/binance.rs
// ===============================
//
// Binance helpers shared by feed and gateway: request signing, wire models
// for the streams we subscribe to, and level-string parsing.
//

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::domain::Px;

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Locally unique client order id.
pub fn client_order_id() -> String {
    format!("CL-{}-{}", timestamp_ms(), rand::random::<u32>())
}

fn hmac_hex(secret: &str, payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Sign a parameter set the way the exchange verifies it: any pre-existing
/// `signature` is dropped, the remaining parameters are URL-encoded sorted
/// by key, HMAC-SHA256(secret) over that string is hex-digested, and the
/// digest is appended as `signature` to the parameters in their original
/// order. Returns the full query string ready to send.
pub fn signed_query(secret: &str, params: &[(&str, String)]) -> String {
    let kept: Vec<&(&str, String)> =
        params.iter().filter(|kv| kv.0 != "signature").collect();

    let mut sorted = kept.clone();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let signature = hmac_hex(secret, &canonical);

    let query = kept
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{query}&signature={signature}")
}

/// Parse `[["price","qty"], ...]` level arrays; unparsable entries are
/// logged and dropped rather than poisoning the book.
pub fn parse_levels(raw: &[[String; 2]], px_scale: i64) -> Vec<(Px, f64)> {
    raw.iter()
        .filter_map(|lvl| {
            let px = Px::parse(&lvl[0], px_scale);
            let qty = lvl[1].trim().parse::<f64>().ok();
            match (px, qty) {
                (Some(px), Some(qty)) => Some((px, qty)),
                _ => {
                    warn!(price = %lvl[0], qty = %lvl[1], "unparsable level, dropped");
                    None
                }
            }
        })
        .collect()
}

// ---- Stream models ----

#[derive(Debug, Deserialize)]
pub struct WsDepthUpdate {
    #[serde(rename = "U")]
    pub first_id: u64,
    #[serde(rename = "u")]
    pub final_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "m")]
    pub is_maker_sell: bool,
}

/// Frames we act on, discriminated by the exchange's `e` tag. Everything
/// else (subscription acks, unknown types) fails to parse and is mapped to
/// `MarketEvent::Unknown` at the feed boundary.
#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
pub enum WsStreamEvent {
    #[serde(rename = "depthUpdate")]
    DepthUpdate(WsDepthUpdate),
    #[serde(rename = "trade")]
    Trade(WsTrade),
}

// ---- REST models ----

#[derive(Debug, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Successful order placement response; only the fields we track.
#[derive(Debug, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(default)]
    pub price: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_query_preserves_original_order() {
        let params = [
            ("symbol", "BTCUSDT".to_string()),
            ("side", "BUY".to_string()),
            ("timestamp", "1690000000000".to_string()),
        ];
        let q = signed_query("secret", &params);
        assert!(q.starts_with("symbol=BTCUSDT&side=BUY&timestamp=1690000000000&signature="));
    }

    #[test]
    fn signature_is_order_independent_and_ignores_stale_signature() {
        let a = [
            ("symbol", "BTCUSDT".to_string()),
            ("timestamp", "1".to_string()),
        ];
        let b = [
            ("timestamp", "1".to_string()),
            ("signature", "deadbeef".to_string()),
            ("symbol", "BTCUSDT".to_string()),
        ];
        let sig_a = signed_query("secret", &a);
        let sig_b = signed_query("secret", &b);
        let tail = |s: &str| s.rsplit("signature=").next().unwrap().to_string();
        assert_eq!(tail(&sig_a), tail(&sig_b));
        // the stale signature never reaches the wire
        assert!(!sig_b.contains("deadbeef"));
    }

    #[test]
    fn parse_levels_drops_garbage() {
        let raw = vec![
            ["10.01".to_string(), "1.5".to_string()],
            ["oops".to_string(), "1.0".to_string()],
            ["10.02".to_string(), "0".to_string()],
        ];
        let levels = parse_levels(&raw, 100);
        assert_eq!(levels, vec![(Px(1001), 1.5), (Px(1002), 0.0)]);
    }

    #[test]
    fn stream_event_decodes_by_tag() {
        let depth = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":157,"u":160,
                        "b":[["0.0024","10"]],"a":[["0.0026","100"]]}"#;
        match serde_json::from_str::<WsStreamEvent>(depth) {
            Ok(WsStreamEvent::DepthUpdate(d)) => {
                assert_eq!(d.first_id, 157);
                assert_eq!(d.final_id, 160);
                assert_eq!(d.bids.len(), 1);
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        let trade = r#"{"e":"trade","E":2,"s":"BTCUSDT","p":"0.001","q":"100","m":true}"#;
        match serde_json::from_str::<WsStreamEvent>(trade) {
            Ok(WsStreamEvent::Trade(t)) => {
                assert_eq!(t.qty, "100");
                assert!(t.is_maker_sell);
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        // Subscription ack has no "e" tag and must not decode.
        assert!(serde_json::from_str::<WsStreamEvent>(r#"{"result":null,"id":1}"#).is_err());
    }
}
