// ===============================
// src/feed.rs
// ===============================
//
// Market data channel: connects to the exchange stream, subscribes to the
// symbol's depth-diff and trade topics, and forwards decoded events to the
// engine. Disconnects and subscribe failures both land back in the same
// fixed-delay reconnect loop; the consumer never notices beyond a possible
// sequence gap, which the book resolves with a snapshot.
//
// Exchange keepalive pings are answered with a matching pong here and never
// surface to the application layer.
//

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::binance::{parse_levels, WsStreamEvent};
use crate::config::{Config, NetParams};
use crate::domain::{DepthDiff, MarketEvent, Px, TradeTick};
use crate::metrics::{WS_CONNECTED, WS_RECONNECTS};

fn subscribe_message(symbol: &str) -> String {
    let sym = symbol.to_lowercase();
    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": [
            format!("{sym}@depth@100ms"),
            format!("{sym}@trade"),
        ],
        "id": 1,
    })
    .to_string()
}

/// Decode one text frame into a market event. Unrecognized or malformed
/// frames become `Unknown` so downstream matching stays exhaustive.
pub fn decode_frame(txt: &str, px_scale: i64) -> MarketEvent {
    match serde_json::from_str::<WsStreamEvent>(txt) {
        Ok(WsStreamEvent::DepthUpdate(d)) => MarketEvent::Depth(DepthDiff {
            first_id: d.first_id,
            final_id: d.final_id,
            bids: parse_levels(&d.bids, px_scale),
            asks: parse_levels(&d.asks, px_scale),
        }),
        Ok(WsStreamEvent::Trade(t)) => {
            match (Px::parse(&t.price, px_scale), t.qty.trim().parse::<f64>()) {
                (Some(price), Ok(qty)) => {
                    MarketEvent::Trade(TradeTick { price, qty, is_maker_sell: t.is_maker_sell })
                }
                _ => {
                    warn!(price = %t.price, qty = %t.qty, "unparsable trade frame");
                    MarketEvent::Unknown
                }
            }
        }
        Err(_) => MarketEvent::Unknown,
    }
}

pub async fn run(cfg: Config, tx: mpsc::Sender<MarketEvent>) {
    let NetParams { reconnect_delay, .. } = cfg.net;
    let px_scale = cfg.quoting.px_scale;
    let sub_msg = subscribe_message(&cfg.symbol);

    loop {
        let url = match Url::parse(&cfg.ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, ws_url = %cfg.ws_url, "bad ws url");
                return;
            }
        };

        info!(ws_url = %cfg.ws_url, symbol = %cfg.symbol, "connecting market data stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                // Subscribe failures are not swallowed: log, tear down, retry
                // with the same delay as a connect failure.
                if let Err(e) = ws.send(Message::Text(sub_msg.clone())).await {
                    error!(?e, "subscribe failed");
                } else {
                    info!(symbol = %cfg.symbol, "subscribed depth + trade streams");
                    WS_CONNECTED.set(1);

                    while let Some(frame) = ws.next().await {
                        match frame {
                            Ok(Message::Ping(payload)) => {
                                if let Err(e) = ws.send(Message::Pong(payload)).await {
                                    error!(?e, "pong send failed");
                                    break;
                                }
                            }
                            Ok(m) if m.is_text() => {
                                let txt = match m.into_text() {
                                    Ok(t) => t,
                                    Err(e) => {
                                        warn!(?e, "failed to read text frame");
                                        continue;
                                    }
                                };
                                let ev = decode_frame(&txt, px_scale);
                                if matches!(ev, MarketEvent::Unknown) {
                                    debug!(frame = %txt, "unrecognized frame");
                                }
                                if tx.send(ev).await.is_err() {
                                    info!("event consumer gone, stopping feed");
                                    return;
                                }
                            }
                            Ok(_) => {
                                // binary/close frames: nothing for us
                            }
                            Err(e) => {
                                error!(?e, "ws read error");
                                break;
                            }
                        }
                    }
                    warn!("market data stream disconnected, will reconnect");
                }
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        WS_CONNECTED.set(0);
        WS_RECONNECTS.inc();
        sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_frame_decodes_to_domain_levels() {
        let txt = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":157,"u":160,
                      "b":[["10.00","1.0"],["9.99","0"]],"a":[["10.01","2.0"]]}"#;
        match decode_frame(txt, 100) {
            MarketEvent::Depth(d) => {
                assert_eq!(d.first_id, 157);
                assert_eq!(d.final_id, 160);
                assert_eq!(d.bids, vec![(Px(1000), 1.0), (Px(999), 0.0)]);
                assert_eq!(d.asks, vec![(Px(1001), 2.0)]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn trade_frame_decodes_maker_flag() {
        let txt = r#"{"e":"trade","E":2,"s":"BTCUSDT","p":"10.02","q":"0.4","m":false}"#;
        match decode_frame(txt, 100) {
            MarketEvent::Trade(t) => {
                assert_eq!(t.price, Px(1002));
                assert_eq!(t.qty, 0.4);
                assert!(!t.is_maker_sell);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn acks_and_garbage_map_to_unknown() {
        assert!(matches!(decode_frame(r#"{"result":null,"id":1}"#, 100), MarketEvent::Unknown));
        assert!(matches!(decode_frame("not json", 100), MarketEvent::Unknown));
    }
}
