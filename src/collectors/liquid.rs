//! Liquid Tap Services adapter (pusher-style protocol): subscribes to the two
//! side channels once the connection-established handshake fires, and sends
//! an application-level ping every 60 seconds to show activity.

use std::time::Duration;

use serde::Deserialize;

use crate::collectors::{parse_level, AggregateState, VenueAdapter};
use crate::model::{PriceLevel, QuotePriceEvidence};

pub const UID: &str = "liquid";
const WS_URL: &str = "wss://tap.liquid.com/app/LiquidTapClient";
const SELL_CHANNEL: &str = "price_ladders_cash_btcusd_sell";
const BUY_CHANNEL: &str = "price_ladders_cash_btcusd_buy";

#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: Option<String>,
    event: String,
}

pub struct LiquidAdapter;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

impl VenueAdapter for LiquidAdapter {
    fn uid(&self) -> &'static str {
        UID
    }

    fn endpoint(&self) -> String {
        WS_URL.to_string()
    }

    fn keepalive_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    fn keepalive_frame(&self) -> Option<String> {
        Some(r#"{"event":"pusher:ping","data":{}}"#.to_string())
    }

    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String> {
        let Ok(event) = serde_json::from_str::<WsEvent>(raw) else {
            return Vec::new();
        };

        match event.event.as_str() {
            "pusher:connection_established" => {
                return vec![
                    format!(r#"{{"event":"pusher:subscribe","data":{{"channel":"{SELL_CHANNEL}"}}}}"#),
                    format!(r#"{{"event":"pusher:subscribe","data":{{"channel":"{BUY_CHANNEL}"}}}}"#),
                ];
            }
            "updated" => {
                let Some(raw_levels) = event.data.as_deref() else {
                    return Vec::new();
                };
                let Ok(levels) = serde_json::from_str::<Vec<PriceLevel>>(raw_levels) else {
                    return Vec::new();
                };

                if event.channel == SELL_CHANNEL {
                    // "sell" ladder is the resting bid side.
                    let mut valid = Vec::new();
                    for level in &levels {
                        let (price, qty) = parse_level(level);
                        if qty > 0.0 {
                            state.apply_bid(price, qty);
                            valid.push(level.clone());
                        }
                    }
                    if !valid.is_empty() {
                        state
                            .evidence
                            .push(QuotePriceEvidence::bids(UID, now_unix(), valid));
                    }
                } else if event.channel == BUY_CHANNEL {
                    // "buy" ladder is the resting ask side.
                    let mut valid = Vec::new();
                    for level in &levels {
                        let (price, qty) = parse_level(level);
                        if qty > 0.0 {
                            state.apply_ask(price, qty);
                            valid.push(level.clone());
                        }
                    }
                    if !valid.is_empty() {
                        state
                            .evidence
                            .push(QuotePriceEvidence::asks(UID, now_unix(), valid));
                    }
                }
            }
            _ => {}
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_established_triggers_both_subscriptions() {
        let mut adapter = LiquidAdapter;
        let mut state = AggregateState::default();
        let frames = adapter.handle_message(
            r#"{"event":"pusher:connection_established","data":"{}"}"#,
            &mut state,
        );
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn sell_channel_feeds_bids_not_asks() {
        let mut adapter = LiquidAdapter;
        let mut state = AggregateState::default();
        let raw = format!(
            r#"{{"event":"updated","channel":"{SELL_CHANNEL}","data":"[[\"100.0\",\"1.0\"]]"}}"#
        );
        adapter.handle_message(&raw, &mut state);
        assert_eq!(state.bid_qty, 1.0);
        assert_eq!(state.ask_qty, 0.0);
        assert!(!state.evidence[0].bids.is_empty());
        assert!(state.evidence[0].asks.is_empty());
    }
}
