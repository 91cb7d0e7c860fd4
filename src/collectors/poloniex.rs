//! Poloniex numeric-channel adapter: `[channel_id, sequence, events]` frames
//! where each event is `["o", side_flag, price_str, qty_str]`. Single-element
//! frames are heartbeats; only `"o"` (order) events contribute.

use serde_json::Value;

use crate::collectors::{AggregateState, VenueAdapter};
use crate::model::QuotePriceEvidence;

pub const UID: &str = "poloniex";
const WS_URL: &str = "wss://api2.poloniex.com";
const SYMBOL: &str = "USDT_BTC";

pub struct PoloniexAdapter;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

impl VenueAdapter for PoloniexAdapter {
    fn uid(&self) -> &'static str {
        UID
    }

    fn endpoint(&self) -> String {
        WS_URL.to_string()
    }

    fn initial_frames(&self) -> Vec<String> {
        vec![serde_json::json!({
            "command": "subscribe",
            "channel": SYMBOL,
        })
        .to_string()]
    }

    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String> {
        let Ok(frame) = serde_json::from_str::<Vec<Value>>(raw) else {
            return Vec::new();
        };

        if frame.len() == 1 {
            return Vec::new(); // heartbeat
        }
        if frame.len() < 3 {
            return Vec::new();
        }

        let Some(events) = frame[2].as_array() else {
            return Vec::new();
        };

        for event in events {
            let Some(fields) = event.as_array() else { continue };
            if fields.first().and_then(Value::as_str) != Some("o") {
                continue;
            }
            if fields.len() < 4 {
                continue;
            }

            let price = fields[2]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            let qty = fields[3]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            if qty == 0.0 {
                continue;
            }

            let level = [price.to_string(), qty.to_string()];
            let is_bid = fields[1].as_f64() == Some(1.0);
            if is_bid {
                state.apply_bid(price, qty);
                state
                    .evidence
                    .push(QuotePriceEvidence::bids(UID, now_unix(), vec![level]));
            } else {
                state.apply_ask(price, qty);
                state
                    .evidence
                    .push(QuotePriceEvidence::asks(UID, now_unix(), vec![level]));
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_frame_is_heartbeat() {
        let mut adapter = PoloniexAdapter;
        let mut state = AggregateState::default();
        adapter.handle_message("[1010]", &mut state);
        assert!(!state.has_activity());
    }

    #[test]
    fn order_event_classified_by_side_flag() {
        let mut adapter = PoloniexAdapter;
        let mut state = AggregateState::default();
        let raw = r#"[162, 1000, [["o", 1, "100.0", "1.0"], ["o", 0, "101.0", "2.0"]]]"#;
        adapter.handle_message(raw, &mut state);
        assert_eq!(state.bid_qty, 1.0);
        assert_eq!(state.ask_qty, 2.0);
    }

    #[test]
    fn non_order_events_are_ignored() {
        let mut adapter = PoloniexAdapter;
        let mut state = AggregateState::default();
        let raw = r#"[162, 1000, [["i", {"currencyPair":"USDT_BTC"}]]]"#;
        adapter.handle_message(raw, &mut state);
        assert!(!state.has_activity());
    }
}
