//! Bitfinex `book` channel adapter: signed-quantity `[price, count, qty]`
//! triples, `qty > 0` is a bid and `qty < 0` is an ask. The first data frame
//! received is a full order-book snapshot and is discarded; only subsequent
//! single-row updates feed the aggregate.

use serde_json::Value;

use crate::collectors::{AggregateState, VenueAdapter};
use crate::model::{PriceLevel, QuotePriceEvidence};

pub const UID: &str = "bitfinex";
const WS_URL: &str = "wss://api-pub.bitfinex.com/ws/2";

pub struct BitfinexAdapter {
    channel_id: Option<i64>,
    snapshot_consumed: bool,
}

impl BitfinexAdapter {
    pub fn new() -> Self {
        Self {
            channel_id: None,
            snapshot_consumed: false,
        }
    }
}

impl Default for BitfinexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

impl VenueAdapter for BitfinexAdapter {
    fn uid(&self) -> &'static str {
        UID
    }

    fn endpoint(&self) -> String {
        WS_URL.to_string()
    }

    fn initial_frames(&self) -> Vec<String> {
        vec![serde_json::json!({
            "event": "subscribe",
            "channel": "book",
            "symbol": "tBTCUSD",
        })
        .to_string()]
    }

    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String> {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Vec::new();
        };

        // Event objects: the initial info frame, or the subscribe ack that
        // carries the channel id we need to recognize our own data frames.
        if let Some(obj) = value.as_object() {
            if obj.get("event").and_then(Value::as_str) == Some("subscribed") {
                self.channel_id = obj.get("chanId").and_then(Value::as_i64);
            }
            return Vec::new();
        }

        let Some(frame) = value.as_array() else {
            return Vec::new();
        };
        if frame.len() < 2 {
            return Vec::new();
        }
        if let Some(id) = self.channel_id {
            if frame[0].as_i64() != Some(id) {
                return Vec::new();
            }
        }

        // Heartbeat and checksum control messages carry a string payload.
        if frame[1].as_str().is_some() {
            return Vec::new();
        }

        let rows: Vec<&Value> = match frame[1].as_array() {
            Some(outer) if outer.first().map(Value::is_array).unwrap_or(false) => {
                outer.iter().collect()
            }
            Some(_single) => vec![&frame[1]],
            None => return Vec::new(),
        };

        if !self.snapshot_consumed {
            self.snapshot_consumed = true;
            return Vec::new();
        }

        for row in rows {
            let Some(triple) = row.as_array() else { continue };
            if triple.len() < 3 {
                continue;
            }
            let price = triple[0].as_f64().unwrap_or(0.0);
            let qty = triple[2].as_f64().unwrap_or(0.0);
            if qty == 0.0 {
                continue;
            }

            let level: PriceLevel = [price.to_string(), qty.abs().to_string()];
            if qty > 0.0 {
                state.apply_bid(price, qty);
                state
                    .evidence
                    .push(QuotePriceEvidence::bids(UID, now_unix(), vec![level]));
            } else {
                state.apply_ask(price, qty.abs());
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
    fn discards_initial_snapshot_then_applies_updates() {
        let mut adapter = BitfinexAdapter::new();
        adapter.channel_id = Some(5);
        let mut state = AggregateState::default();

        let snapshot = r#"[5, [[100.0, 1, 1.0], [101.0, 1, -2.0]]]"#;
        adapter.handle_message(snapshot, &mut state);
        assert_eq!(state.bid_qty, 0.0);
        assert_eq!(state.ask_qty, 0.0);

        let update = r#"[5, [100.0, 1, 1.0]]"#;
        adapter.handle_message(update, &mut state);
        assert_eq!(state.bid_qty, 1.0);

        let ask_update = r#"[5, [101.0, 1, -2.0]]"#;
        adapter.handle_message(ask_update, &mut state);
        assert_eq!(state.ask_qty, 2.0);
    }

    #[test]
    fn heartbeat_is_a_noop() {
        let mut adapter = BitfinexAdapter::new();
        adapter.channel_id = Some(5);
        adapter.snapshot_consumed = true;
        let mut state = AggregateState::default();
        adapter.handle_message(r#"[5, "hb"]"#, &mut state);
        assert!(!state.has_activity());
    }
}
