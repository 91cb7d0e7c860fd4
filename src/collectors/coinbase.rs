//! Coinbase `full` channel adapter: order lifecycle tracked through
//! `received` (remember the order's size) and `done` (classify and apply).

use std::collections::HashMap;

use serde::Deserialize;

use crate::collectors::{AggregateState, VenueAdapter};
use crate::model::QuotePriceEvidence;

pub const UID: &str = "coinbase";
const WS_URL: &str = "wss://ws-feed.pro.coinbase.com";
const PRODUCT_ID: &str = "BTC-USD";

#[derive(Debug, Deserialize)]
struct MatchEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    order_id: String,
}

pub struct CoinbaseAdapter {
    order_sizes: HashMap<String, f64>,
}

impl CoinbaseAdapter {
    pub fn new() -> Self {
        Self {
            order_sizes: HashMap::new(),
        }
    }
}

impl Default for CoinbaseAdapter {
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

impl VenueAdapter for CoinbaseAdapter {
    fn uid(&self) -> &'static str {
        UID
    }

    fn endpoint(&self) -> String {
        WS_URL.to_string()
    }

    fn initial_frames(&self) -> Vec<String> {
        vec![serde_json::json!({
            "type": "subscribe",
            "channels": [{ "name": "full", "product_ids": [PRODUCT_ID] }],
        })
        .to_string()]
    }

    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String> {
        let Ok(event) = serde_json::from_str::<MatchEvent>(raw) else {
            return Vec::new();
        };

        match event.kind.as_str() {
            "received" => {
                if let Ok(size) = event.size.parse::<f64>() {
                    self.order_sizes.insert(event.order_id, size);
                }
            }
            "done" => {
                let qty = self.order_sizes.remove(&event.order_id).unwrap_or(0.0);
                if event.reason == "canceled" || qty == 0.0 {
                    return Vec::new();
                }
                let price = event.price.parse::<f64>().unwrap_or(0.0);
                let level = [price.to_string(), qty.to_string()];

                // "sell" means a resting bid was filled; "buy" means a
                // resting ask was filled. Asks are never stored under a
                // Bids-named field here.
                if event.side == "sell" {
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
            _ => {}
        }

        Vec::new()
    }
}
