//! Binance depth-stream adapter: unsigned `[price, qty]` arrays keyed by side.

use serde::Deserialize;

use crate::collectors::{parse_level, AggregateState, VenueAdapter};
use crate::model::{PriceLevel, QuotePriceEvidence};

pub const UID: &str = "binance";
const WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
const SYMBOL: &str = "btcusdt";

#[derive(Debug, Deserialize)]
struct MarketDepthEvent {
    #[serde(rename = "E")]
    timestamp: u64,
    #[serde(rename = "b", default)]
    bids: Vec<PriceLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<PriceLevel>,
}

pub struct BinanceAdapter;

impl VenueAdapter for BinanceAdapter {
    fn uid(&self) -> &'static str {
        UID
    }

    fn endpoint(&self) -> String {
        format!("{WS_BASE_URL}/{SYMBOL}@depth")
    }

    fn handle_message(&mut self, raw: &str, state: &mut AggregateState) -> Vec<String> {
        let Ok(event) = serde_json::from_str::<MarketDepthEvent>(raw) else {
            return Vec::new();
        };

        let mut valid_bids = Vec::new();
        for level in &event.bids {
            let (price, qty) = parse_level(level);
            // A qty of 0 is a depth-cache instruction to remove the level,
            // not a trade; it contributes nothing to the aggregate.
            if qty > 0.0 {
                state.apply_bid(price, qty);
                valid_bids.push(level.clone());
            }
        }

        let mut valid_asks = Vec::new();
        for level in &event.asks {
            let (price, qty) = parse_level(level);
            if qty > 0.0 {
                state.apply_ask(price, qty);
                valid_asks.push(level.clone());
            }
        }

        if !valid_bids.is_empty() || !valid_asks.is_empty() {
            state.evidence.push(QuotePriceEvidence {
                bids: valid_bids,
                asks: valid_asks,
                timestamp: event.timestamp / 1000,
                exchange_uid: UID.to_string(),
            });
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_zero_quantity_rows() {
        let mut state = AggregateState::default();
        let mut adapter = BinanceAdapter;
        let raw = r#"{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":1,"u":2,
            "b":[["100.0","1.0"],["99.0","0.0"]],
            "a":[["101.0","2.0"]]}"#;
        adapter.handle_message(raw, &mut state);

        assert_eq!(state.bid_qty, 1.0);
        assert_eq!(state.ask_qty, 2.0);
        assert_eq!(state.evidence[0].bids.len(), 1);
    }
}
