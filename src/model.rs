//! Data model for the price-evidence chain: raw order-book evidence, per-venue
//! aggregates, the reduced payload, and the signed block that chains them together.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Salt mixed into every hash calculation so the chain's hashes cannot be
/// reproduced without knowledge of this binary's build.
const SERVICE_SALT: &str =
    "8f3c2a1d0684170dcf58ed2499d233be72b5dde48d8124cb617f1309bae85da2fe85cf";

/// Prefix prepended to every block hash, used to recognize blocks that belong
/// to this chain at a glance.
const BLOCK_HASH_PREFIX: &str = "dd";

/// A `[price, quantity]` pair as reported by a venue, kept as strings the way
/// the wire protocols deliver them so evidence is an exact record of what was
/// seen rather than a reparsed float.
pub type PriceLevel = [String; 2];

/// One snapshot of order-book activity attributable to a single venue and
/// bundled into a collector's per-tick aggregate as audit material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotePriceEvidence {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    pub timestamp: u64,
    #[serde(rename = "exchange")]
    pub exchange_uid: String,
}

impl QuotePriceEvidence {
    pub fn bids(exchange_uid: impl Into<String>, timestamp: u64, bids: Vec<PriceLevel>) -> Self {
        Self {
            bids,
            asks: Vec::new(),
            timestamp,
            exchange_uid: exchange_uid.into(),
        }
    }

    pub fn asks(exchange_uid: impl Into<String>, timestamp: u64, asks: Vec<PriceLevel>) -> Self {
        Self {
            bids: Vec::new(),
            asks,
            timestamp,
            exchange_uid: exchange_uid.into(),
        }
    }
}

/// One collector's per-second aggregate: running sums, extremes, and the raw
/// evidence rows that fed them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotePriceData {
    #[serde(rename = "provider")]
    pub exchange_uid: String,
    pub timestamp: i64,

    #[serde(rename = "bidPrice")]
    pub bid: f64,
    #[serde(rename = "askPrice")]
    pub ask: f64,
    #[serde(rename = "bidQty")]
    pub bid_qty: f64,
    #[serde(rename = "askQty")]
    pub ask_qty: f64,
    #[serde(rename = "bidVolume")]
    pub bid_volume: i64,
    #[serde(rename = "askVolume")]
    pub ask_volume: i64,

    #[serde(rename = "lowBid")]
    pub low_bid: f64,
    #[serde(rename = "highBid")]
    pub high_bid: f64,
    #[serde(rename = "lowAsk")]
    pub low_ask: f64,
    #[serde(rename = "highAsk")]
    pub high_ask: f64,

    pub evidence: Vec<QuotePriceEvidence>,
}

impl QuotePriceData {
    /// Whether this snapshot reflects any observed activity at all.
    pub fn has_activity(&self) -> bool {
        self.bid_qty > 0.0 || self.ask_qty > 0.0
    }
}

/// One harvested snapshot wrapped with the crawler's identity and a content
/// hash, as produced by a round worker before it is handed to the reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    #[serde(rename = "name")]
    pub crawler_name: String,
    pub data: QuotePriceData,
    pub timestamp: i64,
    pub hash: String,
}

impl HarvestResult {
    pub fn new(crawler_name: impl Into<String>, data: QuotePriceData, timestamp: i64) -> Self {
        let mut result = Self {
            crawler_name: crawler_name.into(),
            data,
            timestamp,
            hash: String::new(),
        };
        result.hash = calculate_hash(&result);
        result
    }
}

/// The reduced summary produced by one map/reduce round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotePriceMessage {
    #[serde(rename = "averagePrice")]
    pub average_price: f64,
    pub volume: i64,
    pub timestamp: i64,
}

/// A single, immutable entry in the hash-chained log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSignedBlock {
    pub hash: String,
    pub height: u64,
    pub timestamp: u64,

    pub payload: QuotePriceMessage,
    pub evidence: Vec<QuotePriceEvidence>,

    #[serde(rename = "previousHash")]
    pub previous_hash: String,
    pub address: String,
    #[serde(rename = "previousAddress")]
    pub previous_address: String,
    #[serde(default)]
    pub memo: Option<String>,
}

impl FullSignedBlock {
    /// Builds the block's stable locator from fields fixed before hashing, so
    /// the hash can always be recomputed from the stored block alone.
    pub fn make_address(height: u64, timestamp: u64) -> String {
        format!("block/{height}/{timestamp}")
    }

    /// Computes and sets this block's chained hash. Must be called after
    /// every other field (including `address`) has its final value.
    pub fn seal(&mut self) {
        self.hash = String::new();
        let digest = calculate_hash(self);
        let seconds = (self.timestamp % 60) as u8;
        self.hash = format!("{BLOCK_HASH_PREFIX}{seconds:02}{digest}");
    }
}

/// Double SHA-256 (hash-of-hash) over the salted JSON encoding of `obj`.
/// The caller is responsible for blanking any field the hash itself will be
/// written into before calling this.
pub fn calculate_hash<T: Serialize>(obj: &T) -> String {
    let bytes = serde_json::to_vec(obj).expect("model types always serialize");
    let raw = format!("{SERVICE_SALT}:{}", String::from_utf8_lossy(&bytes));

    let first = Sha256::digest(raw.as_bytes());
    let second = Sha256::digest(hex::encode(first).as_bytes());
    hex::encode(second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(height: u64, timestamp: u64, previous_hash: &str) -> FullSignedBlock {
        let address = FullSignedBlock::make_address(height, timestamp);
        let mut block = FullSignedBlock {
            hash: String::new(),
            height,
            timestamp,
            payload: QuotePriceMessage {
                average_price: 101.0,
                volume: 3,
                timestamp: timestamp as i64,
            },
            evidence: Vec::new(),
            previous_hash: previous_hash.to_string(),
            address,
            previous_address: String::new(),
            memo: None,
        };
        block.seal();
        block
    }

    #[test]
    fn hash_has_prefix_and_seconds() {
        let block = sample_block(0, 1_700_000_077, "");
        assert!(block.hash.starts_with("dd77"));
    }

    #[test]
    fn hash_is_reproducible_from_stored_block() {
        let block = sample_block(3, 1_700_000_042, "dd00abc");
        let mut recomputed = block.clone();
        recomputed.hash.clear();
        let digest = calculate_hash(&recomputed);
        let seconds = (recomputed.timestamp % 60) as u8;
        let expected = format!("dd{seconds:02}{digest}");
        assert_eq!(expected, block.hash);
    }

    #[test]
    fn tampering_with_payload_changes_hash() {
        let mut block = sample_block(0, 1_700_000_000, "");
        let original_hash = block.hash.clone();
        block.payload.average_price += 1.0;
        block.seal();
        assert_ne!(original_hash, block.hash);
    }

    #[test]
    fn harvest_result_hash_changes_with_data() {
        let data = QuotePriceData {
            exchange_uid: "binance".into(),
            timestamp: 100,
            bid: 1.0,
            ask: 1.0,
            bid_qty: 1.0,
            ask_qty: 1.0,
            bid_volume: 1,
            ask_volume: 1,
            low_bid: 1.0,
            high_bid: 1.0,
            low_ask: 1.0,
            high_ask: 1.0,
            evidence: Vec::new(),
        };
        let r1 = HarvestResult::new("binance", data.clone(), 100);
        let mut data2 = data;
        data2.bid = 2.0;
        let r2 = HarvestResult::new("binance", data2, 100);
        assert_ne!(r1.hash, r2.hash);
    }
}
