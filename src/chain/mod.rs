//! Hash-chained block manager: builds well-formed blocks and commits them
//! through a [`BlockStore`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::model::{FullSignedBlock, QuotePriceEvidence, QuotePriceMessage};
use crate::store::{BlockStore, LATEST_BLOCK_KEY};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Owns the chain's notion of "latest block" and serializes every commit
/// behind an internal lock, so callers never need to coordinate concurrent
/// `commit_block` calls themselves.
pub struct ChainManager {
    store: Arc<dyn BlockStore>,
    latest: Mutex<Option<FullSignedBlock>>,
}

impl ChainManager {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            latest: Mutex::new(None),
        }
    }

    /// Builds, hashes, and persists a new block extending the current chain
    /// tip, committing the result and advancing the tip atomically with
    /// respect to other `commit_block` calls.
    pub async fn commit_block(
        &self,
        payload: QuotePriceMessage,
        evidence: Vec<QuotePriceEvidence>,
        memo: Option<String>,
    ) -> Result<FullSignedBlock> {
        let mut latest = self.latest.lock().await;

        if latest.is_none() {
            *latest = self.reload_latest().await?;
        }

        let (previous_hash, previous_address, height) = match latest.as_ref() {
            Some(block) => (block.hash.clone(), block.address.clone(), block.height + 1),
            None => (String::new(), String::new(), 0),
        };

        let timestamp = now_unix();
        let address = FullSignedBlock::make_address(height, timestamp);

        let mut block = FullSignedBlock {
            hash: String::new(),
            height,
            timestamp,
            payload,
            evidence,
            previous_hash,
            address,
            previous_address,
            memo,
        };
        block.seal();

        self.store
            .store_block(&block)
            .await
            .context("commit block to store")?;

        let serialized = serde_json::to_vec(&block).context("serialize latest block")?;
        self.store
            .store_value(LATEST_BLOCK_KEY, serialized)
            .await
            .context("persist latest pointer")?;

        *latest = Some(block.clone());
        Ok(block)
    }

    async fn reload_latest(&self) -> Result<Option<FullSignedBlock>> {
        match self.store.get_value(LATEST_BLOCK_KEY).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteBlockStore;

    fn payload(average_price: f64, volume: i64) -> QuotePriceMessage {
        QuotePriceMessage {
            average_price,
            volume,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn genesis_block_has_height_zero_and_empty_previous_hash() {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::in_memory().unwrap());
        let chain = ChainManager::new(store);

        let block = chain
            .commit_block(payload(100.0, 5), Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(block.height, 0);
        assert_eq!(block.previous_hash, "");
    }

    #[tokio::test]
    async fn chain_links_by_hash_and_increments_height() {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::in_memory().unwrap());
        let chain = ChainManager::new(store);

        let b0 = chain
            .commit_block(payload(100.0, 5), Vec::new(), None)
            .await
            .unwrap();
        let b1 = chain
            .commit_block(payload(101.0, 6), Vec::new(), None)
            .await
            .unwrap();
        let b2 = chain
            .commit_block(payload(102.0, 7), Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(b1.height, 1);
        assert_eq!(b1.previous_hash, b0.hash);
        assert_eq!(b2.height, 2);
        assert_eq!(b2.previous_hash, b1.hash);
    }

    #[tokio::test]
    async fn reloads_latest_from_store_on_fresh_manager() {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::in_memory().unwrap());
        let chain = ChainManager::new(store.clone());
        let b0 = chain
            .commit_block(payload(100.0, 5), Vec::new(), None)
            .await
            .unwrap();

        let chain2 = ChainManager::new(store);
        let b1 = chain2
            .commit_block(payload(101.0, 6), Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(b1.height, 1);
        assert_eq!(b1.previous_hash, b0.hash);
    }
}
