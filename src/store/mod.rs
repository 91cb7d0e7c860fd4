//! Append-only, indexed key-value store for chain blocks.
//!
//! The keyspace is a single `(key BLOB, value BLOB)` table with single-byte
//! prefixes to distinguish the three logical namespaces (hash, timestamp
//! index, height index) plus a catch-all for auxiliary values. Integer keys
//! are encoded big-endian so lexicographic iteration equals numeric order,
//! which is what makes `get_latest_blocks` a plain range scan.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::model::FullSignedBlock;

const HASH_PREFIX: u8 = 0x01;
const TIMESTAMP_PREFIX: u8 = 0x02;
const HEIGHT_PREFIX: u8 = 0x03;
const AUX_PREFIX: u8 = 0xFF;

/// Key for the auxiliary slot holding the most recently committed block.
pub const LATEST_BLOCK_KEY: &str = "latest";

fn hash_key(hash: &str) -> Vec<u8> {
    let mut key = vec![HASH_PREFIX];
    key.extend_from_slice(hash.as_bytes());
    key
}

fn timestamp_key(timestamp: u64) -> Vec<u8> {
    let mut key = vec![TIMESTAMP_PREFIX];
    key.extend_from_slice(&timestamp.to_be_bytes());
    key
}

fn height_key(height: u64) -> Vec<u8> {
    let mut key = vec![HEIGHT_PREFIX];
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn aux_key(key: &str) -> Vec<u8> {
    let mut out = vec![AUX_PREFIX];
    out.extend_from_slice(key.as_bytes());
    out
}

/// Behavior a block chain manager needs from its backing store. Kept as a
/// trait so the chain manager and tests are not tied to SQLite specifically.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn store_block(&self, block: &FullSignedBlock) -> Result<()>;
    async fn get_block(&self, hash: &str) -> Result<Option<FullSignedBlock>>;
    async fn find_by_timestamp(&self, timestamp: u64) -> Result<Option<FullSignedBlock>>;
    async fn find_by_height(&self, height: u64) -> Result<Option<FullSignedBlock>>;
    async fn get_latest_blocks(&self, up_to: u64, limit: usize) -> Result<Vec<FullSignedBlock>>;
    async fn store_value(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// SQLite-backed realization of [`BlockStore`]. SQLite's default blob
/// collation is byte-wise, giving the big-endian keys their ordering
/// property without any custom comparator.
#[derive(Clone)]
pub struct SqliteBlockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlockStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open block store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory block store")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn read_raw(conn: &Connection, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut stmt = conn.prepare_cached("SELECT value FROM kv_store WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn store_block(&self, block: &FullSignedBlock) -> Result<()> {
        let bytes = serde_json::to_vec(block).context("serialize block")?;
        let hash_bytes = hash_key(&block.hash);
        let ts_bytes = timestamp_key(block.timestamp);
        let height_bytes = height_key(block.height);
        let hash_value = block.hash.as_bytes().to_vec();

        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)",
            params![hash_bytes, bytes],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)",
            params![ts_bytes, hash_value],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)",
            params![height_bytes, block.hash.as_bytes()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn get_block(&self, hash: &str) -> Result<Option<FullSignedBlock>> {
        let conn = self.conn.lock().await;
        match Self::read_raw(&conn, &hash_key(hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_timestamp(&self, timestamp: u64) -> Result<Option<FullSignedBlock>> {
        let conn = self.conn.lock().await;
        let hash = match Self::read_raw(&conn, &timestamp_key(timestamp))? {
            Some(bytes) => String::from_utf8(bytes).context("decode indexed hash")?,
            None => return Ok(None),
        };
        match Self::read_raw(&conn, &hash_key(&hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_height(&self, height: u64) -> Result<Option<FullSignedBlock>> {
        let conn = self.conn.lock().await;
        let hash = match Self::read_raw(&conn, &height_key(height))? {
            Some(bytes) => String::from_utf8(bytes).context("decode indexed hash")?,
            None => return Ok(None),
        };
        match Self::read_raw(&conn, &hash_key(&hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_latest_blocks(&self, up_to: u64, limit: usize) -> Result<Vec<FullSignedBlock>> {
        let conn = self.conn.lock().await;

        let lower = vec![TIMESTAMP_PREFIX];
        let upper = timestamp_key(up_to);
        // Inclusive upper bound: append a byte so the range covers exactly up_to.
        let mut upper_inclusive = upper.clone();
        upper_inclusive.push(0xFF);

        let mut stmt = conn.prepare_cached(
            "SELECT value FROM kv_store WHERE key > ?1 AND key <= ?2 ORDER BY key ASC LIMIT ?3",
        )?;
        let hashes: Vec<String> = stmt
            .query_map(
                params![lower, upper_inclusive, limit as i64],
                |row| -> rusqlite::Result<Vec<u8>> { row.get(0) },
            )?
            .filter_map(|r| r.ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect();

        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(bytes) = Self::read_raw(&conn, &hash_key(&hash))? {
                blocks.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(blocks)
    }

    async fn store_value(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)",
            params![aux_key(key), value],
        )?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().await;
        Self::read_raw(&conn, &aux_key(key))
    }
}
