//! Map/Reduce orchestrator: drives repeating rounds that harvest one
//! snapshot per collector from the shared publication channel, reduce them
//! to a single summary, and commit the result as a block.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tracing::{info, warn};

use crate::chain::ChainManager;
use crate::model::{FullSignedBlock, HarvestResult, QuotePriceEvidence, QuotePriceMessage};

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Drives the repeating map/reduce round described in the design: allocate
/// one job per collector, harvest exactly one snapshot per collector from
/// the shared channel (bounded by a round deadline), reduce, commit, sleep,
/// repeat.
pub struct Orchestrator {
    venue_count: usize,
    publication_rx: Arc<TokioMutex<mpsc::Receiver<crate::model::QuotePriceData>>>,
    chain: Arc<ChainManager>,
    block_tx: broadcast::Sender<FullSignedBlock>,
    round_deadline: Duration,
    cooldown: Duration,
}

impl Orchestrator {
    pub fn new(
        venue_count: usize,
        publication_rx: mpsc::Receiver<crate::model::QuotePriceData>,
        chain: Arc<ChainManager>,
        block_tx: broadcast::Sender<FullSignedBlock>,
        collector_tick: Duration,
        cooldown: Duration,
    ) -> Self {
        // A round waits at most twice the collector tick plus a margin for
        // one venue's snapshot to arrive; any venue that misses it is
        // dropped from that round's reduction rather than stalling forever.
        let round_deadline = collector_tick * 2 + Duration::from_millis(250);
        Self {
            venue_count,
            publication_rx: Arc::new(TokioMutex::new(publication_rx)),
            chain,
            block_tx,
            round_deadline,
            cooldown,
        }
    }

    /// Runs rounds forever.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.run_round().await {
                Ok(block) => {
                    info!(height = block.height, hash = %block.hash, "committed block");
                    let _ = self.block_tx.send(block);
                }
                Err(err) => warn!(error = %err, "round failed to commit a block"),
            }
            tokio::time::sleep(self.cooldown).await;
        }
    }

    /// One allocate/harvest/reduce/commit cycle.
    pub async fn run_round(&self) -> anyhow::Result<FullSignedBlock> {
        let results = self.harvest_round().await;
        self.reduce_and_commit(results).await
    }

    async fn harvest_round(&self) -> Vec<HarvestResult> {
        let (results_tx, mut results_rx) = mpsc::channel::<HarvestResult>(self.venue_count.max(1));

        let mut workers = Vec::with_capacity(self.venue_count);
        for _ in 0..self.venue_count {
            let rx = self.publication_rx.clone();
            let tx = results_tx.clone();
            let deadline = self.round_deadline;
            workers.push(tokio::spawn(async move {
                let received = {
                    let mut guard = rx.lock().await;
                    tokio::time::timeout(deadline, guard.recv()).await
                };

                match received {
                    Ok(Some(data)) => {
                        let crawler_name = data.exchange_uid.clone();
                        let result = HarvestResult::new(crawler_name, data, now_unix());
                        let _ = tx.send(result).await;
                    }
                    Ok(None) => {
                        warn!("publication channel closed mid-round");
                    }
                    Err(_) => {
                        warn!("a collector missed the round deadline and was dropped");
                    }
                }
            }));
        }
        drop(results_tx);

        let reducer = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = results_rx.recv().await {
                results.push(result);
            }
            results
        });

        for worker in workers {
            let _ = worker.await;
        }

        reducer.await.unwrap_or_default()
    }

    async fn reduce_and_commit(&self, results: Vec<HarvestResult>) -> anyhow::Result<FullSignedBlock> {
        let mut volume: i64 = 0;
        let mut price: f64 = 0.0;
        let mut evidence: Vec<QuotePriceEvidence> = Vec::new();

        for result in results {
            if result.data.has_activity() {
                volume += result.data.bid_volume + result.data.ask_volume;
                price += result.data.bid + result.data.ask;
                evidence.extend(result.data.evidence);
            }
        }

        let average_price = if volume > 0 { price / volume as f64 } else { 0.0 };
        let payload = QuotePriceMessage {
            average_price,
            volume,
            timestamp: now_unix(),
        };

        self.chain.commit_block(payload, evidence, None).await
    }
}
