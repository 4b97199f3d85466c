//! Host-side mining loop
//!
//! One task per worker: pick a template from the board, install it, reset
//! the hasher, dispatch a launch and wait for the copy-back. A found block is
//! serialized from the template the reset pinned and handed to the sink.

use crate::job::TemplateBoard;
use crate::sink::BlockSink;
use crate::types::HashRate;
use crate::worker::WorkerPool;
use crate::{Error, Result};
use bytes::BytesMut;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mining statistics for the whole pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiningStats {
    /// Total hashes computed
    pub total_hashes: u64,
    /// Kernel launches completed
    pub launches: u64,
    /// Blocks found and serialized
    pub blocks_found: u64,
    /// Time spent mining (seconds)
    pub mining_time_secs: u64,
    /// Average hash rate (hashes per second)
    pub average_hash_rate: f64,
}

/// Thread-safe counters behind [`MiningStats`]
#[derive(Debug)]
struct PoolStats {
    total_hashes: AtomicU64,
    launches: AtomicU64,
    blocks_found: AtomicU64,
    start_time: Instant,
}

impl PoolStats {
    fn new() -> Self {
        Self {
            total_hashes: AtomicU64::new(0),
            launches: AtomicU64::new(0),
            blocks_found: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn to_mining_stats(&self) -> MiningStats {
        let total_hashes = self.total_hashes.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();

        MiningStats {
            total_hashes,
            launches: self.launches.load(Ordering::Relaxed),
            blocks_found: self.blocks_found.load(Ordering::Relaxed),
            mining_time_secs: elapsed.as_secs(),
            average_hash_rate: HashRate::from_hashes(total_hashes, elapsed.as_secs_f64()).value(),
        }
    }
}

pub struct Miner {
    pool: Arc<WorkerPool>,
    board: Arc<TemplateBoard>,
    sink: Arc<dyn BlockSink>,
    stats: Arc<PoolStats>,
    stats_interval: Duration,
}

impl Miner {
    pub fn new(pool: Arc<WorkerPool>, board: Arc<TemplateBoard>, sink: Arc<dyn BlockSink>) -> Self {
        Self {
            pool,
            board,
            sink,
            stats: Arc::new(PoolStats::new()),
            stats_interval: Duration::from_secs(10),
        }
    }

    /// Set how often aggregate statistics are logged
    pub fn with_stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }

    pub fn stats(&self) -> MiningStats {
        self.stats.to_mining_stats()
    }

    /// Run every worker until `cancel` fires or a worker fails fatally
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            workers = self.pool.len(),
            sink = self.sink.name(),
            "Starting mining loop"
        );

        let handles: Vec<_> = (0..self.pool.len())
            .map(|index| {
                let pool = Arc::clone(&self.pool);
                let board = Arc::clone(&self.board);
                let sink = Arc::clone(&self.sink);
                let stats = Arc::clone(&self.stats);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let result = worker_loop(&pool, index, &board, sink.as_ref(), &stats, &cancel).await;
                    if result.is_err() {
                        // No partial-pool mode: one dead worker stops them all
                        cancel.cancel();
                    }
                    result
                })
            })
            .collect();

        let reporter = {
            let stats = Arc::clone(&self.stats);
            let cancel = cancel.clone();
            let period = self.stats_interval;
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let snapshot = stats.to_mining_stats();
                            info!(
                                hashes = snapshot.total_hashes,
                                blocks = snapshot.blocks_found,
                                "Hash rate: {}",
                                HashRate::new(snapshot.average_hash_rate)
                            );
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            })
        };

        let mut outcome = Ok(());
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(worker_id = index, error = %e, "Worker stopped with error");
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
                Err(e) => {
                    error!(worker_id = index, error = %e, "Worker task panicked");
                    if outcome.is_ok() {
                        outcome = Err(Error::invalid_state(format!(
                            "worker task {} panicked",
                            index
                        )));
                    }
                }
            }
        }

        cancel.cancel();
        let _ = reporter.await;

        let final_stats = self.stats.to_mining_stats();
        info!(
            hashes = final_stats.total_hashes,
            blocks = final_stats.blocks_found,
            "Mining stopped. Hash rate: {}",
            HashRate::new(final_stats.average_hash_rate)
        );
        outcome
    }
}

async fn worker_loop(
    pool: &WorkerPool,
    index: usize,
    board: &TemplateBoard,
    sink: &dyn BlockSink,
    stats: &PoolStats,
    cancel: &CancellationToken,
) -> Result<()> {
    let slot = pool
        .slot(index)
        .ok_or_else(|| Error::invalid_state(format!("no dispatch slot {}", index)))?;
    let worker = slot.worker();
    let mut published = board.subscribe();

    while !cancel.is_cancelled() {
        published.borrow_and_update();
        let Some(ticket) = board.next_template() else {
            tokio::select! {
                changed = published.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
            continue;
        };

        let superseded = worker.install(ticket.template());
        drop(superseded);
        worker.reset()?;

        let found = tokio::select! {
            found = slot.dispatch() => found?,
            _ = cancel.cancelled() => break,
        };

        stats.total_hashes.fetch_add(worker.hash_count(), Ordering::Relaxed);
        stats.launches.fetch_add(1, Ordering::Relaxed);

        if !found {
            continue;
        }

        let chain = ticket.template().chain_index();
        let mut frame = BytesMut::new();
        worker.serialize_block(&mut frame)?;
        board.record_mined(chain);
        stats.blocks_found.fetch_add(1, Ordering::Relaxed);
        info!(
            worker_id = worker.id(),
            device_id = worker.device_id(),
            chain = %chain,
            stale = ticket.is_stale(),
            "Found block"
        );

        if let Err(e) = sink.submit(frame.freeze()).await {
            warn!(worker_id = worker.id(), error = %e, "Failed to submit block");
        }
    }

    debug!(worker_id = worker.id(), "Worker loop stopped");
    Ok(())
}
