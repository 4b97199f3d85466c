//! Synthetic job source
//!
//! Stands in for the node connection: every interval it publishes a fresh
//! template with a random header for each chain.

use crate::hasher::InputLayout;
use crate::job::{Job, MiningTemplate, TemplateBoard};
use crate::types::{ChainIndex, Target};
use crate::Result;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
pub struct SyntheticJobFeed {
    layout: InputLayout,
    target: Target,
    txs_len: usize,
    interval: Duration,
    rng: StdRng,
    rounds: u64,
}

impl SyntheticJobFeed {
    pub fn new(layout: InputLayout, target: Target, txs_len: usize, interval: Duration) -> Self {
        Self {
            layout,
            target,
            txs_len,
            interval,
            rng: StdRng::from_os_rng(),
            rounds: 0,
        }
    }

    /// Rounds published so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Publish one template per chain
    pub fn publish_round(&mut self, board: &TemplateBoard) -> Result<()> {
        for chain in ChainIndex::all() {
            let template = MiningTemplate::new(self.next_job(chain)?, self.layout)?;
            // Workers still mining the old template keep it alive through their lease
            drop(board.publish(template));
        }
        self.rounds += 1;
        debug!(round = self.rounds, "Published synthetic templates");
        Ok(())
    }

    fn next_job(&mut self, chain: ChainIndex) -> Result<Job> {
        let mut header = vec![0u8; self.layout.header_len()];
        self.rng.fill_bytes(&mut header);
        let mut txs = vec![0u8; self.txs_len];
        self.rng.fill_bytes(&mut txs);

        Job::new(
            header,
            txs,
            self.target.as_bytes().to_vec(),
            chain.from_group,
            chain.to_group,
        )
    }

    /// Publish immediately, then once per interval until cancelled
    pub async fn run(mut self, board: &TemplateBoard, cancel: CancellationToken) -> Result<()> {
        info!(
            interval = %humantime::format_duration(self.interval),
            target = %self.target,
            "Starting synthetic job feed"
        );

        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish_round(board)?,
                _ = cancel.cancelled() => break,
            }
        }

        info!(rounds = self.rounds, "Synthetic job feed stopped");
        Ok(())
    }
}
