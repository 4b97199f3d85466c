//! Mining jobs and reference-counted templates
//!
//! A [`MiningTemplate`] wraps one immutable [`Job`]. Workers adopt a template
//! through a [`TemplateLease`], which bumps the template's reference count
//! before the worker can publish it and drops the count only once the last
//! holder of the lease is gone. The allocation itself is owned by `Arc`, so a
//! template can never be freed while a worker still points at it.

use crate::hasher::{InputLayout, NONCE_SIZE};
use crate::types::{pad_target, ChainIndex, CHAIN_NUMS, TARGET_SIZE};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Immutable description of one mining round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    header_blob: Bytes,
    txs_blob: Bytes,
    target: Bytes,
    chain: ChainIndex,
}

impl Job {
    /// Create a new job; `target` is big-endian and at most 32 bytes
    pub fn new(
        header_blob: impl Into<Bytes>,
        txs_blob: impl Into<Bytes>,
        target: impl Into<Bytes>,
        from_group: u8,
        to_group: u8,
    ) -> Result<Self> {
        let target = target.into();
        if target.len() > TARGET_SIZE {
            return Err(Error::target(format!(
                "Invalid target length: expected at most {} bytes, got {}",
                TARGET_SIZE,
                target.len()
            )));
        }

        Ok(Self {
            header_blob: header_blob.into(),
            txs_blob: txs_blob.into(),
            target,
            chain: ChainIndex::new(from_group, to_group)?,
        })
    }

    pub fn header_blob(&self) -> &[u8] {
        &self.header_blob
    }

    pub fn txs_blob(&self) -> &[u8] {
        &self.txs_blob
    }

    /// Target exactly as received
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// Target left-zero-padded to 32 bytes
    pub fn padded_target(&self) -> [u8; TARGET_SIZE] {
        pad_target(&self.target)
    }

    pub fn chain_index(&self) -> ChainIndex {
        self.chain
    }

    /// Length of the block body emitted for this job
    pub fn block_len(&self) -> usize {
        NONCE_SIZE + self.header_blob.len() + self.txs_blob.len()
    }
}

/// Reference-counted wrapper around one job
#[derive(Debug)]
pub struct MiningTemplate {
    job: Job,
    ref_count: AtomicUsize,
}

impl MiningTemplate {
    /// Wrap `job`, rejecting headers that do not fit `layout`
    pub fn new(job: Job, layout: InputLayout) -> Result<Arc<Self>> {
        if job.header_blob().len() != layout.header_len() {
            return Err(Error::template(format!(
                "Invalid header length: expected {} bytes, got {}",
                layout.header_len(),
                job.header_blob().len()
            )));
        }

        Ok(Arc::new(Self {
            job,
            ref_count: AtomicUsize::new(0),
        }))
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn chain_index(&self) -> ChainIndex {
        self.job.chain_index()
    }

    /// Number of live leases held on this template
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Take a lease, incrementing the reference count
    pub fn retain(self: &Arc<Self>) -> TemplateLease {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
        TemplateLease {
            template: Arc::clone(self),
        }
    }
}

/// A counted hold on a template; releasing it is dropping it
#[derive(Debug)]
pub struct TemplateLease {
    template: Arc<MiningTemplate>,
}

impl TemplateLease {
    pub fn template(&self) -> &Arc<MiningTemplate> {
        &self.template
    }
}

impl Deref for TemplateLease {
    type Target = MiningTemplate;

    fn deref(&self) -> &MiningTemplate {
        &self.template
    }
}

impl Drop for TemplateLease {
    fn drop(&mut self) {
        self.template.ref_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Latest template per chain, as published by the job subscriber
pub struct TemplateBoard {
    slots: Box<[ArcSwapOption<MiningTemplate>]>,
    active: Box<[AtomicUsize]>,
    mined: Box<[AtomicU64]>,
    version: watch::Sender<u64>,
}

impl TemplateBoard {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            slots: (0..CHAIN_NUMS).map(|_| ArcSwapOption::empty()).collect(),
            active: (0..CHAIN_NUMS).map(|_| AtomicUsize::new(0)).collect(),
            mined: (0..CHAIN_NUMS).map(|_| AtomicU64::new(0)).collect(),
            version,
        }
    }

    /// Replace the chain's template, returning the superseded one
    pub fn publish(&self, template: Arc<MiningTemplate>) -> Option<Arc<MiningTemplate>> {
        let chain = template.chain_index();
        let previous = self.slots[chain.flat()].swap(Some(template));
        self.version.send_modify(|v| *v += 1);
        debug!(chain = %chain, "Published template");
        previous
    }

    /// Latest template for `chain`, if any
    pub fn latest(&self, chain: ChainIndex) -> Option<Arc<MiningTemplate>> {
        self.slots[chain.flat()].load_full()
    }

    /// Monotonic publish counter; changes on every publish
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Pick the chain with the fewest active workers that has a template.
    ///
    /// Ties go to the lowest chain index. The returned ticket counts as one
    /// active worker on that chain until dropped.
    pub fn next_template(&self) -> Option<ChainTicket<'_>> {
        let (flat, template) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(flat, slot)| slot.load_full().map(|t| (flat, t)))
            .min_by_key(|(flat, _)| (self.active[*flat].load(Ordering::Relaxed), *flat))?;

        self.active[flat].fetch_add(1, Ordering::Relaxed);
        Some(ChainTicket {
            board: self,
            flat,
            template,
        })
    }

    /// Workers currently mining `chain`
    pub fn active_workers(&self, chain: ChainIndex) -> usize {
        self.active[chain.flat()].load(Ordering::Relaxed)
    }

    /// Record a block found on `chain`
    pub fn record_mined(&self, chain: ChainIndex) {
        self.mined[chain.flat()].fetch_add(1, Ordering::Relaxed);
    }

    /// Blocks found on `chain` so far
    pub fn mined_count(&self, chain: ChainIndex) -> u64 {
        self.mined[chain.flat()].load(Ordering::Relaxed)
    }
}

impl Default for TemplateBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's claim on one chain of the board
pub struct ChainTicket<'a> {
    board: &'a TemplateBoard,
    flat: usize,
    template: Arc<MiningTemplate>,
}

impl ChainTicket<'_> {
    pub fn template(&self) -> &Arc<MiningTemplate> {
        &self.template
    }

    /// True once a newer template has been published for this chain
    pub fn is_stale(&self) -> bool {
        let latest = self.board.slots[self.flat].load();
        match &*latest {
            Some(latest) => !Arc::ptr_eq(latest, &self.template),
            None => true,
        }
    }
}

impl Drop for ChainTicket<'_> {
    fn drop(&mut self) {
        self.board.active[self.flat].fetch_sub(1, Ordering::Relaxed);
    }
}
