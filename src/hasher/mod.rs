//! Hasher state and the search-kernel capability
//!
//! Every worker owns one hasher variant, picked once from its device
//! configuration. The variant is a tagged sum type: all operations dispatch
//! through [`Hasher`] on [`HasherVariant`] rather than branching at call sites.

use crate::crypto::HASH_SIZE;
use crate::job::Job;
use crate::types::{ChainIndex, TARGET_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::fmt;

pub mod inline;
pub mod reference;

pub use inline::InlineHasher;
pub use reference::ReferenceHasher;

/// Size of the random nonce prefix at the start of every hash input
pub const NONCE_SIZE: usize = 24;

/// Hash input block size; the input capacity is a multiple of it
pub const BLOCK_LEN: usize = 64;

/// Header length of an Alephium mining template
pub const DEFAULT_HEADER_LEN: usize = 302;

/// Fixed byte layout of the hash input: `nonce ++ header`, zero-padded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputLayout {
    header_len: usize,
}

impl InputLayout {
    pub const fn new(header_len: usize) -> Self {
        Self { header_len }
    }

    /// Header length every job must have
    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    /// Number of meaningful input bytes
    pub const fn input_len(&self) -> usize {
        NONCE_SIZE + self.header_len
    }

    /// Smallest multiple of [`BLOCK_LEN`] at or above the input length
    pub const fn capacity(&self) -> usize {
        self.input_len().div_ceil(BLOCK_LEN) * BLOCK_LEN
    }
}

impl Default for InputLayout {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_LEN)
    }
}

/// Which search implementation a worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    /// Unrolled kernel that mutates a single working buffer in place
    Inline,
    /// Straightforward kernel building each candidate input separately
    Reference,
}

impl fmt::Display for HasherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HasherKind::Inline => write!(f, "inline"),
            HasherKind::Reference => write!(f, "reference"),
        }
    }
}

/// Kernel launch dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_size: u32,
    pub block_size: u32,
    pub kind: HasherKind,
    /// Nonces each kernel thread tries per launch
    pub nonces_per_thread: u32,
}

impl LaunchConfig {
    /// Total number of hashes one launch attempts
    pub fn nonces_per_launch(&self) -> u64 {
        self.threads().saturating_mul(self.nonces_per_thread as u64)
    }

    /// Kernel threads per launch
    pub fn threads(&self) -> u64 {
        self.grid_size as u64 * self.block_size as u64
    }
}

/// Hash-input state shared by both variants; mirrored host/device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasherState {
    layout: InputLayout,
    buf: Vec<u8>,
    target: [u8; TARGET_SIZE],
    from_group: u8,
    to_group: u8,
    hash_count: u64,
    found_good_hash: bool,
    hash: [u8; HASH_SIZE],
}

impl HasherState {
    /// Allocate a zeroed state whose buffer holds `layout.capacity()` bytes
    pub fn try_alloc(layout: InputLayout) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(layout.capacity())?;
        buf.resize(layout.capacity(), 0);
        Ok(Self {
            layout,
            buf,
            target: [0; TARGET_SIZE],
            from_group: 0,
            to_group: 0,
            hash_count: 0,
            found_good_hash: false,
            hash: [0; HASH_SIZE],
        })
    }

    /// Size in bytes of the state's input buffer allocation
    pub fn alloc_size(layout: InputLayout) -> usize {
        layout.capacity()
    }

    /// Install `job` behind a fresh nonce prefix and clear the search counters.
    ///
    /// Panics if the job's header does not fit the fixed input layout.
    pub fn load(&mut self, job: &Job, nonce_prefix: &[u8; NONCE_SIZE]) {
        let header = job.header_blob();
        assert_eq!(
            NONCE_SIZE + header.len(),
            self.layout.input_len(),
            "header length does not match the hash input layout"
        );
        assert_eq!(
            (NONCE_SIZE + header.len()).div_ceil(BLOCK_LEN) * BLOCK_LEN,
            self.buf.len(),
            "hash input capacity is not block aligned"
        );

        self.buf[..NONCE_SIZE].copy_from_slice(nonce_prefix);
        self.buf[NONCE_SIZE..self.layout.input_len()].copy_from_slice(header);

        self.target = job.padded_target();

        let chain = job.chain_index();
        self.from_group = chain.from_group;
        self.to_group = chain.to_group;

        self.hash_count = 0;
        self.found_good_hash = false;
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    /// The meaningful part of the input buffer
    pub fn input(&self) -> &[u8] {
        &self.buf[..self.layout.input_len()]
    }

    /// The whole padded buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub fn nonce_prefix(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.buf[..NONCE_SIZE]);
        nonce
    }

    pub fn target(&self) -> &[u8; TARGET_SIZE] {
        &self.target
    }

    pub fn chain_index(&self) -> ChainIndex {
        ChainIndex {
            from_group: self.from_group,
            to_group: self.to_group,
        }
    }

    pub fn hash_count(&self) -> u64 {
        self.hash_count
    }

    pub fn found_good_hash(&self) -> bool {
        self.found_good_hash
    }

    pub fn hash(&self) -> &[u8; HASH_SIZE] {
        &self.hash
    }

    /// Overwrite with `other`, reusing this state's allocation
    pub fn copy_from(&mut self, other: &HasherState) {
        self.clone_from(other);
    }

    /// Stands in for a kernel-reported success
    #[cfg(test)]
    pub(crate) fn set_found_good_hash(&mut self, found: bool) {
        self.found_good_hash = found;
    }

    /// Counter stored in the first 8 nonce bytes, little-endian
    fn nonce_counter(&self) -> u64 {
        LittleEndian::read_u64(&self.buf[..8])
    }

    fn set_nonce_counter(&mut self, counter: u64) {
        LittleEndian::write_u64(&mut self.buf[..8], counter);
    }

    fn record_solution(&mut self, counter: u64, hash: [u8; HASH_SIZE]) {
        self.set_nonce_counter(counter);
        self.hash = hash;
        self.found_good_hash = true;
    }
}

/// Result of the latest search, read back from the hasher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub found: bool,
    pub nonce: [u8; NONCE_SIZE],
    pub hash: [u8; HASH_SIZE],
    pub hash_count: u64,
}

/// Capability interface over a search kernel
pub trait Hasher {
    /// Load a job behind a fresh nonce prefix
    fn reset(&mut self, job: &Job, nonce_prefix: &[u8; NONCE_SIZE]);

    /// Try `launch.nonces_per_launch()` nonces; returns whether one satisfied the target.
    ///
    /// Candidates add `0..n` to the little-endian counter in the first 8 nonce
    /// bytes. On success the winning nonce is left in the input buffer.
    fn search(&mut self, launch: &LaunchConfig) -> bool;

    fn read_result(&self) -> SearchResult;
}

/// A worker's hasher, fixed to one variant for its lifetime
#[derive(Clone)]
pub enum HasherVariant {
    Inline(InlineHasher),
    Reference(ReferenceHasher),
}

impl HasherVariant {
    /// Allocate a zeroed hasher of the given kind
    pub fn try_alloc(kind: HasherKind, layout: InputLayout) -> Result<Self, TryReserveError> {
        let state = HasherState::try_alloc(layout)?;
        Ok(match kind {
            HasherKind::Inline => HasherVariant::Inline(InlineHasher::new(state)),
            HasherKind::Reference => HasherVariant::Reference(ReferenceHasher::new(state)),
        })
    }

    pub fn kind(&self) -> HasherKind {
        match self {
            HasherVariant::Inline(_) => HasherKind::Inline,
            HasherVariant::Reference(_) => HasherKind::Reference,
        }
    }

    pub fn state(&self) -> &HasherState {
        match self {
            HasherVariant::Inline(h) => h.state(),
            HasherVariant::Reference(h) => h.state(),
        }
    }

    pub fn state_mut(&mut self) -> &mut HasherState {
        match self {
            HasherVariant::Inline(h) => h.state_mut(),
            HasherVariant::Reference(h) => h.state_mut(),
        }
    }

    /// Copy another hasher's state over this one (a host/device transfer).
    ///
    /// Both sides of a worker always share one variant.
    pub fn copy_from(&mut self, other: &HasherVariant) {
        debug_assert_eq!(self.kind(), other.kind());
        self.state_mut().copy_from(other.state());
    }
}

impl Hasher for HasherVariant {
    fn reset(&mut self, job: &Job, nonce_prefix: &[u8; NONCE_SIZE]) {
        match self {
            HasherVariant::Inline(h) => h.reset(job, nonce_prefix),
            HasherVariant::Reference(h) => h.reset(job, nonce_prefix),
        }
    }

    fn search(&mut self, launch: &LaunchConfig) -> bool {
        match self {
            HasherVariant::Inline(h) => h.search(launch),
            HasherVariant::Reference(h) => h.search(launch),
        }
    }

    fn read_result(&self) -> SearchResult {
        match self {
            HasherVariant::Inline(h) => h.read_result(),
            HasherVariant::Reference(h) => h.read_result(),
        }
    }
}

impl fmt::Debug for HasherVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HasherVariant")
            .field("kind", &self.kind())
            .field("hash_count", &self.state().hash_count())
            .field("found_good_hash", &self.state().found_good_hash())
            .finish()
    }
}

fn read_state(state: &HasherState) -> SearchResult {
    SearchResult {
        found: state.found_good_hash,
        nonce: state.nonce_prefix(),
        hash: state.hash,
        hash_count: state.hash_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;

    fn job(header_len: usize, target: &[u8]) -> Job {
        Job::new(vec![0x11; header_len], b"AB".to_vec(), target.to_vec(), 1, 2).unwrap()
    }

    #[test]
    fn test_layout_capacity() {
        let layout = InputLayout::default();
        assert_eq!(layout.input_len(), 326);
        assert_eq!(layout.capacity(), 384);

        let small = InputLayout::new(50);
        assert_eq!(small.input_len(), 74);
        assert_eq!(small.capacity(), 128);

        assert_eq!(InputLayout::new(40).capacity(), 64);
        assert_eq!(InputLayout::new(41).capacity(), 128);
    }

    #[test]
    fn test_state_load() {
        let layout = InputLayout::new(50);
        let mut state = HasherState::try_alloc(layout).unwrap();
        state.hash_count = 99;
        state.found_good_hash = true;

        state.load(&job(50, &[0x01]), &[0xaa; NONCE_SIZE]);

        assert_eq!(state.buffer().len(), 128);
        assert_eq!(&state.input()[..NONCE_SIZE], &[0xaa; NONCE_SIZE]);
        assert!(state.input()[NONCE_SIZE..].iter().all(|b| *b == 0x11));
        assert!(state.buffer()[74..].iter().all(|b| *b == 0));
        assert_eq!(state.target(), Target::from_be_slice(&[0x01]).unwrap().as_bytes());
        assert_eq!(state.chain_index(), ChainIndex::new(1, 2).unwrap());
        assert_eq!(state.hash_count(), 0);
        assert!(!state.found_good_hash());
    }

    #[test]
    #[should_panic(expected = "header length")]
    fn test_state_load_rejects_wrong_header_length() {
        let mut state = HasherState::try_alloc(InputLayout::new(50)).unwrap();
        state.load(&job(49, &[0x01]), &[0; NONCE_SIZE]);
    }

    #[test]
    fn test_variant_kind_is_fixed_by_allocation() {
        let layout = InputLayout::new(50);
        let inline = HasherVariant::try_alloc(HasherKind::Inline, layout).unwrap();
        let reference = HasherVariant::try_alloc(HasherKind::Reference, layout).unwrap();
        assert_eq!(inline.kind(), HasherKind::Inline);
        assert_eq!(reference.kind(), HasherKind::Reference);
        assert_eq!(inline.state(), reference.state());
    }

    #[test]
    fn test_variants_agree_on_search() {
        let layout = InputLayout::new(50);
        let launch = |kind| LaunchConfig {
            grid_size: 2,
            block_size: 32,
            kind,
            nonces_per_thread: 8,
        };
        let job = job(50, &[0xff; 32]);
        let prefix = [0x5a; NONCE_SIZE];

        let mut inline = HasherVariant::try_alloc(HasherKind::Inline, layout).unwrap();
        let mut reference = HasherVariant::try_alloc(HasherKind::Reference, layout).unwrap();
        inline.reset(&job, &prefix);
        reference.reset(&job, &prefix);

        let found_inline = inline.search(&launch(HasherKind::Inline));
        let found_reference = reference.search(&launch(HasherKind::Reference));

        assert_eq!(found_inline, found_reference);
        assert_eq!(inline.read_result(), reference.read_result());
    }

    #[test]
    fn test_search_stops_once_found() {
        let layout = InputLayout::new(50);
        let launch = LaunchConfig {
            grid_size: 1,
            block_size: 8,
            kind: HasherKind::Inline,
            nonces_per_thread: 1,
        };
        for kind in [HasherKind::Inline, HasherKind::Reference] {
            let mut hasher = HasherVariant::try_alloc(kind, layout).unwrap();
            hasher.reset(&job(50, &[]), &[0; NONCE_SIZE]);
            hasher.state_mut().set_found_good_hash(true);

            assert!(hasher.search(&launch));
            assert_eq!(hasher.state().hash_count(), 0);
        }
    }

    #[test]
    fn test_nonces_per_launch_saturates() {
        let launch = LaunchConfig {
            grid_size: u32::MAX,
            block_size: u32::MAX,
            kind: HasherKind::Reference,
            nonces_per_thread: u32::MAX,
        };
        assert_eq!(launch.threads(), u32::MAX as u64 * u32::MAX as u64);
        assert_eq!(launch.nonces_per_launch(), u64::MAX);
    }

    #[test]
    fn test_copy_from_transfers_state() {
        let layout = InputLayout::new(50);
        let mut host = HasherVariant::try_alloc(HasherKind::Reference, layout).unwrap();
        let mut device = HasherVariant::try_alloc(HasherKind::Reference, layout).unwrap();
        host.reset(&job(50, &[0x01]), &[3; NONCE_SIZE]);

        device.copy_from(&host);
        assert_eq!(device.state(), host.state());
    }
}
