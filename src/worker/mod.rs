//! Mining workers
//!
//! A worker owns one device stream, a host/device pair of hasher states, the
//! template it currently mines and a found flag.
//!
//! Template handoff: [`Worker::install`] takes a lease on the template (the
//! reference count goes up) and only then publishes it. [`Worker::reset`]
//! loads whichever template is current at that instant and pins its lease
//! next to the hasher state, so a concurrent install can make a search stale
//! but never leaves it pointing at a released template.
//!
//! Every reset starts a new generation. A launch remembers the generation it
//! copied in and its copy-back is dropped if a reset has happened since, so
//! the host state, the found flag and the pinned lease always agree.

use crate::codec::encode_new_block;
use crate::device::{DeviceBackend, DeviceHasher, Stream};
use crate::hasher::{
    Hasher, HasherKind, HasherState, HasherVariant, InputLayout, LaunchConfig, SearchResult,
    NONCE_SIZE,
};
use crate::job::{MiningTemplate, TemplateLease};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use bytes::BytesMut;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

pub mod pool;

pub use pool::{DispatchSlot, WorkerPool};

/// Upper bound on workers in one pool
pub const MAX_WORKER_NUM: usize = 1024;

/// Host-side bookkeeping, touched by the worker's owner and by the stream's
/// copy-back
struct HostSide {
    hasher: HasherVariant,
    /// Lease of the template the hasher state was last reset from
    pinned: Option<Arc<TemplateLease>>,
    /// Bumped by every reset
    generation: u64,
    rng: StdRng,
}

/// Copy the host state to the device; returns the generation copied
fn copy_to_device(host: &Mutex<HostSide>, device: &DeviceHasher) -> u64 {
    let mut device = device.lock();
    let host = host.lock();
    device.copy_from(&host.hasher);
    host.generation
}

/// Copy the device state back unless the host was reset after `generation`
/// was copied in. Returns the device flag, or `false` for a dropped result.
fn copy_to_host(host: &Mutex<HostSide>, device: &DeviceHasher, generation: u64) -> bool {
    let device = device.lock();
    let mut host = host.lock();
    if host.generation != generation {
        trace!(
            launched = generation,
            current = host.generation,
            "Dropping result of a superseded search"
        );
        return false;
    }
    host.hasher.copy_from(&device);
    host.hasher.state().found_good_hash()
}

pub struct Worker {
    id: u32,
    device_id: usize,
    stream: Stream,
    launch: LaunchConfig,
    layout: InputLayout,
    host: Arc<Mutex<HostSide>>,
    device_hasher: DeviceHasher,
    template: ArcSwapOption<TemplateLease>,
    found_good_hash: AtomicBool,
}

impl Worker {
    /// Bind a new worker to `device_id`.
    ///
    /// Any failure here is fatal for the worker and is reported as
    /// [`Error::WorkerInit`] naming the worker and device.
    pub fn new(
        backend: &dyn DeviceBackend,
        id: u32,
        device_id: usize,
        layout: InputLayout,
    ) -> Result<Self> {
        let init = || -> Result<(Stream, LaunchConfig, HasherVariant, DeviceHasher)> {
            backend.bind(device_id)?;
            let stream = backend.create_stream(device_id)?;
            let launch = backend.configure(device_id)?;
            let host_hasher = backend.alloc_host_hasher(device_id, launch.kind, layout)?;
            let device_hasher = backend.alloc_device_hasher(device_id, launch.kind, layout)?;
            Ok((stream, launch, host_hasher, device_hasher))
        };
        let (stream, launch, host_hasher, device_hasher) =
            init().map_err(|e| Error::worker_init(id, device_id, e))?;

        info!(
            worker_id = id,
            device_id,
            grid_size = launch.grid_size,
            block_size = launch.block_size,
            variant = %launch.kind,
            "Worker {}: device id {}, grid size {}, block size {}. Using {} kernel",
            id,
            device_id,
            launch.grid_size,
            launch.block_size,
            launch.kind
        );

        let buffer_addr = host_hasher.state().buffer().as_ptr() as usize as u64;
        let host = Arc::new(Mutex::new(HostSide {
            hasher: host_hasher,
            pinned: None,
            generation: 0,
            rng: StdRng::seed_from_u64(0),
        }));
        let seed = u64::from(id)
            .wrapping_add(Arc::as_ptr(&host) as usize as u64)
            .wrapping_add(buffer_addr)
            .wrapping_add(rand::random::<u64>());
        host.lock().rng = StdRng::seed_from_u64(seed);

        Ok(Self {
            id,
            device_id,
            stream,
            launch,
            layout,
            host,
            device_hasher,
            template: ArcSwapOption::empty(),
            found_good_hash: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn launch_config(&self) -> LaunchConfig {
        self.launch
    }

    /// Hasher variant, fixed for the worker's lifetime
    pub fn kind(&self) -> HasherKind {
        self.launch.kind
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    /// Adopt `template` as the worker's current template.
    ///
    /// The reference count is incremented before the pointer is published.
    /// The superseded lease is handed back: it stays counted until the caller
    /// drops it and any reset that pinned it has moved on.
    pub fn install(&self, template: &Arc<MiningTemplate>) -> Option<Arc<TemplateLease>> {
        let lease = Arc::new(template.retain());
        self.template.swap(Some(lease))
    }

    /// The currently published template
    pub fn load_template(&self) -> Option<Arc<TemplateLease>> {
        self.template.load_full()
    }

    pub fn load_found(&self) -> bool {
        self.found_good_hash.load(Ordering::SeqCst)
    }

    /// Publish the found flag. Only the worker's single poller may call this.
    pub fn store_found(&self, found: bool) {
        self.found_good_hash.store(found, Ordering::SeqCst);
    }

    /// Randomize a fresh search space over the current template.
    ///
    /// Writes 24 random bytes followed by the job header into the host input
    /// buffer, pads the target, copies the chain index, zeroes the hash
    /// counter and clears both found flags. Returns the lease it pinned.
    pub fn reset(&self) -> Result<Arc<TemplateLease>> {
        let lease = self
            .template
            .load_full()
            .ok_or_else(|| Error::invalid_state(format!("worker {} has no template", self.id)))?;

        {
            let mut host = self.host.lock();
            let mut nonce_prefix = [0u8; NONCE_SIZE];
            host.rng.fill(&mut nonce_prefix[..]);
            host.hasher.reset(lease.job(), &nonce_prefix);
            host.pinned = Some(Arc::clone(&lease));
            host.generation = host.generation.wrapping_add(1);
        }

        self.store_found(false);
        Ok(lease)
    }

    /// Queue one search on the worker's stream.
    ///
    /// Copies the host state to the device, runs the kernel, copies the
    /// state back and finally calls `on_complete` with the device flag. A
    /// reset that lands before the copy-back supersedes the launch: its result
    /// is dropped and `on_complete` sees `false`.
    pub fn launch<F>(&self, on_complete: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let launch = self.launch;
        let launched = Arc::new(AtomicU64::new(0));

        let host = Arc::clone(&self.host);
        let device = self.device_hasher.clone();
        let generation = Arc::clone(&launched);
        self.stream.enqueue(move || {
            generation.store(copy_to_device(&host, &device), Ordering::SeqCst);
        })?;

        let device = self.device_hasher.clone();
        self.stream.enqueue(move || {
            device.lock().search(&launch);
        })?;

        let host = Arc::clone(&self.host);
        let device = self.device_hasher.clone();
        self.stream.enqueue(move || {
            let found = copy_to_host(&host, &device, launched.load(Ordering::SeqCst));
            on_complete(found);
        })
    }

    /// Mirror the host copy of the device flag into the worker flag
    pub fn mirror_found(&self) -> bool {
        let found = self.host.lock().hasher.state().found_good_hash();
        self.store_found(found);
        found
    }

    /// Hashes attempted since the last reset, as of the last copy-back
    pub fn hash_count(&self) -> u64 {
        self.host.lock().hasher.state().hash_count()
    }

    /// Result of the last search, as of the last copy-back
    pub fn search_result(&self) -> SearchResult {
        self.host.lock().hasher.read_result()
    }

    /// Snapshot of the host hasher state
    pub fn host_state(&self) -> HasherState {
        self.host.lock().hasher.state().clone()
    }

    /// Template the host state was last reset from
    pub fn pinned_template(&self) -> Option<Arc<TemplateLease>> {
        self.host.lock().pinned.clone()
    }

    /// Append the found block to `out` in wire format.
    ///
    /// Valid only once the found flag is set and no reset has happened since.
    /// Nonce and job data both come from the template pinned by the last
    /// reset. Returns bytes written.
    pub fn serialize_block(&self, out: &mut BytesMut) -> Result<usize> {
        if !self.load_found() {
            return Err(Error::invalid_state(format!(
                "worker {} has not found a block",
                self.id
            )));
        }

        let host = self.host.lock();
        // A reset may have landed since the flag was mirrored
        if !host.hasher.state().found_good_hash() {
            return Err(Error::invalid_state(format!(
                "worker {} was reset after its last find",
                self.id
            )));
        }
        let lease = host.pinned.as_ref().ok_or_else(|| {
            Error::invalid_state(format!("worker {} has not been reset", self.id))
        })?;
        let job = lease.job();
        let nonce = host.hasher.state().nonce_prefix();

        let written = encode_new_block(out, &nonce, job.header_blob(), job.txs_blob())?;
        debug!(
            worker_id = self.id,
            chain = %job.chain_index(),
            message = written - 4,
            "Serialized block"
        );
        Ok(written)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("launch", &self.launch)
            .field("found_good_hash", &self.load_found())
            .finish()
    }
}
