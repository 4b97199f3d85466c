//! Fixed-size worker pool
//!
//! Workers are created once, `workers_per_device` per detected device and
//! assigned round-robin. Each worker has one dispatch slot bridging its stream
//! to the async host loop.

use super::{Worker, MAX_WORKER_NUM};
use crate::device::DeviceBackend;
use crate::hasher::InputLayout;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;

/// Clears the in-flight flag once the launch it guards is done with.
///
/// Owned by the stream's completion callback, so the flag follows the launch
/// rather than the future awaiting it.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Async completion bridge for one worker; at most one launch in flight
#[derive(Debug)]
pub struct DispatchSlot {
    worker: Arc<Worker>,
    in_flight: Arc<AtomicBool>,
}

impl DispatchSlot {
    fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Launch one search and wait for its copy-back.
    ///
    /// Mirrors the device flag into the worker flag and returns it. Dropping
    /// the future leaves the launch running on the stream; the slot frees up
    /// once its copy-back has completed.
    pub async fn dispatch(&self) -> Result<bool> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_state(format!(
                "worker {} already has a launch in flight",
                self.worker.id()
            )));
        }
        let guard = InFlight(Arc::clone(&self.in_flight));

        let (tx, rx) = oneshot::channel();
        self.worker.launch(move |found| {
            drop(guard);
            let _ = tx.send(found);
        })?;

        rx.await.map_err(|_| {
            Error::stream(self.worker.device_id(), "stream dropped a pending launch")
        })?;

        Ok(self.worker.mirror_found())
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    slots: Box<[DispatchSlot]>,
    device_count: usize,
    layout: InputLayout,
}

impl WorkerPool {
    /// Initialise every worker; fails on the first worker that cannot start
    pub fn new(
        backend: &dyn DeviceBackend,
        workers_per_device: usize,
        layout: InputLayout,
    ) -> Result<Self> {
        let device_count = backend.device_count()?;
        if device_count == 0 {
            return Err(Error::config(format!(
                "no devices available on the {} backend",
                backend.name()
            )));
        }
        if workers_per_device == 0 {
            return Err(Error::config("workers per device must be greater than 0"));
        }

        let total = device_count * workers_per_device;
        if total > MAX_WORKER_NUM {
            return Err(Error::config(format!(
                "{} workers requested, at most {} supported",
                total, MAX_WORKER_NUM
            )));
        }

        let slots = (0..total)
            .map(|i| {
                let worker = Worker::new(backend, i as u32, i % device_count, layout)?;
                Ok(DispatchSlot::new(Arc::new(worker)))
            })
            .collect::<Result<Box<[_]>>>()?;

        info!(
            backend = backend.name(),
            devices = device_count,
            workers = total,
            "Worker pool ready"
        );

        Ok(Self {
            slots,
            device_count,
            layout,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn worker(&self, index: usize) -> Option<&Arc<Worker>> {
        self.slots.get(index).map(DispatchSlot::worker)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.slots.iter().map(DispatchSlot::worker)
    }

    pub fn slot(&self, index: usize) -> Option<&DispatchSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[DispatchSlot] {
        &self.slots
    }
}
