//! Device backends
//!
//! A backend binds worker threads to devices, hands out execution streams,
//! picks launch dimensions and a hasher variant per device, and allocates the
//! host-pinned and device-resident hasher buffers.

use crate::hasher::{HasherKind, HasherState, HasherVariant, InputLayout, LaunchConfig};
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

pub mod emulated;
pub mod stream;

pub use emulated::{EmulatedBackend, EmulatedDeviceConfig};
pub use stream::Stream;

/// Device access used by worker initialisation
pub trait DeviceBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Number of usable devices
    fn device_count(&self) -> Result<usize>;

    /// Bind the calling thread of control to `device_id`
    fn bind(&self, device_id: usize) -> Result<()>;

    /// Create an asynchronous execution stream on `device_id`
    fn create_stream(&self, device_id: usize) -> Result<Stream>;

    /// Launch dimensions and hasher variant for `device_id`
    fn configure(&self, device_id: usize) -> Result<LaunchConfig>;

    /// Allocate host-pinned hasher memory
    fn alloc_host_hasher(
        &self,
        device_id: usize,
        kind: HasherKind,
        layout: InputLayout,
    ) -> Result<HasherVariant> {
        HasherVariant::try_alloc(kind, layout).map_err(|e| {
            Error::allocation(device_id, HasherState::alloc_size(layout), e.to_string())
        })
    }

    /// Allocate device-resident hasher memory
    fn alloc_device_hasher(
        &self,
        device_id: usize,
        kind: HasherKind,
        layout: InputLayout,
    ) -> Result<DeviceHasher> {
        HasherVariant::try_alloc(kind, layout)
            .map(DeviceHasher::new)
            .map_err(|e| {
                Error::allocation(device_id, HasherState::alloc_size(layout), e.to_string())
            })
    }
}

/// Device-resident hasher memory; shared with the worker's stream
#[derive(Clone)]
pub struct DeviceHasher {
    inner: Arc<Mutex<HasherVariant>>,
}

impl DeviceHasher {
    pub fn new(hasher: HasherVariant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(hasher)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, HasherVariant> {
        self.inner.lock()
    }

    pub fn kind(&self) -> HasherKind {
        self.inner.lock().kind()
    }
}
