//! Host-emulated devices
//!
//! Runs the search kernels on the CPU, one stream thread per worker, with the
//! same copy-in/kernel/copy-out protocol a discrete GPU would use.

use super::{DeviceBackend, Stream};
use crate::hasher::{HasherKind, LaunchConfig};
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub const DEFAULT_GRID_SIZE: u32 = 4;
pub const DEFAULT_BLOCK_SIZE: u32 = 64;
pub const DEFAULT_NONCES_PER_THREAD: u32 = 16;

/// Shape of the emulated device set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedDeviceConfig {
    pub devices: usize,
    /// Force a hasher variant; `None` picks per device
    pub variant: Option<HasherKind>,
    pub grid_size: Option<u32>,
    pub block_size: Option<u32>,
    pub nonces_per_thread: u32,
}

impl Default for EmulatedDeviceConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            variant: None,
            grid_size: None,
            block_size: None,
            nonces_per_thread: DEFAULT_NONCES_PER_THREAD,
        }
    }
}

pub struct EmulatedBackend {
    config: EmulatedDeviceConfig,
    streams_created: AtomicUsize,
}

impl EmulatedBackend {
    pub fn new(config: EmulatedDeviceConfig) -> Self {
        Self {
            config,
            streams_created: AtomicUsize::new(0),
        }
    }

    /// Streams handed out so far
    pub fn streams_created(&self) -> usize {
        self.streams_created.load(Ordering::Relaxed)
    }

    fn check_device(&self, device_id: usize) -> Result<()> {
        if device_id >= self.config.devices {
            return Err(Error::device_bind(
                device_id,
                format!("only {} emulated devices present", self.config.devices),
            ));
        }
        Ok(())
    }
}

impl DeviceBackend for EmulatedBackend {
    fn name(&self) -> &'static str {
        "emulated"
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.config.devices)
    }

    fn bind(&self, device_id: usize) -> Result<()> {
        self.check_device(device_id)
    }

    fn create_stream(&self, device_id: usize) -> Result<Stream> {
        self.check_device(device_id)?;
        let index = self.streams_created.fetch_add(1, Ordering::Relaxed);
        Stream::spawn(device_id, format!("emu{}-stream{}", device_id, index))
    }

    fn configure(&self, device_id: usize) -> Result<LaunchConfig> {
        self.check_device(device_id)?;

        // The inline kernel avoids a per-thread input copy, so it wins on the host
        let kind = self.config.variant.unwrap_or(HasherKind::Inline);
        let launch = LaunchConfig {
            grid_size: self.config.grid_size.unwrap_or(DEFAULT_GRID_SIZE),
            block_size: self.config.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            kind,
            nonces_per_thread: self.config.nonces_per_thread,
        };
        debug!(device_id, ?launch, "Configured emulated device");
        Ok(launch)
    }
}
