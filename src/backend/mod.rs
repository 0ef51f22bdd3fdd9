//! Native execution backends.
//!
//! Each backend is a thin translation of an index range into something that
//! actually runs: a plain loop, a rayon parallel iterator, or a launch on the
//! emulated device stream.

pub mod device;
pub mod sequential;
pub mod threaded;

use crate::config::KernelConfig;
use crate::error::KernelResult;

pub use device::DeviceBackend;
pub use threaded::ThreadedBackend;

/// Backends shared by every region of a registry.
#[derive(Debug)]
pub struct Backends {
    host: ThreadedBackend,
    device: DeviceBackend,
}

impl Backends {
    pub fn new(config: &KernelConfig) -> KernelResult<Self> {
        Ok(Self {
            host: ThreadedBackend::new(config.host_threads)?,
            device: DeviceBackend::new(config.device_compute_units)?,
        })
    }

    pub const fn host(&self) -> &ThreadedBackend {
        &self.host
    }

    pub const fn device(&self) -> &DeviceBackend {
        &self.device
    }
}

impl Drop for Backends {
    fn drop(&mut self) {
        self.device.stream().shutdown();
    }
}
