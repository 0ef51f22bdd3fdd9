//! Emulated device: an in-order launch stream plus a pool of compute units
//! that run the blocks of each kernel.

mod metrics;
mod stream;
mod task;

pub use metrics::{StreamMetrics, StreamMetricsSnapshot};
pub use stream::Stream;
pub use task::{KernelFn, LaunchHandle, LaunchId, LaunchOutcome};

use std::sync::Arc;

use kernport_policy::Backend;
use tracing::debug;

use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone)]
pub struct DeviceBackend {
    stream: Stream,
    compute: Arc<rayon::ThreadPool>,
}

impl DeviceBackend {
    pub fn new(compute_units: Option<usize>) -> KernelResult<Self> {
        let units = compute_units.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        let compute = rayon::ThreadPoolBuilder::new()
            .num_threads(units)
            .thread_name(|index| format!("kernport-cu-{index}"))
            .build()
            .map_err(|err| KernelError::backend(Backend::Device, err.to_string()))?;
        debug!(compute_units = units, "device backend ready");

        Ok(Self {
            stream: Stream::new("kernport-device")?,
            compute: Arc::new(compute),
        })
    }

    pub const fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn compute(&self) -> Arc<rayon::ThreadPool> {
        Arc::clone(&self.compute)
    }

    pub fn compute_units(&self) -> usize {
        self.compute.current_num_threads()
    }

    /// Enqueue a kernel on the stream (the native async launch).
    pub fn launch(&self, name: impl Into<String>, func: KernelFn) -> KernelResult<LaunchHandle> {
        self.stream.launch(name, func)
    }

    /// Wait for every launch issued so far.
    pub fn synchronize(&self) {
        self.stream.synchronize();
    }

    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.stream.metrics().snapshot()
    }
}
