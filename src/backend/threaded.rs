use kernport_policy::Backend;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{KernelError, KernelResult};
use crate::segment::{Index, Segment};

/// Host thread pool backing the threaded policy.
#[derive(Debug)]
pub struct ThreadedBackend {
    pool: rayon::ThreadPool,
}

impl ThreadedBackend {
    pub fn new(threads: Option<usize>) -> KernelResult<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("kernport-host-{index}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| KernelError::backend(Backend::Threaded, err.to_string()))?;
        debug!(threads = pool.current_num_threads(), "host pool ready");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` with this backend's pool as the ambient rayon pool.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }
}

/// Visit every index of `segment` on the ambient rayon pool, handing each
/// worker split its own clone of `state`. No ordering is guaranteed.
pub fn for_range_with<T, F>(segment: Segment, min_chunk: usize, state: T, f: F)
where
    T: Send + Clone,
    F: Fn(&mut T, Index) + Send + Sync,
{
    let begin = segment.begin;
    let len = usize::try_from(segment.len()).unwrap_or(usize::MAX);
    (0..len)
        .into_par_iter()
        .with_min_len(min_chunk.max(1))
        .for_each_with(state, |state, offset| f(state, begin + offset as Index));
}
