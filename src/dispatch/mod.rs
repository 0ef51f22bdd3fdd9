//! Dispatch executor: runs a statement tree under a concrete policy.
//!
//! Dispatch is keyed on the `(node, policy)` pair. Host policies walk the tree
//! on the calling thread (threaded loops fan out on the host pool); a kernel
//! boundary under a device policy becomes one launch on the device stream.

mod walk;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kernport_policy::{Backend, ExecutionPolicy, Mode};

use crate::backend::Backends;
use crate::backend::device::{KernelFn, LaunchHandle, LaunchOutcome};
use crate::error::{KernelError, KernelResult, panic_message};
use crate::segment::{Index, IterationSpace};
use crate::statement::StatementNode;

use walk::{Frame, Walker};

/// Loop body shared between the caller and whichever backend runs it.
pub type LoopBody = Arc<dyn Fn(&[Index]) + Send + Sync>;

/// Result of issuing a statement tree.
#[derive(Debug)]
pub enum Launch {
    /// The loop has run to completion.
    Complete { elapsed: Duration },
    /// The loop is queued on the device stream.
    Pending(LaunchHandle),
}

impl Launch {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

pub struct Executor<'a> {
    backends: &'a Backends,
    label: &'a str,
}

impl<'a> Executor<'a> {
    /// `label` names device launches in traces.
    pub const fn new(backends: &'a Backends, label: &'a str) -> Self {
        Self { backends, label }
    }

    /// Run `node` over `space` under `policy`.
    ///
    /// Synchronous policies return once every index has been visited;
    /// asynchronous ones return as soon as the kernel is enqueued.
    pub fn execute(
        &self,
        node: &StatementNode,
        policy: &ExecutionPolicy,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Launch> {
        match (node, policy) {
            (StatementNode::KernelBoundary { body: stmts, .. }, ExecutionPolicy::Device { mode, .. }) => {
                self.launch_kernel(stmts, *mode, space, body)
            }
            (_, ExecutionPolicy::Device { .. }) => Err(KernelError::InvalidStatementTree(
                "device policy needs a kernel boundary at the root".to_string(),
            )),
            (_, ExecutionPolicy::Sequential) => self.run_host(node, policy, space, body),
            (_, ExecutionPolicy::Threaded { .. }) => self
                .backends
                .host()
                .install(|| self.run_host(node, policy, space, body)),
        }
    }

    fn run_host(
        &self,
        node: &StatementNode,
        policy: &ExecutionPolicy,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Launch> {
        let start = Instant::now();
        let walker = Walker::host(body.as_ref());
        let mut frame = Frame::new(space);
        panic::catch_unwind(AssertUnwindSafe(|| walker.run(node, &mut frame)))
            .map_err(|payload| KernelError::backend(policy.backend(), panic_message(payload.as_ref())))?;
        Ok(Launch::Complete {
            elapsed: start.elapsed(),
        })
    }

    fn launch_kernel(
        &self,
        stmts: &[StatementNode],
        mode: Mode,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Launch> {
        let device = self.backends.device();
        let stmts = stmts.to_vec();
        let mut frame = Frame::new(space);
        let body = Arc::clone(body);
        let compute = device.compute();

        let func: KernelFn = Box::new(move || {
            panic::catch_unwind(AssertUnwindSafe(|| {
                let walker = Walker::device(body.as_ref(), &compute);
                walker.run_all(&stmts, &mut frame);
            }))
            .map_err(|payload| panic_message(payload.as_ref()))
        });

        let handle = device.launch(self.label, func)?;
        match mode {
            Mode::Async => Ok(Launch::Pending(handle)),
            Mode::Sync => match handle.wait_outcome() {
                LaunchOutcome::Completed { elapsed } => Ok(Launch::Complete { elapsed }),
                LaunchOutcome::Failed(message) => {
                    Err(KernelError::backend(Backend::Device, message))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::KernelConfig;
    use crate::statement;

    fn backends() -> Backends {
        let config = KernelConfig {
            host_threads: Some(4),
            device_compute_units: Some(2),
            ..KernelConfig::default()
        };
        Backends::new(&config).unwrap()
    }

    fn run(
        backends: &Backends,
        space: &IterationSpace,
        policy: ExecutionPolicy,
        body: LoopBody,
    ) -> KernelResult<Launch> {
        let root = statement::build(space, &policy)?;
        Executor::new(backends, "test").execute(&root, &policy, space, &body)
    }

    #[test]
    fn sequential_visits_in_row_major_order() {
        let backends = backends();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let space = IterationSpace::from_bounds([(0, 2), (5, 8)]).unwrap();

        let launch = run(
            &backends,
            &space,
            ExecutionPolicy::Sequential,
            Arc::new(move |idx: &[Index]| sink.lock().push((idx[0], idx[1]))),
        )
        .unwrap();

        assert!(!launch.is_pending());
        assert_eq!(
            *seen.lock(),
            vec![(0, 5), (0, 6), (0, 7), (1, 5), (1, 6), (1, 7)]
        );
    }

    #[test]
    fn threaded_covers_every_tuple() {
        let backends = backends();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let space = IterationSpace::from_extents(&[100, 7]).unwrap();

        run(
            &backends,
            &space,
            ExecutionPolicy::Threaded { min_chunk: 8 },
            Arc::new(move |_: &[Index]| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 700);
    }

    #[test]
    fn async_device_returns_pending_handle() {
        let backends = backends();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let space = IterationSpace::from_bounds([(3, 1003)]).unwrap();
        let policy = ExecutionPolicy::Device {
            block_size: 64,
            mode: Mode::Async,
        };

        let launch = run(
            &backends,
            &space,
            policy,
            Arc::new(move |idx: &[Index]| sink.lock().push(idx[0])),
        )
        .unwrap();

        let Launch::Pending(handle) = launch else {
            panic!("async launch should be pending");
        };
        assert!(matches!(
            handle.wait_outcome(),
            LaunchOutcome::Completed { .. }
        ));
        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (3..1003).collect::<Vec<_>>());
    }

    #[test]
    fn sync_device_blocks_until_done() {
        let backends = backends();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let space = IterationSpace::from_extents(&[10, 10]).unwrap();
        let policy = ExecutionPolicy::Device {
            block_size: 3,
            mode: Mode::Sync,
        };

        let launch = run(
            &backends,
            &space,
            policy,
            Arc::new(move |_: &[Index]| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();

        assert!(matches!(launch, Launch::Complete { .. }));
        assert_eq!(count.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn body_panic_becomes_backend_failure() {
        let backends = backends();
        let space = IterationSpace::from_extents(&[4]).unwrap();
        for policy in [
            ExecutionPolicy::Sequential,
            ExecutionPolicy::Threaded { min_chunk: 1 },
            ExecutionPolicy::Device {
                block_size: 2,
                mode: Mode::Sync,
            },
        ] {
            let err = run(
                &backends,
                &space,
                policy,
                Arc::new(|idx: &[Index]| assert!(idx[0] != 2, "bad index")),
            )
            .unwrap_err();
            match err {
                KernelError::BackendFailure { backend, message } => {
                    assert_eq!(backend, policy.backend());
                    assert!(message.contains("bad index"), "{message}");
                }
                other => panic!("expected backend failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn device_policy_without_kernel_boundary_is_rejected() {
        let backends = backends();
        let space = IterationSpace::from_extents(&[4]).unwrap();
        let policy = ExecutionPolicy::Device {
            block_size: 2,
            mode: Mode::Async,
        };
        let err = Executor::new(&backends, "test")
            .execute(&StatementNode::Lambda, &policy, &space, &(Arc::new(|_: &[Index]| {}) as LoopBody))
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidStatementTree(_)));
    }
}
