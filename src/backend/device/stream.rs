use crossbeam_deque::{Injector, Steal, Worker};
use crossbeam_utils::Backoff;
use kernport_policy::Backend;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use super::metrics::StreamMetrics;
use super::task::{CompletionState, KernelFn, KernelTask, LaunchHandle};
use crate::error::{KernelError, KernelResult};

#[derive(Debug)]
struct StreamCore {
    injector: Injector<KernelTask>,
    metrics: Arc<StreamMetrics>,
    shutdown: AtomicBool,
    last: Mutex<Option<Arc<CompletionState>>>,
}

/// In-order launch queue served by a single worker thread.
///
/// Launches complete in the order they were enqueued, so waiting on the
/// most recent launch waits on everything before it.
#[derive(Debug, Clone)]
pub struct Stream {
    core: Arc<StreamCore>,
}

impl Stream {
    pub fn new(name: &str) -> KernelResult<Self> {
        let core = Arc::new(StreamCore {
            injector: Injector::new(),
            metrics: StreamMetrics::new(),
            shutdown: AtomicBool::new(false),
            last: Mutex::new(None),
        });

        let worker_core = Arc::clone(&core);
        thread::Builder::new()
            .name(format!("{name}-stream"))
            .spawn(move || worker_loop(&worker_core))
            .map_err(|err| KernelError::backend(Backend::Device, err.to_string()))?;

        Ok(Self { core })
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Enqueue `func`. The worker stamps the start marker when the kernel
    /// begins running, so time spent behind earlier launches is not counted.
    pub fn launch(&self, name: impl Into<String>, func: KernelFn) -> KernelResult<LaunchHandle> {
        let mut last = self.core.last.lock();
        if self.core.shutdown.load(Ordering::SeqCst) {
            return Err(KernelError::StreamClosed);
        }

        let task = KernelTask::new(name, func);
        let completion = task.completion();
        let id = task.id();
        trace!(launch = id.raw(), kernel = task.name(), "enqueue");

        self.core.metrics.record_launch();
        let enqueued = Instant::now();
        self.core.injector.push(task);
        *last = Some(Arc::clone(&completion));

        Ok(LaunchHandle::new(id, enqueued, completion))
    }

    /// Block until every launch enqueued so far has completed.
    pub fn synchronize(&self) {
        let last = self.core.last.lock().clone();
        if let Some(completion) = last {
            completion.wait_blocking();
        }
    }

    /// Stop accepting launches. Already queued work still runs.
    pub fn shutdown(&self) {
        let _last = self.core.last.lock();
        self.core.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }
}

fn worker_loop(core: &StreamCore) {
    let local = Worker::new_fifo();
    let backoff = Backoff::new();

    loop {
        if let Some(task) = local.pop() {
            backoff.reset();
            run_task(core, task);
            continue;
        }

        match core.injector.steal_batch_and_pop(&local) {
            Steal::Success(task) => {
                backoff.reset();
                run_task(core, task);
                continue;
            }
            Steal::Retry => {
                backoff.spin();
                continue;
            }
            Steal::Empty => {}
        }

        // Launches are rejected once the flag is set, so an empty queue
        // after observing it stays empty.
        if core.shutdown.load(Ordering::SeqCst) {
            if core.injector.is_empty() {
                break;
            }
            continue;
        }

        // Nothing queued; yield slightly.
        if backoff.is_completed() {
            thread::sleep(Duration::from_micros(100));
        } else {
            backoff.snooze();
        }
    }
}

fn run_task(core: &StreamCore, task: KernelTask) {
    let id = task.id();
    task.run(|failed| {
        core.metrics.record_completion(failed);
        trace!(launch = id.raw(), failed, "complete");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::LaunchOutcome;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn launches_run_in_fifo_order() {
        let stream = Stream::new("test").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let order = Arc::clone(&order);
                stream
                    .launch(
                        format!("k{i}"),
                        Box::new(move || {
                            order.lock().push(i);
                            Ok(())
                        }),
                    )
                    .unwrap()
            })
            .collect();

        stream.synchronize();
        assert!(handles.iter().all(LaunchHandle::is_complete));
        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
        assert_eq!(stream.metrics().snapshot().completed, 16);
    }

    #[test]
    fn queued_launch_times_only_its_own_run() {
        let stream = Stream::new("test").unwrap();
        let slow = stream
            .launch(
                "slow",
                Box::new(|| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                }),
            )
            .unwrap();
        let quick = stream.launch("quick", Box::new(|| Ok(()))).unwrap();

        let LaunchOutcome::Completed { elapsed } = quick.wait_outcome() else {
            panic!("quick kernel failed");
        };
        assert!(elapsed < Duration::from_millis(50), "elapsed {elapsed:?}");
        assert!(quick.queued_for().unwrap() >= Duration::from_millis(100));
        assert!(matches!(
            slow.outcome(),
            Some(LaunchOutcome::Completed { elapsed }) if elapsed >= Duration::from_millis(200)
        ));
    }

    #[test]
    fn failed_launch_is_counted() {
        let stream = Stream::new("test").unwrap();
        let handle = stream
            .launch("bad", Box::new(|| Err("device fault".into())))
            .unwrap();
        handle.wait();
        assert_eq!(
            handle.outcome(),
            Some(LaunchOutcome::Failed("device fault".into()))
        );
        assert_eq!(stream.metrics().snapshot().failed, 1);
    }

    #[test]
    fn shutdown_rejects_new_work_but_drains_queue() {
        let stream = Stream::new("test").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = stream
            .launch(
                "last",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        stream.shutdown();
        handle.wait();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(matches!(
            stream.launch("late", Box::new(|| Ok(()))),
            Err(KernelError::StreamClosed)
        ));
    }
}
