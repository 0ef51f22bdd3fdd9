use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Unique identifier assigned to each device launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId(u64);

impl LaunchId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_LAUNCH_ID: AtomicU64 = AtomicU64::new(1);

fn next_launch_id() -> LaunchId {
    LaunchId(NEXT_LAUNCH_ID.fetch_add(1, Ordering::Relaxed))
}

/// Work enqueued on the stream. `Err` carries the failure message.
pub type KernelFn = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

/// Final state of a launch, as observed through its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Completed { elapsed: Duration },
    Failed(String),
}

/// Start and stop markers plus completion flag, stamped by the stream worker.
#[derive(Debug)]
pub struct CompletionState {
    inner: Mutex<CompletionInner>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct CompletionInner {
    start: Option<Instant>,
    stop: Option<Instant>,
    failure: Option<String>,
}

impl CompletionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CompletionInner::default()),
            condvar: Condvar::new(),
        })
    }

    /// Called by the stream right before the kernel body runs.
    pub fn mark_started(&self) {
        let mut inner = self.inner.lock();
        if inner.start.is_none() {
            inner.start = Some(Instant::now());
        }
    }

    pub fn mark_complete(&self, result: Result<(), String>) {
        let mut inner = self.inner.lock();
        if inner.stop.is_some() {
            return;
        }
        inner.stop = Some(Instant::now());
        inner.failure = result.err();
        self.condvar.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().stop.is_some()
    }

    pub fn wait_blocking(&self) {
        let mut inner = self.inner.lock();
        while inner.stop.is_none() {
            self.condvar.wait(&mut inner);
        }
    }

    pub fn started(&self) -> Option<Instant> {
        self.inner.lock().start
    }

    /// Elapsed time runs from the stream's start marker; `enqueued` only
    /// stands in when the kernel was completed without ever being started.
    fn outcome(&self, enqueued: Instant) -> Option<LaunchOutcome> {
        let inner = self.inner.lock();
        let stop = inner.stop?;
        let start = inner.start.unwrap_or(enqueued);
        Some(match &inner.failure {
            Some(message) => LaunchOutcome::Failed(message.clone()),
            None => LaunchOutcome::Completed {
                elapsed: stop.saturating_duration_since(start),
            },
        })
    }
}

/// One kernel waiting on (or running on) the stream.
pub struct KernelTask {
    id: LaunchId,
    name: String,
    func: Option<KernelFn>,
    completion: Arc<CompletionState>,
}

impl KernelTask {
    pub fn new(name: impl Into<String>, func: KernelFn) -> Self {
        Self {
            id: next_launch_id(),
            name: name.into(),
            func: Some(func),
            completion: CompletionState::new(),
        }
    }

    pub const fn id(&self) -> LaunchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completion(&self) -> Arc<CompletionState> {
        Arc::clone(&self.completion)
    }

    /// Stamps the start marker, runs the kernel, hands the failure flag to
    /// `on_finish`, then stamps the stop marker.
    pub fn run<F>(mut self, on_finish: F)
    where
        F: FnOnce(bool),
    {
        self.completion.mark_started();
        let result = self.func.take().map_or(Ok(()), |func| func());
        on_finish(result.is_err());
        self.completion.mark_complete(result);
    }
}

/// Typed handle for one in-flight launch: enqueue time, the stream's start
/// and stop markers, and the completion predicate.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    id: LaunchId,
    enqueued: Instant,
    completion: Arc<CompletionState>,
}

impl LaunchHandle {
    pub(super) fn new(id: LaunchId, enqueued: Instant, completion: Arc<CompletionState>) -> Self {
        Self {
            id,
            enqueued,
            completion,
        }
    }

    pub const fn id(&self) -> LaunchId {
        self.id
    }

    pub const fn enqueued(&self) -> Instant {
        self.enqueued
    }

    /// When the stream began running the kernel; `None` while it is queued.
    pub fn started(&self) -> Option<Instant> {
        self.completion.started()
    }

    /// Time spent queued behind earlier launches, once the kernel has started.
    pub fn queued_for(&self) -> Option<Duration> {
        self.started()
            .map(|started| started.saturating_duration_since(self.enqueued))
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// Block the calling thread until the stream has finished this launch.
    pub fn wait(&self) {
        self.completion.wait_blocking();
    }

    /// `None` while the launch is still outstanding.
    pub fn outcome(&self) -> Option<LaunchOutcome> {
        self.completion.outcome(self.enqueued)
    }

    /// Block until the launch finishes and return how it ended.
    pub fn wait_outcome(&self) -> LaunchOutcome {
        loop {
            self.wait();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
        }
    }
}
