use kernport_policy::{Backend, ExecutionPolicy};
use thiserror::Error;

use crate::adaptive::CallSite;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("async completion pool for `{call_site}` exhausted ({capacity} slots in flight)")]
    PoolExhausted { call_site: CallSite, capacity: usize },

    #[error("{backend} backend failed: {message}")]
    BackendFailure { backend: Backend, message: String },

    #[error("segment {index} has begin {begin} past end {end}")]
    InvalidSegment { index: usize, begin: i64, end: i64 },

    #[error("iteration space has no dimensions")]
    EmptyIterationSpace,

    #[error("kernel at `{0}` was invoked without candidate policies")]
    EmptyPolicyList(CallSite),

    #[error(
        "kernel at `{call_site}` was registered with {expected:?} but invoked with {found:?}"
    )]
    PolicyListMismatch {
        call_site: CallSite,
        expected: Vec<ExecutionPolicy>,
        found: Vec<ExecutionPolicy>,
    },

    #[error("invalid statement tree: {0}")]
    InvalidStatementTree(String),

    #[error("async slot {0} is not in flight")]
    SlotNotInFlight(usize),

    #[error("async slot {0} still has an outstanding launch")]
    SlotBusy(usize),

    #[error("device stream is shut down")]
    StreamClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KernelError {
    pub fn backend(backend: Backend, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            backend,
            message: message.into(),
        }
    }

    pub const fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

/// Render a caught panic payload as a failure message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "loop body panicked".to_string()
    }
}
