//! Execution policy tags.
//!
//! A policy names *how* a loop runs: on which backend, on which side of the
//! host/device boundary, and whether the launch returns before the work is
//! done. Tags are zero-sized marker types implementing [`PolicyTag`]; the
//! runtime works on the [`ExecutionPolicy`] value each tag produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend family a policy dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Sequential,
    Threaded,
    Device,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Threaded => write!(f, "threaded"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Where the loop body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Place {
    Host,
    Device,
}

/// Whether a launch blocks until the loop has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Sync,
    Async,
}

/// Runtime descriptor of an execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum ExecutionPolicy {
    /// Strictly ordered loop on the calling thread.
    Sequential,
    /// Host thread pool; `min_chunk` is the smallest run of indices handed
    /// to one worker.
    Threaded { min_chunk: usize },
    /// Device stream launch split into blocks of `block_size` lanes.
    Device { block_size: usize, mode: Mode },
}

impl ExecutionPolicy {
    pub const fn backend(&self) -> Backend {
        match self {
            Self::Sequential => Backend::Sequential,
            Self::Threaded { .. } => Backend::Threaded,
            Self::Device { .. } => Backend::Device,
        }
    }

    pub const fn place(&self) -> Place {
        match self {
            Self::Sequential | Self::Threaded { .. } => Place::Host,
            Self::Device { .. } => Place::Device,
        }
    }

    pub const fn is_async(&self) -> bool {
        matches!(
            self,
            Self::Device {
                mode: Mode::Async,
                ..
            }
        )
    }

    /// Device block size, if the policy has one.
    pub const fn block_size(&self) -> Option<usize> {
        match self {
            Self::Device { block_size, .. } => Some(*block_size),
            _ => None,
        }
    }

    /// Same policy with a synchronous launch mode.
    #[must_use]
    pub const fn synchronous(self) -> Self {
        match self {
            Self::Device { block_size, .. } => Self::Device {
                block_size,
                mode: Mode::Sync,
            },
            other => other,
        }
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "seq"),
            Self::Threaded { min_chunk } => write!(f, "threaded:{min_chunk}"),
            Self::Device {
                block_size,
                mode: Mode::Sync,
            } => write!(f, "device:{block_size}"),
            Self::Device {
                block_size,
                mode: Mode::Async,
            } => write!(f, "device-async:{block_size}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePolicyError {
    #[error("unknown execution policy `{0}`")]
    Unknown(String),
    #[error("invalid parameter `{value}` for policy `{policy}`")]
    InvalidParameter { policy: String, value: String },
}

pub const DEFAULT_MIN_CHUNK: usize = 1;
pub const DEFAULT_BLOCK_SIZE: usize = 256;

impl FromStr for ExecutionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (name, param) = match trimmed.split_once(':') {
            Some((name, param)) => (name, Some(param)),
            None => (trimmed, None),
        };

        let parse_param = |default: usize| -> Result<usize, ParsePolicyError> {
            match param {
                None => Ok(default),
                Some(raw) => match raw.parse::<usize>() {
                    Ok(value) if value > 0 => Ok(value),
                    _ => Err(ParsePolicyError::InvalidParameter {
                        policy: name.to_string(),
                        value: raw.to_string(),
                    }),
                },
            }
        };

        match name {
            "seq" | "sequential" | "loop" if param.is_none() => Ok(Self::Sequential),
            "threaded" | "omp" => Ok(Self::Threaded {
                min_chunk: parse_param(DEFAULT_MIN_CHUNK)?,
            }),
            "device" => Ok(Self::Device {
                block_size: parse_param(DEFAULT_BLOCK_SIZE)?,
                mode: Mode::Sync,
            }),
            "device-async" => Ok(Self::Device {
                block_size: parse_param(DEFAULT_BLOCK_SIZE)?,
                mode: Mode::Async,
            }),
            _ => Err(ParsePolicyError::Unknown(trimmed.to_string())),
        }
    }
}

/// Compile-time policy marker.
///
/// Only types implementing this trait can appear in a candidate list, so a
/// policy without a dispatch path is rejected by the type checker.
pub trait PolicyTag {
    const BACKEND: Backend;
    const ASYNC: bool;

    fn policy() -> ExecutionPolicy;
}

/// Sequential loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqExec;

/// Plain loop; dispatches exactly like [`SeqExec`].
pub type LoopExec = SeqExec;

/// Host thread pool loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadedExec<const MIN_CHUNK: usize = DEFAULT_MIN_CHUNK>;

/// Synchronous device launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceExec<const BLOCK: usize = DEFAULT_BLOCK_SIZE>;

/// Asynchronous device launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceAsyncExec<const BLOCK: usize = DEFAULT_BLOCK_SIZE>;

impl PolicyTag for SeqExec {
    const BACKEND: Backend = Backend::Sequential;
    const ASYNC: bool = false;

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy::Sequential
    }
}

impl<const MIN_CHUNK: usize> PolicyTag for ThreadedExec<MIN_CHUNK> {
    const BACKEND: Backend = Backend::Threaded;
    const ASYNC: bool = false;

    fn policy() -> ExecutionPolicy {
        const { assert!(MIN_CHUNK > 0, "threaded chunk must be non-zero") };
        ExecutionPolicy::Threaded {
            min_chunk: MIN_CHUNK,
        }
    }
}

impl<const BLOCK: usize> PolicyTag for DeviceExec<BLOCK> {
    const BACKEND: Backend = Backend::Device;
    const ASYNC: bool = false;

    fn policy() -> ExecutionPolicy {
        const { assert!(BLOCK > 0, "device block size must be non-zero") };
        ExecutionPolicy::Device {
            block_size: BLOCK,
            mode: Mode::Sync,
        }
    }
}

impl<const BLOCK: usize> PolicyTag for DeviceAsyncExec<BLOCK> {
    const BACKEND: Backend = Backend::Device;
    const ASYNC: bool = true;

    fn policy() -> ExecutionPolicy {
        const { assert!(BLOCK > 0, "device block size must be non-zero") };
        ExecutionPolicy::Device {
            block_size: BLOCK,
            mode: Mode::Async,
        }
    }
}

/// Build an ordered candidate list from policy tags.
///
/// ```
/// use kernport_policy::{policies, DeviceAsyncExec, ExecutionPolicy, SeqExec};
///
/// let list = policies![SeqExec, DeviceAsyncExec<128>];
/// assert_eq!(list[0], ExecutionPolicy::Sequential);
/// assert!(list[1].is_async());
/// ```
#[macro_export]
macro_rules! policies {
    ($($tag:ty),+ $(,)?) => {
        vec![$(<$tag as $crate::PolicyTag>::policy()),+]
    };
}
