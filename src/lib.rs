//! Performance-portable parallel loops.
//!
//! A loop body is written once and dispatched to a sequential loop, the host
//! thread pool or an emulated device stream depending on the execution
//! policy. [`KernelRegistry`] adds adaptive dispatch on top: each call site
//! gets a [`Region`](adaptive::Region) that picks one of several candidate
//! policies per invocation and learns which one is fastest for a given
//! problem size.
//!
//! ```no_run
//! use kernport::{IterationSpace, KernelConfig, KernelRegistry, call_site};
//! use kernport::policy::{DeviceAsyncExec, SeqExec, ThreadedExec, policies};
//!
//! let registry = KernelRegistry::new(KernelConfig::default())?;
//! let space = IterationSpace::from_extents(&[1024, 64])?;
//! registry.invoke(
//!     call_site!(),
//!     &policies![SeqExec, ThreadedExec<16>, DeviceAsyncExec<256>],
//!     &space,
//!     |idx: &[i64]| {
//!         let _ = (idx[0], idx[1]);
//!     },
//! )?;
//! registry.synchronize();
//! registry.drain()?;
//! # Ok::<(), kernport::KernelError>(())
//! ```

pub mod adaptive;
pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod plugin;
pub mod registry;
pub mod segment;
pub mod statement;
pub mod utils;

pub use kernport_policy as policy;

pub use adaptive::{CallSite, Dispatch, FeatureVector, RegionStats};
pub use config::KernelConfig;
pub use dispatch::{Executor, Launch, LoopBody};
pub use error::{KernelError, KernelResult};
pub use registry::KernelRegistry;
pub use segment::{Index, IterationSpace, Segment};
pub use statement::StatementNode;
