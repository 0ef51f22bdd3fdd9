//! Adaptive multi-policy dispatch: per-call-site regions that pick a
//! candidate policy from problem-size features and learn from the timings.

mod call_site;
mod context;
mod feature;
mod pool;
mod region;
mod stats;
mod variant;

pub use call_site::CallSite;
pub use context::{CompletedLaunch, RegionContext};
pub use feature::FeatureVector;
pub use pool::{AsyncCompletionPool, SlotId};
pub use region::{Dispatch, Region};
pub use stats::{PolicyStats, RegionStats};
pub use variant::{CompiledVariant, VariantInfo, VariantMetadata};
