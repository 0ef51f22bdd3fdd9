use std::time::Duration;

use kernport_policy::ExecutionPolicy;

use super::feature::FeatureVector;
use crate::backend::device::LaunchOutcome;

/// What was decided for one invocation, kept until its feedback is reported.
#[derive(Debug, Clone)]
pub struct RegionContext {
    pub invocation: u64,
    pub features: FeatureVector,
    pub policy_index: usize,
    pub policy: ExecutionPolicy,
}

/// An async launch whose completion was observed by a poll.
#[derive(Debug)]
pub struct CompletedLaunch {
    pub slot: usize,
    pub context: RegionContext,
    pub outcome: LaunchOutcome,
}

impl CompletedLaunch {
    pub fn elapsed(&self) -> Option<Duration> {
        match self.outcome {
            LaunchOutcome::Completed { elapsed } => Some(elapsed),
            LaunchOutcome::Failed(_) => None,
        }
    }
}
