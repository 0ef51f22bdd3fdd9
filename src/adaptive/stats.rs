use std::time::Duration;

use kernport_policy::ExecutionPolicy;
use serde::Serialize;

use super::call_site::CallSite;
use super::variant::VariantInfo;

/// Completed-sample count and running mean time for one candidate policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStats {
    pub policy: ExecutionPolicy,
    pub samples: u64,
    pub mean_ns: f64,
    /// Launches that failed; they contribute no sample.
    pub failures: u64,
}

impl PolicyStats {
    pub const fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy,
            samples: 0,
            mean_ns: 0.0,
            failures: 0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        let x = elapsed.as_nanos() as f64;
        self.mean_ns += (x - self.mean_ns) / self.samples as f64;
    }

    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean_ns.max(0.0).round() as u64)
    }
}

/// Diagnostic snapshot of a region, indexed by candidate position.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub call_site: CallSite,
    pub invocations: u64,
    pub in_flight: usize,
    pub policies: Vec<PolicyStats>,
    /// Variants instantiated so far.
    pub variants: Vec<VariantInfo>,
}

impl RegionStats {
    pub fn new(call_site: CallSite, policies: &[ExecutionPolicy]) -> Self {
        Self {
            call_site,
            invocations: 0,
            in_flight: 0,
            policies: policies.iter().copied().map(PolicyStats::new).collect(),
            variants: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&PolicyStats> {
        self.policies.get(index)
    }

    pub fn total_samples(&self) -> u64 {
        self.policies.iter().map(|stats| stats.samples).sum()
    }

    /// Index of the policy with the lowest mean among those with samples.
    pub fn fastest(&self) -> Option<usize> {
        self.policies
            .iter()
            .enumerate()
            .filter(|(_, stats)| stats.samples > 0)
            .min_by(|(_, a), (_, b)| a.mean_ns.total_cmp(&b.mean_ns))
            .map(|(index, _)| index)
    }
}
