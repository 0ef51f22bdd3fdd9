use std::time::Duration;

use ahash::AHashMap;

use super::PolicyModel;
use crate::adaptive::FeatureVector;

#[derive(Debug, Clone, Copy, Default)]
struct Running {
    count: u64,
    mean_ns: f64,
}

impl Running {
    fn push(&mut self, elapsed: Duration) {
        self.count += 1;
        self.mean_ns += (elapsed.as_nanos() as f64 - self.mean_ns) / self.count as f64;
    }
}

/// Picks the candidate with the lowest mean time seen for problems of a
/// similar size.
///
/// Features are bucketed by the base-2 magnitude of each dimension's count.
/// Within a bucket every candidate is tried once, in index order, before the
/// fastest is exploited; ties go to the lower index. A candidate whose first
/// launch is still pending is not explored again until its timing arrives.
#[derive(Debug, Default)]
pub struct MeanTimeModel {
    buckets: AHashMap<Vec<u32>, Vec<Running>>,
    samples: u64,
}

impl MeanTimeModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(features: &FeatureVector) -> Vec<u32> {
        features
            .as_slice()
            .iter()
            .map(|&count| {
                if count < 1.0 {
                    0
                } else {
                    count.log2().floor() as u32 + 1
                }
            })
            .collect()
    }
}

impl PolicyModel for MeanTimeModel {
    fn name(&self) -> &'static str {
        "mean-time"
    }

    fn select(&mut self, features: &FeatureVector, pending: &[usize]) -> usize {
        let entries = self
            .buckets
            .get(&Self::bucket(features))
            .map_or(&[][..], Vec::as_slice);
        let seen = |index: usize| entries.get(index).is_some_and(|entry| entry.count > 0);
        if let Some(index) = (0..pending.len()).find(|&index| !seen(index) && pending[index] == 0) {
            return index;
        }

        let mut best: Option<usize> = None;
        for index in (0..pending.len()).filter(|&index| seen(index)) {
            if best.is_none_or(|best| entries[index].mean_ns < entries[best].mean_ns) {
                best = Some(index);
            }
        }
        // nothing observed yet and every candidate is waiting on a timing
        best.or_else(|| (0..pending.len()).find(|&index| !seen(index)))
            .unwrap_or(0)
    }

    fn observe(&mut self, features: &FeatureVector, policy: usize, elapsed: Duration) {
        let entries = self.buckets.entry(Self::bucket(features)).or_default();
        if entries.len() <= policy {
            entries.resize(policy + 1, Running::default());
        }
        entries[policy].push(elapsed);
        self.samples += 1;
    }

    fn samples(&self) -> u64 {
        self.samples
    }
}
