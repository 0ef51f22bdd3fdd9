use std::time::Duration;

use super::PolicyModel;
use crate::adaptive::FeatureVector;

/// Always picks the same candidate.
#[derive(Debug, Clone, Copy)]
pub struct FixedModel {
    index: usize,
    samples: u64,
}

impl FixedModel {
    pub const fn new(index: usize) -> Self {
        Self { index, samples: 0 }
    }
}

impl PolicyModel for FixedModel {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn select(&mut self, _features: &FeatureVector, _pending: &[usize]) -> usize {
        self.index
    }

    fn observe(&mut self, _features: &FeatureVector, _policy: usize, _elapsed: Duration) {
        self.samples += 1;
    }

    fn samples(&self) -> u64 {
        self.samples
    }
}
