//! Policy models: the decision procedure a region consults to pick a
//! candidate index from a feature vector.

mod fixed;
mod mean_time;

pub use fixed::FixedModel;
pub use mean_time::MeanTimeModel;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptive::{CallSite, FeatureVector};

/// Decision procedure consulted once per invocation.
///
/// `select` must return an index in `[0, pending.len())`; a region treats
/// anything else as a broken model and panics.
pub trait PolicyModel: Send {
    fn name(&self) -> &'static str;

    /// `pending[i]` counts candidate `i`'s async launches still in flight;
    /// their timings have not been observed yet.
    fn select(&mut self, features: &FeatureVector, pending: &[usize]) -> usize;

    /// Feed back the elapsed time of a completed launch.
    fn observe(&mut self, features: &FeatureVector, policy: usize, elapsed: Duration);

    /// Observations received so far.
    fn samples(&self) -> u64;
}

/// Builds a fresh model for a region given its call site and candidate count.
pub type ModelFactory = Arc<dyn Fn(CallSite, usize) -> Box<dyn PolicyModel> + Send + Sync>;

/// Built-in models selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    #[default]
    MeanTime,
    Fixed(usize),
}

impl ModelKind {
    pub fn build(self) -> Box<dyn PolicyModel> {
        match self {
            Self::MeanTime => Box::new(MeanTimeModel::new()),
            Self::Fixed(index) => Box::new(FixedModel::new(index)),
        }
    }

    pub fn factory(self) -> ModelFactory {
        Arc::new(move |_, _| self.build())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MeanTime => f.write_str("mean-time"),
            Self::Fixed(index) => write!(f, "fixed:{index}"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("mean-time") {
            return Ok(Self::MeanTime);
        }
        match s.split_once(':') {
            Some(("fixed", index)) => index
                .parse()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid fixed model index `{index}`")),
            _ => Err(format!("unknown model `{s}` (expected mean-time or fixed:<n>)")),
        }
    }
}

impl TryFrom<String> for ModelKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_kind_round_trips_through_text() {
        assert_eq!("mean-time".parse::<ModelKind>(), Ok(ModelKind::MeanTime));
        assert_eq!("fixed:2".parse::<ModelKind>(), Ok(ModelKind::Fixed(2)));
        assert_eq!(ModelKind::Fixed(3).to_string(), "fixed:3");
        assert!("fixed:x".parse::<ModelKind>().is_err());
        assert!("oracle".parse::<ModelKind>().is_err());
    }

    #[test]
    fn factory_builds_named_models() {
        let factory = ModelKind::Fixed(1).factory();
        let model = factory(CallSite::named("m"), 3);
        assert_eq!(model.name(), "fixed");
        assert_eq!(ModelKind::MeanTime.build().name(), "mean-time");
    }
}
