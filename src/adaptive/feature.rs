use serde::Serialize;

use crate::segment::IterationSpace;

/// Problem-size summary handed to the policy model: one element count per
/// dimension, in declared dimension order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn extract(space: &IterationSpace) -> Self {
        Self(
            space
                .segments()
                .iter()
                .map(|segment| segment.len() as f64)
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_feature_per_dimension_in_order() {
        let space = IterationSpace::from_bounds([(0, 1000), (10, 14), (-3, 3)]).unwrap();
        let features = FeatureVector::extract(&space);
        assert_eq!(features.as_slice(), &[1000.0, 4.0, 6.0]);
    }

    #[test]
    fn extraction_is_bit_identical_across_calls() {
        let space = IterationSpace::from_extents(&[123_457, 89]).unwrap();
        let first = FeatureVector::extract(&space);
        for _ in 0..10 {
            let again = FeatureVector::extract(&space);
            let bits = |f: &FeatureVector| f.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&first), bits(&again));
        }
    }
}
