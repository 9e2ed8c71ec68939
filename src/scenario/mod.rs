//! Scenarios: probability-weighted uncertain parameters.

pub mod sampler;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpError};

pub use sampler::{DistributionSampler, Sampler, VectorSampler};

/// Probability of a scenario occurring, always within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Probability(f64);

impl Probability {
    pub fn new(value: f64) -> Result<Self> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SpError::InvalidProbability(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Shape of a scenario payload. All scenarios of one program share a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioSchema {
    pub type_name: String,
    pub dims: Vec<usize>,
}

impl ScenarioSchema {
    pub fn of<T: ?Sized>() -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            dims: Vec::new(),
        }
    }

    pub fn with_dims(mut self, dims: Vec<usize>) -> Self {
        self.dims = dims;
        self
    }
}

impl fmt::Display for ScenarioSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}{:?}", self.type_name, self.dims)
        }
    }
}

/// Contract for scenario payloads
///
/// `expectation` folds weighted payloads into one (Σ wᵢ ξᵢ with Σ wᵢ = 1).
/// Payloads without a meaningful weighted sum keep the default, which makes
/// expected-value constructs fail with `NotExpectable`.
pub trait ScenarioData: Clone + Send + Sync + 'static {
    fn schema(&self) -> ScenarioSchema {
        ScenarioSchema::of::<Self>()
    }

    fn expectation(_weighted: &[(f64, &Self)]) -> Result<Self> {
        Err(SpError::NotExpectable)
    }
}

impl ScenarioData for f64 {
    fn expectation(weighted: &[(f64, &Self)]) -> Result<Self> {
        Ok(weighted.iter().map(|(w, x)| w * *x).sum())
    }
}

impl ScenarioData for Vec<f64> {
    fn schema(&self) -> ScenarioSchema {
        ScenarioSchema::of::<Self>().with_dims(vec![self.len()])
    }

    fn expectation(weighted: &[(f64, &Self)]) -> Result<Self> {
        let len = weighted.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut out = vec![0.0; len];
        for (w, v) in weighted {
            if v.len() != len {
                return Err(SpError::SchemaMismatch {
                    expected: format!("{} values", len),
                    found: format!("{} values", v.len()),
                });
            }
            out.iter_mut().zip(v.iter()).for_each(|(o, x)| *o += w * x);
        }
        Ok(out)
    }
}

/// A scenario payload together with its probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario<D> {
    probability: Probability,
    data: D,
}

impl<D: ScenarioData> Scenario<D> {
    pub fn new(data: D, probability: f64) -> Result<Self> {
        Ok(Self {
            probability: Probability::new(probability)?,
            data,
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability.value()
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    pub fn schema(&self) -> ScenarioSchema {
        self.data.schema()
    }

    pub(crate) fn set_probability(&mut self, probability: Probability) {
        self.probability = probability;
    }
}

/// Expected scenario over a collection, weighted by normalized probability.
/// The result carries probability 1.
pub fn expected<'a, D, I>(scenarios: I) -> Result<Scenario<D>>
where
    D: ScenarioData,
    I: IntoIterator<Item = &'a Scenario<D>>,
{
    let scenarios: Vec<&Scenario<D>> = scenarios.into_iter().collect();
    let total: f64 = scenarios.iter().map(|s| s.probability()).sum();
    if scenarios.is_empty() || total <= 0.0 {
        return Err(SpError::NotExpectable);
    }
    let weighted: Vec<(f64, &D)> = scenarios
        .iter()
        .map(|s| (s.probability() / total, s.data()))
        .collect();
    Ok(Scenario {
        probability: Probability(1.0),
        data: D::expectation(&weighted)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Labels(String);

    impl ScenarioData for Labels {}

    #[test]
    fn test_probability_bounds() {
        assert!(Probability::new(0.4).is_ok());
        assert!(matches!(Probability::new(1.2), Err(SpError::InvalidProbability(_))));
        assert!(Probability::new(f64::NAN).is_err());
    }

    #[test]
    fn test_expected_vector_scenario() {
        let s1 = Scenario::new(vec![-24.0, -28.0, 500.0, 100.0], 0.4).unwrap();
        let s2 = Scenario::new(vec![-28.0, -32.0, 300.0, 300.0], 0.6).unwrap();
        let mean = expected([&s1, &s2]).unwrap();

        assert_eq!(mean.probability(), 1.0);
        let expected_values = [-26.4, -30.4, 380.0, 220.0];
        for (got, want) in mean.data().iter().zip(expected_values) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_expected_requires_weighted_sum() {
        let s = Scenario::new(Labels("a".into()), 1.0).unwrap();
        assert!(matches!(expected([&s]), Err(SpError::NotExpectable)));
    }

    #[test]
    fn test_vector_schema_records_length() {
        let s = Scenario::new(vec![1.0, 2.0], 1.0).unwrap();
        assert_eq!(s.schema().dims, vec![2]);
        assert_ne!(s.schema(), Scenario::new(vec![1.0], 1.0).unwrap().schema());
    }
}
