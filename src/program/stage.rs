use serde::{Deserialize, Serialize};

/// Decision stage of a two-stage program
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum Stage {
    #[strum(serialize = "stage 1")]
    One,
    #[strum(serialize = "stage 2")]
    Two,
}

/// Generation state of a stage's artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StageState {
    /// No recipe registered
    Undefined,
    /// Recipe registered, artifacts missing
    Deferred,
    Generated,
    /// Artifacts exist but were built from replaced data or recipes
    Stale,
}

/// Replacement value for one stage's data
#[derive(Debug, Clone, PartialEq)]
pub enum StagedData<D1, D2> {
    First(D1),
    Second(D2),
}

impl<D1, D2> StagedData<D1, D2> {
    pub fn stage(&self) -> Stage {
        match self {
            StagedData::First(_) => Stage::One,
            StagedData::Second(_) => Stage::Two,
        }
    }
}
