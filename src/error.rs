use thiserror::Error;

use crate::program::Stage;
use crate::solver::SolveStatus;

pub type Result<T, E = SpError> = std::result::Result<T, E>;

/// Errors raised by stochastic program containers, solvers and constructs
#[derive(Debug, Error)]
pub enum SpError {
    #[error("Scenario schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("No recipe registered for {0}")]
    UndefinedRecipe(Stage),

    #[error("Scenario payload does not support expectation")]
    NotExpectable,

    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Solve failed with status {status}{}", .scenario.map(|s| format!(" in scenario {}", s)).unwrap_or_default())]
    SolveFailure {
        status: SolveStatus,
        scenario: Option<usize>,
    },

    #[error("No committed solution available")]
    StaleStateConflict,

    #[error("Scenario probabilities sum to {total}, expected 1")]
    ProbabilityMismatch { total: f64 },

    #[error("Invalid probability: {0}")]
    InvalidProbability(f64),

    #[error("{stage} is not generated")]
    NotGenerated { stage: Stage },

    #[error("Generation failed for {} scenario(s): {reason}", .failed.len())]
    PartialGeneration { failed: Vec<usize>, reason: String },

    #[error("Failed to generate {stage}: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid worker count: {0}")]
    InvalidWorkerCount(usize),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpError {
    pub(crate) fn solve(status: SolveStatus) -> Self {
        SpError::SolveFailure {
            status,
            scenario: None,
        }
    }

    /// Attach a scenario index to a solve failure
    pub(crate) fn in_scenario(self, index: usize) -> Self {
        match self {
            SpError::SolveFailure { status, .. } => SpError::SolveFailure {
                status,
                scenario: Some(index),
            },
            other => other,
        }
    }

    /// Backend status of a solve failure, if this is one
    pub fn solve_status(&self) -> Option<SolveStatus> {
        match self {
            SpError::SolveFailure { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<figment::Error> for SpError {
    fn from(error: figment::Error) -> Self {
        SpError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for SpError {
    fn from(errors: validator::ValidationErrors) -> Self {
        SpError::Config(errors.to_string())
    }
}
