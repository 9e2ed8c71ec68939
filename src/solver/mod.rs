//! LP solve capability
//!
//! Structured solvers and value constructs only depend on the [`LpSolver`]
//! trait. [`MinilpSolver`] is the bundled backend.

pub mod simplex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{LinearModel, ModelSolution};

pub use simplex::MinilpSolver;

/// Status reported by a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    Error,
}

/// A backend able to solve a [`LinearModel`] without first-stage references.
///
/// Non-optimal outcomes are reported as `SpError::SolveFailure` carrying the
/// backend status; they are never retried.
#[cfg_attr(test, mockall::automock)]
pub trait LpSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, model: &LinearModel) -> Result<ModelSolution>;
}
