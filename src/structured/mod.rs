//! Structured solver protocol
//!
//! A [`StructuredSolver`] turns a generated program into an algorithm state
//! ([`StructuredModel`]) without mutating it, runs that state to a terminal
//! status and finally commits the solution back into the program.

pub mod cuts;
pub mod extensive;
pub mod lshaped;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::program::StochasticProgram;
use crate::scenario::ScenarioData;
use crate::solver::{LpSolver, SolveStatus};

pub use cuts::{Cut, CutKind};
pub use extensive::{dep, ExtensiveFormSolver, ExtensiveModel};
pub use lshaped::{LShapedModel, LShapedSolver, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TerminalStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
}

impl From<TerminalStatus> for SolveStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Optimal => SolveStatus::Optimal,
            TerminalStatus::Infeasible => SolveStatus::Infeasible,
            TerminalStatus::Unbounded => SolveStatus::Unbounded,
            TerminalStatus::IterationLimit => SolveStatus::IterationLimit,
        }
    }
}

/// A subproblem that did not solve to optimality during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scenario {scenario} ended with status {status}")]
pub struct RoundFailure {
    pub scenario: usize,
    pub status: SolveStatus,
}

/// Algorithm state produced by [`StructuredSolver::build`]
pub trait StructuredModel<D1, D2, S>: Send {
    fn run(&mut self) -> Result<TerminalStatus>;

    /// Objective of the last run, in the program's own sense
    fn objective(&self) -> Option<f64>;

    /// Write decisions, duals, reduced costs and per-scenario solutions
    fn commit(&self, program: &mut StochasticProgram<D1, D2, S>) -> Result<()>;
}

pub trait StructuredSolver<D1, D2, S>: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, program: &StochasticProgram<D1, D2, S>) -> Result<Box<dyn StructuredModel<D1, D2, S>>>;

    /// LP backend used for auxiliary solves, if the solver carries one
    fn internal_solver(&self) -> Option<Arc<dyn LpSolver>>;
}

/// Generate if needed, check well-formedness, build, run and, on an optimal
/// outcome, commit.
pub fn optimize<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<TerminalStatus>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    if program.deferred() {
        program.generate()?;
    }
    program.validate()?;

    let mut model = solver.build(program)?;
    let status = model.run()?;
    match status {
        TerminalStatus::Optimal => {
            model.commit(program)?;
            info!(
                program = %program.id(),
                solver = solver.name(),
                objective = model.objective().unwrap_or(f64::NAN),
                "optimization finished"
            );
        }
        other => warn!(program = %program.id(), solver = solver.name(), status = %other, "no solution committed"),
    }
    Ok(status)
}
