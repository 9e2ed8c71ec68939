//! Value constructs of stochastic programming
//!
//! With σ = +1 for minimizing programs and -1 for maximizing ones, the
//! reported gaps are sign-normalized so both are non-negative:
//!
//! ```text
//! EVPI = σ·(VRP − EWS)
//! VSS  = σ·(EEV − VRP)
//! ```

pub mod evaluation;
pub mod saa;

use std::sync::Arc;
use tracing::info;

use crate::error::{Result, SpError};
use crate::program::StochasticProgram;
use crate::scenario::{expected, Probability, ScenarioData};
use crate::solver::{LpSolver, MinilpSolver};
use crate::structured::{optimize, StructuredSolver, TerminalStatus};

pub use evaluation::{
    evaluate_decision, evaluate_decision_in, evaluate_decision_sampled, outcome_model, ConfidenceInterval,
};
pub use saa::{confidence_interval, lower_bound};

pub(crate) fn ensure_generated<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>) -> Result<()>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    if program.deferred() {
        program.generate()?;
    }
    Ok(())
}

/// LP backend for auxiliary solves: the structured solver's own, or minilp
pub(crate) fn lp_backend<D1, D2, S>(solver: &dyn StructuredSolver<D1, D2, S>) -> Arc<dyn LpSolver> {
    solver
        .internal_solver()
        .unwrap_or_else(|| Arc::new(MinilpSolver::new()))
}

fn sense_sign<D1, D2, S>(program: &StochasticProgram<D1, D2, S>) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    Ok(program.stage_one_model()?.sense().sign())
}

fn solve_to_optimality<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<()>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    match optimize(program, solver)? {
        TerminalStatus::Optimal => Ok(()),
        status => Err(SpError::solve(status.into())),
    }
}

/// Value of the recourse problem
pub fn vrp<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    solve_to_optimality(program, solver)?;
    program.optimal_value()
}

fn ws_program<D1, D2, S>(program: &StochasticProgram<D1, D2, S>, index: usize) -> Result<StochasticProgram<D1, D2, S>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let (mut scenario, subproblem) = program.entry(index)?;
    scenario.set_probability(Probability::new(1.0)?);
    Ok(program.restricted(vec![(scenario, subproblem)]))
}

/// Wait-and-see program: the same stages with scenario `index` certain
pub fn ws<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, index: usize) -> Result<StochasticProgram<D1, D2, S>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    ws_program(program, index)
}

pub fn ws_value<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    index: usize,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let mut ws = ws(program, index)?;
    vrp(&mut ws, solver)
}

pub fn ws_decision<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    index: usize,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<Vec<f64>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let mut ws = ws(program, index)?;
    solve_to_optimality(&mut ws, solver)?;
    ws.optimal_decision()
}

/// Expected wait-and-see value, one wait-and-see solve per scenario,
/// partitions in parallel
pub fn ews<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, solver: &dyn StructuredSolver<D1, D2, S>) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    program.validate()?;
    let program: &StochasticProgram<D1, D2, S> = program;
    let offsets = program.offsets();
    let values = program.transport().map(program.partitions(), |partition| {
        let offset = offsets[partition.worker()];
        partition
            .scenarios()
            .iter()
            .enumerate()
            .map(|(local, scenario)| {
                let mut ws = ws_program(program, offset + local)?;
                Ok(scenario.probability() * vrp(&mut ws, solver)?)
            })
            .sum::<Result<f64>>()
    });
    let ews = values.into_iter().sum::<Result<f64>>()?;
    info!(program = %program.id(), ews, "expected wait-and-see value");
    Ok(ews)
}

/// Expected value program: one certain scenario, the probability-weighted
/// mean of all scenarios
pub fn evp<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>) -> Result<StochasticProgram<D1, D2, S>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    let mean = expected(program.scenarios())?;
    let mut evp = program.restricted(vec![(mean, None)]);
    evp.generate()?;
    Ok(evp)
}

pub fn evp_value<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let mut evp = evp(program)?;
    vrp(&mut evp, solver)
}

pub fn evp_decision<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<Vec<f64>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let mut evp = evp(program)?;
    solve_to_optimality(&mut evp, solver)?;
    evp.optimal_decision()
}

/// Expected result of using the expected value decision
pub fn eev<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, solver: &dyn StructuredSolver<D1, D2, S>) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let x = evp_decision(program, solver)?;
    evaluate_decision(program, &x, lp_backend(solver).as_ref())
}

/// Expected value of perfect information, σ·(VRP − EWS)
pub fn evpi<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, solver: &dyn StructuredSolver<D1, D2, S>) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let vrp = vrp(program, solver)?;
    let ews = ews(program, solver)?;
    let evpi = sense_sign(program)? * (vrp - ews);
    info!(program = %program.id(), vrp, ews, evpi, "expected value of perfect information");
    Ok(evpi)
}

/// Value of the stochastic solution, σ·(EEV − VRP)
pub fn vss<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, solver: &dyn StructuredSolver<D1, D2, S>) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let vrp = vrp(program, solver)?;
    let eev = eev(program, solver)?;
    let vss = sense_sign(program)? * (eev - vrp);
    info!(program = %program.id(), vrp, eev, vss, "value of the stochastic solution");
    Ok(vss)
}
