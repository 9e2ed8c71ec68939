//! Multi-cut L-shaped decomposition
//!
//! The master problem is kept in minimization form: with σ = +1 for a
//! minimizing program and -1 for a maximizing one, it reads
//!
//! ```text
//! min  σ(c·x + c0) + Σ p_s θ_s
//! s.t. first-stage rows
//!      θ_s ≥ σ(α + g·x)      one per optimality cut of scenario s
//!      α' + g'·x ≤ 0         one per feasibility cut
//! ```
//!
//! θ_s only enters once scenario s has produced an optimality cut, so the
//! master value is a valid lower bound only after every scenario has one.
//! Until then an unbounded master is not conclusive: the first cuts are
//! taken at a feasible point of the first-stage rows instead.

use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cuts::{Cut, CutKind, PartitionRound, PartitionWork, ScenarioOutcome};
use super::{RoundFailure, StructuredModel, StructuredSolver, TerminalStatus};
use crate::config::LShapedConfig;
use crate::error::{Result, SpError};
use crate::model::{ConstraintSense, LinearExpr, LinearModel, ModelSolution, ObjectiveSense, VarRef};
use crate::program::{CommittedSolution, StochasticProgram, Transport};
use crate::scenario::ScenarioData;
use crate::solver::{LpSolver, MinilpSolver, SolveStatus};

/// Step of the L-shaped iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    MasterSolve,
    Broadcast,
    SubproblemSolve,
    Aggregate,
    Converged(TerminalStatus),
}

#[derive(Clone)]
pub struct LShapedSolver {
    config: LShapedConfig,
    solver: Arc<dyn LpSolver>,
    cancel: CancellationToken,
}

impl Default for LShapedSolver {
    fn default() -> Self {
        Self::new(LShapedConfig::default())
    }
}

impl LShapedSolver {
    pub fn new(config: LShapedConfig) -> Self {
        Self {
            config,
            solver: Arc::new(MinilpSolver::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_lp_solver(mut self, solver: Arc<dyn LpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling this token ends every run of this solver with `IterationLimit`
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &LShapedConfig {
        &self.config
    }

    /// Algorithm state with `step` access
    pub fn model<D1, D2, S>(&self, program: &StochasticProgram<D1, D2, S>) -> Result<LShapedModel<D1, D2, S>>
    where
        D1: Send + Sync + 'static,
        D2: Send + Sync + 'static,
        S: ScenarioData,
    {
        let master = program.stage_one_model()?.clone();
        let work = PartitionWork::snapshot(program)?;
        let nscenarios = program.nscenarios();
        let mut probabilities = vec![0.0; nscenarios];
        for item in work.iter().flat_map(|w| &w.items) {
            probabilities[item.index] = item.probability;
        }
        Ok(LShapedModel {
            config: self.config.clone(),
            solver: Arc::clone(&self.solver),
            transport: program.transport().clone(),
            cancel: self.cancel.clone(),
            sigma: master.sense().sign(),
            master,
            probabilities,
            work,
            phase: Phase::Init,
            iteration: 0,
            cuts: Vec::new(),
            has_theta: vec![false; nscenarios],
            master_solution: None,
            candidate: None,
            round: None,
            lower_bound: f64::NEG_INFINITY,
            upper_bound: f64::INFINITY,
            incumbent: None,
            last_failure: None,
            _program: PhantomData,
        })
    }
}

impl<D1, D2, S> StructuredSolver<D1, D2, S> for LShapedSolver
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    fn name(&self) -> &'static str {
        "lshaped"
    }

    fn build(&self, program: &StochasticProgram<D1, D2, S>) -> Result<Box<dyn StructuredModel<D1, D2, S>>> {
        Ok(Box::new(self.model(program)?))
    }

    fn internal_solver(&self) -> Option<Arc<dyn LpSolver>> {
        Some(Arc::clone(&self.solver))
    }
}

/// Best decision seen so far with the round that evaluated it
#[derive(Debug, Clone)]
struct Incumbent {
    /// Normalized total value σ·(first stage + expected recourse)
    value: f64,
    decision: Vec<f64>,
    /// Master solution the decision came from, `None` for a feasible starting point
    master: Option<ModelSolution>,
    scenarios: Vec<ModelSolution>,
}

pub struct LShapedModel<D1, D2, S> {
    config: LShapedConfig,
    solver: Arc<dyn LpSolver>,
    transport: Transport,
    cancel: CancellationToken,
    sigma: f64,
    master: LinearModel,
    probabilities: Vec<f64>,
    work: Vec<PartitionWork>,
    phase: Phase,
    iteration: usize,
    cuts: Vec<Cut>,
    has_theta: Vec<bool>,
    master_solution: Option<ModelSolution>,
    candidate: Option<Arc<Vec<f64>>>,
    round: Option<Vec<PartitionRound>>,
    lower_bound: f64,
    upper_bound: f64,
    incumbent: Option<Incumbent>,
    last_failure: Option<RoundFailure>,
    _program: PhantomData<fn() -> (D1, D2, S)>,
}

impl<D1, D2, S> LShapedModel<D1, D2, S> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    /// `(lower, upper)` bounds on the normalized objective
    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_bound, self.upper_bound)
    }

    pub fn gap(&self) -> f64 {
        if self.lower_bound.is_finite() && self.upper_bound.is_finite() {
            (self.upper_bound - self.lower_bound) / (self.upper_bound.abs() + 1e-10)
        } else {
            f64::INFINITY
        }
    }

    /// Subproblem failure that ended the run, if any
    pub fn last_failure(&self) -> Option<RoundFailure> {
        self.last_failure
    }

    fn ncols(&self) -> usize {
        self.master.num_variables()
    }

    /// Master LP in minimization form with the current cuts
    fn master_lp(&self) -> Result<LinearModel> {
        let mut lp = self.master.clone();
        lp.name = format!("lshaped_master[{}]", self.iteration);
        lp.clear_solution();

        let mut objective = LinearExpr::constant(self.sigma * self.master.objective_constant());
        for (col, v) in self.master.variables().iter().enumerate() {
            objective = objective.term(VarRef(col), self.sigma * v.cost);
        }
        let mut theta = vec![None; self.has_theta.len()];
        for (s, present) in self.has_theta.iter().enumerate() {
            if *present {
                let t = lp.add_variable(format!("theta[{}]", s), f64::NEG_INFINITY, f64::INFINITY);
                objective = objective.term(t, self.probabilities[s]);
                theta[s] = Some(t);
            }
        }
        lp.set_objective(ObjectiveSense::Minimize, objective)?;

        for (k, cut) in self.cuts.iter().enumerate() {
            let slope = cut
                .gradient
                .iter()
                .enumerate()
                .fold(LinearExpr::new(), |expr, (col, g)| expr.term(VarRef(col), *g));
            match (cut.kind, theta[cut.scenario]) {
                (CutKind::Optimality, Some(t)) => {
                    lp.add_constraint(
                        format!("optimality[{}]", k),
                        LinearExpr::from(t) - self.sigma * slope,
                        ConstraintSense::Ge,
                        self.sigma * cut.intercept,
                    )?;
                }
                (CutKind::Feasibility, _) => {
                    lp.add_constraint(format!("feasibility[{}]", k), slope, ConstraintSense::Le, -cut.intercept)?;
                }
                (CutKind::Optimality, None) => {}
            }
        }
        Ok(lp)
    }

    /// Value of θ_s in the current master solution
    fn theta_value(&self, scenario: usize) -> Option<f64> {
        if !self.has_theta[scenario] {
            return None;
        }
        let position = self.has_theta[..scenario].iter().filter(|p| **p).count();
        self.master_solution
            .as_ref()
            .and_then(|m| m.primal.get(self.ncols() + position).copied())
    }

    /// Advance one phase
    pub fn step(&mut self) -> Result<Phase> {
        self.phase = match self.phase {
            Phase::Init => {
                debug!(
                    decisions = self.ncols(),
                    scenarios = self.probabilities.len(),
                    partitions = self.work.len(),
                    "L-shaped started"
                );
                Phase::MasterSolve
            }
            Phase::MasterSolve => self.solve_master()?,
            Phase::Broadcast => {
                self.iteration += 1;
                if self.cancel.is_cancelled() {
                    warn!(iteration = self.iteration, "L-shaped cancelled");
                    Phase::Converged(TerminalStatus::IterationLimit)
                } else if self.iteration > self.config.max_iterations {
                    warn!(iterations = self.config.max_iterations, gap = self.gap(), "L-shaped iteration limit reached");
                    Phase::Converged(TerminalStatus::IterationLimit)
                } else {
                    Phase::SubproblemSolve
                }
            }
            Phase::SubproblemSolve => self.solve_subproblems()?,
            Phase::Aggregate => self.aggregate()?,
            Phase::Converged(status) => Phase::Converged(status),
        };
        Ok(self.phase)
    }

    fn solve_master(&mut self) -> Result<Phase> {
        let mut lp = self.master_lp()?;
        let complete = self.has_theta.iter().all(|p| *p);
        match self.solver.solve(&lp) {
            Ok(solution) => {
                if complete {
                    self.lower_bound = self.lower_bound.max(solution.objective);
                }
                self.candidate = Some(Arc::new(solution.primal[..self.ncols()].to_vec()));
                self.master_solution = Some(solution);
                Ok(Phase::Broadcast)
            }
            Err(e) if !complete && e.solve_status() == Some(SolveStatus::Unbounded) => {
                debug!(
                    iteration = self.iteration,
                    "master unbounded before every scenario has a cut, starting from a feasible point"
                );
                lp.set_objective(ObjectiveSense::Minimize, LinearExpr::new())?;
                match self.solver.solve(&lp) {
                    Ok(point) => {
                        self.candidate = Some(Arc::new(point.primal[..self.ncols()].to_vec()));
                        self.master_solution = None;
                        Ok(Phase::Broadcast)
                    }
                    Err(e) if e.solve_status() == Some(SolveStatus::Infeasible) => {
                        Ok(Phase::Converged(TerminalStatus::Infeasible))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => match e.solve_status() {
                Some(SolveStatus::Infeasible) => Ok(Phase::Converged(TerminalStatus::Infeasible)),
                Some(SolveStatus::Unbounded) => Ok(Phase::Converged(TerminalStatus::Unbounded)),
                _ => Err(e),
            },
        }
    }

    fn solve_subproblems(&mut self) -> Result<Phase> {
        let x = self
            .candidate
            .clone()
            .ok_or_else(|| SpError::InvalidModel("no first-stage candidate to broadcast".to_string()))?;
        let solver = self.solver.as_ref();
        let check_feasibility = self.config.check_feasibility;
        let round = self
            .transport
            .map(&self.work, |work| work.solve(&x, solver, check_feasibility));
        if self.cancel.is_cancelled() {
            warn!(iteration = self.iteration, "L-shaped cancelled, round discarded");
            return Ok(Phase::Converged(TerminalStatus::IterationLimit));
        }
        self.round = Some(round);
        Ok(Phase::Aggregate)
    }

    fn aggregate(&mut self) -> Result<Phase> {
        let round = self.round.take().unwrap_or_default();
        let x = self.candidate.clone().unwrap_or_default();
        let mut expected = 0.0;
        let mut scenarios = vec![ModelSolution::default(); self.probabilities.len()];
        let mut new_cuts = Vec::new();
        let mut feasibility = 0;

        for outcome in round.into_iter().flat_map(|r| r.outcomes) {
            match outcome {
                ScenarioOutcome::Optimal {
                    index,
                    probability,
                    solution,
                    cut,
                } => {
                    let value = self.sigma * solution.objective;
                    expected += probability * value;
                    let violated = match self.theta_value(index) {
                        Some(theta) => theta < value - 1e-9 * (1.0 + value.abs()),
                        None => true,
                    };
                    if violated {
                        new_cuts.push(cut);
                    }
                    scenarios[index] = solution;
                }
                ScenarioOutcome::Infeasible { cut, .. } => {
                    feasibility += 1;
                    new_cuts.push(cut);
                }
                ScenarioOutcome::Failed(failure) => {
                    warn!(scenario = failure.scenario, status = %failure.status, "subproblem failed");
                    self.last_failure = Some(failure);
                    return Ok(Phase::Converged(match failure.status {
                        SolveStatus::Infeasible => TerminalStatus::Infeasible,
                        SolveStatus::Unbounded => TerminalStatus::Unbounded,
                        status => return Err(SpError::solve(status).in_scenario(failure.scenario)),
                    }));
                }
            }
        }

        if feasibility == 0 {
            let first_stage = self.master.objective_value(&x);
            let value = self.sigma * first_stage + expected;
            // a tie with a starting-point incumbent still upgrades it to one with master duals
            let ties_starting_point = self.master_solution.is_some()
                && self.incumbent.as_ref().is_some_and(|i| i.master.is_none())
                && value <= self.upper_bound + 1e-9 * (1.0 + self.upper_bound.abs());
            if value < self.upper_bound || ties_starting_point {
                self.upper_bound = self.upper_bound.min(value);
                self.incumbent = Some(Incumbent {
                    value,
                    decision: x.to_vec(),
                    master: self.master_solution.clone(),
                    scenarios,
                });
            }
        }

        let added = new_cuts.len();
        for cut in new_cuts {
            if cut.kind == CutKind::Optimality {
                self.has_theta[cut.scenario] = true;
            }
            self.cuts.push(cut);
        }
        info!(
            iteration = self.iteration,
            lower_bound = self.lower_bound,
            upper_bound = self.upper_bound,
            gap = self.gap(),
            cuts = added,
            feasibility_cuts = feasibility,
            "L-shaped iteration"
        );

        if added == 0 || (feasibility == 0 && self.gap() <= self.config.tolerance) {
            return Ok(Phase::Converged(TerminalStatus::Optimal));
        }
        Ok(Phase::MasterSolve)
    }

    fn committed_solution(&self) -> Result<CommittedSolution> {
        let incumbent = self.incumbent.as_ref().ok_or(SpError::StaleStateConflict)?;
        let n = self.ncols();
        let m = self.master.num_rows();
        let restore = |values: &[f64]| values.iter().map(|v| self.sigma * v).collect::<Vec<_>>();
        let master = incumbent.master.clone().unwrap_or_default();
        let first_stage = ModelSolution {
            objective: self.master.objective_value(&incumbent.decision),
            primal: incumbent.decision.clone(),
            duals: restore(master.duals.get(..m).unwrap_or_default()),
            reduced_costs: restore(master.reduced_costs.get(..n).unwrap_or_default()),
        };
        Ok(CommittedSolution {
            objective: self.sigma * incumbent.value,
            first_stage,
            scenarios: incumbent.scenarios.clone(),
        })
    }
}

impl<D1, D2, S> StructuredModel<D1, D2, S> for LShapedModel<D1, D2, S>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    fn run(&mut self) -> Result<TerminalStatus> {
        loop {
            if let Phase::Converged(status) = self.step()? {
                info!(
                    status = %status,
                    iterations = self.iteration,
                    cuts = self.cuts.len(),
                    objective = self.sigma * self.upper_bound,
                    "L-shaped finished"
                );
                return Ok(status);
            }
        }
    }

    fn objective(&self) -> Option<f64> {
        self.incumbent.as_ref().map(|i| self.sigma * i.value)
    }

    fn commit(&self, program: &mut StochasticProgram<D1, D2, S>) -> Result<()> {
        program.fill_solution(self.committed_solution()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Placement, Recipe};
    use crate::scenario::Scenario;
    use crate::structured::{optimize, ExtensiveFormSolver};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    type Program = StochasticProgram<(), (), f64>;

    /// min x + E[2·max(ξ - x, 0)],  x ∈ [0, 10]
    fn newsvendor(demands: &[(f64, f64)]) -> Program {
        let mut sp = Program::new((), ());
        sp.register_recipe(
            Recipe::stage_one(|_, model| {
                let x = model.add_variable("x", 0.0, 10.0);
                model.set_objective(ObjectiveSense::Minimize, LinearExpr::from(x))?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.register_recipe(
            Recipe::stage_two(|_, decisions, demand, model| {
                let y = model.add_variable("y", 0.0, f64::INFINITY);
                model.set_objective(ObjectiveSense::Minimize, 2.0 * y)?;
                model.add_constraint("short", y + decisions.at(0)?, ConstraintSense::Ge, *demand)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.add_scenarios(
            demands.iter().map(|(d, p)| Scenario::new(*d, *p).unwrap()),
            Placement::LeastLoaded,
            false,
        )
        .unwrap();
        sp
    }

    #[test]
    fn test_step_walks_the_phases() {
        let sp = newsvendor(&[(4.0, 0.5), (8.0, 0.5)]);
        let mut model = LShapedSolver::default().model(&sp).unwrap();
        assert_eq!(model.phase(), Phase::Init);
        assert_eq!(model.step().unwrap(), Phase::MasterSolve);
        assert_eq!(model.step().unwrap(), Phase::Broadcast);
        assert_eq!(model.step().unwrap(), Phase::SubproblemSolve);
        assert_eq!(model.step().unwrap(), Phase::Aggregate);
        assert_eq!(model.step().unwrap(), Phase::MasterSolve);
        assert_eq!(model.iteration(), 1);
        assert_eq!(model.cuts().len(), 2);
    }

    #[test]
    fn test_converges_on_newsvendor() {
        // cost x + 0.5·2·(4-x)+ + 0.5·2·(8-x)+ is minimized on [4, 8] with value 8
        let sp = newsvendor(&[(4.0, 0.5), (8.0, 0.5)]);
        let mut model = LShapedSolver::default().model(&sp).unwrap();
        assert_eq!(model.run().unwrap(), TerminalStatus::Optimal);
        assert_relative_eq!(StructuredModel::objective(&model).unwrap(), 8.0, epsilon = 1e-6);
        assert!(model.gap() <= 1e-6);
    }

    #[test]
    fn test_cancelled_run_hits_iteration_limit() {
        let sp = newsvendor(&[(4.0, 0.5), (8.0, 0.5)]);
        let solver = LShapedSolver::default();
        solver.cancellation_token().cancel();
        let mut model = solver.model(&sp).unwrap();
        assert_eq!(model.run().unwrap(), TerminalStatus::IterationLimit);
        assert!(model.committed_solution().is_err());
    }

    #[test]
    fn test_iteration_budget() {
        let sp = newsvendor(&[(2.0, 0.25), (4.0, 0.25), (6.0, 0.25), (9.0, 0.25)]);
        let solver = LShapedSolver::new(LShapedConfig {
            max_iterations: 1,
            ..LShapedConfig::default()
        });
        let mut model = solver.model(&sp).unwrap();
        assert_eq!(model.run().unwrap(), TerminalStatus::IterationLimit);
    }

    /// min -x + E[c·y],  y ≥ x,  x ≥ 0: the first stage alone is unbounded
    fn recourse_pays_back(costs: &[(f64, f64)]) -> Program {
        let mut sp = Program::new((), ());
        sp.register_recipe(
            Recipe::stage_one(|_, model| {
                let x = model.add_variable("x", 0.0, f64::INFINITY);
                model.set_objective(ObjectiveSense::Minimize, -1.0 * x)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.register_recipe(
            Recipe::stage_two(|_, decisions, cost, model| {
                let y = model.add_variable("y", 0.0, f64::INFINITY);
                model.set_objective(ObjectiveSense::Minimize, *cost * y)?;
                model.add_constraint("follow", y - decisions.at(0)?, ConstraintSense::Ge, 0.0)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.add_scenarios(
            costs.iter().map(|(c, p)| Scenario::new(*c, *p).unwrap()),
            Placement::LeastLoaded,
            false,
        )
        .unwrap();
        sp
    }

    /// min x + E[y],  ξ - x ≤ y ≤ 2,  x ∈ [0, 10]: only x ≥ ξ - 2 has recourse
    fn capped_recourse(demand: f64) -> Program {
        let mut sp = Program::new((), ());
        sp.register_recipe(
            Recipe::stage_one(|_, model| {
                let x = model.add_variable("x", 0.0, 10.0);
                model.set_objective(ObjectiveSense::Minimize, LinearExpr::from(x))?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.register_recipe(
            Recipe::stage_two(|_, decisions, demand, model| {
                let y = model.add_variable("y", 0.0, 2.0);
                model.set_objective(ObjectiveSense::Minimize, LinearExpr::from(y))?;
                model.add_constraint("short", y + decisions.at(0)?, ConstraintSense::Ge, *demand)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.add_scenario(Scenario::new(demand, 1.0).unwrap(), Placement::LeastLoaded, false)
            .unwrap();
        sp
    }

    #[test]
    fn test_unbounded_first_stage_is_not_terminal() {
        let mut extensive = recourse_pays_back(&[(2.0, 0.5), (4.0, 0.5)]);
        assert_eq!(
            optimize(&mut extensive, &ExtensiveFormSolver::default()).unwrap(),
            TerminalStatus::Optimal
        );

        let mut decomposed = recourse_pays_back(&[(2.0, 0.5), (4.0, 0.5)]);
        let mut model = LShapedSolver::default().model(&decomposed).unwrap();
        assert_eq!(model.step().unwrap(), Phase::MasterSolve);
        // no θ yet: the master falls back to a feasible point and broadcasts it
        assert_eq!(model.step().unwrap(), Phase::Broadcast);
        assert!(model.bounds().0.is_infinite());

        assert_eq!(
            optimize(&mut decomposed, &LShapedSolver::default()).unwrap(),
            TerminalStatus::Optimal
        );
        // -x + 0.5·2x + 0.5·4x = 2x is minimized at x = 0
        assert_abs_diff_eq!(decomposed.optimal_value().unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            decomposed.optimal_value().unwrap(),
            extensive.optimal_value().unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(decomposed.optimal_decision().unwrap()[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_feasibility_cuts_recover_missing_recourse() {
        // x = 0 from the first master leaves demand 5 uncovered with y ≤ 2
        let sp = capped_recourse(5.0);
        let mut model = LShapedSolver::default().model(&sp).unwrap();
        assert_eq!(model.run().unwrap(), TerminalStatus::Infeasible);
        assert_eq!(model.last_failure().map(|f| f.scenario), Some(0));

        let solver = LShapedSolver::new(LShapedConfig {
            check_feasibility: true,
            ..LShapedConfig::default()
        });
        let mut model = solver.model(&sp).unwrap();
        assert_eq!(model.run().unwrap(), TerminalStatus::Optimal);
        assert!(model.cuts().iter().any(|c| c.kind == CutKind::Feasibility));
        // any x in [3, 5] costs x + (5 - x)
        assert_relative_eq!(StructuredModel::objective(&model).unwrap(), 5.0, epsilon = 1e-6);
    }
}
