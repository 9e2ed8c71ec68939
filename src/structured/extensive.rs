use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

use super::{StructuredModel, StructuredSolver, TerminalStatus};
use crate::error::{Result, SpError};
use crate::model::{LinearModel, ModelSolution, Row, Variable};
use crate::program::{CommittedSolution, StochasticProgram};
use crate::scenario::ScenarioData;
use crate::solver::{LpSolver, MinilpSolver, SolveStatus};

/// Position of one scenario's block inside the extensive form
#[derive(Debug, Clone, Copy, PartialEq)]
struct Block {
    probability: f64,
    first_col: usize,
    ncols: usize,
    first_row: usize,
    nrows: usize,
}

/// Deterministic equivalent: master columns first, then one block of
/// recourse columns per scenario with probability-weighted costs.
fn assemble<D1, D2, S>(program: &StochasticProgram<D1, D2, S>) -> Result<(LinearModel, Vec<Block>)>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let master = program.stage_one_model()?;
    let mut dep = master.clone();
    dep.name = "extensive_form".to_string();
    dep.clear_solution();
    let first_stage_cols = master.num_variables();

    let mut blocks = Vec::with_capacity(program.nscenarios());
    for (index, scenario) in program.scenarios().enumerate() {
        let sub = program.subproblem(index)?;
        if sub.sense() != master.sense() {
            return Err(SpError::InvalidModel(format!(
                "{}: recourse must {} like the first stage",
                sub.name,
                master.sense()
            )));
        }
        if sub.decision_width() > first_stage_cols {
            return Err(SpError::DimensionMismatch {
                expected: first_stage_cols,
                found: sub.decision_width(),
            });
        }
        let p = scenario.probability();
        let block = Block {
            probability: p,
            first_col: dep.num_variables(),
            ncols: sub.num_variables(),
            first_row: dep.num_rows(),
            nrows: sub.num_rows(),
        };
        for v in sub.variables() {
            dep.push_variable(Variable {
                name: format!("{}@{}", v.name, index),
                cost: p * v.cost,
                ..v.clone()
            });
        }
        for row in sub.rows() {
            let terms = row
                .terms
                .iter()
                .map(|(col, c)| (col + block.first_col, *c))
                .chain(row.decision_terms.iter().copied())
                .collect();
            dep.push_row(Row {
                name: format!("{}@{}", row.name, index),
                terms,
                decision_terms: Vec::new(),
                sense: row.sense,
                rhs: row.rhs,
            });
        }
        dep.add_objective_constant(p * sub.objective_constant());
        blocks.push(block);
    }
    debug!(
        columns = dep.num_variables(),
        rows = dep.num_rows(),
        scenarios = blocks.len(),
        "extensive form assembled"
    );
    Ok((dep, blocks))
}

/// Extensive form of a generated program
pub fn dep<D1, D2, S>(program: &StochasticProgram<D1, D2, S>) -> Result<LinearModel>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    assemble(program).map(|(model, _)| model)
}

/// Solves the deterministic equivalent in one LP
#[derive(Clone)]
pub struct ExtensiveFormSolver {
    solver: Arc<dyn LpSolver>,
}

impl Default for ExtensiveFormSolver {
    fn default() -> Self {
        Self::new(Arc::new(MinilpSolver::new()))
    }
}

impl ExtensiveFormSolver {
    pub fn new(solver: Arc<dyn LpSolver>) -> Self {
        Self { solver }
    }
}

impl<D1, D2, S> StructuredSolver<D1, D2, S> for ExtensiveFormSolver
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    fn name(&self) -> &'static str {
        "extensive_form"
    }

    fn build(&self, program: &StochasticProgram<D1, D2, S>) -> Result<Box<dyn StructuredModel<D1, D2, S>>> {
        let (model, blocks) = assemble(program)?;
        let first_stage = program.stage_one_model()?.clone();
        Ok(Box::new(ExtensiveModel {
            solver: Arc::clone(&self.solver),
            model,
            first_stage,
            subproblems: (0..program.nscenarios())
                .map(|i| program.subproblem(i).cloned())
                .collect::<Result<Vec<_>>>()?,
            blocks,
            solution: None,
            _program: PhantomData,
        }))
    }

    fn internal_solver(&self) -> Option<Arc<dyn LpSolver>> {
        Some(Arc::clone(&self.solver))
    }
}

pub struct ExtensiveModel<D1, D2, S> {
    solver: Arc<dyn LpSolver>,
    model: LinearModel,
    first_stage: LinearModel,
    subproblems: Vec<LinearModel>,
    blocks: Vec<Block>,
    solution: Option<ModelSolution>,
    _program: PhantomData<fn() -> (D1, D2, S)>,
}

impl<D1, D2, S> ExtensiveModel<D1, D2, S> {
    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    fn split(&self, solution: &ModelSolution) -> CommittedSolution {
        let n1 = self.first_stage.num_variables();
        let m1 = self.first_stage.num_rows();
        let x = solution.primal[..n1].to_vec();
        let first_stage = ModelSolution {
            objective: self.first_stage.objective_value(&x),
            primal: x,
            duals: solution.duals[..m1].to_vec(),
            reduced_costs: solution.reduced_costs[..n1].to_vec(),
        };
        let scenarios = self
            .blocks
            .iter()
            .zip(&self.subproblems)
            .map(|(block, sub)| {
                // extensive-form multipliers carry the scenario probability
                let scale = if block.probability > 0.0 { 1.0 / block.probability } else { 0.0 };
                let cols = block.first_col..block.first_col + block.ncols;
                let rows = block.first_row..block.first_row + block.nrows;
                let primal = solution.primal[cols.clone()].to_vec();
                ModelSolution {
                    objective: sub.objective_value(&primal),
                    primal,
                    duals: solution.duals[rows].iter().map(|d| d * scale).collect(),
                    reduced_costs: solution.reduced_costs[cols].iter().map(|r| r * scale).collect(),
                }
            })
            .collect();
        CommittedSolution {
            objective: solution.objective,
            first_stage,
            scenarios,
        }
    }
}

impl<D1, D2, S> StructuredModel<D1, D2, S> for ExtensiveModel<D1, D2, S>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    fn run(&mut self) -> Result<TerminalStatus> {
        match self.solver.solve(&self.model) {
            Ok(solution) => {
                info!(
                    objective = solution.objective,
                    backend = self.solver.name(),
                    "extensive form solved"
                );
                self.solution = Some(solution);
                Ok(TerminalStatus::Optimal)
            }
            Err(e) => match e.solve_status() {
                Some(SolveStatus::Infeasible) => Ok(TerminalStatus::Infeasible),
                Some(SolveStatus::Unbounded) => Ok(TerminalStatus::Unbounded),
                _ => Err(e),
            },
        }
    }

    fn objective(&self) -> Option<f64> {
        self.solution.as_ref().map(|s| s.objective)
    }

    fn commit(&self, program: &mut StochasticProgram<D1, D2, S>) -> Result<()> {
        let solution = self.solution.as_ref().ok_or(SpError::StaleStateConflict)?;
        program.fill_solution(self.split(solution))
    }
}
