use serde::{Deserialize, Serialize};

use super::RoundFailure;
use crate::error::{Result, SpError};
use crate::model::{LinearModel, ModelSolution};
use crate::program::StochasticProgram;
use crate::scenario::ScenarioData;
use crate::solver::{LpSolver, SolveStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CutKind {
    Optimality,
    Feasibility,
}

/// Affine bound `intercept + gradient·x` on a scenario's value function
///
/// Optimality cuts under-estimate a minimized recourse value (over-estimate a
/// maximized one). Feasibility cuts bound the phase-one violation, which must
/// stay at or below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cut {
    pub scenario: usize,
    pub kind: CutKind,
    pub gradient: Vec<f64>,
    pub intercept: f64,
}

impl Cut {
    /// Linearize a value `value` with slope `gradient` taken at `x`
    pub fn at(scenario: usize, kind: CutKind, gradient: Vec<f64>, value: f64, x: &[f64]) -> Self {
        let intercept = value - dot(&gradient, x);
        Self {
            scenario,
            kind,
            gradient,
            intercept,
        }
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.intercept + dot(&self.gradient, x)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A subproblem snapshot with its scenario index and probability
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub index: usize,
    pub probability: f64,
    pub model: LinearModel,
}

/// Subproblems of one partition, copied out of the program at build time
#[derive(Debug, Clone)]
pub(crate) struct PartitionWork {
    pub worker: usize,
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone)]
pub(crate) enum ScenarioOutcome {
    Optimal {
        index: usize,
        probability: f64,
        solution: ModelSolution,
        cut: Cut,
    },
    Infeasible {
        index: usize,
        cut: Cut,
    },
    Failed(RoundFailure),
}

/// Results of one partition for one broadcast decision
#[derive(Debug, Clone)]
pub(crate) struct PartitionRound {
    pub worker: usize,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl PartitionWork {
    /// Copy every subproblem out of `program`. Fails if any is missing or
    /// optimizes in a different direction than the master.
    pub fn snapshot<D1, D2, S>(program: &StochasticProgram<D1, D2, S>) -> Result<Vec<PartitionWork>>
    where
        D1: Send + Sync + 'static,
        D2: Send + Sync + 'static,
        S: ScenarioData,
    {
        let sense = program.stage_one_model()?.sense();
        let offsets = program.offsets();
        program
            .partitions()
            .iter()
            .zip(offsets)
            .map(|(partition, offset)| {
                let items = (0..partition.len())
                    .map(|local| {
                        let index = offset + local;
                        let model = program.subproblem(index)?;
                        if model.sense() != sense {
                            return Err(SpError::InvalidModel(format!(
                                "{}: recourse must {} like the first stage",
                                model.name, sense
                            )));
                        }
                        Ok(WorkItem {
                            index,
                            probability: partition.scenarios()[local].probability(),
                            model: model.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(PartitionWork {
                    worker: partition.worker(),
                    items,
                })
            })
            .collect()
    }

    /// Solve every subproblem at `x`, sequentially
    pub fn solve(&self, x: &[f64], solver: &dyn LpSolver, check_feasibility: bool) -> PartitionRound {
        PartitionRound {
            worker: self.worker,
            outcomes: self
                .items
                .iter()
                .map(|item| solve_item(item, x, solver, check_feasibility))
                .collect(),
        }
    }
}

fn failed(index: usize, status: SolveStatus) -> ScenarioOutcome {
    ScenarioOutcome::Failed(RoundFailure {
        scenario: index,
        status,
    })
}

fn solve_item(item: &WorkItem, x: &[f64], solver: &dyn LpSolver, check_feasibility: bool) -> ScenarioOutcome {
    let outcome = match item.model.outcome(x) {
        Ok(model) => model,
        Err(_) => return failed(item.index, SolveStatus::Error),
    };
    match solver.solve(&outcome) {
        Ok(solution) => {
            let gradient = item.model.decision_gradient(&solution.duals, x.len());
            let cut = Cut::at(item.index, CutKind::Optimality, gradient, solution.objective, x);
            ScenarioOutcome::Optimal {
                index: item.index,
                probability: item.probability,
                solution,
                cut,
            }
        }
        Err(e) if check_feasibility && e.solve_status() == Some(SolveStatus::Infeasible) => {
            let phase_one = item.model.feasibility_model();
            let solved = phase_one.outcome(x).and_then(|m| solver.solve(&m));
            match solved {
                Ok(solution) => {
                    let gradient = phase_one.decision_gradient(&solution.duals, x.len());
                    ScenarioOutcome::Infeasible {
                        index: item.index,
                        cut: Cut::at(item.index, CutKind::Feasibility, gradient, solution.objective, x),
                    }
                }
                Err(e) => failed(item.index, e.solve_status().unwrap_or(SolveStatus::Error)),
            }
        }
        Err(e) => failed(item.index, e.solve_status().unwrap_or(SolveStatus::Error)),
    }
}
