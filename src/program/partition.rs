use tracing::debug;

use super::recipe::{DecisionContext, SecondStageRecipe};
use super::Stage;
use crate::error::{Result, SpError};
use crate::model::LinearModel;
use crate::scenario::{Scenario, ScenarioData};
use crate::solver::LpSolver;

/// Disjoint slice of a program's scenarios, owned by one worker
///
/// `subproblems[i]` is the generated model of `scenarios[i]`, or `None`
/// while deferred.
#[derive(Debug, Clone)]
pub struct ScenarioPartition<S> {
    worker: usize,
    scenarios: Vec<Scenario<S>>,
    subproblems: Vec<Option<LinearModel>>,
}

impl<S: ScenarioData> ScenarioPartition<S> {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            scenarios: Vec::new(),
            subproblems: Vec::new(),
        }
    }

    pub(crate) fn from_parts(worker: usize, entries: Vec<(Scenario<S>, Option<LinearModel>)>) -> Self {
        let (scenarios, subproblems) = entries.into_iter().unzip();
        Self {
            worker,
            scenarios,
            subproblems,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn scenarios(&self) -> &[Scenario<S>] {
        &self.scenarios
    }

    pub fn subproblem(&self, local: usize) -> Option<&LinearModel> {
        self.subproblems.get(local).and_then(Option::as_ref)
    }

    pub(crate) fn subproblems_mut(&mut self) -> impl Iterator<Item = &mut LinearModel> {
        self.subproblems.iter_mut().flatten()
    }

    pub fn is_generated(&self) -> bool {
        self.subproblems.iter().all(Option::is_some)
    }

    pub fn generated_count(&self) -> usize {
        self.subproblems.iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn push(&mut self, scenario: Scenario<S>) -> usize {
        self.scenarios.push(scenario);
        self.subproblems.push(None);
        self.scenarios.len() - 1
    }

    pub(crate) fn scenarios_mut(&mut self) -> &mut [Scenario<S>] {
        &mut self.scenarios
    }

    pub(crate) fn invalidate(&mut self) {
        self.subproblems.iter_mut().for_each(|s| *s = None);
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (Scenario<S>, Option<LinearModel>)> {
        self.scenarios.into_iter().zip(self.subproblems)
    }

    /// Build every missing subproblem. Returns `(global index, reason)` for
    /// each scenario whose recipe failed; those stay missing.
    pub(crate) fn generate_missing<D2>(
        &mut self,
        offset: usize,
        data: &D2,
        decisions: &DecisionContext,
        recipe: &dyn SecondStageRecipe<D2, S>,
    ) -> Vec<(usize, String)> {
        let mut failed = Vec::new();
        let mut built = 0;
        for (local, (scenario, slot)) in self.scenarios.iter().zip(self.subproblems.iter_mut()).enumerate() {
            if slot.is_some() {
                continue;
            }
            let mut model = LinearModel::new(format!("subproblem[{}]", offset + local));
            let outcome = recipe
                .generate(data, decisions, scenario.data(), &mut model)
                .and_then(|_| model.validate().map_err(anyhow::Error::from));
            match outcome {
                Ok(()) => {
                    *slot = Some(model);
                    built += 1;
                }
                Err(e) => failed.push((offset + local, format!("{:#}", e))),
            }
        }
        debug!(worker = self.worker, built, failed = failed.len(), "generated subproblems");
        failed
    }

    /// Recourse value Q(x, ξ) of every scenario with the first-stage
    /// decision fixed to `x`
    pub(crate) fn recourse_values(&self, offset: usize, x: &[f64], solver: &dyn LpSolver) -> Result<Vec<f64>> {
        self.subproblems
            .iter()
            .enumerate()
            .map(|(local, slot)| {
                let model = slot.as_ref().ok_or(SpError::NotGenerated { stage: Stage::Two })?;
                let outcome = model.outcome(x)?;
                let solution = solver.solve(&outcome).map_err(|e| e.in_scenario(offset + local))?;
                Ok(solution.objective)
            })
            .collect()
    }
}
