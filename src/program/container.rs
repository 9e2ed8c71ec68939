use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::distribution::{even_split, fill_plan, least_loaded, Placement, Transport};
use super::partition::ScenarioPartition;
use super::recipe::{DecisionContext, FirstStageRecipe, Recipe, SecondStageRecipe};
use super::solution::{CommittedSolution, SolutionHandle};
use super::stage::{Stage, StageState, StagedData};
use crate::config::ProgramConfig;
use crate::error::{Result, SpError};
use crate::model::{LinearModel, ModelSolution};
use crate::scenario::{Probability, Sampler, Scenario, ScenarioData, ScenarioSchema};

/// Two-stage stochastic program over scenario payloads `S`
///
/// `D1` and `D2` are the stage data handed to the first- and second-stage
/// recipes. Models are generated lazily: a program is *deferred* until
/// [`generate`](Self::generate) has built the master and one subproblem per
/// scenario. Scenarios live in worker partitions; the flattened index of a
/// scenario is its position in partition order.
pub struct StochasticProgram<D1, D2, S> {
    id: Uuid,
    first_stage: Arc<D1>,
    second_stage: Arc<D2>,
    first_recipe: Option<Arc<dyn FirstStageRecipe<D1>>>,
    second_recipe: Option<Arc<dyn SecondStageRecipe<D2, S>>>,
    master: Option<LinearModel>,
    master_stale: bool,
    second_stage_stale: bool,
    decisions: DecisionContext,
    partitions: Vec<ScenarioPartition<S>>,
    schema: Option<ScenarioSchema>,
    transport: Transport,
    probability_tolerance: f64,
    solution: SolutionHandle,
}

impl<D1, D2, S> StochasticProgram<D1, D2, S>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    /// Single partition, in-caller transport
    pub fn new(first_stage: D1, second_stage: D2) -> Self {
        Self::build(first_stage, second_stage, 1, Transport::Local, ProgramConfig::default().probability_tolerance)
    }

    pub fn with_config(first_stage: D1, second_stage: D2, config: &ProgramConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(SpError::InvalidWorkerCount(0));
        }
        let transport = Transport::from_kind(config.transport, config.threads)?;
        Ok(Self::build(
            first_stage,
            second_stage,
            config.workers,
            transport,
            config.probability_tolerance,
        ))
    }

    fn build(first_stage: D1, second_stage: D2, workers: usize, transport: Transport, tolerance: f64) -> Self {
        let program = Self {
            id: Uuid::new_v4(),
            first_stage: Arc::new(first_stage),
            second_stage: Arc::new(second_stage),
            first_recipe: None,
            second_recipe: None,
            master: None,
            master_stale: false,
            second_stage_stale: false,
            decisions: DecisionContext::default(),
            partitions: (0..workers).map(ScenarioPartition::new).collect(),
            schema: None,
            transport,
            probability_tolerance: tolerance,
            solution: SolutionHandle::default(),
        };
        debug!(program = %program.id, workers, transport = %program.transport.kind(), "program created");
        program
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Program over a subset of this program's scenarios, sharing stage data
    /// and recipes. Used by the wait-and-see and expected-value constructs.
    pub(crate) fn restricted(&self, entries: Vec<(Scenario<S>, Option<LinearModel>)>) -> Self {
        let stale = self.master_stale || self.second_stage_stale;
        let entries = entries
            .into_iter()
            .map(|(scenario, model)| (scenario, if stale { None } else { model }))
            .collect::<Vec<_>>();
        let schema = entries.first().map(|(s, _)| s.schema());
        let master = if self.master_stale {
            None
        } else {
            self.master.clone().map(|mut m| {
                m.clear_solution();
                m
            })
        };
        Self {
            id: Uuid::new_v4(),
            first_stage: Arc::clone(&self.first_stage),
            second_stage: Arc::clone(&self.second_stage),
            first_recipe: self.first_recipe.clone(),
            second_recipe: self.second_recipe.clone(),
            master,
            master_stale: false,
            second_stage_stale: false,
            decisions: self.decisions.clone(),
            partitions: vec![ScenarioPartition::from_parts(0, entries)],
            schema,
            transport: Transport::Local,
            probability_tolerance: self.probability_tolerance,
            solution: SolutionHandle::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ---- scenarios ----

    pub fn add_scenario(&mut self, scenario: Scenario<S>, placement: Placement, defer: bool) -> Result<usize> {
        let target = self.target_partition(placement)?;
        self.schema = self.batch_schema([scenario.schema()])?;
        let local = self.partitions[target].push(scenario);
        let index = self.offsets()[target] + local;
        self.invalidate_solution();
        debug!(program = %self.id, worker = target, index, "scenario added");
        if !defer && self.can_generate() {
            self.generate()?;
        }
        Ok(index)
    }

    /// Bulk insertion. `LeastLoaded` levels partition sizes in one pass.
    pub fn add_scenarios(
        &mut self,
        scenarios: impl IntoIterator<Item = Scenario<S>>,
        placement: Placement,
        defer: bool,
    ) -> Result<()> {
        let scenarios: Vec<Scenario<S>> = scenarios.into_iter().collect();
        let schema = self.batch_schema(scenarios.iter().map(Scenario::schema))?;
        if let Placement::Worker(_) = placement {
            self.target_partition(placement)?;
        }
        self.schema = schema;
        let added = scenarios.len();
        match placement {
            Placement::LeastLoaded => {
                let plan = fill_plan(&self.partition_sizes(), added);
                let mut rest = scenarios.into_iter();
                for (partition, count) in self.partitions.iter_mut().zip(plan) {
                    rest.by_ref().take(count).for_each(|s| {
                        partition.push(s);
                    });
                }
            }
            Placement::Worker(_) => {
                let target = self.target_partition(placement)?;
                scenarios.into_iter().for_each(|s| {
                    self.partitions[target].push(s);
                });
            }
        }
        self.invalidate_solution();
        debug!(program = %self.id, added, total = self.nscenarios(), "scenarios added");
        if !defer && self.can_generate() {
            self.generate()?;
        }
        Ok(())
    }

    /// Sample average approximation: draw `n` payloads, then give every
    /// scenario probability 1/N.
    pub fn sample(&mut self, sampler: &mut impl Sampler<S>, n: usize, defer: bool) -> Result<()> {
        let total = self.nscenarios() + n;
        if total == 0 {
            return Ok(());
        }
        let probability = Probability::new(1.0 / total as f64)?;
        let drawn = (0..n)
            .map(|_| Scenario::new(sampler.sample(), probability.value()))
            .collect::<Result<Vec<_>>>()?;
        self.add_scenarios(drawn, Placement::LeastLoaded, true)?;
        for partition in &mut self.partitions {
            partition
                .scenarios_mut()
                .iter_mut()
                .for_each(|s| s.set_probability(probability));
        }
        info!(program = %self.id, sampled = n, total, "scenarios sampled");
        if !defer && self.can_generate() {
            self.generate()?;
        }
        Ok(())
    }

    fn target_partition(&self, placement: Placement) -> Result<usize> {
        match placement {
            Placement::LeastLoaded => Ok(least_loaded(&self.partition_sizes())),
            Placement::Worker(w) if w < self.partitions.len() => Ok(w),
            Placement::Worker(w) => Err(SpError::IndexOutOfRange {
                index: w,
                len: self.partitions.len(),
            }),
        }
    }

    /// Schema the container would hold after admitting every schema in `found`
    fn batch_schema(&self, found: impl IntoIterator<Item = ScenarioSchema>) -> Result<Option<ScenarioSchema>> {
        let mut schema = self.schema.clone();
        for found in found {
            match &schema {
                Some(expected) if *expected != found => {
                    return Err(SpError::SchemaMismatch {
                        expected: expected.to_string(),
                        found: found.to_string(),
                    })
                }
                Some(_) => {}
                None => schema = Some(found),
            }
        }
        Ok(schema)
    }

    /// Redistribute scenarios evenly over `workers` partitions, keeping the
    /// flattened order. Subproblems move with their scenarios.
    pub fn rebalance(&mut self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(SpError::InvalidWorkerCount(workers));
        }
        let total = self.nscenarios();
        let mut entries = std::mem::take(&mut self.partitions)
            .into_iter()
            .flat_map(ScenarioPartition::into_entries);
        self.partitions = even_split(total, workers)
            .into_iter()
            .enumerate()
            .map(|(worker, count)| ScenarioPartition::from_parts(worker, entries.by_ref().take(count).collect()))
            .collect();
        info!(program = %self.id, workers, scenarios = total, "partitions rebalanced");
        Ok(())
    }

    // ---- stage data & recipes ----

    pub fn set_stage_data(&mut self, data: StagedData<D1, D2>) {
        match data {
            StagedData::First(d) => self.set_first_stage_data(d),
            StagedData::Second(d) => self.set_second_stage_data(d),
        }
    }

    pub fn set_first_stage_data(&mut self, data: D1) {
        self.first_stage = Arc::new(data);
        if self.master.is_some() {
            self.master_stale = true;
        }
        self.invalidate_solution();
        debug!(program = %self.id, stage = %Stage::One, "stage data replaced");
    }

    pub fn set_second_stage_data(&mut self, data: D2) {
        self.second_stage = Arc::new(data);
        self.mark_second_stage_stale();
        self.invalidate_solution();
        debug!(program = %self.id, stage = %Stage::Two, "stage data replaced");
    }

    pub fn first_stage_data(&self) -> &D1 {
        &self.first_stage
    }

    pub fn second_stage_data(&self) -> &D2 {
        &self.second_stage
    }

    /// Install the recipe for its stage, replacing any previous one
    pub fn register_recipe(&mut self, recipe: Recipe<D1, D2, S>, defer: bool) -> Result<()> {
        let stage = recipe.stage();
        match recipe {
            Recipe::StageOne(r) => {
                self.first_recipe = Some(r);
                if self.master.is_some() {
                    self.master_stale = true;
                }
            }
            Recipe::StageTwo(r) => {
                self.second_recipe = Some(r);
                self.mark_second_stage_stale();
            }
        }
        self.invalidate_solution();
        debug!(program = %self.id, %stage, defer, "recipe registered");
        if !defer && self.can_generate() {
            self.generate()?;
        }
        Ok(())
    }

    pub fn has_recipe(&self, stage: Stage) -> bool {
        match stage {
            Stage::One => self.first_recipe.is_some(),
            Stage::Two => self.second_recipe.is_some(),
        }
    }

    fn can_generate(&self) -> bool {
        self.first_recipe.is_some() && (self.second_recipe.is_some() || self.nscenarios() == 0)
    }

    fn mark_second_stage_stale(&mut self) {
        if self.partitions.iter().any(|p| p.generated_count() > 0) {
            self.second_stage_stale = true;
        }
    }

    // ---- generation ----

    /// Build the master if missing or stale and every missing or stale
    /// subproblem. Already generated artifacts are left untouched.
    ///
    /// Subproblems whose recipe fails stay missing and are reported through
    /// `PartialGeneration`; calling `generate` again retries only those.
    pub fn generate(&mut self) -> Result<()> {
        let first = self
            .first_recipe
            .clone()
            .ok_or(SpError::UndefinedRecipe(Stage::One))?;
        if self.master.is_none() || self.master_stale {
            let mut master = LinearModel::new("master");
            first
                .generate(self.first_stage.as_ref(), &mut master)
                .map_err(|source| SpError::Generation {
                    stage: Stage::One,
                    source,
                })?;
            master.validate()?;
            let layout = DecisionContext::from_master(&master);
            if layout != self.decisions {
                self.mark_second_stage_stale();
                self.decisions = layout;
            }
            info!(
                program = %self.id,
                decisions = master.num_variables(),
                rows = master.num_rows(),
                "master generated"
            );
            self.master = Some(master);
            self.master_stale = false;
        }

        if self.nscenarios() == 0 {
            self.second_stage_stale = false;
            return Ok(());
        }
        let second = self
            .second_recipe
            .clone()
            .ok_or(SpError::UndefinedRecipe(Stage::Two))?;
        if self.second_stage_stale {
            self.partitions.iter_mut().for_each(ScenarioPartition::invalidate);
            self.second_stage_stale = false;
        }

        let offsets = self.offsets();
        let data = self.second_stage.as_ref();
        let decisions = &self.decisions;
        let recipe = second.as_ref();
        let mut failed: Vec<(usize, String)> = self
            .transport
            .map_mut(&mut self.partitions, |partition| {
                partition.generate_missing(offsets[partition.worker()], data, decisions, recipe)
            })
            .into_iter()
            .flatten()
            .collect();

        if failed.is_empty() {
            debug!(program = %self.id, subproblems = self.nsubproblems(), "second stage generated");
            return Ok(());
        }
        failed.sort_by_key(|(index, _)| *index);
        let reason = failed[0].1.clone();
        warn!(program = %self.id, failed = failed.len(), %reason, "second stage partially generated");
        Err(SpError::PartialGeneration {
            failed: failed.into_iter().map(|(index, _)| index).collect(),
            reason,
        })
    }

    pub fn stage_state(&self, stage: Stage) -> StageState {
        match stage {
            Stage::One => match (&self.first_recipe, &self.master) {
                (None, _) => StageState::Undefined,
                (Some(_), None) => StageState::Deferred,
                _ if self.master_stale => StageState::Stale,
                _ => StageState::Generated,
            },
            Stage::Two => {
                if self.second_recipe.is_none() {
                    StageState::Undefined
                } else if self.second_stage_stale {
                    StageState::Stale
                } else if self.partitions.iter().all(ScenarioPartition::is_generated) {
                    StageState::Generated
                } else {
                    StageState::Deferred
                }
            }
        }
    }

    /// True until the master and every subproblem are generated and current
    pub fn deferred(&self) -> bool {
        self.stage_state(Stage::One) != StageState::Generated
            || (self.nscenarios() > 0 && self.stage_state(Stage::Two) != StageState::Generated)
    }

    // ---- queries ----

    pub fn nscenarios(&self) -> usize {
        self.partitions.iter().map(ScenarioPartition::len).sum()
    }

    pub fn nsubproblems(&self) -> usize {
        self.partitions.iter().map(ScenarioPartition::generated_count).sum()
    }

    pub fn nworkers(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions.iter().map(ScenarioPartition::len).collect()
    }

    pub fn partitions(&self) -> &[ScenarioPartition<S>] {
        &self.partitions
    }

    pub(crate) fn offsets(&self) -> Vec<usize> {
        self.partitions
            .iter()
            .scan(0, |acc, p| {
                let offset = *acc;
                *acc += p.len();
                Some(offset)
            })
            .collect()
    }

    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        let mut rest = index;
        for (p, partition) in self.partitions.iter().enumerate() {
            if rest < partition.len() {
                return Ok((p, rest));
            }
            rest -= partition.len();
        }
        Err(SpError::IndexOutOfRange {
            index,
            len: self.nscenarios(),
        })
    }

    pub fn scenario(&self, index: usize) -> Result<&Scenario<S>> {
        let (p, local) = self.locate(index)?;
        Ok(&self.partitions[p].scenarios()[local])
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario<S>> {
        self.partitions.iter().flat_map(|p| p.scenarios().iter())
    }

    pub fn subproblem(&self, index: usize) -> Result<&LinearModel> {
        let (p, local) = self.locate(index)?;
        self.partitions[p]
            .subproblem(local)
            .ok_or(SpError::NotGenerated { stage: Stage::Two })
    }

    /// Scenario together with its subproblem, if generated
    pub(crate) fn entry(&self, index: usize) -> Result<(Scenario<S>, Option<LinearModel>)> {
        let (p, local) = self.locate(index)?;
        let partition = &self.partitions[p];
        Ok((
            partition.scenarios()[local].clone(),
            partition.subproblem(local).cloned(),
        ))
    }

    /// Total scenario probability
    pub fn probability(&self) -> f64 {
        self.scenarios().map(Scenario::probability).sum()
    }

    /// Probabilities must sum to one. A program without scenarios is
    /// deterministic and always passes.
    pub fn validate(&self) -> Result<()> {
        if self.nscenarios() == 0 {
            return Ok(());
        }
        let total = self.probability();
        if (total - 1.0).abs() > self.probability_tolerance {
            return Err(SpError::ProbabilityMismatch { total });
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn stage_one_model(&self) -> Result<&LinearModel> {
        self.master
            .as_ref()
            .ok_or(SpError::NotGenerated { stage: Stage::One })
    }

    /// `(columns, rows)` of the first-stage model
    pub fn first_stage_dims(&self) -> Result<(usize, usize)> {
        let master = self.stage_one_model()?;
        Ok((master.num_variables(), master.num_rows()))
    }

    pub fn decision_length(&self) -> Result<usize> {
        Ok(self.stage_one_model()?.num_variables())
    }

    /// Second-stage columns of the first subproblem
    pub fn recourse_length(&self) -> Result<usize> {
        if self.nscenarios() == 0 {
            return Ok(0);
        }
        Ok(self.subproblem(0)?.num_variables())
    }

    /// First-stage coupling of subproblem `index` as `(row, column, coefficient)`
    pub fn masterterms(&self, index: usize) -> Result<Vec<(usize, usize, f64)>> {
        Ok(self.subproblem(index)?.masterterms())
    }

    pub fn decision_context(&self) -> &DecisionContext {
        &self.decisions
    }

    // ---- committed solution ----

    pub fn solution_handle(&self) -> SolutionHandle {
        self.solution.clone()
    }

    pub fn committed(&self) -> Result<Arc<CommittedSolution>> {
        self.solution.current().ok_or(SpError::StaleStateConflict)
    }

    pub fn optimal_decision(&self) -> Result<Vec<f64>> {
        Ok(self.committed()?.first_stage.primal.clone())
    }

    pub fn optimal_value(&self) -> Result<f64> {
        Ok(self.committed()?.objective)
    }

    pub fn first_stage_duals(&self) -> Result<Vec<f64>> {
        Ok(self.committed()?.first_stage.duals.clone())
    }

    pub fn first_stage_reduced_costs(&self) -> Result<Vec<f64>> {
        Ok(self.committed()?.first_stage.reduced_costs.clone())
    }

    pub fn scenario_solution(&self, index: usize) -> Result<ModelSolution> {
        let committed = self.committed()?;
        committed
            .scenarios
            .get(index)
            .cloned()
            .ok_or(SpError::IndexOutOfRange {
                index,
                len: committed.scenarios.len(),
            })
    }

    /// Single write path for solver results. Dimensions are checked against
    /// the generated models before anything becomes visible to readers.
    pub fn fill_solution(&mut self, solution: CommittedSolution) -> Result<()> {
        let check = |expected: usize, found: usize| {
            if expected == found {
                Ok(())
            } else {
                Err(SpError::DimensionMismatch { expected, found })
            }
        };
        check(self.decision_length()?, solution.first_stage.primal.len())?;
        check(self.nscenarios(), solution.scenarios.len())?;
        for (index, scenario) in solution.scenarios.iter().enumerate() {
            check(self.subproblem(index)?.num_variables(), scenario.primal.len())?;
        }

        if let Some(master) = self.master.as_mut() {
            master.set_solution(solution.first_stage.clone());
        }
        let models = self.partitions.iter_mut().flat_map(|p| p.subproblems_mut());
        for (model, scenario) in models.zip(&solution.scenarios) {
            model.set_solution(scenario.clone());
        }
        info!(program = %self.id, objective = solution.objective, "solution committed");
        self.solution.publish(solution);
        Ok(())
    }

    fn invalidate_solution(&mut self) {
        if let Some(master) = self.master.as_mut() {
            master.clear_solution();
        }
        self.partitions
            .iter_mut()
            .flat_map(|p| p.subproblems_mut())
            .for_each(LinearModel::clear_solution);
        self.solution.clear();
    }
}
