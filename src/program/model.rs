use std::sync::Arc;
use tracing::info;

use super::container::StochasticProgram;
use super::distribution::Placement;
use super::recipe::{DecisionContext, FirstStageRecipe, Recipe, SecondStageRecipe};
use crate::config::ProgramConfig;
use crate::error::{Result, SpError};
use crate::model::LinearModel;
use crate::scenario::{Sampler, Scenario, ScenarioData};

/// A reusable pair of stage recipes
///
/// Instantiating it with stage data and scenarios yields a generated
/// [`StochasticProgram`].
pub struct StochasticModel<D1, D2, S> {
    first: Arc<dyn FirstStageRecipe<D1>>,
    second: Arc<dyn SecondStageRecipe<D2, S>>,
}

impl<D1, D2, S> Clone for StochasticModel<D1, D2, S> {
    fn clone(&self) -> Self {
        Self {
            first: Arc::clone(&self.first),
            second: Arc::clone(&self.second),
        }
    }
}

impl<D1, D2, S> StochasticModel<D1, D2, S>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    pub fn new<F1, F2>(first: F1, second: F2) -> Self
    where
        F1: Fn(&D1, &mut LinearModel) -> anyhow::Result<()> + Send + Sync + 'static,
        F2: Fn(&D2, &DecisionContext, &S, &mut LinearModel) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            first: Arc::new(first),
            second: Arc::new(second),
        }
    }

    /// Pair two recipes; they must cover stage one and stage two in that order
    pub fn from_recipes(first: Recipe<D1, D2, S>, second: Recipe<D1, D2, S>) -> Result<Self> {
        match (first, second) {
            (Recipe::StageOne(first), Recipe::StageTwo(second)) => Ok(Self { first, second }),
            (first, second) => Err(SpError::InvalidModel(format!(
                "expected recipes for stage 1 and stage 2, got {} and {}",
                first.stage(),
                second.stage()
            ))),
        }
    }

    fn empty_program(&self, first_stage: D1, second_stage: D2, config: &ProgramConfig) -> Result<StochasticProgram<D1, D2, S>> {
        let mut program = StochasticProgram::with_config(first_stage, second_stage, config)?;
        program.register_recipe(Recipe::StageOne(Arc::clone(&self.first)), true)?;
        program.register_recipe(Recipe::StageTwo(Arc::clone(&self.second)), true)?;
        Ok(program)
    }

    /// Generated program over the given scenarios
    pub fn instantiate(
        &self,
        first_stage: D1,
        second_stage: D2,
        scenarios: Vec<Scenario<S>>,
        config: &ProgramConfig,
    ) -> Result<StochasticProgram<D1, D2, S>> {
        let mut program = self.empty_program(first_stage, second_stage, config)?;
        program.add_scenarios(scenarios, Placement::LeastLoaded, true)?;
        program.generate()?;
        info!(program = %program.id(), scenarios = program.nscenarios(), "model instantiated");
        Ok(program)
    }

    /// Sample average approximation with `n` equiprobable sampled scenarios
    pub fn saa(
        &self,
        first_stage: D1,
        second_stage: D2,
        sampler: &mut impl Sampler<S>,
        n: usize,
        config: &ProgramConfig,
    ) -> Result<StochasticProgram<D1, D2, S>> {
        let mut program = self.empty_program(first_stage, second_stage, config)?;
        program.sample(sampler, n, false)?;
        program.generate()?;
        Ok(program)
    }
}
