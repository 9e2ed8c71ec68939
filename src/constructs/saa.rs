//! Statistical bounds on the optimum of a sampled model
//!
//! The optimal values of independent SAA instances average below the true
//! optimum of a minimizing program (above it when maximizing), while the
//! sampled evaluation of any fixed decision averages on the other side.
//! Together they bracket the optimum.

use tracing::{debug, info};

use super::evaluation::{evaluate_decision_sampled, normal_interval, ConfidenceInterval};
use super::{lp_backend, sense_sign, vrp};
use crate::config::{ProgramConfig, SamplingConfig};
use crate::error::{Result, SpError};
use crate::program::StochasticModel;
use crate::scenario::{Sampler, ScenarioData};
use crate::structured::StructuredSolver;

fn check_sizes(config: &SamplingConfig) -> Result<()> {
    if config.samples < 2 || config.batches < 2 {
        return Err(SpError::Config(format!(
            "sampled bounds need at least 2 samples and 2 batches, got {} and {}",
            config.samples, config.batches
        )));
    }
    Ok(())
}

/// Interval around the mean optimal value of `config.batches` SAA instances
/// of `config.samples` scenarios each.
///
/// For a minimizing program this is a statistical lower bound on the true
/// optimum; for a maximizing one it bounds it from above.
pub fn lower_bound<D1, D2, S>(
    model: &StochasticModel<D1, D2, S>,
    first_stage: &D1,
    second_stage: &D2,
    sampler: &mut impl Sampler<S>,
    config: &SamplingConfig,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<ConfidenceInterval>
where
    D1: Clone + Send + Sync + 'static,
    D2: Clone + Send + Sync + 'static,
    S: ScenarioData,
{
    check_sizes(config)?;
    let mut values = Vec::with_capacity(config.batches);
    for batch in 0..config.batches {
        let mut program = model.saa(
            first_stage.clone(),
            second_stage.clone(),
            sampler,
            config.samples,
            &ProgramConfig::default(),
        )?;
        let value = vrp(&mut program, solver)?;
        debug!(batch, value, "SAA instance solved");
        values.push(value);
    }
    let interval = normal_interval(&values, config.confidence)?;
    info!(
        batches = config.batches,
        samples = config.samples,
        lower = interval.lower,
        upper = interval.upper,
        "SAA optimum bound"
    );
    Ok(interval)
}

/// Interval around the true optimum at level `config.confidence`.
///
/// One side comes from [`lower_bound`], the other from the sampled
/// evaluation of the decision of a fresh SAA instance. Each side is built at
/// level `1 - (1 - confidence) / 2`.
pub fn confidence_interval<D1, D2, S>(
    model: &StochasticModel<D1, D2, S>,
    first_stage: &D1,
    second_stage: &D2,
    sampler: &mut impl Sampler<S>,
    config: &SamplingConfig,
    solver: &dyn StructuredSolver<D1, D2, S>,
) -> Result<ConfidenceInterval>
where
    D1: Clone + Send + Sync + 'static,
    D2: Clone + Send + Sync + 'static,
    S: ScenarioData,
{
    check_sizes(config)?;
    let sided = SamplingConfig {
        confidence: 1.0 - (1.0 - config.confidence) / 2.0,
        ..config.clone()
    };
    let bound = lower_bound(model, first_stage, second_stage, sampler, &sided, solver)?;

    let mut program = model.saa(
        first_stage.clone(),
        second_stage.clone(),
        sampler,
        config.samples,
        &ProgramConfig::default(),
    )?;
    vrp(&mut program, solver)?;
    let decision = program.optimal_decision()?;
    let sigma = sense_sign(&program)?;
    let evaluation = evaluate_decision_sampled(
        model,
        first_stage.clone(),
        second_stage.clone(),
        &decision,
        sampler,
        &sided,
        lp_backend(solver).as_ref(),
    )?;

    let (lower, upper) = if sigma > 0.0 {
        (bound.lower, evaluation.upper)
    } else {
        (evaluation.lower, bound.upper)
    };
    info!(lower, upper, confidence = config.confidence, "optimum confidence interval");
    Ok(ConfidenceInterval {
        lower,
        upper,
        confidence: config.confidence,
    })
}
