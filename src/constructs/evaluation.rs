use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use super::ensure_generated;
use crate::config::{ProgramConfig, SamplingConfig};
use crate::error::{Result, SpError};
use crate::model::{ConstraintSense, LinearModel};
use crate::program::{StochasticModel, StochasticProgram};
use crate::scenario::{Sampler, ScenarioData};
use crate::solver::{LpSolver, SolveStatus};

const FEASIBILITY_TOLERANCE: f64 = 1e-8;

/// Two-sided interval around a sampled estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub confidence: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn length(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }
}

/// First-stage objective at `x`, after checking `x` against the first-stage
/// bounds and rows
fn first_stage_value(master: &LinearModel, x: &[f64]) -> Result<f64> {
    if x.len() != master.num_variables() {
        return Err(SpError::DimensionMismatch {
            expected: master.num_variables(),
            found: x.len(),
        });
    }
    let tol = FEASIBILITY_TOLERANCE;
    let within_bounds = master
        .variables()
        .iter()
        .zip(x)
        .all(|(v, value)| *value >= v.lower - tol && *value <= v.upper + tol);
    let rows_hold = master.rows().iter().all(|row| {
        let activity = row.activity(x);
        match row.sense {
            ConstraintSense::Le => activity <= row.rhs + tol,
            ConstraintSense::Ge => activity >= row.rhs - tol,
            ConstraintSense::Eq => (activity - row.rhs).abs() <= tol,
        }
    });
    if !(within_bounds && rows_hold) {
        debug!(decision = ?x, "first-stage decision is infeasible");
        return Err(SpError::solve(SolveStatus::Infeasible));
    }
    Ok(master.objective_value(x))
}

/// Recourse values of every scenario at `x`, in flattened order
fn recourse_values<D1, D2, S>(program: &StochasticProgram<D1, D2, S>, x: &[f64], solver: &dyn LpSolver) -> Result<Vec<f64>>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    let offsets = program.offsets();
    let per_partition = program.transport().map(program.partitions(), |partition| {
        partition.recourse_values(offsets[partition.worker()], x, solver)
    });
    let mut values = Vec::with_capacity(program.nscenarios());
    for partition in per_partition {
        values.extend(partition?);
    }
    Ok(values)
}

/// Second-stage model of scenario `index` with the first-stage decision fixed
pub fn outcome_model<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, index: usize, x: &[f64]) -> Result<LinearModel>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    program.subproblem(index)?.outcome(x)
}

/// Objective of committing to `x`: first-stage cost plus the
/// probability-weighted recourse over every scenario
pub fn evaluate_decision<D1, D2, S>(program: &mut StochasticProgram<D1, D2, S>, x: &[f64], solver: &dyn LpSolver) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    program.validate()?;
    let first_stage = first_stage_value(program.stage_one_model()?, x)?;
    let recourse = recourse_values(program, x, solver)?;
    let expected: f64 = program
        .scenarios()
        .zip(&recourse)
        .map(|(scenario, q)| scenario.probability() * q)
        .sum();
    debug!(program = %program.id(), first_stage, expected, "decision evaluated");
    Ok(first_stage + expected)
}

/// Objective of committing to `x` if scenario `index` occurs
pub fn evaluate_decision_in<D1, D2, S>(
    program: &mut StochasticProgram<D1, D2, S>,
    index: usize,
    x: &[f64],
    solver: &dyn LpSolver,
) -> Result<f64>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    ensure_generated(program)?;
    let first_stage = first_stage_value(program.stage_one_model()?, x)?;
    let outcome = program.subproblem(index)?.outcome(x)?;
    let recourse = solver.solve(&outcome).map_err(|e| e.in_scenario(index))?;
    Ok(first_stage + recourse.objective)
}

/// Statistical estimate of the objective of `x` over `config.samples`
/// sampled scenarios, with a normal-approximation confidence interval
pub fn evaluate_decision_sampled<D1, D2, S>(
    model: &StochasticModel<D1, D2, S>,
    first_stage: D1,
    second_stage: D2,
    x: &[f64],
    sampler: &mut impl Sampler<S>,
    config: &SamplingConfig,
    solver: &dyn LpSolver,
) -> Result<ConfidenceInterval>
where
    D1: Send + Sync + 'static,
    D2: Send + Sync + 'static,
    S: ScenarioData,
{
    if config.samples < 2 {
        return Err(SpError::Config(format!(
            "sampled evaluation needs at least 2 samples, got {}",
            config.samples
        )));
    }
    let program = model.saa(first_stage, second_stage, sampler, config.samples, &ProgramConfig::default())?;
    let first_stage = first_stage_value(program.stage_one_model()?, x)?;
    let values: Vec<f64> = recourse_values(&program, x, solver)?
        .into_iter()
        .map(|q| first_stage + q)
        .collect();

    let interval = normal_interval(&values, config.confidence)?;
    info!(
        samples = values.len(),
        mean = interval.midpoint(),
        half_width = interval.length() / 2.0,
        confidence = config.confidence,
        "sampled decision evaluation"
    );
    Ok(interval)
}

/// Normal-approximation interval around the mean of `values`
pub(crate) fn normal_interval(values: &[f64], confidence: f64) -> Result<ConfidenceInterval> {
    let mean = values.iter().mean();
    let std_dev = values.iter().std_dev();
    let normal = Normal::new(0.0, 1.0).map_err(|e| SpError::Config(e.to_string()))?;
    let z = normal.inverse_cdf(1.0 - (1.0 - confidence) / 2.0);
    let half_width = z * std_dev / (values.len() as f64).sqrt();
    Ok(ConfidenceInterval {
        lower: mean - half_width,
        upper: mean + half_width,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectiveSense;
    use crate::program::{Placement, Recipe};
    use crate::scenario::{DistributionSampler, Scenario};
    use crate::solver::MinilpSolver;
    use approx::assert_abs_diff_eq;
    use rand_distr::Uniform;

    fn recipes() -> StochasticModel<f64, f64, f64> {
        StochasticModel::new(
            |cost, model| {
                let x = model.add_variable("x", 0.0, 10.0);
                model.set_objective(ObjectiveSense::Minimize, *cost * x)?;
                Ok(())
            },
            |penalty, decisions, demand, model| {
                let y = model.add_variable("y", 0.0, f64::INFINITY);
                model.set_objective(ObjectiveSense::Minimize, *penalty * y)?;
                model.add_constraint("short", y + decisions.at(0)?, ConstraintSense::Ge, *demand)?;
                Ok(())
            },
        )
    }

    fn program() -> StochasticProgram<f64, f64, f64> {
        let mut sp = StochasticProgram::new(1.0, 3.0);
        sp.register_recipe(
            Recipe::stage_one(|cost, model| {
                let x = model.add_variable("x", 0.0, 10.0);
                model.set_objective(ObjectiveSense::Minimize, *cost * x)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.register_recipe(
            Recipe::stage_two(|penalty, decisions, demand, model| {
                let y = model.add_variable("y", 0.0, f64::INFINITY);
                model.set_objective(ObjectiveSense::Minimize, *penalty * y)?;
                model.add_constraint("short", y + decisions.at(0)?, ConstraintSense::Ge, *demand)?;
                Ok(())
            }),
            true,
        )
        .unwrap();
        sp.add_scenarios(
            [(2.0, 0.5), (6.0, 0.5)].map(|(d, p)| Scenario::new(d, p).unwrap()),
            Placement::LeastLoaded,
            true,
        )
        .unwrap();
        sp
    }

    #[test]
    fn test_evaluate_decision_generates_and_weights() {
        let mut sp = program();
        assert!(sp.deferred());
        let value = evaluate_decision(&mut sp, &[4.0], &MinilpSolver::new()).unwrap();
        // 4 + 0.5·0 + 0.5·3·2
        assert_abs_diff_eq!(value, 7.0, epsilon = 1e-7);
        assert!(!sp.deferred());

        let single = evaluate_decision_in(&mut sp, 1, &[4.0], &MinilpSolver::new()).unwrap();
        assert_abs_diff_eq!(single, 10.0, epsilon = 1e-7);
    }

    #[test]
    fn test_infeasible_or_misshaped_decisions() {
        let mut sp = program();
        let solver = MinilpSolver::new();
        let err = evaluate_decision(&mut sp, &[11.0], &solver).unwrap_err();
        assert_eq!(err.solve_status(), Some(SolveStatus::Infeasible));
        assert!(matches!(
            evaluate_decision(&mut sp, &[1.0, 2.0], &solver),
            Err(SpError::DimensionMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_outcome_model_fixes_decision() {
        let mut sp = program();
        let outcome = outcome_model(&mut sp, 1, &[4.0]).unwrap();
        assert_eq!(outcome.rows()[0].rhs, 2.0);
        assert!(outcome.masterterms().is_empty());
    }

    #[test]
    fn test_sampled_interval_covers_exact_value() {
        // demand ~ U(0, 10), x = 10 leaves no shortfall: every sample costs 10
        let mut sampler = DistributionSampler::new(Uniform::new(0.0, 10.0), Some(3));
        let config = SamplingConfig {
            seed: Some(3),
            samples: 50,
            ..SamplingConfig::default()
        };
        let interval =
            evaluate_decision_sampled(&recipes(), 1.0, 3.0, &[10.0], &mut sampler, &config, &MinilpSolver::new())
                .unwrap();
        assert!(interval.contains(10.0));
        assert!(interval.length() < 1e-6);

        // x = 0 pays 3·ξ, whose mean is 15
        let mut sampler = DistributionSampler::new(Uniform::new(0.0, 10.0), Some(11));
        let config = SamplingConfig {
            samples: 400,
            ..config
        };
        let interval =
            evaluate_decision_sampled(&recipes(), 1.0, 3.0, &[0.0], &mut sampler, &config, &MinilpSolver::new())
                .unwrap();
        assert!(interval.lower > 12.0 && interval.upper < 18.0);
        assert!(interval.length() > 0.0);
    }

    #[test]
    fn test_configured_seed_reproduces_the_interval() {
        let config = SamplingConfig {
            seed: Some(19),
            samples: 40,
            ..SamplingConfig::default()
        };
        let run = || {
            let mut sampler = DistributionSampler::from_config(Uniform::new(0.0, 10.0), &config);
            evaluate_decision_sampled(&recipes(), 1.0, 3.0, &[5.0], &mut sampler, &config, &MinilpSolver::new())
                .unwrap()
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.length() > 0.0);
    }
}
