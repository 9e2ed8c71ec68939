//! Shared fixtures for the integration tests
#![allow(dead_code)]

use stochastic_programs::{
    ConstraintSense, ObjectiveSense, Placement, ProgramConfig, Recipe, Scenario, StochasticProgram,
};

/// Payload `[q1, q2, d1, d2]`: unit revenues (negated) and demand caps
pub type Farm = StochasticProgram<(), (), Vec<f64>>;

pub const FARM_OPTIMUM: f64 = -855.833_333;

pub fn farm_scenarios() -> Vec<Scenario<Vec<f64>>> {
    vec![
        Scenario::new(vec![-24.0, -28.0, 500.0, 100.0], 0.4).unwrap(),
        Scenario::new(vec![-28.0, -32.0, 300.0, 300.0], 0.6).unwrap(),
    ]
}

/// min 100 x1 + 150 x2 + E[q·y]
/// s.t. x1 + x2 ≤ 120, x1 ≥ 40, x2 ≥ 20,
///      6 y1 + 10 y2 ≤ 60 x1, 8 y1 + 5 y2 ≤ 80 x2, 0 ≤ y ≤ d
pub fn farm(config: &ProgramConfig) -> Farm {
    let mut sp = Farm::with_config((), (), config).unwrap();
    sp.register_recipe(
        Recipe::stage_one(|_, model| {
            let x1 = model.add_variable("x1", 40.0, f64::INFINITY);
            let x2 = model.add_variable("x2", 20.0, f64::INFINITY);
            model.set_objective(ObjectiveSense::Minimize, 100.0 * x1 + 150.0 * x2)?;
            model.add_constraint("land", x1 + x2, ConstraintSense::Le, 120.0)?;
            Ok(())
        }),
        true,
    )
    .unwrap();
    sp.register_recipe(
        Recipe::stage_two(|_, decisions, xi: &Vec<f64>, model| {
            let y1 = model.add_variable("y1", 0.0, xi[2]);
            let y2 = model.add_variable("y2", 0.0, xi[3]);
            model.set_objective(ObjectiveSense::Minimize, xi[0] * y1 + xi[1] * y2)?;
            model.add_constraint(
                "first",
                6.0 * y1 + 10.0 * y2 - 60.0 * decisions.decision("x1")?,
                ConstraintSense::Le,
                0.0,
            )?;
            model.add_constraint(
                "second",
                8.0 * y1 + 5.0 * y2 - 80.0 * decisions.decision("x2")?,
                ConstraintSense::Le,
                0.0,
            )?;
            Ok(())
        }),
        true,
    )
    .unwrap();
    sp.add_scenarios(farm_scenarios(), Placement::LeastLoaded, true).unwrap();
    sp
}

/// min 100 x + E[q·max(d − x, 0)],  x ∈ [40, 120], payload `[q, d]`
pub fn shortage(scenarios: &[(f64, f64, f64)]) -> StochasticProgram<f64, (), Vec<f64>> {
    let mut sp = StochasticProgram::new(100.0, ());
    sp.register_recipe(
        Recipe::stage_one(|cost, model| {
            let x = model.add_variable("x", 40.0, 120.0);
            model.set_objective(ObjectiveSense::Minimize, *cost * x)?;
            Ok(())
        }),
        true,
    )
    .unwrap();
    sp.register_recipe(
        Recipe::stage_two(|_, decisions, xi: &Vec<f64>, model| {
            let short = model.add_variable("short", 0.0, f64::INFINITY);
            model.set_objective(ObjectiveSense::Minimize, xi[0] * short)?;
            model.add_constraint("cover", short + decisions.at(0)?, ConstraintSense::Ge, xi[1])?;
            Ok(())
        }),
        true,
    )
    .unwrap();
    sp.add_scenarios(
        scenarios.iter().map(|(q, d, p)| Scenario::new(vec![*q, *d], *p).unwrap()),
        Placement::LeastLoaded,
        true,
    )
    .unwrap();
    sp
}
