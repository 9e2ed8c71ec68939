use proptest::prelude::*;
use stochastic_programs::{
    ConstraintSense, ObjectiveSense, Placement, ProgramConfig, Recipe, Scenario, StochasticProgram,
};

type Program = StochasticProgram<(), (), f64>;

fn program(workers: usize) -> Program {
    let config = ProgramConfig {
        workers,
        ..ProgramConfig::default()
    };
    let mut sp = Program::with_config((), (), &config).unwrap();
    sp.register_recipe(
        Recipe::stage_one(|_, model| {
            let x = model.add_variable("x", 0.0, 100.0);
            model.set_objective(ObjectiveSense::Minimize, 1.0 * x)?;
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
    sp
}

fn payloads(sp: &Program) -> Vec<f64> {
    sp.scenarios().map(|s| *s.data()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn least_loaded_keeps_partitions_level(workers in 1usize..6, demands in prop::collection::vec(0.0f64..50.0, 0..40)) {
        let mut sp = program(workers);
        for d in &demands {
            sp.add_scenario(Scenario::new(*d, 0.0).unwrap(), Placement::LeastLoaded, true).unwrap();
        }
        let sizes = sp.partition_sizes();
        let spread = sizes.iter().max().unwrap() - sizes.iter().min().unwrap();
        prop_assert!(spread <= 1, "sizes {:?}", sizes);
        prop_assert_eq!(sp.nscenarios(), demands.len());
    }

    #[test]
    fn bulk_insert_keeps_partitions_level(workers in 1usize..6, first in 0usize..20, second in 0usize..20) {
        let mut sp = program(workers);
        sp.add_scenarios((0..first).map(|i| Scenario::new(i as f64, 0.0).unwrap()), Placement::Worker(0), true).unwrap();
        sp.add_scenarios((0..second).map(|i| Scenario::new(i as f64, 0.0).unwrap()), Placement::LeastLoaded, true).unwrap();
        prop_assert_eq!(sp.nscenarios(), first + second);
        let sizes = sp.partition_sizes();
        if second >= first * (workers - 1) {
            prop_assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1, "sizes {:?}", sizes);
        } else {
            // the pinned partition is already the largest and receives nothing
            prop_assert_eq!(sizes[0], first);
            let rest = &sizes[1..];
            prop_assert!(rest.iter().max().unwrap() - rest.iter().min().unwrap() <= 1, "sizes {:?}", sizes);
        }
    }

    #[test]
    fn rebalance_preserves_order(workers in 1usize..5, target in 1usize..7, demands in prop::collection::vec(0.0f64..50.0, 1..30)) {
        let mut sp = program(workers);
        let p = 1.0 / demands.len() as f64;
        sp.add_scenarios(demands.iter().map(|d| Scenario::new(*d, p).unwrap()), Placement::LeastLoaded, false).unwrap();
        let before = payloads(&sp);
        let generated = sp.nsubproblems();

        sp.rebalance(target).unwrap();
        prop_assert_eq!(sp.nworkers(), target);
        prop_assert_eq!(payloads(&sp), before);
        prop_assert_eq!(sp.nsubproblems(), generated);
        let sizes = sp.partition_sizes();
        prop_assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
        for (index, d) in demands.iter().enumerate() {
            prop_assert_eq!(sp.subproblem(index).unwrap().rows()[0].rhs, *d);
        }
    }

    #[test]
    fn generate_is_idempotent(workers in 1usize..4, demands in prop::collection::vec(0.0f64..50.0, 1..12)) {
        let mut sp = program(workers);
        let p = 1.0 / demands.len() as f64;
        sp.add_scenarios(demands.iter().map(|d| Scenario::new(*d, p).unwrap()), Placement::LeastLoaded, true).unwrap();
        prop_assert!(sp.deferred());

        sp.generate().unwrap();
        let first: Vec<_> = (0..demands.len()).map(|i| sp.subproblem(i).unwrap().clone()).collect();
        sp.generate().unwrap();
        let second: Vec<_> = (0..demands.len()).map(|i| sp.subproblem(i).unwrap().clone()).collect();
        prop_assert!(!sp.deferred());
        prop_assert_eq!(first, second);
        prop_assert!(sp.validate().is_ok());
    }

    #[test]
    fn sampled_probabilities_sum_to_one(n in 1usize..50, extra in 0usize..10) {
        let mut sp = program(3);
        let mut next = 0.0;
        let mut sampler = || { next += 1.0; next };
        sp.sample(&mut sampler, n, true).unwrap();
        sp.sample(&mut sampler, extra, true).unwrap();
        prop_assert_eq!(sp.nscenarios(), n + extra);
        prop_assert!((sp.probability() - 1.0).abs() < 1e-9);
    }
}
