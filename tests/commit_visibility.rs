mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::farm;
use stochastic_programs::{optimize, ExtensiveFormSolver, ProgramConfig, TerminalStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_commits() {
    let mut sp = farm(&ProgramConfig {
        workers: 2,
        ..ProgramConfig::default()
    });
    let handle = sp.solution_handle();
    assert!(!handle.is_committed());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    if let Some(solution) = handle.current() {
                        assert_eq!(solution.decision().len(), 2);
                        assert!(!solution.scenarios.is_empty());
                        assert!(solution.scenarios.iter().all(|s| s.primal.len() == 2));
                        assert!(solution.objective.is_finite());
                        seen += 1;
                    }
                    tokio::time::sleep(Duration::from_micros(50)).await;
                }
                seen
            })
        })
        .collect();

    let writer_done = Arc::clone(&done);
    let committed = tokio::task::spawn_blocking(move || {
        let solver = ExtensiveFormSolver::default();
        let mut objectives = Vec::new();
        for demand in [200.0, 250.0, 300.0, 350.0] {
            let mut next = vec![-26.0, -30.0, demand, demand];
            let mut sampler = move || {
                next[2] += 10.0;
                next.clone()
            };
            sp.sample(&mut sampler, 1, false).unwrap();
            assert_eq!(optimize(&mut sp, &solver).unwrap(), TerminalStatus::Optimal);
            objectives.push(sp.optimal_value().unwrap());
            std::thread::sleep(Duration::from_millis(2));
        }
        writer_done.store(true, Ordering::Release);
        (sp.nscenarios(), objectives)
    })
    .await
    .unwrap();

    let (nscenarios, objectives) = committed;
    assert_eq!(nscenarios, 6);
    assert_eq!(objectives.len(), 4);
    for reader in readers {
        reader.await.unwrap();
    }
    assert!(handle.is_committed());
}
