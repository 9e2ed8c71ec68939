//! Stochastic program container
//!
//! A [`StochasticProgram`] owns stage data, stage recipes, the generated
//! master model and the scenario partitions with their subproblems.

pub mod container;
pub mod distribution;
pub mod model;
pub mod partition;
pub mod recipe;
pub mod solution;
pub mod stage;

pub use container::StochasticProgram;
pub use distribution::{Placement, Transport, TransportKind};
pub use model::StochasticModel;
pub use partition::ScenarioPartition;
pub use recipe::{DecisionContext, FirstStageRecipe, Recipe, SecondStageRecipe};
pub use solution::{CommittedSolution, SolutionHandle};
pub use stage::{Stage, StageState, StagedData};
