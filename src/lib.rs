//! Two-stage stochastic programs
//!
//! A [`StochasticProgram`] holds first- and second-stage data, recipes that
//! build the stage models, and scenarios spread over worker partitions.
//! Model generation is deferred until asked for, solving goes through a
//! [`StructuredSolver`] such as the extensive form or the L-shaped method,
//! and the [`constructs`] module derives the usual value measures.

pub mod config;
pub mod constructs;
pub mod error;
pub mod model;
pub mod program;
pub mod scenario;
pub mod solver;
pub mod structured;
pub mod telemetry;

pub use config::{Config, LShapedConfig, ProgramConfig, SamplingConfig};
pub use error::{Result, SpError};
pub use model::{ConstraintSense, DecisionRef, LinearExpr, LinearModel, ModelSolution, ObjectiveSense, VarRef};
pub use program::{
    DecisionContext, Placement, Recipe, Stage, StageState, StochasticModel, StochasticProgram, Transport,
    TransportKind,
};
pub use scenario::{DistributionSampler, Probability, Sampler, Scenario, ScenarioData, VectorSampler};
pub use solver::{LpSolver, MinilpSolver, SolveStatus};
pub use structured::{
    optimize, ExtensiveFormSolver, LShapedSolver, StructuredModel, StructuredSolver, TerminalStatus,
};
