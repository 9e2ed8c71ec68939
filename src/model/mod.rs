//! Linear model handles produced by stage recipes.

pub mod expr;
pub mod linear;

pub use expr::{DecisionRef, LinearExpr, VarRef};
pub use linear::{ConstraintSense, LinearModel, ModelSolution, ObjectiveSense, Row, Variable};
