use serde::{Deserialize, Serialize};

use super::{LinearExpr, VarRef};
use crate::error::{Result, SpError};

/// Direction of optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectiveSense {
    #[default]
    Minimize,
    Maximize,
}

impl ObjectiveSense {
    /// +1 for minimization, -1 for maximization
    pub fn sign(&self) -> f64 {
        match self {
            ObjectiveSense::Minimize => 1.0,
            ObjectiveSense::Maximize => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ConstraintSense {
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub cost: f64,
}

/// A linear row. `decision_terms` reference first-stage columns and are only
/// present in second-stage models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub name: String,
    pub terms: Vec<(usize, f64)>,
    pub decision_terms: Vec<(usize, f64)>,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

impl Row {
    /// Row activity for the given local values (decision terms excluded)
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|(col, c)| c * values[*col]).sum()
    }
}

/// Values read back from a solved model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSolution {
    pub objective: f64,
    pub primal: Vec<f64>,
    /// Row duals: sensitivity of the optimal value to each right-hand side
    pub duals: Vec<f64>,
    pub reduced_costs: Vec<f64>,
}

/// Sparse linear optimization model
///
/// This is the model handle that stage recipes fill in. A second-stage
/// model may reference first-stage columns through `decision_terms`; those
/// references are the master terms used for cut generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearModel {
    pub name: String,
    sense: ObjectiveSense,
    variables: Vec<Variable>,
    rows: Vec<Row>,
    objective_constant: f64,
    solution: Option<ModelSolution>,
}

impl LinearModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn sense(&self) -> ObjectiveSense {
        self.sense
    }

    pub fn set_sense(&mut self, sense: ObjectiveSense) {
        self.sense = sense;
    }

    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarRef {
        self.variables.push(Variable {
            name: name.into(),
            lower,
            upper,
            cost: 0.0,
        });
        VarRef(self.variables.len() - 1)
    }

    /// Add `n` columns named `prefix[i]` sharing the same bounds
    pub fn add_variables(&mut self, prefix: &str, n: usize, lower: f64, upper: f64) -> Vec<VarRef> {
        (0..n)
            .map(|i| self.add_variable(format!("{}[{}]", prefix, i), lower, upper))
            .collect()
    }

    /// Replace the objective. Decision terms are not allowed here.
    pub fn set_objective(&mut self, sense: ObjectiveSense, expr: impl Into<LinearExpr>) -> Result<()> {
        let expr = expr.into().compress();
        if expr.has_decision_terms() {
            return Err(SpError::InvalidModel(format!(
                "{}: objective may not reference first-stage decisions",
                self.name
            )));
        }
        self.check_columns(&expr)?;
        self.sense = sense;
        self.variables.iter_mut().for_each(|v| v.cost = 0.0);
        for (col, coeff) in expr.terms {
            self.variables[col].cost = coeff;
        }
        self.objective_constant = expr.constant;
        Ok(())
    }

    /// Add `expr (sense) rhs`; the expression constant is moved to the right-hand side.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: impl Into<LinearExpr>,
        sense: ConstraintSense,
        rhs: f64,
    ) -> Result<usize> {
        let expr = expr.into().compress();
        self.check_columns(&expr)?;
        self.rows.push(Row {
            name: name.into(),
            terms: expr.terms,
            decision_terms: expr.decision_terms,
            sense,
            rhs: rhs - expr.constant,
        });
        Ok(self.rows.len() - 1)
    }

    fn check_columns(&self, expr: &LinearExpr) -> Result<()> {
        match expr.terms.iter().find(|(col, _)| *col >= self.variables.len()) {
            Some((col, _)) => Err(SpError::InvalidModel(format!(
                "{}: column {} does not exist",
                self.name, col
            ))),
            None => Ok(()),
        }
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn objective_constant(&self) -> f64 {
        self.objective_constant
    }

    pub fn variable_index(&self, name: &str) -> Option<VarRef> {
        self.variables.iter().position(|v| v.name == name).map(VarRef)
    }

    /// Objective value at `values` (local columns only)
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(v, x)| v.cost * x)
            .sum::<f64>()
            + self.objective_constant
    }

    /// Occurrences of first-stage columns as `(row, column, coefficient)`
    pub fn masterterms(&self) -> Vec<(usize, usize, f64)> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.decision_terms.iter().map(move |(col, c)| (r, *col, *c)))
            .collect()
    }

    /// Number of first-stage columns referenced (highest index + 1)
    pub fn decision_width(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.decision_terms.iter().map(|(col, _)| col + 1))
            .max()
            .unwrap_or(0)
    }

    /// The model with the first-stage decision fixed to `x`: decision terms
    /// are moved to the right-hand side.
    pub fn outcome(&self, x: &[f64]) -> Result<LinearModel> {
        let width = self.decision_width();
        if x.len() < width {
            return Err(SpError::DimensionMismatch {
                expected: width,
                found: x.len(),
            });
        }
        let mut model = self.clone();
        model.name = format!("{}|outcome", self.name);
        model.solution = None;
        for row in model.rows.iter_mut() {
            let shift: f64 = row.decision_terms.iter().map(|(col, c)| c * x[*col]).sum();
            row.rhs -= shift;
            row.decision_terms.clear();
        }
        Ok(model)
    }

    /// Phase-one model: minimize the total violation of every row, keeping
    /// column bounds. Its optimal value is zero iff the rows are satisfiable.
    pub fn feasibility_model(&self) -> LinearModel {
        let mut model = LinearModel::new(format!("{}|feasibility", self.name));
        for v in &self.variables {
            model.variables.push(Variable { cost: 0.0, ..v.clone() });
        }
        for (r, row) in self.rows.iter().enumerate() {
            let mut terms = row.terms.clone();
            if matches!(row.sense, ConstraintSense::Ge | ConstraintSense::Eq) {
                let s = model.add_variable(format!("s+[{}]", r), 0.0, f64::INFINITY);
                model.variables[s.0].cost = 1.0;
                terms.push((s.0, 1.0));
            }
            if matches!(row.sense, ConstraintSense::Le | ConstraintSense::Eq) {
                let s = model.add_variable(format!("s-[{}]", r), 0.0, f64::INFINITY);
                model.variables[s.0].cost = 1.0;
                terms.push((s.0, -1.0));
            }
            model.rows.push(Row {
                name: row.name.clone(),
                terms,
                decision_terms: row.decision_terms.clone(),
                sense: row.sense,
                rhs: row.rhs,
            });
        }
        model
    }

    /// Gradient of the optimal value with respect to the first-stage decision,
    /// given row duals of the outcome model: `-(T^T duals)`.
    pub fn decision_gradient(&self, duals: &[f64], width: usize) -> Vec<f64> {
        let mut gradient = vec![0.0; width];
        for (row, dual) in self.rows.iter().zip(duals) {
            for (col, c) in &row.decision_terms {
                if *col < width {
                    gradient[*col] -= c * dual;
                }
            }
        }
        gradient
    }

    /// Bounds must be ordered and finite coefficients only
    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.variables.iter().find(|v| v.lower > v.upper || v.lower.is_nan() || v.upper.is_nan()) {
            return Err(SpError::InvalidModel(format!(
                "{}: variable {} has bounds [{}, {}]",
                self.name, v.name, v.lower, v.upper
            )));
        }
        let finite = self.variables.iter().all(|v| v.cost.is_finite())
            && self.rows.iter().all(|row| {
                row.rhs.is_finite()
                    && row.terms.iter().chain(&row.decision_terms).all(|(_, c)| c.is_finite())
            });
        if !finite {
            return Err(SpError::InvalidModel(format!("{}: non-finite coefficient", self.name)));
        }
        Ok(())
    }

    pub fn solution(&self) -> Option<&ModelSolution> {
        self.solution.as_ref()
    }

    pub fn set_solution(&mut self, solution: ModelSolution) {
        self.solution = Some(solution);
    }

    pub fn clear_solution(&mut self) {
        self.solution = None;
    }

    pub(crate) fn push_variable(&mut self, variable: Variable) -> usize {
        self.variables.push(variable);
        self.variables.len() - 1
    }

    pub(crate) fn push_row(&mut self, row: Row) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub(crate) fn add_objective_constant(&mut self, value: f64) {
        self.objective_constant += value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DecisionRef;

    fn recourse_model() -> LinearModel {
        let mut model = LinearModel::new("recourse");
        let y1 = model.add_variable("y1", 0.0, 500.0);
        let y2 = model.add_variable("y2", 0.0, 100.0);
        model
            .set_objective(ObjectiveSense::Minimize, -24.0 * y1 - 28.0 * y2)
            .unwrap();
        model
            .add_constraint("c1", 6.0 * y1 + 10.0 * y2 - 60.0 * DecisionRef(0), ConstraintSense::Le, 0.0)
            .unwrap();
        model
            .add_constraint("c2", 8.0 * y1 + 5.0 * y2 - 80.0 * DecisionRef(1), ConstraintSense::Le, 0.0)
            .unwrap();
        model
    }

    #[test]
    fn test_masterterms_are_row_column_coefficient_triples() {
        let model = recourse_model();
        assert_eq!(model.masterterms(), vec![(0, 0, -60.0), (1, 1, -80.0)]);
        assert_eq!(model.decision_width(), 2);
    }

    #[test]
    fn test_outcome_moves_decisions_to_rhs() {
        let model = recourse_model();
        let outcome = model.outcome(&[40.0, 20.0]).unwrap();
        assert_eq!(outcome.rows()[0].rhs, 2400.0);
        assert_eq!(outcome.rows()[1].rhs, 1600.0);
        assert!(outcome.masterterms().is_empty());

        let err = model.outcome(&[40.0]).unwrap_err();
        assert!(matches!(err, SpError::DimensionMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn test_objective_rejects_decision_terms() {
        let mut model = recourse_model();
        let err = model
            .set_objective(ObjectiveSense::Minimize, LinearExpr::from(DecisionRef(0)))
            .unwrap_err();
        assert!(matches!(err, SpError::InvalidModel(_)));
    }

    #[test]
    fn test_feasibility_model_adds_slacks() {
        let model = recourse_model();
        let phase_one = model.feasibility_model();
        // two Le rows, one slack each
        assert_eq!(phase_one.num_variables(), 4);
        assert_eq!(phase_one.objective_value(&[0.0, 0.0, 1.5, 2.0]), 3.5);
    }

    #[test]
    fn test_decision_gradient() {
        let model = recourse_model();
        let gradient = model.decision_gradient(&[-0.5, -1.0], 2);
        assert_eq!(gradient, vec![-30.0, -80.0]);
    }

    #[test]
    fn test_validate_catches_crossed_bounds() {
        let mut model = LinearModel::new("bad");
        model.add_variable("x", 1.0, 0.0);
        assert!(model.validate().is_err());
    }
}
