use minilp::{ComparisonOp, OptimizationDirection, Problem, Variable as LpVar};
use tracing::trace;

use super::{LpSolver, SolveStatus};
use crate::error::{Result, SpError};
use crate::model::{ConstraintSense, LinearModel, ModelSolution};

/// LP backend built on the pure-Rust `minilp` simplex solver
///
/// `minilp` only reports primal values, so row duals and reduced costs are
/// recovered by solving the dual program of the minimization form:
///
/// ```text
/// max  b'π + l'μ + u'ν
/// s.t. A'π + μ + ν = σc
///      π ≥ 0 (>= rows), π ≤ 0 (<= rows), μ ≥ 0, ν ≤ 0
/// ```
///
/// where σ is +1 for minimization and -1 for maximization. Reported duals
/// are σπ, i.e. the derivative of the optimal value with respect to the
/// right-hand side in the model's own sense.
#[derive(Debug, Clone)]
pub struct MinilpSolver {
    compute_duals: bool,
}

impl Default for MinilpSolver {
    fn default() -> Self {
        Self { compute_duals: true }
    }
}

impl MinilpSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the dual solve; duals and reduced costs are reported as zeros.
    pub fn primal_only() -> Self {
        Self {
            compute_duals: false,
        }
    }

    fn solve_primal(&self, model: &LinearModel) -> Result<(f64, Vec<f64>)> {
        let direction = match model.sense() {
            crate::model::ObjectiveSense::Minimize => OptimizationDirection::Minimize,
            crate::model::ObjectiveSense::Maximize => OptimizationDirection::Maximize,
        };
        let mut problem = Problem::new(direction);
        let vars: Vec<LpVar> = model
            .variables()
            .iter()
            .map(|v| problem.add_var(v.cost, (v.lower, v.upper)))
            .collect();

        for row in model.rows() {
            if row.terms.is_empty() {
                if !trivially_satisfied(row.sense, row.rhs) {
                    return Err(SpError::solve(SolveStatus::Infeasible));
                }
                continue;
            }
            let mut expr = minilp::LinearExpr::empty();
            for (col, coeff) in &row.terms {
                expr.add(vars[*col], *coeff);
            }
            problem.add_constraint(expr, comparison(row.sense), row.rhs);
        }

        let solution = problem.solve().map_err(|e| SpError::solve(status_of(e)))?;
        let primal = vars.iter().map(|v| solution[*v]).collect();
        Ok((solution.objective() + model.objective_constant(), primal))
    }

    fn solve_dual(&self, model: &LinearModel) -> Result<(Vec<f64>, Vec<f64>)> {
        let sign = model.sense().sign();
        let mut problem = Problem::new(OptimizationDirection::Maximize);

        let pis: Vec<Option<LpVar>> = model
            .rows()
            .iter()
            .map(|row| {
                if row.terms.is_empty() {
                    return None;
                }
                let bounds = match row.sense {
                    ConstraintSense::Ge => (0.0, f64::INFINITY),
                    ConstraintSense::Le => (f64::NEG_INFINITY, 0.0),
                    ConstraintSense::Eq => (f64::NEG_INFINITY, f64::INFINITY),
                };
                Some(problem.add_var(row.rhs, bounds))
            })
            .collect();

        let mut columns: Vec<Vec<(LpVar, f64)>> = vec![Vec::new(); model.num_variables()];
        for (row, pi) in model.rows().iter().zip(&pis) {
            if let Some(pi) = pi {
                for (col, coeff) in &row.terms {
                    columns[*col].push((*pi, *coeff));
                }
            }
        }

        let mut bound_vars = Vec::with_capacity(model.num_variables());
        for (variable, column) in model.variables().iter().zip(columns) {
            let mu = variable
                .lower
                .is_finite()
                .then(|| problem.add_var(variable.lower, (0.0, f64::INFINITY)));
            let nu = variable
                .upper
                .is_finite()
                .then(|| problem.add_var(variable.upper, (f64::NEG_INFINITY, 0.0)));

            let mut expr = minilp::LinearExpr::empty();
            let mut len = 0;
            for (pi, coeff) in column.into_iter().chain(mu.map(|v| (v, 1.0))).chain(nu.map(|v| (v, 1.0))) {
                expr.add(pi, coeff);
                len += 1;
            }
            let target = sign * variable.cost;
            if len == 0 {
                if target != 0.0 {
                    return Err(SpError::solve(SolveStatus::Unbounded));
                }
            } else {
                problem.add_constraint(expr, ComparisonOp::Eq, target);
            }
            bound_vars.push((mu, nu));
        }

        let solution = problem.solve().map_err(|e| {
            trace!(model = %model.name, error = ?e, "dual solve failed");
            SpError::solve(SolveStatus::Error)
        })?;

        let duals = pis
            .iter()
            .map(|pi| pi.map(|v| sign * solution[v]).unwrap_or(0.0))
            .collect();
        let reduced_costs = bound_vars
            .iter()
            .map(|(mu, nu)| {
                let mu = mu.map(|v| solution[v]).unwrap_or(0.0);
                let nu = nu.map(|v| solution[v]).unwrap_or(0.0);
                sign * (mu + nu)
            })
            .collect();
        Ok((duals, reduced_costs))
    }
}

impl LpSolver for MinilpSolver {
    fn name(&self) -> &'static str {
        "minilp"
    }

    fn solve(&self, model: &LinearModel) -> Result<ModelSolution> {
        model.validate()?;
        if model.rows().iter().any(|row| !row.decision_terms.is_empty()) {
            return Err(SpError::InvalidModel(format!(
                "{}: first-stage decisions must be fixed before solving",
                model.name
            )));
        }

        let (objective, primal) = self.solve_primal(model)?;
        let (duals, reduced_costs) = if self.compute_duals {
            self.solve_dual(model)?
        } else {
            (vec![0.0; model.num_rows()], vec![0.0; model.num_variables()])
        };

        Ok(ModelSolution {
            objective,
            primal,
            duals,
            reduced_costs,
        })
    }
}

fn comparison(sense: ConstraintSense) -> ComparisonOp {
    match sense {
        ConstraintSense::Le => ComparisonOp::Le,
        ConstraintSense::Ge => ComparisonOp::Ge,
        ConstraintSense::Eq => ComparisonOp::Eq,
    }
}

fn status_of(error: minilp::Error) -> SolveStatus {
    match error {
        minilp::Error::Infeasible => SolveStatus::Infeasible,
        minilp::Error::Unbounded => SolveStatus::Unbounded,
    }
}

fn trivially_satisfied(sense: ConstraintSense, rhs: f64) -> bool {
    const TOL: f64 = 1e-9;
    match sense {
        ConstraintSense::Le => rhs >= -TOL,
        ConstraintSense::Ge => rhs <= TOL,
        ConstraintSense::Eq => rhs.abs() <= TOL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearExpr, ObjectiveSense};
    use approx::assert_abs_diff_eq;

    /// min x + 2y  s.t.  x + y >= 2,  x <= 1.5,  x, y >= 0
    fn small_lp() -> LinearModel {
        let mut model = LinearModel::new("small");
        let x = model.add_variable("x", 0.0, 1.5);
        let y = model.add_variable("y", 0.0, f64::INFINITY);
        model.set_objective(ObjectiveSense::Minimize, x + 2.0 * y).unwrap();
        model.add_constraint("cover", x + y, ConstraintSense::Ge, 2.0).unwrap();
        model
    }

    #[test]
    fn test_primal_and_duals() {
        let solution = MinilpSolver::new().solve(&small_lp()).unwrap();

        assert_abs_diff_eq!(solution.objective, 2.5, epsilon = 1e-7);
        assert_abs_diff_eq!(solution.primal[0], 1.5, epsilon = 1e-7);
        assert_abs_diff_eq!(solution.primal[1], 0.5, epsilon = 1e-7);
        // raising the cover requirement costs 2 per unit
        assert_abs_diff_eq!(solution.duals[0], 2.0, epsilon = 1e-7);
        // x sits at its upper bound with reduced cost 1 - 2 = -1
        assert_abs_diff_eq!(solution.reduced_costs[0], -1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(solution.reduced_costs[1], 0.0, epsilon = 1e-7);
    }

    #[test]
    fn test_maximize_duals_follow_model_sense() {
        // max y  s.t.  y <= 3
        let mut model = LinearModel::new("max");
        let y = model.add_variable("y", f64::NEG_INFINITY, f64::INFINITY);
        model.set_objective(ObjectiveSense::Maximize, LinearExpr::from(y)).unwrap();
        model.add_constraint("cap", y, ConstraintSense::Le, 3.0).unwrap();

        let solution = MinilpSolver::new().solve(&model).unwrap();
        assert_abs_diff_eq!(solution.objective, 3.0, epsilon = 1e-7);
        assert_abs_diff_eq!(solution.duals[0], 1.0, epsilon = 1e-7);
    }

    #[test]
    fn test_infeasible_and_unbounded_statuses() {
        let mut model = small_lp();
        model
            .add_constraint("cap", LinearExpr::from(crate::model::VarRef(1)), ConstraintSense::Le, 0.1)
            .unwrap();
        let err = MinilpSolver::new().solve(&model).unwrap_err();
        assert_eq!(err.solve_status(), Some(SolveStatus::Infeasible));

        let mut model = LinearModel::new("unbounded");
        let z = model.add_variable("z", f64::NEG_INFINITY, 0.0);
        model.set_objective(ObjectiveSense::Minimize, LinearExpr::from(z)).unwrap();
        let err = MinilpSolver::new().solve(&model).unwrap_err();
        assert_eq!(err.solve_status(), Some(SolveStatus::Unbounded));
    }

    #[test]
    fn test_rejects_unfixed_decisions() {
        let mut model = LinearModel::new("linked");
        let y = model.add_variable("y", 0.0, 1.0);
        model
            .add_constraint("link", y - crate::model::DecisionRef(0), ConstraintSense::Le, 0.0)
            .unwrap();
        assert!(matches!(
            MinilpSolver::new().solve(&model),
            Err(SpError::InvalidModel(_))
        ));
    }
}
