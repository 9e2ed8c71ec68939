use itertools::Itertools;
use std::ops::{Add, Mul, Neg, Sub};

/// Handle to a column of the model being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarRef(pub(crate) usize);

impl VarRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a first-stage column, as seen from a second-stage model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecisionRef(pub(crate) usize);

impl DecisionRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Affine expression over local columns and first-stage decisions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub(crate) terms: Vec<(usize, f64)>,
    pub(crate) decision_terms: Vec<(usize, f64)>,
    pub(crate) constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            ..Self::default()
        }
    }

    pub fn term(mut self, var: VarRef, coeff: f64) -> Self {
        self.terms.push((var.0, coeff));
        self
    }

    pub fn decision(mut self, var: DecisionRef, coeff: f64) -> Self {
        self.decision_terms.push((var.0, coeff));
        self
    }

    pub fn has_decision_terms(&self) -> bool {
        self.decision_terms.iter().any(|(_, c)| *c != 0.0)
    }

    /// Merge repeated columns and drop zero coefficients
    pub(crate) fn compress(mut self) -> Self {
        self.terms = merge_terms(self.terms);
        self.decision_terms = merge_terms(self.decision_terms);
        self
    }

    fn scale(mut self, factor: f64) -> Self {
        self.terms.iter_mut().for_each(|(_, c)| *c *= factor);
        self.decision_terms.iter_mut().for_each(|(_, c)| *c *= factor);
        self.constant *= factor;
        self
    }
}

fn merge_terms(terms: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    terms
        .into_iter()
        .sorted_by_key(|(col, _)| *col)
        .coalesce(|a, b| {
            if a.0 == b.0 {
                Ok((a.0, a.1 + b.1))
            } else {
                Err((a, b))
            }
        })
        .filter(|(_, c)| *c != 0.0)
        .collect()
}

impl From<VarRef> for LinearExpr {
    fn from(var: VarRef) -> Self {
        LinearExpr::new().term(var, 1.0)
    }
}

impl From<DecisionRef> for LinearExpr {
    fn from(var: DecisionRef) -> Self {
        LinearExpr::new().decision(var, 1.0)
    }
}

impl From<f64> for LinearExpr {
    fn from(value: f64) -> Self {
        LinearExpr::constant(value)
    }
}

impl<T: Into<LinearExpr>> Add<T> for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: T) -> LinearExpr {
        let rhs = rhs.into();
        self.terms.extend(rhs.terms);
        self.decision_terms.extend(rhs.decision_terms);
        self.constant += rhs.constant;
        self
    }
}

impl<T: Into<LinearExpr>> Sub<T> for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: T) -> LinearExpr {
        self + rhs.into().scale(-1.0)
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> LinearExpr {
        self.scale(-1.0)
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(self, rhs: f64) -> LinearExpr {
        self.scale(rhs)
    }
}

impl Mul<LinearExpr> for f64 {
    type Output = LinearExpr;

    fn mul(self, rhs: LinearExpr) -> LinearExpr {
        rhs.scale(self)
    }
}

macro_rules! column_ops {
    ($ty:ty) => {
        impl Mul<f64> for $ty {
            type Output = LinearExpr;

            fn mul(self, rhs: f64) -> LinearExpr {
                LinearExpr::from(self).scale(rhs)
            }
        }

        impl Mul<$ty> for f64 {
            type Output = LinearExpr;

            fn mul(self, rhs: $ty) -> LinearExpr {
                LinearExpr::from(rhs).scale(self)
            }
        }

        impl<T: Into<LinearExpr>> Add<T> for $ty {
            type Output = LinearExpr;

            fn add(self, rhs: T) -> LinearExpr {
                LinearExpr::from(self) + rhs
            }
        }

        impl<T: Into<LinearExpr>> Sub<T> for $ty {
            type Output = LinearExpr;

            fn sub(self, rhs: T) -> LinearExpr {
                LinearExpr::from(self) - rhs
            }
        }

        impl Neg for $ty {
            type Output = LinearExpr;

            fn neg(self) -> LinearExpr {
                -LinearExpr::from(self)
            }
        }
    };
}

column_ops!(VarRef);
column_ops!(DecisionRef);
