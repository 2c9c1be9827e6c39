//! Equations and symbolic row reduction of linear systems.

use std::fmt;

use super::expr::{Expr, Var};
use super::linear::LinearCombination;

/// A symbolic equality `lhs = rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn new(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self {
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    /// `lhs - rhs`, which is zero when the equation holds.
    pub fn residual(&self) -> Expr {
        self.lhs.clone() - self.rhs.clone()
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

/// Result of [`row_reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Pivot variable and its row, in elimination order. Row `k` only
    /// contains pivot variables chosen after `k`.
    pub pivots: Vec<(Var, LinearCombination)>,
    /// Rows that were never chosen as a pivot, with every pivot variable
    /// eliminated.
    pub rest: Vec<LinearCombination>,
}

/// Forward elimination of `vars` (in order) from `rows`.
///
/// Constant coefficients are preferred as pivots (largest magnitude
/// first), then the smallest symbolic coefficient. Variables with no
/// remaining row are skipped.
pub fn row_reduce(rows: Vec<LinearCombination>, vars: &[Var]) -> Reduction {
    let mut rows = rows;
    let mut pivots = Vec::new();
    for var in vars {
        let Some(index) = select_pivot(&rows, var) else {
            continue;
        };
        let pivot = rows.remove(index);
        let c = pivot.coefficient(var);
        rows = rows
            .into_iter()
            .map(|row| {
                let k = row.coefficient(var);
                if k.is_zero() {
                    row
                } else {
                    row.eliminate(var, &pivot, &(k / c.clone()))
                }
            })
            .collect();
        pivots.push((var.clone(), pivot));
    }
    Reduction { pivots, rest: rows }
}

fn pivot_score(coefficient: &Expr) -> (u8, f64) {
    match coefficient.as_const() {
        Some(c) => (0, -c.abs()),
        None => (1, coefficient.size() as f64),
    }
}

fn select_pivot(rows: &[LinearCombination], var: &Var) -> Option<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.contains(var))
        .map(|(i, row)| (i, pivot_score(&row.coefficient(var))))
        .min_by(|(ia, a), (ib, b)| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(ia.cmp(ib))
        })
        .map(|(i, _)| i)
}

/// Solve each pivot row for its pivot variable.
///
/// The result is in evaluation order (reverse of elimination order): each
/// expression only references variables solved earlier in the list or
/// variables that were never pivots.
pub fn back_substitute(pivots: &[(Var, LinearCombination)]) -> Vec<(Var, Expr)> {
    pivots
        .iter()
        .rev()
        .map(|(var, row)| {
            let c = row.coefficient(var);
            let rest = row.without(var).to_expr();
            (var.clone(), -rest / c)
        })
        .collect()
}
