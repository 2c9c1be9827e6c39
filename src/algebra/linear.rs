//! Linear combinations of basis variables.

use std::collections::BTreeMap;
use std::fmt;

use super::diff::differentiate;
use super::expr::{Expr, Var};

/// `sum(coefficient_i * var_i) + constant`, where no coefficient depends on
/// a basis variable. Everything that cannot be written that way lives in
/// the constant term.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCombination {
    terms: Vec<(Var, Expr)>,
    constant: Expr,
}

impl LinearCombination {
    /// Build from explicit terms; zero coefficients are dropped.
    pub fn new(terms: Vec<(Var, Expr)>, constant: Expr) -> Self {
        Self {
            terms: terms.into_iter().filter(|(_, c)| !c.is_zero()).collect(),
            constant,
        }
    }

    /// Decompose `expr` over `basis`.
    ///
    /// A basis variable becomes a term when the derivative of `expr` with
    /// respect to it is free of every basis variable. The constant is
    /// `expr` with all such variables set to zero, so it may still depend
    /// on basis variables that enter nonlinearly.
    pub fn decompose(expr: &Expr, basis: &[Var]) -> Self {
        let mut terms = Vec::new();
        for var in basis {
            if !expr.depends_on(var) {
                continue;
            }
            let coefficient = differentiate(expr, var);
            if coefficient.any_var(&|v| basis.contains(v)) {
                continue;
            }
            terms.push((var.clone(), coefficient));
        }
        let zeros: BTreeMap<Var, Expr> = terms.iter().map(|(v, _)| (v.clone(), Expr::ZERO)).collect();
        let constant = expr.substitute(&zeros);
        Self::new(terms, constant)
    }

    pub fn terms(&self) -> &[(Var, Expr)] {
        &self.terms
    }

    pub fn constant(&self) -> &Expr {
        &self.constant
    }

    /// Coefficient of `var`, zero if absent.
    pub fn coefficient(&self, var: &Var) -> Expr {
        self.terms
            .iter()
            .find(|(v, _)| v == var)
            .map(|(_, c)| c.clone())
            .unwrap_or(Expr::ZERO)
    }

    pub fn contains(&self, var: &Var) -> bool {
        self.terms.iter().any(|(v, _)| v == var)
    }

    /// Whether `var` appears anywhere: as a basis term, inside a
    /// coefficient, or inside the constant.
    pub fn depends_on(&self, var: &Var) -> bool {
        self.contains(var)
            || self.constant.depends_on(var)
            || self.terms.iter().any(|(_, c)| c.depends_on(var))
    }

    /// Whether any variable in the coefficients or constant satisfies `pred`.
    pub fn any_var<P: Fn(&Var) -> bool>(&self, pred: &P) -> bool {
        self.constant.any_var(pred) || self.terms.iter().any(|(_, c)| c.any_var(pred))
    }

    /// The same combination without the term for `var`.
    pub fn without(&self, var: &Var) -> Self {
        Self {
            terms: self.terms.iter().filter(|(v, _)| v != var).cloned().collect(),
            constant: self.constant.clone(),
        }
    }

    /// `self - factor * other`, with the term for `eliminated` removed exactly.
    pub fn eliminate(&self, eliminated: &Var, other: &LinearCombination, factor: &Expr) -> Self {
        let mut terms: Vec<(Var, Expr)> = self
            .terms
            .iter()
            .filter(|(v, _)| v != eliminated)
            .cloned()
            .collect();
        for (var, c) in other.terms.iter().filter(|(v, _)| v != eliminated) {
            let scaled = factor.clone() * c.clone();
            match terms.iter_mut().find(|(v, _)| v == var) {
                Some((_, existing)) => {
                    let previous = std::mem::replace(existing, Expr::ZERO);
                    *existing = previous - scaled;
                }
                None => terms.push((var.clone(), -scaled)),
            }
        }
        let constant = self.constant.clone() - factor.clone() * other.constant.clone();
        Self::new(terms, constant)
    }

    pub fn to_expr(&self) -> Expr {
        Expr::sum(
            self.terms
                .iter()
                .map(|(v, c)| c.clone() * Expr::Var(v.clone()))
                .chain(std::iter::once(self.constant.clone())),
        )
    }
}

impl fmt::Display for LinearCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, c) in &self.terms {
            write!(f, "({})*{} + ", c, var)?;
        }
        write!(f, "{}", self.constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_separates_nonlinear_terms() {
        let x = Var::signal("x");
        let y = Var::signal("y");
        let ex = Expr::Var(x.clone());
        let ey = Expr::Var(y.clone());
        let e = 2.0 * ex.clone() + (ey.clone() / 0.0258).exp() + 5.0;
        let lc = LinearCombination::decompose(&e, &[x.clone(), y.clone()]);

        assert_eq!(lc.coefficient(&x), Expr::Const(2.0));
        assert!(!lc.contains(&y));
        assert!(lc.constant().depends_on(&y));
        assert!(!lc.constant().depends_on(&x));
        assert_eq!(lc.to_expr(), e);
    }

    #[test]
    fn test_coefficients_may_reference_non_basis_vars() {
        let x = Var::signal("x");
        let g = Expr::Var(Var::parameter("g"));
        let e = g.clone() * Expr::Var(x.clone());
        let lc = LinearCombination::decompose(&e, &[x.clone()]);
        assert_eq!(lc.coefficient(&x), g);
        assert_eq!(*lc.constant(), Expr::ZERO);
    }

    #[test]
    fn test_eliminate() {
        let x = Var::signal("x");
        let y = Var::signal("y");
        // a: x + y - 3, b: 2x - y
        let a = LinearCombination::new(vec![(x.clone(), Expr::ONE), (y.clone(), Expr::ONE)], Expr::Const(-3.0));
        let b = LinearCombination::new(vec![(x.clone(), Expr::Const(2.0)), (y.clone(), Expr::Const(-1.0))], Expr::ZERO);
        let reduced = b.eliminate(&x, &a, &Expr::Const(2.0));
        assert!(!reduced.contains(&x));
        assert_eq!(reduced.coefficient(&y), Expr::Const(-3.0));
        assert_eq!(*reduced.constant(), Expr::Const(6.0));
    }
}
