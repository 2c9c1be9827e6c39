//! Symbolic differentiation.

use super::expr::{Expr, Func, Var};

/// Partial derivative of `expr` with respect to `var`.
///
/// Time derivatives `D(y, t)` are treated as independent symbols: they
/// are expected to have been eliminated by discretization before any
/// Jacobian is formed.
pub fn differentiate(expr: &Expr, var: &Var) -> Expr {
    if !expr.depends_on(var) {
        return Expr::ZERO;
    }
    match expr {
        Expr::Const(_) | Expr::Deriv(_) => Expr::ZERO,
        Expr::Var(v) => {
            if v == var {
                Expr::ONE
            } else {
                Expr::ZERO
            }
        }
        Expr::Sum(terms) => Expr::sum(terms.iter().map(|t| differentiate(t, var))),
        Expr::Product(factors) => {
            let mut terms = Vec::new();
            for (i, factor) in factors.iter().enumerate() {
                let d = differentiate(factor, var);
                if d.is_zero() {
                    continue;
                }
                let others = factors
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, f)| f.clone());
                terms.push(Expr::product(std::iter::once(d).chain(others)));
            }
            Expr::sum(terms)
        }
        Expr::Pow(base, exponent) => {
            let db = differentiate(base, var);
            if !exponent.depends_on(var) {
                // d(b^e) = e * b^(e-1) * db
                let lowered = Expr::pow((**base).clone(), (**exponent).clone() - 1.0);
                return Expr::product([(**exponent).clone(), lowered, db]);
            }
            // d(b^e) = b^e * (de * ln(b) + e * db / b)
            let de = differentiate(exponent, var);
            let inner = de * (**base).clone().ln() + (**exponent).clone() * db / (**base).clone();
            Expr::product([expr.clone(), inner])
        }
        Expr::Call(func, arg) => {
            let da = differentiate(arg, var);
            let x = (**arg).clone();
            let outer = match func {
                Func::Exp => expr.clone(),
                Func::Ln => Expr::pow(x, Expr::Const(-1.0)),
                Func::Sqrt => 0.5 * Expr::pow(x, Expr::Const(-0.5)),
                Func::Sin => Expr::call(Func::Cos, x),
                Func::Cos => -Expr::call(Func::Sin, x),
                Func::Tanh => 1.0 - expr.clone().powi(2),
                Func::Atan => Expr::pow(1.0 + x.powi(2), Expr::Const(-1.0)),
                Func::Abs => Expr::call(Func::Sign, x),
                Func::Sign => Expr::ZERO,
            };
            outer * da
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn eval(e: &Expr, x: f64) -> f64 {
        e.evaluate(&|v: &Var| (v.name() == "x").then_some(x))
            .unwrap_or(f64::NAN)
    }

    #[test]
    fn test_polynomial() {
        let x = Expr::Var(Var::signal("x"));
        let e = 3.0 * x.clone().powi(3) + 2.0 * x.clone() + 7.0;
        let d = differentiate(&e, &Var::signal("x"));
        assert_relative_eq!(eval(&d, 2.0), 38.0, epsilon = 1e-12);
    }

    #[test]
    fn test_other_variables_are_constant() {
        let x = Expr::Var(Var::signal("x"));
        let y = Expr::Var(Var::signal("y"));
        let e = x * y.clone();
        assert_eq!(differentiate(&e, &Var::signal("x")), y);
        assert_eq!(differentiate(&e, &Var::signal("z")), Expr::ZERO);
    }

    #[test]
    fn test_delayed_signal_is_independent() {
        let x = Var::signal("x");
        let e = Expr::Var(x.clone()) - Expr::Var(x.at(1));
        assert_eq!(differentiate(&e, &x), Expr::ONE);
    }

    #[test]
    fn test_chain_rule_matches_finite_difference() {
        let x = Expr::Var(Var::signal("x"));
        let e = (x.clone() / 0.0258).exp() * 1e-12 + x.clone().tanh() + (x.clone().powi(2) + 1.0).sqrt();
        let d = differentiate(&e, &Var::signal("x"));
        for &p in &[-0.5, 0.1, 0.3] {
            let h = 1e-7;
            let fd = (eval(&e, p + h) - eval(&e, p - h)) / (2.0 * h);
            assert_relative_eq!(eval(&d, p), fd, max_relative = 1e-5);
        }
    }
}
