//! Symbolic expressions over circuit signals.
//!
//! Expressions are immutable trees. The constructors [`Expr::sum`],
//! [`Expr::product`], [`Expr::pow`] and [`Expr::call`] fold constants and
//! merge like terms and like bases, so that `x - x` is `0` and `x / x` is
//! `1`. That is all the simplification the solver relies on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// What a [`Var`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarKind {
    /// Simulation time `t`.
    Time,
    /// A runtime-adjustable circuit parameter.
    Parameter,
    /// A time-varying signal evaluated at `t - delay * h`.
    Signal { delay: u8 },
    /// Newton update of the current value of a signal.
    Delta,
}

/// A named symbol appearing in expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    name: Arc<str>,
    kind: VarKind,
}

impl Var {
    /// A signal at the current time.
    pub fn signal(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            kind: VarKind::Signal { delay: 0 },
        }
    }

    /// A runtime parameter.
    pub fn parameter(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            kind: VarKind::Parameter,
        }
    }

    /// Simulation time.
    pub fn time() -> Self {
        Self {
            name: Arc::from("t"),
            kind: VarKind::Time,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VarKind {
        self.kind
    }

    pub fn is_signal(&self) -> bool {
        matches!(self.kind, VarKind::Signal { .. })
    }

    pub fn is_delta(&self) -> bool {
        self.kind == VarKind::Delta
    }

    /// Delay in timesteps; zero for anything that is not a signal.
    pub fn delay(&self) -> u8 {
        match self.kind {
            VarKind::Signal { delay } => delay,
            _ => 0,
        }
    }

    /// The same signal evaluated `delay` timesteps in the past.
    /// Non-signals are returned unchanged.
    pub fn at(&self, delay: u8) -> Var {
        match self.kind {
            VarKind::Signal { .. } => Var {
                name: self.name.clone(),
                kind: VarKind::Signal { delay },
            },
            _ => self.clone(),
        }
    }

    /// The same signal at the current time.
    pub fn current(&self) -> Var {
        match self.kind {
            VarKind::Delta => Var {
                name: self.name.clone(),
                kind: VarKind::Signal { delay: 0 },
            },
            _ => self.at(0),
        }
    }

    /// Shift a signal `k` further timesteps into the past.
    pub fn delayed(&self, k: u8) -> Var {
        self.at(self.delay().saturating_add(k))
    }

    /// The Newton update variable of this signal.
    pub fn delta(&self) -> Var {
        Var {
            name: self.name.clone(),
            kind: VarKind::Delta,
        }
    }

    /// The unknown standing in for `D(self, t)` after discretization.
    pub fn derivative(&self) -> Var {
        Var::signal(format!("{}'", self.name))
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VarKind::Time => write!(f, "t"),
            VarKind::Parameter => write!(f, "{}", self.name),
            VarKind::Signal { delay: 0 } => write!(f, "{}[t]", self.name),
            VarKind::Signal { delay } => write!(f, "{}[t-{}h]", self.name, delay),
            VarKind::Delta => write!(f, "d{}", self.name),
        }
    }
}

/// Elementary functions an expression may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Atan,
    Abs,
    Sign,
}

impl Func {
    /// Evaluate the function numerically.
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Ln => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
            Func::Atan => x.atan(),
            Func::Abs => x.abs(),
            Func::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    x
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Ln => "ln",
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tanh => "tanh",
            Func::Atan => "atan",
            Func::Abs => "abs",
            Func::Sign => "sign",
        }
    }
}

/// A symbolic expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(Var),
    /// Time derivative `D(var, t)`.
    Deriv(Var),
    Sum(Vec<Expr>),
    Product(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub const ZERO: Expr = Expr::Const(0.0);
    pub const ONE: Expr = Expr::Const(1.0);

    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn var(var: Var) -> Self {
        Expr::Var(var)
    }

    /// `D(var, t)`
    pub fn deriv(var: Var) -> Self {
        Expr::Deriv(var)
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Expr::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0.0)
    }

    /// Sum of `terms`, with constants folded and like terms merged.
    pub fn sum<I: IntoIterator<Item = Expr>>(terms: I) -> Expr {
        fn collect(term: Expr, constant: &mut f64, like: &mut Vec<(Expr, f64)>) {
            match term {
                Expr::Const(c) => *constant += c,
                Expr::Sum(inner) => {
                    for t in inner {
                        collect(t, constant, like);
                    }
                }
                other => {
                    let (coefficient, rest) = other.split_coefficient();
                    // c*(a + b) is distributed so that negated sums cancel.
                    if let Expr::Sum(inner) = rest {
                        for t in inner {
                            collect(Expr::product([Expr::Const(coefficient), t]), constant, like);
                        }
                        return;
                    }
                    match like.iter_mut().find(|(e, _)| *e == rest) {
                        Some((_, c)) => *c += coefficient,
                        None => like.push((rest, coefficient)),
                    }
                }
            }
        }

        let mut constant = 0.0;
        let mut like = Vec::new();
        for term in terms {
            collect(term, &mut constant, &mut like);
        }

        let mut out: Vec<Expr> = like
            .into_iter()
            .filter(|(_, c)| *c != 0.0)
            .map(|(e, c)| scale(e, c))
            .collect();
        if constant != 0.0 {
            out.push(Expr::Const(constant));
        }
        match out.len() {
            0 => Expr::ZERO,
            1 => out.pop().unwrap_or(Expr::ZERO),
            _ => Expr::Sum(out),
        }
    }

    /// Product of `factors`, with constants folded and like bases merged.
    pub fn product<I: IntoIterator<Item = Expr>>(factors: I) -> Expr {
        fn merge(base: Expr, exponent: Expr, powers: &mut Vec<(Expr, Expr)>) {
            match powers.iter_mut().find(|(b, _)| *b == base) {
                Some((_, e)) => {
                    let previous = std::mem::replace(e, Expr::ZERO);
                    *e = Expr::sum([previous, exponent]);
                }
                None => powers.push((base, exponent)),
            }
        }

        fn collect(factor: Expr, constant: &mut f64, powers: &mut Vec<(Expr, Expr)>) {
            match factor {
                Expr::Const(c) => *constant *= c,
                Expr::Product(inner) => {
                    for f in inner {
                        collect(f, constant, powers);
                    }
                }
                Expr::Pow(base, exponent) => merge(*base, *exponent, powers),
                other => merge(other, Expr::ONE, powers),
            }
        }

        let mut constant = 1.0;
        let mut powers = Vec::new();
        for factor in factors {
            collect(factor, &mut constant, &mut powers);
        }
        if constant == 0.0 {
            return Expr::ZERO;
        }

        let mut out = Vec::with_capacity(powers.len() + 1);
        for (base, exponent) in powers {
            match Expr::pow(base, exponent) {
                Expr::Const(c) => constant *= c,
                Expr::Product(inner) => {
                    for f in inner {
                        match f {
                            Expr::Const(c) => constant *= c,
                            other => out.push(other),
                        }
                    }
                }
                other => out.push(other),
            }
        }

        if constant == 0.0 {
            return Expr::ZERO;
        }
        if out.is_empty() {
            return Expr::Const(constant);
        }
        if constant != 1.0 {
            out.insert(0, Expr::Const(constant));
        }
        if out.len() == 1 {
            return out.pop().unwrap_or(Expr::ONE);
        }
        Expr::Product(out)
    }

    /// `base ^ exponent`
    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        let e = exponent.as_const();
        let b = base.as_const();
        if e == Some(0.0) {
            return Expr::ONE;
        }
        if e == Some(1.0) {
            return base;
        }
        if let (Some(b), Some(e)) = (b, e) {
            let value = b.powf(e);
            if value.is_finite() {
                return Expr::Const(value);
            }
        }
        if b == Some(1.0) {
            return Expr::ONE;
        }
        if let Some(k) = e.filter(|e| e.fract() == 0.0) {
            return match base {
                Expr::Pow(inner, e1) => Expr::pow(*inner, Expr::product([*e1, Expr::Const(k)])),
                Expr::Product(factors) => {
                    Expr::product(factors.into_iter().map(|f| Expr::pow(f, Expr::Const(k))))
                }
                other => Expr::Pow(Box::new(other), Box::new(Expr::Const(k))),
            };
        }
        Expr::Pow(Box::new(base), Box::new(exponent))
    }

    /// `func(arg)`, folded when the argument is constant.
    pub fn call(func: Func, arg: Expr) -> Expr {
        if let Some(c) = arg.as_const() {
            let value = func.apply(c);
            if value.is_finite() {
                return Expr::Const(value);
            }
        }
        Expr::Call(func, Box::new(arg))
    }

    pub fn exp(self) -> Expr {
        Expr::call(Func::Exp, self)
    }

    pub fn ln(self) -> Expr {
        Expr::call(Func::Ln, self)
    }

    pub fn sqrt(self) -> Expr {
        Expr::call(Func::Sqrt, self)
    }

    pub fn tanh(self) -> Expr {
        Expr::call(Func::Tanh, self)
    }

    pub fn powi(self, k: i32) -> Expr {
        Expr::pow(self, Expr::Const(k as f64))
    }

    /// Split a leading constant factor off a term: `3*x*y` gives `(3, x*y)`.
    fn split_coefficient(self) -> (f64, Expr) {
        match self {
            Expr::Product(factors) => match factors.split_first() {
                Some((Expr::Const(c), rest)) => {
                    let rest = if rest.len() == 1 {
                        rest[0].clone()
                    } else {
                        Expr::Product(rest.to_vec())
                    };
                    (*c, rest)
                }
                _ => (1.0, Expr::Product(factors)),
            },
            other => (1.0, other),
        }
    }

    /// Visit every node, parents before children.
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Deriv(_) => {}
            Expr::Sum(terms) | Expr::Product(terms) => {
                for t in terms {
                    t.walk(f);
                }
            }
            Expr::Pow(base, exponent) => {
                base.walk(f);
                exponent.walk(f);
            }
            Expr::Call(_, arg) => arg.walk(f),
        }
    }

    /// Variables referenced directly (not through a derivative).
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Var(v) = e {
                vars.insert(v.clone());
            }
        });
        vars
    }

    /// Variables whose time derivative appears in the expression.
    pub fn derivatives(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Deriv(v) = e {
                vars.insert(v.clone());
            }
        });
        vars
    }

    /// Whether any referenced variable satisfies `pred`.
    pub fn any_var<P: Fn(&Var) -> bool>(&self, pred: &P) -> bool {
        match self {
            Expr::Const(_) | Expr::Deriv(_) => false,
            Expr::Var(v) => pred(v),
            Expr::Sum(terms) | Expr::Product(terms) => terms.iter().any(|t| t.any_var(pred)),
            Expr::Pow(base, exponent) => base.any_var(pred) || exponent.any_var(pred),
            Expr::Call(_, arg) => arg.any_var(pred),
        }
    }

    pub fn depends_on(&self, var: &Var) -> bool {
        self.any_var(&|v| v == var)
    }

    pub fn has_derivative(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Deriv(_)));
        found
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    /// Rebuild the tree, replacing variable and derivative leaves for which
    /// `f` returns a value. Interior nodes are rebuilt through the
    /// simplifying constructors.
    pub fn map_leaves<F: FnMut(&Expr) -> Option<Expr>>(&self, f: &mut F) -> Expr {
        match self {
            Expr::Const(_) => self.clone(),
            Expr::Var(_) | Expr::Deriv(_) => f(self).unwrap_or_else(|| self.clone()),
            Expr::Sum(terms) => {
                let mut out = Vec::with_capacity(terms.len());
                for t in terms {
                    out.push(t.map_leaves(f));
                }
                Expr::sum(out)
            }
            Expr::Product(factors) => {
                let mut out = Vec::with_capacity(factors.len());
                for t in factors {
                    out.push(t.map_leaves(f));
                }
                Expr::product(out)
            }
            Expr::Pow(base, exponent) => {
                let base = base.map_leaves(f);
                let exponent = exponent.map_leaves(f);
                Expr::pow(base, exponent)
            }
            Expr::Call(func, arg) => Expr::call(*func, arg.map_leaves(f)),
        }
    }

    pub fn substitute(&self, map: &BTreeMap<Var, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        self.map_leaves(&mut |e| match e {
            Expr::Var(v) => map.get(v).cloned(),
            _ => None,
        })
    }

    pub fn substitute_var(&self, var: &Var, with: &Expr) -> Expr {
        if !self.depends_on(var) {
            return self.clone();
        }
        self.map_leaves(&mut |e| match e {
            Expr::Var(v) if v == var => Some(with.clone()),
            _ => None,
        })
    }

    /// Replace `D(v, t)` for every `v` in `map`.
    pub fn substitute_derivatives(&self, map: &BTreeMap<Var, Expr>) -> Expr {
        self.map_leaves(&mut |e| match e {
            Expr::Deriv(v) => map.get(v).cloned(),
            _ => None,
        })
    }

    /// Evaluate every signal `k` timesteps further in the past.
    pub fn delayed(&self, k: u8) -> Expr {
        if k == 0 {
            return self.clone();
        }
        self.map_leaves(&mut |e| match e {
            Expr::Var(v) if v.is_signal() => Some(Expr::Var(v.delayed(k))),
            Expr::Deriv(v) if v.is_signal() => Some(Expr::Deriv(v.delayed(k))),
            _ => None,
        })
    }

    /// Numeric evaluation; `None` if a variable is unbound or a derivative remains.
    pub fn evaluate<E: Fn(&Var) -> Option<f64>>(&self, env: &E) -> Option<f64> {
        Some(match self {
            Expr::Const(c) => *c,
            Expr::Var(v) => env(v)?,
            Expr::Deriv(_) => return None,
            Expr::Sum(terms) => {
                let mut acc = 0.0;
                for t in terms {
                    acc += t.evaluate(env)?;
                }
                acc
            }
            Expr::Product(factors) => {
                let mut acc = 1.0;
                for t in factors {
                    acc *= t.evaluate(env)?;
                }
                acc
            }
            Expr::Pow(base, exponent) => base.evaluate(env)?.powf(exponent.evaluate(env)?),
            Expr::Call(func, arg) => func.apply(arg.evaluate(env)?),
        })
    }
}

/// `c * e` without re-running the merge logic.
fn scale(e: Expr, c: f64) -> Expr {
    if c == 1.0 {
        return e;
    }
    match e {
        Expr::Product(mut factors) => {
            factors.insert(0, Expr::Const(c));
            Expr::Product(factors)
        }
        other => Expr::Product(vec![Expr::Const(c), other]),
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::Var(var)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::product([self, Expr::pow(rhs, Expr::Const(-1.0))])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::Const(-1.0), self])
    }
}

macro_rules! impl_scalar_ops {
    ($($trait:ident :: $method:ident),*) => {$(
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $trait::$method(self, Expr::Const(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $trait::$method(Expr::Const(self), rhs)
            }
        }
    )*};
}

impl_scalar_ops!(Add::add, Sub::sub, Mul::mul, Div::div);

fn fmt_operand(e: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match e {
        Expr::Sum(_) | Expr::Product(_) | Expr::Pow(..) => write!(f, "({})", e),
        Expr::Const(c) if *c < 0.0 => write!(f, "({})", c),
        _ => write!(f, "{}", e),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Deriv(v) => write!(f, "D({}, t)", v),
            Expr::Sum(terms) => {
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{}", t)?;
                }
                Ok(())
            }
            Expr::Product(factors) => {
                for (i, t) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    match t {
                        Expr::Sum(_) => write!(f, "({})", t)?,
                        _ => write!(f, "{}", t)?,
                    }
                }
                Ok(())
            }
            Expr::Pow(base, exponent) => {
                fmt_operand(base, f)?;
                write!(f, "^")?;
                fmt_operand(exponent, f)
            }
            Expr::Call(func, arg) => write!(f, "{}({})", func.name(), arg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn x() -> Expr {
        Expr::Var(Var::signal("x"))
    }

    fn y() -> Expr {
        Expr::Var(Var::signal("y"))
    }

    #[test]
    fn test_like_terms_cancel() {
        assert_eq!(x() - x(), Expr::ZERO);
        assert_eq!(x() + x(), 2.0 * x());
        assert_eq!((x() + y()) - (y() + x()), Expr::ZERO);
    }

    #[test]
    fn test_like_bases_merge() {
        assert_eq!(x() / x(), Expr::ONE);
        assert_eq!(x() * x(), x().powi(2));
        assert_eq!((2.0 * x() * y()) / (x() * y()), Expr::Const(2.0));
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(Expr::Const(2.0) * 3.0 + 1.0, Expr::Const(7.0));
        assert_eq!(Expr::Const(0.0).exp(), Expr::ONE);
        assert_eq!(x() * 0.0, Expr::ZERO);
    }

    #[test]
    fn test_substitute_and_delay() {
        let e = x() * y() + 1.0;
        let mut map = BTreeMap::new();
        map.insert(Var::signal("y"), Expr::Const(4.0));
        assert_eq!(e.substitute(&map), 4.0 * x() + 1.0);

        let delayed = e.delayed(1);
        let vars = delayed.variables();
        assert!(vars.contains(&Var::signal("x").at(1)));
        assert!(vars.contains(&Var::signal("y").at(1)));
        assert!(!delayed.depends_on(&Var::signal("x")));
    }

    #[test]
    fn test_parameters_are_not_delayed() {
        let p = Expr::Var(Var::parameter("gain"));
        let e = p.clone() * x();
        assert!(e.delayed(2).depends_on(&Var::parameter("gain")));
    }

    #[test]
    fn test_evaluate() {
        let e = (x() + 1.0).powi(2) / y() + (x() * 0.5).exp();
        let env = |v: &Var| match v.name() {
            "x" => Some(2.0),
            "y" => Some(3.0),
            _ => None,
        };
        assert_relative_eq!(e.evaluate(&env).unwrap_or(f64::NAN), 3.0 + 1f64.exp(), epsilon = 1e-12);
        assert_eq!(Expr::Var(Var::signal("z")).evaluate(&env), None);
    }

    #[test]
    fn test_derivatives_are_tracked_separately() {
        let e = Expr::Deriv(Var::signal("x")) * 1e-6 + y();
        assert!(e.has_derivative());
        assert!(e.derivatives().contains(&Var::signal("x")));
        assert!(!e.variables().contains(&Var::signal("x")));
    }

    #[test]
    fn test_display() {
        assert_eq!(Var::signal("V(out)").at(2).to_string(), "V(out)[t-2h]");
        assert_eq!(Var::signal("VC1").delta().to_string(), "dVC1");
        assert_eq!((x() + 1.0).exp().to_string(), "exp(x[t] + 1)");
    }
}
