//! The transient solution: an ordered plan for solving one timestep.

use std::collections::BTreeMap;
use std::fmt;

use crate::algebra::{Expr, LinearCombination, Var};
use crate::circuit::Parameter;
use crate::components::JunctionLimit;

/// Assignment `left = right`.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrow {
    pub left: Var,
    pub right: Expr,
}

impl Arrow {
    pub fn new(left: Var, right: Expr) -> Self {
        Self { left, right }
    }
}

impl fmt::Display for Arrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.left, self.right)
    }
}

/// Unknowns with closed-form solutions, evaluated in order.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolutions {
    pub solutions: Vec<Arrow>,
}

/// A system solved by Newton's method.
///
/// Each row is `J * dx + F = 0` as a linear combination over the delta
/// variables. The deltas in `updates` are solved numerically every
/// iteration; the deltas in `solved` were eliminated symbolically and are
/// evaluated from the numeric ones (each expression only references deltas
/// in `updates` or earlier entries of `solved`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonIteration {
    pub solved: Vec<Arrow>,
    pub equations: Vec<LinearCombination>,
    pub updates: Vec<Var>,
    /// Initial values of the unknowns before the first iteration.
    pub guesses: Vec<Arrow>,
    /// Step limits of the numeric updates that are junction voltages,
    /// keyed by delta.
    pub limits: Vec<(Var, JunctionLimit)>,
}

impl NewtonIteration {
    /// Every unknown solved by this set, numeric updates first.
    pub fn unknowns(&self) -> impl Iterator<Item = Var> + '_ {
        self.updates
            .iter()
            .chain(self.solved.iter().map(|a| &a.left))
            .map(Var::current)
    }
}

/// One step of the per-timestep plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SolutionSet {
    Linear(LinearSolutions),
    Newton(NewtonIteration),
}

impl SolutionSet {
    /// Unknowns this set assigns.
    pub fn unknowns(&self) -> Vec<Var> {
        match self {
            SolutionSet::Linear(s) => s.solutions.iter().map(|a| a.left.clone()).collect(),
            SolutionSet::Newton(s) => s.unknowns().collect(),
        }
    }

    /// Every expression evaluated by this set, apart from the initial
    /// guesses of a Newton set.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            SolutionSet::Linear(s) => s.solutions.iter().map(|a| &a.right).collect(),
            SolutionSet::Newton(s) => {
                let mut exprs: Vec<&Expr> = Vec::new();
                for row in &s.equations {
                    exprs.push(row.constant());
                    exprs.extend(row.terms().iter().map(|(_, c)| c));
                }
                exprs.extend(s.solved.iter().map(|a| &a.right));
                exprs
            }
        }
    }
}

/// Immutable result of [`TransientSolution::solve`](crate::solver::TransientSolution::solve).
#[derive(Debug, Clone)]
pub struct TransientSolution {
    pub(crate) time_step: f64,
    pub(crate) unknowns: Vec<Var>,
    pub(crate) sets: Vec<SolutionSet>,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) initial_conditions: BTreeMap<Var, f64>,
}

impl TransientSolution {
    /// Timestep `h` the equations were discretized with.
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// All unknowns, including the derivative unknowns introduced by
    /// discretization.
    pub fn unknowns(&self) -> &[Var] {
        &self.unknowns
    }

    /// Solution sets in evaluation order.
    pub fn sets(&self) -> &[SolutionSet] {
        &self.sets
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// DC operating point the simulation starts from. Unknowns without an
    /// entry start at zero.
    pub fn initial_conditions(&self) -> &BTreeMap<Var, f64> {
        &self.initial_conditions
    }

    pub fn initial_condition(&self, var: &Var) -> f64 {
        self.initial_conditions.get(var).copied().unwrap_or(0.0)
    }
}
