//! Minimal computer-algebra layer consumed by the solver.
//!
//! The transient builder only needs a narrow contract from a symbolic
//! library: expression trees with a little simplification, symbolic
//! differentiation, dependency queries, decomposition into linear
//! combinations and symbolic row reduction. Everything here runs at build
//! time; nothing in this module is touched while a simulation is running.

mod diff;
mod expr;
mod linear;
mod system;

pub use diff::differentiate;
pub use expr::{Expr, Func, Var, VarKind};
pub use linear::LinearCombination;
pub use system::{back_substitute, row_reduce, Equation, Reduction};
