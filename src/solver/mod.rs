//! Transient solver: from circuit equations to a running simulation.
//!
//! The pipeline has three stages:
//!
//! 1. [`TransientSolution::solve`] discretizes the differential equations
//!    with the trapezoidal rule and splits the resulting algebraic system
//!    into an ordered list of [`SolutionSet`]s: closed-form
//!    [`LinearSolutions`] and Newton-Raphson [`NewtonIteration`]s.
//! 2. [`NewtonSimulationBuilder`] compiles that plan into a flat program:
//!    stack bytecode per expression, register and state slots, and the
//!    Newton blocks with their Jacobian assembly.
//! 3. [`Simulation`] owns the persisted state and runs the program over
//!    blocks of samples.
//!
//! For each Newton solve the runtime assembles the dense system
//!
//! ```text
//! J(x) * dx = -F(x)
//! ```
//!
//! solves it by Gaussian elimination with partial pivoting, and applies
//! `x += dx` until every update is below `RELATIVE_TOLERANCE * |x| +
//! ABSOLUTE_TOLERANCE` or the iteration budget runs out. Steps of junction
//! voltages are limited logarithmically above their critical voltage.
//!
//! The persisted state starts at the circuit's DC operating point, solved
//! once at build time with the same Newton scheme.

mod builder;
mod cancel;
mod compiler;
mod dc;
mod exec;
mod gauss;
mod program;
mod simulation;
mod solution;
pub mod swap;
mod transient;

pub use builder::{NewtonSettings, NewtonSimulationBuilder};
pub use cancel::CancellationToken;
pub use simulation::{RunStats, Simulation};
pub use solution::{Arrow, LinearSolutions, NewtonIteration, SolutionSet, TransientSolution};
pub use transient::SolveConfig;

/// Maximum delay, in timesteps, of any signal reference.
pub const MAX_DELAY: u8 = 6;

/// Relative part of the Newton convergence test.
pub const RELATIVE_TOLERANCE: f64 = 1e-3;

/// Absolute part of the Newton convergence test.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-5;

/// Outputs are checked for divergence when `n & DIVERGENCE_CHECK_MASK == 0`.
pub const DIVERGENCE_CHECK_MASK: usize = 0xFF;

/// Default oversampling factor.
pub const DEFAULT_OVERSAMPLE: u32 = 8;

/// Default Newton iteration budget per solve.
pub const DEFAULT_ITERATIONS: u32 = 8;
