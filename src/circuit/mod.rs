//! Circuit graph representation, validation and symbolic analysis.
//!
//! The [`Circuit`] struct holds all components and nodes. Analyzing it
//! produces an [`Analysis`]: the equations, unknowns and parameters that the
//! transient builder consumes. [`presets`] contains ready-made circuits.

mod analysis;
mod graph;
pub mod presets;
mod types;
mod validate;

pub use analysis::{Analysis, Parameter};
pub use graph::Circuit;
pub use types::*;
pub use validate::validate_circuit;
