//! # Transim Core
//!
//! A real-time transient circuit simulator.
//!
//! Circuits are described as components between nodes. Each component
//! contributes symbolic equations (modified nodal analysis); the equations
//! are discretized with the trapezoidal rule, split into closed-form
//! solutions and Newton-Raphson systems, and compiled into a compact
//! program that advances the circuit one sample at a time.
//!
//! ## Architecture
//!
//! - [`algebra`] - Symbolic expressions, differentiation and linear systems
//! - [`circuit`] - Circuit graph, validation, analysis and presets
//! - [`components`] - Component models (resistors, capacitors, diodes, etc.)
//! - [`solver`] - Transient solution, compiler and simulation runtime
//! - [`audio`] - Raw audio pipe for the CLI (CLI only)
//!
//! ## Usage
//!
//! ```no_run
//! use transim_core::circuit::presets;
//! use transim_core::solver::{NewtonSettings, NewtonSimulationBuilder};
//!
//! let circuit = presets::rc_lowpass()?;
//! let mut sim = circuit.build(&NewtonSimulationBuilder::new(NewtonSettings::new(48000.0)))?;
//!
//! let input = vec![1.0; 480];
//! let mut output = vec![0.0; 480];
//! sim.run(480, &[&input[..]], &mut [&mut output[..]])?;
//! # Ok::<(), transim_core::TransimError>(())
//! ```
//!
//! ### Native CLI
//!
//! ```bash
//! ffmpeg -i input.wav -f f32le -ac 1 -ar 48000 - | transim process diode_clipper | ffmpeg -f f32le -ac 1 -ar 48000 -i - output.wav
//! ```
//!
//! ### WASM
//!
//! ```javascript
//! import { WasmSimulation } from 'transim_core';
//!
//! const sim = new WasmSimulation('diode_clipper', 48000);
//! sim.process_block(inputBuffer, outputBuffer);
//! ```

pub mod algebra;
pub mod circuit;
pub mod components;
pub mod error;
pub mod solver;

#[cfg(feature = "cli")]
pub mod audio;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{Result, TransimError};
pub use solver::Simulation;

// WASM bindings
#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::WasmSimulation;

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

/// Thermal voltage at room temperature (approximately 26mV)
pub const THERMAL_VOLTAGE: f64 = 0.0258;
