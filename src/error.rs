//! Error types for the transim circuit simulator.
//!
//! This module provides a unified error type [`TransimError`] that covers
//! all error conditions that can occur while describing a circuit, building
//! a simulation from it, and running that simulation.

use thiserror::Error;

/// Result type alias using [`TransimError`].
pub type Result<T> = std::result::Result<T, TransimError>;

/// Unified error type for all transim operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransimError {
    // ============ Circuit Description Errors ============
    /// Node not found in circuit
    #[error("Node '{node}' not found in circuit")]
    NodeNotFound { node: String },

    /// Duplicate component name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// Invalid component definition
    #[error("Invalid component '{name}': {message}")]
    InvalidComponent { name: String, message: String },

    /// Invalid circuit topology
    #[error("Invalid circuit topology: {message}")]
    InvalidTopology { message: String },

    /// Unknown preset circuit
    #[error("Unknown preset circuit '{name}'")]
    UnknownPreset { name: String },

    // ============ Build Errors ============
    /// The circuit cannot be reduced to a solvable system
    #[error("Circuit is not simulatable: {message}")]
    BuildFailed { message: String },

    /// The build was cancelled before it completed
    #[error("Simulation build was cancelled")]
    Cancelled,

    // ============ Simulation Errors ============
    /// A simulated value became NaN or infinite
    #[error("Simulation diverged at sample {at} (t = {time:.6} s)")]
    Diverged { at: u64, time: f64 },

    /// Invalid simulation argument (settings, buffer shapes)
    #[error("Invalid simulation argument: {message}")]
    InvalidArgument { message: String },

    /// Input name not declared when the simulation was built
    #[error("Unknown simulation input '{name}'")]
    UnknownInput { name: String },

    /// Output expression not declared when the simulation was built
    #[error("Unknown simulation output '{name}'")]
    UnknownOutput { name: String },

    /// Parameter not present in the circuit
    #[error("Unknown parameter '{name}'")]
    UnknownParameter { name: String },

    // ============ I/O Errors ============
    /// Error reading audio input
    #[error("Audio input error: {message}")]
    AudioInputError { message: String },

    /// Error writing audio output
    #[error("Audio output error: {message}")]
    AudioOutputError { message: String },

    // ============ WASM Errors ============
    /// WASM-specific error
    #[cfg(feature = "wasm")]
    #[error("WASM error: {message}")]
    WasmError { message: String },
}

impl TransimError {
    /// Create a build failure error
    pub fn build_failed(message: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
        }
    }

    /// Create an invalid component error
    pub fn invalid_component(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidComponent {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a divergence error for an absolute sample index
    pub fn diverged(at: u64, time_step: f64) -> Self {
        Self::Diverged {
            at,
            time: at as f64 * time_step,
        }
    }

    /// Check whether this error was raised by a running simulation rather than a build.
    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Diverged { .. } | Self::InvalidArgument { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diverged_carries_time() {
        let err = TransimError::diverged(480, 1.0 / 48000.0);
        match err {
            TransimError::Diverged { at, time } => {
                assert_eq!(at, 480);
                approx::assert_relative_eq!(time, 0.01, max_relative = 1e-12);
            }
            ref other => panic!("unexpected {}", other),
        }
        assert!(err.is_runtime());
        assert!(!TransimError::build_failed("singular").is_runtime());
        assert!(!TransimError::Cancelled.is_runtime());
    }
}
