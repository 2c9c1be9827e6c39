//! Voltage and current sources.

use crate::algebra::Expr;
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};

/// Ideal voltage source: enforces `V+ - V- = voltage`.
///
/// The branch current `i<name>` becomes an unknown.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub voltage: f64,
}

impl VoltageSource {
    /// Create a new DC voltage source.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], voltage: f64) -> Self {
        Self {
            name: name.into(),
            nodes,
            voltage,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !self.voltage.is_finite() {
            return Err(TransimError::invalid_component(&self.name, "voltage must be finite"));
        }
        contribute_voltage(mna, &self.name, self.nodes, Expr::Const(self.voltage))
    }
}

fn contribute_voltage(mna: &mut Analysis, name: &str, nodes: [NodeId; 2], value: Expr) -> Result<()> {
    let [a, b] = nodes;
    let i = mna.add_unknown(format!("i{}", name))?;
    let across = mna.voltage(a) - mna.voltage(b);
    mna.add_equation(across, value);
    mna.add_passive(a, b, i.clone());
    mna.set_current(name, i);
    Ok(())
}

/// Ideal current source.
///
/// `current` flows from the + terminal through the source to the - terminal.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub current: f64,
}

impl CurrentSource {
    /// Create a new DC current source.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], current: f64) -> Self {
        Self {
            name: name.into(),
            nodes,
            current,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !self.current.is_finite() {
            return Err(TransimError::invalid_component(&self.name, "current must be finite"));
        }
        let [a, b] = self.nodes;
        let i = Expr::Const(self.current);
        mna.add_passive(a, b, i.clone());
        mna.set_current(&self.name, i);
        Ok(())
    }
}

/// Voltage source driven by an external input signal.
///
/// Several input components may share one signal name.
#[derive(Debug, Clone)]
pub struct Input {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub signal: String,
}

impl Input {
    /// Create a new input source driven by `signal`.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], signal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes,
            signal: signal.into(),
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        let value = mna.add_input(&self.signal);
        contribute_voltage(mna, &self.name, self.nodes, value)
    }
}
