//! Behavioral current source: an arbitrary current expression.

use crate::algebra::Expr;
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};

/// Two-terminal element whose current is an arbitrary expression.
///
/// The expression may reference node voltages (`V(<node>)` signals),
/// unknowns declared by other components, parameters, inputs and time.
#[derive(Debug, Clone)]
pub struct BehavioralSource {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub current: Expr,
}

impl BehavioralSource {
    /// Create a source carrying `current` from + to - through the element.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], current: Expr) -> Self {
        Self {
            name: name.into(),
            nodes,
            current,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if let Some(var) = self.current.derivatives().into_iter().find(|v| v.delay() > 0) {
            return Err(TransimError::invalid_component(
                &self.name,
                format!("derivative of delayed signal {}", var),
            ));
        }
        let [a, b] = self.nodes;
        mna.add_passive(a, b, self.current.clone());
        mna.set_current(&self.name, self.current.clone());
        Ok(())
    }
}
