//! Circuit validation.

use log::warn;

use crate::error::{Result, TransimError};

use super::Circuit;

/// Validate a circuit before analysis.
///
/// Checks:
/// - The circuit has at least one component
/// - Every node is attached to at least one component terminal
///
/// Nodes with a single connection and circuits that never touch ground are
/// legal but almost always mistakes, so they are logged.
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.components.is_empty() {
        return Err(TransimError::InvalidTopology {
            message: "Circuit has no components".to_string(),
        });
    }

    let mut connections = vec![0usize; circuit.num_nodes()];
    for component in &circuit.components {
        for node in component.nodes() {
            connections[node.0] += 1;
        }
    }

    for (index, &count) in connections.iter().enumerate().skip(1) {
        let name = &circuit.node_names[index];
        match count {
            0 => {
                return Err(TransimError::InvalidTopology {
                    message: format!("node '{}' is not connected to any component", name),
                })
            }
            1 => warn!("node '{}' has a single connection", name),
            _ => {}
        }
    }

    if connections[0] == 0 {
        warn!("no component is connected to ground");
    }

    Ok(())
}
