//! Circuit graph structure.

use std::collections::HashMap;

use super::analysis::Analysis;
use super::types::{ComponentId, NodeId};
use super::validate::validate_circuit;
use crate::algebra::Expr;
use crate::components::Component;
use crate::error::{Result, TransimError};
use crate::solver::{NewtonSimulationBuilder, Simulation};

/// A circuit: components connected between named nodes.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// All components in the circuit
    pub components: Vec<Component>,

    /// Mapping from node names to node IDs
    pub node_map: HashMap<String, NodeId>,

    /// Reverse mapping from node IDs to names
    pub node_names: Vec<String>,

    /// Nodes whose voltages are the simulation outputs, in order
    pub probes: Vec<NodeId>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit containing only the ground node
    /// (reachable as `"0"` or `"GND"`).
    pub fn new() -> Self {
        let mut node_map = HashMap::new();
        node_map.insert("0".to_string(), NodeId::GROUND);
        node_map.insert("GND".to_string(), NodeId::GROUND);
        Self {
            components: Vec::new(),
            node_map,
            node_names: vec!["0".to_string()],
            probes: Vec::new(),
        }
    }

    /// Get the node called `name`, creating it if needed.
    pub fn node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.node_map.get(name) {
            return id;
        }
        let id = NodeId(self.node_names.len());
        self.node_map.insert(name.to_string(), id);
        self.node_names.push(name.to_string());
        id
    }

    /// Find a node ID by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_map.get(name).copied()
    }

    /// Get the name of a node.
    pub fn node_name(&self, node: NodeId) -> &str {
        &self.node_names[node.0]
    }

    /// Number of nodes (including ground).
    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    /// Add a component. Component names must be unique.
    pub fn add(&mut self, component: impl Into<Component>) -> Result<ComponentId> {
        let component = component.into();
        if self.components.iter().any(|c| c.name() == component.name()) {
            return Err(TransimError::DuplicateComponent {
                name: component.name().to_string(),
            });
        }
        if let Some(node) = component.nodes().iter().find(|n| n.0 >= self.num_nodes()) {
            return Err(TransimError::NodeNotFound {
                node: node.to_string(),
            });
        }
        let id = ComponentId(self.components.len());
        self.components.push(component);
        Ok(id)
    }

    /// Find a component by name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Declare the voltage of `node` as a simulation output.
    pub fn probe(&mut self, node: &str) -> Result<NodeId> {
        let id = self.find_node(node).ok_or_else(|| TransimError::NodeNotFound {
            node: node.to_string(),
        })?;
        if id.is_ground() {
            return Err(TransimError::InvalidTopology {
                message: "cannot probe the ground node".to_string(),
            });
        }
        self.probes.push(id);
        Ok(id)
    }

    /// Validate the circuit and collect every component's equations.
    pub fn analyze(&self) -> Result<Analysis> {
        validate_circuit(self)?;
        let mut analysis = Analysis::new(&self.node_names);
        for component in &self.components {
            component.contribute(&mut analysis)?;
        }
        Ok(analysis)
    }

    /// Build a simulation whose inputs are the circuit's input signals (in
    /// declaration order) and whose outputs are the probed node voltages.
    pub fn build(&self, builder: &NewtonSimulationBuilder) -> Result<Simulation> {
        let analysis = self.analyze()?;
        let outputs: Vec<Expr> = self.probes.iter().map(|&n| analysis.voltage(n)).collect();
        builder.build(&analysis, analysis.inputs(), &outputs)
    }
}
