//! Symbolic Modified Nodal Analysis.
//!
//! Components contribute to an [`Analysis`] by declaring unknowns,
//! equations and the currents they push into nodes. Once every component has
//! contributed, the analysis holds one Kirchhoff current law equation per
//! non-ground node plus the component equations, ready for the transient
//! builder.

use std::collections::BTreeMap;

use super::types::NodeId;
use crate::algebra::{Equation, Expr, Var};
use crate::components::JunctionLimit;
use crate::error::{Result, TransimError};

/// A runtime-adjustable circuit parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

impl Parameter {
    pub fn var(&self) -> Var {
        Var::parameter(&self.name)
    }

    /// `value` pulled into `[min, max]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// The equation system of a circuit.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    node_names: Vec<String>,
    /// Sum of currents flowing into each non-ground node.
    kcl: BTreeMap<NodeId, Vec<Expr>>,
    equations: Vec<Equation>,
    unknowns: Vec<Var>,
    parameters: Vec<Parameter>,
    inputs: Vec<Var>,
    currents: BTreeMap<String, Expr>,
    junctions: Vec<(Var, JunctionLimit)>,
}

impl Analysis {
    /// Create an analysis over the given nodes; index 0 is ground.
    pub fn new(node_names: &[String]) -> Self {
        let mut analysis = Self {
            node_names: node_names.to_vec(),
            ..Self::default()
        };
        for i in 1..node_names.len() {
            let var = analysis.node_var(NodeId(i));
            analysis.unknowns.push(var);
            analysis.kcl.insert(NodeId(i), Vec::new());
        }
        analysis
    }

    fn node_var(&self, node: NodeId) -> Var {
        Var::signal(format!("V({})", self.node_names[node.0]))
    }

    /// Voltage of `node` relative to ground.
    pub fn voltage(&self, node: NodeId) -> Expr {
        if node.is_ground() {
            Expr::ZERO
        } else {
            Expr::Var(self.node_var(node))
        }
    }

    /// Register `current` flowing into `node` from a component terminal.
    pub fn add_terminal(&mut self, node: NodeId, current: Expr) {
        if let Some(sum) = self.kcl.get_mut(&node) {
            sum.push(current);
        }
    }

    /// Register a two-terminal element carrying `current` from `anode`
    /// through the element to `cathode`.
    pub fn add_passive(&mut self, anode: NodeId, cathode: NodeId, current: Expr) {
        self.add_terminal(anode, -current.clone());
        self.add_terminal(cathode, current);
    }

    /// Declare a new unknown signal.
    pub fn add_unknown(&mut self, name: impl AsRef<str>) -> Result<Expr> {
        let var = Var::signal(name);
        if self.unknowns.contains(&var) {
            return Err(TransimError::InvalidTopology {
                message: format!("unknown '{}' declared twice", var.name()),
            });
        }
        self.unknowns.push(var.clone());
        Ok(Expr::Var(var))
    }

    /// Declare a new unknown constrained to equal `value`.
    pub fn add_unknown_equal_to(&mut self, name: impl AsRef<str>, value: Expr) -> Result<Expr> {
        let unknown = self.add_unknown(name)?;
        self.add_equation(unknown.clone(), value);
        Ok(unknown)
    }

    pub fn add_equation(&mut self, lhs: impl Into<Expr>, rhs: impl Into<Expr>) {
        self.equations.push(Equation::new(lhs, rhs));
    }

    /// Declare an unbounded runtime parameter, returning its symbol.
    pub fn add_parameter(&mut self, name: impl Into<String>, default: f64) -> Expr {
        self.add_bounded_parameter(name, default, f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Declare a runtime parameter restricted to `[min, max]`, returning its
    /// symbol. Declaring the same name twice yields the same parameter, with
    /// the bounds narrowed to fit both declarations.
    pub fn add_bounded_parameter(&mut self, name: impl Into<String>, default: f64, min: f64, max: f64) -> Expr {
        let name = name.into();
        let var = match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.min = p.min.max(min);
                p.max = p.max.min(max);
                p.var()
            }
            None => {
                let p = Parameter {
                    name,
                    default: default.max(min).min(max),
                    min,
                    max,
                };
                let var = p.var();
                self.parameters.push(p);
                var
            }
        };
        Expr::Var(var)
    }

    /// Declare an external input signal, returning its symbol.
    pub fn add_input(&mut self, name: impl AsRef<str>) -> Expr {
        let var = Var::signal(name);
        if !self.inputs.contains(&var) {
            self.inputs.push(var.clone());
        }
        Expr::Var(var)
    }

    /// Mark `junction`, an unknown declared by the caller, as a pn-junction
    /// voltage whose Newton steps are limited.
    pub fn add_junction(&mut self, junction: &Expr, limit: JunctionLimit) {
        if let Some(var) = junction.as_var() {
            self.junctions.push((var.clone(), limit));
        }
    }

    /// Record the current through a named component, for probing.
    pub fn set_current(&mut self, component: impl Into<String>, current: Expr) {
        self.currents.insert(component.into(), current);
    }

    /// All equations: component equations followed by one KCL equation per
    /// non-ground node.
    pub fn equations(&self) -> Vec<Equation> {
        let mut equations = self.equations.clone();
        for terms in self.kcl.values() {
            equations.push(Equation::new(Expr::sum(terms.iter().cloned()), Expr::ZERO));
        }
        equations
    }

    pub fn unknowns(&self) -> &[Var] {
        &self.unknowns
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn inputs(&self) -> &[Var] {
        &self.inputs
    }

    pub fn junctions(&self) -> &[(Var, JunctionLimit)] {
        &self.junctions
    }

    /// Current through a component, if it recorded one.
    pub fn current(&self, component: &str) -> Option<&Expr> {
        self.currents.get(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<String> {
        vec!["0".to_string(), "a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_node_unknowns_and_kcl() {
        let mut mna = Analysis::new(&nodes());
        assert_eq!(mna.unknowns().len(), 2);
        assert_eq!(mna.voltage(NodeId::GROUND), Expr::ZERO);

        let i = (mna.voltage(NodeId(1)) - mna.voltage(NodeId(2))) / 1000.0;
        mna.add_passive(NodeId(1), NodeId(2), i.clone());
        mna.add_passive(NodeId(2), NodeId::GROUND, Expr::Const(1e-3));

        let equations = mna.equations();
        assert_eq!(equations.len(), 2);
        assert_eq!(equations[0].lhs.clone() + i.clone(), Expr::ZERO);
        assert_eq!(equations[1].lhs.clone() - i, Expr::Const(-1e-3));
    }

    #[test]
    fn test_duplicate_unknown_is_rejected() {
        let mut mna = Analysis::new(&nodes());
        assert!(mna.add_unknown("iV1").is_ok());
        assert!(mna.add_unknown("iV1").is_err());
    }

    #[test]
    fn test_parameters_are_shared_by_name() {
        let mut mna = Analysis::new(&nodes());
        let a = mna.add_parameter("tone", 0.5);
        let b = mna.add_parameter("tone", 0.9);
        assert_eq!(a, b);
        assert_eq!(mna.parameters().len(), 1);
        assert_eq!(mna.parameters()[0].min, f64::NEG_INFINITY);
        assert_eq!(mna.parameters()[0].default, 0.5);
    }

    #[test]
    fn test_bounded_parameter() {
        let mut mna = Analysis::new(&nodes());
        mna.add_bounded_parameter("gain", 4.0, 0.0, 2.0);
        mna.add_bounded_parameter("gain", 1.0, 0.5, 10.0);
        let p = &mna.parameters()[0];
        assert_eq!(p.default, 2.0);
        assert_eq!((p.min, p.max), (0.5, 2.0));
        assert_eq!(p.clamp(-1.0), 0.5);
        assert_eq!(p.clamp(1.5), 1.5);
    }
}
