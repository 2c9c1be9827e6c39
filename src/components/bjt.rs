//! BJT (Bipolar Junction Transistor) model.
//!
//! Ebers-Moll injection model for NPN and PNP transistors: two junction
//! diodes coupled through the forward and reverse alpha factors.

use super::diode::JunctionLimit;
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};
use crate::THERMAL_VOLTAGE;

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtType {
    Npn,
    Pnp,
}

/// Parameters for a BJT model.
#[derive(Debug, Clone, PartialEq)]
pub struct BjtParams {
    /// Forward current gain (β_F)
    pub beta_f: f64,
    /// Reverse current gain (β_R)
    pub beta_r: f64,
    /// Junction saturation current
    pub is: f64,
}

impl Default for BjtParams {
    fn default() -> Self {
        Self {
            beta_f: 100.0,
            beta_r: 1.0,
            is: 1e-12,
        }
    }
}

/// A BJT component.
#[derive(Debug, Clone)]
pub struct Bjt {
    pub name: String,
    pub nodes: [NodeId; 3], // [collector, base, emitter]
    pub bjt_type: BjtType,
    pub params: BjtParams,
}

impl Bjt {
    /// Create a new BJT.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 3], bjt_type: BjtType, params: BjtParams) -> Self {
        Self {
            name: name.into(),
            nodes,
            bjt_type,
            params,
        }
    }

    pub fn collector(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn base(&self) -> NodeId {
        self.nodes[1]
    }

    pub fn emitter(&self) -> NodeId {
        self.nodes[2]
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        let p = &self.params;
        if !(p.is > 0.0 && p.beta_f > 0.0 && p.beta_r > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "saturation current and gains must be positive",
            ));
        }
        let sign = match self.bjt_type {
            BjtType::Npn => 1.0,
            BjtType::Pnp => -1.0,
        };
        let (c, b, e) = (self.collector(), self.base(), self.emitter());

        let bc = sign * (mna.voltage(b) - mna.voltage(c));
        let be = sign * (mna.voltage(b) - mna.voltage(e));
        let v_bc = mna.add_unknown_equal_to(format!("V{}bc", self.name), bc)?;
        let v_be = mna.add_unknown_equal_to(format!("V{}be", self.name), be)?;
        let limit = JunctionLimit::new(THERMAL_VOLTAGE, p.is);
        mna.add_junction(&v_bc, limit);
        mna.add_junction(&v_be, limit);

        let alpha_r = p.beta_r / (1.0 + p.beta_r);
        let alpha_f = p.beta_f / (1.0 + p.beta_f);
        let i_be = p.is * ((v_be / THERMAL_VOLTAGE).exp() - 1.0);
        let i_bc = p.is * ((v_bc / THERMAL_VOLTAGE).exp() - 1.0);

        let ie = i_be.clone() - alpha_r * i_bc.clone();
        let ic = alpha_f * i_be - i_bc;

        // Both unknowns are currents flowing into the device terminal.
        let ic = mna.add_unknown_equal_to(format!("i{}c", self.name), sign * ic)?;
        let ie = mna.add_unknown_equal_to(format!("i{}e", self.name), -sign * ie)?;
        mna.add_terminal(c, -ic.clone());
        mna.add_terminal(b, ic.clone() + ie.clone());
        mna.add_terminal(e, -ie);
        mna.set_current(&self.name, ic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Var;

    #[test]
    fn test_bjt_declares_junction_unknowns() {
        let names = ["0", "c", "b", "e"].map(String::from);
        let mut mna = Analysis::new(&names);
        Bjt::new("Q1", [NodeId(1), NodeId(2), NodeId(3)], BjtType::Npn, BjtParams::default())
            .contribute(&mut mna)
            .unwrap();
        for name in ["VQ1bc", "VQ1be", "iQ1c", "iQ1e"] {
            assert!(mna.unknowns().contains(&Var::signal(name)), "missing {}", name);
        }
        // 3 node equations + 4 component equations
        assert_eq!(mna.equations().len(), 7);
        assert_eq!(mna.junctions().len(), 2);
    }

    #[test]
    fn test_npn_sinks_collector_current() {
        let names = ["0", "c", "b", "e"].map(String::from);
        let mut mna = Analysis::new(&names);
        Bjt::new("Q1", [NodeId(1), NodeId(2), NodeId(3)], BjtType::Npn, BjtParams::default())
            .contribute(&mut mna)
            .unwrap();
        let equations = mna.equations();
        // Forward active: 1 mA into the collector, 1.01 mA out of the emitter.
        let env = |v: &Var| match v.name() {
            "iQ1c" => Some(1e-3),
            "iQ1e" => Some(-1.01e-3),
            _ => None,
        };
        let kcl: Vec<f64> = equations[4..]
            .iter()
            .map(|e| e.residual().evaluate(&env).unwrap())
            .collect();
        // Currents into the collector, base and emitter nodes.
        approx::assert_relative_eq!(kcl[0], -1e-3, max_relative = 1e-12);
        approx::assert_relative_eq!(kcl[1], -1e-5, max_relative = 1e-9);
        approx::assert_relative_eq!(kcl[2], 1.01e-3, max_relative = 1e-12);
    }
}
