//! Linear passive components: Resistor, Capacitor, Inductor.

use crate::algebra::{Expr, Var};
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};

/// A resistor component.
///
/// A resistance of exactly zero is an ideal conductor: the two terminals
/// are forced to the same voltage and the current becomes an unknown.
/// Negative resistances are allowed and model active elements.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub resistance: f64,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], resistance: f64) -> Self {
        Self {
            name: name.into(),
            nodes,
            resistance,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !self.resistance.is_finite() {
            return Err(TransimError::invalid_component(
                &self.name,
                "resistance must be finite",
            ));
        }
        contribute_resistance(mna, &self.name, self.nodes, Expr::Const(self.resistance))
    }
}

/// Stamp a (possibly symbolic) resistance between two nodes.
pub(crate) fn contribute_resistance(
    mna: &mut Analysis,
    name: &str,
    nodes: [NodeId; 2],
    resistance: Expr,
) -> Result<()> {
    let [a, b] = nodes;
    let v = mna.voltage(a) - mna.voltage(b);
    let i = if resistance.is_zero() {
        let i = mna.add_unknown(format!("i{}", name))?;
        mna.add_equation(v, Expr::ZERO);
        i
    } else {
        v / resistance
    };
    mna.add_passive(a, b, i.clone());
    mna.set_current(name, i);
    Ok(())
}

/// A capacitor component.
///
/// The voltage across the capacitor is an unknown `V<name>` whose time
/// derivative sets the current: `i = C * dV/dt`.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub nodes: [NodeId; 2],
    pub capacitance: f64,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], capacitance: f64) -> Self {
        Self {
            name: name.into(),
            nodes,
            capacitance,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !(self.capacitance.is_finite() && self.capacitance > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "capacitance must be positive",
            ));
        }
        let [a, b] = self.nodes;
        let voltage = Var::signal(format!("V{}", self.name));
        let across = mna.voltage(a) - mna.voltage(b);
        mna.add_unknown_equal_to(voltage.name(), across)?;

        let i = self.capacitance * Expr::deriv(voltage);
        mna.add_passive(a, b, i.clone());
        mna.set_current(&self.name, i);
        Ok(())
    }
}

/// An inductor component.
///
/// The current through the inductor is an unknown `i<name>` satisfying
/// `V = L * di/dt`.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub nodes: [NodeId; 2],
    pub inductance: f64,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], inductance: f64) -> Self {
        Self {
            name: name.into(),
            nodes,
            inductance,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !(self.inductance.is_finite() && self.inductance > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "inductance must be positive",
            ));
        }
        let [a, b] = self.nodes;
        let current = Var::signal(format!("i{}", self.name));
        let i = mna.add_unknown(current.name())?;
        let across = mna.voltage(a) - mna.voltage(b);
        mna.add_equation(across, self.inductance * Expr::deriv(current));
        mna.add_passive(a, b, i.clone());
        mna.set_current(&self.name, i);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> Analysis {
        Analysis::new(&["0".to_string(), "a".to_string()])
    }

    #[test]
    fn test_resistor_current() {
        let mut mna = analysis();
        let r = Resistor::new("R1", [NodeId(1), NodeId::GROUND], 1000.0);
        r.contribute(&mut mna).unwrap();
        let expected = Expr::Var(Var::signal("V(a)")) / 1000.0;
        assert_eq!(mna.current("R1"), Some(&expected));
        assert_eq!(mna.unknowns().len(), 1);
    }

    #[test]
    fn test_zero_resistance_adds_unknown() {
        let mut mna = analysis();
        let r = Resistor::new("R0", [NodeId(1), NodeId::GROUND], 0.0);
        r.contribute(&mut mna).unwrap();
        assert!(mna.unknowns().contains(&Var::signal("iR0")));
        assert_eq!(mna.equations().len(), 2);
    }

    #[test]
    fn test_capacitor_uses_derivative() {
        let mut mna = analysis();
        let c = Capacitor::new("C1", [NodeId(1), NodeId::GROUND], 1e-6);
        c.contribute(&mut mna).unwrap();
        assert!(mna.unknowns().contains(&Var::signal("VC1")));
        let current = mna.current("C1").cloned().unwrap_or(Expr::ZERO);
        assert!(current.derivatives().contains(&Var::signal("VC1")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut mna = analysis();
        assert!(Capacitor::new("C1", [NodeId(1), NodeId::GROUND], 0.0)
            .contribute(&mut mna)
            .is_err());
        assert!(Inductor::new("L1", [NodeId(1), NodeId::GROUND], -1.0)
            .contribute(&mut mna)
            .is_err());
        assert!(Resistor::new("R1", [NodeId(1), NodeId::GROUND], f64::NAN)
            .contribute(&mut mna)
            .is_err());
    }
}
