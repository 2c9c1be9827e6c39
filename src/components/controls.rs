//! Control components: Potentiometer and Switch.

use super::linear::contribute_resistance;
use crate::algebra::Expr;
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};

/// A potentiometer component.
///
/// Modeled as two resistors in series with a wiper tap:
///   n1 ----[R1]---- wiper ----[R2]---- n2
///
/// where R1 = position * total_resistance
/// and   R2 = (1 - position) * total_resistance
///
/// The position is the runtime parameter `parameter`, so it can be swept
/// while a simulation runs without rebuilding it.
#[derive(Debug, Clone)]
pub struct Potentiometer {
    pub name: String,
    pub nodes: [NodeId; 3], // [n1, wiper, n2]
    pub total_resistance: f64,
    /// Name of the parameter holding the wiper position (0.0 to 1.0)
    pub parameter: String,
    /// Position used until the parameter is set
    pub position: f64,
}

impl Potentiometer {
    /// Resistance kept in each leg so the wiper never shorts an end.
    pub const MIN_RESISTANCE: f64 = 0.1;

    /// Create a new potentiometer whose wiper follows `parameter`.
    pub fn new(
        name: impl Into<String>,
        nodes: [NodeId; 3],
        total_resistance: f64,
        parameter: impl Into<String>,
        position: f64,
    ) -> Self {
        Self {
            name: name.into(),
            nodes,
            total_resistance,
            parameter: parameter.into(),
            position: position.clamp(0.0, 1.0),
        }
    }

    pub fn n1(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn wiper(&self) -> NodeId {
        self.nodes[1]
    }

    pub fn n2(&self) -> NodeId {
        self.nodes[2]
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !(self.total_resistance.is_finite() && self.total_resistance > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "resistance must be positive",
            ));
        }
        let p = mna.add_bounded_parameter(&self.parameter, self.position, 0.0, 1.0);
        let r1 = Self::MIN_RESISTANCE + self.total_resistance * p.clone();
        let r2 = Self::MIN_RESISTANCE + self.total_resistance * (1.0 - p);
        contribute_resistance(mna, &format!("{}a", self.name), [self.n1(), self.wiper()], r1)?;
        contribute_resistance(mna, &format!("{}b", self.name), [self.wiper(), self.n2()], r2)
    }
}

/// A switch component.
///
/// Modeled as a very small resistance when closed and a very large one
/// when open.
#[derive(Debug, Clone)]
pub struct Switch {
    pub name: String,
    pub nodes: [NodeId; 2],
    pub closed: bool,
}

impl Switch {
    /// Resistance when closed (ohms)
    pub const R_CLOSED: f64 = 0.01;
    /// Resistance when open (ohms)
    pub const R_OPEN: f64 = 1e9;

    /// Create a new switch.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], closed: bool) -> Self {
        Self {
            name: name.into(),
            nodes,
            closed,
        }
    }

    /// Get the current resistance based on switch state.
    pub fn resistance(&self) -> f64 {
        if self.closed {
            Self::R_CLOSED
        } else {
            Self::R_OPEN
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        contribute_resistance(mna, &self.name, self.nodes, Expr::Const(self.resistance()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Var;

    #[test]
    fn test_potentiometer_declares_parameter() {
        let names = ["0", "a", "w"].map(String::from);
        let mut mna = Analysis::new(&names);
        Potentiometer::new("P1", [NodeId(1), NodeId(2), NodeId::GROUND], 10e3, "tone", 0.25)
            .contribute(&mut mna)
            .unwrap();
        assert_eq!(mna.parameters().len(), 1);
        assert_eq!(mna.parameters()[0].default, 0.25);
        assert_eq!((mna.parameters()[0].min, mna.parameters()[0].max), (0.0, 1.0));
        let leg = mna.current("P1a").cloned().unwrap_or(Expr::ZERO);
        assert!(leg.depends_on(&Var::parameter("tone")));
    }

    #[test]
    fn test_switch_resistance() {
        assert_eq!(Switch::new("S1", [NodeId(1), NodeId(0)], true).resistance(), Switch::R_CLOSED);
        assert_eq!(Switch::new("S1", [NodeId(1), NodeId(0)], false).resistance(), Switch::R_OPEN);
    }
}
