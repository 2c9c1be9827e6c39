//! Operational Amplifier model.
//!
//! Finite-gain linear model: the inputs are joined by the input resistance,
//! and the output is a voltage-controlled source `A * (V+ - V-)` behind the
//! output resistance, referenced to ground.

use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};

/// Parameters for an op-amp model.
#[derive(Debug, Clone, PartialEq)]
pub struct OpAmpParams {
    /// Open-loop DC gain (A_OL)
    pub gain: f64,
    /// Output resistance (R_out)
    pub r_out: f64,
    /// Input resistance (R_in)
    pub r_in: f64,
}

impl Default for OpAmpParams {
    fn default() -> Self {
        Self::ideal()
    }
}

impl OpAmpParams {
    /// Create parameters for a near-ideal op-amp.
    pub fn ideal() -> Self {
        Self {
            gain: 1e6,
            r_out: 1.0,
            r_in: 1e12,
        }
    }

    /// Create parameters for a typical 741-style op-amp.
    pub fn ua741() -> Self {
        Self {
            gain: 2e5,
            r_out: 75.0,
            r_in: 2e6,
        }
    }

    /// Create parameters for a TL072-style JFET op-amp.
    pub fn tl072() -> Self {
        Self {
            gain: 2e5,
            r_out: 100.0,
            r_in: 1e12,
        }
    }
}

/// An op-amp component.
#[derive(Debug, Clone)]
pub struct OpAmp {
    pub name: String,
    pub nodes: [NodeId; 3], // [in+, in-, out]
    pub params: OpAmpParams,
}

impl OpAmp {
    /// Create a new op-amp.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 3], params: OpAmpParams) -> Self {
        Self {
            name: name.into(),
            nodes,
            params,
        }
    }

    pub fn input_pos(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn input_neg(&self) -> NodeId {
        self.nodes[1]
    }

    pub fn output(&self) -> NodeId {
        self.nodes[2]
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        let p = &self.params;
        if !(p.gain.is_finite() && p.r_in > 0.0 && p.r_out > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "gain must be finite and resistances positive",
            ));
        }
        let (pos, neg, out) = (self.input_pos(), self.input_neg(), self.output());
        let v_in = mna.voltage(pos) - mna.voltage(neg);
        mna.add_passive(pos, neg, v_in.clone() / p.r_in);

        // G * Vin - Vout = i_out * R_out
        let i_out = mna.add_unknown(format!("i{}out", self.name))?;
        let v_out = mna.voltage(out);
        mna.add_equation(p.gain * v_in - v_out, p.r_out * i_out.clone());
        mna.add_terminal(out, i_out.clone());
        mna.set_current(&self.name, i_out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Var;

    #[test]
    fn test_opamp_output_unknown() {
        let names = ["0", "p", "n", "o"].map(String::from);
        let mut mna = Analysis::new(&names);
        OpAmp::new("U1", [NodeId(1), NodeId(2), NodeId(3)], OpAmpParams::tl072())
            .contribute(&mut mna)
            .unwrap();
        assert!(mna.unknowns().contains(&Var::signal("iU1out")));
        assert_eq!(mna.equations().len(), 4);
    }
}
