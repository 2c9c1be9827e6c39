//! Diode model.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! The voltage across and the current through the diode are both declared
//! as unknowns, so the transient builder can solve the current directly
//! and leave only the junction voltage to Newton's method.

use crate::algebra::Expr;
use crate::circuit::{Analysis, NodeId};
use crate::error::{Result, TransimError};
use crate::THERMAL_VOLTAGE;

/// Parameters for a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeParams {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self { is: 1e-14, n: 1.0 }
    }
}

impl DiodeParams {
    /// Create parameters for a germanium diode (lower forward voltage).
    pub fn germanium() -> Self {
        Self { is: 1e-9, n: 1.5 }
    }

    /// Create parameters for an LED.
    pub fn led() -> Self {
        Self { is: 1e-18, n: 2.0 }
    }

    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    /// Newton step limit for the junction voltage.
    pub fn limit(&self) -> JunctionLimit {
        JunctionLimit::new(self.n_vt(), self.is)
    }
}

/// Limits Newton updates of a pn-junction voltage so the exponential
/// cannot run away between iterations.
///
/// Above the critical voltage a forward step is compressed logarithmically,
/// which keeps the junction current within a few decades of its previous
/// value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JunctionLimit {
    pub n_vt: f64,
    /// Voltage where the junction current curvature is largest
    pub v_crit: f64,
}

impl JunctionLimit {
    pub fn new(n_vt: f64, is: f64) -> Self {
        Self {
            n_vt,
            v_crit: n_vt * (n_vt / (std::f64::consts::SQRT_2 * is)).ln(),
        }
    }

    /// Limit the step from `v_old` to `v_new`.
    pub fn limit(&self, v_old: f64, v_new: f64) -> f64 {
        let vt = self.n_vt;
        if v_new <= self.v_crit || (v_new - v_old).abs() <= 2.0 * vt {
            return v_new;
        }
        if v_old > 0.0 {
            let arg = 1.0 + (v_new - v_old) / vt;
            if arg > 0.0 {
                v_old + vt * arg.ln()
            } else {
                self.v_crit
            }
        } else {
            vt * (v_new / vt).ln()
        }
    }
}

/// A diode component.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pub nodes: [NodeId; 2], // [anode, cathode]
    pub params: DiodeParams,
}

impl Diode {
    /// Create a new diode.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], params: DiodeParams) -> Self {
        Self {
            name: name.into(),
            nodes,
            params,
        }
    }

    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        if !(self.params.is > 0.0 && self.params.n > 0.0) {
            return Err(TransimError::invalid_component(
                &self.name,
                "saturation current and ideality factor must be positive",
            ));
        }
        let [anode, cathode] = self.nodes;
        let across = mna.voltage(anode) - mna.voltage(cathode);
        let v = mna.add_unknown_equal_to(format!("V{}", self.name), across)?;
        mna.add_junction(&v, self.params.limit());
        let shockley = self.params.is * ((v / self.params.n_vt()).exp() - 1.0);
        let i = mna.add_unknown_equal_to(format!("i{}", self.name), shockley)?;
        mna.add_passive(anode, cathode, i.clone());
        mna.set_current(&self.name, i);
        Ok(())
    }
}
