//! Ready-made circuits.
//!
//! Every preset is driven by the input signal `in` (applied between node
//! `in` and ground) and probes node `out`.

use super::{Circuit, NodeId};
use crate::components::{Capacitor, Diode, DiodeParams, Inductor, Input, Potentiometer, Resistor};
use crate::error::{Result, TransimError};

/// Name and one-line description of every preset.
pub const PRESETS: &[(&str, &str)] = &[
    ("rc_lowpass", "1k / 1uF first-order low-pass (fc ~ 159 Hz)"),
    ("rl_highpass", "1k / 100mH first-order high-pass (fc ~ 1.6 kHz)"),
    ("divider", "10k / 10k resistive divider"),
    ("diode_clipper", "2.2k / 10nF low-pass with antiparallel silicon diodes"),
    ("tone_pot", "10k pot divider (parameter 'tone') into a 1k / 22nF low-pass"),
];

/// Look up a preset by name.
pub fn by_name(name: &str) -> Result<Circuit> {
    match name {
        "rc_lowpass" => rc_lowpass(),
        "rl_highpass" => rl_highpass(),
        "divider" => divider(),
        "diode_clipper" => diode_clipper(),
        "tone_pot" => tone_pot(),
        _ => Err(TransimError::UnknownPreset {
            name: name.to_string(),
        }),
    }
}

/// Empty circuit with its `in` and `out` nodes created.
fn driven() -> (Circuit, NodeId, NodeId) {
    let mut circuit = Circuit::new();
    let input = circuit.node("in");
    let output = circuit.node("out");
    (circuit, input, output)
}

fn finish(mut circuit: Circuit, input: NodeId) -> Result<Circuit> {
    circuit.add(Input::new("Vin", [input, NodeId::GROUND], "in"))?;
    circuit.probe("out")?;
    Ok(circuit)
}

pub fn rc_lowpass() -> Result<Circuit> {
    let (mut c, input, output) = driven();
    c.add(Resistor::new("R1", [input, output], 1e3))?;
    c.add(Capacitor::new("C1", [output, NodeId::GROUND], 1e-6))?;
    finish(c, input)
}

pub fn rl_highpass() -> Result<Circuit> {
    let (mut c, input, output) = driven();
    c.add(Resistor::new("R1", [input, output], 1e3))?;
    c.add(Inductor::new("L1", [output, NodeId::GROUND], 0.1))?;
    finish(c, input)
}

pub fn divider() -> Result<Circuit> {
    let (mut c, input, output) = driven();
    c.add(Resistor::new("R1", [input, output], 10e3))?;
    c.add(Resistor::new("R2", [output, NodeId::GROUND], 10e3))?;
    finish(c, input)
}

pub fn diode_clipper() -> Result<Circuit> {
    let (mut c, input, output) = driven();
    c.add(Resistor::new("R1", [input, output], 2.2e3))?;
    c.add(Capacitor::new("C1", [output, NodeId::GROUND], 10e-9))?;
    c.add(Diode::new("D1", [output, NodeId::GROUND], DiodeParams::default()))?;
    c.add(Diode::new("D2", [NodeId::GROUND, output], DiodeParams::default()))?;
    finish(c, input)
}

pub fn tone_pot() -> Result<Circuit> {
    let (mut c, input, output) = driven();
    let mid = c.node("mid");
    c.add(Potentiometer::new("P1", [input, mid, NodeId::GROUND], 10e3, "tone", 0.5))?;
    c.add(Resistor::new("R1", [mid, output], 1e3))?;
    c.add(Capacitor::new("C1", [output, NodeId::GROUND], 22e-9))?;
    finish(c, input)
}
