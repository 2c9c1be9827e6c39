//! Component models for circuit simulation.
//!
//! This module provides models for all supported circuit components:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source, Current Source, Input
//! - Nonlinear: Diode, BJT, Op-Amp
//! - Controls: Potentiometer, Switch
//! - Behavioral: arbitrary current expression
//!
//! Each component contributes its equations, unknowns and terminal currents
//! to a symbolic [`Analysis`].

mod behavioral;
mod bjt;
mod controls;
mod diode;
mod linear;
mod opamp;
mod sources;

pub use behavioral::BehavioralSource;
pub use bjt::{Bjt, BjtParams, BjtType};
pub use controls::{Potentiometer, Switch};
pub use diode::{Diode, DiodeParams, JunctionLimit};
pub use linear::{Capacitor, Inductor, Resistor};
pub use opamp::{OpAmp, OpAmpParams};
pub use sources::{CurrentSource, Input, VoltageSource};

use crate::circuit::{Analysis, NodeId};
use crate::error::Result;

/// A circuit component.
#[derive(Debug, Clone)]
pub enum Component {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    Input(Input),
    Diode(Diode),
    Bjt(Bjt),
    OpAmp(OpAmp),
    Potentiometer(Potentiometer),
    Switch(Switch),
    Behavioral(BehavioralSource),
}

impl Component {
    /// Get the component name.
    pub fn name(&self) -> &str {
        match self {
            Component::Resistor(c) => &c.name,
            Component::Capacitor(c) => &c.name,
            Component::Inductor(c) => &c.name,
            Component::VoltageSource(c) => &c.name,
            Component::CurrentSource(c) => &c.name,
            Component::Input(c) => &c.name,
            Component::Diode(c) => &c.name,
            Component::Bjt(c) => &c.name,
            Component::OpAmp(c) => &c.name,
            Component::Potentiometer(c) => &c.name,
            Component::Switch(c) => &c.name,
            Component::Behavioral(c) => &c.name,
        }
    }

    /// Get the terminals of the component.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Component::Resistor(c) => &c.nodes,
            Component::Capacitor(c) => &c.nodes,
            Component::Inductor(c) => &c.nodes,
            Component::VoltageSource(c) => &c.nodes,
            Component::CurrentSource(c) => &c.nodes,
            Component::Input(c) => &c.nodes,
            Component::Diode(c) => &c.nodes,
            Component::Bjt(c) => &c.nodes,
            Component::OpAmp(c) => &c.nodes,
            Component::Potentiometer(c) => &c.nodes,
            Component::Switch(c) => &c.nodes,
            Component::Behavioral(c) => &c.nodes,
        }
    }

    /// Check if this component is nonlinear.
    pub fn is_nonlinear(&self) -> bool {
        matches!(
            self,
            Component::Diode(_) | Component::Bjt(_) | Component::Behavioral(_)
        )
    }

    /// Add this component's equations to the analysis.
    pub fn contribute(&self, mna: &mut Analysis) -> Result<()> {
        match self {
            Component::Resistor(c) => c.contribute(mna),
            Component::Capacitor(c) => c.contribute(mna),
            Component::Inductor(c) => c.contribute(mna),
            Component::VoltageSource(c) => c.contribute(mna),
            Component::CurrentSource(c) => c.contribute(mna),
            Component::Input(c) => c.contribute(mna),
            Component::Diode(c) => c.contribute(mna),
            Component::Bjt(c) => c.contribute(mna),
            Component::OpAmp(c) => c.contribute(mna),
            Component::Potentiometer(c) => c.contribute(mna),
            Component::Switch(c) => c.contribute(mna),
            Component::Behavioral(c) => c.contribute(mna),
        }
    }
}

macro_rules! impl_from_component {
    ($($variant:ident($ty:ty)),* $(,)?) => {$(
        impl From<$ty> for Component {
            fn from(c: $ty) -> Self {
                Component::$variant(c)
            }
        }
    )*};
}

impl_from_component!(
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    Input(Input),
    Diode(Diode),
    Bjt(Bjt),
    OpAmp(OpAmp),
    Potentiometer(Potentiometer),
    Switch(Switch),
    Behavioral(BehavioralSource),
);
