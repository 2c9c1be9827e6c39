//! Handing freshly built simulations to a real-time thread.
//!
//! Building a simulation is slow and allocates, so it happens elsewhere: a
//! [`SimulationPublisher`] sends finished simulations over a channel and the
//! real-time side calls [`SimulationSlot::refresh`] once per block to pick up
//! the newest one. Replaced simulations travel back to the publisher, which
//! drops them in [`SimulationPublisher::reclaim`], so no deallocation happens
//! on the real-time thread.
//!
//! Both directions are bounded channels allocated up front. When the
//! retired channel is full, the slot parks the replaced simulation and
//! takes no new ones until the publisher has reclaimed enough to hand it
//! back.
//!
//! ```no_run
//! use transim_core::circuit::presets;
//! use transim_core::solver::swap;
//! use transim_core::solver::NewtonSimulationBuilder;
//!
//! let (publisher, mut slot) = swap::channel();
//! let build = publisher.spawn_build(presets::diode_clipper().unwrap(), NewtonSimulationBuilder::default());
//!
//! // audio thread, once per block
//! slot.refresh();
//! if let Some(sim) = slot.current() {
//!     let input = [0.0; 64];
//!     let mut output = [0.0; 64];
//!     sim.run(64, &[&input[..]], &mut [&mut output[..]]).unwrap();
//! }
//!
//! build.join().unwrap().unwrap();
//! publisher.reclaim();
//! ```

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};

use super::builder::NewtonSimulationBuilder;
use super::simulation::Simulation;
use crate::circuit::Circuit;
use crate::error::{Result, TransimError};

/// Simulations each direction holds before the other side catches up.
pub const DEFAULT_CAPACITY: usize = 4;

/// Create a connected publisher and slot. The slot starts empty.
pub fn channel() -> (SimulationPublisher, SimulationSlot) {
    channel_with_capacity(DEFAULT_CAPACITY)
}

/// [`channel`] with `capacity` simulations in flight each way (at least 1).
pub fn channel_with_capacity(capacity: usize) -> (SimulationPublisher, SimulationSlot) {
    let capacity = capacity.max(1);
    let (fresh_tx, fresh_rx) = bounded(capacity);
    let (retired_tx, retired_rx) = bounded(capacity);
    (
        SimulationPublisher {
            fresh: fresh_tx,
            retired: retired_rx,
        },
        SimulationSlot {
            current: None,
            parked: None,
            fresh: fresh_rx,
            retired: retired_tx,
        },
    )
}

/// Sending side, owned by the thread that builds simulations.
#[derive(Debug)]
pub struct SimulationPublisher {
    fresh: Sender<Simulation>,
    retired: Receiver<Simulation>,
}

impl SimulationPublisher {
    /// Offer a simulation to the slot without waiting. Fails when the slot
    /// has been dropped or has not yet taken the simulations already
    /// published.
    pub fn publish(&self, simulation: Simulation) -> Result<()> {
        self.fresh.try_send(simulation).map_err(|e| match e {
            TrySendError::Full(_) => TransimError::invalid_argument("the simulation slot is full"),
            TrySendError::Disconnected(_) => TransimError::invalid_argument("the simulation slot has been dropped"),
        })
    }

    /// Drop every simulation the slot has retired, returning how many.
    pub fn reclaim(&self) -> usize {
        let count = self.retired.try_iter().count();
        if count > 0 {
            debug!("Reclaimed {} retired simulations", count);
        }
        count
    }

    /// Build `circuit` on a worker thread and publish the result, waiting
    /// for room in the channel if needed.
    ///
    /// Nothing is published when the build fails; the error is returned
    /// through the join handle.
    pub fn spawn_build(&self, circuit: Circuit, builder: NewtonSimulationBuilder) -> JoinHandle<Result<()>> {
        let fresh = self.fresh.clone();
        thread::spawn(move || {
            let simulation = circuit.build(&builder).map_err(|e| {
                warn!("Background build failed: {}", e);
                e
            })?;
            fresh
                .send(simulation)
                .map_err(|_| TransimError::invalid_argument("the simulation slot has been dropped"))
        })
    }
}

/// Receiving side, owned by the real-time thread.
#[derive(Debug)]
pub struct SimulationSlot {
    current: Option<Simulation>,
    /// Replaced simulation waiting for room in `retired`.
    parked: Option<Simulation>,
    fresh: Receiver<Simulation>,
    retired: Sender<Simulation>,
}

impl SimulationSlot {
    /// Switch to the newest published simulation, if any. Never blocks,
    /// allocates or frees.
    ///
    /// While a replaced simulation is parked, new ones stay queued. If the
    /// publisher is gone the parked one is kept until the slot is dropped.
    ///
    /// Returns whether the current simulation changed.
    pub fn refresh(&mut self) -> bool {
        if let Some(old) = self.parked.take() {
            self.retire(old);
        }
        let mut changed = false;
        while self.parked.is_none() {
            let Ok(simulation) = self.fresh.try_recv() else {
                break;
            };
            if let Some(old) = self.current.replace(simulation) {
                self.retire(old);
            }
            changed = true;
        }
        changed
    }

    fn retire(&mut self, old: Simulation) {
        if let Err(e) = self.retired.try_send(old) {
            self.parked = Some(e.into_inner());
        }
    }

    /// Whether a replaced simulation is waiting to be handed back.
    pub fn is_parked(&self) -> bool {
        self.parked.is_some()
    }

    pub fn current(&mut self) -> Option<&mut Simulation> {
        self.current.as_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::presets;
    use crate::solver::NewtonSettings;

    fn builder() -> NewtonSimulationBuilder {
        NewtonSimulationBuilder::new(NewtonSettings::new(48000.0).with_oversample(1))
    }

    #[test]
    fn test_refresh_picks_newest_and_retires_old() {
        let (publisher, mut slot) = channel();
        assert!(!slot.refresh());
        assert!(slot.is_empty());

        let circuit = presets::rc_lowpass().unwrap();
        publisher.publish(circuit.build(&builder()).unwrap()).unwrap();
        assert!(slot.refresh());
        assert!(slot.current().is_some());
        assert_eq!(publisher.reclaim(), 0);

        publisher.publish(circuit.build(&builder()).unwrap()).unwrap();
        publisher.publish(circuit.build(&builder()).unwrap()).unwrap();
        assert!(slot.refresh());
        assert_eq!(publisher.reclaim(), 2);
    }

    #[test]
    fn test_full_retired_channel_defers_swap() {
        let (publisher, mut slot) = channel_with_capacity(1);
        let circuit = presets::rc_lowpass().unwrap();
        let build = |rate: f64| {
            circuit
                .build(&NewtonSimulationBuilder::new(NewtonSettings::new(rate).with_oversample(1)))
                .unwrap()
        };
        let rate = |slot: &mut SimulationSlot| slot.current().map(|s| s.sample_rate());

        publisher.publish(build(1000.0)).unwrap();
        assert!(slot.refresh());
        publisher.publish(build(2000.0)).unwrap();
        assert!(slot.refresh());
        // 1000 fills the retired channel, so 2000 gets parked when 3000 arrives.
        publisher.publish(build(3000.0)).unwrap();
        assert!(slot.refresh());
        assert!(slot.is_parked());
        assert_eq!(rate(&mut slot), Some(3000.0));

        publisher.publish(build(4000.0)).unwrap();
        assert!(publisher.publish(build(5000.0)).is_err());
        assert!(!slot.refresh());
        assert_eq!(rate(&mut slot), Some(3000.0));

        assert_eq!(publisher.reclaim(), 1);
        assert!(slot.refresh());
        assert_eq!(rate(&mut slot), Some(4000.0));
        assert_eq!(publisher.reclaim(), 1);
    }

    #[test]
    fn test_spawn_build() {
        let (publisher, mut slot) = channel();
        let handle = publisher.spawn_build(presets::divider().unwrap(), builder());
        handle.join().unwrap().unwrap();
        assert!(slot.refresh());

        let sim = slot.current().unwrap();
        let input = [2.0; 4];
        let mut output = [0.0; 4];
        sim.run(4, &[&input[..]], &mut [&mut output[..]]).unwrap();
        approx::assert_relative_eq!(output[3], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_publish_after_slot_dropped() {
        let (publisher, slot) = channel();
        drop(slot);
        let sim = presets::rc_lowpass().unwrap().build(&builder()).unwrap();
        assert!(publisher.publish(sim).is_err());
    }
}
