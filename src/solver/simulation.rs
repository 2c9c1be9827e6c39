//! Simulation runtime.

use log::debug;

use super::builder::NewtonSettings;
use super::exec::{execute, Context, Fault, Machine};
use super::program::Program;
use crate::circuit::Parameter;
use crate::error::{Result, TransimError};

/// Counters accumulated over successful calls to [`Simulation::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Substeps simulated (samples times oversampling).
    pub substeps: u64,
    /// Newton solves started.
    pub solves: u64,
    /// Newton iterations over all solves.
    pub newton_iterations: u64,
    /// Most iterations any single solve used.
    pub max_iterations: u32,
    /// Solves that ran out of iterations before converging.
    pub unconverged: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.substeps += other.substeps;
        self.solves += other.solves;
        self.newton_iterations += other.newton_iterations;
        self.max_iterations = self.max_iterations.max(other.max_iterations);
        self.unconverged += other.unconverged;
    }

    /// Average iterations per Newton solve.
    pub fn mean_iterations(&self) -> f64 {
        if self.solves == 0 {
            0.0
        } else {
            self.newton_iterations as f64 / self.solves as f64
        }
    }
}

/// A compiled circuit simulation.
///
/// The simulation owns its state; `run` advances it over a block of
/// samples. Running never allocates, so a `Simulation` can live on an
/// audio thread.
#[derive(Debug, Clone)]
pub struct Simulation {
    program: Program,
    machine: Machine,
    /// Persisted registers between calls.
    state: Vec<f64>,
    /// Absolute index of the next sample.
    at: u64,
    sample_rate: f64,
    oversample: u32,
    time_step: f64,
    iterations: u32,
    inputs: Vec<String>,
    outputs: Vec<String>,
    parameters: Vec<Parameter>,
    values: Vec<f64>,
    stats: RunStats,
}

impl Simulation {
    pub(crate) fn new(
        program: Program,
        settings: &NewtonSettings,
        inputs: Vec<String>,
        outputs: Vec<String>,
        parameters: &[Parameter],
    ) -> Self {
        let machine = Machine::new(&program);
        let state = program.initial.clone();
        Self {
            program,
            machine,
            state,
            at: 0,
            sample_rate: settings.sample_rate,
            oversample: settings.oversample,
            time_step: settings.time_step(),
            iterations: settings.iterations,
            inputs,
            outputs,
            parameters: parameters.to_vec(),
            values: parameters.iter().map(|p| p.default).collect(),
            stats: RunStats::default(),
        }
    }

    /// Return to the operating point found at build time, and clear the
    /// sample counter and statistics. Parameter values and the iteration
    /// budget are kept.
    pub fn reset(&mut self) {
        self.state.copy_from_slice(&self.program.initial);
        self.at = 0;
        self.stats = RunStats::default();
    }

    /// Simulate `samples` samples.
    ///
    /// `inputs[i]` feeds the i-th declared input and `outputs[j]` receives
    /// the j-th declared output; every buffer must hold at least `samples`
    /// values. On error the state and sample counter are left unchanged.
    pub fn run(&mut self, samples: usize, inputs: &[&[f64]], outputs: &mut [&mut [f64]]) -> Result<()> {
        if inputs.len() != self.inputs.len() {
            return Err(TransimError::invalid_argument(format!(
                "expected {} input buffers, got {}",
                self.inputs.len(),
                inputs.len()
            )));
        }
        if outputs.len() != self.outputs.len() {
            return Err(TransimError::invalid_argument(format!(
                "expected {} output buffers, got {}",
                self.outputs.len(),
                outputs.len()
            )));
        }
        if inputs.iter().any(|b| b.len() < samples) || outputs.iter().any(|b| b.len() < samples) {
            return Err(TransimError::invalid_argument(format!(
                "buffers must hold at least {} samples",
                samples
            )));
        }

        let persisted = self.program.persisted;
        self.machine.regs[..persisted].copy_from_slice(&self.state);

        let ctx = Context {
            parameters: &self.values,
            start: self.at,
            oversample: self.oversample,
            time_step: self.time_step,
            iterations: self.iterations,
        };
        let mut stats = RunStats::default();
        match execute(&self.program, &mut self.machine, &ctx, samples, inputs, outputs, &mut stats) {
            Ok(()) => {
                self.state.copy_from_slice(&self.machine.regs[..persisted]);
                self.at += samples as u64;
                self.stats.merge(&stats);
                Ok(())
            }
            Err(Fault::Diverged { offset }) => {
                Err(TransimError::diverged(self.at + offset as u64, 1.0 / self.sample_rate))
            }
        }
    }

    /// [`run`](Self::run) with buffers matched to inputs and outputs by
    /// name. Every input and output needs exactly one buffer.
    ///
    /// Collecting the buffers allocates, so real-time callers should
    /// resolve indices once and use `run`.
    pub fn run_named(
        &mut self,
        samples: usize,
        inputs: &[(&str, &[f64])],
        outputs: &mut [(&str, &mut [f64])],
    ) -> Result<()> {
        let mut input_slots: Vec<Option<&[f64]>> = vec![None; self.inputs.len()];
        for &(name, buffer) in inputs {
            if input_slots[self.input_index(name)?].replace(buffer).is_some() {
                return Err(TransimError::invalid_argument(format!("input {} given twice", name)));
            }
        }
        let mut output_slots: Vec<Option<&mut [f64]>> = (0..self.outputs.len()).map(|_| None).collect();
        for (name, buffer) in outputs.iter_mut() {
            if output_slots[self.output_index(name)?].replace(&mut buffer[..]).is_some() {
                return Err(TransimError::invalid_argument(format!("output {} given twice", name)));
            }
        }

        let ordered_inputs = input_slots
            .into_iter()
            .zip(&self.inputs)
            .map(|(buffer, name)| {
                buffer.ok_or_else(|| TransimError::invalid_argument(format!("no buffer for input {}", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut ordered_outputs = output_slots
            .into_iter()
            .zip(&self.outputs)
            .map(|(buffer, name)| {
                buffer.ok_or_else(|| TransimError::invalid_argument(format!("no buffer for output {}", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.run(samples, &ordered_inputs, &mut ordered_outputs)
    }

    pub fn input_index(&self, name: &str) -> Result<usize> {
        self.inputs
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| TransimError::UnknownInput {
                name: name.to_string(),
            })
    }

    pub fn output_index(&self, name: &str) -> Result<usize> {
        self.outputs
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| TransimError::UnknownOutput {
                name: name.to_string(),
            })
    }

    fn parameter_index(&self, name: &str) -> Result<usize> {
        self.parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| TransimError::UnknownParameter {
                name: name.to_string(),
            })
    }

    /// Set a circuit parameter; takes effect on the next `run`. Values
    /// outside the parameter's range are clamped to it.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self.parameter_index(name)?;
        if !value.is_finite() {
            return Err(TransimError::invalid_argument(format!(
                "parameter {} must be finite, got {}",
                name, value
            )));
        }
        let clamped = self.parameters[index].clamp(value);
        if clamped != value {
            debug!("Parameter {} clamped from {} to {}", name, value, clamped);
        }
        self.values[index] = clamped;
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Result<f64> {
        Ok(self.values[self.parameter_index(name)?])
    }

    /// Parameter names with their current values.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.parameters
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.values.iter().copied())
    }

    /// Set the Newton iteration budget per solve.
    pub fn set_iterations(&mut self, iterations: u32) -> Result<()> {
        if iterations == 0 {
            return Err(TransimError::invalid_argument("iterations must be at least 1"));
        }
        self.iterations = iterations;
        Ok(())
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Index of the next sample to be simulated.
    pub fn at(&self) -> u64 {
        self.at
    }

    /// Time of the next sample, in seconds.
    pub fn time(&self) -> f64 {
        self.at as f64 / self.sample_rate
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn oversample(&self) -> u32 {
        self.oversample
    }

    /// Input names in buffer order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Output names in buffer order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}
