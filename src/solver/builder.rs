//! Simulation builder and its settings.

use log::info;

use super::cancel::CancellationToken;
use super::compiler::compile;
use super::simulation::Simulation;
use super::solution::TransientSolution;
use super::transient::SolveConfig;
use super::{DEFAULT_ITERATIONS, DEFAULT_OVERSAMPLE};
use crate::algebra::{Expr, Var};
use crate::circuit::Analysis;
use crate::error::{Result, TransimError};
use crate::DEFAULT_SAMPLE_RATE;

/// Settings for [`NewtonSimulationBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonSettings {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    /// Substeps per output sample.
    pub oversample: u32,
    /// Initial Newton iteration budget per solve; can be changed on the
    /// built simulation.
    pub iterations: u32,
    /// Run the peephole pass over the compiled bytecode.
    pub optimize: bool,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl NewtonSettings {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            oversample: DEFAULT_OVERSAMPLE,
            iterations: DEFAULT_ITERATIONS,
            optimize: true,
        }
    }

    pub fn with_oversample(mut self, oversample: u32) -> Self {
        self.oversample = oversample;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Simulation timestep `h = 1 / (sample_rate * oversample)`.
    pub fn time_step(&self) -> f64 {
        1.0 / (self.sample_rate * self.oversample as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(TransimError::invalid_argument(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.oversample == 0 {
            return Err(TransimError::invalid_argument("oversample must be at least 1"));
        }
        if self.iterations == 0 {
            return Err(TransimError::invalid_argument("iterations must be at least 1"));
        }
        Ok(())
    }
}

/// Builds a [`Simulation`] from circuit equations.
///
/// ```no_run
/// use transim_core::circuit::presets;
/// use transim_core::solver::{NewtonSettings, NewtonSimulationBuilder};
///
/// let circuit = presets::diode_clipper().unwrap();
/// let builder = NewtonSimulationBuilder::new(NewtonSettings::new(48000.0).with_oversample(4));
/// let mut sim = circuit.build(&builder).unwrap();
///
/// let input = vec![0.5; 256];
/// let mut output = vec![0.0; 256];
/// sim.run(256, &[&input[..]], &mut [&mut output[..]]).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct NewtonSimulationBuilder {
    settings: NewtonSettings,
    solve: SolveConfig,
    cancel: CancellationToken,
}

impl NewtonSimulationBuilder {
    pub fn new(settings: NewtonSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn with_solve_config(mut self, config: SolveConfig) -> Self {
        self.solve = config;
        self
    }

    /// Check `token` at coarse points during the build.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    /// Solve and compile `analysis`.
    ///
    /// `inputs` are the external signals in the order `run` expects their
    /// buffers; `outputs` are the expressions written to the output
    /// buffers.
    pub fn build(&self, analysis: &Analysis, inputs: &[Var], outputs: &[Expr]) -> Result<Simulation> {
        self.settings.validate()?;
        info!(
            "Building simulation: {} Hz, {}x oversampling, {} inputs, {} outputs",
            self.settings.sample_rate,
            self.settings.oversample,
            inputs.len(),
            outputs.len()
        );
        let solution = TransientSolution::solve(analysis, self.settings.time_step(), &self.solve, &self.cancel)?;
        self.build_solution(&solution, inputs, outputs)
    }

    /// Compile an already solved system. Its timestep must match the
    /// settings.
    pub fn build_solution(
        &self,
        solution: &TransientSolution,
        inputs: &[Var],
        outputs: &[Expr],
    ) -> Result<Simulation> {
        self.settings.validate()?;
        let h = self.settings.time_step();
        if (solution.time_step() - h).abs() > 1e-9 * h {
            return Err(TransimError::invalid_argument(format!(
                "solution was discretized with h = {:e} s, settings need {:e} s",
                solution.time_step(),
                h
            )));
        }
        self.cancel.check()?;

        let program = compile(solution, inputs, outputs, self.settings.optimize, &self.cancel)?;
        let input_names = inputs.iter().map(|v| v.name().to_string()).collect();
        let output_names = outputs
            .iter()
            .map(|e| match e.as_var() {
                Some(v) => v.name().to_string(),
                None => e.to_string(),
            })
            .collect();
        Ok(Simulation::new(
            program,
            &self.settings,
            input_names,
            output_names,
            solution.parameters(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::presets;

    #[test]
    fn test_settings_defaults() {
        let settings = NewtonSettings::default();
        assert_eq!(settings.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(settings.oversample, DEFAULT_OVERSAMPLE);
        assert_eq!(settings.iterations, DEFAULT_ITERATIONS);
        assert!(settings.optimize);
        approx::assert_relative_eq!(settings.time_step(), 1.0 / (48000.0 * 8.0));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let circuit = presets::rc_lowpass().unwrap();
        for settings in [
            NewtonSettings::new(0.0),
            NewtonSettings::new(48000.0).with_oversample(0),
            NewtonSettings::new(48000.0).with_iterations(0),
        ] {
            let err = circuit.build(&NewtonSimulationBuilder::new(settings)).unwrap_err();
            assert!(matches!(err, TransimError::InvalidArgument { .. }));
        }
    }

    #[test]
    fn test_build_solution_checks_timestep() {
        let analysis = presets::rc_lowpass().unwrap().analyze().unwrap();
        let solution =
            TransientSolution::solve(&analysis, 1e-4, &SolveConfig::default(), &CancellationToken::none()).unwrap();
        let builder = NewtonSimulationBuilder::new(NewtonSettings::new(10000.0).with_oversample(1));
        assert!(builder.build_solution(&solution, analysis.inputs(), &[]).is_ok());

        let builder = NewtonSimulationBuilder::new(NewtonSettings::new(44100.0));
        assert!(builder.build_solution(&solution, analysis.inputs(), &[]).is_err());
    }

    #[test]
    fn test_cancelled_build() {
        let token = CancellationToken::new();
        token.cancel();
        let builder = NewtonSimulationBuilder::default().with_cancellation(token);
        let err = presets::diode_clipper().unwrap().build(&builder).unwrap_err();
        assert_eq!(err, TransimError::Cancelled);
    }

    #[test]
    fn test_output_names() {
        let sim = presets::rc_lowpass()
            .unwrap()
            .build(&NewtonSimulationBuilder::default())
            .unwrap();
        assert_eq!(sim.inputs(), ["in".to_string()]);
        assert_eq!(sim.outputs(), ["V(out)".to_string()]);
    }
}
