//! WASM bindings for Transim Core.
//!
//! JavaScript-friendly wrapper around a preset [`Simulation`] for use in an
//! AudioWorklet.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { WasmSimulation } from 'transim_core';
//!
//! await init();
//!
//! const sim = new WasmSimulation('tone_pot', 48000);
//! sim.set_parameter('tone', 0.25);
//!
//! // In AudioWorkletProcessor.process():
//! const input = inputBuffer.getChannelData(0);
//! const output = outputBuffer.getChannelData(0);
//! sim.process_block(input, output);
//! ```

use log::warn;
use wasm_bindgen::prelude::*;

use crate::circuit::presets;
use crate::error::TransimError;
use crate::solver::{NewtonSettings, NewtonSimulationBuilder, Simulation};

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

fn js_error(error: TransimError) -> JsValue {
    JsValue::from_str(&error.to_string())
}

/// A preset circuit simulation driven by one mono audio channel.
#[wasm_bindgen]
pub struct WasmSimulation {
    simulation: Simulation,
    input: Vec<f64>,
    output: Vec<f64>,
}

#[wasm_bindgen]
impl WasmSimulation {
    /// Build the named preset at `sample_rate` with default settings.
    #[wasm_bindgen(constructor)]
    pub fn new(preset: &str, sample_rate: f64) -> Result<WasmSimulation, JsValue> {
        Self::with_config(preset, sample_rate, crate::solver::DEFAULT_OVERSAMPLE, crate::solver::DEFAULT_ITERATIONS)
    }

    /// Build the named preset with an explicit oversampling factor and
    /// Newton iteration budget.
    #[wasm_bindgen]
    pub fn with_config(
        preset: &str,
        sample_rate: f64,
        oversample: u32,
        iterations: u32,
    ) -> Result<WasmSimulation, JsValue> {
        let settings = NewtonSettings::new(sample_rate)
            .with_oversample(oversample)
            .with_iterations(iterations);
        let simulation = presets::by_name(preset)
            .and_then(|circuit| circuit.build(&NewtonSimulationBuilder::new(settings)))
            .map_err(js_error)?;

        Ok(WasmSimulation {
            simulation,
            input: Vec::new(),
            output: Vec::new(),
        })
    }

    /// Process a block of audio samples into `output`.
    ///
    /// A diverged simulation writes silence and restarts from rest.
    #[wasm_bindgen]
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), JsValue> {
        if output.len() < input.len() {
            return Err(js_error(TransimError::WasmError {
                message: format!("output holds {} samples, input has {}", output.len(), input.len()),
            }));
        }

        let len = input.len();
        self.input.clear();
        self.input.extend(input.iter().map(|&s| s as f64));
        self.output.resize(len, 0.0);

        match self.simulation.run(len, &[&self.input[..]], &mut [&mut self.output[..]]) {
            Ok(()) => {
                for (dst, &src) in output.iter_mut().zip(&self.output) {
                    *dst = src as f32;
                }
            }
            Err(e) => {
                warn!("{}; resetting", e);
                self.simulation.reset();
                output[..len].fill(0.0);
            }
        }
        Ok(())
    }

    /// Process a block of audio samples, returning the result.
    #[wasm_bindgen]
    pub fn process_block_alloc(&mut self, input: &[f32]) -> Result<Vec<f32>, JsValue> {
        let mut output = vec![0.0; input.len()];
        self.process_block(input, &mut output)?;
        Ok(output)
    }

    /// Change a circuit parameter, e.g. a potentiometer position.
    #[wasm_bindgen]
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), JsValue> {
        self.simulation.set_parameter(name, value).map_err(js_error)
    }

    /// Restart from rest at sample 0.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.simulation.reset();
    }

    #[wasm_bindgen(getter)]
    pub fn sample_rate(&self) -> f64 {
        self.simulation.sample_rate()
    }
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Get the default sample rate.
#[wasm_bindgen]
pub fn default_sample_rate() -> f64 {
    crate::DEFAULT_SAMPLE_RATE
}

/// Names of the available presets.
#[wasm_bindgen]
pub fn preset_names() -> Vec<String> {
    presets::PRESETS.iter().map(|(name, _)| name.to_string()).collect()
}
