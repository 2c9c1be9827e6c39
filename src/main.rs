//! Transim - real-time transient circuit simulator
//!
//! # Usage
//!
//! ```bash
//! transim list
//! ffmpeg -i input.wav -f f32le -ac 1 -ar 48000 - | transim process diode_clipper | ffmpeg -f f32le -ac 1 -ar 48000 -i - output.wav
//! transim bench diode_clipper --seconds 10
//! ```

use std::io;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use log::info;
use transim_core::{
    audio::{process_audio, BUFFER_SIZE},
    circuit::presets,
    error::{Result, TransimError},
    solver::{NewtonSettings, NewtonSimulationBuilder, DEFAULT_ITERATIONS, DEFAULT_OVERSAMPLE},
    Simulation, DEFAULT_SAMPLE_RATE,
};

/// Real-time transient circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the preset circuits
    List,
    /// Pipe raw mono f32 little-endian PCM from stdin through a preset to stdout
    Process {
        /// Preset circuit name
        preset: String,
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Time the build and simulation of a preset
    Bench {
        /// Preset circuit name
        preset: String,
        /// Seconds of audio to simulate
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        #[command(flatten)]
        sim: SimArgs,
    },
}

#[derive(Args, Debug)]
struct SimArgs {
    /// Sample rate in Hz
    #[arg(short, long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: f64,

    /// Substeps per sample
    #[arg(short, long, default_value_t = DEFAULT_OVERSAMPLE)]
    oversample: u32,

    /// Newton iteration budget per solve
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    /// Set a circuit parameter, as NAME=VALUE
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,
}

impl SimArgs {
    fn builder(&self) -> NewtonSimulationBuilder {
        NewtonSimulationBuilder::new(
            NewtonSettings::new(self.sample_rate)
                .with_oversample(self.oversample)
                .with_iterations(self.iterations),
        )
    }

    fn apply_params(&self, sim: &mut Simulation) -> Result<()> {
        for param in &self.params {
            let (name, value) = param
                .split_once('=')
                .ok_or_else(|| TransimError::invalid_argument(format!("expected NAME=VALUE, got '{}'", param)))?;
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| TransimError::invalid_argument(format!("invalid value for '{}': '{}'", name, value)))?;
            sim.set_parameter(name.trim(), value)?;
        }
        Ok(())
    }
}

fn build(preset: &str, args: &SimArgs) -> Result<Simulation> {
    let mut sim = presets::by_name(preset)?.build(&args.builder())?;
    args.apply_params(&mut sim)?;
    Ok(sim)
}

fn list() {
    for (name, description) in presets::PRESETS {
        println!("{:<16}{}", name, description);
    }
}

fn process(preset: &str, args: &SimArgs) -> Result<()> {
    let mut sim = build(preset, args)?;
    let samples = process_audio(&mut sim, io::stdin().lock(), io::stdout().lock())?;
    info!("Processed {} samples", samples);
    Ok(())
}

fn bench(preset: &str, seconds: f64, args: &SimArgs) -> Result<()> {
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(TransimError::invalid_argument("seconds must be positive"));
    }

    let started = Instant::now();
    let mut sim = build(preset, args)?;
    let build_time = started.elapsed();

    let total = (seconds * args.sample_rate).round() as usize;
    let mut input = vec![0.0; BUFFER_SIZE];
    let mut outputs: Vec<Vec<f64>> = vec![vec![0.0; BUFFER_SIZE]; sim.outputs().len()];
    let inputs = sim.inputs().len();

    let started = Instant::now();
    let mut done = 0;
    while done < total {
        let len = BUFFER_SIZE.min(total - done);
        for (n, sample) in input.iter_mut().take(len).enumerate() {
            let t = (done + n) as f64 / args.sample_rate;
            *sample = (2.0 * std::f64::consts::PI * 440.0 * t).sin();
        }
        let input_refs: Vec<&[f64]> = (0..inputs).map(|_| &input[..]).collect();
        let mut output_refs: Vec<&mut [f64]> = outputs.iter_mut().map(|b| &mut b[..]).collect();
        sim.run(len, &input_refs, &mut output_refs)?;
        done += len;
    }
    let run_time = started.elapsed();

    let stats = sim.stats();
    println!("preset          {}", preset);
    println!("build           {:.3} ms", build_time.as_secs_f64() * 1e3);
    println!("simulated       {:.3} s ({} samples)", seconds, total);
    println!("run             {:.3} ms", run_time.as_secs_f64() * 1e3);
    println!("real-time       {:.1}x", seconds / run_time.as_secs_f64());
    println!("newton solves   {}", stats.solves);
    println!("mean iterations {:.2}", stats.mean_iterations());
    println!("max iterations  {}", stats.max_iterations);
    println!("unconverged     {}", stats.unconverged);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::List => {
            list();
            Ok(())
        }
        Command::Process { preset, sim } => process(preset, sim),
        Command::Bench { preset, seconds, sim } => bench(preset, *seconds, sim),
    }
}
