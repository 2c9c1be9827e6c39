//! End-to-end properties of built simulations.

use std::f64::consts::PI;

use approx::assert_relative_eq;
use transim_core::algebra::{Expr, Var};
use transim_core::circuit::{presets, Circuit, NodeId};
use transim_core::components::{
    Bjt, BjtParams, BjtType, Capacitor, Diode, DiodeParams, Input, Resistor, VoltageSource,
};
use transim_core::solver::{NewtonSettings, NewtonSimulationBuilder, SolveConfig};
use transim_core::{Simulation, TransimError};

fn build(circuit: &Circuit, settings: NewtonSettings) -> Simulation {
    circuit.build(&NewtonSimulationBuilder::new(settings)).unwrap()
}

fn run_mono(sim: &mut Simulation, input: &[f64]) -> Vec<f64> {
    let mut output = vec![0.0; input.len()];
    sim.run(input.len(), &[input], &mut [&mut output[..]]).unwrap();
    output
}

/// `output[n]` is the state at `t = (n + 1) / rate`, so the input is sampled
/// at the same instants.
fn sine(freq: f64, amplitude: f64, rate: f64, samples: usize) -> Vec<f64> {
    (0..samples)
        .map(|n| amplitude * (2.0 * PI * freq * (n + 1) as f64 / rate).sin())
        .collect()
}

/// Largest error of the 1k / 1uF low-pass driven by a 200 Hz sine over its
/// first 4 ms.
fn rc_sine_error(rate: f64) -> f64 {
    let tau = 1e-3;
    let w = 2.0 * PI * 200.0;
    let wt = w * tau;
    let exact = |t: f64| ((w * t).sin() - wt * (w * t).cos() + wt * (-t / tau).exp()) / (1.0 + wt * wt);

    let samples = (4e-3 * rate).round() as usize;
    let mut sim = build(&presets::rc_lowpass().unwrap(), NewtonSettings::new(rate).with_oversample(1));
    let output = run_mono(&mut sim, &sine(200.0, 1.0, rate, samples));

    output
        .iter()
        .enumerate()
        .map(|(n, v)| (v - exact((n + 1) as f64 / rate)).abs())
        .fold(0.0, f64::max)
}

#[test]
fn test_rc_error_is_second_order() {
    let coarse = rc_sine_error(10e3);
    let medium = rc_sine_error(20e3);
    let fine = rc_sine_error(40e3);

    assert!(coarse < 1e-2, "coarse error {}", coarse);
    let first = coarse / medium;
    let second = medium / fine;
    assert!((3.0..5.0).contains(&first), "ratio {}", first);
    assert!((3.0..5.0).contains(&second), "ratio {}", second);
}

#[test]
fn test_rc_step_at_time_constant() {
    let mut sim = build(&presets::rc_lowpass().unwrap(), NewtonSettings::new(44100.0).with_oversample(1));
    let output = run_mono(&mut sim, &[1.0; 64]);
    // t = RC = 1 ms is sample 44.1, output[43] is t = 44 / 44100
    assert_relative_eq!(output[43], 0.632, max_relative = 0.02);
}

#[test]
fn test_reset_replays_bit_identically() {
    let mut sim = build(&presets::diode_clipper().unwrap(), NewtonSettings::default());
    let input = sine(1000.0, 2.0, 48000.0, 2048);

    let first = run_mono(&mut sim, &input);
    sim.reset();
    let second = run_mono(&mut sim, &input);

    let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn test_block_size_does_not_change_output() {
    let circuit = presets::diode_clipper().unwrap();
    let input = sine(440.0, 1.5, 48000.0, 1000);

    let mut whole = build(&circuit, NewtonSettings::default());
    let expected = run_mono(&mut whole, &input);

    let mut split = build(&circuit, NewtonSettings::default());
    let mut actual = Vec::new();
    for chunk in input.chunks(77) {
        actual.extend(run_mono(&mut split, chunk));
    }
    assert_eq!(expected, actual);
}

#[test]
fn test_optimized_program_matches_plain() {
    let input = sine(700.0, 3.0, 48000.0, 1024);
    for name in ["diode_clipper", "tone_pot", "rl_highpass"] {
        let circuit = presets::by_name(name).unwrap();
        let mut plain = build(&circuit, NewtonSettings::default().with_optimize(false));
        let mut optimized = build(&circuit, NewtonSettings::default().with_optimize(true));

        let a = run_mono(&mut plain, &input);
        let b = run_mono(&mut optimized, &input);
        assert!(
            a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()),
            "{} differs",
            name
        );
    }
}

#[test]
fn test_dc_is_independent_of_oversampling() {
    let circuit = presets::diode_clipper().unwrap();
    let input = vec![0.3; 4800];

    let mut settled = Vec::new();
    for oversample in [1, 2, 4, 8] {
        let mut sim = build(&circuit, NewtonSettings::new(48000.0).with_oversample(oversample));
        let output = run_mono(&mut sim, &input);
        settled.push(output[input.len() - 1]);
    }
    for value in &settled[1..] {
        assert_relative_eq!(*value, settled[0], epsilon = 1e-6);
    }
    assert!(settled[0] > 0.0 && settled[0] < 0.3);
}

#[test]
fn test_clipper_settles_at_diode_drop() {
    let mut sim = build(&presets::diode_clipper().unwrap(), NewtonSettings::new(48000.0));
    let output = run_mono(&mut sim, &[5.0; 480]);
    // (5 - v) / 2.2k = 1e-14 * (exp(v / 25.8 mV) - 1)
    assert_relative_eq!(output[479], 0.670938, max_relative = 2e-3);
}

#[test]
fn test_clipper_step_without_oversampling_stays_bounded() {
    let mut sim = build(&presets::diode_clipper().unwrap(), NewtonSettings::new(48000.0).with_oversample(1));
    let output = run_mono(&mut sim, &[5.0; 1024]);
    for (n, v) in output.iter().enumerate() {
        assert!(*v > 0.0 && *v < 1.0, "output[{}] = {}", n, v);
    }
    assert_relative_eq!(output[1023], 0.670938, max_relative = 2e-3);
}

/// 9 V supply, 100k / 22k base divider, 4.7k collector and 1k emitter
/// resistors. The base is optionally fed through 1 uF from node "in".
fn common_emitter(coupled: bool) -> Circuit {
    let mut circuit = Circuit::new();
    let vcc = circuit.node("vcc");
    let b = circuit.node("b");
    let c = circuit.node("c");
    let e = circuit.node("e");
    circuit.add(VoltageSource::new("V1", [vcc, NodeId::GROUND], 9.0)).unwrap();
    circuit.add(Resistor::new("Rb1", [vcc, b], 100e3)).unwrap();
    circuit.add(Resistor::new("Rb2", [b, NodeId::GROUND], 22e3)).unwrap();
    circuit.add(Resistor::new("Rc", [vcc, c], 4.7e3)).unwrap();
    circuit.add(Resistor::new("Re", [e, NodeId::GROUND], 1e3)).unwrap();
    circuit
        .add(Bjt::new("Q1", [c, b, e], BjtType::Npn, BjtParams::default()))
        .unwrap();
    if coupled {
        let input = circuit.node("in");
        circuit.add(Input::new("Vin", [input, NodeId::GROUND], "in")).unwrap();
        circuit.add(Capacitor::new("C1", [input, b], 1e-6)).unwrap();
    }
    circuit.probe("c").unwrap();
    circuit.probe("b").unwrap();
    circuit.probe("e").unwrap();
    circuit
}

fn assert_bias_point(c: f64, b: f64, e: f64) {
    assert_relative_eq!(c, 4.69497, max_relative = 1e-2);
    assert_relative_eq!(b, 1.45778, max_relative = 1e-2);
    assert_relative_eq!(e, 0.92512, max_relative = 1e-2);
}

#[test]
fn test_common_emitter_bias_point() {
    let circuit = common_emitter(false);
    let analysis = circuit.analyze().unwrap();
    let outputs = ["c", "b", "e"].map(|n| Expr::var(Var::signal(format!("V({})", n))));

    // Seeded from the operating point, and powered up from zero.
    for operating_point in [true, false] {
        let builder = NewtonSimulationBuilder::new(NewtonSettings::new(48000.0).with_oversample(1).with_iterations(50))
            .with_solve_config(SolveConfig::new().with_operating_point(operating_point));
        let mut sim = builder.build(&analysis, &[], &outputs).unwrap();

        let mut c = vec![0.0; 200];
        let mut b = vec![0.0; 200];
        let mut e = vec![0.0; 200];
        sim.run(200, &[], &mut [&mut c[..], &mut b[..], &mut e[..]]).unwrap();
        assert_bias_point(c[199], b[199], e[199]);
        if operating_point {
            assert_bias_point(c[0], b[0], e[0]);
            assert_eq!(sim.stats().unconverged, 0);
        }
    }
}

#[test]
fn test_coupled_stage_starts_biased() {
    let mut sim = build(&common_emitter(true), NewtonSettings::default());
    let input = vec![0.0; 4800];
    let mut c = vec![0.0; 4800];
    let mut b = vec![0.0; 4800];
    let mut e = vec![0.0; 4800];
    sim.run(4800, &[&input[..]], &mut [&mut c[..], &mut b[..], &mut e[..]]).unwrap();
    for n in [0, 479, 4799] {
        assert_bias_point(c[n], b[n], e[n]);
    }
}

#[test]
fn test_biased_tap_starts_at_steady_state() {
    let mut circuit = Circuit::new();
    let a = circuit.node("a");
    let tap = circuit.node("tap");
    circuit.add(VoltageSource::new("V1", [a, NodeId::GROUND], 9.0)).unwrap();
    circuit.add(Resistor::new("R1", [a, tap], 10e3)).unwrap();
    circuit.add(Resistor::new("R2", [tap, NodeId::GROUND], 10e3)).unwrap();
    circuit.add(Capacitor::new("C1", [tap, NodeId::GROUND], 10e-6)).unwrap();
    circuit.probe("tap").unwrap();

    let mut sim = build(&circuit, NewtonSettings::default());
    let mut output = vec![0.0; 4800];
    sim.run(4800, &[], &mut [&mut output[..]]).unwrap();
    assert_relative_eq!(output[0], 4.5, max_relative = 1e-6);
    assert_relative_eq!(output[4799], 4.5, max_relative = 1e-6);

    sim.reset();
    let mut again = [0.0];
    sim.run(1, &[], &mut [&mut again[..]]).unwrap();
    assert_eq!(again[0].to_bits(), output[0].to_bits());
}

#[test]
fn test_resistive_network_is_exact_after_one_pass() {
    let mut circuit = Circuit::new();
    let a = circuit.node("a");
    let b = circuit.node("b");
    circuit.add(VoltageSource::new("V1", [a, NodeId::GROUND], 5.0)).unwrap();
    circuit.add(Resistor::new("R1", [a, b], 1e3)).unwrap();
    circuit.add(Resistor::new("R2", [b, NodeId::GROUND], 2e3)).unwrap();
    circuit.add(Resistor::new("R3", [a, NodeId::GROUND], 1e3)).unwrap();
    let analysis = circuit.analyze().unwrap();

    let builder = NewtonSimulationBuilder::new(NewtonSettings::new(48000.0).with_oversample(1).with_iterations(1))
        .with_solve_config(SolveConfig::new().with_direct_solutions(false));
    let outputs = [
        Expr::var(Var::signal("V(b)")),
        Expr::var(Var::signal("iV1")),
    ];
    let mut sim = builder.build(&analysis, &[], &outputs).unwrap();

    let mut voltage = vec![0.0; 8];
    let mut current = vec![0.0; 8];
    sim.run(8, &[], &mut [&mut voltage[..], &mut current[..]]).unwrap();

    // V1 drives 1k in parallel with 3k
    assert_relative_eq!(voltage[0], 10.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(current[0].abs(), 5.0 / 750.0, epsilon = 1e-9);
    assert_eq!(sim.stats().max_iterations, 1);
}

#[test]
fn test_source_current_on_first_iteration() {
    let mut circuit = Circuit::new();
    let a = circuit.node("a");
    circuit.add(VoltageSource::new("V1", [a, NodeId::GROUND], 5.0)).unwrap();
    circuit.add(Resistor::new("R1", [a, NodeId::GROUND], 1e3)).unwrap();
    let analysis = circuit.analyze().unwrap();

    let builder = NewtonSimulationBuilder::new(NewtonSettings::new(48000.0).with_oversample(1).with_iterations(1))
        .with_solve_config(SolveConfig::new().with_direct_solutions(false));
    let mut sim = builder
        .build(&analysis, &[], &[Expr::var(Var::signal("iV1"))])
        .unwrap();

    let mut output = [0.0];
    sim.run(1, &[], &mut [&mut output[..]]).unwrap();
    assert_relative_eq!(output[0].abs(), 0.005, epsilon = 1e-9);
}

#[test]
fn test_unstable_circuit_reports_divergence_inside_block() {
    // The negative resistor outweighs the series one: node x grows without
    // bound.
    let mut circuit = Circuit::new();
    let input = circuit.node("in");
    let x = circuit.node("x");
    circuit.add(Input::new("Vin", [input, NodeId::GROUND], "in")).unwrap();
    circuit.add(Resistor::new("R1", [input, x], 1e3)).unwrap();
    circuit.add(Resistor::new("R2", [x, NodeId::GROUND], -500.0)).unwrap();
    circuit.add(Capacitor::new("C1", [x, NodeId::GROUND], 100e-9)).unwrap();
    circuit
        .add(Diode::new("D1", [NodeId::GROUND, x], DiodeParams::default()))
        .unwrap();
    circuit.probe("x").unwrap();

    let mut sim = build(&circuit, NewtonSettings::new(48000.0).with_oversample(1));
    let block = 1024;
    let input = vec![1.0; block];
    let mut output = vec![0.0; block];

    for _ in 0..64 {
        let start = sim.at();
        match sim.run(block, &[&input[..]], &mut [&mut output[..]]) {
            Ok(()) => continue,
            Err(TransimError::Diverged { at, time }) => {
                assert!(at >= start && at < start + block as u64, "at {} outside block at {}", at, start);
                assert_eq!((at - start) % 256, 0);
                assert_relative_eq!(time, at as f64 / 48000.0, max_relative = 1e-12);
                assert_eq!(sim.at(), start);
                return;
            }
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    panic!("simulation never diverged");
}
