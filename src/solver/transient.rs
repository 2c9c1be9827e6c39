//! Transient solution builder.
//!
//! Turns the differential-algebraic system of an [`Analysis`] into an
//! ordered list of solution sets for one timestep:
//!
//! 1. every `D(y, t)` is replaced by a new unknown `y'` tied to `y` by the
//!    trapezoidal rule `y = y[t-h] + h/2 (y' + y'[t-h])`;
//! 2. the system is split into independent partitions;
//! 3. in each partition, unknowns with closed-form solutions are
//!    extracted by substitution, and what remains becomes a Newton system.
//!
//! Unknowns that appear inside a nonlinearity (junction voltages under
//! `exp`, for instance) are never extracted: Newton's method iterates on
//! them, so its convergence test measures the quantity the residual is
//! most sensitive to.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use super::cancel::CancellationToken;
use super::dc;
use super::solution::{Arrow, LinearSolutions, NewtonIteration, SolutionSet, TransientSolution};
use super::MAX_DELAY;
use crate::algebra::{back_substitute, differentiate, row_reduce, Expr, LinearCombination, Var};
use crate::circuit::Analysis;
use crate::components::JunctionLimit;
use crate::error::{Result, TransimError};

/// Options for [`TransientSolution::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveConfig {
    direct_solutions: bool,
    operating_point: bool,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            direct_solutions: true,
            operating_point: true,
        }
    }
}

impl SolveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether unknowns with closed-form solutions are extracted before
    /// Newton's method. Disabling it sends every partition through Newton.
    pub fn with_direct_solutions(mut self, enabled: bool) -> Self {
        self.direct_solutions = enabled;
        self
    }

    pub fn direct_solutions(&self) -> bool {
        self.direct_solutions
    }

    /// Whether the DC operating point is solved and used as the initial
    /// state. Disabled, every simulation starts from all zeros.
    pub fn with_operating_point(mut self, enabled: bool) -> Self {
        self.operating_point = enabled;
        self
    }

    pub fn operating_point(&self) -> bool {
        self.operating_point
    }
}

impl TransientSolution {
    /// Discretize and solve the equations of `analysis` with timestep `time_step`.
    pub fn solve(
        analysis: &Analysis,
        time_step: f64,
        config: &SolveConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        if !(time_step.is_finite() && time_step > 0.0) {
            return Err(TransimError::invalid_argument(format!(
                "timestep must be positive, got {}",
                time_step
            )));
        }
        cancel.check()?;

        let mut equations = Vec::new();
        for equation in analysis.equations() {
            debug!("equation: {}", equation);
            push_residual(&mut equations, equation.residual())?;
        }

        let (equations, unknowns) = discretize(equations, analysis.unknowns().to_vec(), time_step)?;
        check_delays(&equations)?;

        let partitions = partition(&equations, &unknowns)?;
        info!(
            "Solving {} equations in {} partitions (h = {:e} s)",
            equations.len(),
            partitions.len(),
            time_step
        );

        let mut sets = Vec::new();
        for part in partitions {
            cancel.check()?;
            solve_partition(part, analysis.junctions(), config, cancel, &mut sets)?;
        }

        for set in &sets {
            match set {
                SolutionSet::Linear(s) => {
                    debug!("linear set, {} solutions", s.solutions.len());
                    for arrow in &s.solutions {
                        debug!("  {}", arrow);
                    }
                }
                SolutionSet::Newton(s) => {
                    debug!(
                        "newton set, {} numeric and {} symbolic updates",
                        s.updates.len(),
                        s.solved.len()
                    );
                    for row in &s.equations {
                        debug!("  0 = {}", row);
                    }
                }
            }
        }

        let initial_conditions = if config.operating_point {
            dc::operating_point(analysis, cancel)?
        } else {
            BTreeMap::new()
        };

        Ok(TransientSolution {
            time_step,
            unknowns,
            sets,
            parameters: analysis.parameters().to_vec(),
            initial_conditions,
        })
    }
}

/// Add a residual, skipping duplicates and rejecting constant ones.
fn push_residual(equations: &mut Vec<Expr>, residual: Expr) -> Result<()> {
    if let Some(c) = residual.as_const() {
        if c == 0.0 {
            return Ok(());
        }
        return Err(TransimError::build_failed(format!(
            "inconsistent equation {} = 0",
            c
        )));
    }
    if !equations.contains(&residual) {
        equations.push(residual);
    }
    Ok(())
}

/// Replace time derivatives with derivative unknowns and add the
/// trapezoidal rule for each.
fn discretize(equations: Vec<Expr>, mut unknowns: Vec<Var>, h: f64) -> Result<(Vec<Expr>, Vec<Var>)> {
    let mut differential = BTreeSet::new();
    for equation in &equations {
        differential.extend(equation.derivatives());
    }
    for y in &differential {
        if y.delay() != 0 {
            return Err(TransimError::build_failed(format!(
                "derivative of delayed signal {}",
                y
            )));
        }
        if !unknowns.contains(y) {
            return Err(TransimError::build_failed(format!(
                "derivative of {}, which is not an unknown",
                y
            )));
        }
    }

    let ys: Vec<Var> = unknowns.iter().filter(|u| differential.contains(*u)).cloned().collect();
    let map: BTreeMap<Var, Expr> = ys
        .iter()
        .map(|y| (y.clone(), Expr::Var(y.derivative())))
        .collect();

    let mut out: Vec<Expr> = equations
        .into_iter()
        .map(|e| if e.has_derivative() { e.substitute_derivatives(&map) } else { e })
        .collect();

    for y in &ys {
        let dy = y.derivative();
        if unknowns.contains(&dy) {
            return Err(TransimError::build_failed(format!(
                "unknown {} clashes with the derivative of {}",
                dy, y
            )));
        }
        unknowns.push(dy.clone());
        // y = y[t-h] + h/2 (y' + y'[t-h])
        let slope = Expr::Var(dy.clone()) + Expr::Var(dy.at(1));
        out.push(Expr::Var(y.clone()) - Expr::Var(y.at(1)) - (h / 2.0) * slope);
    }

    if let Some(e) = out.iter().find(|e| e.has_derivative()) {
        return Err(TransimError::build_failed(format!(
            "derivative left after discretization in {} = 0",
            e
        )));
    }
    Ok((out, unknowns))
}

fn check_delays(equations: &[Expr]) -> Result<()> {
    for equation in equations {
        if let Some(v) = equation.variables().into_iter().find(|v| v.delay() > MAX_DELAY) {
            return Err(TransimError::build_failed(format!(
                "{} exceeds the maximum delay of {} timesteps",
                v, MAX_DELAY
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub(super) struct Partition {
    pub equations: Vec<Expr>,
    pub unknowns: Vec<Var>,
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Split the system into connected components of the equation/unknown
/// incidence graph, ordered by their first unknown.
pub(super) fn partition(equations: &[Expr], unknowns: &[Var]) -> Result<Vec<Partition>> {
    let index: BTreeMap<&Var, usize> = unknowns.iter().enumerate().map(|(i, u)| (u, i)).collect();
    let mut parent: Vec<usize> = (0..unknowns.len()).collect();

    let mut owners = Vec::with_capacity(equations.len());
    for equation in equations {
        let members: Vec<usize> = equation
            .variables()
            .iter()
            .filter_map(|v| index.get(v).copied())
            .collect();
        let Some(&first) = members.first() else {
            return Err(TransimError::build_failed(format!(
                "equation {} = 0 does not involve any unknown",
                equation
            )));
        };
        for &m in &members[1..] {
            let (a, b) = (find(&mut parent, first), find(&mut parent, m));
            if a != b {
                parent[b] = a;
            }
        }
        owners.push(first);
    }

    let mut slots: BTreeMap<usize, usize> = BTreeMap::new();
    let mut parts: Vec<Partition> = Vec::new();
    for (i, unknown) in unknowns.iter().enumerate() {
        let root = find(&mut parent, i);
        let slot = *slots.entry(root).or_insert_with(|| {
            parts.push(Partition::default());
            parts.len() - 1
        });
        parts[slot].unknowns.push(unknown.clone());
    }
    for (equation, owner) in equations.iter().zip(owners) {
        let root = find(&mut parent, owner);
        if let Some(&slot) = slots.get(&root) {
            parts[slot].equations.push(equation.clone());
        }
    }

    for part in &parts {
        check_square(&part.equations, &part.unknowns)?;
    }
    Ok(parts)
}

fn check_square(equations: &[Expr], unknowns: &[Var]) -> Result<()> {
    if equations.len() == unknowns.len() {
        return Ok(());
    }
    let kind = if equations.len() < unknowns.len() {
        "underdetermined"
    } else {
        "overdetermined"
    };
    let names: Vec<String> = unknowns.iter().map(|u| u.to_string()).collect();
    Err(TransimError::build_failed(format!(
        "{} system: {} equations for {} unknowns [{}]",
        kind,
        equations.len(),
        unknowns.len(),
        names.join(", ")
    )))
}

fn solve_partition(
    part: Partition,
    junctions: &[(Var, JunctionLimit)],
    config: &SolveConfig,
    cancel: &CancellationToken,
    sets: &mut Vec<SolutionSet>,
) -> Result<()> {
    let Partition {
        mut equations,
        mut unknowns,
    } = part;

    let direct = if config.direct_solutions {
        extract_direct(&mut equations, &mut unknowns, cancel)?
    } else {
        Vec::new()
    };
    check_square(&equations, &unknowns)?;

    if !equations.is_empty() {
        cancel.check()?;
        let newton = newton_iteration(&equations, &unknowns, junctions);
        info!(
            "Newton system: {} unknowns, {} solved numerically",
            unknowns.len(),
            newton.updates.len()
        );
        sets.push(SolutionSet::Newton(newton));
    }
    if !direct.is_empty() {
        // Later extractions are referenced by earlier ones.
        let solutions = direct.into_iter().rev().collect();
        sets.push(SolutionSet::Linear(LinearSolutions { solutions }));
    }
    Ok(())
}

/// Repeatedly pick an equation that is affine in some unknown with a
/// coefficient free of all remaining unknowns, solve it for that unknown
/// and substitute the solution into the other equations. Unknowns that
/// appear nonlinearly anywhere are left for Newton's method.
fn extract_direct(
    equations: &mut Vec<Expr>,
    unknowns: &mut Vec<Var>,
    cancel: &CancellationToken,
) -> Result<Vec<Arrow>> {
    let mut solved = Vec::new();
    loop {
        cancel.check()?;
        let Some((index, var, solution)) = best_direct_solution(equations, unknowns) else {
            break;
        };
        equations.remove(index);
        unknowns.retain(|u| *u != var);

        let mut remaining = Vec::with_capacity(equations.len());
        for equation in equations.drain(..) {
            if !equation.depends_on(&var) {
                remaining.push(equation);
                continue;
            }
            let equation = equation.substitute_var(&var, &solution);
            match equation.as_const() {
                Some(c) if c == 0.0 => {
                    return Err(TransimError::build_failed(format!(
                        "equations are linearly dependent (after solving for {})",
                        var
                    )))
                }
                Some(c) => {
                    return Err(TransimError::build_failed(format!(
                        "inconsistent equation {} = 0 (after solving for {})",
                        c, var
                    )))
                }
                None => remaining.push(equation),
            }
        }
        *equations = remaining;
        solved.push(Arrow::new(var, solution));
    }
    Ok(solved)
}

fn best_direct_solution(equations: &[Expr], unknowns: &[Var]) -> Option<(usize, Var, Expr)> {
    let decomposed: Vec<LinearCombination> = equations
        .iter()
        .map(|e| LinearCombination::decompose(e, unknowns))
        .collect();
    let nonlinear: BTreeSet<&Var> = unknowns
        .iter()
        .filter(|u| decomposed.iter().any(|lc| !lc.contains(u) && lc.depends_on(u)))
        .collect();

    let mut best: Option<((bool, usize, usize), usize, Var, Expr)> = None;
    for (i, (equation, lc)) in equations.iter().zip(&decomposed).enumerate() {
        for (var, coefficient) in lc.terms().iter().filter(|(v, _)| !nonlinear.contains(v)) {
            let score = (coefficient.as_const().is_none(), equation.size(), i);
            if best.as_ref().map_or(true, |(s, ..)| score < *s) {
                best = Some((score, i, var.clone(), coefficient.clone()));
            }
        }
    }
    best.map(|(_, i, var, coefficient)| {
        // equations[i] = coefficient * var + rest, with rest free of var
        let rest = equations[i].substitute_var(&var, &Expr::ZERO);
        (i, var, -rest / coefficient)
    })
}

/// Newton rows `J * dx + F = 0`, with the linear deltas eliminated
/// symbolically.
fn newton_iteration(equations: &[Expr], unknowns: &[Var], junctions: &[(Var, JunctionLimit)]) -> NewtonIteration {
    let deltas: Vec<Var> = unknowns.iter().map(Var::delta).collect();
    let rows: Vec<LinearCombination> = equations
        .iter()
        .map(|f| {
            let terms = unknowns
                .iter()
                .zip(&deltas)
                .filter(|(x, _)| f.depends_on(x))
                .map(|(x, dx)| (dx.clone(), differentiate(f, x)))
                .collect();
            LinearCombination::new(terms, f.clone())
        })
        .collect();

    // A delta is linear when no Jacobian entry in its column depends on
    // its own unknown.
    let linear: Vec<Var> = unknowns
        .iter()
        .zip(&deltas)
        .filter(|(x, dx)| rows.iter().all(|row| !row.coefficient(dx).depends_on(x)))
        .map(|(_, dx)| dx.clone())
        .collect();

    let reduction = row_reduce(rows, &linear);
    let pivoted: BTreeSet<&Var> = reduction.pivots.iter().map(|(v, _)| v).collect();
    let updates: Vec<Var> = deltas.iter().filter(|d| !pivoted.contains(d)).cloned().collect();
    let solved = back_substitute(&reduction.pivots)
        .into_iter()
        .map(|(dx, e)| Arrow::new(dx, e))
        .collect();
    let guesses = unknowns
        .iter()
        .map(|x| Arrow::new(x.clone(), Expr::Var(x.at(1))))
        .collect();
    let limits = junctions
        .iter()
        .map(|(x, limit)| (x.delta(), *limit))
        .filter(|(dx, _)| updates.contains(dx))
        .collect();

    NewtonIteration {
        solved,
        equations: reduction.rest,
        updates,
        guesses,
        limits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{presets, Circuit, NodeId};
    use crate::components::{BehavioralSource, Bjt, BjtParams, BjtType, Resistor, VoltageSource};

    fn solve(circuit: &Circuit, config: SolveConfig) -> Result<TransientSolution> {
        let analysis = circuit.analyze()?;
        TransientSolution::solve(&analysis, 1.0 / 48000.0, &config, &CancellationToken::none())
    }

    fn newton_sets(solution: &TransientSolution) -> Vec<&NewtonIteration> {
        solution
            .sets()
            .iter()
            .filter_map(|s| match s {
                SolutionSet::Newton(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Divider-biased common-emitter stage: 9 V, 100k / 22k base divider,
    /// 4.7k collector and 1k emitter resistors.
    fn common_emitter() -> Circuit {
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
        circuit
    }

    /// Every unknown is assigned exactly once, and nothing references an
    /// unknown before the set that assigns it.
    fn assert_well_ordered(solution: &TransientSolution) {
        let all: BTreeSet<Var> = solution.unknowns().iter().cloned().collect();
        let mut known = BTreeSet::new();
        let check = |e: &Expr, known: &BTreeSet<Var>| {
            for v in e.variables() {
                if all.contains(&v) {
                    assert!(known.contains(&v), "{} referenced before it is solved", v);
                }
            }
        };
        for set in solution.sets() {
            match set {
                SolutionSet::Linear(s) => {
                    for arrow in &s.solutions {
                        check(&arrow.right, &known);
                        assert!(known.insert(arrow.left.clone()), "{} solved twice", arrow.left);
                    }
                }
                SolutionSet::Newton(s) => {
                    for u in s.unknowns() {
                        assert!(known.insert(u.clone()), "{} solved twice", u);
                    }
                    for e in set.expressions() {
                        check(e, &known);
                    }
                }
            }
        }
        assert_eq!(known, all);
    }

    #[test]
    fn test_rc_lowpass_is_fully_direct() {
        let solution = solve(&presets::rc_lowpass().unwrap(), SolveConfig::default()).unwrap();
        assert!(solution
            .sets()
            .iter()
            .all(|s| matches!(s, SolutionSet::Linear(_))));
        assert!(solution.unknowns().contains(&Var::signal("VC1'")));
        assert_well_ordered(&solution);
    }

    #[test]
    fn test_without_direct_solutions_everything_is_newton() {
        let config = SolveConfig::new().with_direct_solutions(false);
        let solution = solve(&presets::rc_lowpass().unwrap(), config).unwrap();
        assert_eq!(solution.sets().len(), 1);
        match &solution.sets()[0] {
            SolutionSet::Newton(s) => {
                // Linear network: every delta is eliminated symbolically.
                assert!(s.updates.is_empty());
                assert!(s.equations.is_empty());
                assert_eq!(s.solved.len(), solution.unknowns().len());
            }
            other => panic!("expected a Newton set, got {:?}", other),
        }
        assert_well_ordered(&solution);
    }

    #[test]
    fn test_diode_clipper_needs_newton() {
        let solution = solve(&presets::diode_clipper().unwrap(), SolveConfig::default()).unwrap();
        let newton = newton_sets(&solution);
        assert_eq!(newton.len(), 1);
        assert_eq!(newton[0].updates.len(), newton[0].equations.len());
        assert!(!newton[0].updates.is_empty());
        // Newton iterates on the junction voltages, each with its limit.
        for d in &newton[0].updates {
            assert!(["VD1", "VD2"].contains(&d.name()), "iterates on {}", d);
        }
        assert_eq!(newton[0].limits.len(), newton[0].updates.len());
        assert_well_ordered(&solution);
    }

    #[test]
    fn test_transistor_newton_iterates_on_junction_voltages() {
        let solution = solve(&common_emitter(), SolveConfig::default()).unwrap();
        let newton = newton_sets(&solution);
        assert_eq!(newton.len(), 1);

        let mut names: Vec<&str> = newton[0].updates.iter().map(|d| d.name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["VQ1bc", "VQ1be"]);
        assert_eq!(newton[0].limits.len(), 2);

        // The device currents are closed-form functions of the junctions.
        let linear: Vec<Var> = solution
            .sets()
            .iter()
            .filter(|s| matches!(s, SolutionSet::Linear(_)))
            .flat_map(|s| s.unknowns())
            .collect();
        assert!(linear.contains(&Var::signal("iQ1c")));
        assert!(linear.contains(&Var::signal("iQ1e")));
        assert_well_ordered(&solution);
    }

    #[test]
    fn test_operating_point_is_recorded() {
        let solution = solve(&common_emitter(), SolveConfig::default()).unwrap();
        let vcc = solution.initial_condition(&Var::signal("V(vcc)"));
        assert!((vcc - 9.0).abs() < 1e-9, "{}", vcc);

        let config = SolveConfig::new().with_operating_point(false);
        let solution = solve(&common_emitter(), config).unwrap();
        assert!(solution.initial_conditions().is_empty());
    }

    #[test]
    fn test_independent_partitions() {
        let mut circuit = presets::rc_lowpass().unwrap();
        let other = circuit.node("other");
        circuit
            .add(crate::components::Input::new("Vin2", [other, NodeId::GROUND], "in2"))
            .unwrap();
        let load = circuit.node("load");
        circuit.add(Resistor::new("R9", [other, load], 1e3)).unwrap();
        circuit
            .add(crate::components::Diode::new(
                "D9",
                [load, NodeId::GROUND],
                Default::default(),
            ))
            .unwrap();
        let solution = solve(&circuit, SolveConfig::default()).unwrap();
        assert!(solution.sets().len() >= 2);
        assert_well_ordered(&solution);
    }

    #[test]
    fn test_derivative_of_non_unknown_fails() {
        let mut circuit = Circuit::new();
        let a = circuit.node("a");
        circuit.add(Resistor::new("R1", [a, NodeId::GROUND], 1e3)).unwrap();
        circuit
            .add(BehavioralSource::new(
                "B1",
                [a, NodeId::GROUND],
                1e-6 * Expr::deriv(Var::signal("elsewhere")),
            ))
            .unwrap();
        let err = solve(&circuit, SolveConfig::default()).unwrap_err();
        assert!(matches!(err, TransimError::BuildFailed { .. }));
    }

    #[test]
    fn test_underdetermined_fails() {
        let circuit = Circuit::new();
        let mut analysis = Analysis::new(&circuit.node_names);
        analysis.add_unknown("x").unwrap();
        let err = TransientSolution::solve(&analysis, 1e-3, &SolveConfig::default(), &CancellationToken::none())
            .unwrap_err();
        assert!(err.to_string().contains("underdetermined"));
    }

    #[test]
    fn test_inconsistent_fails() {
        let circuit = Circuit::new();
        let mut analysis = Analysis::new(&circuit.node_names);
        let x = analysis.add_unknown("x").unwrap();
        analysis.add_equation(x.clone(), 1.0);
        analysis.add_equation(x, 2.0);
        let err = TransientSolution::solve(&analysis, 1e-3, &SolveConfig::default(), &CancellationToken::none())
            .unwrap_err();
        assert!(matches!(err, TransimError::BuildFailed { .. }));
    }

    #[test]
    fn test_cancelled() {
        let analysis = presets::rc_lowpass().unwrap().analyze().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = TransientSolution::solve(&analysis, 1e-3, &SolveConfig::default(), &token).unwrap_err();
        assert_eq!(err, TransimError::Cancelled);
    }
}
