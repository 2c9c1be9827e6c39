//! Lowering of a [`TransientSolution`] to a [`Program`].
//!
//! Register layout:
//!
//! ```text
//! [ delayed unknown slots | input prev ]  persisted
//! [ unknowns | input value | input slope | parameters | t | deltas | output acc ]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use super::cancel::CancellationToken;
use super::program::{Code, CodeBuffer, InputRegs, NewtonBlock, NewtonRow, OutputRegs, Program, Reg, Step};
use super::solution::{NewtonIteration, SolutionSet, TransientSolution};
use super::MAX_DELAY;
use crate::algebra::{Expr, Var, VarKind};
use crate::error::{Result, TransimError};

#[derive(Debug, Default)]
struct Registers {
    map: BTreeMap<Var, Reg>,
    count: usize,
}

impl Registers {
    fn alloc(&mut self, var: Var) -> Reg {
        let reg = self.next();
        self.map.insert(var, reg);
        reg
    }

    fn next(&mut self) -> Reg {
        let reg = self.count as Reg;
        self.count += 1;
        reg
    }

    fn get(&self, var: &Var) -> Option<Reg> {
        self.map.get(var).copied()
    }

    fn resolve(&self, var: &Var) -> Result<Reg> {
        self.get(var).ok_or_else(|| {
            TransimError::build_failed(format!("{} is not available to the compiled program", var))
        })
    }
}

/// Compile `solution` with the given input signals and output expressions.
pub(crate) fn compile(
    solution: &TransientSolution,
    inputs: &[Var],
    outputs: &[Expr],
    optimize: bool,
    cancel: &CancellationToken,
) -> Result<Program> {
    let unknowns: BTreeSet<&Var> = solution.unknowns().iter().collect();
    let mut seen = BTreeSet::new();
    for input in inputs {
        if input.kind() != (VarKind::Signal { delay: 0 }) {
            return Err(TransimError::build_failed(format!("{} cannot be an input", input)));
        }
        if unknowns.contains(input) {
            return Err(TransimError::build_failed(format!(
                "{} is both an input and an unknown",
                input
            )));
        }
        if !seen.insert(input) {
            return Err(TransimError::build_failed(format!("input {} declared twice", input)));
        }
    }

    let mut delays = max_delays(solution, inputs, outputs)?;
    let slotted: BTreeSet<Var> = delays.keys().cloned().collect();

    let mut required = Vec::with_capacity(solution.sets().len());
    for (i, set) in solution.sets().iter().enumerate() {
        cancel.check()?;
        let SolutionSet::Newton(newton) = set else {
            required.push(BTreeSet::new());
            continue;
        };
        let later: Vec<&Expr> = solution.sets()[i + 1..]
            .iter()
            .flat_map(|s| s.expressions())
            .collect();
        let needed = required_unknowns(newton, &later, outputs, &slotted, cancel)?;
        for guess in newton.guesses.iter().filter(|g| needed.contains(&g.left)) {
            for v in guess.right.variables() {
                note_delay(&mut delays, &unknowns, &v);
            }
        }
        required.push(needed);
    }

    let mut regs = Registers::default();
    let mut initial = Vec::new();
    for u in solution.unknowns() {
        if let Some(&d) = delays.get(u) {
            for k in 1..=d {
                regs.alloc(u.at(k));
                initial.push(solution.initial_condition(u));
            }
        }
    }
    let prevs: Vec<Reg> = inputs.iter().map(|i| regs.alloc(i.at(1))).collect();
    let persisted = regs.count;
    initial.resize(persisted, 0.0);

    for u in solution.unknowns() {
        regs.alloc(u.clone());
    }
    let values: Vec<Reg> = inputs.iter().map(|i| regs.alloc(i.clone())).collect();
    let input_regs: Vec<InputRegs> = values
        .into_iter()
        .zip(prevs)
        .map(|(value, prev)| InputRegs {
            value,
            slope: regs.next(),
            prev,
        })
        .collect();
    let parameters: Vec<Reg> = solution.parameters().iter().map(|p| regs.alloc(p.var())).collect();
    let time = regs.alloc(Var::time());
    for set in solution.sets() {
        if let SolutionSet::Newton(newton) = set {
            for u in newton.unknowns() {
                regs.alloc(u.delta());
            }
        }
    }

    let mut code = CodeBuffer::new(optimize);
    let resolve = |v: &Var| regs.resolve(v);

    let mut steps = Vec::new();
    let mut blocks = Vec::new();
    for (set, required) in solution.sets().iter().zip(&required) {
        match set {
            SolutionSet::Linear(linear) => {
                for arrow in &linear.solutions {
                    let dst = regs.resolve(&arrow.left)?;
                    let expr = code.emit(&arrow.right, &resolve)?;
                    steps.push(Step::Assign { dst, code: expr });
                }
            }
            SolutionSet::Newton(newton) => {
                let block = compile_block(newton, required, &regs, &mut code)?;
                debug!(
                    "Newton block {}: {} numeric, {} of {} symbolic deltas kept",
                    blocks.len(),
                    block.updates.len(),
                    block.known.len(),
                    newton.solved.len()
                );
                steps.push(Step::Newton(blocks.len()));
                blocks.push(block);
            }
        }
    }

    let mut output_regs = Vec::with_capacity(outputs.len());
    for output in outputs {
        let expr = match code.emit(output, &resolve) {
            Ok(expr) => expr,
            Err(e) => {
                warn!("Output {} reads as zero: {}", output, e);
                code.emit(&Expr::ZERO, &resolve)?
            }
        };
        output_regs.push(OutputRegs {
            code: expr,
            acc: 0,
        });
    }
    for output in &mut output_regs {
        output.acc = regs.next();
    }

    let mut shifts = Vec::new();
    for u in solution.unknowns() {
        if let Some(&d) = delays.get(u) {
            for k in (2..=d).rev() {
                shifts.push((regs.resolve(&u.at(k))?, regs.resolve(&u.at(k - 1))?));
            }
            shifts.push((regs.resolve(&u.at(1))?, regs.resolve(u)?));
        }
    }

    info!(
        "Compiled {} instructions, {} registers ({} persisted), {} Newton blocks",
        code.instrs().len(),
        regs.count,
        persisted,
        blocks.len()
    );

    Ok(Program {
        code,
        registers: regs.count,
        persisted,
        initial,
        time,
        parameters,
        inputs: input_regs,
        outputs: output_regs,
        steps,
        blocks,
        shifts,
    })
}

fn note_delay(delays: &mut BTreeMap<Var, u8>, unknowns: &BTreeSet<&Var>, v: &Var) {
    if v.delay() > 0 && v.delay() <= MAX_DELAY && unknowns.contains(&v.current()) {
        let d = delays.entry(v.current()).or_insert(0);
        *d = (*d).max(v.delay());
    }
}

/// Deepest delay at which each unknown is referenced, not counting the
/// Newton guesses.
fn max_delays(
    solution: &TransientSolution,
    inputs: &[Var],
    outputs: &[Expr],
) -> Result<BTreeMap<Var, u8>> {
    let unknowns: BTreeSet<&Var> = solution.unknowns().iter().collect();
    let mut delays = BTreeMap::new();

    for set in solution.sets() {
        for expr in set.expressions() {
            for v in expr.variables() {
                if v.delay() > MAX_DELAY {
                    return Err(TransimError::build_failed(format!(
                        "{} exceeds the maximum delay of {} timesteps",
                        v, MAX_DELAY
                    )));
                }
                if v.delay() > 1 && inputs.contains(&v.current()) {
                    return Err(TransimError::build_failed(format!(
                        "input {} can only be delayed by one timestep",
                        v
                    )));
                }
                note_delay(&mut delays, &unknowns, &v);
            }
        }
    }
    // Outputs that cannot be compiled degrade to zero later instead of
    // failing here.
    for output in outputs {
        for v in output.variables() {
            note_delay(&mut delays, &unknowns, &v);
        }
    }
    Ok(delays)
}

/// Unknowns of `newton` whose values are observed outside their own
/// symbolic delta: by the numeric rows, the outputs, later sets or a
/// delayed slot, closed over the deltas those depend on.
fn required_unknowns(
    newton: &NewtonIteration,
    later: &[&Expr],
    outputs: &[Expr],
    slotted: &BTreeSet<Var>,
    cancel: &CancellationToken,
) -> Result<BTreeSet<Var>> {
    let own: BTreeSet<Var> = newton.unknowns().collect();
    let solved: BTreeMap<Var, &Expr> = newton
        .solved
        .iter()
        .map(|a| (a.left.current(), &a.right))
        .collect();

    let mut pending: Vec<Var> = newton.updates.iter().map(Var::current).collect();
    let mark = |v: &Var, pending: &mut Vec<Var>| {
        if v.delay() == 0 && (v.is_signal() || v.is_delta()) {
            let u = v.current();
            if own.contains(&u) {
                pending.push(u);
            }
        }
    };

    for row in &newton.equations {
        for v in row.constant().variables() {
            mark(&v, &mut pending);
        }
        for (_, c) in row.terms() {
            for v in c.variables() {
                mark(&v, &mut pending);
            }
        }
    }
    for e in later.iter().copied().chain(outputs) {
        for v in e.variables() {
            mark(&v, &mut pending);
        }
    }
    for v in slotted {
        mark(v, &mut pending);
    }

    let mut required = BTreeSet::new();
    while let Some(u) = pending.pop() {
        cancel.check()?;
        if !required.insert(u.clone()) {
            continue;
        }
        if let Some(expr) = solved.get(&u) {
            for v in expr.variables() {
                mark(&v, &mut pending);
            }
        }
    }
    Ok(required)
}

fn compile_block(
    newton: &NewtonIteration,
    required: &BTreeSet<Var>,
    regs: &Registers,
    code: &mut CodeBuffer,
) -> Result<NewtonBlock> {
    let resolve = |v: &Var| regs.resolve(v);

    let mut guesses = Vec::new();
    for guess in &newton.guesses {
        if required.contains(&guess.left) {
            guesses.push((regs.resolve(&guess.left)?, code.emit(&guess.right, &resolve)?));
        }
    }

    let mut updates = Vec::with_capacity(newton.updates.len());
    for d in &newton.updates {
        updates.push((regs.resolve(&d.current())?, regs.resolve(d)?));
    }

    let limits = newton
        .limits
        .iter()
        .filter_map(|(d, limit)| newton.updates.iter().position(|u| u == d).map(|j| (j, *limit)))
        .collect();

    let mut rows = Vec::with_capacity(newton.equations.len());
    for row in &newton.equations {
        let mut entries: Vec<(usize, Code)> = Vec::new();
        for (j, d) in newton.updates.iter().enumerate() {
            let c = row.coefficient(d);
            if !c.is_zero() {
                entries.push((j, code.emit(&c, &resolve)?));
            }
        }
        let residual = code.emit(row.constant(), &resolve)?;
        rows.push(NewtonRow { entries, residual });
    }

    let mut known = Vec::new();
    let mut known_targets = Vec::new();
    for arrow in &newton.solved {
        let target = arrow.left.current();
        if !required.contains(&target) {
            continue;
        }
        known.push((regs.resolve(&arrow.left)?, code.emit(&arrow.right, &resolve)?));
        known_targets.push(regs.resolve(&target)?);
    }

    Ok(NewtonBlock {
        guesses,
        rows,
        updates,
        known,
        known_targets,
        limits,
    })
}
