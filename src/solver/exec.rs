//! Interpreter for compiled programs.
//!
//! Nothing here allocates: every scratch buffer lives in a [`Machine`]
//! sized when the simulation is built.

use super::gauss;
use super::program::{Code, Instr, NewtonBlock, Program, Step};
use super::simulation::RunStats;
use super::{ABSOLUTE_TOLERANCE, DIVERGENCE_CHECK_MASK, RELATIVE_TOLERANCE};

/// Evaluate one code on the expression stack.
#[inline]
pub(crate) fn eval(instrs: &[Instr], code: Code, regs: &[f64], stack: &mut [f64]) -> f64 {
    let mut sp = 0;
    for &instr in &instrs[code.range()] {
        match instr {
            Instr::Const(c) => {
                stack[sp] = c;
                sp += 1;
            }
            Instr::Load(r) => {
                stack[sp] = regs[r as usize];
                sp += 1;
            }
            Instr::Add => {
                sp -= 1;
                stack[sp - 1] += stack[sp];
            }
            Instr::Sub => {
                sp -= 1;
                stack[sp - 1] -= stack[sp];
            }
            Instr::Mul => {
                sp -= 1;
                stack[sp - 1] *= stack[sp];
            }
            Instr::Div => {
                sp -= 1;
                stack[sp - 1] /= stack[sp];
            }
            Instr::Pow => {
                sp -= 1;
                stack[sp - 1] = stack[sp - 1].powf(stack[sp]);
            }
            Instr::Neg => stack[sp - 1] = -stack[sp - 1],
            Instr::PowI(k) => stack[sp - 1] = stack[sp - 1].powi(k),
            Instr::Call(func) => stack[sp - 1] = func.apply(stack[sp - 1]),
            Instr::AddConst(c) => stack[sp - 1] += c,
            Instr::SubConst(c) => stack[sp - 1] -= c,
            Instr::MulConst(c) => stack[sp - 1] *= c,
            Instr::DivConst(c) => stack[sp - 1] /= c,
            Instr::AddReg(r) => stack[sp - 1] += regs[r as usize],
            Instr::SubReg(r) => stack[sp - 1] -= regs[r as usize],
            Instr::MulReg(r) => stack[sp - 1] *= regs[r as usize],
            Instr::DivReg(r) => stack[sp - 1] /= regs[r as usize],
        }
    }
    stack[0]
}

/// Scratch space for one simulation.
#[derive(Debug, Clone)]
pub(crate) struct Machine {
    pub regs: Vec<f64>,
    stack: Vec<f64>,
    matrix: Vec<f64>,
    dx: Vec<f64>,
}

impl Machine {
    pub(crate) fn new(program: &Program) -> Self {
        let matrix = program
            .blocks
            .iter()
            .map(|b| b.matrix_rows() * (b.updates.len() + 1))
            .max()
            .unwrap_or(0);
        let dx = program.blocks.iter().map(|b| b.updates.len()).max().unwrap_or(0);
        Self {
            regs: vec![0.0; program.registers],
            stack: vec![0.0; program.code.max_stack().max(1)],
            matrix: vec![0.0; matrix],
            dx: vec![0.0; dx],
        }
    }
}

/// Why a block stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// An output became NaN or infinite at this sample of the block.
    Diverged { offset: usize },
}

/// Per-call settings of [`execute`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Context<'a> {
    pub parameters: &'a [f64],
    /// Absolute index of the first sample of the block.
    pub start: u64,
    pub oversample: u32,
    pub time_step: f64,
    pub iterations: u32,
}

/// Run `samples` samples. The persisted registers must already hold the
/// state to start from.
pub(crate) fn execute(
    program: &Program,
    machine: &mut Machine,
    ctx: &Context<'_>,
    samples: usize,
    inputs: &[&[f64]],
    outputs: &mut [&mut [f64]],
    stats: &mut RunStats,
) -> Result<(), Fault> {
    let Machine {
        regs,
        stack,
        matrix,
        dx,
    } = machine;
    let instrs = program.code.instrs();
    let ov = ctx.oversample as usize;
    let scale = 1.0 / ctx.oversample as f64;

    for (&r, &value) in program.parameters.iter().zip(ctx.parameters) {
        regs[r as usize] = value;
    }
    for input in &program.inputs {
        regs[input.value as usize] = regs[input.prev as usize];
    }

    for n in 0..samples {
        for (input, buffer) in program.inputs.iter().zip(inputs) {
            regs[input.slope as usize] = (buffer[n] - regs[input.value as usize]) * scale;
        }
        for output in &program.outputs {
            regs[output.acc as usize] = 0.0;
        }

        let base = (ctx.start + n as u64) * ctx.oversample as u64;
        for s in 0..ov {
            regs[program.time as usize] = (base + s as u64 + 1) as f64 * ctx.time_step;
            for (input, buffer) in program.inputs.iter().zip(inputs) {
                // Land exactly on the block sample at the last substep.
                regs[input.value as usize] = if s + 1 == ov {
                    buffer[n]
                } else {
                    regs[input.value as usize] + regs[input.slope as usize]
                };
            }

            for step in &program.steps {
                match *step {
                    Step::Assign { dst, code } => {
                        let value = eval(instrs, code, regs, stack);
                        regs[dst as usize] = value;
                    }
                    Step::Newton(index) => newton(
                        &program.blocks[index],
                        instrs,
                        regs,
                        stack,
                        matrix,
                        dx,
                        ctx.iterations,
                        stats,
                    ),
                }
            }

            for &(dst, src) in &program.shifts {
                regs[dst as usize] = regs[src as usize];
            }
            for output in &program.outputs {
                let value = eval(instrs, output.code, regs, stack);
                regs[output.acc as usize] += value;
            }
            for input in &program.inputs {
                regs[input.prev as usize] = regs[input.value as usize];
            }
            stats.substeps += 1;
        }

        let mut finite = true;
        for (output, buffer) in program.outputs.iter().zip(outputs.iter_mut()) {
            let value = regs[output.acc as usize] * scale;
            finite &= value.is_finite();
            buffer[n] = value;
        }
        if n & DIVERGENCE_CHECK_MASK == 0 && !finite {
            return Err(Fault::Diverged { offset: n });
        }
    }
    Ok(())
}

#[inline]
fn converged(dx: f64, x: f64) -> bool {
    dx.abs() < RELATIVE_TOLERANCE * x.abs() + ABSOLUTE_TOLERANCE
}

#[allow(clippy::too_many_arguments)]
fn newton(
    block: &NewtonBlock,
    instrs: &[Instr],
    regs: &mut [f64],
    stack: &mut [f64],
    matrix: &mut [f64],
    dx: &mut [f64],
    iterations: u32,
    stats: &mut RunStats,
) {
    for &(x, code) in &block.guesses {
        let value = eval(instrs, code, regs, stack);
        regs[x as usize] = value;
    }

    let n = block.updates.len();
    let m = block.matrix_rows();
    let stride = n + 1;
    let ab = &mut matrix[..m * stride];

    let mut used = 0;
    let mut done = false;
    while used < iterations && !done {
        used += 1;

        ab.fill(0.0);
        for (i, row) in block.rows.iter().enumerate() {
            for &(j, code) in &row.entries {
                ab[i * stride + j] = eval(instrs, code, regs, stack);
            }
            ab[i * stride + n] = eval(instrs, row.residual, regs, stack);
        }
        gauss::row_reduce(ab, stride, m, n);
        gauss::back_substitute(ab, stride, n, dx);

        // A limited junction step is never the last one.
        done = true;
        for &(j, limit) in &block.limits {
            let x = regs[block.updates[j].0 as usize];
            let new = x + dx[j];
            let limited = limit.limit(x, new);
            if limited != new {
                dx[j] = limited - x;
                done = false;
            }
        }
        for (j, &(x, d)) in block.updates.iter().enumerate() {
            regs[d as usize] = dx[j];
            done &= converged(dx[j], regs[x as usize]);
        }
        for (&(d, code), &x) in block.known.iter().zip(&block.known_targets) {
            let value = eval(instrs, code, regs, stack);
            regs[d as usize] = value;
            done &= converged(value, regs[x as usize]);
        }

        for &(x, d) in &block.updates {
            regs[x as usize] += regs[d as usize];
        }
        for (&(d, _), &x) in block.known.iter().zip(&block.known_targets) {
            regs[x as usize] += regs[d as usize];
        }
    }

    stats.solves += 1;
    stats.newton_iterations += used as u64;
    stats.max_iterations = stats.max_iterations.max(used);
    if !done {
        stats.unconverged += 1;
    }
}
