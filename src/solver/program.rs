//! Compiled simulation program.
//!
//! Every expression is lowered to a short run of stack-machine
//! [`Instr`]uctions stored in one flat buffer and referenced by [`Code`]
//! ranges. The [`Program`] ties those codes to registers: it is the
//! complete per-sample procedure executed by [`exec`](super::exec).

use crate::algebra::{Expr, Func, Var};
use crate::components::JunctionLimit;
use crate::error::{Result, TransimError};

/// Register index.
pub(crate) type Reg = u32;

/// Integer exponents up to this magnitude are lowered to `powi`.
const MAX_POWI: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Instr {
    Const(f64),
    Load(Reg),
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    PowI(i32),
    Call(Func),
    // Fused forms produced by the peephole pass. The operand is the
    // right-hand side: `AddConst(c)` computes `top + c`.
    AddConst(f64),
    SubConst(f64),
    MulConst(f64),
    DivConst(f64),
    AddReg(Reg),
    SubReg(Reg),
    MulReg(Reg),
    DivReg(Reg),
}

impl Instr {
    /// Change in stack depth.
    fn stack_effect(self) -> isize {
        match self {
            Instr::Const(_) | Instr::Load(_) => 1,
            Instr::Add | Instr::Sub | Instr::Mul | Instr::Div | Instr::Pow => -1,
            _ => 0,
        }
    }
}

#[inline]
pub(crate) fn binary(op: Instr, a: f64, b: f64) -> f64 {
    match op {
        Instr::Add | Instr::AddConst(_) | Instr::AddReg(_) => a + b,
        Instr::Sub | Instr::SubConst(_) | Instr::SubReg(_) => a - b,
        Instr::Mul | Instr::MulConst(_) | Instr::MulReg(_) => a * b,
        Instr::Div | Instr::DivConst(_) | Instr::DivReg(_) => a / b,
        Instr::Pow => a.powf(b),
        _ => f64::NAN,
    }
}

#[inline]
pub(crate) fn unary(op: Instr, a: f64) -> f64 {
    match op {
        Instr::Neg => -a,
        Instr::PowI(k) => a.powi(k),
        Instr::Call(func) => func.apply(a),
        _ => f64::NAN,
    }
}

/// A range of instructions evaluating one expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Code {
    start: u32,
    len: u32,
}

impl Code {
    pub(crate) fn range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..start + self.len as usize
    }
}

/// Flat instruction storage shared by all codes of a program.
#[derive(Debug, Clone, Default)]
pub(crate) struct CodeBuffer {
    instrs: Vec<Instr>,
    optimize: bool,
    /// Start of the code currently being emitted; the peephole pass never
    /// looks before it.
    start: usize,
    max_stack: usize,
}

impl CodeBuffer {
    pub(crate) fn new(optimize: bool) -> Self {
        Self {
            optimize,
            ..Self::default()
        }
    }

    pub(crate) fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Deepest stack any code needs.
    pub(crate) fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Compile `expr`, resolving every variable to a register.
    pub(crate) fn emit<R>(&mut self, expr: &Expr, resolve: &R) -> Result<Code>
    where
        R: Fn(&Var) -> Result<Reg>,
    {
        self.start = self.instrs.len();
        if let Err(e) = self.emit_expr(expr, resolve) {
            self.instrs.truncate(self.start);
            return Err(e);
        }

        let mut depth = 0isize;
        let mut max = 0isize;
        for instr in &self.instrs[self.start..] {
            depth += instr.stack_effect();
            max = max.max(depth);
        }
        self.max_stack = self.max_stack.max(max as usize);

        Ok(Code {
            start: self.start as u32,
            len: (self.instrs.len() - self.start) as u32,
        })
    }

    fn emit_expr<R>(&mut self, expr: &Expr, resolve: &R) -> Result<()>
    where
        R: Fn(&Var) -> Result<Reg>,
    {
        match expr {
            Expr::Const(c) => self.push(Instr::Const(*c)),
            Expr::Var(v) => self.push(Instr::Load(resolve(v)?)),
            Expr::Deriv(v) => {
                return Err(TransimError::build_failed(format!(
                    "cannot evaluate the derivative of {}",
                    v
                )))
            }
            Expr::Sum(terms) => {
                let mut terms = terms.iter();
                match terms.next() {
                    Some(first) => self.emit_expr(first, resolve)?,
                    None => self.push(Instr::Const(0.0)),
                }
                for term in terms {
                    self.emit_expr(term, resolve)?;
                    self.push(Instr::Add);
                }
            }
            Expr::Product(factors) => {
                let mut numerators = Vec::new();
                let mut denominators = Vec::new();
                for factor in factors {
                    match factor {
                        Expr::Pow(base, exponent) if exponent.as_const().is_some_and(|e| e < 0.0) => {
                            let e = exponent.as_const().unwrap_or(-1.0);
                            denominators.push(Expr::pow((**base).clone(), Expr::Const(-e)));
                        }
                        other => numerators.push(other),
                    }
                }
                match numerators.split_first() {
                    Some((first, rest)) => {
                        self.emit_expr(first, resolve)?;
                        for factor in rest {
                            self.emit_expr(factor, resolve)?;
                            self.push(Instr::Mul);
                        }
                    }
                    None => self.push(Instr::Const(1.0)),
                }
                for denominator in &denominators {
                    self.emit_expr(denominator, resolve)?;
                    self.push(Instr::Div);
                }
            }
            Expr::Pow(base, exponent) => {
                self.emit_expr(base, resolve)?;
                match exponent.as_const() {
                    Some(e) if e == 0.5 => self.push(Instr::Call(Func::Sqrt)),
                    Some(e) if e.fract() == 0.0 && e.abs() <= MAX_POWI => self.push(Instr::PowI(e as i32)),
                    _ => {
                        self.emit_expr(exponent, resolve)?;
                        self.push(Instr::Pow);
                    }
                }
            }
            Expr::Call(func, arg) => {
                self.emit_expr(arg, resolve)?;
                self.push(Instr::Call(*func));
            }
        }
        Ok(())
    }

    /// Append `instr`, folding it into the tail of the current code when
    /// the result evaluates bit-identically.
    fn push(&mut self, instr: Instr) {
        if self.optimize {
            let code = &self.instrs[self.start..];
            let last = code.last().copied();
            let prev = code.len().checked_sub(2).map(|i| code[i]);
            match (prev, last, instr) {
                (Some(Instr::Const(a)), Some(Instr::Const(b)), Instr::Add | Instr::Sub | Instr::Mul | Instr::Div | Instr::Pow) => {
                    self.pop(2);
                    return self.push(Instr::Const(binary(instr, a, b)));
                }
                (_, Some(Instr::Const(a)), Instr::Neg | Instr::PowI(_) | Instr::Call(_)) => {
                    self.pop(1);
                    return self.push(Instr::Const(unary(instr, a)));
                }
                (
                    _,
                    Some(Instr::Const(a)),
                    Instr::AddConst(b) | Instr::SubConst(b) | Instr::MulConst(b) | Instr::DivConst(b),
                ) => {
                    self.pop(1);
                    return self.push(Instr::Const(binary(instr, a, b)));
                }
                (_, Some(Instr::Const(b)), Instr::Add) => return self.fuse(Instr::AddConst(b)),
                (_, Some(Instr::Const(b)), Instr::Sub) => return self.fuse(Instr::SubConst(b)),
                (_, Some(Instr::Const(b)), Instr::Mul) => return self.fuse(Instr::MulConst(b)),
                (_, Some(Instr::Const(b)), Instr::Div) => return self.fuse(Instr::DivConst(b)),
                (_, Some(Instr::Load(r)), Instr::Add) => return self.fuse(Instr::AddReg(r)),
                (_, Some(Instr::Load(r)), Instr::Sub) => return self.fuse(Instr::SubReg(r)),
                (_, Some(Instr::Load(r)), Instr::Mul) => return self.fuse(Instr::MulReg(r)),
                (_, Some(Instr::Load(r)), Instr::Div) => return self.fuse(Instr::DivReg(r)),
                (_, Some(Instr::Neg), Instr::Neg) => {
                    self.pop(1);
                    return;
                }
                _ => {}
            }
        }
        self.instrs.push(instr);
    }

    fn fuse(&mut self, fused: Instr) {
        self.pop(1);
        self.push(fused);
    }

    fn pop(&mut self, n: usize) {
        let len = self.instrs.len();
        self.instrs.truncate(len - n);
    }
}

/// One entry of the per-substep procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Step {
    /// `registers[dst] = code`
    Assign { dst: Reg, code: Code },
    /// Run [`Program::blocks`]`[index]`.
    Newton(usize),
}

/// One row of the Newton system: sparse Jacobian entries by column, and
/// the residual.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewtonRow {
    pub entries: Vec<(usize, Code)>,
    pub residual: Code,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewtonBlock {
    /// `(x, guess)` evaluated before the first iteration.
    pub guesses: Vec<(Reg, Code)>,
    pub rows: Vec<NewtonRow>,
    /// `(x, dx)` for the numerically solved deltas, in column order.
    pub updates: Vec<(Reg, Reg)>,
    /// `(dx, code)` for the symbolically solved deltas, in evaluation order.
    pub known: Vec<(Reg, Code)>,
    /// Unknown updated by each entry of `known`.
    pub known_targets: Vec<Reg>,
    /// `(j, limit)` for numeric updates that are junction voltages.
    pub limits: Vec<(usize, JunctionLimit)>,
}

impl NewtonBlock {
    /// Rows of the dense scratch matrix; short systems are padded with
    /// zero rows.
    pub(crate) fn matrix_rows(&self) -> usize {
        self.rows.len().max(self.updates.len())
    }
}

/// Registers of one external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputRegs {
    pub value: Reg,
    pub slope: Reg,
    /// Persisted value at the previous substep.
    pub prev: Reg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OutputRegs {
    pub code: Code,
    pub acc: Reg,
}

/// The compiled per-substep procedure.
///
/// Registers `[0, persisted)` survive between calls to `run` and are
/// restored to `initial` by `reset`; everything else is scratch.
#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub code: CodeBuffer,
    pub registers: usize,
    pub persisted: usize,
    /// Operating point of the persisted registers.
    pub initial: Vec<f64>,
    pub time: Reg,
    pub parameters: Vec<Reg>,
    pub inputs: Vec<InputRegs>,
    pub outputs: Vec<OutputRegs>,
    pub steps: Vec<Step>,
    pub blocks: Vec<NewtonBlock>,
    /// `(dst, src)` copies applied after every substep, oldest slot first.
    pub shifts: Vec<(Reg, Reg)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::exec::eval;

    fn x() -> Var {
        Var::signal("x")
    }

    fn y() -> Var {
        Var::signal("y")
    }

    fn resolve(v: &Var) -> Result<Reg> {
        match v.name() {
            "x" => Ok(0),
            "y" => Ok(1),
            _ => Err(TransimError::build_failed(format!("unbound {}", v))),
        }
    }

    fn run(expr: &Expr, optimize: bool, regs: &[f64]) -> (f64, usize) {
        let mut buffer = CodeBuffer::new(optimize);
        let code = buffer.emit(expr, &resolve).unwrap();
        let mut stack = vec![0.0; buffer.max_stack()];
        (eval(buffer.instrs(), code, regs, &mut stack), code.range().len())
    }

    fn samples() -> Vec<Expr> {
        let (x, y) = (Expr::Var(x()), Expr::Var(y()));
        vec![
            x.clone() * 2.0 + 1.0,
            x.clone() / y.clone() - y.clone() * y.clone(),
            (x.clone() / 0.0258).exp() * 1e-14 - 1e-14,
            Expr::pow(x.clone() + y.clone(), Expr::Const(0.5)) + x.clone().powi(-3),
            Expr::pow(x.clone(), y.clone()) - (-x.clone()).tanh(),
            Expr::pow(x.clone(), Expr::Const(2.5)) / (y.clone() + 3.0),
            Expr::call(Func::Atan, x.clone() * y.clone()) * Expr::call(Func::Abs, y - 7.0),
        ]
    }

    #[test]
    fn test_optimized_is_bit_identical() {
        for regs in [[0.3, -1.7], [2.0, 4.0], [-0.01, 1e-3]] {
            for expr in samples() {
                let (plain, plain_len) = run(&expr, false, &regs);
                let (fast, fast_len) = run(&expr, true, &regs);
                assert_eq!(plain.to_bits(), fast.to_bits(), "{}", expr);
                assert!(fast_len <= plain_len);
            }
        }
    }

    #[test]
    fn test_matches_symbolic_evaluation() {
        let regs = [0.3, 1.7];
        let env = |v: &Var| resolve(v).ok().map(|r| regs[r as usize]);
        for expr in samples() {
            let (value, _) = run(&expr, true, &regs);
            let expected = expr.evaluate(&env).unwrap();
            approx::assert_relative_eq!(value, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_peephole_fusion() {
        let mut buffer = CodeBuffer::new(true);
        let code = buffer
            .emit(&(Expr::Var(x()) * 2.0 + Expr::Var(y())), &resolve)
            .unwrap();
        let instrs = &buffer.instrs()[code.range()];
        assert_eq!(instrs, &[Instr::Const(2.0), Instr::MulReg(0), Instr::AddReg(1)]);
        assert_eq!(buffer.max_stack(), 1);
    }

    #[test]
    fn test_division_and_powers() {
        let mut buffer = CodeBuffer::new(false);
        let expr = Expr::Var(x()) / Expr::Var(y()).powi(2);
        let code = buffer.emit(&expr, &resolve).unwrap();
        assert_eq!(
            &buffer.instrs()[code.range()],
            &[Instr::Load(0), Instr::Load(1), Instr::PowI(2), Instr::Div]
        );
    }

    #[test]
    fn test_unresolved_and_derivative_fail() {
        let mut buffer = CodeBuffer::new(true);
        assert!(buffer.emit(&Expr::Var(Var::signal("z")), &resolve).is_err());
        assert!(buffer.emit(&Expr::deriv(x()), &resolve).is_err());
        assert!(buffer.instrs().is_empty());
    }
}
