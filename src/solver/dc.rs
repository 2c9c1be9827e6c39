//! DC operating point.
//!
//! The steady state of the circuit: every time derivative is zero, inputs
//! and time are zero and parameters hold their defaults. It seeds the
//! persisted state, so a biased circuit starts settled instead of powering
//! up from all zeros.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use super::cancel::CancellationToken;
use super::gauss;
use super::transient::partition;
use super::{ABSOLUTE_TOLERANCE, RELATIVE_TOLERANCE};
use crate::algebra::{differentiate, Expr, Var, VarKind};
use crate::circuit::Analysis;
use crate::components::JunctionLimit;
use crate::error::Result;

/// Newton iteration budget of each partition.
const MAX_ITERATIONS: usize = 200;

/// Solve the operating point of `analysis`.
///
/// Numerical trouble is not an error: a partition that does not converge
/// logs a warning and starts from zero. Only cancellation fails.
pub(crate) fn operating_point(analysis: &Analysis, cancel: &CancellationToken) -> Result<BTreeMap<Var, f64>> {
    cancel.check()?;
    let unknowns = analysis.unknowns();
    let mut values: BTreeMap<Var, f64> = unknowns.iter().map(|u| (u.clone(), 0.0)).collect();

    let equations = match steady_state(analysis) {
        Ok(equations) => equations,
        Err(message) => {
            warn!("No DC operating point ({}), the simulation may be unstable", message);
            return Ok(values);
        }
    };
    let parts = match partition(&equations, unknowns) {
        Ok(parts) => parts,
        Err(e) => {
            warn!("No DC operating point ({}), the simulation may be unstable", e);
            return Ok(values);
        }
    };

    let limits: BTreeMap<&Var, JunctionLimit> = analysis.junctions().iter().map(|(v, l)| (v, *l)).collect();
    let count = parts.len();
    for part in parts {
        cancel.check()?;
        if !newton(&part.equations, &part.unknowns, &limits, &mut values) {
            let names: Vec<String> = part.unknowns.iter().map(|u| u.to_string()).collect();
            warn!(
                "Failed to find the DC operating point of [{}], the simulation may be unstable",
                names.join(", ")
            );
            for u in &part.unknowns {
                values.insert(u.clone(), 0.0);
            }
        }
    }
    info!("DC operating point: {} unknowns in {} partitions", unknowns.len(), count);
    for (u, v) in &values {
        debug!("  {} = {}", u, v);
    }
    Ok(values)
}

/// The residuals at steady state, with constant-zero ones dropped.
fn steady_state(analysis: &Analysis) -> std::result::Result<Vec<Expr>, String> {
    let unknowns: BTreeSet<&Var> = analysis.unknowns().iter().collect();
    let inputs: BTreeSet<&Var> = analysis.inputs().iter().collect();

    let mut fixed: BTreeMap<Var, Expr> = BTreeMap::new();
    fixed.insert(Var::time(), Expr::ZERO);
    for p in analysis.parameters() {
        fixed.insert(p.var(), Expr::Const(p.default));
    }

    let mut equations = Vec::new();
    for equation in analysis.equations() {
        let residual = equation.residual();
        let still: BTreeMap<Var, Expr> = residual.derivatives().into_iter().map(|y| (y, Expr::ZERO)).collect();
        let residual = residual.substitute_derivatives(&still);

        let mut map = fixed.clone();
        for v in residual.variables() {
            if v.kind() == VarKind::Time || v.kind() == VarKind::Parameter {
                continue;
            }
            let current = v.current();
            if inputs.contains(&current) {
                map.insert(v, Expr::ZERO);
            } else if v.delay() > 0 && unknowns.contains(&current) {
                map.insert(v, Expr::Var(current));
            }
        }
        let residual = residual.substitute(&map);

        match residual.as_const() {
            Some(c) if c == 0.0 => {}
            Some(c) => return Err(format!("inconsistent equation {} = 0", c)),
            None => equations.push(residual),
        }
    }
    Ok(equations)
}

#[inline]
fn converged(dx: f64, x: f64) -> bool {
    dx.abs() < RELATIVE_TOLERANCE * x.abs() + ABSOLUTE_TOLERANCE
}

/// Dense damped Newton on one partition, starting from `values`. Returns
/// whether it converged; `values` holds the last iterate either way.
fn newton(
    equations: &[Expr],
    unknowns: &[Var],
    limits: &BTreeMap<&Var, JunctionLimit>,
    values: &mut BTreeMap<Var, f64>,
) -> bool {
    let n = unknowns.len();
    let m = equations.len().max(n);
    let stride = n + 1;
    let jacobian: Vec<Vec<Option<Expr>>> = equations
        .iter()
        .map(|f| {
            unknowns
                .iter()
                .map(|x| f.depends_on(x).then(|| differentiate(f, x)))
                .collect()
        })
        .collect();

    let mut ab = vec![0.0; m * stride];
    let mut dx = vec![0.0; n];
    for _ in 0..MAX_ITERATIONS {
        ab.fill(0.0);
        {
            let env = |v: &Var| values.get(v).copied();
            for (i, (f, row)) in equations.iter().zip(&jacobian).enumerate() {
                for (j, entry) in row.iter().enumerate() {
                    if let Some(entry) = entry {
                        ab[i * stride + j] = entry.evaluate(&env).unwrap_or(f64::NAN);
                    }
                }
                ab[i * stride + n] = f.evaluate(&env).unwrap_or(f64::NAN);
            }
        }
        if ab.iter().any(|v| !v.is_finite()) {
            return false;
        }
        gauss::row_reduce(&mut ab, stride, m, n);
        gauss::back_substitute(&ab, stride, n, &mut dx);

        let mut done = true;
        for (x, &d) in unknowns.iter().zip(&dx) {
            let old = values.get(x).copied().unwrap_or(0.0);
            let mut new = old + d;
            if let Some(limit) = limits.get(x) {
                let limited = limit.limit(old, new);
                done &= limited == new;
                new = limited;
            }
            done &= converged(new - old, old);
            values.insert(x.clone(), new);
        }
        if done {
            return true;
        }
    }
    false
}
