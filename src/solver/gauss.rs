//! Dense Gaussian elimination on the Newton matrix.
//!
//! The matrix is row-major with `stride` columns per row. The first `n`
//! columns hold the Jacobian and column `n` holds the residual, so the
//! system being solved is `A * dx + b = 0`.

/// Forward elimination with partial pivoting over the first `m` rows.
///
/// Rows `n..m` (when `m > n`) only take part in pivot selection. A column
/// whose pivot is exactly zero is skipped.
pub(crate) fn row_reduce(ab: &mut [f64], stride: usize, m: usize, n: usize) {
    for j in 0..n {
        // Find pivot
        let mut pivot_row = j;
        let mut max_val = ab[j * stride + j].abs();
        for i in (j + 1)..m {
            let v = ab[i * stride + j].abs();
            if v > max_val {
                max_val = v;
                pivot_row = i;
            }
        }

        // Swap rows; columns before j are already zero in both
        if pivot_row != j {
            for k in j..=n {
                ab.swap(j * stride + k, pivot_row * stride + k);
            }
        }

        let pivot = ab[j * stride + j];
        if pivot == 0.0 {
            continue;
        }
        for i in (j + 1)..m {
            let factor = ab[i * stride + j] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in (j + 1)..=n {
                ab[i * stride + k] -= factor * ab[j * stride + k];
            }
        }
    }
}

/// Back substitution on a reduced matrix, writing `dx` into `x[..n]`.
///
/// A zero pivot yields a zero update for that column.
pub(crate) fn back_substitute(ab: &[f64], stride: usize, n: usize, x: &mut [f64]) {
    for j in (0..n).rev() {
        let row = &ab[j * stride..j * stride + n + 1];
        let mut r = row[n];
        for k in (j + 1)..n {
            r += row[k] * x[k];
        }
        let pivot = row[j];
        x[j] = if pivot == 0.0 { 0.0 } else { -r / pivot };
    }
}
