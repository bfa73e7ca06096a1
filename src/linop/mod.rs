//! Dense linear-algebra kernels: Cholesky, triangular solves, the
//! symmetric `AtA_mul_B` kernel, and the block conjugate-gradient solver
//! (spec §4.2). Matrix storage is `ndarray::Array2<f64>` throughout; `dot`
//! is ndarray's bundled `matrixmultiply` GEMM, so no external BLAS binding
//! is required.

pub mod blockcg;
pub mod sideinfo;

use crate::error::{Result, SmurffError};
use ndarray::{Array1, Array2, ArrayView2};

pub use blockcg::{solve_blockcg, BlockCgOptions, BlockCgReport};
pub use sideinfo::{DenseSideInfo, DistributedOperator, SideInfo, SingleProcessShim, SparseSideInfo};

/// Lower-Cholesky factor `L` such that `L L^T = a`. Fails with
/// `NumericalError` if `a` is not SPD (a non-positive pivot is hit).
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SmurffError::Assertion(
            "cholesky: matrix must be square".into(),
        ));
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return Err(SmurffError::Numerical(format!(
                        "Cholesky decomposition failed: matrix not positive definite (pivot {} = {})",
                        i, sum
                    )));
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Solve `L x = b` by forward substitution (`l` lower-triangular).
pub fn solve_lower_triangular(l: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * x[k];
        }
        if l[[i, i]].abs() < 1e-300 {
            return Err(SmurffError::Numerical(
                "forward substitution hit a zero pivot".into(),
            ));
        }
        x[i] = sum / l[[i, i]];
    }
    Ok(x)
}

/// Solve `L^T x = b` by back substitution (`l` lower-triangular, so `L^T` is upper).
pub fn solve_upper_triangular_transpose(l: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        if l[[i, i]].abs() < 1e-300 {
            return Err(SmurffError::Numerical(
                "back substitution hit a zero pivot".into(),
            ));
        }
        x[i] = sum / l[[i, i]];
    }
    Ok(x)
}

/// Solve the SPD system `A x = b` via Cholesky.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let l = cholesky(a)?;
    let y = solve_lower_triangular(&l, b)?;
    solve_upper_triangular_transpose(&l, &y)
}

/// Solve the SPD system `A X = B` (multiple right-hand sides, columns of `B`).
pub fn solve_spd_multi(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    let n = b.nrows();
    let m = b.ncols();
    let mut x = Array2::<f64>::zeros((n, m));
    for col in 0..m {
        let bcol = b.column(col).to_owned();
        let y = solve_lower_triangular(&l, &bcol)?;
        let xcol = solve_upper_triangular_transpose(&l, &y)?;
        x.column_mut(col).assign(&xcol);
    }
    Ok(x)
}

/// `out := A^T A + reg * I`, symmetrized to kill float asymmetry.
pub fn at_a(a: &ArrayView2<f64>, reg: f64) -> Array2<f64> {
    let mut out = a.t().dot(a);
    let k = out.nrows();
    for i in 0..k {
        out[[i, i]] += reg;
    }
    make_symmetric(&mut out);
    out
}

/// Force exact symmetry by averaging `A` with `A^T` in place (kills the
/// float round-trip asymmetry that block-CG's Cholesky calls are sensitive to).
pub fn make_symmetric(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = avg;
            a[[j, i]] = avg;
        }
    }
}

/// `out := A^T A B + reg * B` for dense `A` (the one-shot path; the
/// side-information variant lives in `sideinfo.rs`/`blockcg.rs`).
pub fn ata_mul_b_dense(a: &Array2<f64>, reg: f64, b: &Array2<f64>) -> Array2<f64> {
    let ab = a.dot(b);
    let at_ab = a.t().dot(&ab);
    &at_ab + &(reg * b)
}
