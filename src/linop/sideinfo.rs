//! The `SideInfo` operator abstraction: block-CG (and `MacauPrior`) only
//! need `apply`/`apply_transpose` on whatever feature matrix backs the
//! regression, dense or sparse. This is the Rust re-expression of the
//! original's template-on-matrix-kind design (spec §9): a trait at the
//! seam instead of a C++ template parameter.

use ndarray::{Array1, Array2};

/// A `d x p` side-information matrix (`d` = mode size, `p` = feature count)
/// supplying the two matvecs block-CG needs. Implementors must be `Sync`
/// since `sample_latents`'s parallel column loop calls `get_pnm` (and,
/// indirectly, nothing on `SideInfo` itself — but `MacauPrior::sample_beta`
/// runs the CG solve from the single driving thread, while the operator may
/// still be read concurrently by worker threads computing `Uhat`).
pub trait SideInfo: Sync {
    /// Number of rows (`D_m`, the mode size).
    fn nrows(&self) -> usize;
    /// Number of columns (`P`, the feature count).
    fn ncols(&self) -> usize;
    /// `y := A x` (`x` has length `ncols`, result has length `nrows`).
    fn apply(&self, x: &Array1<f64>) -> Array1<f64>;
    /// `y := A^T x` (`x` has length `nrows`, result has length `ncols`).
    fn apply_transpose(&self, x: &Array1<f64>) -> Array1<f64>;

    /// `out := A^T A b + reg * b` for a single row `b` of length `ncols`.
    fn ata_mul_row(&self, reg: f64, b: &Array1<f64>) -> Array1<f64> {
        let kb = self.apply(b);
        let ktkb = self.apply_transpose(&kb);
        &ktkb + &(reg * b)
    }

    /// Batched `AtA_mul_B`: apply `ata_mul_row` to every row of `b` (shape
    /// `nrhs x ncols`), row-major per spec §4.2's block layout.
    fn ata_mul_b(&self, reg: f64, b: &Array2<f64>) -> Array2<f64> {
        let nrhs = b.nrows();
        let ncols = b.ncols();
        let mut out = Array2::<f64>::zeros((nrhs, ncols));
        for r in 0..nrhs {
            let row = b.row(r).to_owned();
            out.row_mut(r).assign(&self.ata_mul_row(reg, &row));
        }
        out
    }
}

/// Dense side information: `F` stored as a plain `Array2<f64>`.
pub struct DenseSideInfo {
    pub f: Array2<f64>,
}

impl DenseSideInfo {
    pub fn new(f: Array2<f64>) -> Self {
        DenseSideInfo { f }
    }
}

impl SideInfo for DenseSideInfo {
    fn nrows(&self) -> usize {
        self.f.nrows()
    }
    fn ncols(&self) -> usize {
        self.f.ncols()
    }
    fn apply(&self, x: &Array1<f64>) -> Array1<f64> {
        self.f.dot(x)
    }
    fn apply_transpose(&self, x: &Array1<f64>) -> Array1<f64> {
        self.f.t().dot(x)
    }
    fn ata_mul_b(&self, reg: f64, b: &Array2<f64>) -> Array2<f64> {
        // Dense fast path: a single GEMM chain instead of per-row matvecs.
        let fb = self.f.dot(&b.t()); // nrows x nrhs
        let ftfb = self.f.t().dot(&fb).t().to_owned(); // nrhs x ncols
        &ftfb + &(reg * b)
    }
}

/// Sparse side information stored in CSR (row-major, for `apply`) and CSC
/// (column-major, i.e. CSR-of-the-transpose, for `apply_transpose`) form,
/// ported from the original's `SparseModeNew` indexing scheme.
pub struct SparseSideInfo {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    row_col: Vec<usize>,
    row_val: Vec<f64>,
    col_ptr: Vec<usize>,
    col_row: Vec<usize>,
    col_val: Vec<f64>,
}

impl SparseSideInfo {
    /// Build from a coordinate list `(row, col, value)`.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut row_counts = vec![0usize; nrows + 1];
        let mut col_counts = vec![0usize; ncols + 1];
        for &(r, c, _) in triplets {
            row_counts[r] += 1;
            col_counts[c] += 1;
        }
        let mut row_ptr = vec![0usize; nrows + 1];
        for i in 0..nrows {
            row_ptr[i + 1] = row_ptr[i] + row_counts[i];
        }
        let mut col_ptr = vec![0usize; ncols + 1];
        for i in 0..ncols {
            col_ptr[i + 1] = col_ptr[i] + col_counts[i];
        }

        let nnz = triplets.len();
        let mut row_col = vec![0usize; nnz];
        let mut row_val = vec![0.0f64; nnz];
        let mut cursor = row_ptr.clone();
        for &(r, c, v) in triplets {
            let dest = cursor[r];
            row_col[dest] = c;
            row_val[dest] = v;
            cursor[r] += 1;
        }

        let mut col_row = vec![0usize; nnz];
        let mut col_val = vec![0.0f64; nnz];
        let mut cursor = col_ptr.clone();
        for &(r, c, v) in triplets {
            let dest = cursor[c];
            col_row[dest] = r;
            col_val[dest] = v;
            cursor[c] += 1;
        }

        SparseSideInfo {
            nrows,
            ncols,
            row_ptr,
            row_col,
            row_val,
            col_ptr,
            col_row,
            col_val,
        }
    }
}

impl SideInfo for SparseSideInfo {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn apply(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.nrows);
        for row in 0..self.nrows {
            let mut acc = 0.0;
            for i in self.row_ptr[row]..self.row_ptr[row + 1] {
                acc += self.row_val[i] * x[self.row_col[i]];
            }
            out[row] = acc;
        }
        out
    }
    fn apply_transpose(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.ncols);
        for col in 0..self.ncols {
            let mut acc = 0.0;
            for i in self.col_ptr[col]..self.col_ptr[col + 1] {
                acc += self.col_val[i] * x[self.col_row[i]];
            }
            out[col] = acc;
        }
        out
    }
}

/// The abstract contract for `MacauMPIPrior`'s distributed `AtA` product
/// (spec §4.6/§9). Implementations may use MPI, gRPC, or — as here, for
/// tests and single-process runs — a direct in-process shim.
pub trait DistributedOperator: Sync {
    /// Apply this rank's chunk of `A^T A b + reg * b` to a single row.
    fn apply_local(&self, reg: f64, b: &Array1<f64>) -> Array1<f64>;
    /// Gather and sum partial products from all ranks into the full result.
    fn gather(&self, local: Array1<f64>) -> Array1<f64>;
    /// Broadcast the master's converged `X` row to all ranks.
    fn broadcast(&self, x: Array1<f64>) -> Array1<f64>;
}

/// Single-process stand-in for `DistributedOperator`: every "rank" is the
/// same in-process `SideInfo`, so gather/broadcast are identity operations.
/// This is the shim the design notes call out as acceptable for tests.
pub struct SingleProcessShim<'a, S: SideInfo> {
    pub inner: &'a S,
}

impl<'a, S: SideInfo> DistributedOperator for SingleProcessShim<'a, S> {
    fn apply_local(&self, reg: f64, b: &Array1<f64>) -> Array1<f64> {
        self.inner.ata_mul_row(reg, b)
    }
    fn gather(&self, local: Array1<f64>) -> Array1<f64> {
        local
    }
    fn broadcast(&self, x: Array1<f64>) -> Array1<f64> {
        x
    }
}
