//! Dense matrix `Data` construction: every cell of an `nrow x ncol` matrix
//! is an observed entry (spec §3's "(b) dense matrix" implementation).

use ndarray::Array2;

use super::{Entry, NoiseModel, TensorData};

/// Build a fully-observed `TensorData` from a dense `nrow x ncol` matrix.
pub fn from_dense(mat: &Array2<f64>, noise: NoiseModel) -> TensorData {
    let (nrow, ncol) = mat.dim();
    let mut entries = Vec::with_capacity(nrow * ncol);
    for i in 0..nrow {
        for j in 0..ncol {
            entries.push(Entry {
                idx: vec![i as u32, j as u32],
                val: mat[[i, j]],
            });
        }
    }
    TensorData::new(vec![nrow, ncol], entries, noise)
}
