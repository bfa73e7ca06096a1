//! The latent `Model`: per-mode factor matrices and their joint prediction
//! (spec §3). Single-ownership per design note §9 — Session owns the
//! `Model`; Priors and Data borrow it for the duration of one sweep.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::error::Result;
use crate::io::binary;
use crate::rng::bmrandn;

/// How `Model::init` fills each factor matrix before the first burn-in iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitKind {
    Zero,
    Random,
}

/// An ordered collection of `nmodes` factor matrices `U_0 .. U_{nmodes-1}`;
/// `U_m` is `K x D_m`. The prediction for a cell is the sum over `k` of the
/// product of the cell's coordinate column across every mode.
pub struct Model {
    k: usize,
    dims: Vec<usize>,
    u: Vec<Array2<f64>>,
}

impl Model {
    pub fn new_zeros(k: usize, dims: Vec<usize>) -> Self {
        let u = dims.iter().map(|&d| Array2::zeros((k, d))).collect();
        Model { k, dims, u }
    }

    pub fn new_random(k: usize, dims: Vec<usize>, rng: &mut impl Rng) -> Self {
        let mut u: Vec<Array2<f64>> = dims.iter().map(|&d| Array2::zeros((k, d))).collect();
        for mat in u.iter_mut() {
            bmrandn(rng, mat);
        }
        Model { k, dims, u }
    }

    pub fn init(k: usize, dims: Vec<usize>, kind: InitKind, rng: &mut impl Rng) -> Self {
        match kind {
            InitKind::Zero => Model::new_zeros(k, dims),
            InitKind::Random => Model::new_random(k, dims, rng),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn nmodes(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, m: usize) -> usize {
        self.dims[m]
    }

    pub fn u(&self, m: usize) -> ArrayView2<'_, f64> {
        self.u[m].view()
    }

    pub fn col(&self, m: usize, d: usize) -> ArrayView1<'_, f64> {
        self.u[m].column(d)
    }

    /// Move `U_m` out of the model, leaving a zeroed placeholder in its
    /// slot. Pairs with `put_mode`: this is how a `Prior` gets exclusive,
    /// non-aliasing write access to the column it resamples while every
    /// other mode stays immutably borrowable from `&Model` (design note §9's
    /// "global thread-local cache becomes explicit per-worker storage",
    /// applied here to the factor matrix itself rather than a scratch buffer).
    pub fn take_mode(&mut self, m: usize) -> Array2<f64> {
        std::mem::replace(&mut self.u[m], Array2::zeros((self.k, self.dims[m])))
    }

    pub fn put_mode(&mut self, m: usize, mat: Array2<f64>) {
        debug_assert_eq!(mat.dim(), (self.k, self.dims[m]));
        self.u[m] = mat;
    }

    /// A read-only view over every mode except `exclude`, used while
    /// resampling mode `exclude`'s columns (the original's `SubModel`).
    pub fn submodel(&self, exclude: usize) -> SubModel<'_> {
        SubModel { model: self, exclude }
    }

    /// `sum_k prod_m U_m[k, idx[m]]`.
    pub fn predict(&self, idx: &[u32]) -> f64 {
        let mut total = 0.0;
        for kk in 0..self.k {
            let mut prod = 1.0;
            for (m, &i) in idx.iter().enumerate() {
                prod *= self.u[m][[kk, i as usize]];
            }
            total += prod;
        }
        total
    }

    /// Latent-wise norm report, ported from the original's
    /// `Model::status`: `status()[k] = prod_m ||U_m[k, :]||_2`, a single
    /// length-`K` vector formed by multiplying each mode's per-row norm
    /// elementwise across modes (not one vector per mode).
    pub fn status(&self) -> Vec<f64> {
        let mut p = vec![1.0f64; self.k];
        for mat in &self.u {
            for kk in 0..self.k {
                let norm = mat.row(kk).iter().map(|v| v * v).sum::<f64>().sqrt();
                p[kk] *= norm;
            }
        }
        p
    }

    pub fn info(&self) -> String {
        format!(
            "Model: {} modes, K={}, dims={:?}",
            self.nmodes(),
            self.k,
            self.dims
        )
    }

    /// Write every mode's factor matrix to `{dir}/{prefix}-sample-{iter}-U{m}-latents.ddm`.
    pub fn save(&self, dir: &Path, prefix: &str, iter: i64) -> Result<()> {
        for (m, mat) in self.u.iter().enumerate() {
            let path = dir.join(format!("{prefix}-sample-{iter}-U{m}-latents.ddm"));
            binary::write_dense_ddm(&path, mat)?;
        }
        Ok(())
    }

    /// Read back a model previously written by `save`.
    pub fn restore(dir: &Path, prefix: &str, iter: i64, k: usize, dims: Vec<usize>) -> Result<Self> {
        let mut u = Vec::with_capacity(dims.len());
        for m in 0..dims.len() {
            let path = dir.join(format!("{prefix}-sample-{iter}-U{m}-latents.ddm"));
            u.push(binary::read_dense_ddm(&path)?);
        }
        Ok(Model { k, dims, u })
    }
}

/// Borrowed view over every mode except `exclude` (the original's `SubModel`).
pub struct SubModel<'a> {
    model: &'a Model,
    exclude: usize,
}

impl<'a> SubModel<'a> {
    pub fn other_modes(&self) -> impl Iterator<Item = usize> + 'a {
        let nmodes = self.model.nmodes();
        let exclude = self.exclude;
        (0..nmodes).filter(move |&m| m != exclude)
    }

    pub fn col(&self, m: usize, d: usize) -> ArrayView1<'a, f64> {
        debug_assert_ne!(m, self.exclude);
        self.model.col(m, d)
    }

    /// Elementwise (Hadamard) product of every other mode's column at the
    /// cell's coordinates — the `h` vector `get_pnm` scales by the cell's
    /// value and precision.
    pub fn hadamard(&self, idx: &[u32]) -> Array1<f64> {
        let mut h = Array1::<f64>::from_elem(self.model.k(), 1.0);
        for m in self.other_modes() {
            let col = self.col(m, idx[m] as usize);
            h *= &col;
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_matches_manual_product() {
        let mut m = Model::new_zeros(2, vec![2, 2]);
        {
            let mut u0 = m.take_mode(0);
            u0[[0, 0]] = 1.0;
            u0[[1, 0]] = 2.0;
            m.put_mode(0, u0);
            let mut u1 = m.take_mode(1);
            u1[[0, 1]] = 3.0;
            u1[[1, 1]] = 4.0;
            m.put_mode(1, u1);
        }
        // predict(0,1) = U0[0,0]*U1[0,1] + U0[1,0]*U1[1,1] = 1*3 + 2*4 = 11
        assert!((m.predict(&[0, 1]) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn take_put_mode_round_trips() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(5);
        let mut m = Model::new_random(3, vec![4, 5], &mut rng);
        let taken = m.take_mode(0);
        assert_eq!(taken.dim(), (3, 4));
        // mode 0 is a zeroed placeholder while taken
        assert!(m.u(0).iter().all(|&v| v == 0.0));
        m.put_mode(0, taken);
    }

    #[test]
    fn submodel_excludes_given_mode() {
        let m = Model::new_zeros(2, vec![2, 2, 2]);
        let sub = m.submodel(1);
        let others: Vec<usize> = sub.other_modes().collect();
        assert_eq!(others, vec![0, 2]);
    }

    #[test]
    fn status_reports_per_latent_norms() {
        let mut m = Model::new_zeros(1, vec![3]);
        let mut u0 = m.take_mode(0);
        u0[[0, 0]] = 3.0;
        u0[[0, 1]] = 4.0;
        u0[[0, 2]] = 0.0;
        m.put_mode(0, u0);
        let status = m.status();
        assert!((status[0] - 5.0).abs() < 1e-12);
    }
}
