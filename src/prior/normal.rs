//! `NormalPrior`: conjugate Normal-Wishart prior over a mode's latent
//! factors (spec §4.4). Also the shared state `MacauPrior` composes with
//! (design note §9: "the shared Normal state becomes a composed struct, not
//! a base").

use ndarray::{Array1, Array2, Axis};
use rand::RngCore;
use rayon::prelude::*;

use crate::data::Data;
use crate::error::Result;
use crate::linop;
use crate::model::Model;
use crate::rng::{mv_normal_by_precision, rand_normal, rand_unif, wishart, RngPool};

/// Mean `mu`, precision `Lambda`, and the (fixed across iterations)
/// Normal-Wishart hyperprior `(mu0, b0, nu, w)` spec §3 lists.
pub struct NormalState {
    pub mu: Array1<f64>,
    pub lambda: Array2<f64>,
    pub hyper_mu0: Array1<f64>,
    pub hyper_b0: f64,
    pub hyper_nu0: f64,
    pub hyper_w0: Array2<f64>,
    /// `normalone`/`macauone`: resample each latent by univariate Gauss-Seidel
    /// instead of one joint `K`-dimensional draw (cheaper, no `K x K` Cholesky).
    pub univariate: bool,
}

impl NormalState {
    pub fn new(k: usize, univariate: bool) -> Self {
        NormalState {
            mu: Array1::zeros(k),
            lambda: Array2::eye(k),
            hyper_mu0: Array1::zeros(k),
            hyper_b0: 2.0,
            hyper_nu0: k as f64,
            hyper_w0: Array2::eye(k),
            univariate,
        }
    }

    pub fn k(&self) -> usize {
        self.mu.len()
    }

    /// Resample every column of mode `m`'s factor matrix (spec §4.4 steps
    /// 1-3, plus §4.9's parallel column loop). `uhat`, when `Some`, is the
    /// Macau side-information mean offset (`K x D_m`) added to `mu`.
    pub fn sample_latents(
        &self,
        model: &mut Model,
        data: &dyn Data,
        m: usize,
        pool: &RngPool,
        uhat: Option<&Array2<f64>>,
    ) -> Result<()> {
        let mut col_mat = model.take_mode(m);
        let nworkers = pool.nworkers();
        let univariate = self.univariate;
        let mu = &self.mu;
        let lambda = &self.lambda;

        let result = {
            let shared: &Model = &*model;
            col_mat
                .axis_iter_mut(Axis(1))
                .into_par_iter()
                .enumerate()
                .try_for_each(|(d, mut col)| -> Result<()> {
                    let worker = d % nworkers.max(1);
                    let mut rng_guard = pool.worker(worker);
                    let rng: &mut dyn RngCore = &mut *rng_guard;

                    let current = col.to_owned();
                    let (rhs, prec) = data.get_pnm(shared, m, d, &current, rng);

                    let prior_mean = match uhat {
                        Some(u) => mu + &u.column(d),
                        None => mu.clone(),
                    };

                    let mut lambda_post = lambda + &prec;
                    linop::make_symmetric(&mut lambda_post);
                    let mut rhs_post = lambda.dot(&prior_mean);
                    rhs_post += &rhs;

                    if univariate {
                        let draw = gauss_seidel_draw(&lambda_post, &rhs_post, &current, rng);
                        col.assign(&draw);
                    } else {
                        let mean = linop::solve_spd(&lambda_post, &rhs_post)?;
                        let draw = mv_normal_by_precision(rng, &mean, &lambda_post)?;
                        col.assign(&draw);
                    }
                    Ok(())
                })
        };

        model.put_mode(m, col_mat);
        result
    }

    /// Conjugate Normal-Wishart hyperparameter update (spec §4.4's
    /// `update_prior`). `offset`, when `Some`, is the Macau mean offset
    /// matrix (`Uhat`) subtracted from `U_m` before computing the scatter.
    pub fn update_prior(
        &mut self,
        model: &Model,
        m: usize,
        offset: Option<&Array2<f64>>,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let k = self.k();
        let u = model.u(m);
        let n = u.ncols();

        let centered: Array2<f64> = match offset {
            Some(off) => &u - off,
            None => u.to_owned(),
        };

        let xbar = centered.sum_axis(Axis(1)) / n as f64;
        let mut scatter = Array2::<f64>::zeros((k, k));
        for col in centered.axis_iter(Axis(1)) {
            let diff = &col - &xbar;
            for i in 0..k {
                for j in 0..k {
                    scatter[[i, j]] += diff[i] * diff[j];
                }
            }
        }

        let b0_post = self.hyper_b0 + n as f64;
        let mu0_post =
            (&self.hyper_mu0 * self.hyper_b0 + &xbar * n as f64) / b0_post;
        let nu_post = self.hyper_nu0 + n as f64;

        let mean_diff = &xbar - &self.hyper_mu0;
        let coef = self.hyper_b0 * n as f64 / b0_post;
        let mut w_inv = invert_spd(&self.hyper_w0)?;
        w_inv += &scatter;
        for i in 0..k {
            for j in 0..k {
                w_inv[[i, j]] += coef * mean_diff[i] * mean_diff[j];
            }
        }
        let w_post = invert_spd(&w_inv)?;

        self.lambda = wishart(rng, &w_post, nu_post)?;
        self.mu = {
            let precision = &self.lambda * b0_post;
            mv_normal_by_precision(rng, &mu0_post, &precision)?
        };
        Ok(())
    }
}

/// Invert an SPD matrix via Cholesky (`A^-1 = L^-T L^-1`), column by column.
fn invert_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    linop::solve_spd_multi(a, &Array2::eye(n))
}

/// Sequential (Gauss-Seidel) scalar draws for one column of a joint
/// Gaussian with precision `lambda_post` and rhs `rhs_post`: `x_k | x_-k ~
/// N(mu_k, 1/lambda_post[k,k])` with `mu_k` the usual conditional mean.
/// Used by `normalone`/`macauone` to avoid a `K x K` Cholesky per column.
fn gauss_seidel_draw(
    lambda_post: &Array2<f64>,
    rhs_post: &Array1<f64>,
    init: &Array1<f64>,
    rng: &mut dyn RngCore,
) -> Array1<f64> {
    let k = rhs_post.len();
    let mut x = init.clone();
    for kk in 0..k {
        let lkk = lambda_post[[kk, kk]];
        let mut s = rhs_post[kk];
        for j in 0..k {
            if j != kk {
                s -= lambda_post[[kk, j]] * x[j];
            }
        }
        let mu_k = s / lkk;
        x[kk] = mu_k + rand_normal(rng) / lkk.sqrt();
    }
    x
}

/// Uniform(0,1) draw, used by SpikeAndSlab's inclusion gate (re-exported
/// here so callers don't need to import `rng` directly).
pub fn unit_uniform(rng: &mut dyn RngCore) -> f64 {
    rand_unif(rng, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{dense, NoiseModel};
    use ndarray::arr2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn update_prior_keeps_lambda_spd() {
        let k = 2;
        let mut model = Model::new_zeros(k, vec![3, 3]);
        {
            let mut u0 = model.take_mode(0);
            u0.assign(&arr2(&[[1.0, 2.0, 3.0], [0.5, -0.5, 1.5]]));
            model.put_mode(0, u0);
        }
        let mut state = NormalState::new(k, false);
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        state.update_prior(&model, 0, None, &mut rng).unwrap();
        assert!(linop::cholesky(&state.lambda).is_ok());
    }

    #[test]
    fn sample_latents_writes_every_column() {
        let mat = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let data = dense::from_dense(&mat, NoiseModel::fixed(2.0));
        let mut model = Model::new_zeros(2, vec![2, 2]);
        let state = NormalState::new(2, false);
        let pool = RngPool::new(7, 2);
        state.sample_latents(&mut model, &data, 0, &pool, None).unwrap();
        assert!(model.u(0).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn univariate_path_runs_without_cholesky() {
        let mat = arr2(&[[1.0, 0.5], [0.5, 1.0]]);
        let data = dense::from_dense(&mat, NoiseModel::fixed(1.0));
        let mut model = Model::new_zeros(2, vec![2, 2]);
        let state = NormalState::new(2, true);
        let pool = RngPool::new(3, 1);
        state.sample_latents(&mut model, &data, 1, &pool, None).unwrap();
        assert!(model.u(1).iter().all(|v| v.is_finite()));
    }
}
