//! `SpikeAndSlabPrior`: a per-latent binary inclusion variable integrated
//! out analytically, producing a mixture posterior per `(k, view)` (spec
//! §4.7). Ported from the original's `SpikeAndSlabPrior.cpp`, which builds
//! on a univariate (`NormalOnePrior`) column draw the same way this crate's
//! `NormalState { univariate: true }` path does.

use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rand::RngCore;
use rayon::prelude::*;

use crate::data::Data;
use crate::error::Result;
use crate::model::Model;
use crate::rng::{rand_normal, rand_unif, rgamma, RngPool};

/// Per-`(k, view)` hyperparameters and the thread-local accumulators spec
/// §4.9 calls out, folded at the end of each sweep.
pub struct SpikeAndSlabState {
    k: usize,
    nview: usize,
    /// `Zkeep[k, v]`: the thread-combined inclusion counter from the
    /// *previous* sweep. Gates whether latent `k` in view `v` may still be
    /// switched on (spec §9's "hard gate" open question: once `Zkeep[k,v]`
    /// hits zero, latent `k` in view `v` can never be resurrected).
    pub zkeep: Array2<f64>,
    /// `W2col[k, v]`: the thread-combined sum of squared included draws.
    pub w2col: Array2<f64>,
    pub alpha: Array2<f64>,
    pub r: Array2<f64>,
    log_alpha: Array2<f64>,
    log_r: Array2<f64>,
    prior_beta: f64,
    prior_alpha0: f64,
    prior_beta0: f64,
    /// Per-worker accumulators for this sweep's `Zcol`/`W2col`, combined
    /// into `zkeep`/`w2col` by `update_prior`.
    worker_zcol: Vec<Mutex<Array2<f64>>>,
    worker_w2col: Vec<Mutex<Array2<f64>>>,
}

impl SpikeAndSlabState {
    pub fn new(k: usize, nview: usize, dim: usize, nworkers: usize) -> Self {
        let nworkers = nworkers.max(1);
        let mut state = SpikeAndSlabState {
            k,
            nview,
            zkeep: Array2::from_elem((k, nview), dim as f64),
            w2col: Array2::zeros((k, nview)),
            alpha: Array2::ones((k, nview)),
            r: Array2::from_elem((k, nview), 0.5),
            log_alpha: Array2::zeros((k, nview)),
            log_r: Array2::zeros((k, nview)),
            prior_beta: 1.0,
            prior_alpha0: 1.0,
            prior_beta0: 1.0,
            worker_zcol: (0..nworkers).map(|_| Mutex::new(Array2::zeros((k, nview)))).collect(),
            worker_w2col: (0..nworkers).map(|_| Mutex::new(Array2::zeros((k, nview)))).collect(),
        };
        state.refresh_log_cache();
        state
    }

    fn refresh_log_cache(&mut self) {
        self.log_alpha = self.alpha.mapv(f64::ln);
        self.log_r = self.r.mapv(|v| -v.ln() + (1.0 - v).ln());
    }

    /// Resample every column of mode `m`'s factor matrix (spec §4.7's
    /// per-`k` gated draw, replacing §4.4 step 3). `lambda`/`mu` are the
    /// shared `NormalState`'s precision/mean (the Gauss-Seidel base prior),
    /// `uhat` the optional Macau offset (macauone).
    pub fn sample_latents(
        &self,
        model: &mut Model,
        data: &dyn Data,
        m: usize,
        pool: &RngPool,
        lambda: &Array2<f64>,
        mu: &Array1<f64>,
        uhat: Option<&Array2<f64>>,
    ) -> Result<()> {
        for acc in &self.worker_zcol {
            acc.lock().fill(0.0);
        }
        for acc in &self.worker_w2col {
            acc.lock().fill(0.0);
        }

        let mut col_mat = model.take_mode(m);
        let nworkers = pool.nworkers();

        let result = {
            let shared: &Model = &*model;
            col_mat
                .axis_iter_mut(ndarray::Axis(1))
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
                    let v = data.view(m, d);

                    let mut lambda_post = lambda + &prec;
                    let mut rhs_post = lambda.dot(&prior_mean);
                    rhs_post += &rhs;
                    for kk in 0..self.k {
                        lambda_post[[kk, kk]] += self.alpha[[kk, v]];
                    }

                    let mut x = current;
                    let mut zcol = self.worker_zcol[worker].lock();
                    let mut w2col = self.worker_w2col[worker].lock();
                    for kk in 0..self.k {
                        let lkk = lambda_post[[kk, kk]];
                        let mut s = rhs_post[kk];
                        for j in 0..self.k {
                            if j != kk {
                                s -= lambda_post[[kk, j]] * x[j];
                            }
                        }
                        let mu_k = s / lkk;
                        let lambda_k = lkk;

                        let z1 = self.log_r[[kk, v]]
                            - 0.5 * (lambda_k * mu_k * mu_k - lambda_k.ln() + self.log_alpha[[kk, v]]);
                        let z = 1.0 / (1.0 + z1.exp());
                        let p = rand_unif(rng, 0.0, 1.0);

                        if self.zkeep[[kk, v]] > 0.0 && p < z {
                            let draw = mu_k + rand_normal(rng) / lambda_k.sqrt();
                            x[kk] = draw;
                            zcol[[kk, v]] += 1.0;
                            w2col[[kk, v]] += draw * draw;
                        } else {
                            x[kk] = 0.0;
                        }
                    }
                    col.assign(&x);
                    Ok(())
                })
        };

        model.put_mode(m, col_mat);
        result
    }

    /// Fold this sweep's per-worker accumulators into `Zkeep`/`W2col`, then
    /// resample `(r, alpha)` per view (spec §4.7's `update_prior`).
    pub fn update_prior(&mut self, data: &dyn Data, m: usize, rng: &mut dyn RngCore) -> Result<()> {
        let mut zcol_total = Array2::<f64>::zeros((self.k, self.nview));
        for acc in &self.worker_zcol {
            zcol_total += &*acc.lock();
        }
        let mut w2col_total = Array2::<f64>::zeros((self.k, self.nview));
        for acc in &self.worker_w2col {
            w2col_total += &*acc.lock();
        }

        self.zkeep = zcol_total;
        self.w2col = w2col_total;

        for v in 0..self.nview {
            let d = data.view_size(m, v) as f64;
            for kk in 0..self.k {
                self.r[[kk, v]] =
                    (self.zkeep[[kk, v]] + self.prior_beta) / (d + self.prior_beta * d);
                let ww = self.w2col[[kk, v]] / 2.0 + self.prior_beta0;
                let shape = self.zkeep[[kk, v]] / 2.0 + self.prior_alpha0;
                self.alpha[[kk, v]] = rgamma(rng, shape, 1.0 / ww) + 1e-7;
            }
        }

        self.refresh_log_cache();
        Ok(())
    }

    /// `Zcount[v] = |{k : Zkeep[k,v] > 0}|`, the latent-inclusion report
    /// `status()` prints per view (spec §4.7/the original's `status`).
    pub fn status(&self) -> Vec<(usize, usize)> {
        (0..self.nview)
            .map(|v| {
                let count = (0..self.k).filter(|&k| self.zkeep[[k, v]] > 0.0).count();
                (count, self.k)
            })
            .collect()
    }

    /// Recompute `Zkeep` from a restored `U_m` (the original's
    /// `restore`: `Zkeep[k,v] += 1` for every column in view `v` whose
    /// latent `k` is nonzero).
    pub fn rebuild_zkeep_from_model(&mut self, model: &Model, m: usize, data: &dyn Data) {
        self.zkeep.fill(0.0);
        for d in 0..model.dim(m) {
            let v = data.view(m, d);
            let col = model.col(m, d);
            for kk in 0..self.k {
                if col[kk] != 0.0 {
                    self.zkeep[[kk, v]] += 1.0;
                }
            }
        }
        self.refresh_log_cache();
    }
}
