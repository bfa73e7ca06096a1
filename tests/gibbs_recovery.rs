//! End-to-end Gibbs sampling recovery: a rank-`K` matrix corrupted by
//! small Gaussian noise should be recovered by alternating Normal-prior
//! sampling on both modes, with the averaged-sample train RMSE landing well
//! below the noise's own standard deviation.
//!
//! This drives the Gibbs loop directly (`NormalState::sample_latents` /
//! `update_prior`) rather than through `Session`, since `Session` only
//! tracks RMSE against held-out test cells and this test wants to check the
//! fit against the (fully-observed) training data itself.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use smurff::data::{dense, NoiseModel};
use smurff::model::{InitKind, Model};
use smurff::prior::NormalState;
use smurff::rng::RngPool;

fn low_rank_matrix(rng: &mut impl Rng, k: usize, d0: usize, d1: usize, noise_sd: f64) -> Array2<f64> {
    let mut u = Array2::<f64>::zeros((k, d0));
    let mut v = Array2::<f64>::zeros((k, d1));
    for val in u.iter_mut() {
        *val = rng.gen::<f64>() * 2.0 - 1.0;
    }
    for val in v.iter_mut() {
        *val = rng.gen::<f64>() * 2.0 - 1.0;
    }
    let mut mat = u.t().dot(&v);
    for val in mat.iter_mut() {
        *val += rng.gen::<f64>() * 2.0 * noise_sd - noise_sd;
    }
    mat
}

#[test]
fn normal_priors_recover_a_low_rank_matrix() {
    let mut gen_rng = ChaCha8Rng::seed_from_u64(42);
    let k = 4;
    let (d0, d1) = (48, 48);
    let noise_sd = 0.05;
    let mat = low_rank_matrix(&mut gen_rng, k, d0, d1, noise_sd);

    let data = dense::from_dense(&mat, NoiseModel::fixed(25.0));
    let mut model = Model::init(k, vec![d0, d1], InitKind::Random, &mut gen_rng);

    let mut state0 = NormalState::new(k, false);
    let mut state1 = NormalState::new(k, false);
    let pool = RngPool::new(7, 4);
    let mut update_rng = ChaCha8Rng::seed_from_u64(99);

    let burnin = 80;
    let nsamples = 150;
    let mut accum = Array2::<f64>::zeros((d0, d1));
    let mut n_collected = 0u32;

    for iter in 0..(burnin + nsamples) {
        state0.sample_latents(&mut model, &data, 0, &pool, None).unwrap();
        state0.update_prior(&model, 0, None, &mut update_rng).unwrap();

        state1.sample_latents(&mut model, &data, 1, &pool, None).unwrap();
        state1.update_prior(&model, 1, None, &mut update_rng).unwrap();

        if iter >= burnin {
            let u0 = model.u(0).to_owned();
            let u1 = model.u(1).to_owned();
            let pred = u0.t().dot(&u1);
            accum += &pred;
            n_collected += 1;
        }
    }

    let avg_pred = accum / n_collected as f64;
    let mut sse = 0.0;
    for i in 0..d0 {
        for j in 0..d1 {
            sse += (avg_pred[[i, j]] - mat[[i, j]]).powi(2);
        }
    }
    let rmse = (sse / (d0 * d1) as f64).sqrt();
    assert!(rmse < 0.15, "train RMSE {rmse} too high for a recovered rank-{k} matrix");
}
