//! Probit noise (spec §4.3's Albert-Chib augmentation) recovers a binary
//! low-rank signal: a matrix binarized from a noisy rank-`K` score surface,
//! factorized with Normal priors and `NoiseModel::Probit`, should separate
//! positives from negatives with a high AUC when scored (in-sample) through
//! `PredictionAggregator`.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use smurff::data::{dense, NoiseModel};
use smurff::model::{InitKind, Model};
use smurff::prediction::PredictionAggregator;
use smurff::prior::NormalState;
use smurff::rng::RngPool;

#[test]
fn probit_noise_recovers_separable_binary_signal() {
    let mut gen_rng = ChaCha8Rng::seed_from_u64(777);
    let k = 4;
    let (d0, d1) = (30, 30);

    let mut u_true = Array2::<f64>::zeros((k, d0));
    let mut v_true = Array2::<f64>::zeros((k, d1));
    for val in u_true.iter_mut() {
        *val = gen_rng.gen::<f64>() * 2.0 - 1.0;
    }
    for val in v_true.iter_mut() {
        *val = gen_rng.gen::<f64>() * 2.0 - 1.0;
    }
    let mut raw = u_true.t().dot(&v_true);
    for val in raw.iter_mut() {
        *val += gen_rng.gen::<f64>() * 0.4 - 0.2;
    }
    let binarized = raw.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });

    let data = dense::from_dense(&binarized, NoiseModel::probit());
    let mut model = Model::init(k, vec![d0, d1], InitKind::Random, &mut gen_rng);

    let mut normal0 = NormalState::new(k, false);
    let mut normal1 = NormalState::new(k, false);
    let pool = RngPool::new(5, 4);
    let mut rng = ChaCha8Rng::seed_from_u64(888);

    let burnin = 100;
    let nsamples = 200;
    let mut agg = PredictionAggregator::new(data.entries(), Some(0.5));

    for iter in 0..(burnin + nsamples) {
        normal0.sample_latents(&mut model, &data, 0, &pool, None).unwrap();
        normal0.update_prior(&model, 0, None, &mut rng).unwrap();

        normal1.sample_latents(&mut model, &data, 1, &pool, None).unwrap();
        normal1.update_prior(&model, 1, None, &mut rng).unwrap();

        if iter >= burnin {
            agg.update(&model);
        }
    }

    let auc = agg.auc().expect("binarized labels should not be degenerate");
    assert!(auc >= 0.85, "expected AUC >= 0.85, got {auc}");
}
