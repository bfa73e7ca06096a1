//! Seeded RNG and the Gaussian/Gamma/Wishart/multivariate-normal draws the
//! samplers need (spec §4.1).
//!
//! A single seedable master stream is partitioned into one substream per
//! worker at thread-pool creation (`RngPool::new`); draws within a worker
//! are deterministic once the seed and worker index are fixed. Individual
//! draw functions take `&mut impl Rng` so callers can pass either a pooled
//! substream or a scratch RNG in tests.

use crate::error::{Result, SmurffError};
use crate::linop;
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{ChiSquared, Distribution, Gamma, Normal, StandardNormal};

/// One substream per worker thread, derived deterministically from a master seed.
pub struct RngPool {
    streams: Vec<Mutex<ChaCha8Rng>>,
}

impl RngPool {
    /// Build `nworkers` independent substreams from `seed`. Substream `i` is
    /// always the same RNG state for the same `(seed, nworkers)` pair,
    /// regardless of which worker happens to claim it at runtime.
    pub fn new(seed: u64, nworkers: usize) -> Self {
        let nworkers = nworkers.max(1);
        let mut master = ChaCha8Rng::seed_from_u64(seed);
        let streams = (0..nworkers)
            .map(|_| {
                let mut seed_bytes = [0u8; 32];
                master.fill_bytes(&mut seed_bytes);
                Mutex::new(ChaCha8Rng::from_seed(seed_bytes))
            })
            .collect();
        RngPool { streams }
    }

    pub fn nworkers(&self) -> usize {
        self.streams.len()
    }

    /// Lock and return the substream for worker index `idx` (wraps modulo pool size).
    pub fn worker(&self, idx: usize) -> parking_lot::MutexGuard<'_, ChaCha8Rng> {
        self.streams[idx % self.streams.len()].lock()
    }
}

/// Draw from Uniform(a, b).
pub fn rand_unif(rng: &mut impl Rng, a: f64, b: f64) -> f64 {
    a + (b - a) * rng.gen::<f64>()
}

/// Draw a single standard normal value.
pub fn rand_normal(rng: &mut impl Rng) -> f64 {
    rng.sample(StandardNormal)
}

/// Fill `mat` with i.i.d. standard normal entries.
pub fn bmrandn(rng: &mut impl Rng, mat: &mut Array2<f64>) {
    mat.mapv_inplace(|_| rand_normal(rng));
}

/// Draw from Gamma(shape, scale) (mean = shape * scale).
pub fn rgamma(rng: &mut impl Rng, shape: f64, scale: f64) -> f64 {
    debug_assert!(shape > 0.0 && scale > 0.0);
    let g = Gamma::new(shape, scale).expect("invalid gamma parameters");
    g.sample(rng)
}

/// Draw a chi-squared(df) value (used by the Wishart Bartlett decomposition).
fn rchisq(rng: &mut impl Rng, df: f64) -> f64 {
    let c = ChiSquared::new(df).expect("invalid chi-squared df");
    c.sample(rng)
}

/// Draw `x ~ N(mu, cov)` via Cholesky of the covariance matrix.
///
/// Fails with `NumericalError` if `cov` is not SPD.
pub fn mv_normal(rng: &mut impl Rng, mu: &Array1<f64>, cov: &Array2<f64>) -> Result<Array1<f64>> {
    let k = mu.len();
    let l = linop::cholesky(cov)?;
    let mut z = Array1::<f64>::zeros(k);
    for v in z.iter_mut() {
        *v = rand_normal(rng);
    }
    let lz = l.dot(&z);
    Ok(mu + &lz)
}

/// Draw `x ~ N(mu, Lambda^-1)` given a *precision* matrix, via Cholesky of
/// `Lambda` itself (solves `L^T x = z` instead of multiplying by `L`).
pub fn mv_normal_by_precision(
    rng: &mut impl Rng,
    mu: &Array1<f64>,
    lambda: &Array2<f64>,
) -> Result<Array1<f64>> {
    let k = mu.len();
    let l = linop::cholesky(lambda)?;
    let mut z = Array1::<f64>::zeros(k);
    for v in z.iter_mut() {
        *v = rand_normal(rng);
    }
    // Solve L^T y = z, so that y has covariance (L L^T)^-1 = Lambda^-1
    let y = linop::solve_upper_triangular_transpose(&l, &z)?;
    Ok(mu + &y)
}

/// Draw `Lambda ~ Wishart(W, nu)`, a `k x k` SPD matrix, via the Bartlett
/// decomposition: `Lambda = L A A^T L^T` where `L` is the Cholesky factor of
/// `W` and `A` is lower-triangular with chi-squared diagonal and standard
/// normal strictly-lower entries.
pub fn wishart(rng: &mut impl Rng, w: &Array2<f64>, nu: f64) -> Result<Array2<f64>> {
    let k = w.nrows();
    if w.ncols() != k {
        return Err(SmurffError::Assertion(
            "Wishart scale matrix must be square".into(),
        ));
    }
    let l = linop::cholesky(w)?;
    let mut a = Array2::<f64>::zeros((k, k));
    for i in 0..k {
        let df = nu - i as f64;
        if df <= 0.0 {
            return Err(SmurffError::Numerical(
                "Wishart degrees of freedom too small for requested dimension".into(),
            ));
        }
        a[[i, i]] = rchisq(rng, df).sqrt();
        for j in 0..i {
            a[[i, j]] = rand_normal(rng);
        }
    }
    let la = l.dot(&a);
    Ok(la.dot(&la.t()))
}
