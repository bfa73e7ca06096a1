//! Noise models: fixed-precision Gaussian, adaptive (Gamma-resampled precision),
//! and probit (latent Gaussian augmentation for 0/1 targets) — spec §4.3.

use parking_lot::Mutex;
use rand::RngCore;

use crate::rng::rgamma;

/// `0.5 * (1 + erf(x / sqrt(2)))`, the standard normal CDF.
fn std_normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 rational approximation, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let poly = ((((a5 * t + a4) * t + a3) * t + a2) * t + a1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Winitzki's approximation to the inverse error function, refined with one
/// step of Newton's method against `erf` for extra precision.
fn erfinv(x: f64) -> f64 {
    let a = 0.147_f64;
    let ln1mx2 = (1.0 - x * x).ln();
    let term1 = 2.0 / (std::f64::consts::PI * a) + ln1mx2 / 2.0;
    let mut y = (term1 * term1 - ln1mx2 / a).sqrt() - term1;
    y = y.sqrt() * x.signum();
    // Newton refinement: f(y) = erf(y) - x, f'(y) = 2/sqrt(pi) * exp(-y^2)
    let fy = erf(y) - x;
    let dfy = 2.0 / std::f64::consts::PI.sqrt() * (-y * y).exp();
    if dfy.abs() > 1e-300 {
        y -= fy / dfy;
    }
    y
}

/// Draw a unit-variance normal truncated to `(0, inf)` if `positive` else
/// `(-inf, 0)`, centered at `mean`, via inverse-CDF sampling.
fn truncated_normal(rng: &mut dyn RngCore, mean: f64, positive: bool) -> f64 {
    let phi_neg_mean = std_normal_cdf(-mean);
    let u: f64 = {
        let raw = (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64);
        raw.clamp(1e-12, 1.0 - 1e-12)
    };
    let p = if positive {
        phi_neg_mean + u * (1.0 - phi_neg_mean)
    } else {
        u * phi_neg_mean
    };
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    mean + std::f64::consts::SQRT_2 * erfinv(2.0 * p - 1.0)
}

pub enum NoiseModel {
    /// Known, fixed precision `alpha`.
    Fixed { precision: f64 },
    /// Precision resampled each iteration from a Gamma posterior given the
    /// current residual sum of squares.
    Adaptive {
        precision: Mutex<f64>,
        alpha_0: f64,
        beta_0: f64,
        sn_max: f64,
    },
    /// Binary targets via Albert-Chib latent Gaussian augmentation.
    Probit,
}

impl NoiseModel {
    pub fn fixed(precision: f64) -> Self {
        NoiseModel::Fixed { precision }
    }

    pub fn adaptive(alpha_0: f64, beta_0: f64, sn_max: f64, init_precision: f64) -> Self {
        NoiseModel::Adaptive {
            precision: Mutex::new(init_precision),
            alpha_0,
            beta_0,
            sn_max,
        }
    }

    pub fn probit() -> Self {
        NoiseModel::Probit
    }

    /// Current precision used to weight `rhs`/`prec` contributions.
    pub fn precision(&self) -> f64 {
        match self {
            NoiseModel::Fixed { precision } => *precision,
            NoiseModel::Adaptive { precision, .. } => *precision.lock(),
            NoiseModel::Probit => 1.0,
        }
    }

    /// The target value `get_pnm` should use for an observed cell: the raw
    /// value for fixed/adaptive noise, or a freshly-drawn truncated-normal
    /// latent conditional on `eta` (the current prediction at that cell,
    /// excluding the column being resampled) for probit noise.
    pub fn target(&self, observed: f64, eta: f64, rng: &mut dyn RngCore) -> f64 {
        match self {
            NoiseModel::Probit => truncated_normal(rng, eta, observed > 0.5),
            _ => observed,
        }
    }

    /// Resample `precision` for `Adaptive` noise from its Gamma posterior
    /// given the full residual sum of squares over `n` observed cells.
    /// No-op for `Fixed`/`Probit`.
    pub fn resample(&self, sse: f64, n: usize, rng: &mut dyn RngCore) {
        if let NoiseModel::Adaptive {
            precision,
            alpha_0,
            beta_0,
            sn_max,
        } = self
        {
            let shape = alpha_0 + n as f64 / 2.0;
            let scale = 1.0 / (beta_0 + sse / 2.0);
            let draw = rgamma(rng, shape, scale).min(*sn_max);
            *precision.lock() = draw;
        }
    }
}
