//! Run configuration: the canonical, serializable settings a `Session` is
//! built from, echoed verbatim into `PFX-options.ini` on every checkpoint
//! (spec §6). Mirrors the teacher's config pattern: a plain serde struct
//! plus a small validation pass raising `ConfigError`-style errors.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SmurffError};

/// Which conditional-update rule a mode's prior uses (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum PriorKind {
    Normal,
    Macau,
    MacauOne,
    SpikeAndSlab,
    NormalOne,
}

impl PriorKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(PriorKind::Normal),
            "macau" => Ok(PriorKind::Macau),
            "macauone" => Ok(PriorKind::MacauOne),
            "spikeandslab" => Ok(PriorKind::SpikeAndSlab),
            "normalone" => Ok(PriorKind::NormalOne),
            other => Err(SmurffError::Config(format!(
                "unknown prior kind '{other}' (expected one of: normal, macau, macauone, spikeandslab, normalone)"
            ))),
        }
    }

    pub fn uses_side_info(&self) -> bool {
        matches!(self, PriorKind::Macau | PriorKind::MacauOne)
    }
}

impl std::fmt::Display for PriorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriorKind::Normal => "normal",
            PriorKind::Macau => "macau",
            PriorKind::MacauOne => "macauone",
            PriorKind::SpikeAndSlab => "spikeandslab",
            PriorKind::NormalOne => "normalone",
        };
        write!(f, "{s}")
    }
}

/// Noise-model configuration (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NoiseConfig {
    Fixed {
        precision: f64,
    },
    Adaptive {
        #[serde(default = "default_alpha0")]
        alpha_0: f64,
        #[serde(default = "default_beta0")]
        beta_0: f64,
        #[serde(default = "default_sn_max")]
        sn_max: f64,
    },
    Probit,
}

fn default_alpha0() -> f64 {
    1.0
}
fn default_beta0() -> f64 {
    1.0
}
fn default_sn_max() -> f64 {
    10.0
}

impl Default for NoiseConfig {
    fn default() -> Self {
        NoiseConfig::Fixed { precision: 1.0 }
    }
}

/// The full run configuration (spec §6's CLI flags, made serializable for
/// the checkpoint's `options.ini` echo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub train: PathBuf,
    #[serde(default)]
    pub test: Option<PathBuf>,
    pub num_latent: usize,
    pub burnin: u32,
    pub nsamples: u32,
    pub priors: Vec<PriorKind>,
    #[serde(default)]
    pub side_info: HashMap<usize, PathBuf>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub save_prefix: Option<String>,
    #[serde(default = "default_save_freq")]
    pub save_freq: u32,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub lambda_beta_init: f64,
    /// Worker count for the column-resampling thread pool (spec's §5
    /// concurrency model). `None` defers to `rayon::current_num_threads()`.
    #[serde(default)]
    pub threads: Option<usize>,
}

fn default_seed() -> u64 {
    0
}
fn default_save_freq() -> u32 {
    0
}

impl Config {
    /// Check cross-field invariants a CLI parser alone can't express.
    pub fn validate(&self, nmodes: usize) -> Result<()> {
        if self.num_latent == 0 {
            return Err(SmurffError::Config("--num-latent must be >= 1".into()));
        }
        if self.priors.len() != nmodes {
            return Err(SmurffError::Config(format!(
                "expected {} --prior entries (one per mode), got {}",
                nmodes,
                self.priors.len()
            )));
        }
        for m in self.side_info.keys() {
            if *m >= nmodes {
                return Err(SmurffError::Config(format!(
                    "--side-info references mode {m}, but the train relation only has {nmodes} modes"
                )));
            }
            if !self.priors[*m].uses_side_info() {
                return Err(SmurffError::Config(format!(
                    "--side-info given for mode {m}, but its prior ({}) does not use side information",
                    self.priors[*m]
                )));
            }
        }
        for (m, kind) in self.priors.iter().enumerate() {
            if kind.uses_side_info() && !self.side_info.contains_key(&m) {
                return Err(SmurffError::Config(format!(
                    "prior '{kind}' on mode {m} requires --side-info m={m}=<path>"
                )));
            }
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() {
                return Err(SmurffError::Config("--threshold must be finite".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            train: PathBuf::from("train.mtx"),
            test: None,
            num_latent: 4,
            burnin: 10,
            nsamples: 20,
            priors: vec![PriorKind::Normal, PriorKind::Normal],
            side_info: HashMap::new(),
            seed: 1,
            save_prefix: None,
            save_freq: 0,
            threshold: None,
            verbose: false,
            noise: NoiseConfig::default(),
            lambda_beta_init: 0.0,
            threads: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate(2).is_ok());
    }

    #[test]
    fn prior_count_mismatch_rejected() {
        let mut c = base_config();
        c.priors.pop();
        assert!(c.validate(2).is_err());
    }

    #[test]
    fn macau_without_side_info_rejected() {
        let mut c = base_config();
        c.priors[0] = PriorKind::Macau;
        assert!(c.validate(2).is_err());
    }

    #[test]
    fn side_info_on_non_macau_mode_rejected() {
        let mut c = base_config();
        c.side_info.insert(1, PathBuf::from("side.mtx"));
        assert!(c.validate(2).is_err());
    }

    #[test]
    fn prior_kind_parses_known_strings() {
        assert_eq!(PriorKind::parse("macau").unwrap(), PriorKind::Macau);
        assert!(PriorKind::parse("bogus").is_err());
    }
}
