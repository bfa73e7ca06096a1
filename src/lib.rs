//! smurff — Bayesian probabilistic matrix and tensor factorization via
//! Gibbs sampling.
//!
//! A sparse or dense relation (spec's `[Data]`) is factorized into one
//! low-rank factor matrix per mode, drawn from their Normal-Wishart (or
//! Macau side-information, or SpikeAndSlab sparse) conditional posteriors
//! in turn. `Session` owns the loop: burn-in, sampling, prediction
//! aggregation, and checkpointing.
//!
//! ```no_run
//! use smurff::config::{Config, NoiseConfig, PriorKind};
//! use smurff::session::Session;
//! use std::collections::HashMap;
//! use std::path::PathBuf;
//!
//! let config = Config {
//!     train: PathBuf::from("train.mtx"),
//!     test: None,
//!     num_latent: 10,
//!     burnin: 50,
//!     nsamples: 200,
//!     priors: vec![PriorKind::Normal, PriorKind::Normal],
//!     side_info: HashMap::new(),
//!     seed: 0,
//!     save_prefix: None,
//!     save_freq: 0,
//!     threshold: None,
//!     verbose: false,
//!     noise: NoiseConfig::default(),
//!     lambda_beta_init: 0.0,
//!     threads: None,
//! };
//! let mut session = Session::init(config).unwrap();
//! session.run().unwrap();
//! println!("test RMSE = {}", session.predictions().rmse());
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod linop;
pub mod model;
pub mod prediction;
pub mod prior;
pub mod rng;
pub mod session;

pub use config::{Config, NoiseConfig, PriorKind};
pub use error::{Result, SmurffError};
pub use model::Model;
pub use prediction::PredictionAggregator;
pub use prior::Prior;
pub use session::Session;

/// Crate version, for `--version` and the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
