//! CLI entry point (spec §6): `smurff --train <path> [--test <path>]
//! --num-latent K --burnin B --nsamples S --prior <prior_0> <prior_1>...
//! [--side-info m=<path> ...] [--seed N] [--save-prefix PFX]
//! [--save-freq F] [--threshold T] [--threads N] [--verbose]`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result as AnyResult};
use clap::Parser;

use smurff::config::{Config, NoiseConfig, PriorKind};
use smurff::session::Session;

/// Bayesian probabilistic matrix and tensor factorization via Gibbs sampling.
#[derive(Parser, Debug)]
#[command(name = "smurff", version = smurff::VERSION, about)]
struct Cli {
    /// Training relation: MatrixMarket `.mtx`, a binary sparse/dense matrix
    /// dump, or a binary tensor dump (`.tns`).
    #[arg(long)]
    train: PathBuf,

    /// Held-out relation used for RMSE/AUC reporting.
    #[arg(long)]
    test: Option<PathBuf>,

    /// Number of latent dimensions `K`.
    #[arg(long = "num-latent")]
    num_latent: usize,

    /// Burn-in iterations, discarded from prediction averaging.
    #[arg(long)]
    burnin: u32,

    /// Sampling iterations, averaged into the prediction.
    #[arg(long)]
    nsamples: u32,

    /// One prior kind per mode, in mode order.
    #[arg(long = "prior", num_args = 1.., value_enum)]
    priors: Vec<PriorKind>,

    /// Side-information feature matrix for a Macau/MacauOne mode, given as
    /// `m=<path>` (e.g. `--side-info 0=rows.mtx`). May be repeated.
    #[arg(long = "side-info")]
    side_info: Vec<String>,

    /// Master RNG seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Checkpoint directory/prefix, e.g. `out/run` writes `out/run-*.ddm`.
    #[arg(long = "save-prefix")]
    save_prefix: Option<String>,

    /// Checkpoint every `F` sampling iterations (0 disables checkpointing).
    #[arg(long = "save-freq", default_value_t = 0)]
    save_freq: u32,

    /// Binarization cutoff for AUC reporting against a probit/binary test set.
    #[arg(long)]
    threshold: Option<f64>,

    /// Worker threads for column resampling (default: all available cores).
    #[arg(long)]
    threads: Option<usize>,

    /// Resume from `--save-prefix`'s checkpoint instead of starting fresh.
    #[arg(long)]
    resume: bool,

    /// Print per-mode prior status and model norms every iteration.
    #[arg(long)]
    verbose: bool,

    /// Fixed observation noise precision (mutually exclusive with `--adaptive-noise`/`--probit`).
    #[arg(long, default_value_t = 1.0)]
    precision: f64,

    /// Use adaptive (inferred) noise precision instead of a fixed one.
    #[arg(long = "adaptive-noise")]
    adaptive_noise: bool,

    /// Use probit (binary classification) noise instead of Gaussian noise.
    #[arg(long)]
    probit: bool,

    /// `lambda_beta` prior scale used to initialize Macau's regression precision.
    #[arg(long = "lambda-beta-init", default_value_t = 0.0)]
    lambda_beta_init: f64,
}

fn parse_side_info(raw: &[String]) -> AnyResult<HashMap<usize, PathBuf>> {
    let mut map = HashMap::with_capacity(raw.len());
    for entry in raw {
        let (mode, path) = entry
            .split_once('=')
            .with_context(|| format!("--side-info entry '{entry}' is not of the form m=<path>"))?;
        let mode: usize = mode
            .parse()
            .with_context(|| format!("--side-info mode index '{mode}' is not a number"))?;
        map.insert(mode, PathBuf::from(path));
    }
    Ok(map)
}

fn noise_config(cli: &Cli) -> NoiseConfig {
    if cli.probit {
        NoiseConfig::Probit
    } else if cli.adaptive_noise {
        NoiseConfig::Adaptive {
            alpha_0: 1.0,
            beta_0: 1.0,
            sn_max: 10.0,
        }
    } else {
        NoiseConfig::Fixed { precision: cli.precision }
    }
}

fn build_config(cli: Cli) -> AnyResult<Config> {
    let side_info = parse_side_info(&cli.side_info)?;
    Ok(Config {
        train: cli.train,
        test: cli.test,
        num_latent: cli.num_latent,
        burnin: cli.burnin,
        nsamples: cli.nsamples,
        priors: cli.priors,
        side_info,
        seed: cli.seed,
        save_prefix: cli.save_prefix,
        save_freq: cli.save_freq,
        threshold: cli.threshold,
        verbose: cli.verbose,
        noise: noise_config(&cli),
        lambda_beta_init: cli.lambda_beta_init,
        threads: cli.threads,
    })
}

fn run() -> smurff::Result<()> {
    let cli = Cli::parse();
    let resume = cli.resume;
    let config = build_config(cli).map_err(|e| smurff::SmurffError::Config(e.to_string()))?;

    let mut session = if resume {
        Session::restore(config)?
    } else {
        Session::init(config)?
    };
    session.run()?;

    println!(
        "done: {} samples, test RMSE={:.4}",
        session.iter(),
        session.predictions().rmse()
    );
    if let Some(auc) = session.predictions().auc() {
        println!("test AUC={auc:.4}");
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("smurff: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
