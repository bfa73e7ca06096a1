//! The `Session` loop: burn-in, sampling, prediction aggregation, status
//! reporting, checkpointing, and SIGINT handling (spec §4.8, §4.9, §5).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Config, NoiseConfig, PriorKind};
use crate::data::{Data, Entry, NoiseModel, TensorData};
use crate::error::{Result, SmurffError};
use crate::io::{binary, checkpoint::CheckpointManager, matrixmarket};
use crate::linop::sideinfo::{DenseSideInfo, SideInfo, SparseSideInfo};
use crate::model::{InitKind, Model};
use crate::prediction::PredictionAggregator;
use crate::prior::{MacauState, NormalState, Prior, SpikeAndSlabState};
use crate::rng::RngPool;

/// Read a training or test relation from `path`, dispatching on extension:
/// `.mtx` is MatrixMarket coordinate, `.tns` is the binary tensor dump
/// (spec §6), anything else is sniffed as a binary sparse or dense matrix.
/// Out of scope per spec §1 ("matrix file I/O" is an external collaborator)
/// is the *parsing itself*, which `io::matrixmarket`/`io::binary` already
/// supply — this just picks the right one.
fn load_relation(path: &Path) -> Result<(Vec<usize>, Vec<Entry>)> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "mtx" => {
            let (nrow, ncol, triplets) = matrixmarket::read_matrixmarket(path)?;
            let entries = triplets
                .into_iter()
                .map(|(r, c, v)| Entry { idx: vec![r, c], val: v })
                .collect();
            Ok((vec![nrow, ncol], entries))
        }
        "tns" => binary::read_tensor(path),
        _ => {
            if binary::sniff_is_sparse(path)? {
                let (nrow, ncol, triplets) = binary::read_sparse_matrix(path)?;
                let entries = triplets
                    .into_iter()
                    .map(|(r, c, v)| Entry { idx: vec![r, c], val: v })
                    .collect();
                Ok((vec![nrow, ncol], entries))
            } else {
                let mat = binary::read_dense_ddm(path)?;
                let (nrow, ncol) = mat.dim();
                let mut entries = Vec::with_capacity(nrow * ncol);
                for i in 0..nrow {
                    for j in 0..ncol {
                        entries.push(Entry { idx: vec![i as u32, j as u32], val: mat[[i, j]] });
                    }
                }
                Ok((vec![nrow, ncol], entries))
            }
        }
    }
}

/// Load a side-information feature matrix for `MacauPrior`/`MacauOnePrior`,
/// picking dense or sparse storage the same way `load_relation` picks a
/// relation format.
fn load_side_info(path: &Path) -> Result<Box<dyn SideInfo>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "mtx" => {
            let (nrow, ncol, triplets) = matrixmarket::read_matrixmarket(path)?;
            let triplets: Vec<(usize, usize, f64)> = triplets
                .into_iter()
                .map(|(r, c, v)| (r as usize, c as usize, v))
                .collect();
            Ok(Box::new(SparseSideInfo::from_triplets(nrow, ncol, &triplets)))
        }
        _ => {
            if binary::sniff_is_sparse(path)? {
                let (nrow, ncol, triplets) = binary::read_sparse_matrix(path)?;
                let triplets: Vec<(usize, usize, f64)> = triplets
                    .into_iter()
                    .map(|(r, c, v)| (r as usize, c as usize, v))
                    .collect();
                Ok(Box::new(SparseSideInfo::from_triplets(nrow, ncol, &triplets)))
            } else {
                Ok(Box::new(DenseSideInfo::new(binary::read_dense_ddm(path)?)))
            }
        }
    }
}

fn noise_model(cfg: &NoiseConfig, lambda_init: f64) -> NoiseModel {
    match cfg {
        NoiseConfig::Fixed { precision } => NoiseModel::fixed(*precision),
        NoiseConfig::Adaptive { alpha_0, beta_0, sn_max } => {
            NoiseModel::adaptive(*alpha_0, *beta_0, *sn_max, lambda_init.max(1.0))
        }
        NoiseConfig::Probit => NoiseModel::probit(),
    }
}

fn build_prior(kind: PriorKind, k: usize, m: usize, dim: usize, nworkers: usize, config: &Config) -> Result<Prior> {
    match kind {
        PriorKind::Normal => Ok(Prior::Normal(NormalState::new(k, false))),
        PriorKind::NormalOne => Ok(Prior::Normal(NormalState::new(k, true))),
        PriorKind::Macau | PriorKind::MacauOne => {
            let path = config.side_info.get(&m).ok_or_else(|| {
                SmurffError::Config(format!("missing --side-info for mode {m}"))
            })?;
            let f = load_side_info(path)?;
            let univariate = kind == PriorKind::MacauOne;
            let mut macau = MacauState::new(f, k);
            macau.lambda_beta = if config.lambda_beta_init > 0.0 {
                config.lambda_beta_init
            } else {
                1.0
            };
            Ok(Prior::Macau(NormalState::new(k, univariate), macau))
        }
        PriorKind::SpikeAndSlab => Ok(Prior::SpikeAndSlab(
            NormalState::new(k, true),
            SpikeAndSlabState::new(k, 1, dim, nworkers),
        )),
    }
}

/// Orchestrates the whole run: owns the `Model`, holds the training `Data`
/// and every mode's `Prior`, drives burn-in and sampling, and checkpoints.
/// Single-ownership per design note §9: priors and data only ever see a
/// borrow of `model`, scoped to one sweep.
pub struct Session {
    config: Config,
    model: Model,
    data: TensorData,
    priors: Vec<Prior>,
    predictions: PredictionAggregator,
    pool: RngPool,
    driver_rng: ChaCha8Rng,
    checkpoint: Option<CheckpointManager>,
    iter: i64,
    interrupted: Arc<AtomicBool>,
    rayon_pool: rayon::ThreadPool,
}

impl Session {
    /// Build `Model`, `Data`, and every mode's `Prior` from `config` (spec
    /// §4.8's `init()`), and allocate the prediction aggregator.
    pub fn init(config: Config) -> Result<Self> {
        let (dims, entries) = load_relation(&config.train)?;
        let nmodes = dims.len();
        config.validate(nmodes)?;

        let noise = noise_model(&config.noise, config.lambda_beta_init);
        let data = TensorData::new(dims.clone(), entries, noise);

        let test_entries = match &config.test {
            Some(path) => load_relation(path)?.1,
            None => Vec::new(),
        };

        let nworkers = config.threads.unwrap_or_else(rayon::current_num_threads).max(1);
        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nworkers)
            .build()
            .map_err(|e| SmurffError::Config(format!("failed to build thread pool: {e}")))?;
        let pool = RngPool::new(config.seed, nworkers);
        let mut init_rng = ChaCha8Rng::seed_from_u64(config.seed);
        let model = Model::init(config.num_latent, dims.clone(), InitKind::Random, &mut init_rng);

        let mut priors = Vec::with_capacity(nmodes);
        for (m, &kind) in config.priors.iter().enumerate() {
            priors.push(build_prior(kind, config.num_latent, m, dims[m], nworkers, &config)?);
        }

        let predictions = PredictionAggregator::new(&test_entries, config.threshold);

        let checkpoint = config.save_prefix.as_ref().map(|prefix| {
            let path = PathBuf::from(prefix);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "smurff".to_string());
            CheckpointManager::new(dir, file_prefix)
        });
        if let Some(ckpt) = &checkpoint {
            ckpt.save_options(&config)?;
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let flag = interrupted.clone();
            let _ = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst));
        }

        println!(
            "smurff: {} modes, K={}, {} observations, using up to {} threads",
            nmodes,
            config.num_latent,
            data.nnz(),
            nworkers
        );

        Ok(Session {
            iter: -(config.burnin as i64),
            config,
            model,
            data,
            priors,
            predictions,
            pool,
            driver_rng: ChaCha8Rng::seed_from_u64(0x5eed),
            checkpoint,
            interrupted,
            rayon_pool,
        })
    }

    /// Resume a previous run from its checkpoint directory/prefix: restores
    /// `Model`, every `Prior`, and the seed, then continues from the next
    /// unsampled iteration (spec §6's "persisted state must round-trip").
    pub fn restore(config: Config) -> Result<Self> {
        let mut session = Session::init(config)?;
        let ckpt = session
            .checkpoint
            .as_ref()
            .ok_or_else(|| SmurffError::Config("restore requires --save-prefix".into()))?;
        let index = ckpt.read_root_index()?;
        let last_iter = index
            .samples
            .iter()
            .copied()
            .max()
            .ok_or_else(|| SmurffError::Config("checkpoint has no saved samples".into()))?;

        session.model = Model::restore(
            ckpt.dir(),
            ckpt.prefix(),
            last_iter,
            session.config.num_latent,
            (0..session.data.nmodes()).map(|m| session.data.dim(m)).collect(),
        )?;
        for (m, prior) in session.priors.iter_mut().enumerate() {
            prior.restore(ckpt.dir(), ckpt.prefix(), last_iter, m, &session.model, &session.data)?;
        }
        session.pool = RngPool::new(index.seed, session.pool.nworkers());
        session.iter = last_iter + 1;
        Ok(session)
    }

    /// Run every remaining iteration through `nsamples` (spec §4.8's main loop).
    pub fn run(&mut self) -> Result<()> {
        while self.iter < self.config.nsamples as i64 {
            self.step()?;
        }
        Ok(())
    }

    /// One Gibbs iteration: resample every mode's factors and hyperparameters
    /// in ascending mode order, update predictions once past burn-in,
    /// checkpoint if due, then print status.
    pub fn step(&mut self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            if let Some(ckpt) = &self.checkpoint {
                ckpt.save_sample(self.iter, self.config.seed, &self.model, &self.priors)?;
            }
            return Err(SmurffError::Interrupted);
        }

        let t0 = Instant::now();

        let priors = &mut self.priors;
        let model = &mut self.model;
        let data = &self.data;
        let pool = &self.pool;
        let driver_rng = &mut self.driver_rng;
        self.rayon_pool.install(|| -> Result<()> {
            for (m, prior) in priors.iter_mut().enumerate() {
                prior.sample_latents(model, data, m, pool)?;
                prior.update_prior(model, data, m, driver_rng)?;
            }
            Ok(())
        })?;
        self.data.update_noise(&self.model, &mut self.driver_rng);

        if self.iter >= 0 {
            self.predictions.update(&self.model);
        }

        if self.checkpoint_due() {
            if let Some(ckpt) = &self.checkpoint {
                ckpt.save_sample(self.iter, self.config.seed, &self.model, &self.priors)?;
            }
        }

        self.print_status(t0.elapsed());
        self.iter += 1;
        Ok(())
    }

    fn checkpoint_due(&self) -> bool {
        self.checkpoint.is_some() && self.config.save_freq > 0 && self.iter >= 0 && (self.iter as u32) % self.config.save_freq == 0
    }

    /// Plain `println!` status line, matching spec §4.8's `printStatus`
    /// pseudocode: iteration, elapsed time, train/test RMSE. `--verbose`
    /// additionally prints every prior's own status line.
    fn print_status(&self, elapsed: std::time::Duration) {
        let phase = if self.iter < 0 { "burnin" } else { "sample" };
        println!(
            "{phase} {:4} | {:6.3}s | test RMSE={:.4}",
            self.iter,
            elapsed.as_secs_f64(),
            self.predictions.rmse(),
        );
        if self.config.verbose {
            for (m, prior) in self.priors.iter().enumerate() {
                println!("  mode {m}: {}", prior.status());
            }
            println!("  model: {:?}", self.model.status());
        }
    }

    pub fn predictions(&self) -> &PredictionAggregator {
        &self.predictions
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn iter(&self) -> i64 {
        self.iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseConfig;
    use ndarray::Array2;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn write_dense_train(dir: &Path, name: &str, mat: &Array2<f64>) -> PathBuf {
        let path = dir.join(name);
        binary::write_dense_ddm(&path, mat).unwrap();
        path
    }

    fn base_config(train: PathBuf) -> Config {
        Config {
            train,
            test: None,
            num_latent: 2,
            burnin: 2,
            nsamples: 4,
            priors: vec![PriorKind::Normal, PriorKind::Normal],
            side_info: HashMap::new(),
            seed: 1,
            save_prefix: None,
            save_freq: 0,
            threshold: None,
            verbose: false,
            noise: NoiseConfig::Fixed { precision: 2.0 },
            lambda_beta_init: 0.0,
            threads: None,
        }
    }

    #[test]
    fn full_run_completes_and_reaches_target_iteration() {
        let dir = tempdir().unwrap();
        let mat = Array2::<f64>::eye(6);
        let train = write_dense_train(dir.path(), "train.ddm", &mat);
        let config = base_config(train);
        let mut session = Session::init(config).unwrap();
        session.run().unwrap();
        assert_eq!(session.iter(), 4);
    }

    #[test]
    fn checkpoint_then_restore_continues_from_next_iteration() {
        let dir = tempdir().unwrap();
        let mat = Array2::<f64>::eye(6);
        let train = write_dense_train(dir.path(), "train.ddm", &mat);
        let mut config = base_config(train);
        config.nsamples = 2;
        config.save_freq = 1;
        config.save_prefix = Some(dir.path().join("ckpt").to_string_lossy().into_owned());

        let mut session = Session::init(config.clone()).unwrap();
        session.run().unwrap();

        let mut config2 = config;
        config2.nsamples = 4;
        let mut resumed = Session::restore(config2).unwrap();
        assert_eq!(resumed.iter(), 2);
        resumed.run().unwrap();
        assert_eq!(resumed.iter(), 4);
    }
}
