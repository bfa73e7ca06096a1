//! Checkpoint directory layout (spec §6):
//!
//! - `PFX-options.ini` — canonical config echo (TOML content; `.ini` is the
//!   original's extension, kept for compatibility even though the content
//!   is written with `toml`, a superset of the subset of INI the original
//!   actually used).
//! - `PFX-sample-<iter>-U<m>-latents.ddm` — factor matrices (`Model::save`).
//! - `PFX-sample-<iter>-prior<m>-*.ddm` — prior-specific state (`Prior::save`).
//! - `PFX-root.ini` — index of sample steps, atomically rewritten on every save.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, SmurffError};
use crate::model::Model;
use crate::prior::Prior;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootIndex {
    pub seed: u64,
    pub samples: Vec<i64>,
}

pub struct CheckpointManager {
    dir: PathBuf,
    prefix: String,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        CheckpointManager {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    fn root_path(&self) -> PathBuf {
        self.dir.join(format!("{}-root.ini", self.prefix))
    }

    fn options_path(&self) -> PathBuf {
        self.dir.join(format!("{}-options.ini", self.prefix))
    }

    pub fn save_options(&self, config: &Config) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| SmurffError::io(&self.dir, e))?;
        let path = self.options_path();
        let content = toml::to_string_pretty(config)
            .map_err(|e| SmurffError::format(&path, e.to_string()))?;
        fs::write(&path, content).map_err(|e| SmurffError::io(&path, e))
    }

    /// Save one full sample: the model's factor matrices, every prior's
    /// state, then atomically rewrite the root index.
    pub fn save_sample(&self, iter: i64, seed: u64, model: &Model, priors: &[Prior]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| SmurffError::io(&self.dir, e))?;
        model.save(&self.dir, &self.prefix, iter)?;
        for (m, p) in priors.iter().enumerate() {
            p.save(&self.dir, &self.prefix, iter, m)?;
        }
        self.append_root_index(iter, seed)
    }

    fn append_root_index(&self, iter: i64, seed: u64) -> Result<()> {
        let mut index = self.read_root_index().unwrap_or_default();
        index.seed = seed;
        if !index.samples.contains(&iter) {
            index.samples.push(iter);
        }
        let path = self.root_path();
        let tmp = self.dir.join(format!("{}-root.ini.tmp", self.prefix));
        let content =
            toml::to_string_pretty(&index).map_err(|e| SmurffError::format(&path, e.to_string()))?;
        fs::write(&tmp, content).map_err(|e| SmurffError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| SmurffError::io(&path, e))
    }

    pub fn read_root_index(&self) -> Result<RootIndex> {
        let path = self.root_path();
        let content = fs::read_to_string(&path).map_err(|e| SmurffError::io(&path, e))?;
        toml::from_str(&content).map_err(|e| SmurffError::format(&path, e.to_string()))
    }

    pub fn latest_iter(&self) -> Result<Option<i64>> {
        match self.read_root_index() {
            Ok(index) => Ok(index.samples.iter().copied().max()),
            Err(SmurffError::Io { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn root_index_round_trips_and_accumulates() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "test");
        mgr.append_root_index(0, 42).unwrap();
        mgr.append_root_index(1, 42).unwrap();
        let index = mgr.read_root_index().unwrap();
        assert_eq!(index.seed, 42);
        assert_eq!(index.samples, vec![0, 1]);
        assert_eq!(mgr.latest_iter().unwrap(), Some(1));
    }

    #[test]
    fn latest_iter_is_none_when_absent() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "nope");
        assert_eq!(mgr.latest_iter().unwrap(), None);
    }
}
