//! Error kinds for the sampler, I/O layer, and CLI.
//!
//! Mirrors the `ConfigError` pattern used throughout the codebase: a single
//! `thiserror`-derived enum with one variant per failure class, propagated
//! with `?` rather than caught and swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere in the sampler, from CLI parsing down to
/// a failed Cholesky inside the Gibbs loop.
#[derive(Debug, Error)]
pub enum SmurffError {
    /// Invalid or inconsistent configuration, or a referenced file is missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure reading or writing a named path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The contents of a file did not match the expected format.
    #[error("format error in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// A numerical kernel failed irrecoverably: non-SPD Cholesky input,
    /// non-finite values, or fatal CG non-convergence.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// An internal invariant was violated (should never happen in correct code).
    #[error("internal invariant violated: {0}")]
    Assertion(String),

    /// SIGINT was received between Gibbs iterations.
    #[error("interrupted")]
    Interrupted,
}

impl SmurffError {
    /// Process exit code for this error, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            SmurffError::Numerical(_) => 2,
            SmurffError::Interrupted => 130,
            _ => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SmurffError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SmurffError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SmurffError>;
