//! Error types for the execguard core.
//!
//! Only conditions that must stop an invocation are represented here.
//! Unreadable files, failed quarantine moves and vanished log targets are
//! handled where they occur and never reach the caller as an `Err`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration absent: {0}")]
    ConfigurationAbsent(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("baseline encoding error: {0}")]
    Baseline(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl GuardError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GuardError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the fatal "nothing to monitor" condition.
    pub fn is_configuration_absent(&self) -> bool {
        matches!(self, GuardError::ConfigurationAbsent(_))
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
