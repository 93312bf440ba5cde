//! Append-only alert log.
//!
//! One JSON object per line, one line per classification, quarantine outcome
//! or sync event. Lines are only ever appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Alert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntry {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        level: AlertLevel,
        event: &str,
        path: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<AlertEntry> {
        let entry = AlertEntry {
            timestamp: Utc::now(),
            level,
            event: event.to_string(),
            path: path.map(str::to_string),
            detail,
        };
        self.write_entry(&entry)?;
        Ok(entry)
    }

    fn write_entry(&self, entry: &AlertEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GuardError::io(&self.path, e))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line).map_err(|e| GuardError::io(&self.path, e))?;
        file.flush().map_err(|e| GuardError::io(&self.path, e))?;
        Ok(())
    }

    /// Most recent entries first. Lines that do not parse are skipped.
    pub fn read_recent(&self, limit: Option<usize>) -> Result<Vec<AlertEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&self.path).map_err(|e| GuardError::io(&self.path, e))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| GuardError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AlertEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), error = %e, "skipping malformed alert line"),
            }
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }
}
