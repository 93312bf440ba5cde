use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::hasher;

/// One observed file. Records are replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableRecord {
    /// Absolute path, the baseline key.
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub primary_hash: String,
    pub secondary_hash: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Classification explanation, only set on scan output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExecutableRecord {
    /// Read metadata and hash the file's content.
    pub fn fingerprint(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        // Not every filesystem records birth time.
        let created_at = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_at);
        let digests = hasher::hash_file(path)?;
        Ok(Self {
            path: path.display().to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_bytes: metadata.len(),
            primary_hash: digests.primary,
            secondary_hash: digests.secondary,
            created_at,
            modified_at,
            reason: None,
        })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
