//! Directory walker producing fingerprints for monitored file types.
//!
//! Unreadable entries are skipped with a warning and counted; a scan never
//! fails because one file could not be opened.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::record::ExecutableRecord;

/// Records found under one or more roots.
#[derive(Debug, Default, Clone)]
pub struct ScanBatch {
    pub records: Vec<ExecutableRecord>,
    /// Entries that matched the extension filter but could not be read.
    pub skipped: usize,
}

impl ScanBatch {
    fn absorb(&mut self, other: ScanBatch) {
        self.records.extend(other.records);
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    extensions: HashSet<String>,
}

impl Scanner {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_monitored(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Fingerprint every monitored file under `root` modified strictly after
    /// `modified_since`; `None` means no cutoff.
    pub fn scan_dir(&self, root: &Path, modified_since: Option<DateTime<Utc>>) -> ScanBatch {
        let mut batch = ScanBatch::default();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "scan: cannot read directory entry, skipping");
                    batch.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_monitored(entry.path()) {
                continue;
            }

            if let Some(cutoff) = modified_since {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                match modified {
                    Some(ts) if ts <= cutoff => continue,
                    Some(_) => {}
                    None => {
                        warn!(path = %entry.path().display(), "scan: no modification time, skipping");
                        batch.skipped += 1;
                        continue;
                    }
                }
            }

            match ExecutableRecord::fingerprint(entry.path()) {
                Ok(record) => {
                    debug!(path = %record.path, hash = %record.primary_hash, "fingerprinted");
                    batch.records.push(record);
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "scan: cannot hash file, skipping");
                    batch.skipped += 1;
                }
            }
        }

        batch
    }

    /// Scan each root in turn.
    pub fn scan_all(&self, roots: &[PathBuf], modified_since: Option<DateTime<Utc>>) -> ScanBatch {
        let mut batch = ScanBatch::default();
        for root in roots {
            let found = self.scan_dir(root, modified_since);
            info!(
                root = %root.display(),
                files = found.records.len(),
                skipped = found.skipped,
                incremental = modified_since.is_some(),
                "directory scanned"
            );
            batch.absorb(found);
        }
        batch
    }
}
