//! Classification of freshly scanned files against the baseline.
//!
//! Identity is hash-first: a file whose content is anywhere in the baseline
//! is known, even at a new path (updaters move binaries around). Only when
//! the content is unknown does the path matter: a trusted path with new
//! content is `Modified`, anything else is `New`.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::baseline::Baseline;
use crate::quarantine::QuarantineRecord;
use crate::record::ExecutableRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Known,
    New,
    Modified,
}

impl Classification {
    pub fn is_flagged(self) -> bool {
        !matches!(self, Classification::Known)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Known => "known",
            Classification::New => "new",
            Classification::Modified => "modified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedFile {
    pub classification: Classification,
    pub record: ExecutableRecord,
}

/// Result of one scan invocation. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanOutcome {
    pub known: usize,
    pub new: usize,
    pub modified: usize,
    /// Files that could not be read during the scan.
    pub skipped: usize,
    pub flagged: Vec<FlaggedFile>,
    pub quarantined: Vec<QuarantineRecord>,
}

impl ScanOutcome {
    pub fn flagged_count(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Count `record` under its verdict, keeping it when flagged.
    pub fn tally(&mut self, record: ExecutableRecord, verdict: Verdict) {
        match verdict.classification {
            Classification::Known => {
                self.known += 1;
                return;
            }
            Classification::New => self.new += 1,
            Classification::Modified => self.modified += 1,
        }
        self.flagged.push(FlaggedFile {
            classification: verdict.classification,
            record: record.with_reason(verdict.reason),
        });
    }
}

pub struct DiffEngine<'a> {
    baseline: &'a Baseline,
    by_hash: HashMap<&'a str, &'a ExecutableRecord>,
}

impl<'a> DiffEngine<'a> {
    pub fn new(baseline: &'a Baseline) -> Self {
        Self {
            baseline,
            by_hash: baseline.hash_index(),
        }
    }

    pub fn classify(&self, record: &ExecutableRecord) -> Verdict {
        if let Some(trusted) = self.by_hash.get(record.primary_hash.as_str()) {
            let reason = if trusted.path == record.path {
                "content matches baseline".to_string()
            } else {
                format!("content matches baseline entry {}", trusted.path)
            };
            return Verdict {
                classification: Classification::Known,
                reason,
            };
        }

        if let Some(previous) = self.baseline.get(&record.path) {
            if previous.primary_hash == record.primary_hash {
                return Verdict {
                    classification: Classification::Known,
                    reason: "content matches baseline".to_string(),
                };
            }
            return Verdict {
                classification: Classification::Modified,
                reason: format!(
                    "content changed at trusted path (baseline {}, now {})",
                    previous.primary_hash, record.primary_hash
                ),
            };
        }

        Verdict {
            classification: Classification::New,
            reason: "path and content not in baseline".to_string(),
        }
    }

    /// Classify every record and collect the flagged ones with their reasons.
    pub fn evaluate(&self, records: Vec<ExecutableRecord>) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for record in records {
            let verdict = self.classify(&record);
            outcome.tally(record, verdict);
        }
        outcome
    }
}
