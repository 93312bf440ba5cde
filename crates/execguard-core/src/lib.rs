//! Baseline-driven integrity monitoring for whitelisted executable
//! directories.
//!
//! Files under the directories an external allow-list trusts are
//! fingerprinted (SHA-256 and MD5), compared against a persisted baseline,
//! and classified as known, new or modified. Flagged files can be moved to
//! quarantine; every decision is recorded in an append-only alert log. The
//! enforcement layer's allow-log can be enriched with hashes, and the
//! baseline exported for an analysis backend.

pub mod alert_log;
pub mod baseline;
pub mod diff;
pub mod enricher;
pub mod error;
pub mod exporter;
pub mod hasher;
pub mod monitor;
pub mod paths;
pub mod policy;
pub mod quarantine;
pub mod record;
pub mod resolver;
pub mod scanner;
pub mod settings;

pub use alert_log::{AlertEntry, AlertLevel, AlertLog};
pub use baseline::{Baseline, BaselineStore, MergeStats, UpdateMode, UpdateSummary};
pub use diff::{Classification, DiffEngine, FlaggedFile, ScanOutcome, Verdict};
pub use enricher::{EnrichSummary, LogEnricher};
pub use error::{GuardError, Result};
pub use exporter::{BaselineExporter, ExportSummary};
pub use monitor::Monitor;
pub use policy::{FilePolicy, PolicySource, StaticPolicy};
pub use quarantine::{QuarantineManager, QuarantineOutcome, QuarantineRecord};
pub use record::ExecutableRecord;
pub use resolver::PathResolver;
pub use scanner::{ScanBatch, Scanner};
pub use settings::GuardSettings;
