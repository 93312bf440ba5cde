//! Per-invocation orchestration.
//!
//! A `Monitor` is built from explicit settings and a policy source, then runs
//! one operation: scan, baseline update, enrichment or export. Every
//! classification and quarantine outcome is written to the alert log.

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::alert_log::{AlertEntry, AlertLevel, AlertLog};
use crate::baseline::{self, Baseline, BaselineStore, UpdateSummary};
use crate::diff::{Classification, DiffEngine, FlaggedFile, ScanOutcome};
use crate::enricher::{EnrichSummary, LogEnricher};
use crate::error::{GuardError, Result};
use crate::exporter::{BaselineExporter, ExportSummary};
use crate::policy::{FilePolicy, PolicySource};
use crate::quarantine::{QuarantineManager, QuarantineRecord};
use crate::resolver::PathResolver;
use crate::scanner::Scanner;
use crate::settings::GuardSettings;

pub struct Monitor {
    settings: GuardSettings,
    policy: Box<dyn PolicySource>,
    resolver: PathResolver,
    scanner: Scanner,
    store: BaselineStore,
    alerts: AlertLog,
}

impl Monitor {
    pub fn new(settings: GuardSettings, policy: Box<dyn PolicySource>) -> Self {
        let scanner = Scanner::new(&settings.monitored_extensions);
        let store = BaselineStore::new(&settings.baseline_file);
        let alerts = AlertLog::new(&settings.alert_log);
        Self {
            settings,
            policy,
            resolver: PathResolver::new(),
            scanner,
            store,
            alerts,
        }
    }

    /// Monitor reading its whitelist from `settings.policy_file`.
    pub fn from_settings(settings: GuardSettings) -> Self {
        let policy = FilePolicy::new(&settings.policy_file);
        Self::new(settings, Box::new(policy))
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    pub fn alert_log(&self) -> &AlertLog {
        &self.alerts
    }

    fn policy_patterns(&self) -> Result<Vec<String>> {
        let patterns = self.policy.whitelist_patterns()?;
        if patterns.is_empty() {
            return Err(GuardError::ConfigurationAbsent(
                "whitelist policy has no entries".to_string(),
            ));
        }
        Ok(patterns)
    }

    /// Existing directories named by the whitelist.
    pub fn resolve_whitelist(&self) -> Result<Vec<PathBuf>> {
        let patterns = self.policy_patterns()?;
        let dirs = self.resolver.resolve(&patterns);
        if dirs.is_empty() {
            return Err(GuardError::ConfigurationAbsent(format!(
                "none of the {} whitelist entries names an existing directory",
                patterns.len()
            )));
        }
        info!(patterns = patterns.len(), directories = dirs.len(), "whitelist resolved");
        Ok(dirs)
    }

    /// Fingerprint every whitelisted file and classify it against the
    /// baseline. Flagged files are moved to quarantine when `quarantine` is
    /// set. The baseline itself is never modified.
    pub fn scan(&self, quarantine: bool) -> Result<ScanOutcome> {
        let dirs = self.resolve_whitelist()?;
        let baseline = self.store.load();
        if baseline.is_empty() {
            warn!(path = %self.store.path().display(), "baseline is empty, every file will be flagged");
        }

        let batch = self.scanner.scan_all(&dirs, None);
        let engine = DiffEngine::new(&baseline);
        let mut outcome = ScanOutcome {
            skipped: batch.skipped,
            ..Default::default()
        };

        for record in batch.records {
            let verdict = engine.classify(&record);
            let (level, event) = match verdict.classification {
                Classification::Known => (AlertLevel::Info, "known_file"),
                Classification::New => (AlertLevel::Alert, "new_file"),
                Classification::Modified => (AlertLevel::Alert, "modified_file"),
            };
            self.alerts.append(
                level,
                event,
                Some(record.path.as_str()),
                serde_json::json!({
                    "reason": verdict.reason,
                    "primary_hash": record.primary_hash,
                    "secondary_hash": record.secondary_hash,
                    "size": record.size_bytes,
                }),
            )?;
            outcome.tally(record, verdict);
        }

        if quarantine && !outcome.flagged.is_empty() {
            outcome.quarantined = self.quarantine_flagged(&outcome.flagged);
        }

        info!(
            known = outcome.known,
            new = outcome.new,
            modified = outcome.modified,
            skipped = outcome.skipped,
            quarantined = outcome.quarantined.iter().filter(|q| q.moved()).count(),
            "scan complete"
        );
        Ok(outcome)
    }

    /// Move every flagged file to quarantine. Files that were moved are
    /// always reported back, even when their alert line cannot be written.
    fn quarantine_flagged(&self, flagged: &[FlaggedFile]) -> Vec<QuarantineRecord> {
        let manager = QuarantineManager::new(&self.settings.quarantine_dir);
        let mut records = Vec::with_capacity(flagged.len());
        for file in flagged {
            let qr = manager.quarantine_file(Path::new(&file.record.path));
            let (level, event) = if qr.moved() {
                (AlertLevel::Info, "file_quarantined")
            } else {
                (AlertLevel::Warning, "quarantine_failed")
            };
            let logged = serde_json::to_value(&qr)
                .map_err(GuardError::from)
                .and_then(|detail| {
                    self.alerts
                        .append(level, event, Some(file.record.path.as_str()), detail)
                });
            if let Err(e) = logged {
                error!(
                    from = %qr.source.display(),
                    to = %qr.destination.display(),
                    moved = qr.moved(),
                    error = %e,
                    "quarantine outcome not written to alert log"
                );
            }
            records.push(qr);
        }
        records
    }

    /// Full replace when `force_full` is set or the baseline is empty,
    /// otherwise an incremental merge of files changed since the last write.
    pub fn update_baseline(&self, force_full: bool) -> Result<UpdateSummary> {
        let dirs = self.resolve_whitelist()?;
        let summary = baseline::update_baseline(&self.store, &self.scanner, &dirs, force_full)?;
        info!(
            mode = ?summary.mode,
            scanned = summary.scanned,
            added = summary.added,
            overwritten = summary.overwritten,
            total = summary.total,
            "baseline updated"
        );
        self.alerts.append(
            AlertLevel::Info,
            "baseline_updated",
            None,
            serde_json::to_value(&summary)?,
        )?;
        Ok(summary)
    }

    pub fn show_baseline(&self) -> Baseline {
        self.store.load()
    }

    pub fn enrich_log(&self) -> Result<EnrichSummary> {
        LogEnricher::new(
            &self.settings.source_log,
            &self.settings.enriched_log,
            &self.settings.target_path_pattern,
        )?
        .run()
    }

    /// Export the baseline to `output`, or to the configured export file.
    pub fn export_baseline(&self, output: Option<&Path>) -> Result<ExportSummary> {
        self.policy_patterns()?;
        let target = output.unwrap_or(self.settings.export_file.as_path());
        BaselineExporter::new(target)
            .with_alert_log(&self.alerts)
            .export(&self.store.load())
    }

    pub fn alerts(&self, limit: Option<usize>) -> Result<Vec<AlertEntry>> {
        self.alerts.read_recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticPolicy;
    use crate::record::ExecutableRecord;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn moved_files_are_reported_when_alert_log_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let mut settings = GuardSettings::rooted_at(dir.path());
        settings.alert_log = blocker.join("alerts.log");
        let monitor = Monitor::new(settings, Box::new(StaticPolicy::new(["unused"])));

        let target = dir.path().join("h.exe");
        fs::write(&target, b"payload").unwrap();
        let flagged = vec![FlaggedFile {
            classification: Classification::New,
            record: ExecutableRecord::fingerprint(&target).unwrap(),
        }];

        let records = monitor.quarantine_flagged(&flagged);
        assert_eq!(records.len(), 1);
        assert!(records[0].moved());
        assert!(!target.exists());
        assert_eq!(fs::read(&records[0].destination).unwrap(), b"payload");
    }
}
