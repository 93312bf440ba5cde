//! Baseline export for the analysis backend.
//!
//! Writes one `"<path>":<name>` line per baseline record, a key:value list
//! the backend bulk-imports as a lookup table. The key is quoted so that
//! drive-letter colons survive the import.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::alert_log::{AlertLevel, AlertLog};
use crate::baseline::Baseline;
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub entries: usize,
    pub location: PathBuf,
}

pub struct BaselineExporter<'a> {
    output: PathBuf,
    alerts: Option<&'a AlertLog>,
}

impl<'a> BaselineExporter<'a> {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            alerts: None,
        }
    }

    /// Record the sync event in `alerts` as well as in the tracing output.
    pub fn with_alert_log(mut self, alerts: &'a AlertLog) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Overwrite the export file with the whole baseline.
    pub fn export(&self, baseline: &Baseline) -> Result<ExportSummary> {
        let body = render(baseline);
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
        }
        // UTF-8, no byte-order mark.
        fs::write(&self.output, body.as_bytes()).map_err(|e| GuardError::io(&self.output, e))?;

        let summary = ExportSummary {
            entries: baseline.len(),
            location: self.output.clone(),
        };
        info!(
            entries = summary.entries,
            location = %summary.location.display(),
            "baseline exported"
        );
        if let Some(alerts) = self.alerts {
            alerts.append(
                AlertLevel::Info,
                "baseline_exported",
                None,
                serde_json::json!({
                    "count": summary.entries,
                    "location": summary.location.display().to_string(),
                }),
            )?;
        }
        Ok(summary)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// The export body, one line per record in path order.
pub fn render(baseline: &Baseline) -> String {
    let mut out = String::new();
    for record in baseline.records() {
        out.push('"');
        out.push_str(&record.path.replace('"', "\\\""));
        out.push_str("\":");
        out.push_str(&record.name);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExecutableRecord;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(path: &str, name: &str) -> ExecutableRecord {
        ExecutableRecord {
            path: path.to_string(),
            name: name.to_string(),
            size_bytes: 4,
            primary_hash: format!("H-{name}"),
            secondary_hash: String::new(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            reason: None,
        }
    }

    #[test]
    fn render_quotes_the_path_key() {
        let baseline = Baseline::from_records(vec![
            record(r"C:\Games\g.exe", "g.exe"),
            record(r#"/opt/odd"name.exe"#, r#"odd"name.exe"#),
        ]);
        let text = render(&baseline);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#""/opt/odd\"name.exe":odd"name.exe"#);
        assert_eq!(lines[1], r#""C:\Games\g.exe":g.exe"#);
    }

    #[test]
    fn export_overwrites_and_logs_sync_event() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("export").join("baseline.cdb");
        let alerts = AlertLog::new(dir.path().join("alerts.log"));
        let exporter = BaselineExporter::new(&output).with_alert_log(&alerts);

        let two = Baseline::from_records(vec![record("/a.exe", "a.exe"), record("/b.exe", "b.exe")]);
        assert_eq!(exporter.export(&two).unwrap().entries, 2);

        let one = Baseline::from_records(vec![record("/c.exe", "c.exe")]);
        let summary = exporter.export(&one).unwrap();
        assert_eq!(summary.entries, 1);

        let bytes = fs::read(&output).unwrap();
        assert!(!bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
        assert_eq!(String::from_utf8(bytes).unwrap(), "\"/c.exe\":c.exe\n");

        let events = alerts.read_recent(None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "baseline_exported");
        assert_eq!(events[0].detail["count"], 1);
    }
}
