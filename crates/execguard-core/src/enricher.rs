//! Allow-log enrichment.
//!
//! The enforcement layer writes a UTF-16 log of allowed executions. This
//! module mirrors it into a UTF-8 sink, appending
//! `|timestamp|SHA256:<hex>|MD5:<hex>` to every line that names an
//! executable. Sink line N always corresponds to source line N, so only the
//! source lines beyond the sink's current line count are processed, and they
//! are appended. Bytes already in the sink are never rewritten, which keeps
//! offset-tracking readers (log shippers) in step.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{GuardError, Result};
use crate::hasher::{self, PRIMARY_HASH_LABEL, SECONDARY_HASH_LABEL};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    /// Complete lines currently in the source.
    pub source_lines: usize,
    pub sink_lines_before: usize,
    pub appended: usize,
    /// Appended lines that carried a target path.
    pub enriched: usize,
}

pub struct LogEnricher {
    source: PathBuf,
    sink: PathBuf,
    target: Regex,
}

impl LogEnricher {
    /// `target_pattern` must capture the executable path, preferably in a
    /// group named `path`; otherwise the first group is used.
    pub fn new(source: impl Into<PathBuf>, sink: impl Into<PathBuf>, target_pattern: &str) -> Result<Self> {
        Ok(Self {
            source: source.into(),
            sink: sink.into(),
            target: Regex::new(target_pattern)?,
        })
    }

    pub fn run(&self) -> Result<EnrichSummary> {
        if !self.source.exists() {
            return Err(GuardError::ConfigurationAbsent(format!(
                "allow log not found at {}",
                self.source.display()
            )));
        }
        let raw = fs::read(&self.source).map_err(|e| GuardError::io(&self.source, e))?;
        let text = decode_log(&raw);
        let source_lines = complete_lines(&text);

        let sink_bytes = match fs::read(&self.sink) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(GuardError::io(&self.sink, e)),
        };
        let sink_lines_before = count_lines(&sink_bytes);

        let mut summary = EnrichSummary {
            source_lines: source_lines.len(),
            sink_lines_before,
            ..Default::default()
        };

        if source_lines.len() < sink_lines_before {
            warn!(
                source = %self.source.display(),
                source_lines = source_lines.len(),
                sink_lines = sink_lines_before,
                "allow log is shorter than enriched log, was it rotated? nothing appended"
            );
            return Ok(summary);
        }
        if source_lines.len() == sink_lines_before {
            debug!(sink = %self.sink.display(), "enriched log up to date");
            return Ok(summary);
        }

        let mut out = String::new();
        if sink_bytes.last().is_some_and(|b| *b != b'\n') {
            out.push('\n');
        }
        for line in &source_lines[sink_lines_before..] {
            let (enriched_line, enriched) = self.enrich_line(line);
            out.push_str(&enriched_line);
            out.push('\n');
            summary.appended += 1;
            if enriched {
                summary.enriched += 1;
            }
        }

        append_to(&self.sink, out.as_bytes())?;
        info!(
            sink = %self.sink.display(),
            appended = summary.appended,
            enriched = summary.enriched,
            "allow log enriched"
        );
        Ok(summary)
    }

    fn target_path<'t>(&self, line: &'t str) -> Option<&'t str> {
        let caps = self.target.captures(line)?;
        let m = caps.name("path").or_else(|| caps.get(1))?;
        let path = m.as_str().trim().trim_matches('"');
        (!path.is_empty()).then_some(path)
    }

    fn enrich_line(&self, line: &str) -> (String, bool) {
        let Some(target) = self.target_path(line) else {
            return (line.to_string(), false);
        };
        let digests = hasher::hash_file_or_empty(Path::new(target));
        if digests.primary.is_empty() {
            debug!(path = target, "allow-log target unreadable, hashes left empty");
        }
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        (
            format!(
                "{line}|{ts}|{PRIMARY_HASH_LABEL}:{}|{SECONDARY_HASH_LABEL}:{}",
                digests.primary, digests.secondary
            ),
            true,
        )
    }
}

/// Decode the enforcement log: UTF-16 (BOM or NUL-interleaved), else UTF-8.
pub fn decode_log(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [_, 0x00, ..] => decode_utf16(bytes, u16::from_le_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Newline-terminated lines with any `\r` stripped. A trailing partial line
/// is still being written and is left for the next run.
fn complete_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    // Last element is either "" (text ended with '\n') or a partial line.
    lines.pop();
    lines
        .into_iter()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect()
}

fn count_lines(bytes: &[u8]) -> usize {
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    match bytes.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

fn append_to(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GuardError::io(path, e))?;
    file.write_all(data).map_err(|e| GuardError::io(path, e))?;
    file.flush().map_err(|e| GuardError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DEFAULT_TARGET_PATH_PATTERN;
    use tempfile::tempdir;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn decodes_supported_encodings() {
        assert_eq!(decode_log(&utf16le_with_bom("a\r\nb")), "a\r\nb");
        let no_bom: Vec<u8> = "xy".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_log(&no_bom), "xy");
        let be: Vec<u8> = [0xFE, 0xFF]
            .into_iter()
            .chain("z".encode_utf16().flat_map(|u| u.to_be_bytes()))
            .collect();
        assert_eq!(decode_log(&be), "z");
        assert_eq!(decode_log(b"\xEF\xBB\xBFplain"), "plain");
        assert_eq!(decode_log(b"plain"), "plain");
    }

    #[test]
    fn partial_last_line_is_held_back() {
        assert_eq!(complete_lines("a\r\nb\nc"), vec!["a", "b"]);
        assert_eq!(complete_lines("a\n"), vec!["a"]);
        assert!(complete_lines("").is_empty());
        assert_eq!(count_lines(b"a\nb\n"), 2);
        assert_eq!(count_lines(b"a\nb"), 2);
        assert_eq!(count_lines(b""), 0);
    }

    #[test]
    fn enriches_new_lines_and_skips_emitted_ones() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("g.exe");
        fs::write(&target, b"hello world").unwrap();
        let source = dir.path().join("allow.log");
        let sink = dir.path().join("out").join("enriched.log");

        let first = format!(
            "explorer.exe (PID = 1) identified {} as Unrestricted using path rule\r\nunrelated line\r\n",
            target.display()
        );
        fs::write(&source, utf16le_with_bom(&first)).unwrap();

        let enricher = LogEnricher::new(&source, &sink, DEFAULT_TARGET_PATH_PATTERN).unwrap();
        let summary = enricher.run().unwrap();
        assert_eq!(summary.appended, 2);
        assert_eq!(summary.enriched, 1);

        let text = fs::read_to_string(&sink).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(
            "|SHA256:B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9|MD5:5EB63BBBE01EEED093CB22BB8F5ACDC3"
        ));
        assert_eq!(lines[1], "unrelated line");

        // No new source lines: no-op.
        let again = enricher.run().unwrap();
        assert_eq!(again.appended, 0);
        assert_eq!(fs::read_to_string(&sink).unwrap(), text);
    }

    #[test]
    fn rotated_source_appends_nothing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("allow.log");
        let sink = dir.path().join("enriched.log");
        fs::write(&sink, "one\ntwo\nthree\n").unwrap();
        fs::write(&source, utf16le_with_bom("fresh\n")).unwrap();

        let enricher = LogEnricher::new(&source, &sink, DEFAULT_TARGET_PATH_PATTERN).unwrap();
        let summary = enricher.run().unwrap();
        assert_eq!(summary.appended, 0);
        assert_eq!(fs::read_to_string(&sink).unwrap(), "one\ntwo\nthree\n");
    }

    #[test]
    fn missing_source_is_configuration_absent() {
        let dir = tempdir().unwrap();
        let enricher = LogEnricher::new(
            dir.path().join("none.log"),
            dir.path().join("out.log"),
            DEFAULT_TARGET_PATH_PATTERN,
        )
        .unwrap();
        assert!(enricher.run().unwrap_err().is_configuration_absent());
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(LogEnricher::new("a", "b", "identified (").is_err());
    }
}
