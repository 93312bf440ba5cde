use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::paths;

/// Extensions covering native executables, scripts and indirect-execution
/// formats. Compared case-insensitively, without the leading dot.
pub const DEFAULT_MONITORED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "sys", "com", "scr", "cpl", "ocx", "msi", "msp", "bat", "cmd", "ps1", "psm1",
    "vbs", "vbe", "js", "jse", "wsf", "wsh", "hta", "jar", "lnk", "pif", "reg", "inf",
];

/// Matches the allowed executable in a software-restriction allow-log line, e.g.
/// `explorer.exe (PID = 4120) identified C:\Games\g.exe as Unrestricted using path rule`.
pub const DEFAULT_TARGET_PATH_PATTERN: &str = r"identified (?P<path>.+?) as ";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// Whitelist patterns, one per line.
    pub policy_file: PathBuf,
    pub baseline_file: PathBuf,
    pub alert_log: PathBuf,
    pub quarantine_dir: PathBuf,
    /// Allow-log written by the enforcement layer (UTF-16).
    pub source_log: PathBuf,
    pub enriched_log: PathBuf,
    pub export_file: PathBuf,
    pub monitored_extensions: Vec<String>,
    pub target_path_pattern: String,
}

impl GuardSettings {
    /// Default layout with every file placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let logs = root.join("logs");
        Self {
            policy_file: root.join("whitelist.txt"),
            baseline_file: root.join("baseline.csv"),
            alert_log: logs.join("alerts.log"),
            quarantine_dir: root.join("quarantine"),
            source_log: logs.join("allow.log"),
            enriched_log: logs.join("allow-enriched.log"),
            export_file: root.join("export").join("baseline.cdb"),
            monitored_extensions: DEFAULT_MONITORED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            target_path_pattern: DEFAULT_TARGET_PATH_PATTERN.to_string(),
        }
    }

    /// Load settings from a JSON file. A missing file yields the defaults;
    /// fields absent from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let data = fs::read(path).map_err(|e| GuardError::io(path, e))?;
        let settings: GuardSettings = serde_json::from_slice(&data)?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data).map_err(|e| GuardError::io(path, e))?;
        Ok(())
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        let root = paths::data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::rooted_at(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = GuardSettings::load(&dir.path().join("nope.json")).unwrap();
        assert!(settings.monitored_extensions.iter().any(|e| e == "exe"));
        assert_eq!(settings.target_path_pattern, DEFAULT_TARGET_PATH_PATTERN);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "baseline_file": "/srv/guard/base.csv", "monitored_extensions": ["exe"] }"#,
        )
        .unwrap();

        let settings = GuardSettings::load(&path).unwrap();
        assert_eq!(settings.baseline_file, PathBuf::from("/srv/guard/base.csv"));
        assert_eq!(settings.monitored_extensions, vec!["exe".to_string()]);
        assert_eq!(settings.target_path_pattern, DEFAULT_TARGET_PATH_PATTERN);
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(GuardSettings::load(&path), Err(GuardError::Json(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let settings = GuardSettings::rooted_at(dir.path());
        settings.save(&path).unwrap();

        let loaded = GuardSettings::load(&path).unwrap();
        assert_eq!(loaded.baseline_file, dir.path().join("baseline.csv"));
    }
}
