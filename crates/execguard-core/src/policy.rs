//! Whitelist sources.
//!
//! The enforcement layer owns the allow-list; the core only reads its path
//! patterns. `FilePolicy` reads an exported list, one pattern per line.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GuardError, Result};

pub trait PolicySource {
    /// Raw whitelist patterns in policy order.
    fn whitelist_patterns(&self) -> Result<Vec<String>>;
}

/// Pattern list exported from the enforcement configuration.
/// Blank lines and `#` comments are ignored.
pub struct FilePolicy {
    path: PathBuf,
}

impl FilePolicy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for FilePolicy {
    fn whitelist_patterns(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Err(GuardError::ConfigurationAbsent(format!(
                "whitelist policy not found at {}",
                self.path.display()
            )));
        }
        let text = fs::read_to_string(&self.path).map_err(|e| GuardError::io(&self.path, e))?;
        let patterns: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        debug!(path = %self.path.display(), count = patterns.len(), "policy patterns read");
        Ok(patterns)
    }
}

/// In-memory pattern list, for embedding callers and tests.
pub struct StaticPolicy {
    patterns: Vec<String>,
}

impl StaticPolicy {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

impl PolicySource for StaticPolicy {
    fn whitelist_patterns(&self) -> Result<Vec<String>> {
        Ok(self.patterns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_policy_is_configuration_absent() {
        let dir = tempdir().unwrap();
        let policy = FilePolicy::new(dir.path().join("whitelist.txt"));
        let err = policy.whitelist_patterns().unwrap_err();
        assert!(err.is_configuration_absent());
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");
        fs::write(
            &path,
            "# exported rules\n%PROGRAMFILES%\\Games\\*\n\n   \n$HOME/tools/*\n",
        )
        .unwrap();

        let patterns = FilePolicy::new(&path).whitelist_patterns().unwrap();
        assert_eq!(
            patterns,
            vec!["%PROGRAMFILES%\\Games\\*".to_string(), "$HOME/tools/*".to_string()]
        );
    }
}
