//! Quarantine – moves flagged files out of their execution-eligible location
//! into an isolated holding directory. Files are never deleted, only moved.
//!
//! Layout: {quarantine_dir}/{timestamp}_{original_filename}
//!
//! Moving is best effort. When a move fails the file stays where it was, the
//! failure is recorded and the scan still reports the file as flagged.
//! Blocking execution is the enforcement layer's job, not this module's.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuarantineOutcome {
    Moved,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub outcome: QuarantineOutcome,
}

impl QuarantineRecord {
    pub fn moved(&self) -> bool {
        self.outcome == QuarantineOutcome::Moved
    }
}

pub struct QuarantineManager {
    root: PathBuf,
}

impl QuarantineManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `source` into quarantine. Never returns an error: failures are
    /// logged and reported in the returned record.
    pub fn quarantine_file(&self, source: &Path) -> QuarantineRecord {
        let destination = self.destination_for(source);
        let outcome = match self.move_into_place(source, &destination) {
            Ok(()) => {
                info!(
                    from = %source.display(),
                    to = %destination.display(),
                    "file quarantined"
                );
                QuarantineOutcome::Moved
            }
            Err(e) => {
                warn!(
                    path = %source.display(),
                    error = %e,
                    "quarantine failed, file left in place"
                );
                QuarantineOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        QuarantineRecord {
            source: source.to_path_buf(),
            destination,
            outcome,
        }
    }

    fn destination_for(&self, source: &Path) -> PathBuf {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut dest = self.root.join(format!("{}_{}", ts, filename));
        // Same-named files flagged within the same millisecond.
        let mut n = 1;
        while dest.exists() {
            dest = self.root.join(format!("{}-{}_{}", ts, n, filename));
            n += 1;
        }
        dest
    }

    fn move_into_place(&self, source: &Path, dest: &Path) -> io::Result<()> {
        if !source.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "source no longer exists",
            ));
        }
        fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700));
        }

        let rename_err = match fs::rename(source, dest) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // Cross-filesystem rename fails; fall back to copy-then-delete.
        warn!(error = %rename_err, "rename to quarantine failed, trying copy");
        if let Err(copy_err) = fs::copy(source, dest) {
            let _ = fs::remove_file(dest);
            return Err(io::Error::new(
                copy_err.kind(),
                format!("rename: {rename_err}; copy: {copy_err}"),
            ));
        }
        if let Err(remove_err) = fs::remove_file(source) {
            // Original still in place; do not leave a second copy behind.
            let _ = fs::remove_file(dest);
            return Err(remove_err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn moves_with_timestamp_prefix() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("h.exe");
        fs::write(&source, b"payload").unwrap();

        let manager = QuarantineManager::new(dir.path().join("quarantine"));
        let record = manager.quarantine_file(&source);

        assert!(record.moved());
        assert!(!source.exists());
        assert!(record.destination.exists());
        let name = record.destination.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_h.exe"));
        assert_eq!(fs::read(&record.destination).unwrap(), b"payload");
    }

    #[test]
    fn same_name_twice_does_not_overwrite() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        let first = dir.path().join("a").join("setup.exe");
        let second = dir.path().join("b").join("setup.exe");
        fs::write(&first, b"one").unwrap();
        fs::write(&second, b"two").unwrap();

        let manager = QuarantineManager::new(dir.path().join("q"));
        let r1 = manager.quarantine_file(&first);
        let r2 = manager.quarantine_file(&second);
        assert!(r1.moved() && r2.moved());
        assert_ne!(r1.destination, r2.destination);
        assert_eq!(fs::read(&r1.destination).unwrap(), b"one");
        assert_eq!(fs::read(&r2.destination).unwrap(), b"two");
    }

    #[test]
    fn unwritable_destination_leaves_file_in_place() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("h.exe");
        fs::write(&source, b"payload").unwrap();
        // A regular file where the quarantine directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let manager = QuarantineManager::new(blocker.join("quarantine"));
        let record = manager.quarantine_file(&source);

        assert!(!record.moved());
        assert!(matches!(record.outcome, QuarantineOutcome::Failed { .. }));
        assert!(source.exists());
        assert_eq!(fs::read(&source).unwrap(), b"payload");
    }

    #[test]
    fn vanished_source_is_reported() {
        let dir = tempdir().unwrap();
        let manager = QuarantineManager::new(dir.path().join("q"));
        let record = manager.quarantine_file(&dir.path().join("gone.exe"));
        assert!(!record.moved());
    }
}
