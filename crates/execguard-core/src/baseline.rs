//! Durable baseline of accepted fingerprints.
//!
//! The store is a CSV file keyed by path:
//!
//! ```text
//! Path,Name,PrimaryHash,SecondaryHash,Size,Created,Modified
//! ```
//!
//! Older baselines carry a single `Hash` column instead of the two digest
//! columns; they are mapped to the current record shape when loaded.
//!
//! `BaselineStore` is the only writer. Every write goes to a temporary file
//! beside the baseline and is renamed into place while holding an exclusive
//! advisory lock on `<baseline>.lock`. The baseline file's own modification
//! time is the cursor for incremental updates.

use chrono::{DateTime, NaiveDateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{GuardError, Result};
use crate::record::ExecutableRecord;
use crate::scanner::Scanner;

const HEADERS: [&str; 7] = [
    "Path",
    "Name",
    "PrimaryHash",
    "SecondaryHash",
    "Size",
    "Created",
    "Modified",
];

// ── Baseline ────────────────────────────────────────────────────────────────

/// Path-keyed set of accepted records; exactly one record per path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    records: BTreeMap<String, ExecutableRecord>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = ExecutableRecord>>(records: I) -> Self {
        let mut baseline = Self::new();
        for record in records {
            baseline.upsert(record);
        }
        baseline
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ExecutableRecord> {
        self.records.get(path)
    }

    /// Records in path order.
    pub fn records(&self) -> impl Iterator<Item = &ExecutableRecord> {
        self.records.values()
    }

    /// Insert or replace the record at its path. Returns the superseded record.
    pub fn upsert(&mut self, mut record: ExecutableRecord) -> Option<ExecutableRecord> {
        record.reason = None;
        self.records.insert(record.path.clone(), record)
    }

    /// Index records by primary hash for identity lookups.
    pub fn hash_index(&self) -> HashMap<&str, &ExecutableRecord> {
        self.records
            .values()
            .filter(|r| !r.primary_hash.is_empty())
            .map(|r| (r.primary_hash.as_str(), r))
            .collect()
    }
}

// ── CSV schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaVersion {
    /// Single `Hash` column.
    V1,
    /// `PrimaryHash` + `SecondaryHash`.
    V2,
}

impl SchemaVersion {
    fn detect(headers: &csv::StringRecord) -> Self {
        let has = |name: &str| headers.iter().any(|h| h.trim() == name);
        if has("Hash") && !has("PrimaryHash") {
            SchemaVersion::V1
        } else {
            SchemaVersion::V2
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RowV2 {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "PrimaryHash")]
    primary_hash: String,
    #[serde(rename = "SecondaryHash", default)]
    secondary_hash: String,
    #[serde(rename = "Size", default, deserialize_with = "de_size")]
    size: u64,
    #[serde(rename = "Created", deserialize_with = "de_timestamp")]
    created: DateTime<Utc>,
    #[serde(rename = "Modified", deserialize_with = "de_timestamp")]
    modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RowV1 {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "SecondaryHash", default)]
    secondary_hash: String,
    #[serde(rename = "Size", default, deserialize_with = "de_size")]
    size: u64,
    #[serde(rename = "Created", deserialize_with = "de_timestamp")]
    created: DateTime<Utc>,
    #[serde(rename = "Modified", deserialize_with = "de_timestamp")]
    modified: DateTime<Utc>,
}

impl From<RowV2> for ExecutableRecord {
    fn from(row: RowV2) -> Self {
        ExecutableRecord {
            path: row.path,
            name: row.name,
            size_bytes: row.size,
            primary_hash: row.primary_hash.to_ascii_uppercase(),
            secondary_hash: row.secondary_hash.to_ascii_uppercase(),
            created_at: row.created,
            modified_at: row.modified,
            reason: None,
        }
    }
}

impl From<RowV1> for ExecutableRecord {
    fn from(row: RowV1) -> Self {
        RowV2 {
            path: row.path,
            name: row.name,
            primary_hash: row.hash,
            secondary_hash: row.secondary_hash,
            size: row.size,
            created: row.created,
            modified: row.modified,
        }
        .into()
    }
}

impl From<&ExecutableRecord> for RowV2 {
    fn from(record: &ExecutableRecord) -> Self {
        RowV2 {
            path: record.path.clone(),
            name: record.name.clone(),
            primary_hash: record.primary_hash.clone(),
            secondary_hash: record.secondary_hash.clone(),
            size: record.size_bytes,
            created: record.created_at,
            modified: record.modified_at,
        }
    }
}

fn de_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().parse().unwrap_or(0))
}

/// RFC 3339, or the locale-style forms older exports used. Unparseable
/// values fall back to the Unix epoch rather than rejecting the row.
fn de_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(parse_timestamp(&raw).unwrap_or_default())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%m/%d/%Y %I:%M:%S %p", "%m/%d/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Decode a baseline from CSV, choosing the row shape from the header.
///
/// Rows that do not decode are logged and skipped; only an unreadable
/// header or an I/O failure rejects the whole file.
pub fn decode<R: Read>(reader: R) -> Result<Baseline> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);
    let version = SchemaVersion::detect(csv_reader.headers()?);
    let mut baseline = Baseline::new();
    let skipped = match version {
        SchemaVersion::V1 => decode_rows::<_, RowV1>(&mut csv_reader, &mut baseline)?,
        SchemaVersion::V2 => decode_rows::<_, RowV2>(&mut csv_reader, &mut baseline)?,
    };
    debug!(?version, entries = baseline.len(), skipped, "baseline decoded");
    Ok(baseline)
}

fn decode_rows<R, T>(reader: &mut csv::Reader<R>, baseline: &mut Baseline) -> Result<usize>
where
    R: Read,
    T: DeserializeOwned + Into<ExecutableRecord>,
{
    let mut skipped = 0;
    for (index, row) in reader.deserialize::<T>().enumerate() {
        match row {
            Ok(row) => {
                baseline.upsert(row.into());
            }
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(
                    record = index + 1,
                    line = e.position().map(|p| p.line()),
                    error = %e,
                    "skipping malformed baseline row"
                );
                skipped += 1;
            }
        }
    }
    Ok(skipped)
}

// ── Store ───────────────────────────────────────────────────────────────────

/// Counts from an incremental merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub overwritten: usize,
}

pub struct BaselineStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held while the baseline is being rewritten.
struct WriteLockGuard {
    file: File,
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the baseline. A missing or unreadable store is an empty baseline.
    pub fn load(&self) -> Baseline {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no baseline yet");
            return Baseline::new();
        }
        let loaded = File::open(&self.path)
            .map_err(|e| GuardError::io(&self.path, e))
            .and_then(decode);
        match loaded {
            Ok(baseline) => {
                debug!(path = %self.path.display(), entries = baseline.len(), "baseline loaded");
                baseline
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "baseline unreadable, treating as empty");
                Baseline::new()
            }
        }
    }

    /// Modification time of the store, the incremental scan cutoff.
    pub fn last_write_time(&self) -> Option<DateTime<Utc>> {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .ok()
    }

    /// Overwrite the store with exactly `records`.
    pub fn replace_all(&self, records: Vec<ExecutableRecord>) -> Result<usize> {
        let _guard = self.lock()?;
        let baseline = Baseline::from_records(records);
        self.write(&baseline)?;
        info!(path = %self.path.display(), entries = baseline.len(), "baseline replaced");
        Ok(baseline.len())
    }

    /// Upsert `records` by path. Entries not present in `records` stay as they are.
    pub fn merge(&self, records: Vec<ExecutableRecord>) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        if records.is_empty() {
            return Ok(stats);
        }
        let _guard = self.lock()?;
        let mut baseline = self.load();
        for record in records {
            match baseline.upsert(record) {
                Some(_) => stats.overwritten += 1,
                None => stats.added += 1,
            }
        }
        self.write(&baseline)?;
        info!(
            path = %self.path.display(),
            added = stats.added,
            overwritten = stats.overwritten,
            entries = baseline.len(),
            "baseline merged"
        );
        Ok(stats)
    }

    fn lock(&self) -> Result<WriteLockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
        }
        let file = File::create(&self.lock_path).map_err(|e| GuardError::io(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| GuardError::io(&self.lock_path, e))?;
        Ok(WriteLockGuard { file })
    }

    fn write(&self, baseline: &Baseline) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| GuardError::io(&parent, e))?;

        let mut staging = NamedTempFile::new_in(&parent).map_err(|e| GuardError::io(&parent, e))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut staging);
            writer.write_record(HEADERS)?;
            for record in baseline.records() {
                writer.serialize(RowV2::from(record))?;
            }
            writer.flush().map_err(|e| GuardError::io(&self.path, e))?;
        }
        staging
            .as_file()
            .sync_all()
            .map_err(|e| GuardError::io(&self.path, e))?;
        staging
            .persist(&self.path)
            .map_err(|e| GuardError::io(&self.path, e.error))?;
        Ok(())
    }
}

// ── Update ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub mode: UpdateMode,
    /// Cutoff used for an incremental update.
    pub since: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub skipped: usize,
    pub added: usize,
    pub overwritten: usize,
    /// Entries dropped by a full replace.
    pub removed: usize,
    pub total: usize,
}

/// Refresh the baseline from the whitelisted directories.
///
/// Full replace when requested, or when there is no usable baseline yet;
/// otherwise only files modified after the store's last write are hashed and
/// merged in.
pub fn update_baseline(
    store: &BaselineStore,
    scanner: &Scanner,
    dirs: &[PathBuf],
    force_full: bool,
) -> Result<UpdateSummary> {
    let current = store.load();
    let cursor = if force_full || current.is_empty() {
        None
    } else {
        store.last_write_time()
    };

    match cursor {
        None => {
            info!(dirs = dirs.len(), "full baseline update");
            let batch = scanner.scan_all(dirs, None);
            let scanned = batch.records.len();
            let fresh = Baseline::from_records(batch.records.iter().cloned());
            let overwritten = fresh
                .records()
                .filter(|r| current.get(&r.path).is_some())
                .count();
            let removed = current
                .records()
                .filter(|r| fresh.get(&r.path).is_none())
                .count();
            let total = store.replace_all(batch.records)?;
            Ok(UpdateSummary {
                mode: UpdateMode::Full,
                since: None,
                scanned,
                skipped: batch.skipped,
                added: total - overwritten,
                overwritten,
                removed,
                total,
            })
        }
        Some(since) => {
            info!(dirs = dirs.len(), %since, "incremental baseline update");
            let batch = scanner.scan_all(dirs, Some(since));
            let scanned = batch.records.len();
            let stats = store.merge(batch.records)?;
            Ok(UpdateSummary {
                mode: UpdateMode::Incremental,
                since: Some(since),
                scanned,
                skipped: batch.skipped,
                added: stats.added,
                overwritten: stats.overwritten,
                removed: 0,
                total: current.len() + stats.added,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str, hash: &str) -> ExecutableRecord {
        ExecutableRecord {
            path: path.to_string(),
            name: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            size_bytes: 4,
            primary_hash: hash.to_string(),
            secondary_hash: format!("{hash}-MD5"),
            created_at: "2026-01-02T03:04:05Z".parse().unwrap(),
            modified_at: "2026-01-02T03:04:05Z".parse().unwrap(),
            reason: None,
        }
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.csv"));
        assert!(store.load().is_empty());
        assert!(store.last_write_time().is_none());
    }

    #[test]
    fn replace_then_load() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("state").join("baseline.csv"));
        store
            .replace_all(vec![record("/opt/a.exe", "AAAA"), record("/opt/b,c.exe", "BBBB")])
            .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("/opt/b,c.exe").unwrap().primary_hash, "BBBB");
        assert_eq!(loaded.get("/opt/a.exe").unwrap().secondary_hash, "AAAA-MD5");
        assert!(store.last_write_time().is_some());

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("Path,Name,PrimaryHash,SecondaryHash,Size,Created,Modified\n"));
    }

    #[test]
    fn merge_keeps_absent_entries() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.csv"));
        store
            .replace_all(vec![record("/opt/a.exe", "AAAA"), record("/opt/b.exe", "BBBB")])
            .unwrap();

        let stats = store
            .merge(vec![record("/opt/b.exe", "B2B2"), record("/opt/c.exe", "CCCC")])
            .unwrap();
        assert_eq!(stats, MergeStats { added: 1, overwritten: 1 });

        let loaded = store.load();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get("/opt/a.exe").unwrap().primary_hash, "AAAA");
        assert_eq!(loaded.get("/opt/b.exe").unwrap().primary_hash, "B2B2");
    }

    #[test]
    fn empty_merge_does_not_touch_store() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.csv"));
        store.replace_all(vec![record("/opt/a.exe", "AAAA")]).unwrap();
        let before = fs::read(store.path()).unwrap();
        let stamp = store.last_write_time();

        assert_eq!(store.merge(Vec::new()).unwrap(), MergeStats::default());
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(store.last_write_time(), stamp);
    }

    #[test]
    fn legacy_single_hash_schema_is_decoded() {
        let csv = "\"Path\",\"Name\",\"Hash\",\"Size\",\"Created\",\"Modified\"\n\
                   \"C:\\Games\\g.exe\",\"g.exe\",\"abcd\",\"1024\",\"10/18/2025 4:12:00 PM\",\"2025-10-18T16:12:00Z\"\n";
        let baseline = decode(csv.as_bytes()).unwrap();
        let g = baseline.get(r"C:\Games\g.exe").unwrap();
        assert_eq!(g.primary_hash, "ABCD");
        assert_eq!(g.secondary_hash, "");
        assert_eq!(g.size_bytes, 1024);
        assert_eq!(g.created_at, "2025-10-18T16:12:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn unreadable_header_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.csv");
        fs::write(&path, b"Pa\xffth,PrimaryHash\n/opt/a.exe,AAAA\n").unwrap();
        let store = BaselineStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn truncated_row_is_skipped_and_others_kept() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.csv"));
        store
            .replace_all(vec![record("/opt/a.exe", "AAAA"), record("/opt/b.exe", "BBBB")])
            .unwrap();
        let mut file = fs::OpenOptions::new().append(true).open(store.path()).unwrap();
        std::io::Write::write_all(&mut file, b"/x.exe,x.exe\n").unwrap();
        drop(file);

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("/opt/a.exe").unwrap().primary_hash, "AAAA");
        assert!(loaded.get("/x.exe").is_none());
    }

    #[test]
    fn second_writer_waits_for_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.csv");
        let holder_store = BaselineStore::new(&path);
        let holder = File::create(&holder_store.lock_path).unwrap();
        holder.lock_exclusive().unwrap();

        let writer_store = BaselineStore::new(&path);
        let writer = std::thread::spawn(move || {
            writer_store.replace_all(vec![record("/opt/a.exe", "AAAA")])
        });

        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!path.exists());
        assert!(!writer.is_finished());

        FileExt::unlock(&holder).unwrap();
        assert_eq!(writer.join().unwrap().unwrap(), 1);
        assert_eq!(holder_store.load().len(), 1);
    }

    #[test]
    fn duplicate_paths_collapse_to_last() {
        let baseline = Baseline::from_records(vec![
            record("/opt/a.exe", "OLD"),
            record("/opt/a.exe", "NEW"),
        ]);
        assert_eq!(baseline.len(), 1);
        assert_eq!(baseline.get("/opt/a.exe").unwrap().primary_hash, "NEW");
        assert!(baseline.hash_index().contains_key("NEW"));
        assert!(!baseline.hash_index().contains_key("OLD"));
    }
}
