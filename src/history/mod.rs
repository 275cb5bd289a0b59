//! Durable download history, one JSON document per download family.
//!
//! History is the deduplication source of truth: a filename recorded here is
//! never fetched again while history tracking is enabled.
//!
//! # Persistence
//!
//! Every save copies the live document to `<file>.backup` (only when it
//! parses), writes the new content to `<file>.tmp`, and only then renames the
//! temp file over the live one. The live file is therefore never observed
//! half-written, and the previous good version survives an interrupted
//! rename. [`HistoryStore::stage`] exposes the two phases separately.

mod queries;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{DownloadResult, DownloadType, Metadata};

pub use queries::{AvailableDate, HistoryStatistics, format_size};

/// Default REP history file name.
pub const REP_HISTORY_FILE: &str = "download_history.json";
/// Default STM history file name.
pub const STM_HISTORY_FILE: &str = "stm_download_history.json";
/// Default SMT history file name.
pub const SMT_HISTORY_FILE: &str = "smt_download_history.json";

/// Errors from history persistence.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("IO error on history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize history document for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl HistoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted projection of a successful [`DownloadResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub filename: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub download_date: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<&DownloadResult> for HistoryRecord {
    fn from(result: &DownloadResult) -> Self {
        Self {
            filename: result.filename.clone(),
            file_path: result.file_path.to_string_lossy().into_owned(),
            file_size: result.file_size,
            file_type: result.file_type.map(|t| t.as_str().to_string()),
            scheme: result.scheme.map(|s| s.code().to_string()),
            month: result.month,
            year: result.year,
            download_date: result.download_date.to_rfc3339(),
            url: result.url.clone(),
            metadata: result.metadata.clone(),
        }
    }
}

/// One family's history file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default, alias = "lastRun")]
    pub last_run: Option<String>,
    #[serde(default)]
    pub downloads: Vec<HistoryRecord>,
}

impl HistoryDocument {
    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.downloads.iter().any(|d| d.filename == filename)
    }
}

/// History file locations per family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPaths {
    pub rep: PathBuf,
    pub stm: PathBuf,
    pub smt: PathBuf,
}

impl Default for HistoryPaths {
    fn default() -> Self {
        Self {
            rep: PathBuf::from(REP_HISTORY_FILE),
            stm: PathBuf::from(STM_HISTORY_FILE),
            smt: PathBuf::from(SMT_HISTORY_FILE),
        }
    }
}

impl HistoryPaths {
    /// All three default file names placed under `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            rep: dir.join(REP_HISTORY_FILE),
            stm: dir.join(STM_HISTORY_FILE),
            smt: dir.join(SMT_HISTORY_FILE),
        }
    }

    #[must_use]
    pub fn for_family(&self, family: DownloadType) -> &Path {
        match family {
            DownloadType::Rep => &self.rep,
            DownloadType::Stm => &self.stm,
            DownloadType::Smt => &self.smt,
        }
    }
}

/// Thread-safe history store over the three family documents.
#[derive(Debug)]
pub struct HistoryStore {
    paths: HistoryPaths,
    lock: Mutex<()>,
}

impl HistoryStore {
    #[must_use]
    pub fn new(paths: HistoryPaths) -> Self {
        Self {
            paths,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn paths(&self) -> &HistoryPaths {
        &self.paths
    }

    #[must_use]
    pub fn path_for(&self, family: DownloadType) -> &Path {
        self.paths.for_family(family)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads a family document.
    ///
    /// A missing file yields an empty document. A corrupt live file falls back
    /// to its backup, and to an empty document if that is unusable too.
    #[must_use]
    pub fn load(&self, family: DownloadType) -> HistoryDocument {
        let path = self.path_for(family);
        match read_document(path) {
            Ok(Some(document)) => document,
            Ok(None) => HistoryDocument::default(),
            Err(reason) => {
                let backup = backup_path(path);
                warn!(path = %path.display(), %reason, "history file unreadable; trying backup");
                match read_document(&backup) {
                    Ok(Some(document)) => document,
                    _ => HistoryDocument::default(),
                }
            }
        }
    }

    /// Atomically replaces a family document.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the backup copy, temp write, or rename fails.
    pub fn save(
        &self,
        document: &HistoryDocument,
        family: DownloadType,
    ) -> Result<(), HistoryError> {
        let _guard = self.guard();
        self.stage_locked(document, family)?.commit()
    }

    /// Performs the backup and temp-file phases of a save without replacing
    /// the live file. Call [`StagedWrite::commit`] to finish.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the backup copy or temp write fails.
    pub fn stage(
        &self,
        document: &HistoryDocument,
        family: DownloadType,
    ) -> Result<StagedWrite, HistoryError> {
        let _guard = self.guard();
        self.stage_locked(document, family)
    }

    fn stage_locked(
        &self,
        document: &HistoryDocument,
        family: DownloadType,
    ) -> Result<StagedWrite, HistoryError> {
        let live = self.path_for(family).to_path_buf();
        if let Some(parent) = live.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }

        // A corrupt live file must not overwrite the last good backup.
        if let Ok(Some(_)) = read_document(&live) {
            let backup = backup_path(&live);
            fs::copy(&live, &backup).map_err(|e| HistoryError::io(&backup, e))?;
        } else if live.exists() {
            warn!(path = %live.display(), "history file unreadable; keeping existing backup");
        }

        let temp = temp_path(&live);
        let body = serde_json::to_vec_pretty(document).map_err(|source| HistoryError::Serialize {
            path: live.clone(),
            source,
        })?;
        let staged = StagedWrite {
            temp,
            live,
            committed: false,
        };
        fs::write(&staged.temp, body).map_err(|e| HistoryError::io(&staged.temp, e))?;
        Ok(staged)
    }

    /// True when `filename` is already recorded for `family`.
    #[must_use]
    pub fn exists(&self, filename: &str, family: DownloadType) -> bool {
        self.load(family).contains(filename)
    }

    /// Records a successful download and stamps `last_run`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] when the document cannot be saved.
    pub fn add(&self, result: &DownloadResult) -> Result<(), HistoryError> {
        let family = result.download_type;
        let _guard = self.guard();
        let mut document = self.load(family);
        document.downloads.push(HistoryRecord::from(result));
        document.last_run = Some(Local::now().to_rfc3339());
        self.stage_locked(&document, family)?.commit()?;
        debug!(filename = %result.filename, family = %family, "history record added");
        Ok(())
    }

    /// Stamps `last_run` without adding records (end-of-run save).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] when the document cannot be saved.
    pub fn touch_last_run(&self, family: DownloadType) -> Result<(), HistoryError> {
        let _guard = self.guard();
        let mut document = self.load(family);
        document.last_run = Some(Local::now().to_rfc3339());
        self.stage_locked(&document, family)?.commit()
    }

    /// Removes the record for `filename`. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] when the document cannot be saved.
    pub fn delete_record(
        &self,
        filename: &str,
        family: DownloadType,
    ) -> Result<bool, HistoryError> {
        let _guard = self.guard();
        let mut document = self.load(family);
        let before = document.downloads.len();
        document.downloads.retain(|d| d.filename != filename);
        if document.downloads.len() == before {
            return Ok(false);
        }
        self.stage_locked(&document, family)?.commit()?;
        Ok(true)
    }

    #[must_use]
    pub fn get_all(&self, family: DownloadType) -> Vec<HistoryRecord> {
        self.load(family).downloads
    }

    #[must_use]
    pub fn get_record(&self, filename: &str, family: DownloadType) -> Option<HistoryRecord> {
        self.load(family)
            .downloads
            .into_iter()
            .find(|d| d.filename == filename)
    }
}

/// A history save whose temp file is written but not yet moved into place.
///
/// Dropping it without [`commit`](Self::commit) removes the temp file and
/// leaves the live document untouched.
#[derive(Debug)]
#[must_use = "a staged write does nothing until committed"]
pub struct StagedWrite {
    temp: PathBuf,
    live: PathBuf,
    committed: bool,
}

impl StagedWrite {
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Renames the temp file over the live document.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Io`] if the rename fails; the temp file is removed.
    pub fn commit(mut self) -> Result<(), HistoryError> {
        fs::rename(&self.temp, &self.live).map_err(|e| HistoryError::io(&self.live, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// `<file>.backup` next to the live document.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".backup")
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

fn read_document(path: &Path) -> Result<Option<HistoryDocument>, String> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DownloadLink, FileType, Scheme};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> HistoryStore {
        HistoryStore::new(HistoryPaths::in_dir(dir.path()))
    }

    fn result(filename: &str, family: DownloadType) -> DownloadResult {
        let link = DownloadLink::new("https://portal/x", filename)
            .with_file_type(Some(FileType::Op))
            .with_scheme(Scheme::Ucs);
        DownloadResult::succeeded(&link, PathBuf::from("downloads").join(filename), family, 2048)
            .with_period(Some(1), Some(2569))
    }

    #[test]
    fn test_load_missing_file_is_empty_document() {
        let dir = TempDir::new().unwrap();
        let document = store(&dir).load(DownloadType::Rep);
        assert_eq!(document, HistoryDocument::default());
    }

    #[test]
    fn test_add_then_exists_per_family() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();

        assert!(store.exists("a.xls", DownloadType::Rep));
        assert!(!store.exists("a.xls", DownloadType::Stm));
        assert!(store.load(DownloadType::Rep).last_run.is_some());
        assert!(!store.paths().stm.exists(), "other families stay untouched");
    }

    #[test]
    fn test_record_projection_uses_plain_codes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();

        let record = store.get_record("a.xls", DownloadType::Rep).unwrap();
        assert_eq!(record.file_type.as_deref(), Some("OP"));
        assert_eq!(record.scheme.as_deref(), Some("ucs"));
        assert_eq!(record.month, Some(1));
        assert_eq!(record.year, Some(2569));
        assert_eq!(record.file_size, 2048);
    }

    #[test]
    fn test_second_save_writes_backup_of_previous_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();
        let first = fs::read_to_string(&store.paths().rep).unwrap();

        store.add(&result("b.xls", DownloadType::Rep)).unwrap();

        let backup = fs::read_to_string(backup_path(&store.paths().rep)).unwrap();
        assert_eq!(backup, first);
        assert_eq!(store.get_all(DownloadType::Rep).len(), 2);
    }

    #[test]
    fn test_interrupted_save_leaves_live_document_intact() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();
        let before = fs::read_to_string(&store.paths().rep).unwrap();

        let mut next = store.load(DownloadType::Rep);
        next.downloads.clear();
        let staged = store.stage(&next, DownloadType::Rep).unwrap();
        assert!(staged.temp_path().exists());
        let temp = staged.temp_path().to_path_buf();
        drop(staged);

        assert!(!temp.exists(), "abandoned temp file must be cleaned up");
        let live = fs::read_to_string(&store.paths().rep).unwrap();
        assert_eq!(live, before);
        let parsed: HistoryDocument = serde_json::from_str(&live).unwrap();
        assert_eq!(parsed.downloads.len(), 1);
        let backup = fs::read_to_string(backup_path(&store.paths().rep)).unwrap();
        assert_eq!(backup, before);
    }

    #[test]
    fn test_corrupt_live_file_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Stm)).unwrap();
        store.add(&result("b.xls", DownloadType::Stm)).unwrap();
        fs::write(&store.paths().stm, b"{ truncated").unwrap();

        let document = store.load(DownloadType::Stm);
        assert_eq!(document.downloads.len(), 1);
        assert_eq!(document.downloads[0].filename, "a.xls");
    }

    #[test]
    fn test_save_over_corrupt_live_file_keeps_good_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();
        store.add(&result("b.xls", DownloadType::Rep)).unwrap();
        fs::write(&store.paths().rep, b"{ truncated").unwrap();

        let recovered = store.load(DownloadType::Rep);
        assert_eq!(recovered.downloads.len(), 1);
        drop(store.stage(&recovered, DownloadType::Rep).unwrap());

        let backup = fs::read_to_string(backup_path(&store.paths().rep)).unwrap();
        let parsed: HistoryDocument = serde_json::from_str(&backup).unwrap();
        assert_eq!(parsed.downloads.len(), 1);
        assert_eq!(parsed.downloads[0].filename, "a.xls");
        assert!(store.exists("a.xls", DownloadType::Rep));
    }

    #[test]
    fn test_delete_record() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(&result("a.xls", DownloadType::Rep)).unwrap();

        assert!(store.delete_record("a.xls", DownloadType::Rep).unwrap());
        assert!(!store.delete_record("a.xls", DownloadType::Rep).unwrap());
        assert!(!store.exists("a.xls", DownloadType::Rep));
    }

    #[test]
    fn test_reads_camel_case_last_run_and_keeps_thai_unescaped() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(
            &store.paths().stm,
            r#"{"lastRun": "2026-01-01T00:00:00+07:00", "downloads": []}"#,
        )
        .unwrap();
        let mut document = store.load(DownloadType::Stm);
        assert_eq!(document.last_run.as_deref(), Some("2026-01-01T00:00:00+07:00"));

        let mut record = HistoryRecord::from(&result("STM_1.xls", DownloadType::Stm));
        record
            .metadata
            .insert("stmt_type".to_string(), "ผู้ป่วยใน".into());
        document.downloads.push(record);
        store.save(&document, DownloadType::Stm).unwrap();

        let raw = fs::read_to_string(&store.paths().stm).unwrap();
        assert!(raw.contains("ผู้ป่วยใน"));
        assert!(raw.contains("\"last_run\""));
    }

    #[test]
    fn test_touch_last_run_creates_document() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.touch_last_run(DownloadType::Smt).unwrap();
        assert!(store.paths().smt.exists());
        assert!(store.load(DownloadType::Smt).last_run.is_some());
    }
}
