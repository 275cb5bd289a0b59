//! Append-only activity log consumed by live tailing readers.
//!
//! The download engine reports progress through the [`LogSink`] trait. The
//! file-backed [`ActivityLog`] writes one JSON object per line and mirrors every
//! entry to `tracing`, so a run is visible both on the console and to any
//! process following the log file.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid log level: {value}")),
        }
    }
}

/// One line of the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// Destination for engine progress messages.
///
/// Implementations must never fail the caller: a sink that cannot record an
/// entry reports the problem itself and returns.
pub trait LogSink: Send + Sync {
    fn write(&self, message: &str, level: LogLevel, source: &str);

    fn info(&self, message: &str, source: &str) {
        self.write(message, LogLevel::Info, source);
    }

    fn success(&self, message: &str, source: &str) {
        self.write(message, LogLevel::Success, source);
    }

    fn warning(&self, message: &str, source: &str) {
        self.write(message, LogLevel::Warning, source);
    }

    fn error(&self, message: &str, source: &str) {
        self.write(message, LogLevel::Error, source);
    }
}

fn emit_tracing(message: &str, level: LogLevel, source: &str) {
    match level {
        LogLevel::Info => info!(source, "{message}"),
        LogLevel::Success => info!(source, outcome = "success", "{message}"),
        LogLevel::Warning => warn!(source, "{message}"),
        LogLevel::Error => error!(source, "{message}"),
    }
}

/// Sink that only forwards to `tracing` (used for quiet runs and tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn write(&self, message: &str, level: LogLevel, source: &str) {
        emit_tracing(message, level, source);
    }
}

/// Errors from reading the activity log.
#[derive(Debug, thiserror::Error)]
pub enum ActivityLogError {
    #[error("IO error on activity log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ActivityLogError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// JSON-lines activity log file.
#[derive(Debug)]
pub struct ActivityLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ActivityLog {
    /// Opens (without truncating) the log at `path`, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityLogError::Io`] when the parent directory cannot be created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ActivityLogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ActivityLogError::io(parent, e))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &LogEntry) -> Result<(), String> {
        let mut line = serde_json::to_string(entry).map_err(|e| e.to_string())?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| e.to_string())?;
        file.write_all(line.as_bytes()).map_err(|e| e.to_string())
    }

    /// Returns up to the last `lines` entries, optionally filtered by level.
    ///
    /// The level filter applies after the window is taken, so fewer than
    /// `lines` entries may come back.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityLogError::Io`] on read failures other than a missing file.
    pub fn recent(
        &self,
        lines: usize,
        level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, ActivityLogError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ActivityLogError::io(&self.path, e)),
        };

        let all = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ActivityLogError::io(&self.path, e))?;
        let start = all.len().saturating_sub(lines);

        Ok(all[start..]
            .iter()
            .filter_map(|line| parse_line(line))
            .filter(|entry| level.is_none_or(|wanted| entry.level == wanted))
            .collect())
    }

    /// Recent error entries.
    ///
    /// # Errors
    ///
    /// See [`recent`](Self::recent).
    pub fn errors(&self, lines: usize) -> Result<Vec<LogEntry>, ActivityLogError> {
        self.recent(lines, Some(LogLevel::Error))
    }

    /// Truncates the log to an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityLogError::Io`] when the file cannot be recreated.
    pub fn clear(&self) -> Result<(), ActivityLogError> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        File::create(&self.path)
            .map(|_| ())
            .map_err(|e| ActivityLogError::io(&self.path, e))
    }

    /// Starts a follower positioned at the current end of the file.
    #[must_use]
    pub fn tail(&self) -> LogTail {
        let position = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        LogTail {
            path: self.path.clone(),
            position,
        }
    }
}

impl LogSink for ActivityLog {
    fn write(&self, message: &str, level: LogLevel, source: &str) {
        emit_tracing(message, level, source);

        let entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            level,
            source: source.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.append(&entry) {
            error!(path = %self.path.display(), error = %e, "failed to append activity log entry");
        }
    }
}

fn parse_line(line: &str) -> Option<LogEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Incremental reader over entries appended after it was created.
///
/// Readers never take the writer lock; a partially written last line is left
/// for the next poll.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    position: u64,
}

impl LogTail {
    /// Returns entries appended since the previous poll.
    ///
    /// A file that shrank (cleared or rotated) is re-read from the start.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityLogError::Io`] on read failures other than a missing file.
    pub fn poll(&mut self) -> Result<Vec<LogEntry>, ActivityLogError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ActivityLogError::io(&self.path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| ActivityLogError::io(&self.path, e))?
            .len();
        if len < self.position {
            self.position = 0;
        }
        if len == self.position {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.position))
            .map_err(|e| ActivityLogError::io(&self.path, e))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| ActivityLogError::io(&self.path, e))?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            self.position += read as u64;
            if let Some(entry) = parse_line(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_appends_json_line_with_unescaped_thai() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().join("logs/realtime.log")).unwrap();

        log.write("ผู้ป่วยใน ready", LogLevel::Info, "stm");

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.contains("ผู้ป่วยใน"), "non-ASCII must be written as-is: {raw}");
        assert_eq!(raw.lines().count(), 1);
        let entry: LogEntry = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.source, "stm");
    }

    #[test]
    fn test_recent_returns_window_and_filters_level() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().join("a.log")).unwrap();
        for i in 0..5 {
            log.info(&format!("line {i}"), "rep");
        }
        log.error("boom", "rep");

        let recent = log.recent(3, None).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "line 3");

        let errors = log.errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
    }

    #[test]
    fn test_recent_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "not json\n\n").unwrap();
        let log = ActivityLog::new(&path).unwrap();
        log.warning("kept", "system");

        let recent = log.recent(10, None).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_recent_on_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().join("missing.log")).unwrap();
        assert!(log.recent(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_tail_sees_only_new_entries_and_survives_clear() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().join("a.log")).unwrap();
        log.info("before", "system");

        let mut tail = log.tail();
        assert!(tail.poll().unwrap().is_empty());

        log.success("after", "rep");
        let fresh = tail.poll().unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].message, "after");
        assert!(tail.poll().unwrap().is_empty());

        log.clear().unwrap();
        log.info("restarted", "system");
        let fresh = tail.poll().unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].message, "restarted");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
