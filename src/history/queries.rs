//! Read-side queries over a family document.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Serialize;

use super::{HistoryRecord, HistoryStore};
use crate::model::{DownloadType, Scheme};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Aggregate numbers for one family.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub total_files: usize,
    pub total_size: u64,
    pub total_size_formatted: String,
    pub last_run: Option<String>,
    pub by_file_type: BTreeMap<String, usize>,
    pub by_scheme: BTreeMap<String, usize>,
}

/// A year/month that has at least one recorded download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableDate {
    pub month: u32,
    pub year: i32,
    pub count: usize,
    pub label: String,
}

/// Human-readable byte size, e.g. `1.5 KB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

fn newest_first(records: &mut [HistoryRecord]) {
    records.sort_by_key(|r| Reverse(r.download_date.clone()));
}

impl HistoryStore {
    #[must_use]
    pub fn statistics(&self, family: DownloadType) -> HistoryStatistics {
        let document = self.load(family);
        let mut stats = HistoryStatistics {
            total_files: document.downloads.len(),
            last_run: document.last_run.clone(),
            ..HistoryStatistics::default()
        };

        for record in &document.downloads {
            stats.total_size += record.file_size;
            if let Some(file_type) = record.file_type.as_deref().filter(|t| !t.is_empty()) {
                *stats.by_file_type.entry(file_type.to_string()).or_default() += 1;
            }
            let scheme = record.scheme.as_deref().unwrap_or(Scheme::Ucs.code());
            *stats.by_scheme.entry(scheme.to_string()).or_default() += 1;
        }
        stats.total_size_formatted = format_size(stats.total_size);
        stats
    }

    /// Records for one period, optionally narrowed to a scheme, newest first.
    #[must_use]
    pub fn by_date(
        &self,
        family: DownloadType,
        month: u32,
        year: i32,
        scheme: Option<Scheme>,
    ) -> Vec<HistoryRecord> {
        let mut records: Vec<_> = self
            .load(family)
            .downloads
            .into_iter()
            .filter(|r| r.month == Some(month) && r.year == Some(year))
            .filter(|r| scheme.is_none_or(|s| record_scheme(r) == s.code()))
            .collect();
        newest_first(&mut records);
        records
    }

    #[must_use]
    pub fn by_scheme(&self, family: DownloadType, scheme: Scheme) -> Vec<HistoryRecord> {
        let mut records: Vec<_> = self
            .load(family)
            .downloads
            .into_iter()
            .filter(|r| record_scheme(r) == scheme.code())
            .collect();
        newest_first(&mut records);
        records
    }

    /// The `limit` most recent downloads.
    #[must_use]
    pub fn latest(&self, family: DownloadType, limit: usize) -> Vec<HistoryRecord> {
        let mut records = self.load(family).downloads;
        newest_first(&mut records);
        records.truncate(limit);
        records
    }

    /// Distinct periods present in history, newest first.
    #[must_use]
    pub fn available_dates(&self, family: DownloadType) -> Vec<AvailableDate> {
        let mut counts: BTreeMap<(i32, u32), usize> = BTreeMap::new();
        for record in self.load(family).downloads {
            if let (Some(month), Some(year)) = (record.month, record.year) {
                *counts.entry((year, month)).or_default() += 1;
            }
        }

        counts
            .into_iter()
            .rev()
            .map(|((year, month), count)| AvailableDate {
                month,
                year,
                count,
                label: period_label(month, year),
            })
            .collect()
    }
}

fn record_scheme(record: &HistoryRecord) -> &str {
    record.scheme.as_deref().unwrap_or(Scheme::Ucs.code())
}

fn period_label(month: u32, year: i32) -> String {
    let name = usize::try_from(month)
        .ok()
        .and_then(|m| m.checked_sub(1))
        .and_then(|i| MONTH_NAMES.get(i))
        .copied()
        .unwrap_or("Unknown");
    format!("{name} {year}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::history::{HistoryDocument, HistoryPaths};
    use crate::model::Metadata;
    use tempfile::TempDir;

    fn record(
        filename: &str,
        size: u64,
        scheme: Option<&str>,
        period: (u32, i32),
        date: &str,
    ) -> HistoryRecord {
        HistoryRecord {
            filename: filename.to_string(),
            file_path: format!("downloads/{filename}"),
            file_size: size,
            file_type: Some("OP".to_string()),
            scheme: scheme.map(ToString::to_string),
            month: Some(period.0),
            year: Some(period.1),
            download_date: date.to_string(),
            url: None,
            metadata: Metadata::new(),
        }
    }

    fn seeded() -> (TempDir, HistoryStore) {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(HistoryPaths::in_dir(dir.path()));
        let document = HistoryDocument {
            last_run: Some("2026-02-01T10:00:00+07:00".to_string()),
            downloads: vec![
                record("a.xls", 1024, Some("ucs"), (1, 2569), "2026-01-05T10:00:00+07:00"),
                record("b.xls", 512, None, (1, 2569), "2026-01-06T10:00:00+07:00"),
                record("c.xls", 512, Some("ofc"), (12, 2568), "2025-12-20T10:00:00+07:00"),
            ],
        };
        store.save(&document, DownloadType::Rep).unwrap();
        (dir, store)
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_statistics_counts_missing_scheme_as_ucs() {
        let (_dir, store) = seeded();
        let stats = store.statistics(DownloadType::Rep);

        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size, 2048);
        assert_eq!(stats.total_size_formatted, "2.0 KB");
        assert_eq!(stats.by_scheme.get("ucs"), Some(&2));
        assert_eq!(stats.by_scheme.get("ofc"), Some(&1));
        assert_eq!(stats.by_file_type.get("OP"), Some(&3));
        assert!(stats.last_run.is_some());
    }

    #[test]
    fn test_statistics_leaves_untyped_records_out_of_type_breakdown() {
        let (_dir, store) = seeded();
        let mut document = store.load(DownloadType::Rep);
        document.downloads[1].file_type = None;
        store.save(&document, DownloadType::Rep).unwrap();

        let stats = store.statistics(DownloadType::Rep);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.by_file_type.len(), 1);
        assert_eq!(stats.by_file_type.get("OP"), Some(&2));
    }

    #[test]
    fn test_by_date_filters_and_sorts_newest_first() {
        let (_dir, store) = seeded();
        let records = store.by_date(DownloadType::Rep, 1, 2569, None);
        let names: Vec<_> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["b.xls", "a.xls"]);

        let ucs_only = store.by_date(DownloadType::Rep, 12, 2568, Some(Scheme::Ucs));
        assert!(ucs_only.is_empty());
    }

    #[test]
    fn test_latest_truncates() {
        let (_dir, store) = seeded();
        let latest = store.latest(DownloadType::Rep, 1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].filename, "b.xls");
    }

    #[test]
    fn test_available_dates_newest_first() {
        let (_dir, store) = seeded();
        let dates = store.available_dates(DownloadType::Rep);
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].label, "January 2569");
        assert_eq!(dates[0].count, 2);
        assert_eq!(dates[1].label, "December 2568");
    }

    #[test]
    fn test_by_scheme() {
        let (_dir, store) = seeded();
        assert_eq!(store.by_scheme(DownloadType::Rep, Scheme::Ofc).len(), 1);
        assert_eq!(store.by_scheme(DownloadType::Rep, Scheme::Sss).len(), 0);
    }
}
