//! Value types shared by discovery, transfer, history, and the run orchestrator.
//!
//! A [`DownloadLink`] is produced by a discovery pass and consumed once by the
//! transfer engine, which answers with a [`DownloadResult`]. The orchestrator
//! folds results into a [`DownloadProgress`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Open key/value map carried from discovery through to history records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Sentinel stored in [`DownloadResult::error`] when a file was skipped by deduplication.
pub const SKIPPED: &str = "skipped";

/// Offset between the Buddhist Era calendar used by the portal and the Gregorian calendar.
pub const BUDDHIST_ERA_OFFSET: i32 = 543;

/// Download family. Each family owns an independent history document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    /// Representative files (OP/IP/ORF and appeals).
    Rep,
    /// UCS payment statements.
    Stm,
    /// Budget exports.
    Smt,
}

impl DownloadType {
    /// Returns the lowercase code used as log source and history family key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rep => "rep",
            Self::Stm => "stm",
            Self::Smt => "smt",
        }
    }
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rep" => Ok(Self::Rep),
            "stm" => Ok(Self::Stm),
            "smt" => Ok(Self::Smt),
            _ => Err(format!("invalid download type: {value}")),
        }
    }
}

/// Kind of file, derived from the filename or the statement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "OP")]
    Op,
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "ORF")]
    Orf,
    #[serde(rename = "IP_APPEAL")]
    IpAppeal,
    #[serde(rename = "IP_APPEAL_NHSO")]
    IpAppealNhso,
    #[serde(rename = "STM_IP")]
    StmIp,
    #[serde(rename = "STM_OP")]
    StmOp,
}

impl FileType {
    /// Returns the upper-case code persisted in history records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Op => "OP",
            Self::Ip => "IP",
            Self::Orf => "ORF",
            Self::IpAppeal => "IP_APPEAL",
            Self::IpAppealNhso => "IP_APPEAL_NHSO",
            Self::StmIp => "STM_IP",
            Self::StmOp => "STM_OP",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insurance scheme the portal segments its data by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Universal Coverage Scheme.
    Ucs,
    /// Civil Servant Medical Benefit.
    Ofc,
    /// Social Security Scheme.
    Sss,
    /// Local Government Officers.
    Lgo,
    /// National Health Security.
    Nhs,
    /// Bangkok Metropolitan.
    Bkk,
    /// Border Medical Treatment.
    Bmt,
    /// State Railway of Thailand.
    Srt,
}

impl Scheme {
    /// All schemes in portal order.
    pub const ALL: [Scheme; 8] = [
        Self::Ucs,
        Self::Ofc,
        Self::Sss,
        Self::Lgo,
        Self::Nhs,
        Self::Bkk,
        Self::Bmt,
        Self::Srt,
    ];

    /// Returns the lowercase code sent to the portal as `maininscl`.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Ucs => "ucs",
            Self::Ofc => "ofc",
            Self::Sss => "sss",
            Self::Lgo => "lgo",
            Self::Nhs => "nhs",
            Self::Bkk => "bkk",
            Self::Bmt => "bmt",
            Self::Srt => "srt",
        }
    }

    /// Upper-case label for log lines.
    #[must_use]
    pub fn label(self) -> String {
        self.code().to_ascii_uppercase()
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.code() == lowered)
            .ok_or_else(|| format!("invalid scheme code: {value}"))
    }
}

/// The seven positional arguments of a statement row's `downloadBill(...)` action.
///
/// They are replayed verbatim as the form body of the statement download POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementParams {
    pub document_no: String,
    pub person_type: String,
    pub hcode: String,
    pub hname: String,
    pub province_name: String,
    #[serde(default)]
    pub datesend_from: String,
    #[serde(default)]
    pub datesend_to: String,
}

impl StatementParams {
    /// Metadata key the parameters are stored under on a [`DownloadLink`].
    pub const METADATA_KEY: &'static str = "download_params";

    /// Form fields in the order the portal's own form submits them.
    #[must_use]
    pub fn form_fields(&self) -> [(&'static str, &str); 7] {
        [
            ("document_no", &self.document_no),
            ("person_type", &self.person_type),
            ("hcode", &self.hcode),
            ("hname", &self.hname),
            ("province_name", &self.province_name),
            ("datesend_from", &self.datesend_from),
            ("datesend_to", &self.datesend_to),
        ]
    }
}

/// A discoverable remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    pub filename: String,
    pub file_type: Option<FileType>,
    pub scheme: Option<Scheme>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DownloadLink {
    #[must_use]
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            file_type: None,
            scheme: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_file_type(mut self, file_type: Option<FileType>) -> Self {
        self.file_type = file_type;
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Typed view of the statement form parameters, if present and well-formed.
    #[must_use]
    pub fn statement_params(&self) -> Option<StatementParams> {
        self.metadata
            .get(StatementParams::METADATA_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Outcome of one transfer attempt sequence for a single link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadResult {
    pub success: bool,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub download_type: DownloadType,
    pub file_type: Option<FileType>,
    pub scheme: Option<Scheme>,
    pub month: Option<u32>,
    /// Buddhist Era year.
    pub year: Option<i32>,
    pub error: Option<String>,
    pub url: Option<String>,
    pub download_date: DateTime<Local>,
    pub metadata: Metadata,
}

impl DownloadResult {
    fn from_link(
        link: &DownloadLink,
        file_path: PathBuf,
        download_type: DownloadType,
        success: bool,
    ) -> Self {
        Self {
            success,
            filename: link.filename.clone(),
            file_path,
            file_size: 0,
            download_type,
            file_type: link.file_type,
            scheme: link.scheme,
            month: None,
            year: None,
            error: None,
            url: None,
            download_date: Local::now(),
            metadata: Metadata::new(),
        }
    }

    /// A completed download of `file_size` bytes.
    #[must_use]
    pub fn succeeded(
        link: &DownloadLink,
        file_path: PathBuf,
        download_type: DownloadType,
        file_size: u64,
    ) -> Self {
        let mut result = Self::from_link(link, file_path, download_type, true);
        result.file_size = file_size;
        result.url = Some(link.url.clone());
        result
    }

    /// A deduplication hit; not a failure.
    #[must_use]
    pub fn skipped(link: &DownloadLink, file_path: PathBuf, download_type: DownloadType) -> Self {
        let mut result = Self::from_link(link, file_path, download_type, false);
        result.error = Some(SKIPPED.to_string());
        result
    }

    /// A failed transfer carrying the last error message.
    #[must_use]
    pub fn failed(
        link: &DownloadLink,
        file_path: PathBuf,
        download_type: DownloadType,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::from_link(link, file_path, download_type, false);
        result.error = Some(error.into());
        result
    }

    #[must_use]
    pub fn with_period(mut self, month: Option<u32>, year: Option<i32>) -> Self {
        self.month = month;
        self.year = year;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// True when the link was skipped because history already had it.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(SKIPPED)
    }

    /// True when the transfer failed (skips are not failures).
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.success && self.error.is_some() && !self.is_skipped()
    }
}

/// Run-scoped counters, owned by the orchestrator for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub current_file: Option<String>,
    pub is_running: bool,
    pub started_at: Option<DateTime<Local>>,
}

impl DownloadProgress {
    /// Starts tracking a run over `total` links.
    #[must_use]
    pub fn start(total: usize) -> Self {
        Self {
            total,
            is_running: true,
            started_at: Some(Local::now()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.downloaded + self.skipped + self.errors
    }

    /// Percentage of links handled so far; `0.0` for an empty run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed() as f64 / self.total as f64 * 100.0
    }

    /// Counts one result into exactly one of the three buckets.
    pub fn record(&mut self, result: &DownloadResult) {
        if result.success {
            self.downloaded += 1;
        } else if result.is_skipped() {
            self.skipped += 1;
        } else {
            self.errors += 1;
        }
    }

    pub fn finish(&mut self) {
        self.is_running = false;
        self.current_file = None;
    }
}
