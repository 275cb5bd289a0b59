//! Timeouts and validation thresholds for portal traffic.

use std::time::Duration;

/// HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Login, listing, and validation page requests.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Streamed report file GET.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Statement form POST; the portal renders the workbook on demand.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bodies below this size are rejected as error pages.
pub const MIN_FILE_SIZE: u64 = 100;

/// HTML bodies below this size are treated as portal error pages.
pub const HTML_ERROR_PAGE_MAX: u64 = 1000;
