//! NHSO E-Claim portal: session, link discovery, and the per-family downloaders.
//!
//! The portal has no API. Everything here speaks its server-rendered HTML and
//! form endpoints, so the paths and parameter names below are a fixed external
//! protocol rather than configuration.

pub mod rep;
pub mod session;
pub mod stm;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use scraper::Selector;

use crate::model::{BUDDHIST_ERA_OFFSET, DownloadLink, DownloadResult, DownloadType};
use crate::transfer::TransferEngine;

pub use rep::{RepCriteria, RepDownloader};
pub use session::{PortalEndpoint, PortalSession, SessionError};
pub use stm::{PersonType, StmCriteria, StmDownloader};

/// Production portal origin.
pub const DEFAULT_BASE_URL: &str = "https://eclaim.nhso.go.th";

pub const LOGIN_PATH: &str = "/webComponent/login/LoginAction.do";
pub const VALIDATION_PATH: &str = "/webComponent/validation/ValidationMainAction.do";
pub const STATEMENT_LIST_PATH: &str = "/webComponent/ucs/statementUCSAction.do";
pub const STATEMENT_VIEW_PATH: &str = "/webComponent/ucs/statementUCSViewAction.do";
pub const STATEMENT_DOWNLOAD_PATH: &str = "/webComponent/ucs/statementUCSDownloadAction.do";

/// One download family against the portal.
///
/// Implementations hold only their immutable criteria and the transfer
/// engine; all per-run state lives in the orchestrator.
#[async_trait]
pub trait FamilyDownloader: Send + Sync {
    fn download_type(&self) -> DownloadType;

    /// Lines logged when a run starts.
    fn describe(&self) -> Vec<String>;

    fn engine(&self) -> &TransferEngine;

    /// Lists every file the portal offers for this downloader's criteria.
    /// Discovery failures are logged and yield fewer (or zero) links.
    async fn discover(&self, session: &PortalSession) -> Vec<DownloadLink>;

    /// Transfers one discovered link.
    async fn fetch(&self, session: &PortalSession, link: &DownloadLink) -> DownloadResult;
}

/// Current Buddhist Era year.
#[must_use]
pub fn current_be_year() -> i32 {
    Local::now().year() + BUDDHIST_ERA_OFFSET
}

/// Fiscal year (BE) containing `date`. Fiscal years start in October.
#[must_use]
pub fn fiscal_year_for(date: NaiveDate) -> i32 {
    let be_year = date.year() + BUDDHIST_ERA_OFFSET;
    if date.month() >= 10 {
        be_year + 1
    } else {
        be_year
    }
}

#[must_use]
pub fn current_fiscal_year() -> i32 {
    fiscal_year_for(Local::now().date_naive())
}

pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

pub(crate) fn compile_static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e}"))
}

/// Element text with every text node trimmed and joined.
pub(crate) fn element_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiscal_year_rolls_over_in_october() {
        let september = NaiveDate::from_ymd_opt(2025, 9, 30);
        let october = NaiveDate::from_ymd_opt(2025, 10, 1);
        assert_eq!(september.map(fiscal_year_for), Some(2568));
        assert_eq!(october.map(fiscal_year_for), Some(2569));
    }

    #[test]
    fn test_element_text_joins_trimmed_pieces() {
        let html = scraper::Html::parse_document(
            "<table><tr><td>  ผู้ป่วย <b> ใน </b>\n</td></tr></table>",
        );
        let td = compile_static_selector("td");
        let text = html.select(&td).next().map(element_text);
        assert_eq!(text.as_deref(), Some("ผู้ป่วยใน"));
    }
}
