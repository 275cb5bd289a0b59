//! UCS statement (STM) discovery.
//!
//! The statement list is an AJAX fragment. Each row's download button calls
//! `downloadBill(...)` with seven quoted arguments, which are captured into
//! [`StatementParams`] and later replayed as a form POST.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{
    FamilyDownloader, PortalSession, STATEMENT_DOWNLOAD_PATH, STATEMENT_LIST_PATH,
    STATEMENT_VIEW_PATH, SessionError, compile_static_regex, compile_static_selector,
    current_fiscal_year, element_text,
};
use crate::activity_log::LogSink;
use crate::model::{
    BUDDHIST_ERA_OFFSET, DownloadLink, DownloadResult, DownloadType, FileType, Metadata, Scheme,
    StatementParams,
};
use crate::transfer::TransferEngine;

static DETAIL_TABLE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("table#table-detail"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("table"));
static TBODY: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tbody"));
static ROW: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("td"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));
static DOWNLOAD_BILL: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"downloadBill\('([^']*)',\s*'([^']*)',\s*'([^']*)',\s*'([^']*)',\s*'([^']*)',\s*'([^']*)',\s*'([^']*)'\)",
    )
});

/// Rows shorter than this are headers or spacers.
const MIN_CELLS: usize = 9;
const SERVICE_MONTH_CELL: usize = 2;
const STATEMENT_TYPE_CELL: usize = 3;
const STATEMENT_NO_CELL: usize = 6;

const INPATIENT_TH: &str = "ผู้ป่วยใน";
const OUTPATIENT_TH: &str = "ผู้ป่วยนอก";

/// Patient-type filter for the statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersonType {
    Ip,
    Op,
    #[default]
    All,
}

impl PersonType {
    /// Value of the `person_type` query parameter.
    #[must_use]
    pub fn form_value(self) -> &'static str {
        match self {
            Self::Ip => "2",
            Self::Op => "1",
            Self::All => "",
        }
    }
}

impl fmt::Display for PersonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ip => "IP",
            Self::Op => "OP",
            Self::All => "All",
        })
    }
}

impl FromStr for PersonType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "op" => Ok(Self::Op),
            "all" => Ok(Self::All),
            _ => Err(format!("invalid person type: {value} (expected IP, OP, or All)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StmCriteria {
    /// Buddhist Era fiscal year (October to September).
    pub fiscal_year: i32,
    /// `None` lists every month of the fiscal year.
    pub month: Option<u32>,
    pub person_type: PersonType,
}

impl Default for StmCriteria {
    fn default() -> Self {
        Self {
            fiscal_year: current_fiscal_year(),
            month: None,
            person_type: PersonType::All,
        }
    }
}

impl StmCriteria {
    #[must_use]
    pub fn new(fiscal_year: Option<i32>, month: Option<u32>, person_type: PersonType) -> Self {
        Self {
            fiscal_year: fiscal_year.unwrap_or_else(current_fiscal_year),
            month,
            person_type,
        }
    }

    /// Gregorian year the list endpoint expects.
    #[must_use]
    pub fn gregorian_year(&self) -> i32 {
        self.fiscal_year - BUDDHIST_ERA_OFFSET
    }
}

/// Statement links plus a note for every row that had to be dropped.
#[derive(Debug, Default)]
pub struct ParsedStatements {
    pub links: Vec<DownloadLink>,
    pub skipped_rows: Vec<String>,
}

/// Classifies a statement by its type column.
#[must_use]
pub fn classify_statement_type(statement_type: &str) -> Option<FileType> {
    let upper = statement_type.to_uppercase();
    if statement_type.contains(INPATIENT_TH) || upper.contains("IP") {
        Some(FileType::StmIp)
    } else if statement_type.contains(OUTPATIENT_TH) || upper.contains("OP") {
        Some(FileType::StmOp)
    } else {
        None
    }
}

/// Parses the `downloadBill(...)` call of a statement row.
#[must_use]
pub fn parse_download_action(onclick: &str) -> Option<StatementParams> {
    let caps = DOWNLOAD_BILL.captures(onclick)?;
    let arg = |i: usize| caps.get(i).map_or_else(String::new, |m| m.as_str().to_string());
    Some(StatementParams {
        document_no: arg(1),
        person_type: arg(2),
        hcode: arg(3),
        hname: arg(4),
        province_name: arg(5),
        datesend_from: arg(6),
        datesend_to: arg(7),
    })
}

fn statement_metadata(
    params: &StatementParams,
    statement_no: String,
    service_month: String,
    statement_type: String,
) -> Metadata {
    let form: Metadata = params
        .form_fields()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.into()))
        .collect();

    let mut metadata = Metadata::new();
    metadata.insert(StatementParams::METADATA_KEY.to_string(), form.into());
    metadata.insert("stmt_no".to_string(), statement_no.into());
    metadata.insert("service_month".to_string(), service_month.into());
    metadata.insert("stmt_type".to_string(), statement_type.into());
    metadata
}

/// Parses the statement list fragment.
///
/// Uses `table#table-detail`, or the first table when that id is absent.
/// Every link points at `download_url`; the row is identified by its params.
#[must_use]
pub fn parse_statement_rows(html: &str, download_url: &Url) -> ParsedStatements {
    let document = Html::parse_document(html);
    let mut parsed = ParsedStatements::default();

    let Some(table) = document
        .select(&DETAIL_TABLE)
        .next()
        .or_else(|| document.select(&TABLE).next())
    else {
        return parsed;
    };
    let rows: Vec<ElementRef<'_>> = match table.select(&TBODY).next() {
        Some(tbody) => tbody.select(&ROW).collect(),
        None => table.select(&ROW).collect(),
    };

    for row in rows {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
        if cells.len() < MIN_CELLS {
            continue;
        }
        let statement_no = element_text(cells[STATEMENT_NO_CELL]);
        let statement_type = element_text(cells[STATEMENT_TYPE_CELL]);
        let service_month = element_text(cells[SERVICE_MONTH_CELL]);

        let Some(anchor) = cells.last().and_then(|cell| cell.select(&ANCHOR).next()) else {
            parsed
                .skipped_rows
                .push(format!("statement {statement_no}: no download link"));
            continue;
        };
        let onclick = anchor.value().attr("onclick").unwrap_or_default();
        let Some(params) = parse_download_action(onclick) else {
            parsed
                .skipped_rows
                .push(format!("statement {statement_no}: unrecognized download action"));
            continue;
        };

        let filename = format!("STM_{}.xls", params.document_no);
        let metadata =
            statement_metadata(&params, statement_no, service_month, statement_type.clone());
        parsed.links.push(
            DownloadLink::new(download_url.as_str(), filename)
                .with_file_type(classify_statement_type(&statement_type))
                .with_scheme(Scheme::Ucs)
                .with_metadata(metadata),
        );
    }
    parsed
}

/// Statement downloader for one fiscal year.
#[derive(Debug)]
pub struct StmDownloader {
    criteria: StmCriteria,
    engine: TransferEngine,
}

impl StmDownloader {
    #[must_use]
    pub fn new(criteria: StmCriteria, engine: TransferEngine) -> Self {
        Self { criteria, engine }
    }

    fn view_url(&self, session: &PortalSession) -> Result<Url, SessionError> {
        let mut url = session.endpoint().join(STATEMENT_VIEW_PATH)?;
        let month = self.criteria.month.map(|m| m.to_string()).unwrap_or_default();
        url.query_pairs_mut()
            .append_pair("PAGE_HEAD", "")
            .append_pair("year", &self.criteria.gregorian_year().to_string())
            .append_pair("month", &month)
            .append_pair("person_type", self.criteria.person_type.form_value())
            .append_pair("period_no", "");
        Ok(url)
    }

    async fn fetch_listing(
        &self,
        session: &PortalSession,
    ) -> Result<ParsedStatements, SessionError> {
        session
            .prime(session.endpoint().join(STATEMENT_LIST_PATH)?)
            .await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/html, */*; q=0.01"));

        let html = session.get_page(self.view_url(session)?, headers).await?;
        let download_url = session.endpoint().join(STATEMENT_DOWNLOAD_PATH)?;
        Ok(parse_statement_rows(&html, &download_url))
    }
}

#[async_trait]
impl FamilyDownloader for StmDownloader {
    fn download_type(&self) -> DownloadType {
        DownloadType::Stm
    }

    fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Starting STM download for fiscal year {}",
            self.criteria.fiscal_year
        )];
        if let Some(month) = self.criteria.month {
            lines.push(format!("Month: {month}"));
        }
        lines.push(format!("Person type: {}", self.criteria.person_type));
        lines.push("Scheme: UCS (Statement only available for UCS)".to_string());
        lines
    }

    fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    async fn discover(&self, session: &PortalSession) -> Vec<DownloadLink> {
        let log = self.engine.log();
        let source = DownloadType::Stm.as_str();
        log.info(
            &format!(
                "Fetching STM statement list for fiscal year {}...",
                self.criteria.fiscal_year
            ),
            source,
        );

        match self.fetch_listing(session).await {
            Ok(parsed) => {
                for reason in &parsed.skipped_rows {
                    log.warning(&format!("Warning: Error parsing row: {reason}"), source);
                }
                log.info(&format!("Found {} STM files", parsed.links.len()), source);
                parsed.links
            }
            Err(e) => {
                log.error(&format!("Error fetching STM links: {e}"), source);
                Vec::new()
            }
        }
    }

    async fn fetch(&self, session: &PortalSession, link: &DownloadLink) -> DownloadResult {
        self.engine
            .fetch_statement(session.client(), link, DownloadType::Stm)
            .await
            .with_period(self.criteria.month, Some(self.criteria.fiscal_year))
    }
}
