//! Report (REP) discovery: per-scheme validation pages with "download excel" anchors.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Datelike, Local};
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{
    FamilyDownloader, PortalSession, VALIDATION_PATH, compile_static_regex,
    compile_static_selector, current_be_year, element_text,
};
use crate::activity_log::LogSink;
use crate::model::{DownloadLink, DownloadResult, DownloadType, FileType, Scheme};
use crate::transfer::TransferEngine;

static TABLE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("table"));
static ROW: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tr"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));
static DOWNLOAD_EXCEL: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)download excel"));
static REP_ECLAIM: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?i)rep_eclaim"));

/// What a report period request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepCriteria {
    pub month: u32,
    /// Buddhist Era year.
    pub year: i32,
    pub schemes: Vec<Scheme>,
}

impl Default for RepCriteria {
    fn default() -> Self {
        Self {
            month: Local::now().month(),
            year: current_be_year(),
            schemes: vec![Scheme::Ucs],
        }
    }
}

impl RepCriteria {
    /// Fills unset values with the current period and `[UCS]`.
    #[must_use]
    pub fn new(month: Option<u32>, year: Option<i32>, schemes: Vec<Scheme>) -> Self {
        let defaults = Self::default();
        Self {
            month: month.unwrap_or(defaults.month),
            year: year.unwrap_or(defaults.year),
            schemes: if schemes.is_empty() {
                defaults.schemes
            } else {
                schemes
            },
        }
    }
}

/// Everything the filename rules may look at for one anchor.
struct AnchorContext<'a> {
    href: &'a Url,
    text: &'a str,
    sibling_rep_href: Option<&'a str>,
}

type FilenameRule = fn(&AnchorContext<'_>) -> Option<String>;

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn fn_param(ctx: &AnchorContext<'_>) -> Option<String> {
    query_value(ctx.href, "fn")
}

fn filename_param(ctx: &AnchorContext<'_>) -> Option<String> {
    query_value(ctx.href, "filename").map(|name| name.replace(".ecd", ".xls"))
}

fn file_param(ctx: &AnchorContext<'_>) -> Option<String> {
    query_value(ctx.href, "file")
}

fn rep_eclaim_sibling(ctx: &AnchorContext<'_>) -> Option<String> {
    let href = ctx.sibling_rep_href?;
    let last = href.rsplit('/').next().unwrap_or(href);
    Some(last.replace(".ecd", ".xls")).filter(|name| !name.is_empty())
}

fn anchor_text(ctx: &AnchorContext<'_>) -> Option<String> {
    let text = ctx.text.trim();
    (!text.is_empty() && text.to_lowercase().contains(".xls")).then(|| text.to_string())
}

/// Ordered; the first rule that yields a name wins.
const FILENAME_RULES: [FilenameRule; 5] = [
    fn_param,
    filename_param,
    file_param,
    rep_eclaim_sibling,
    anchor_text,
];

fn resolve_filename(ctx: &AnchorContext<'_>) -> Option<String> {
    FILENAME_RULES.iter().find_map(|rule| rule(ctx))
}

struct FileTypeRule {
    markers: &'static [&'static str],
    file_type: FileType,
}

/// Ordered; every marker of a rule must appear in the upper-cased filename.
const FILE_TYPE_RULES: [FileTypeRule; 5] = [
    FileTypeRule {
        markers: &["_IP_", "APPEAL", "NHSO"],
        file_type: FileType::IpAppealNhso,
    },
    FileTypeRule {
        markers: &["_IP_", "APPEAL"],
        file_type: FileType::IpAppeal,
    },
    FileTypeRule {
        markers: &["_IP_"],
        file_type: FileType::Ip,
    },
    FileTypeRule {
        markers: &["_OP_"],
        file_type: FileType::Op,
    },
    FileTypeRule {
        markers: &["_ORF_"],
        file_type: FileType::Orf,
    },
];

/// Classifies a report file by the markers in its name.
#[must_use]
pub fn classify_filename(filename: &str) -> Option<FileType> {
    let upper = filename.to_uppercase();
    FILE_TYPE_RULES
        .iter()
        .find(|rule| rule.markers.iter().all(|m| upper.contains(m)))
        .map(|rule| rule.file_type)
}

/// Extracts download links from a validation page.
///
/// Relative hrefs resolve against `base`. Filenames are unique in the output;
/// the first occurrence wins.
#[must_use]
pub fn parse_report_links(html: &str, base: &Url, scheme: Scheme) -> Vec<DownloadLink> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for table in document.select(&TABLE) {
        for row in table.select(&ROW) {
            let anchors: Vec<ElementRef<'_>> = row.select(&ANCHOR).collect();
            let sibling_rep_href = anchors
                .iter()
                .find(|a| REP_ECLAIM.is_match(&element_text(**a)))
                .and_then(|a| a.value().attr("href"));

            for anchor in &anchors {
                let text = element_text(*anchor);
                if !DOWNLOAD_EXCEL.is_match(&text) {
                    continue;
                }
                let Some(href) = anchor.value().attr("href").filter(|h| !h.is_empty()) else {
                    continue;
                };
                let Ok(url) = base.join(href) else {
                    continue;
                };

                let ctx = AnchorContext {
                    href: &url,
                    text: &text,
                    sibling_rep_href,
                };
                let Some(filename) = resolve_filename(&ctx) else {
                    continue;
                };
                if !seen.insert(filename.clone()) {
                    continue;
                }

                let file_type = classify_filename(&filename);
                links.push(
                    DownloadLink::new(url.as_str(), filename)
                        .with_file_type(file_type)
                        .with_scheme(scheme),
                );
            }
        }
    }
    links
}

/// Report downloader for one period and a set of schemes.
#[derive(Debug)]
pub struct RepDownloader {
    criteria: RepCriteria,
    engine: TransferEngine,
}

impl RepDownloader {
    #[must_use]
    pub fn new(criteria: RepCriteria, engine: TransferEngine) -> Self {
        Self { criteria, engine }
    }

    fn validation_url(&self, session: &PortalSession, scheme: Scheme) -> Option<Url> {
        let mut url = session.endpoint().join(VALIDATION_PATH).ok()?;
        url.query_pairs_mut()
            .append_pair("mo", &self.criteria.month.to_string())
            .append_pair("ye", &self.criteria.year.to_string())
            .append_pair("maininscl", scheme.code());
        Some(url)
    }

    async fn discover_scheme(&self, session: &PortalSession, scheme: Scheme) -> Vec<DownloadLink> {
        let log = self.engine.log();
        let source = DownloadType::Rep.as_str();
        let Some(url) = self.validation_url(session, scheme) else {
            log.warning(&format!("Unsupported scheme: {scheme}"), source);
            return Vec::new();
        };

        log.info(
            &format!("Fetching validation page for {}...", scheme.label()),
            source,
        );
        match session.get_page(url, HeaderMap::new()).await {
            Ok(html) => parse_report_links(&html, session.endpoint().base(), scheme),
            Err(e) => {
                log.warning(&format!("Error fetching links for {scheme}: {e}"), source);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl FamilyDownloader for RepDownloader {
    fn download_type(&self) -> DownloadType {
        DownloadType::Rep
    }

    fn describe(&self) -> Vec<String> {
        let schemes: Vec<String> = self.criteria.schemes.iter().map(|s| s.label()).collect();
        vec![
            format!(
                "Starting REP download for {}/{}",
                self.criteria.month, self.criteria.year
            ),
            format!("Schemes: {}", schemes.join(", ")),
        ]
    }

    fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    async fn discover(&self, session: &PortalSession) -> Vec<DownloadLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for &scheme in &self.criteria.schemes {
            let scheme_links = self.discover_scheme(session, scheme).await;
            self.engine.log().info(
                &format!("Found {} files for {}", scheme_links.len(), scheme.label()),
                DownloadType::Rep.as_str(),
            );
            links.extend(
                scheme_links
                    .into_iter()
                    .filter(|link| seen.insert(link.filename.clone())),
            );
        }
        links
    }

    async fn fetch(&self, session: &PortalSession, link: &DownloadLink) -> DownloadResult {
        self.engine
            .fetch_report(session.client(), link, DownloadType::Rep)
            .await
            .with_period(Some(self.criteria.month), Some(self.criteria.year))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://eclaim.nhso.go.th").unwrap()
    }

    fn page(rows: &str) -> String {
        format!("<html><body><table>{rows}</table></body></html>")
    }

    #[test]
    fn test_classify_filename() {
        assert_eq!(classify_filename("20250101_OP_UCS.xls"), Some(FileType::Op));
        assert_eq!(
            classify_filename("rep_ip_appeal_nhso_10670.xls"),
            Some(FileType::IpAppealNhso)
        );
        assert_eq!(
            classify_filename("X_IP_APPEAL_2569.xls"),
            Some(FileType::IpAppeal)
        );
        assert_eq!(classify_filename("X_IP_2569.xls"), Some(FileType::Ip));
        assert_eq!(classify_filename("X_ORF_2569.xls"), Some(FileType::Orf));
        assert_eq!(classify_filename("summary.xls"), None);
    }

    #[test]
    fn test_filename_from_query_parameters_in_priority_order() {
        let html = page(
            r#"<tr><td><a href="/dl?fn=A_OP_1.xls&filename=B.ecd">Download Excel</a></td></tr>
               <tr><td><a href="/dl?filename=B_IP_2.ecd">download excel</a></td></tr>
               <tr><td><a href="/dl?file=C_ORF_3.xls">DOWNLOAD EXCEL</a></td></tr>"#,
        );
        let links = parse_report_links(&html, &base(), Scheme::Ucs);
        let names: Vec<_> = links.iter().map(|l| l.filename.as_str()).collect();
        assert_eq!(names, ["A_OP_1.xls", "B_IP_2.xls", "C_ORF_3.xls"]);
        assert_eq!(links[0].url, "https://eclaim.nhso.go.th/dl?fn=A_OP_1.xls&filename=B.ecd");
        assert_eq!(links[1].file_type, Some(FileType::Ip));
        assert!(links.iter().all(|l| l.scheme == Some(Scheme::Ucs)));
    }

    #[test]
    fn test_filename_from_rep_eclaim_sibling() {
        let html = page(
            r#"<tr>
                 <td><a href="/files/2569/rep_eclaim_10670_OP_01.ecd">rep_eclaim_10670</a></td>
                 <td><a href="/dl?id=9">Download Excel</a></td>
               </tr>"#,
        );
        let links = parse_report_links(&html, &base(), Scheme::Ofc);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "rep_eclaim_10670_OP_01.xls");
        assert_eq!(links[0].file_type, Some(FileType::Op));
        assert_eq!(links[0].scheme, Some(Scheme::Ofc));
    }

    #[test]
    fn test_filename_from_anchor_text() {
        let html = page(r#"<tr><td><a href="/dl?id=1">download excel X_IP_1.XLS</a></td></tr>"#);
        let links = parse_report_links(&html, &base(), Scheme::Ucs);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "download excel X_IP_1.XLS");
    }

    #[test]
    fn test_unresolvable_and_non_matching_anchors_are_discarded() {
        let html = page(
            r#"<tr><td><a href="/dl?id=1">Download Excel</a></td></tr>
               <tr><td><a href="/dl?fn=other.xls">View</a></td></tr>
               <tr><td><a>Download Excel</a></td></tr>"#,
        );
        assert!(parse_report_links(&html, &base(), Scheme::Ucs).is_empty());
    }

    #[test]
    fn test_duplicate_filenames_keep_first() {
        let html = page(
            r#"<tr><td><a href="/first?fn=A_OP_1.xls">Download Excel</a></td></tr>
               <tr><td><a href="/second?fn=A_OP_1.xls">Download Excel</a></td></tr>"#,
        );
        let links = parse_report_links(&html, &base(), Scheme::Ucs);
        assert_eq!(links.len(), 1);
        assert!(links[0].url.contains("/first"));
    }

    #[test]
    fn test_criteria_defaults_fill_missing_values() {
        let criteria = RepCriteria::new(Some(1), Some(2569), Vec::new());
        assert_eq!(criteria.month, 1);
        assert_eq!(criteria.year, 2569);
        assert_eq!(criteria.schemes, vec![Scheme::Ucs]);
        assert!(RepCriteria::default().year > 2500);
    }
}
