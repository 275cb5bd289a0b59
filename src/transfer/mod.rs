//! Per-file transfer with deduplication, retry, and content validation.
//!
//! [`TransferEngine`] owns everything a transfer needs except the HTTP client,
//! which belongs to the authenticated portal session and is passed per call.
//! Two request shapes exist:
//!
//! - [`TransferEngine::fetch_report`]: streamed GET, chunks written straight to disk
//! - [`TransferEngine::fetch_statement`]: form POST, body buffered then written
//!
//! Both share the same skip check, retry loop, and validation rules.

pub mod constants;
mod error;
mod retry;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use crate::activity_log::{LogLevel, LogSink};
use crate::history::HistoryStore;
use crate::model::{DownloadLink, DownloadResult, DownloadType, StatementParams};

pub use constants::{HTML_ERROR_PAGE_MAX, MIN_FILE_SIZE};
pub use error::TransferError;
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryDecision, RetryPolicy};

/// Rejects portal error pages and truncated bodies.
///
/// # Errors
///
/// [`TransferError::ErrorPage`] for an HTML body under [`HTML_ERROR_PAGE_MAX`]
/// bytes, [`TransferError::TooSmall`] for any body under [`MIN_FILE_SIZE`].
pub fn validate_body(
    url: &str,
    content_type: Option<&str>,
    size: u64,
) -> Result<(), TransferError> {
    let is_html = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("html"));
    if is_html && size < HTML_ERROR_PAGE_MAX {
        return Err(TransferError::error_page(url, size));
    }
    if size < MIN_FILE_SIZE {
        return Err(TransferError::too_small(size));
    }
    Ok(())
}

/// Shared transfer machinery for one run.
pub struct TransferEngine {
    download_dir: PathBuf,
    history: Option<Arc<HistoryStore>>,
    log: Arc<dyn LogSink>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("download_dir", &self.download_dir)
            .field("history", &self.history.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    /// Creates the engine and its download directory.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if the directory cannot be created.
    pub fn new(
        download_dir: impl Into<PathBuf>,
        history: Option<Arc<HistoryStore>>,
        log: Arc<dyn LogSink>,
        retry: RetryPolicy,
    ) -> Result<Self, TransferError> {
        let download_dir = download_dir.into();
        std::fs::create_dir_all(&download_dir)
            .map_err(|e| TransferError::io(download_dir.clone(), e))?;
        Ok(Self {
            download_dir,
            history,
            log,
            retry,
        })
    }

    #[must_use]
    pub fn history(&self) -> Option<&Arc<HistoryStore>> {
        self.history.as_ref()
    }

    #[must_use]
    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.log
    }

    #[must_use]
    pub fn destination(&self, link: &DownloadLink) -> PathBuf {
        self.download_dir.join(&link.filename)
    }

    /// Streams a report file to disk with retry.
    #[instrument(skip(self, client, link), fields(filename = %link.filename))]
    pub async fn fetch_report(
        &self,
        client: &Client,
        link: &DownloadLink,
        family: DownloadType,
    ) -> DownloadResult {
        let dest = self.destination(link);
        if let Some(skipped) = self.skip_if_recorded(link, family, &dest) {
            return skipped;
        }

        let url = link.url.as_str();
        let dest_ref = dest.as_path();
        self.with_retry(link, family, dest.clone(), || {
            stream_get(client, url, dest_ref)
        })
        .await
    }

    /// Replays a statement row's form parameters as a POST, with retry.
    ///
    /// Successful results carry the link's metadata.
    #[instrument(skip(self, client, link), fields(filename = %link.filename))]
    pub async fn fetch_statement(
        &self,
        client: &Client,
        link: &DownloadLink,
        family: DownloadType,
    ) -> DownloadResult {
        let dest = self.destination(link);
        if let Some(skipped) = self.skip_if_recorded(link, family, &dest) {
            return skipped;
        }

        let Some(params) = link.statement_params() else {
            let err = TransferError::missing_params(&link.filename);
            self.log.error(&format!("{err}: {}", link.filename), family.as_str());
            return DownloadResult::failed(link, dest, family, err.to_string());
        };

        let url = link.url.as_str();
        let dest_ref = dest.as_path();
        let params = &params;
        let result = self
            .with_retry(link, family, dest.clone(), || {
                post_form(client, url, params, dest_ref)
            })
            .await;
        if result.success {
            result.with_metadata(link.metadata.clone())
        } else {
            result
        }
    }

    fn skip_if_recorded(
        &self,
        link: &DownloadLink,
        family: DownloadType,
        dest: &Path,
    ) -> Option<DownloadResult> {
        let history = self.history.as_ref()?;
        if !history.exists(&link.filename, family) {
            return None;
        }
        self.log.info(
            &format!("Skipping {} (already downloaded)", link.filename),
            family.as_str(),
        );
        Some(DownloadResult::skipped(link, dest.to_path_buf(), family))
    }

    async fn with_retry<F, Fut>(
        &self,
        link: &DownloadLink,
        family: DownloadType,
        dest: PathBuf,
        mut attempt: F,
    ) -> DownloadResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<u64, TransferError>>,
    {
        let mut attempts_made: u32 = 0;
        loop {
            attempts_made += 1;
            let err = match attempt().await {
                Ok(size) => return DownloadResult::succeeded(link, dest, family, size),
                Err(err) => err,
            };
            debug!(attempt = attempts_made, error = %err, "transfer attempt failed");

            match self.retry.should_retry(&err, attempts_made) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    self.log.write(
                        &format!(
                            "Retry {}/{} for {}...",
                            next - 1,
                            self.retry.max_retries(),
                            link.filename
                        ),
                        LogLevel::Warning,
                        family.as_str(),
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "giving up");
                    self.log.error(
                        &format!(
                            "Failed after {} retries: {}",
                            self.retry.max_retries(),
                            link.filename
                        ),
                        family.as_str(),
                    );
                    return DownloadResult::failed(link, dest, family, err.to_string());
                }
            }
        }
    }
}

fn content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

fn check_status(url: &str, response: &reqwest::Response) -> Result<(), TransferError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransferError::http_status(url, status.as_u16()))
    }
}

async fn stream_get(client: &Client, url: &str, dest: &Path) -> Result<u64, TransferError> {
    let response = client
        .get(url)
        .timeout(constants::REPORT_TIMEOUT)
        .send()
        .await
        .map_err(|e| TransferError::request(url, e))?;
    check_status(url, &response)?;
    let content_type = content_type(response.headers());

    let mut file = File::create(dest)
        .await
        .map_err(|e| TransferError::io(dest, e))?;
    let written = match stream_to_file(&mut file, response, url, dest).await {
        Ok(written) => written,
        Err(err) => {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(err);
        }
    };
    drop(file);

    if let Err(err) = validate_body(url, content_type.as_deref(), written) {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(err);
    }
    Ok(written)
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    dest: &Path,
) -> Result<u64, TransferError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransferError::request(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(dest, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| TransferError::io(dest, e))?;
    Ok(bytes_written)
}

/// `application/x-www-form-urlencoded` body in field order.
#[must_use]
pub fn encode_form(params: &StatementParams) -> String {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params.form_fields() {
        form.append_pair(name, value);
    }
    form.finish()
}

async fn post_form(
    client: &Client,
    url: &str,
    params: &StatementParams,
    dest: &Path,
) -> Result<u64, TransferError> {
    let response = client
        .post(url)
        .timeout(constants::STATEMENT_TIMEOUT)
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        )
        .body(encode_form(params))
        .send()
        .await
        .map_err(|e| TransferError::request(url, e))?;
    check_status(url, &response)?;
    let content_type = content_type(response.headers());

    let body = response
        .bytes()
        .await
        .map_err(|e| TransferError::request(url, e))?;
    let size = body.len() as u64;
    validate_body(url, content_type.as_deref(), size)?;

    tokio::fs::write(dest, &body)
        .await
        .map_err(|e| TransferError::io(dest, e))?;
    Ok(size)
}
