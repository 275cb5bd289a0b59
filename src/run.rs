//! One download run: authenticate, discover, transfer each link, record history.
//!
//! ```text
//! Idle -> Authenticating -> Discovering -> Transferring -> Done
//!              \-> Failed
//! ```
//!
//! Everything is awaited sequentially. Progress is recomputed after each link
//! and handed to an optional observer (the CLI drives a progress bar from it).

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::activity_log::{LogLevel, LogSink};
use crate::history::HistoryStore;
use crate::model::{DownloadProgress, DownloadResult, DownloadType};
use crate::portal::{FamilyDownloader, PortalEndpoint, PortalSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Authenticating,
    Discovering,
    Transferring,
    Done,
    Failed,
}

/// Summary returned to callers (and printed by `--json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn completed(progress: &DownloadProgress) -> Self {
        Self {
            success: true,
            downloaded: progress.downloaded,
            skipped: progress.skipped,
            errors: progress.errors,
            total: progress.total,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            downloaded: 0,
            skipped: 0,
            errors: 0,
            total: 0,
            error: Some(error.into()),
        }
    }

    /// False when the run failed or any file failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.success && self.errors == 0
    }
}

/// Drives one family downloader through a run.
pub struct Orchestrator {
    downloader: Box<dyn FamilyDownloader>,
    endpoint: PortalEndpoint,
    state: RunState,
    progress: DownloadProgress,
    results: Vec<DownloadResult>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("download_type", &self.downloader.download_type())
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(downloader: Box<dyn FamilyDownloader>, endpoint: PortalEndpoint) -> Self {
        Self {
            downloader,
            endpoint,
            state: RunState::Idle,
            progress: DownloadProgress::default(),
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn progress(&self) -> &DownloadProgress {
        &self.progress
    }

    #[must_use]
    pub fn results(&self) -> &[DownloadResult] {
        &self.results
    }

    fn family(&self) -> DownloadType {
        self.downloader.download_type()
    }

    fn log(&self) -> Arc<dyn LogSink> {
        Arc::clone(self.downloader.engine().log())
    }

    fn history(&self) -> Option<Arc<HistoryStore>> {
        self.downloader.engine().history().cloned()
    }

    pub async fn run(&mut self, username: &str, password: &str) -> RunReport {
        self.run_with_observer(username, password, |_| {}).await
    }

    /// Runs to completion, calling `observer` after every link.
    #[instrument(skip_all, fields(family = %self.family()))]
    pub async fn run_with_observer<F>(
        &mut self,
        username: &str,
        password: &str,
        mut observer: F,
    ) -> RunReport
    where
        F: FnMut(&DownloadProgress),
    {
        let log = self.log();
        let source = self.family().as_str();
        self.results.clear();
        self.progress = DownloadProgress::default();

        for line in self.downloader.describe() {
            log.info(&line, source);
        }

        self.state = RunState::Authenticating;
        let session = match PortalSession::new(self.endpoint.clone()) {
            Ok(session) => session,
            Err(e) => {
                log.error(&format!("Login error: {e}"), source);
                self.state = RunState::Failed;
                return RunReport::failed(e.to_string());
            }
        };
        if !session.login(username, password, log.as_ref(), source).await {
            self.state = RunState::Failed;
            return RunReport::failed("Login failed");
        }

        self.state = RunState::Discovering;
        let links = self.downloader.discover(&session).await;
        if links.is_empty() {
            log.warning("No download links found", source);
            self.state = RunState::Done;
            return RunReport::completed(&self.progress);
        }
        log.info(&format!("Found {} total files to process", links.len()), source);

        self.state = RunState::Transferring;
        self.progress = DownloadProgress::start(links.len());
        let history = self.history();
        for link in &links {
            self.progress.current_file = Some(link.filename.clone());
            let result = self.downloader.fetch(&session, link).await;
            self.progress.record(&result);

            if result.success {
                if let Some(history) = &history
                    && let Err(e) = history.add(&result)
                {
                    log.error(
                        &format!("Failed to record history for {}: {e}", result.filename),
                        source,
                    );
                }
                log.write(&format!("Downloaded: {}", link.filename), LogLevel::Success, source);
            } else if result.is_skipped() {
                log.info(&format!("Skipped: {}", link.filename), source);
            } else {
                log.error(&format!("Failed: {}", link.filename), source);
            }

            observer(&self.progress);
            self.results.push(result);
        }
        self.progress.finish();

        if self.progress.downloaded > 0
            && let Some(history) = &history
            && let Err(e) = history.touch_last_run(self.family())
        {
            log.error(&format!("Failed to save history: {e}"), source);
        }

        self.state = RunState::Done;
        log.success(
            &format!(
                "Download complete: {} downloaded, {} skipped, {} errors",
                self.progress.downloaded, self.progress.skipped, self.progress.errors
            ),
            source,
        );
        info!(
            downloaded = self.progress.downloaded,
            skipped = self.progress.skipped,
            errors = self.progress.errors,
            "run finished"
        );
        RunReport::completed(&self.progress)
    }
}
