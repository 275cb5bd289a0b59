//! E-Claim Core Library
//!
//! Incremental retrieval of settlement (REP) and statement (STM) files from
//! the NHSO E-Claim portal, which offers no API: the library logs in through
//! the portal's HTML form, scrapes download links, and fetches each file with
//! retry while a per-family history keeps repeated runs incremental.
//!
//! # Architecture
//!
//! - [`model`] - Link, result, and progress value types
//! - [`history`] - Durable per-family download history with atomic saves
//! - [`portal`] - Session/login, link discovery, and the family downloaders
//! - [`transfer`] - Retry loop, streaming GET / form POST, body validation
//! - [`run`] - Run orchestrator and summary report
//! - [`activity_log`] - JSON-lines activity log shared with other tools
//! - [`config`] - Settings from defaults, `config/settings.json`, and environment

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod activity_log;
pub mod config;
pub mod history;
pub mod model;
pub mod portal;
pub mod run;
pub mod transfer;

// Re-export commonly used types
pub use activity_log::{ActivityLog, LogLevel, LogSink, TracingLog};
pub use config::{CliOverrides, Settings, SettingsFile};
pub use history::{HistoryPaths, HistoryStore};
pub use model::{DownloadLink, DownloadProgress, DownloadResult, DownloadType, FileType, Scheme};
pub use portal::{
    FamilyDownloader, PersonType, PortalEndpoint, PortalSession, RepCriteria, RepDownloader,
    StmCriteria, StmDownloader,
};
pub use run::{Orchestrator, RunReport, RunState};
pub use transfer::{RetryPolicy, TransferEngine, TransferError};
