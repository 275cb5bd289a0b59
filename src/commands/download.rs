//! `rep` and `stm` command handlers.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use eclaim_core::{
    ActivityLog, FamilyDownloader, HistoryStore, LogSink, Orchestrator, PortalEndpoint,
    RepCriteria, RepDownloader, RetryPolicy, RunReport, Settings, StmCriteria, StmDownloader,
    TracingLog, TransferEngine,
};

use crate::cli::{RepArgs, RunFlags, StmArgs};

/// Exit code for authentication failure, missing credentials, or file errors.
const EXIT_FAILURE: u8 = 1;

pub async fn run_rep_command(args: RepArgs, base: &Settings, quiet: bool) -> Result<ExitCode> {
    let settings = base.clone().with_overrides(args.run.overrides());
    if !has_credentials(&settings) {
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    let schemes = if args.schemes.is_empty() {
        settings.default_schemes.clone()
    } else {
        args.schemes
    };
    let disabled = settings.disabled_schemes(&schemes);
    if !disabled.is_empty() {
        let codes: Vec<&str> = disabled.iter().map(|s| s.code()).collect();
        eprintln!(
            "Scheme not enabled: {}. Enable it with `eclaim config set --schemes`.",
            codes.join(", ")
        );
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    let criteria = RepCriteria::new(args.month, args.year, schemes);
    let engine = build_engine(&settings, &args.run, quiet)?;
    let downloader = RepDownloader::new(criteria, engine);
    execute(Box::new(downloader), &settings, &args.run, quiet).await
}

pub async fn run_stm_command(args: StmArgs, base: &Settings, quiet: bool) -> Result<ExitCode> {
    let settings = base.clone().with_overrides(args.run.overrides());
    if !has_credentials(&settings) {
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    let criteria = StmCriteria::new(args.fiscal_year, args.month, args.person_type);
    let engine = build_engine(&settings, &args.run, quiet)?;
    let downloader = StmDownloader::new(criteria, engine);
    execute(Box::new(downloader), &settings, &args.run, quiet).await
}

fn has_credentials(settings: &Settings) -> bool {
    if settings.has_credentials() {
        return true;
    }
    eprintln!(
        "Missing credentials: set ECLAIM_USERNAME and ECLAIM_PASSWORD, save them with \
         `eclaim config set`, or pass --username and --password."
    );
    false
}

fn build_engine(settings: &Settings, flags: &RunFlags, quiet: bool) -> Result<TransferEngine> {
    let log: Arc<dyn LogSink> = if quiet {
        Arc::new(TracingLog)
    } else {
        Arc::new(ActivityLog::new(&settings.log_file).with_context(|| {
            format!("failed to open activity log {}", settings.log_file.display())
        })?)
    };
    let history =
        (!flags.no_history).then(|| Arc::new(HistoryStore::new(settings.history.clone())));

    TransferEngine::new(&settings.download_dir, history, log, RetryPolicy::default()).with_context(
        || {
            format!(
                "failed to prepare download directory {}",
                settings.download_dir.display()
            )
        },
    )
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

async fn execute(
    downloader: Box<dyn FamilyDownloader>,
    settings: &Settings,
    flags: &RunFlags,
    quiet: bool,
) -> Result<ExitCode> {
    let endpoint = PortalEndpoint::new(&flags.base_url)
        .with_context(|| format!("invalid portal URL {}", flags.base_url))?;
    let mut orchestrator = Orchestrator::new(downloader, endpoint);

    let bar = progress_bar(quiet || flags.json);
    let report = orchestrator
        .run_with_observer(&settings.username, &settings.password, |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.completed() as u64);
            if let Some(file) = &progress.current_file {
                bar.set_message(file.clone());
            }
        })
        .await;
    bar.finish_and_clear();
    debug!(state = ?orchestrator.state(), "run ended");

    print_report(&report, flags.json)?;
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    })
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("failed to serialize run report")?;
        println!("{rendered}");
        return Ok(());
    }

    if let Some(error) = &report.error {
        println!("Run failed: {error}");
        return Ok(());
    }
    println!(
        "Downloaded {} / skipped {} / errors {} (total {})",
        report.downloaded, report.skipped, report.errors, report.total
    );
    Ok(())
}
