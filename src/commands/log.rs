//! Log command handler: print and follow the activity log.

use std::time::Duration;

use anyhow::{Context, Result};

use eclaim_core::activity_log::LogEntry;
use eclaim_core::{ActivityLog, LogLevel, Settings};

use crate::cli::LogsArgs;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_log_command(args: &LogsArgs, settings: &Settings) -> Result<()> {
    let log = ActivityLog::new(&settings.log_file)
        .with_context(|| format!("failed to open activity log {}", settings.log_file.display()))?;

    if args.clear {
        log.clear()
            .with_context(|| format!("failed to clear {}", log.path().display()))?;
        println!("Cleared {}", log.path().display());
        return Ok(());
    }

    let entries = match args.level {
        Some(LogLevel::Error) => log.errors(args.lines),
        level => log.recent(args.lines, level),
    }
    .with_context(|| format!("failed to read {}", log.path().display()))?;
    for entry in &entries {
        println!("{}", render_entry(entry));
    }
    if !args.follow {
        return Ok(());
    }

    let mut tail = log.tail();
    let mut ticker = tokio::time::interval(FOLLOW_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {
                let fresh = tail
                    .poll()
                    .with_context(|| format!("failed to read {}", log.path().display()))?;
                for entry in fresh
                    .iter()
                    .filter(|e| args.level.is_none_or(|level| e.level == level))
                {
                    println!("{}", render_entry(entry));
                }
            }
        }
    }
}

fn render_entry(entry: &LogEntry) -> String {
    format!(
        "{} [{:<7}] {:<3} {}",
        entry.timestamp,
        entry.level.as_str(),
        entry.source,
        entry.message
    )
}
