//! History command handlers: statistics, listings, and record deletion.

use anyhow::{Context, Result};

use eclaim_core::history::HistoryRecord;
use eclaim_core::{HistoryStore, Settings};

use crate::cli::{HistoryAction, HistoryArgs};

pub fn run_history_command(args: &HistoryArgs, settings: &Settings) -> Result<()> {
    let store = HistoryStore::new(settings.history.clone());
    let family = args.family;

    match &args.action {
        HistoryAction::Stats => {
            let stats = store.statistics(family);
            println!("history_file = {}", store.path_for(family).display());
            println!("total_files = {}", stats.total_files);
            println!("total_size = {}", stats.total_size_formatted);
            println!(
                "last_run = {}",
                stats.last_run.as_deref().unwrap_or("never")
            );
            for (file_type, count) in &stats.by_file_type {
                println!("file_type.{file_type} = {count}");
            }
            for (scheme, count) in &stats.by_scheme {
                println!("scheme.{scheme} = {count}");
            }
        }
        HistoryAction::List {
            limit,
            month,
            year,
            scheme,
        } => {
            let mut records = match (month, year, scheme) {
                (Some(month), Some(year), scheme) => store.by_date(family, *month, *year, *scheme),
                (_, _, Some(scheme)) => store.by_scheme(family, *scheme),
                _ => store.latest(family, *limit),
            };
            records.truncate(*limit);
            if records.is_empty() {
                println!("No {family} downloads recorded.");
            }
            for record in &records {
                println!("{}", render_record(record));
            }
        }
        HistoryAction::Dates => {
            let dates = store.available_dates(family);
            if dates.is_empty() {
                println!("No {family} downloads recorded.");
            }
            for date in dates {
                println!("{:>2}/{} {} ({} files)", date.month, date.year, date.label, date.count);
            }
        }
        HistoryAction::Delete { filename } => {
            let removed = store
                .delete_record(filename, family)
                .with_context(|| format!("failed to update {}", store.path_for(family).display()))?;
            if removed {
                println!("Removed {filename} from {family} history.");
            } else {
                println!("{filename} is not in {family} history.");
            }
        }
    }
    Ok(())
}

fn render_record(record: &HistoryRecord) -> String {
    let period = match (record.month, record.year) {
        (Some(month), Some(year)) => format!("{month}/{year}"),
        _ => "-".to_string(),
    };
    format!(
        "{}  {}  {}  {}  {}",
        record.download_date,
        record.scheme.as_deref().unwrap_or("ucs"),
        record.file_type.as_deref().unwrap_or("-"),
        period,
        record.filename
    )
}
