//! CLI entry point for the E-Claim downloader.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use eclaim_core::Settings;
use tracing::debug;

mod cli;
mod commands;

use cli::{Args, Command, ConfigAction};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        command = args.command_name(),
        settings = %args.settings.display(),
        "CLI arguments parsed"
    );

    let settings = Settings::load(&args.settings);

    match args.command {
        Command::Rep(rep) => commands::run_rep_command(rep, &settings, args.quiet).await,
        Command::Stm(stm) => commands::run_stm_command(stm, &settings, args.quiet).await,
        Command::History(history) => {
            commands::run_history_command(&history, &settings)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs(logs) => {
            commands::run_log_command(&logs, &settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(config) => {
            match config.action {
                ConfigAction::Show => {
                    commands::run_config_show_command(&args.settings, &settings)?;
                }
                ConfigAction::Set {
                    username,
                    download_dir,
                    schemes,
                } => commands::run_config_set_command(
                    &args.settings,
                    username,
                    download_dir,
                    schemes,
                )?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
