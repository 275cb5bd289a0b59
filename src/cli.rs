//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use eclaim_core::config::DEFAULT_SETTINGS_FILE;
use eclaim_core::portal::DEFAULT_BASE_URL;
use eclaim_core::{CliOverrides, DownloadType, LogLevel, PersonType, Scheme};

/// Incremental downloader for NHSO E-Claim settlement and statement files.
///
/// Logs in to the portal, discovers the files for a period, and downloads
/// whatever the local history does not already have.
#[derive(Parser, Debug)]
#[command(name = "eclaim")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Subcommand name for diagnostics; the full args carry credentials.
    #[must_use]
    pub fn command_name(&self) -> &'static str {
        match self.command {
            Command::Rep(_) => "rep",
            Command::Stm(_) => "stm",
            Command::History(_) => "history",
            Command::Logs(_) => "logs",
            Command::Config(_) => "config",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download REP files (OP/IP/ORF and appeals) for one month
    Rep(RepArgs),
    /// Download UCS payment statements for a fiscal year
    Stm(StmArgs),
    /// Inspect or edit download history
    History(HistoryArgs),
    /// Show the activity log
    Logs(LogsArgs),
    /// Show or change saved settings
    Config(ConfigArgs),
}

/// Flags shared by the download subcommands.
#[derive(ClapArgs, Debug, Clone)]
pub struct RunFlags {
    /// Portal username (overrides settings and ECLAIM_USERNAME)
    #[arg(long)]
    pub username: Option<String>,

    /// Portal password (overrides settings and ECLAIM_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Directory for downloaded files
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Download everything, ignoring and not updating history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Portal origin
    #[arg(long, hide = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
}

impl RunFlags {
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            username: self.username.clone(),
            password: self.password.clone(),
            download_dir: self.download_dir.clone(),
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct RepArgs {
    /// Month (1-12), defaults to the current month
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    /// Year in Buddhist Era, defaults to the current year + 543
    #[arg(long)]
    pub year: Option<i32>,

    /// Insurance scheme code; repeat for several (defaults to settings)
    #[arg(long = "scheme")]
    pub schemes: Vec<Scheme>,

    #[command(flatten)]
    pub run: RunFlags,
}

#[derive(ClapArgs, Debug)]
pub struct StmArgs {
    /// Fiscal year in Buddhist Era, defaults to the current fiscal year
    #[arg(long)]
    pub fiscal_year: Option<i32>,

    /// Month (1-12); all months when omitted
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    /// Patient type: IP, OP, or All
    #[arg(long, default_value = "All")]
    pub person_type: PersonType,

    #[command(flatten)]
    pub run: RunFlags,
}

#[derive(ClapArgs, Debug)]
pub struct HistoryArgs {
    /// History family: rep, stm, or smt
    #[arg(long, global = true, default_value = "rep")]
    pub family: DownloadType,

    #[command(subcommand)]
    pub action: HistoryAction,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Totals by file type and scheme
    Stats,
    /// Recorded downloads, newest first
    List {
        /// Maximum rows to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only this month (requires --year)
        #[arg(long, requires = "year", value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        /// Only this Buddhist Era year (requires --month)
        #[arg(long, requires = "month")]
        year: Option<i32>,
        /// Only this scheme
        #[arg(long)]
        scheme: Option<Scheme>,
    },
    /// Periods present in history
    Dates,
    /// Forget one file so the next run downloads it again
    Delete {
        filename: String,
    },
}

#[derive(ClapArgs, Debug)]
pub struct LogsArgs {
    /// Number of recent entries
    #[arg(long, default_value_t = 50)]
    pub lines: usize,

    /// Only entries of this level (info, success, warning, error)
    #[arg(long)]
    pub level: Option<LogLevel>,

    /// Keep printing new entries until interrupted
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Empty the activity log instead of printing it
    #[arg(long, conflicts_with_all = ["follow", "level"])]
    pub clear: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print effective settings (password masked)
    Show,
    /// Update the settings file
    Set {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        download_dir: Option<PathBuf>,
        /// Enabled scheme codes, comma separated
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        schemes: Option<Vec<String>>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_rep_defaults() {
        let args = Args::try_parse_from(["eclaim", "rep"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.settings, PathBuf::from("config/settings.json"));
        let Command::Rep(rep) = args.command else {
            panic!("expected rep subcommand");
        };
        assert_eq!(rep.month, None);
        assert!(rep.schemes.is_empty());
        assert!(!rep.run.no_history);
        assert_eq!(rep.run.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_cli_rep_repeated_schemes() {
        let args = Args::try_parse_from([
            "eclaim", "rep", "--month", "1", "--year", "2569", "--scheme", "ucs", "--scheme",
            "OFC",
        ])
        .unwrap();
        let Command::Rep(rep) = args.command else {
            panic!("expected rep subcommand");
        };
        assert_eq!(rep.month, Some(1));
        assert_eq!(rep.year, Some(2569));
        assert_eq!(rep.schemes, vec![Scheme::Ucs, Scheme::Ofc]);
    }

    #[test]
    fn test_cli_month_out_of_range_rejected() {
        let err = Args::try_parse_from(["eclaim", "rep", "--month", "13"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_scheme_rejected() {
        let err = Args::try_parse_from(["eclaim", "rep", "--scheme", "xyz"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_stm_person_type() {
        let args =
            Args::try_parse_from(["eclaim", "stm", "--fiscal-year", "2569", "--person-type", "IP"])
                .unwrap();
        let Command::Stm(stm) = args.command else {
            panic!("expected stm subcommand");
        };
        assert_eq!(stm.fiscal_year, Some(2569));
        assert_eq!(stm.person_type, PersonType::Ip);

        let args = Args::try_parse_from(["eclaim", "stm"]).unwrap();
        let Command::Stm(stm) = args.command else {
            panic!("expected stm subcommand");
        };
        assert_eq!(stm.person_type, PersonType::All);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["eclaim", "stm", "-vv", "--json"]).unwrap();
        assert_eq!(args.verbose, 2);
        let Command::Stm(stm) = args.command else {
            panic!("expected stm subcommand");
        };
        assert!(stm.run.json);
    }

    #[test]
    fn test_cli_history_list_month_requires_year() {
        let err = Args::try_parse_from(["eclaim", "history", "list", "--month", "1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let args = Args::try_parse_from([
            "eclaim", "history", "--family", "stm", "list", "--month", "1", "--year", "2569",
        ])
        .unwrap();
        let Command::History(history) = args.command else {
            panic!("expected history subcommand");
        };
        assert_eq!(history.family, DownloadType::Stm);
        assert!(matches!(
            history.action,
            HistoryAction::List {
                month: Some(1),
                year: Some(2569),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_config_set_schemes_comma_separated() {
        let args =
            Args::try_parse_from(["eclaim", "config", "set", "--schemes", "ucs,ofc"]).unwrap();
        let Command::Config(config) = args.command else {
            panic!("expected config subcommand");
        };
        let ConfigAction::Set { schemes, .. } = config.action else {
            panic!("expected set action");
        };
        assert_eq!(schemes, Some(vec!["ucs".to_string(), "ofc".to_string()]));
    }

    #[test]
    fn test_cli_logs_level() {
        let args = Args::try_parse_from(["eclaim", "logs", "--level", "error", "-f"]).unwrap();
        let Command::Logs(logs) = args.command else {
            panic!("expected logs subcommand");
        };
        assert_eq!(logs.level, Some(LogLevel::Error));
        assert!(logs.follow);
    }

    #[test]
    fn test_cli_subcommand_required() {
        assert!(Args::try_parse_from(["eclaim"]).is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["eclaim", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
