//! CLI command handlers.

mod config;
mod download;
mod history;
mod log;

pub use config::{run_config_set_command, run_config_show_command};
pub use download::{run_rep_command, run_stm_command};
pub use history::run_history_command;
pub use log::run_log_command;
