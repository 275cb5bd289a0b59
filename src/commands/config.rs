//! Config command handlers: show effective settings, update the settings file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use eclaim_core::{Settings, SettingsFile};

pub fn run_config_show_command(settings_path: &Path, settings: &Settings) -> Result<()> {
    let codes = |schemes: &[eclaim_core::Scheme]| {
        schemes
            .iter()
            .map(|s| s.code())
            .collect::<Vec<_>>()
            .join(",")
    };

    println!("settings_file = {}", settings_path.display());
    println!(
        "settings_file_status = {}",
        if settings_path.exists() {
            "loaded"
        } else {
            "not found (using defaults)"
        }
    );
    println!("username = {}", settings.username);
    println!("password = {}", settings.masked_password());
    println!("download_dir = {}", settings.download_dir.display());
    println!("log_file = {}", settings.log_file.display());
    println!("history_file = {}", settings.history.rep.display());
    println!("stm_history_file = {}", settings.history.stm.display());
    println!("smt_history_file = {}", settings.history.smt.display());
    println!("default_schemes = {}", codes(&settings.default_schemes));
    println!("enabled_schemes = {}", codes(&settings.enabled_schemes));
    Ok(())
}

pub fn run_config_set_command(
    settings_path: &Path,
    username: Option<String>,
    download_dir: Option<PathBuf>,
    schemes: Option<Vec<String>>,
) -> Result<()> {
    let mut file = SettingsFile::load(settings_path);
    if let Some(username) = username {
        file.eclaim_username = Some(username);
    }
    if let Some(dir) = download_dir {
        file.download_dir = Some(dir);
    }
    if let Some(schemes) = schemes {
        file.set_enabled_schemes(&schemes);
    }
    file.save(settings_path)
        .with_context(|| format!("failed to write {}", settings_path.display()))?;
    println!("Saved {}", settings_path.display());
    Ok(())
}
