//! Settings resolution.
//!
//! Priority, highest first:
//! 1. command-line overrides ([`CliOverrides`])
//! 2. environment (`ECLAIM_USERNAME`, `ECLAIM_PASSWORD`, `DOWNLOAD_DIR`, `LOG_FILE`)
//! 3. `config/settings.json`
//! 4. built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::{HistoryPaths, REP_HISTORY_FILE, SMT_HISTORY_FILE, STM_HISTORY_FILE};
use crate::model::Scheme;

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "config/settings.json";
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
pub const DEFAULT_LOG_FILE: &str = "logs/realtime.log";

const ENV_USERNAME: &str = "ECLAIM_USERNAME";
const ENV_PASSWORD: &str = "ECLAIM_PASSWORD";
const ENV_DOWNLOAD_DIR: &str = "DOWNLOAD_DIR";
const ENV_LOG_FILE: &str = "LOG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error on settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk settings document. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eclaim_username: Option<String>,
    #[serde(default, skip_serializing)]
    pub eclaim_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stm_history_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smt_history_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_schemes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_schemes: Option<Vec<String>>,
}

impl SettingsFile {
    /// Reads the settings file. A missing or unparseable file yields an empty
    /// document; the latter is logged.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file unreadable; using defaults");
                return Self::default();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "settings file invalid; using defaults");
            Self::default()
        })
    }

    /// Writes the document pretty-printed. The password is never persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, body).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stores the valid scheme codes from `codes`, or `[ucs]` if none are valid.
    pub fn set_enabled_schemes<S: AsRef<str>>(&mut self, codes: &[S]) {
        let schemes = parse_schemes(codes.iter().map(AsRef::as_ref));
        self.enabled_schemes = Some(schemes.iter().map(|s| s.code().to_string()).collect());
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub download_dir: Option<PathBuf>,
}

/// Fully resolved, immutable settings for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub download_dir: PathBuf,
    pub log_file: PathBuf,
    pub history: HistoryPaths,
    pub default_schemes: Vec<Scheme>,
    pub enabled_schemes: Vec<Scheme>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            history: HistoryPaths::default(),
            default_schemes: vec![Scheme::Ucs],
            enabled_schemes: vec![Scheme::Ucs, Scheme::Ofc, Scheme::Sss, Scheme::Lgo],
        }
    }
}

impl Settings {
    /// Resolves settings from `settings_path` and the process environment.
    #[must_use]
    pub fn load(settings_path: &Path) -> Self {
        Self::resolve(&SettingsFile::load(settings_path), |key| {
            std::env::var(key).ok()
        })
    }

    /// Layers `file` and then `env` over the defaults.
    #[must_use]
    pub fn resolve<F>(file: &SettingsFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let schemes_or = |codes: Option<&Vec<String>>, fallback: Vec<Scheme>| {
            codes.map_or(fallback, |codes| parse_schemes(codes.iter().map(String::as_str)))
        };

        let mut settings = Self {
            username: file.eclaim_username.clone().unwrap_or(defaults.username),
            password: file.eclaim_password.clone().unwrap_or(defaults.password),
            download_dir: file.download_dir.clone().unwrap_or(defaults.download_dir),
            log_file: file.log_file.clone().unwrap_or(defaults.log_file),
            history: HistoryPaths {
                rep: file
                    .history_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(REP_HISTORY_FILE)),
                stm: file
                    .stm_history_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(STM_HISTORY_FILE)),
                smt: file
                    .smt_history_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(SMT_HISTORY_FILE)),
            },
            default_schemes: schemes_or(file.default_schemes.as_ref(), defaults.default_schemes),
            enabled_schemes: schemes_or(file.enabled_schemes.as_ref(), defaults.enabled_schemes),
        };

        if let Some(value) = env(ENV_USERNAME) {
            settings.username = value;
        }
        if let Some(value) = env(ENV_PASSWORD) {
            settings.password = value;
        }
        if let Some(value) = env(ENV_DOWNLOAD_DIR) {
            settings.download_dir = PathBuf::from(value);
        }
        if let Some(value) = env(ENV_LOG_FILE) {
            settings.log_file = PathBuf::from(value);
        }
        settings
    }

    /// Returns a copy with command-line values applied.
    #[must_use]
    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(username) = overrides.username {
            self.username = username;
        }
        if let Some(password) = overrides.password {
            self.password = password;
        }
        if let Some(dir) = overrides.download_dir {
            self.download_dir = dir;
        }
        self
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Requested schemes missing from `enabled_schemes`, in request order.
    #[must_use]
    pub fn disabled_schemes(&self, requested: &[Scheme]) -> Vec<Scheme> {
        requested
            .iter()
            .copied()
            .filter(|scheme| !self.enabled_schemes.contains(scheme))
            .collect()
    }

    /// Password replaced by asterisks, for display.
    #[must_use]
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }
}

/// Valid scheme codes from `codes`, deduplicated in input order; `[ucs]` if none survive.
fn parse_schemes<'a>(codes: impl Iterator<Item = &'a str>) -> Vec<Scheme> {
    let mut schemes: Vec<Scheme> = Vec::new();
    for scheme in codes.filter_map(|code| code.parse::<Scheme>().ok()) {
        if !schemes.contains(&scheme) {
            schemes.push(scheme);
        }
    }
    if schemes.is_empty() {
        schemes.push(Scheme::Ucs);
    }
    schemes
}
