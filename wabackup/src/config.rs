//! Settings file handling.
//!
//! Settings live in an INI file compatible with the original
//! `settings.cfg` layout: an `[auth]` section with the account identity
//! and a `[download]` section with engine tuning knobs. All values are
//! threaded explicitly through component constructors; nothing reads
//! ambient process state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::scheduler::SchedulerConfig;

/// Default maximum concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default retry attempts per entry.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt network timeout in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 120;

/// Template written when no settings file exists yet.
const SETTINGS_TEMPLATE: &str = "\
[auth]
gmail = alias@gmail.com
# The result of \"adb shell settings get secure android_id\".
android_id = 0000000000000000
# Master token for the account (aas_et/...). Obtain it once with an
# external helper; the password itself is never stored here.
master_token =

[download]
# Directory the backup files are materialized under.
backup_dir = backups
# Maximum number of concurrent transfers.
concurrency = 10
# Retry attempts per file before it is reported as failed.
max_retries = 3
# Schedule smaller files first.
smallest_first = false
";

/// Account identity and credentials.
#[derive(Clone, Debug)]
pub struct AuthSettings {
    /// Account e-mail address.
    pub gmail: String,
    /// Android device identity the backup belongs to.
    pub android_id: String,
    /// Master token used for the OAuth token exchange.
    pub master_token: Option<String>,
}

/// Download engine tuning.
#[derive(Clone, Debug)]
pub struct DownloadSettings {
    /// Root directory the backup files are written under.
    pub backup_dir: PathBuf,
    /// Maximum concurrent transfers.
    pub concurrency: usize,
    /// Retry attempts per entry.
    pub max_retries: u32,
    /// Per-attempt network timeout.
    pub attempt_timeout: Duration,
    /// Schedule smaller entries first.
    pub smallest_first: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            smallest_first: false,
        }
    }
}

impl DownloadSettings {
    /// Build the scheduler configuration from these settings.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            smallest_first: self.smallest_first,
            ..SchedulerConfig::default()
        }
    }
}

/// Loaded settings file.
#[derive(Clone, Debug)]
pub struct Settings {
    pub auth: AuthSettings,
    pub download: DownloadSettings,
}

impl Settings {
    /// Load settings from the given INI file.
    ///
    /// The `[auth]` section is required; `[download]` falls back to
    /// defaults for any missing key.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let auth = ini
            .section(Some("auth"))
            .ok_or_else(|| ConfigError::MissingKey {
                section: "auth".to_string(),
                key: "(section)".to_string(),
            })?;

        let required = |key: &str| -> Result<String, ConfigError> {
            auth.get(key)
                .map(str::to_string)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingKey {
                    section: "auth".to_string(),
                    key: key.to_string(),
                })
        };

        let auth = AuthSettings {
            gmail: required("gmail")?,
            android_id: required("android_id")?,
            master_token: auth
                .get("master_token")
                .map(str::to_string)
                .filter(|v| !v.is_empty()),
        };

        let defaults = DownloadSettings::default();
        let download = match ini.section(Some("download")) {
            None => defaults,
            Some(section) => {
                let parse_err = |key: &str, value: &str| ConfigError::InvalidValue {
                    section: "download".to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                };

                let mut settings = defaults;
                if let Some(dir) = section.get("backup_dir") {
                    settings.backup_dir = PathBuf::from(dir);
                }
                if let Some(v) = section.get("concurrency") {
                    settings.concurrency = v.parse().map_err(|_| parse_err("concurrency", v))?;
                }
                if let Some(v) = section.get("max_retries") {
                    settings.max_retries = v.parse().map_err(|_| parse_err("max_retries", v))?;
                }
                if let Some(v) = section.get("attempt_timeout_secs") {
                    let secs: u64 = v
                        .parse()
                        .map_err(|_| parse_err("attempt_timeout_secs", v))?;
                    settings.attempt_timeout = Duration::from_secs(secs);
                }
                if let Some(v) = section.get("smallest_first") {
                    settings.smallest_first =
                        v.parse().map_err(|_| parse_err("smallest_first", v))?;
                }
                settings
            }
        };

        Ok(Self { auth, download })
    }

    /// Write a commented settings template to the given path.
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, SETTINGS_TEMPLATE).map_err(|e| ConfigError::Unwritable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Default settings file location: `settings.cfg` in the working
    /// directory (original layout), falling back to the user config dir.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("settings.cfg");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|d| d.join("wabackup").join("settings.cfg"))
            .unwrap_or(local)
    }
}

/// Errors raised while loading or creating the settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("cannot write settings file {path}: {reason}")]
    Unwritable { path: PathBuf, reason: String },

    #[error("settings file is missing [{section}] {key}")]
    MissingKey { section: String, key: String },

    #[error("invalid value for [{section}] {key}: {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}
