//! CLI error type and process exit codes.

use std::fmt;
use std::path::PathBuf;

use wabackup::config::ConfigError;
use wabackup::RunError;

/// Exit code when some entries failed but the run finished.
pub const EXIT_PARTIAL: i32 = 1;
/// Exit code for fatal conditions (auth, listing, integrity, config).
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum CliError {
    /// The settings file is missing, unreadable, or invalid.
    Config(ConfigError),
    /// No settings file existed; a template was written for the user to
    /// fill in.
    TemplateCreated { path: PathBuf },
    /// The run aborted before producing a report.
    Run(RunError),
    /// The run finished but some entries failed.
    PartialFailure { failed: usize },
    /// The user declined the confirmation prompt.
    Aborted,
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PartialFailure { .. } | Self::Aborted => EXIT_PARTIAL,
            Self::Config(_) | Self::TemplateCreated { .. } | Self::Run(_) => EXIT_FATAL,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{}", err),
            Self::TemplateCreated { path } => write!(
                f,
                "wrote a settings template to {}; fill in your credentials and run again",
                path.display()
            ),
            Self::Run(err) => write!(f, "{}", err),
            Self::PartialFailure { failed } => {
                write!(f, "{} file(s) failed; run again to retry them", failed)
            }
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Run(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<RunError> for CliError {
    fn from(err: RunError) -> Self {
        Self::Run(err)
    }
}
