//! Subcommand implementations and their shared setup.

mod info;
mod list;
mod sync;

use std::path::PathBuf;

use wabackup::config::{ConfigError, Settings};
use wabackup::pipeline::{PipelineConfig, SyncPipeline};
use wabackup::{EntryKind, RunError, Session, SessionProvider};

use crate::auth::MasterTokenProvider;
use crate::cli::{Cli, Commands};
use crate::error::CliError;

/// Resolve settings, authenticate, and run the chosen subcommand.
pub async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config)?;
    let session = obtain_session(&settings).await?;

    match cli.command {
        Commands::Info { backup } => {
            let pipeline = build_pipeline(session, &settings, None, None, None);
            info::run(&pipeline, backup.as_deref()).await
        }
        Commands::List { backup, only } => {
            let pipeline = build_pipeline(session, &settings, None, None, None);
            list::run(&pipeline, backup.as_deref(), only.map(Into::into)).await
        }
        Commands::Sync {
            backup,
            only,
            yes,
            jobs,
            output,
        } => {
            let pipeline =
                build_pipeline(session, &settings, only.map(Into::into), jobs, output);
            sync::run(&pipeline, backup.as_deref(), yes).await
        }
    }
}

/// Load the settings file, writing a template on first run.
fn load_settings(config: Option<PathBuf>) -> Result<Settings, CliError> {
    let path = config.unwrap_or_else(Settings::default_path);
    if !path.exists() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CliError::Config(ConfigError::Unwritable {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                })?;
            }
        }
        Settings::write_template(&path)?;
        return Err(CliError::TemplateCreated { path });
    }
    Ok(Settings::load(&path)?)
}

/// Exchange the stored master token for a usable session.
async fn obtain_session(settings: &Settings) -> Result<Session, CliError> {
    let master_token =
        settings
            .auth
            .master_token
            .as_deref()
            .ok_or(CliError::Config(ConfigError::MissingKey {
                section: "auth".to_string(),
                key: "master_token".to_string(),
            }))?;

    let provider = MasterTokenProvider::new(
        settings.auth.gmail.clone(),
        settings.auth.android_id.clone(),
        master_token,
    );
    provider
        .obtain()
        .await
        .map_err(|e| CliError::Run(RunError::Session(e)))
}

fn build_pipeline(
    session: Session,
    settings: &Settings,
    only: Option<EntryKind>,
    jobs: Option<usize>,
    output: Option<PathBuf>,
) -> SyncPipeline {
    let mut scheduler = settings.download.scheduler_config();
    if let Some(jobs) = jobs {
        scheduler.concurrency = jobs.max(1);
    }

    let config = PipelineConfig {
        backup_root: output.unwrap_or_else(|| settings.download.backup_dir.clone()),
        scheduler,
        attempt_timeout: settings.download.attempt_timeout,
        only,
        ..PipelineConfig::default()
    };
    SyncPipeline::new(session, config)
}
