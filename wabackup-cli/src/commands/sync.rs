//! Sync command: download each backup with resume and verification.

use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wabackup::pipeline::{select_backups, SyncPipeline};
use wabackup::{human_size, ProgressCallback, ProgressEvent, RunStatus, TransferOutcome};

use crate::error::CliError;

pub async fn run(
    pipeline: &SyncPipeline,
    backup: Option<&str>,
    yes: bool,
) -> Result<(), CliError> {
    let backups = pipeline.backups().await?;
    let selected = select_backups(&backups, backup)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let mut failed_total = 0usize;
    for backup in selected {
        if cancel.is_cancelled() {
            break;
        }

        let entries = pipeline.backup_files(backup).await?;
        let total_size: u64 = entries.iter().map(|e| e.size).sum();
        println!(
            "{} {} ({} files, {})",
            style("Backup").bold(),
            style(backup.id()).cyan(),
            entries.len(),
            human_size(total_size)
        );

        if !yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt("Download this backup?")
                .default(true)
                .interact()
                .map_err(|_| CliError::Aborted)?;
            if !confirmed {
                println!("  skipped");
                continue;
            }
        }

        let bar = ProgressBar::new(entries.len() as u64);
        bar.set_style(ProgressStyle::default_bar());
        let progress_bar = bar.clone();
        let callback: ProgressCallback = Arc::new(move |event| match event {
            ProgressEvent::Started { path, .. } => {
                progress_bar.set_message(path.display().to_string());
            }
            ProgressEvent::Resolved { .. } => progress_bar.inc(1),
        });

        let report = pipeline.sync(backup, cancel.clone(), Some(callback)).await?;
        bar.finish_and_clear();

        println!(
            "  downloaded:       {} ({})",
            report.completed_count(),
            human_size(report.bytes_fetched())
        );
        println!("  already complete: {}", report.already_complete_count());
        if report.failed_count() > 0 {
            println!("  {}:", style("failed").red());
            for outcome in report.failed() {
                if let TransferOutcome::Failed(kind) = &outcome.outcome {
                    println!("    {}: {}", outcome.path.display(), kind);
                }
            }
        }
        if report.status() == RunStatus::Success {
            println!("  {}", style("all files verified").green());
        }
        failed_total += report.failed_count();
    }

    if failed_total > 0 {
        return Err(CliError::PartialFailure {
            failed: failed_total,
        });
    }
    Ok(())
}
