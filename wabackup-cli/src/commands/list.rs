//! List command: print the files of each backup.

use console::style;
use wabackup::pipeline::{select_backups, SyncPipeline};
use wabackup::{human_size, EntryKind};

use crate::error::CliError;

pub async fn run(
    pipeline: &SyncPipeline,
    backup: Option<&str>,
    only: Option<EntryKind>,
) -> Result<(), CliError> {
    let backups = pipeline.backups().await?;
    for backup in select_backups(&backups, backup)? {
        let mut entries = pipeline.backup_files(backup).await?;
        if let Some(kind) = only {
            entries.retain(|e| e.kind == kind);
        }

        println!(
            "{} ({} files)",
            style(backup.id()).cyan(),
            entries.len()
        );
        let mut total = 0u64;
        for entry in &entries {
            total += entry.size;
            println!(
                "{:>10}  {:<8}  {}",
                human_size(entry.size),
                entry.kind.to_string(),
                entry.path.display()
            );
        }
        println!("{:>10}  total", human_size(total));
    }
    Ok(())
}
