//! Info command: show account backups and their metadata.

use console::style;
use wabackup::human_size;
use wabackup::manifest::BackupMetadata;
use wabackup::pipeline::{select_backups, SyncPipeline};

use crate::error::CliError;

pub async fn run(pipeline: &SyncPipeline, backup: Option<&str>) -> Result<(), CliError> {
    let backups = pipeline.backups().await?;
    for backup in select_backups(&backups, backup)? {
        println!("{} {}", style("Backup").bold(), style(backup.id()).cyan());
        println!("  size:      {}", human_size(backup.size_bytes));
        println!("  updated:   {}", format_time(&backup.update_time));
        if let Some(meta) = &backup.metadata {
            for line in metadata_lines(meta) {
                println!("  {}", line);
            }
        }
        println!();
    }
    Ok(())
}

fn metadata_lines(meta: &BackupMetadata) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("app:       {}", meta.version_of_app_when_backup));

    let mut messages = format!("messages:  {}", meta.num_of_messages);
    if let Some(size) = meta.chatdb_size_bytes() {
        messages.push_str(&format!(" ({})", human_size(size)));
    }
    lines.push(messages);

    let mut media = format!("media:     {}", meta.num_of_media_files);
    if let Some(size) = meta.media_size_bytes() {
        media.push_str(&format!(" ({})", human_size(size)));
    }
    lines.push(media);

    lines.push(format!("photos:    {}", meta.num_of_photos));

    if let Some(included) = meta.include_videos_in_backup {
        let mut videos = format!(
            "videos:    {}",
            if included { "included" } else { "excluded" }
        );
        if included {
            if let Some(size) = meta.video_size_bytes() {
                videos.push_str(&format!(" ({})", human_size(size)));
            }
        }
        lines.push(videos);
    }

    if let Some(encrypted) = meta.password_protected_backup_enabled {
        lines.push(format!("encrypted: {}", encrypted));
    }
    lines
}

fn format_time(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_lines_cover_sizes_and_videos() {
        let meta: BackupMetadata = serde_json::from_str(
            r#"{"chatdbSize": "1048576", "mediaSize": "2097152",
                "videoSize": "3145728", "numOfMessages": 42,
                "numOfMediaFiles": 7, "numOfPhotos": 3,
                "includeVideosInBackup": true,
                "passwordProtectedBackupEnabled": false,
                "versionOfAppWhenBackup": "2.23.1"}"#,
        )
        .unwrap();

        let lines = metadata_lines(&meta);
        assert!(lines.contains(&"app:       2.23.1".to_string()));
        assert!(lines.contains(&"messages:  42 (1.00MiB)".to_string()));
        assert!(lines.contains(&"media:     7 (2.00MiB)".to_string()));
        assert!(lines.contains(&"photos:    3".to_string()));
        assert!(lines.contains(&"videos:    included (3.00MiB)".to_string()));
        assert!(lines.contains(&"encrypted: false".to_string()));
    }

    #[test]
    fn test_metadata_lines_omit_absent_fields() {
        let meta: BackupMetadata =
            serde_json::from_str(r#"{"numOfMessages": 1, "versionOfAppWhenBackup": "2.0"}"#)
                .unwrap();

        let lines = metadata_lines(&meta);
        // Empty size strings do not render as "(0.00B)".
        assert!(lines.contains(&"messages:  1".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("videos:")));
        assert!(!lines.iter().any(|l| l.starts_with("encrypted:")));
    }

    #[test]
    fn test_format_time_falls_back_to_raw() {
        assert_eq!(format_time("not-a-timestamp"), "not-a-timestamp");
        // A valid timestamp renders without the RFC 3339 'T'.
        assert!(!format_time("2024-01-01T00:00:00Z").contains('T'));
    }
}
