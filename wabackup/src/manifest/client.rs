//! Paged HTTP client for the backup listing endpoints.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use super::{Backup, BackupEntry, BackupMetadata, EntryKind, ManifestError};
use crate::session::Session;
use crate::verify::to_hex;

/// Production API base.
pub const DEFAULT_API_BASE: &str = "https://backup.googleapis.com/v1";

/// Timeout for listing requests.
const LIST_TIMEOUT_SECS: u64 = 60;

/// Lists backups and backup files for the authenticated device identity.
///
/// Listing endpoints are paged; both listing methods follow
/// `nextPageToken` until the server stops returning one, preserving the
/// server's listing order.
#[derive(Debug)]
pub struct ManifestClient {
    http: reqwest::Client,
    base_url: String,
    session: Session,
}

#[derive(Deserialize)]
struct BackupsPage {
    #[serde(default)]
    backups: Vec<ApiBackup>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiBackup {
    name: String,
    #[serde(rename = "sizeBytes", default)]
    size_bytes: String,
    #[serde(rename = "updateTime", default)]
    update_time: String,
    #[serde(default)]
    metadata: Option<String>,
}

#[derive(Deserialize)]
struct FilesPage {
    #[serde(default)]
    files: Vec<ApiFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiFile {
    name: String,
    #[serde(rename = "sizeBytes", default)]
    size_bytes: String,
    #[serde(rename = "md5Hash", default)]
    md5_hash: String,
}

impl ManifestClient {
    /// Create a client against the production API.
    pub fn new(session: Session) -> Self {
        Self::with_base_url(session, DEFAULT_API_BASE)
    }

    /// Create a client against a custom API base (tests).
    pub fn with_base_url(session: Session, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LIST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.into(),
            session,
        }
    }

    /// The API base this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List every backup belonging to the device identity, in the
    /// server's listing order.
    pub async fn backups(&self) -> Result<Vec<Backup>, ManifestError> {
        let mut backups = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: BackupsPage = self.get_page("clients/wa/backups", &page_token).await?;

            for api in page.backups {
                let metadata = api
                    .metadata
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<BackupMetadata>(raw).ok());

                backups.push(Backup {
                    size_bytes: api.size_bytes.parse().unwrap_or(0),
                    update_time: api.update_time,
                    metadata,
                    name: api.name,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = backups.len(), "Listed backups");
        Ok(backups)
    }

    /// List every file in the given backup, in the server's listing
    /// order.
    pub async fn backup_files(&self, backup: &Backup) -> Result<Vec<BackupEntry>, ManifestError> {
        let path = format!("{}/files", backup.name);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: FilesPage = self.get_page(&path, &page_token).await?;

            for api in page.files {
                entries.push(entry_from_api(api)?);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(backup = backup.id(), count = entries.len(), "Listed backup files");
        Ok(entries)
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        page_token: &Option<String>,
    ) -> Result<T, ManifestError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http.get(&url).bearer_auth(self.session.bearer());
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(|e| ManifestError::Unavailable {
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ManifestError::AuthExpired);
        }
        if status.is_server_error() {
            return Err(ManifestError::Unavailable {
                reason: format!("listing {} answered {}", path, status),
            });
        }
        if !status.is_success() {
            return Err(ManifestError::Malformed {
                reason: format!("listing {} answered {}", path, status),
            });
        }

        response.json().await.map_err(|e| ManifestError::Malformed {
            reason: e.to_string(),
        })
    }
}

/// Build a [`BackupEntry`] from the API representation.
///
/// The logical path drops the first three components of the remote name
/// (`clients/wa/backups`), so files land under `<backup-id>/files/...`
/// below the backup root, matching the original extractor's layout.
fn entry_from_api(api: ApiFile) -> Result<BackupEntry, ManifestError> {
    let path: PathBuf = api.name.split('/').skip(3).collect();
    if path.as_os_str().is_empty() {
        return Err(ManifestError::Malformed {
            reason: format!("file name too short: {:?}", api.name),
        });
    }

    let size: u64 = api.size_bytes.parse().map_err(|_| ManifestError::Malformed {
        reason: format!("bad sizeBytes {:?} for {}", api.size_bytes, api.name),
    })?;

    let digest = base64::engine::general_purpose::STANDARD
        .decode(&api.md5_hash)
        .map_err(|_| ManifestError::Malformed {
            reason: format!("bad md5Hash for {}", api.name),
        })?;

    let kind = EntryKind::classify(&path);
    Ok(BackupEntry {
        remote_name: api.name,
        path,
        size,
        md5_hex: to_hex(&digest),
        kind,
    })
}
