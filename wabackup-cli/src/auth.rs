//! OAuth token exchange for the backup API session.
//!
//! Exchanges a stored master token for a bearer token scoped to the
//! account's Drive App Data space, against the Android auth endpoint.
//! The response body is `key=value` lines; a body carrying `Auth=` is a
//! usable token, `Error=NeedsBrowser` plus `Url=` means the account
//! needs an interactive unlock in a browser first.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use wabackup::{Session, SessionError, SessionProvider};

/// Production token exchange endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://android.clients.google.com/auth";

/// OAuth scope for the Drive App Data space.
const OAUTH_SCOPE: &str = "oauth2:https://www.googleapis.com/auth/drive.appdata";

/// Package name the backups belong to.
const WHATSAPP_APP: &str = "com.whatsapp";

/// Signing certificate digest of the WhatsApp APK.
const WHATSAPP_CLIENT_SIG: &str = "38a0f7d505fe18fec64fbf343ecaaaf310dbd799";

const AUTH_TIMEOUT_SECS: u64 = 30;

/// Exchanges a master token for a scoped session on demand.
pub struct MasterTokenProvider {
    http: reqwest::Client,
    auth_url: String,
    gmail: String,
    android_id: String,
    master_token: String,
}

impl MasterTokenProvider {
    pub fn new(
        gmail: impl Into<String>,
        android_id: impl Into<String>,
        master_token: impl Into<String>,
    ) -> Self {
        Self::with_auth_url(gmail, android_id, master_token, DEFAULT_AUTH_URL)
    }

    /// Provider against a custom auth endpoint (tests).
    pub fn with_auth_url(
        gmail: impl Into<String>,
        android_id: impl Into<String>,
        master_token: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(AUTH_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            auth_url: auth_url.into(),
            gmail: gmail.into(),
            android_id: android_id.into(),
            master_token: master_token.into(),
        }
    }
}

impl SessionProvider for MasterTokenProvider {
    fn obtain(&self) -> Pin<Box<dyn Future<Output = Result<Session, SessionError>> + Send + '_>> {
        Box::pin(async move {
            let form = [
                ("accountType", "HOSTED_OR_GOOGLE"),
                ("Email", self.gmail.as_str()),
                ("has_permission", "1"),
                ("EncryptedPasswd", self.master_token.as_str()),
                ("service", OAUTH_SCOPE),
                ("source", "android"),
                ("androidId", self.android_id.as_str()),
                ("app", WHATSAPP_APP),
                ("client_sig", WHATSAPP_CLIENT_SIG),
                ("device_country", "us"),
                ("operatorCountry", "us"),
                ("lang", "en"),
                ("sdk_version", "17"),
            ];

            let response = self
                .http
                .post(&self.auth_url)
                .form(&form)
                .send()
                .await
                .map_err(|e| SessionError::Transport {
                    reason: e.to_string(),
                })?;

            let body = response.text().await.map_err(|e| SessionError::Transport {
                reason: e.to_string(),
            })?;

            parse_auth_response(&body)
        })
    }
}

/// Parse the `key=value` auth response body.
fn parse_auth_response(body: &str) -> Result<Session, SessionError> {
    let fields: HashMap<&str, &str> = body
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();

    if let Some(token) = fields.get("Auth") {
        return Ok(Session::with_token(*token));
    }

    match fields.get("Error").copied() {
        Some("NeedsBrowser") => Err(SessionError::ManualVerificationRequired {
            url: fields.get("Url").copied().unwrap_or_default().to_string(),
        }),
        Some(reason) => Err(SessionError::Rejected {
            reason: reason.to_string(),
        }),
        None => Err(SessionError::Rejected {
            reason: "auth response carried no token".to_string(),
        }),
    }
}
