//! Authenticated session abstraction.
//!
//! The Google authentication handshake is not implemented here; callers
//! supply a [`SessionProvider`] that yields a usable bearer token. The
//! provider is expected to map the known captcha-unlock flow onto
//! [`SessionError::ManualVerificationRequired`] so that the pipeline can
//! surface it verbatim instead of retrying a condition no retry can fix.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// An authenticated session handle for the backup API.
///
/// Holds the opaque OAuth bearer token scoped to the Drive App Data
/// space of the account that produced the backup.
#[derive(Clone)]
pub struct Session {
    access_token: String,
}

impl Session {
    /// Create a session from an already-obtained bearer token.
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// The bearer token value for the `Authorization` header.
    pub fn bearer(&self) -> &str {
        &self.access_token
    }
}

// The token is a credential; keep it out of debug output.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Supplies an authenticated [`Session`] from stored credentials.
///
/// Implementations live with the caller (the CLI performs the OAuth
/// token exchange for the device identity). The method returns a boxed
/// future so the trait stays object-safe.
pub trait SessionProvider: Send + Sync {
    /// Obtain a usable session, or a distinguishable failure.
    fn obtain(&self) -> Pin<Box<dyn Future<Output = Result<Session, SessionError>> + Send + '_>>;
}

/// Errors raised while obtaining a session.
#[derive(Debug)]
pub enum SessionError {
    /// The account requires interactive verification (captcha unlock).
    ///
    /// Not retryable: the user must visit the URL in a browser before
    /// any further attempt can succeed.
    ManualVerificationRequired { url: String },

    /// The credentials were rejected.
    Rejected { reason: String },

    /// The auth endpoint could not be reached.
    Transport { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManualVerificationRequired { url } => {
                write!(f, "manual verification required, visit {}", url)
            }
            Self::Rejected { reason } => write!(f, "authentication rejected: {}", reason),
            Self::Transport { reason } => write!(f, "auth endpoint unreachable: {}", reason),
        }
    }
}

impl std::error::Error for SessionError {}
