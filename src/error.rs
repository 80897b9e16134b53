//! Errors that are meant to reach the user.
//!
//! Everything else in the crate uses `anyhow` with context strings. These
//! variants exist so the HTTP layer can tell a bad request from a backend
//! outage by downcasting.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Missing or malformed user input (empty task text, blank credentials).
    #[error("{0}")]
    InvalidInput(String),

    /// The operation needs a signed-in user and there is none.
    #[error("Please sign in to continue")]
    NotSignedIn,

    /// The auth backend rejected the request; carries its message verbatim
    /// when it provided one.
    #[error("{0}")]
    Auth(String),

    /// A hosted backend answered with a non-success status.
    #[error("{service} API error ({status}): {message}")]
    Backend {
        service: &'static str,
        status: u16,
        message: String,
    },
}

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Build an auth error from whatever message the backend gave us,
    /// falling back to `generic` when it gave none.
    pub fn auth(message: Option<&str>, generic: &str) -> Self {
        match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => Self::Auth(m.to_string()),
            None => Self::Auth(generic.to_string()),
        }
    }

    /// HTTP status code this error should be reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotSignedIn | Self::Auth(_) => 401,
            Self::Backend { status: 404, .. } => 404,
            Self::Backend { .. } => 502,
        }
    }
}
