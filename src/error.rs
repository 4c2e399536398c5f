//! Error types for ragsync.
//!
//! Local storage failures are always surfaced to the caller. Remote failures
//! are surfaced as [`Error::RemoteUnavailable`] or [`Error::Remote`] so that
//! callers can degrade to local-only operation instead of aborting.

use thiserror::Error;

/// Main error type for ragsync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The uploaded file could not be read or turned into text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Local SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A stored embedding or metadata blob could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote mirror is not configured or did not answer in time.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote mirror answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the remote mirror rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_) | Error::Remote(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::RemoteUnavailable(e.to_string())
        } else {
            Error::Remote(e.to_string())
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
