//! Error types for the release health tracker

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking release stats
#[derive(Error, Debug)]
pub enum Error {
    /// Remote endpoint unreachable, or the request timed out
    #[error("Connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Remote endpoint answered with a non-success status
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// Remote response could not be decoded
    #[error("Failed to parse response from {url}: {reason}")]
    ResponseParse { url: String, reason: String },

    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// JSON encode/decode failure on persisted state
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of a remote fetch: connection, status or a response
    /// that could not be parsed. These only ever skip the current operation.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Status { .. } | Error::ResponseParse { .. }
        )
    }

    /// Short label used for metric labels and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection",
            Error::Status { .. } => "status",
            Error::ResponseParse { .. } => "parse",
            Error::Store(_) => "store",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }
}
