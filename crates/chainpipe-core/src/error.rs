//! Error types for the chainpipe pipeline and list queries.

use thiserror::Error;

/// Errors that can occur while ingesting, storing or listing chain data.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Malformed ingestion event: {0}")]
    Malformed(String),

    #[error("Log decode error: {0}")]
    Decode(String),

    #[error("Pipeline is not wired: missing {0}")]
    NotWired(&'static str),

    #[error("Cursor {0} does not resolve to an existing item")]
    CursorNotFound(String),

    #[error("Invalid cursor '{0}'")]
    InvalidCursor(String),

    #[error("Nothing to do, zero items requested")]
    InvalidPageSize,

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Returns `true` if the error was caused by the caller's list request
    /// rather than by the backend.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::CursorNotFound(_) | Self::InvalidCursor(_) | Self::InvalidPageSize
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("document encoding: {e}"))
    }
}
