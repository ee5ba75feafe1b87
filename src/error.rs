//! Error types for the sync client and its transports.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network-level failure (connect, timeout, broken body).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: StatusCode, body: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("sync client is closed")]
    Closed,
}

impl SyncError {
    /// Whether the poll loop should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Server { .. } | Self::MalformedPayload(_)
        )
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
