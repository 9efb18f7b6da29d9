//! Error handling for bilimod
//!
//! Per-item moderation failures are never errors: they travel as
//! [`ActionOutcome`](crate::action::ActionOutcome) values. This type only
//! covers failures that stop the whole command.

use thiserror::Error;

/// Main error type for bilimod operations
#[derive(Error, Debug)]
pub enum BilimodError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser cookie error: {0}")]
    BrowserCookie(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid user id: '{0}'")]
    InvalidUserId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("A batch run is already in progress")]
    BatchInProgress,
}

/// Result type alias for bilimod operations
pub type Result<T> = std::result::Result<T, BilimodError>;
