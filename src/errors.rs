use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("User not authenticated.")]
    AuthenticationRequired,

    #[error("Request timed out. Please try again.")]
    NetworkTimeout(Duration),

    #[error("{message}")]
    RemoteRequestFailed { status: StatusCode, message: String },

    #[error("Response body is empty.")]
    EmptyResponseBody,

    #[error("Failed to generate chat title: {0}")]
    GeneratedTitleFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChatError::NetworkTimeout(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ChatError::RemoteRequestFailed { status, .. } => Some(*status),
            ChatError::Http(e) => e.status(),
            _ => None,
        }
    }
}
