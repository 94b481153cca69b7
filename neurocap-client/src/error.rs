//! Client error type

use neurocap_common::events::ErrorKind;
use thiserror::Error;

use crate::validation::ValidationErrors;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote service returned {status}: {}", detail.as_deref().unwrap_or("no detail"))]
    Remote { status: u16, detail: Option<String> },

    #[error("Not found: {}", detail.as_deref().unwrap_or("resource"))]
    NotFound { detail: Option<String> },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Remote { .. } => ErrorKind::Remote,
            ClientError::NotFound { .. } => ErrorKind::NotFound,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Conflict(_) => ErrorKind::Conflict,
            ClientError::JobFailed(_) => ErrorKind::JobFailed,
            ClientError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Operator-facing message
    ///
    /// The remote `detail` string is surfaced verbatim when present.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Remote {
                detail: Some(detail),
                ..
            }
            | ClientError::NotFound {
                detail: Some(detail),
            } => detail.clone(),
            ClientError::Remote { status, .. } => {
                format!("Request failed with status {}", status)
            }
            ClientError::NotFound { .. } => "The requested record no longer exists".to_string(),
            ClientError::Transport(_) => "Could not reach the study server".to_string(),
            ClientError::Decode(_) => "Unexpected response from the study server".to_string(),
            ClientError::Validation(errors) => errors.to_string(),
            ClientError::Conflict(msg) | ClientError::JobFailed(msg) | ClientError::Timeout(msg) => {
                msg.clone()
            }
        }
    }

    /// Remote `detail` string, when the server supplied one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Remote { detail, .. } | ClientError::NotFound { detail } => detail.as_deref(),
            _ => None,
        }
    }

    /// Transient failures leave a polling job in its current state
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}
