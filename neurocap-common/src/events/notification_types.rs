//! Notification type definitions
//!
//! Supporting types for the ephemeral, human-readable messages published by
//! the mutation coordinator and the job tracker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a notification when it is published
///
/// Identifiers increase monotonically per bus and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

/// Closed classification of failures surfaced through notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Client-side input rejected before any remote call
    Validation,
    /// Request could not be sent or no response arrived
    Transport,
    /// Remote service answered with an error status
    Remote,
    /// Remote resource does not exist (or was deleted elsewhere)
    NotFound,
    /// Response body could not be interpreted
    Decode,
    /// Operation refused because conflicting work is in flight
    Conflict,
    /// Extraction job reported `failed`
    JobFailed,
    /// Extraction job exceeded its configured time budget
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
            ErrorKind::Remote => "remote",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Decode => "decode",
            ErrorKind::Conflict => "conflict",
            ErrorKind::JobFailed => "job_failed",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A single published notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub level: NotificationLevel,
    pub message: String,
    /// Present on error notifications
    pub error_kind: Option<ErrorKind>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    pub fn is_error(&self) -> bool {
        self.level == NotificationLevel::Error
    }
}
