//! Wire types of the extraction job endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identifier of one extraction job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// POST .../process response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub task_id: TaskId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// GET .../process/{task_id} response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn pending() -> Self {
        Self::with_status(RemoteJobStatus::Pending, 0.0)
    }

    pub fn running(progress: f64) -> Self {
        Self::with_status(RemoteJobStatus::Running, progress)
    }

    pub fn completed() -> Self {
        Self::with_status(RemoteJobStatus::Completed, 1.0)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(RemoteJobStatus::Failed, 0.0)
        }
    }

    fn with_status(status: RemoteJobStatus, progress: f64) -> Self {
        Self {
            status,
            progress,
            result: None,
            error: None,
        }
    }

    /// Progress clamped to [0, 1]; non-finite values read as 0
    pub fn clamped_progress(&self) -> f64 {
        if self.progress.is_finite() {
            self.progress.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
