//! Extraction job type definitions
//!
//! Shared by the job tracker (which owns the state machine) and by any
//! subscriber rendering job progress.

use serde::{Deserialize, Serialize};

/// Lifecycle of one feature-extraction request for one recording
///
/// `Idle → Pending → Running → {Completed | Failed}`, with `Abandoned`
/// reachable from any non-terminal state when the owner tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
    Abandoned,
}

impl JobState {
    /// Completed, failed or abandoned: no further transitions follow
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Abandoned)
    }
}
