//! Extraction job state machine
//!
//! `Idle → Pending → Running → {Completed | Failed}`; `Abandoned` is
//! reachable from every state that is not already finished.

use chrono::{DateTime, Utc};
use neurocap_common::events::{ClientEvent, JobState};
use serde::{Deserialize, Serialize};

use crate::models::{RecordingId, TaskId};

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTransition {
    pub recording_id: RecordingId,
    pub task_id: Option<TaskId>,
    pub old_state: JobState,
    pub new_state: JobState,
    pub progress: f64,
    pub transitioned_at: DateTime<Utc>,
}

impl JobTransition {
    pub fn to_event(&self) -> ClientEvent {
        ClientEvent::JobStateChanged {
            recording_id: self.recording_id,
            task_id: self.task_id.as_ref().map(|t| t.0.clone()),
            old_state: self.old_state,
            new_state: self.new_state,
            progress: self.progress,
            timestamp: self.transitioned_at,
        }
    }
}

/// Observable view of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub recording_id: RecordingId,
    pub task_id: Option<TaskId>,
    pub state: JobState,
    /// Progress in [0, 1]
    pub progress: f64,
    pub error: Option<String>,
    /// Number of features fetched on completion
    pub feature_count: Option<usize>,
}

/// One feature-extraction request for one recording (in-memory only)
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    recording_id: RecordingId,
    task_id: Option<TaskId>,
    state: JobState,
    progress: f64,
    error: Option<String>,
    feature_count: Option<usize>,
    ended_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(recording_id: RecordingId) -> Self {
        Self {
            recording_id,
            task_id: None,
            state: JobState::Idle,
            progress: 0.0,
            error: None,
            feature_count: None,
            ended_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    fn allows(&self, new_state: JobState) -> bool {
        use JobState::*;
        match (self.state, new_state) {
            (Idle, Pending) => true,
            (Pending | Running, Running) => true,
            (Pending | Running, Completed | Failed) => true,
            (from, Abandoned) => !from.is_finished(),
            _ => false,
        }
    }

    fn transition_to(&mut self, new_state: JobState) -> Option<JobTransition> {
        if !self.allows(new_state) {
            tracing::debug!(
                recording_id = self.recording_id,
                from = ?self.state,
                to = ?new_state,
                "Ignoring invalid job transition"
            );
            return None;
        }

        let old_state = self.state;
        self.state = new_state;
        if new_state.is_finished() {
            self.ended_at = Some(Utc::now());
        }

        Some(JobTransition {
            recording_id: self.recording_id,
            task_id: self.task_id.clone(),
            old_state,
            new_state,
            progress: self.progress,
            transitioned_at: Utc::now(),
        })
    }

    /// Remote start accepted: `Idle → Pending`
    pub fn accept(&mut self, task_id: TaskId) -> Option<JobTransition> {
        if self.state != JobState::Idle {
            return None;
        }
        self.task_id = Some(task_id);
        self.transition_to(JobState::Pending)
    }

    /// Non-terminal status tick: record progress and move to `Running`
    pub fn advance(&mut self, progress: f64) -> Option<JobTransition> {
        if !self.allows(JobState::Running) {
            return None;
        }
        self.progress = progress.clamp(0.0, 1.0);
        self.transition_to(JobState::Running)
    }

    pub fn complete(&mut self, feature_count: usize) -> Option<JobTransition> {
        if !self.allows(JobState::Completed) {
            return None;
        }
        self.progress = 1.0;
        self.feature_count = Some(feature_count);
        self.transition_to(JobState::Completed)
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Option<JobTransition> {
        if !self.allows(JobState::Failed) {
            return None;
        }
        self.error = Some(error.into());
        self.transition_to(JobState::Failed)
    }

    /// Owner teardown; a no-op once the job has finished
    pub fn abandon(&mut self) -> Option<JobTransition> {
        self.transition_to(JobState::Abandoned)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            recording_id: self.recording_id,
            task_id: self.task_id.clone(),
            state: self.state,
            progress: self.progress,
            error: self.error.clone(),
            feature_count: self.feature_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut job = ProcessingJob::new(4);
        let t = job.accept(TaskId::from("t1")).unwrap();
        assert_eq!((t.old_state, t.new_state), (JobState::Idle, JobState::Pending));

        let t = job.advance(0.4).unwrap();
        assert_eq!(t.new_state, JobState::Running);
        let t = job.advance(0.8).unwrap();
        assert_eq!((t.old_state, t.new_state), (JobState::Running, JobState::Running));
        assert_eq!(t.progress, 0.8);

        let t = job.complete(12).unwrap();
        assert_eq!(t.new_state, JobState::Completed);
        assert_eq!(job.snapshot().feature_count, Some(12));
        assert!(job.ended_at().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = ProcessingJob::new(1);
        job.accept(TaskId::from("t")).unwrap();
        job.fail("decoder crashed").unwrap();

        assert!(job.complete(3).is_none());
        assert!(job.advance(0.5).is_none());
        assert!(job.abandon().is_none());
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.snapshot().error.as_deref(), Some("decoder crashed"));
    }

    #[test]
    fn test_abandon_is_idempotent() {
        let mut job = ProcessingJob::new(1);
        assert!(job.abandon().is_some());
        assert!(job.abandon().is_none());
        assert!(job.accept(TaskId::from("late")).is_none());
        assert_eq!(job.state(), JobState::Abandoned);
    }

    #[test]
    fn test_cannot_skip_pending() {
        let mut job = ProcessingJob::new(1);
        assert!(job.advance(0.3).is_none());
        assert!(job.complete(0).is_none());
        assert_eq!(job.state(), JobState::Idle);
    }

    #[test]
    fn test_transition_event_carries_task_id() {
        let mut job = ProcessingJob::new(9);
        let event = job.accept(TaskId::from("abc")).unwrap().to_event();
        match event {
            ClientEvent::JobStateChanged {
                recording_id,
                task_id,
                new_state,
                ..
            } => {
                assert_eq!(recording_id, 9);
                assert_eq!(task_id.as_deref(), Some("abc"));
                assert_eq!(new_state, JobState::Pending);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
