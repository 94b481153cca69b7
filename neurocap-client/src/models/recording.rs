use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{timestamp, AssessmentId, PatientId, RecordingId};

/// Uploaded audio artifact tied to an assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: RecordingId,
    pub assessment_id: AssessmentId,
    pub filename: String,
    /// Server-relative path of the stored audio
    pub file_path: String,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub recording_device: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub recording_date: DateTime<Utc>,
}

/// Full path of a recording in the resource hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingScope {
    pub patient_id: PatientId,
    pub assessment_id: AssessmentId,
    pub recording_id: RecordingId,
}

impl RecordingScope {
    pub fn new(patient_id: PatientId, assessment_id: AssessmentId, recording_id: RecordingId) -> Self {
        Self {
            patient_id,
            assessment_id,
            recording_id,
        }
    }
}

/// Multipart upload of a new recording
#[derive(Clone, PartialEq)]
pub struct RecordingUpload {
    pub file_name: String,
    pub audio: Vec<u8>,
    pub task_type: String,
    pub recording_device: Option<String>,
    pub recording_date: DateTime<Utc>,
}

impl RecordingUpload {
    pub fn new(file_name: impl Into<String>, audio: Vec<u8>, task_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            audio,
            task_type: task_type.into(),
            recording_device: None,
            recording_date: Utc::now(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.recording_device = Some(device.into());
        self
    }

    /// Device label sent on the wire; the service requires one
    pub fn device_label(&self) -> &str {
        match self.recording_device.as_deref().map(str::trim) {
            Some(device) if !device.is_empty() => device,
            _ => "Unknown",
        }
    }
}

impl std::fmt::Debug for RecordingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingUpload")
            .field("file_name", &self.file_name)
            .field("audio_bytes", &self.audio.len())
            .field("task_type", &self.task_type)
            .field("recording_device", &self.recording_device)
            .field("recording_date", &self.recording_date)
            .finish()
    }
}
