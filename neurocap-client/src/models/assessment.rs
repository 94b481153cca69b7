use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{timestamp, AssessmentId, PatientId};

/// Named component of an assessment's total score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscore {
    pub name: String,
    pub score: f64,
    pub max_score: Option<f64>,
}

/// A scored instrument or an audio-elicitation task belonging to a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub assessment_id: AssessmentId,
    pub patient_id: PatientId,
    pub assessment_type: String,
    pub score: f64,
    pub max_possible_score: Option<f64>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub assessment_date: DateTime<Utc>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub subscores: Vec<Subscore>,
}

/// POST / PUT body for an assessment
///
/// Subscores travel embedded in this payload and have no identity across
/// saves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentPayload {
    pub assessment_type: String,
    pub score: f64,
    pub max_possible_score: Option<f64>,
    pub assessment_date: DateTime<Utc>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub subscores: Vec<Subscore>,
}

impl AssessmentPayload {
    /// Placeholder assessment that owns a freshly uploaded audio test
    pub fn audio_test(task_label: &str, assessment_date: DateTime<Utc>) -> Self {
        Self {
            assessment_type: task_label.trim().to_string(),
            score: 0.0,
            max_possible_score: None,
            assessment_date,
            diagnosis: None,
            notes: Some(format!("Audio test: {}", task_label.trim())),
            subscores: Vec::new(),
        }
    }
}
