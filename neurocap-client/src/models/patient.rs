use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{timestamp, PatientId};

/// Root of the entity hierarchy
///
/// Deleting a patient cascades server-side to every descendant entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub study_identifier: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
}

/// POST /patients body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientCreate {
    pub study_identifier: String,
}

/// PUT /patients/{id} body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_identifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_zone_less_timestamps() {
        let patient: Patient = serde_json::from_str(
            r#"{"patient_id": 4, "study_identifier": "P004",
                "created_at": "2024-02-01T09:00:00", "updated_at": "2024-02-02T09:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(patient.patient_id, 4);
        assert!(patient.updated_at > patient.created_at);
    }
}
