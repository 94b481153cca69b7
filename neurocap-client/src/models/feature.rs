use serde::{Deserialize, Serialize};

use super::RecordingId;

/// Named numeric value derived from a recording by extraction
///
/// Read-only from the client's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub feature_name: String,
    #[serde(alias = "feature_value")]
    pub value: f64,
    #[serde(default)]
    pub recording_id: RecordingId,
}
