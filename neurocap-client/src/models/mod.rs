//! Entity types exchanged with the remote record service
//!
//! Identifiers are opaque, server-assigned integers.

pub mod assessment;
pub mod demographic;
pub mod feature;
pub mod job;
pub mod patient;
pub mod recording;

pub use assessment::{Assessment, AssessmentPayload, Subscore};
pub use demographic::{Demographic, DemographicInput, Demographics, Gender};
pub use feature::Feature;
pub use job::{JobStatusResponse, RemoteJobStatus, StartJobResponse, TaskId};
pub use patient::{Patient, PatientCreate, PatientUpdate};
pub use recording::{Recording, RecordingScope, RecordingUpload};

pub type PatientId = i64;
pub type DemographicId = i64;
pub type AssessmentId = i64;
pub type RecordingId = i64;

/// Lenient timestamp decoding
///
/// The service emits RFC 3339 for some resources and zone-less ISO 8601 for
/// others; zone-less values are taken as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s)))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", s))),
            None => Ok(None),
        }
    }

}
