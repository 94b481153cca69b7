use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{timestamp, DemographicId, PatientId};

pub const AGE_RANGE: std::ops::RangeInclusive<i32> = 0..=120;
pub const EDUCATION_YEARS_RANGE: std::ops::RangeInclusive<i32> = 0..=30;

/// Longest gender label the service stores
pub const GENDER_MAX_LEN: usize = 10;

/// Gender as stored by the service
///
/// The service keeps a free string, so labels outside the known set decode
/// as [`Gender::Unrecognized`] instead of failing the whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Gender {
    Male,
    Female,
    Other,
    Undisclosed,
    Unrecognized(String),
}

impl Gender {
    /// Wire label; every known label fits within [`GENDER_MAX_LEN`]
    pub fn label(&self) -> &str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
            Gender::Undisclosed => "Not stated",
            Gender::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for Gender {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            "other" => Gender::Other,
            "not stated" | "undisclosed" | "prefer not to say" => Gender::Undisclosed,
            _ => Gender::Unrecognized(raw),
        }
    }
}

impl From<Gender> for String {
    fn from(gender: Gender) -> Self {
        match gender {
            Gender::Unrecognized(raw) => raw,
            known => known.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographic {
    pub demographic_id: DemographicId,
    pub patient_id: PatientId,
    pub age: i32,
    pub gender: Gender,
    pub education_years: Option<i32>,
    pub collection_date: NaiveDate,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// POST / PUT body for a demographic record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemographicInput {
    pub age: i32,
    pub gender: Gender,
    pub education_years: Option<i32>,
    pub collection_date: NaiveDate,
}

/// A patient's demographics collection
///
/// The service allows several records per patient, but the client treats
/// the first one returned as canonical and edits only that one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demographics(pub Vec<Demographic>);

impl Demographics {
    pub fn canonical(&self) -> Option<&Demographic> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Demographic>> for Demographics {
    fn from(records: Vec<Demographic>) -> Self {
        Self(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: DemographicId) -> Demographic {
        Demographic {
            demographic_id: id,
            patient_id: 1,
            age: 70,
            gender: Gender::Female,
            education_years: Some(12),
            collection_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_first_record_is_canonical() {
        let demographics = Demographics::from(vec![record(9), record(3)]);
        assert_eq!(demographics.canonical().unwrap().demographic_id, 9);
        assert!(Demographics::default().canonical().is_none());
    }

    #[test]
    fn test_gender_wire_labels() {
        assert_eq!(
            serde_json::to_string(&Gender::Undisclosed).unwrap(),
            "\"Not stated\""
        );
        let parsed: Gender = serde_json::from_str("\"Prefer not to say\"").unwrap();
        assert_eq!(parsed, Gender::Undisclosed);
        let parsed: Gender = serde_json::from_str("\"male\"").unwrap();
        assert_eq!(parsed, Gender::Male);

        for known in [Gender::Male, Gender::Female, Gender::Other, Gender::Undisclosed] {
            assert!(known.label().chars().count() <= GENDER_MAX_LEN, "{:?}", known);
        }
    }

    #[test]
    fn test_unknown_gender_keeps_collection_decodable() {
        let body = r#"[
            {"demographic_id": 1, "patient_id": 4, "age": 71, "gender": "M",
             "education_years": null, "collection_date": "2024-02-01"},
            {"demographic_id": 2, "patient_id": 4, "age": 71, "gender": "Female",
             "education_years": 9, "collection_date": "2024-03-01"}
        ]"#;
        let records: Vec<Demographic> = serde_json::from_str(body).unwrap();

        assert_eq!(records[0].gender, Gender::Unrecognized("M".to_string()));
        assert_eq!(records[1].gender, Gender::Female);
        assert_eq!(serde_json::to_string(&records[0].gender).unwrap(), "\"M\"");
    }
}
