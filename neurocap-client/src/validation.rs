//! Client-side validation gate
//!
//! Runs before any remote call. Failures are returned as field errors for
//! inline display and never reach the notification bus.

use std::fmt;

use crate::models::demographic::{AGE_RANGE, EDUCATION_YEARS_RANGE, GENDER_MAX_LEN};
use crate::models::{DemographicInput, RecordingUpload};

pub const STUDY_IDENTIFIER_MAX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Non-empty set of field errors for one submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Trim and bound-check a study identifier, returning the trimmed value
pub fn validate_study_identifier(raw: &str) -> Result<String, ValidationErrors> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(FieldError::new("study_identifier", "Study ID is required").into());
    }
    if len > STUDY_IDENTIFIER_MAX_LEN {
        return Err(FieldError::new(
            "study_identifier",
            format!("Study ID must be at most {} characters", STUDY_IDENTIFIER_MAX_LEN),
        )
        .into());
    }
    Ok(trimmed.to_string())
}

pub fn validate_demographic(input: &DemographicInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if !AGE_RANGE.contains(&input.age) {
        errors.push(FieldError::new(
            "age",
            format!("Age must be between {} and {}", AGE_RANGE.start(), AGE_RANGE.end()),
        ));
    }

    let gender = input.gender.label().trim();
    if gender.is_empty() {
        errors.push(FieldError::new("gender", "Gender is required"));
    } else if gender.chars().count() > GENDER_MAX_LEN {
        errors.push(FieldError::new(
            "gender",
            format!("Gender must be at most {} characters", GENDER_MAX_LEN),
        ));
    }

    if let Some(years) = input.education_years {
        if !EDUCATION_YEARS_RANGE.contains(&years) {
            errors.push(FieldError::new(
                "education_years",
                format!(
                    "Education years must be between {} and {}",
                    EDUCATION_YEARS_RANGE.start(),
                    EDUCATION_YEARS_RANGE.end()
                ),
            ));
        }
    }

    errors.into_result()
}

pub fn validate_recording_upload(upload: &RecordingUpload) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if upload.audio.is_empty() {
        errors.push(FieldError::new("file", "Please select an audio file"));
    }
    if upload.task_type.trim().is_empty() {
        errors.push(FieldError::new("task_type", "Task type is required"));
    }

    errors.into_result()
}
