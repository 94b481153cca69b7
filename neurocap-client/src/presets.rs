//! Subscore preset resolution and assessment drafts
//!
//! Each scored instrument carries a fixed, ordered subscore schema whose
//! per-item maxima sum to the instrument's total. Free-form assessment types
//! have no schema.

use chrono::{DateTime, Utc};

use crate::models::{Assessment, AssessmentPayload, Subscore};
use crate::validation::{FieldError, ValidationErrors};

/// One `(name, max_score)` entry of an instrument's subscore schema
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscoreSpec {
    pub name: &'static str,
    pub max_score: f64,
}

const fn spec(name: &'static str, max_score: f64) -> SubscoreSpec {
    SubscoreSpec { name, max_score }
}

const MMSE_SCHEMA: [SubscoreSpec; 11] = [
    spec("Orientation – Time", 5.0),
    spec("Orientation – Place", 5.0),
    spec("Registration", 3.0),
    spec("Attention & Calculation", 5.0),
    spec("Recall", 3.0),
    spec("Language – Naming", 2.0),
    spec("Language – Repetition", 1.0),
    spec("Language – Comprehension", 3.0),
    spec("Reading", 1.0),
    spec("Writing", 1.0),
    spec("Visuoconstruction", 1.0),
];

const MOCA_SCHEMA: [SubscoreSpec; 7] = [
    spec("Visuospatial/Executive", 5.0),
    spec("Naming", 3.0),
    spec("Attention", 6.0),
    spec("Language", 3.0),
    spec("Abstraction", 2.0),
    spec("Delayed Recall", 5.0),
    spec("Orientation", 6.0),
];

/// Assessment type as a closed set of instruments
///
/// `Other` carries the free-text label (an "Other" entry or an audio task
/// name) and has an empty schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instrument {
    Mmse,
    Moca,
    Other(String),
}

impl Instrument {
    /// Resolve a stored `assessment_type` label
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "MMSE" => Instrument::Mmse,
            "MoCA" => Instrument::Moca,
            other => Instrument::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Instrument::Mmse => "MMSE",
            Instrument::Moca => "MoCA",
            Instrument::Other(label) => label,
        }
    }

    /// Ordered subscore schema, empty for free-form types
    pub fn subscore_schema(&self) -> &'static [SubscoreSpec] {
        match self {
            Instrument::Mmse => &MMSE_SCHEMA,
            Instrument::Moca => &MOCA_SCHEMA,
            Instrument::Other(_) => &[],
        }
    }

    /// Fixed instrument total, `None` for free-form types
    pub fn max_possible_score(&self) -> Option<f64> {
        match self {
            Instrument::Other(_) => None,
            fixed => Some(fixed.subscore_schema().iter().map(|s| s.max_score).sum()),
        }
    }
}

/// Editable subscore; `score` holds raw operator input
#[derive(Debug, Clone, PartialEq)]
pub struct SubscoreDraft {
    pub name: String,
    pub score: String,
    pub max_score: Option<f64>,
}

/// Re-derive a subscore list for `instrument`
///
/// Entries whose name exists in the new schema keep their entered score;
/// all others start empty. Free-form types yield an empty list.
pub fn rederive_subscores(previous: &[SubscoreDraft], instrument: &Instrument) -> Vec<SubscoreDraft> {
    instrument
        .subscore_schema()
        .iter()
        .map(|spec| SubscoreDraft {
            name: spec.name.to_string(),
            score: previous
                .iter()
                .find(|p| p.name == spec.name)
                .map(|p| p.score.clone())
                .unwrap_or_default(),
            max_score: Some(spec.max_score),
        })
        .collect()
}

/// Parse operator input as a finite number
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// In-progress create or edit of an assessment
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentDraft {
    instrument: Instrument,
    pub score: String,
    pub assessment_date: DateTime<Utc>,
    pub diagnosis: String,
    pub notes: String,
    subscores: Vec<SubscoreDraft>,
}

impl AssessmentDraft {
    /// Blank draft seeded from the instrument's preset
    pub fn new(instrument: Instrument) -> Self {
        let subscores = rederive_subscores(&[], &instrument);
        Self {
            instrument,
            score: String::new(),
            assessment_date: Utc::now(),
            diagnosis: String::new(),
            notes: String::new(),
            subscores,
        }
    }

    /// Editable draft of a stored assessment
    ///
    /// Stored subscores are carried over by name onto the preset; when the
    /// assessment has none, the preset seeds empty entries.
    pub fn from_assessment(assessment: &Assessment) -> Self {
        let instrument = Instrument::from_label(&assessment.assessment_type);
        let stored: Vec<SubscoreDraft> = assessment
            .subscores
            .iter()
            .map(|s| SubscoreDraft {
                name: s.name.clone(),
                score: s.score.to_string(),
                max_score: s.max_score,
            })
            .collect();

        Self {
            subscores: rederive_subscores(&stored, &instrument),
            instrument,
            score: assessment.score.to_string(),
            assessment_date: assessment.assessment_date,
            diagnosis: assessment.diagnosis.clone().unwrap_or_default(),
            notes: assessment.notes.clone().unwrap_or_default(),
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn subscores(&self) -> &[SubscoreDraft] {
        &self.subscores
    }

    /// Change the assessment type and re-derive subscores
    pub fn set_instrument(&mut self, instrument: Instrument) {
        self.subscores = rederive_subscores(&self.subscores, &instrument);
        self.instrument = instrument;
    }

    /// Enter a subscore value by name; returns `false` for unknown names
    pub fn set_subscore_score(&mut self, name: &str, raw: impl Into<String>) -> bool {
        match self.subscores.iter_mut().find(|s| s.name == name) {
            Some(subscore) => {
                subscore.score = raw.into();
                true
            }
            None => false,
        }
    }

    /// Build the wire payload
    ///
    /// The overall score must be numeric. Subscores that do not parse as
    /// finite numbers are dropped.
    pub fn to_payload(&self) -> Result<AssessmentPayload, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let assessment_type = self.instrument.label().trim().to_string();
        if assessment_type.is_empty() {
            errors.push(FieldError::new("assessment_type", "Assessment type is required"));
        }

        let score = parse_number(&self.score);
        if score.is_none() {
            errors.push(FieldError::new("score", "Score must be a number"));
        }

        let subscores = self
            .subscores
            .iter()
            .filter_map(|draft| {
                parse_number(&draft.score).map(|score| Subscore {
                    name: draft.name.clone(),
                    score,
                    max_score: draft.max_score,
                })
            })
            .collect();

        match score {
            Some(score) if errors.is_empty() => Ok(AssessmentPayload {
                assessment_type,
                score,
                max_possible_score: self.instrument.max_possible_score(),
                assessment_date: self.assessment_date,
                diagnosis: non_empty(&self.diagnosis),
                notes: non_empty(&self.notes),
                subscores,
            }),
            _ => Err(errors),
        }
    }
}
