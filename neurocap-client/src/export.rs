//! Patient list CSV export
//!
//! Every field is quoted, internal quotes are doubled, rows end with `\n`.

use chrono::{DateTime, Utc};

use crate::error::{ClientError, ClientResult};
use crate::models::{Patient, PatientId};

pub const PATIENT_CSV_HEADER: [&str; 4] = ["Patient ID", "Study ID", "Created At", "Updated At"];

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = fields.into_iter().map(|f| quote(f.as_ref())).collect();
    format!("{}\n", quoted.join(","))
}

pub fn patients_to_csv(patients: &[Patient]) -> String {
    let mut csv = row(PATIENT_CSV_HEADER);
    for patient in patients {
        csv.push_str(&row([
            patient.patient_id.to_string(),
            patient.study_identifier.clone(),
            patient.created_at.to_rfc3339(),
            patient.updated_at.to_rfc3339(),
        ]));
    }
    csv
}

/// Split CSV text into records of fields, honouring quotes
fn parse_records(text: &str) -> ClientResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ClientError::Decode("Unterminated quoted CSV field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn parse_timestamp(raw: &str, line: usize) -> ClientResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ClientError::Decode(format!("line {}: bad timestamp {:?}: {}", line, raw, e)))
}

/// Read back a patient export
pub fn parse_patients_csv(text: &str) -> ClientResult<Vec<Patient>> {
    let mut records = parse_records(text)?.into_iter();

    match records.next() {
        Some(header) if header == PATIENT_CSV_HEADER => {}
        Some(header) => {
            return Err(ClientError::Decode(format!("Unexpected CSV header: {:?}", header)));
        }
        None => return Ok(Vec::new()),
    }

    records
        .enumerate()
        .map(|(idx, record)| {
            let line = idx + 2;
            let [id, study_identifier, created_at, updated_at]: [String; 4] =
                record.try_into().map_err(|r: Vec<String>| {
                    ClientError::Decode(format!("line {}: expected 4 fields, got {}", line, r.len()))
                })?;
            let patient_id: PatientId = id
                .parse()
                .map_err(|_| ClientError::Decode(format!("line {}: bad patient id {:?}", line, id)))?;
            Ok(Patient {
                patient_id,
                study_identifier,
                created_at: parse_timestamp(&created_at, line)?,
                updated_at: parse_timestamp(&updated_at, line)?,
            })
        })
        .collect()
}
