//! reqwest-backed record service

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RecordService;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    Assessment, AssessmentId, AssessmentPayload, Demographic, DemographicId, DemographicInput,
    Feature, JobStatusResponse, Patient, PatientCreate, PatientId, PatientUpdate, Recording,
    RecordingScope, RecordingUpload, StartJobResponse, TaskId,
};

const USER_AGENT: &str = concat!("neurocap/", env!("CARGO_PKG_VERSION"));

/// Error body shape of the study server
///
/// `detail` is either a string or a list of `{msg}` validation entries.
#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

fn extract_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()).map(str::to_string))
                .collect();
            (!msgs.is_empty()).then(|| msgs.join("; "))
        }
        _ => None,
    }
}

pub struct HttpRecordService {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpRecordService {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: neurocap_common::config::normalize_base_url(&base_url.into()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn recording_path(scope: RecordingScope) -> String {
        format!(
            "/patients/{}/assessments/{}/recordings/{}",
            scope.patient_id, scope.assessment_id, scope.recording_id
        )
    }

    /// Map a non-success status to a `ClientError`, keeping the `detail` text
    async fn check(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = extract_detail(&body);
        tracing::debug!(status = status.as_u16(), detail = ?detail, "Study server returned error");

        if status == StatusCode::NOT_FOUND {
            Err(ClientError::NotFound { detail })
        } else {
            Err(ClientError::Remote {
                status: status.as_u16(),
                detail,
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.http_client.get(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn send_json<B, T>(&self, method: reqwest::Method, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .request(method, self.url(path))
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn delete(&self, path: &str) -> ClientResult<()> {
        let response = self.http_client.delete(self.url(path)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordService for HttpRecordService {
    async fn list_patients(&self, skip: usize, limit: usize) -> ClientResult<Vec<Patient>> {
        self.get_json(&format!("/patients/?skip={}&limit={}", skip, limit))
            .await
    }

    async fn get_patient(&self, patient_id: PatientId) -> ClientResult<Patient> {
        self.get_json(&format!("/patients/{}", patient_id)).await
    }

    async fn create_patient(&self, body: &PatientCreate) -> ClientResult<Patient> {
        self.send_json(reqwest::Method::POST, "/patients/", body).await
    }

    async fn update_patient(&self, patient_id: PatientId, body: &PatientUpdate) -> ClientResult<Patient> {
        self.send_json(reqwest::Method::PUT, &format!("/patients/{}", patient_id), body)
            .await
    }

    async fn delete_patient(&self, patient_id: PatientId) -> ClientResult<()> {
        self.delete(&format!("/patients/{}", patient_id)).await
    }

    async fn list_demographics(&self, patient_id: PatientId) -> ClientResult<Vec<Demographic>> {
        self.get_json(&format!("/patients/{}/demographics/", patient_id))
            .await
    }

    async fn create_demographic(
        &self,
        patient_id: PatientId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/patients/{}/demographics/", patient_id),
            body,
        )
        .await
    }

    async fn update_demographic(
        &self,
        patient_id: PatientId,
        demographic_id: DemographicId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/patients/{}/demographics/{}", patient_id, demographic_id),
            body,
        )
        .await
    }

    async fn list_assessments(&self, patient_id: PatientId) -> ClientResult<Vec<Assessment>> {
        self.get_json(&format!("/patients/{}/assessments/", patient_id))
            .await
    }

    async fn create_assessment(
        &self,
        patient_id: PatientId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/patients/{}/assessments/", patient_id),
            body,
        )
        .await
    }

    async fn update_assessment(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/patients/{}/assessments/{}", patient_id, assessment_id),
            body,
        )
        .await
    }

    async fn delete_assessment(&self, patient_id: PatientId, assessment_id: AssessmentId) -> ClientResult<()> {
        self.delete(&format!("/patients/{}/assessments/{}", patient_id, assessment_id))
            .await
    }

    async fn list_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<Vec<Recording>> {
        self.get_json(&format!(
            "/patients/{}/assessments/{}/recordings/",
            patient_id, assessment_id
        ))
        .await
    }

    async fn upload_recording(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        upload: &RecordingUpload,
    ) -> ClientResult<Recording> {
        let file_part = Part::bytes(upload.audio.clone()).file_name(upload.file_name.clone());
        let form = Form::new()
            .part("file", file_part)
            .text("task_type", upload.task_type.trim().to_string())
            .text("recording_device", upload.device_label().to_string())
            .text("recording_date", upload.recording_date.to_rfc3339());

        tracing::debug!(
            patient_id,
            assessment_id,
            bytes = upload.audio.len(),
            "Uploading recording"
        );

        let response = self
            .http_client
            .post(self.url(&format!(
                "/patients/{}/assessments/{}/recordings/",
                patient_id, assessment_id
            )))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn delete_recording(&self, scope: RecordingScope) -> ClientResult<()> {
        self.delete(&Self::recording_path(scope)).await
    }

    async fn start_extraction(&self, scope: RecordingScope) -> ClientResult<StartJobResponse> {
        let response = self
            .http_client
            .post(self.url(&format!("{}/process", Self::recording_path(scope))))
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn job_status(&self, scope: RecordingScope, task_id: &TaskId) -> ClientResult<JobStatusResponse> {
        self.get_json(&format!("{}/process/{}", Self::recording_path(scope), task_id))
            .await
    }

    async fn list_features(&self, scope: RecordingScope) -> ClientResult<Vec<Feature>> {
        let mut features: Vec<Feature> = self
            .get_json(&format!("{}/features/", Self::recording_path(scope)))
            .await?;
        for feature in &mut features {
            feature.recording_id = scope.recording_id;
        }
        Ok(features)
    }

    async fn export_features_csv(&self) -> ClientResult<String> {
        let response = self
            .http_client
            .get(self.url("/export/features/csv"))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_string_detail() {
        assert_eq!(
            extract_detail(r#"{"detail": "Patient not found"}"#).as_deref(),
            Some("Patient not found")
        );
    }

    #[test]
    fn test_extract_validation_list_detail() {
        let body = r#"{"detail": [{"loc": ["body", "age"], "msg": "too old"},
                                  {"loc": ["body", "gender"], "msg": "bad gender"}]}"#;
        assert_eq!(extract_detail(body).as_deref(), Some("too old; bad gender"));
    }

    #[test]
    fn test_extract_detail_absent() {
        assert!(extract_detail("Internal Server Error").is_none());
        assert!(extract_detail(r#"{"detail": ""}"#).is_none());
        assert!(extract_detail(r#"{"error": "x"}"#).is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let service = HttpRecordService::new("http://localhost:8000/api/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(service.base_url(), "http://localhost:8000/api/v1");
    }
}
