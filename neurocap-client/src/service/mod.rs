//! Remote record service seam
//!
//! The coordinator and the job tracker only ever talk to the study server
//! through [`RecordService`]; [`HttpRecordService`] is the production
//! implementation and tests substitute a scripted in-memory one.

mod http;

pub use http::HttpRecordService;

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::models::{
    Assessment, AssessmentId, AssessmentPayload, Demographic, DemographicId, DemographicInput,
    Feature, JobStatusResponse, Patient, PatientCreate, PatientId, PatientUpdate, Recording,
    RecordingScope, RecordingUpload, StartJobResponse, TaskId,
};

#[async_trait]
pub trait RecordService: Send + Sync {
    async fn list_patients(&self, skip: usize, limit: usize) -> ClientResult<Vec<Patient>>;
    async fn get_patient(&self, patient_id: PatientId) -> ClientResult<Patient>;
    async fn create_patient(&self, body: &PatientCreate) -> ClientResult<Patient>;
    async fn update_patient(&self, patient_id: PatientId, body: &PatientUpdate) -> ClientResult<Patient>;
    async fn delete_patient(&self, patient_id: PatientId) -> ClientResult<()>;

    async fn list_demographics(&self, patient_id: PatientId) -> ClientResult<Vec<Demographic>>;
    async fn create_demographic(
        &self,
        patient_id: PatientId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic>;
    async fn update_demographic(
        &self,
        patient_id: PatientId,
        demographic_id: DemographicId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic>;

    async fn list_assessments(&self, patient_id: PatientId) -> ClientResult<Vec<Assessment>>;
    async fn create_assessment(
        &self,
        patient_id: PatientId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment>;
    async fn update_assessment(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment>;
    async fn delete_assessment(&self, patient_id: PatientId, assessment_id: AssessmentId) -> ClientResult<()>;

    async fn list_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<Vec<Recording>>;
    async fn upload_recording(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        upload: &RecordingUpload,
    ) -> ClientResult<Recording>;
    async fn delete_recording(&self, scope: RecordingScope) -> ClientResult<()>;

    /// Start feature extraction for one recording
    async fn start_extraction(&self, scope: RecordingScope) -> ClientResult<StartJobResponse>;
    async fn job_status(&self, scope: RecordingScope, task_id: &TaskId) -> ClientResult<JobStatusResponse>;
    async fn list_features(&self, scope: RecordingScope) -> ClientResult<Vec<Feature>>;

    /// Server-rendered CSV of every extracted feature
    async fn export_features_csv(&self) -> ClientResult<String>;
}
