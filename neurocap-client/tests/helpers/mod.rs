//! Shared test helpers
//!
//! [`MockRecordService`] is an in-memory study server: it keeps real
//! entity tables, records every call in order, replays scripted job status
//! sequences per recording, and lets a test inject failures or hold status
//! responses behind a gate.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use neurocap_client::error::{ClientError, ClientResult};
use neurocap_client::models::{
    Assessment, AssessmentId, AssessmentPayload, Demographic, DemographicId, DemographicInput,
    Feature, JobStatusResponse, Patient, PatientCreate, PatientId, PatientUpdate, Recording,
    RecordingId, RecordingScope, RecordingUpload, StartJobResponse, TaskId,
};
use neurocap_client::service::RecordService;
use neurocap_client::StudyClient;
use neurocap_client::tracker::PollSettings;
use neurocap_common::events::{ClientEvent, Notification, NotificationBus, NotificationLevel};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// Every service call, in the order it was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPatients { skip: usize, limit: usize },
    GetPatient(PatientId),
    CreatePatient(String),
    UpdatePatient(PatientId),
    DeletePatient(PatientId),
    ListDemographics(PatientId),
    CreateDemographic(PatientId),
    UpdateDemographic(PatientId, DemographicId),
    ListAssessments(PatientId),
    CreateAssessment(PatientId),
    UpdateAssessment(PatientId, AssessmentId),
    DeleteAssessment(PatientId, AssessmentId),
    ListRecordings(PatientId, AssessmentId),
    UploadRecording(PatientId, AssessmentId),
    DeleteRecording(RecordingId),
    StartExtraction(RecordingId),
    JobStatus(RecordingId),
    ListFeatures(RecordingId),
    ExportFeatures,
}

/// Operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListPatients,
    CreatePatient,
    UpdatePatient,
    DeletePatient,
    ListDemographics,
    SaveDemographic,
    ListAssessments,
    CreateAssessment,
    UpdateAssessment,
    DeleteAssessment,
    ListRecordings,
    UploadRecording,
    DeleteRecording,
    StartExtraction,
    JobStatus,
    ListFeatures,
}

#[derive(Debug, Clone)]
pub enum Failure {
    Remote { status: u16, detail: Option<String> },
    Transport,
    NotFound,
}

impl Failure {
    pub fn detail(status: u16, detail: &str) -> Self {
        Failure::Remote {
            status,
            detail: Some(detail.to_string()),
        }
    }

    fn to_error(&self) -> ClientError {
        match self {
            Failure::Remote { status, detail } => ClientError::Remote {
                status: *status,
                detail: detail.clone(),
            },
            Failure::Transport => ClientError::Transport("connection refused".to_string()),
            Failure::NotFound => ClientError::NotFound { detail: None },
        }
    }
}

#[derive(Default)]
struct Store {
    next_id: i64,
    patients: Vec<Patient>,
    demographics: Vec<Demographic>,
    assessments: Vec<Assessment>,
    recordings: Vec<(PatientId, Recording)>,
    features: HashMap<RecordingId, Vec<Feature>>,
    status_scripts: HashMap<RecordingId, VecDeque<JobStatusResponse>>,
    starts: HashMap<RecordingId, usize>,
    fail_once: HashMap<Op, VecDeque<Failure>>,
    fail_always: HashMap<Op, Failure>,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_failure(&mut self, op: Op) -> Option<ClientError> {
        if let Some(queue) = self.fail_once.get_mut(&op) {
            if let Some(failure) = queue.pop_front() {
                return Some(failure.to_error());
            }
        }
        self.fail_always.get(&op).map(Failure::to_error)
    }
}

#[derive(Default)]
pub struct MockRecordService {
    store: Mutex<Store>,
    calls: Mutex<Vec<Call>>,
    status_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRecordService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: Op) -> ClientResult<()> {
        match self.store.lock().unwrap().take_failure(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_next(&self, op: Op, failure: Failure) {
        self.store
            .lock()
            .unwrap()
            .fail_once
            .entry(op)
            .or_default()
            .push_back(failure);
    }

    pub fn fail_always(&self, op: Op, failure: Failure) {
        self.store.lock().unwrap().fail_always.insert(op, failure);
    }

    /// Status responses replayed for a recording; the last one repeats
    pub fn script_status(&self, recording_id: RecordingId, sequence: Vec<JobStatusResponse>) {
        self.store
            .lock()
            .unwrap()
            .status_scripts
            .insert(recording_id, sequence.into());
    }

    pub fn set_features(&self, recording_id: RecordingId, names: &[&str]) {
        let features = names
            .iter()
            .enumerate()
            .map(|(idx, name)| Feature {
                feature_name: name.to_string(),
                value: idx as f64 + 0.5,
                recording_id,
            })
            .collect();
        self.store
            .lock()
            .unwrap()
            .features
            .insert(recording_id, features);
    }

    /// Hold every status response until a permit is released
    pub fn gate_status(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn starts_for(&self, recording_id: RecordingId) -> usize {
        self.store
            .lock()
            .unwrap()
            .starts
            .get(&recording_id)
            .copied()
            .unwrap_or(0)
    }

    /// Seed a patient directly into the server tables
    pub fn seed_patient(&self, study_identifier: &str) -> Patient {
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let patient = Patient {
            patient_id: store.next_id(),
            study_identifier: study_identifier.to_string(),
            created_at: now,
            updated_at: now,
        };
        store.patients.push(patient.clone());
        patient
    }

    pub fn seed_assessment(&self, patient_id: PatientId, assessment_type: &str) -> Assessment {
        let mut store = self.store.lock().unwrap();
        let assessment = Assessment {
            assessment_id: store.next_id(),
            patient_id,
            assessment_type: assessment_type.to_string(),
            score: 0.0,
            max_possible_score: None,
            assessment_date: Utc::now(),
            diagnosis: None,
            notes: None,
            subscores: Vec::new(),
        };
        store.assessments.push(assessment.clone());
        assessment
    }

    pub fn seed_recording(&self, patient_id: PatientId, assessment_id: AssessmentId) -> RecordingScope {
        let mut store = self.store.lock().unwrap();
        let recording_id = store.next_id();
        store.recordings.push((
            patient_id,
            Recording {
                recording_id,
                assessment_id,
                filename: format!("rec-{}.wav", recording_id),
                file_path: format!("uploads/rec-{}.wav", recording_id),
                task_type: Some("Cookie Theft".to_string()),
                recording_device: None,
                recording_date: Utc::now(),
            },
        ));
        RecordingScope::new(patient_id, assessment_id, recording_id)
    }

    pub fn patient_count(&self) -> usize {
        self.store.lock().unwrap().patients.len()
    }
}

#[async_trait]
impl RecordService for MockRecordService {
    async fn list_patients(&self, skip: usize, limit: usize) -> ClientResult<Vec<Patient>> {
        self.record(Call::ListPatients { skip, limit });
        self.check(Op::ListPatients)?;
        let store = self.store.lock().unwrap();
        Ok(store.patients.iter().skip(skip).take(limit).cloned().collect())
    }

    async fn get_patient(&self, patient_id: PatientId) -> ClientResult<Patient> {
        self.record(Call::GetPatient(patient_id));
        let store = self.store.lock().unwrap();
        store
            .patients
            .iter()
            .find(|p| p.patient_id == patient_id)
            .cloned()
            .ok_or(ClientError::NotFound {
                detail: Some("Patient not found".to_string()),
            })
    }

    async fn create_patient(&self, body: &PatientCreate) -> ClientResult<Patient> {
        self.record(Call::CreatePatient(body.study_identifier.clone()));
        self.check(Op::CreatePatient)?;
        let mut store = self.store.lock().unwrap();
        if store
            .patients
            .iter()
            .any(|p| p.study_identifier == body.study_identifier)
        {
            return Err(ClientError::Remote {
                status: 400,
                detail: Some("Study identifier already exists".to_string()),
            });
        }
        let now = Utc::now();
        let patient = Patient {
            patient_id: store.next_id(),
            study_identifier: body.study_identifier.clone(),
            created_at: now,
            updated_at: now,
        };
        store.patients.push(patient.clone());
        Ok(patient)
    }

    async fn update_patient(&self, patient_id: PatientId, body: &PatientUpdate) -> ClientResult<Patient> {
        self.record(Call::UpdatePatient(patient_id));
        self.check(Op::UpdatePatient)?;
        let mut store = self.store.lock().unwrap();
        let patient = store
            .patients
            .iter_mut()
            .find(|p| p.patient_id == patient_id)
            .ok_or(ClientError::NotFound {
                detail: Some("Patient not found".to_string()),
            })?;
        if let Some(study_identifier) = &body.study_identifier {
            patient.study_identifier = study_identifier.clone();
        }
        patient.updated_at = Utc::now();
        Ok(patient.clone())
    }

    async fn delete_patient(&self, patient_id: PatientId) -> ClientResult<()> {
        self.record(Call::DeletePatient(patient_id));
        self.check(Op::DeletePatient)?;
        let mut store = self.store.lock().unwrap();
        let before = store.patients.len();
        store.patients.retain(|p| p.patient_id != patient_id);
        if store.patients.len() == before {
            return Err(ClientError::NotFound {
                detail: Some("Patient not found".to_string()),
            });
        }
        store.demographics.retain(|d| d.patient_id != patient_id);
        store.assessments.retain(|a| a.patient_id != patient_id);
        store.recordings.retain(|(pid, _)| *pid != patient_id);
        Ok(())
    }

    async fn list_demographics(&self, patient_id: PatientId) -> ClientResult<Vec<Demographic>> {
        self.record(Call::ListDemographics(patient_id));
        self.check(Op::ListDemographics)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .demographics
            .iter()
            .filter(|d| d.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn create_demographic(
        &self,
        patient_id: PatientId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic> {
        self.record(Call::CreateDemographic(patient_id));
        self.check(Op::SaveDemographic)?;
        let mut store = self.store.lock().unwrap();
        let demographic = Demographic {
            demographic_id: store.next_id(),
            patient_id,
            age: body.age,
            gender: body.gender.clone(),
            education_years: body.education_years,
            collection_date: body.collection_date,
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        store.demographics.push(demographic.clone());
        Ok(demographic)
    }

    async fn update_demographic(
        &self,
        patient_id: PatientId,
        demographic_id: DemographicId,
        body: &DemographicInput,
    ) -> ClientResult<Demographic> {
        self.record(Call::UpdateDemographic(patient_id, demographic_id));
        self.check(Op::SaveDemographic)?;
        let mut store = self.store.lock().unwrap();
        let demographic = store
            .demographics
            .iter_mut()
            .find(|d| d.demographic_id == demographic_id)
            .ok_or(ClientError::NotFound { detail: None })?;
        demographic.age = body.age;
        demographic.gender = body.gender.clone();
        demographic.education_years = body.education_years;
        demographic.collection_date = body.collection_date;
        demographic.updated_at = Some(Utc::now());
        Ok(demographic.clone())
    }

    async fn list_assessments(&self, patient_id: PatientId) -> ClientResult<Vec<Assessment>> {
        self.record(Call::ListAssessments(patient_id));
        self.check(Op::ListAssessments)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .assessments
            .iter()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn create_assessment(
        &self,
        patient_id: PatientId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment> {
        self.record(Call::CreateAssessment(patient_id));
        self.check(Op::CreateAssessment)?;
        let mut store = self.store.lock().unwrap();
        let assessment = Assessment {
            assessment_id: store.next_id(),
            patient_id,
            assessment_type: body.assessment_type.clone(),
            score: body.score,
            max_possible_score: body.max_possible_score,
            assessment_date: body.assessment_date,
            diagnosis: body.diagnosis.clone(),
            notes: body.notes.clone(),
            subscores: body.subscores.clone(),
        };
        store.assessments.push(assessment.clone());
        Ok(assessment)
    }

    async fn update_assessment(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        body: &AssessmentPayload,
    ) -> ClientResult<Assessment> {
        self.record(Call::UpdateAssessment(patient_id, assessment_id));
        self.check(Op::UpdateAssessment)?;
        let mut store = self.store.lock().unwrap();
        let assessment = store
            .assessments
            .iter_mut()
            .find(|a| a.assessment_id == assessment_id)
            .ok_or(ClientError::NotFound { detail: None })?;
        assessment.assessment_type = body.assessment_type.clone();
        assessment.score = body.score;
        assessment.max_possible_score = body.max_possible_score;
        assessment.diagnosis = body.diagnosis.clone();
        assessment.notes = body.notes.clone();
        assessment.subscores = body.subscores.clone();
        Ok(assessment.clone())
    }

    async fn delete_assessment(&self, patient_id: PatientId, assessment_id: AssessmentId) -> ClientResult<()> {
        self.record(Call::DeleteAssessment(patient_id, assessment_id));
        self.check(Op::DeleteAssessment)?;
        let mut store = self.store.lock().unwrap();
        store.assessments.retain(|a| a.assessment_id != assessment_id);
        store.recordings.retain(|(_, r)| r.assessment_id != assessment_id);
        Ok(())
    }

    async fn list_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<Vec<Recording>> {
        self.record(Call::ListRecordings(patient_id, assessment_id));
        self.check(Op::ListRecordings)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .recordings
            .iter()
            .filter(|(pid, r)| *pid == patient_id && r.assessment_id == assessment_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn upload_recording(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        upload: &RecordingUpload,
    ) -> ClientResult<Recording> {
        self.record(Call::UploadRecording(patient_id, assessment_id));
        self.check(Op::UploadRecording)?;
        let mut store = self.store.lock().unwrap();
        let recording = Recording {
            recording_id: store.next_id(),
            assessment_id,
            filename: upload.file_name.clone(),
            file_path: format!("uploads/{}", upload.file_name),
            task_type: Some(upload.task_type.clone()),
            recording_device: Some(upload.device_label().to_string()),
            recording_date: upload.recording_date,
        };
        store.recordings.push((patient_id, recording.clone()));
        Ok(recording)
    }

    async fn delete_recording(&self, scope: RecordingScope) -> ClientResult<()> {
        self.record(Call::DeleteRecording(scope.recording_id));
        self.check(Op::DeleteRecording)?;
        let mut store = self.store.lock().unwrap();
        store
            .recordings
            .retain(|(_, r)| r.recording_id != scope.recording_id);
        Ok(())
    }

    async fn start_extraction(&self, scope: RecordingScope) -> ClientResult<StartJobResponse> {
        self.record(Call::StartExtraction(scope.recording_id));
        self.check(Op::StartExtraction)?;
        let mut store = self.store.lock().unwrap();
        let n = store.starts.entry(scope.recording_id).or_insert(0);
        *n += 1;
        Ok(StartJobResponse {
            task_id: TaskId(format!("task-{}-{}", scope.recording_id, n)),
            message: Some("Audio processing started".to_string()),
            status: Some("accepted".to_string()),
        })
    }

    async fn job_status(&self, scope: RecordingScope, _task_id: &TaskId) -> ClientResult<JobStatusResponse> {
        self.record(Call::JobStatus(scope.recording_id));
        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.check(Op::JobStatus)?;

        let mut store = self.store.lock().unwrap();
        let script = store.status_scripts.entry(scope.recording_id).or_default();
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status.unwrap_or_else(JobStatusResponse::pending))
    }

    async fn list_features(&self, scope: RecordingScope) -> ClientResult<Vec<Feature>> {
        self.record(Call::ListFeatures(scope.recording_id));
        self.check(Op::ListFeatures)?;
        let store = self.store.lock().unwrap();
        Ok(store
            .features
            .get(&scope.recording_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn export_features_csv(&self) -> ClientResult<String> {
        self.record(Call::ExportFeatures);
        Ok("recording_id,feature_name,feature_value\n".to_string())
    }
}

/// Fast polling for tests
pub fn fast_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(10),
        poll_timeout: Duration::from_millis(500),
        job_timeout: None,
    }
}

/// Drain every notification currently buffered on a receiver
pub fn drain_notifications(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<Notification> {
    drain_events(rx)
        .iter()
        .filter_map(|event| event.notification().cloned())
        .collect()
}

/// Drain every event currently buffered on a receiver, skipping lag gaps
pub fn drain_events(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

/// Client wired to a fresh mock service
pub fn harness(settings: PollSettings) -> (Arc<MockRecordService>, StudyClient) {
    let service = MockRecordService::new();
    let client = StudyClient::new(service.clone(), NotificationBus::new(256), settings);
    (service, client)
}

/// Poll until `pred` holds for some recorded call, or panic after `limit`
pub async fn wait_for_call(service: &MockRecordService, pred: impl Fn(&Call) -> bool, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while service.count(&pred) == 0 {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for call; saw {:?}", service.calls());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn errors(notifications: &[Notification]) -> Vec<&Notification> {
    notifications
        .iter()
        .filter(|n| n.level == NotificationLevel::Error)
        .collect()
}

pub fn successes(notifications: &[Notification]) -> Vec<&Notification> {
    notifications
        .iter()
        .filter(|n| n.level == NotificationLevel::Success)
        .collect()
}
