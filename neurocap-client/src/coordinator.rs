//! Mutation coordinator
//!
//! Every create, update or delete goes through the same protocol:
//!
//! 1. Validate locally. Failures return [`ClientError::Validation`] and never
//!    reach the service or the notification bus.
//! 2. Issue the remote mutation and wait for it to complete.
//! 3. On failure, publish an error notification and return. The cache is
//!    not touched.
//! 4. On success, publish a success notification, then re-fetch exactly the
//!    collection scoped to the mutated entity's parent and swap it into the
//!    cache.
//!
//! The re-fetch is never issued before the mutation has returned. A failed
//! re-fetch is reported separately and leaves `refreshed` empty, so callers
//! keep their edit surface open until a fresh snapshot is in hand.

use neurocap_common::events::NotificationBus;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CollectionKey, EntityCache, PatientPage};
use crate::error::{ClientError, ClientResult};
use crate::export::patients_to_csv;
use crate::models::{
    Assessment, AssessmentId, AssessmentPayload, Demographic, DemographicInput, Feature, Patient,
    PatientCreate, PatientId, PatientUpdate, Recording, RecordingScope, RecordingUpload,
};
use crate::presets::AssessmentDraft;
use crate::service::RecordService;
use crate::tracker::JobTracker;
use crate::validation::{validate_demographic, validate_recording_upload, validate_study_identifier};

/// Result of a coordinated mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome<E, C> {
    /// Entity returned by the mutation (`()` for deletes)
    pub entity: E,
    /// Re-fetched parent collection; `None` when the re-fetch failed
    pub refreshed: Option<Arc<Vec<C>>>,
}

impl<E, C> MutationOutcome<E, C> {
    /// The parent collection was re-fetched after the mutation
    pub fn is_synced(&self) -> bool {
        self.refreshed.is_some()
    }
}

#[derive(Clone)]
pub struct MutationCoordinator {
    service: Arc<dyn RecordService>,
    cache: Arc<EntityCache>,
    bus: NotificationBus,
    tracker: JobTracker,
}

impl MutationCoordinator {
    pub fn new(
        service: Arc<dyn RecordService>,
        cache: Arc<EntityCache>,
        bus: NotificationBus,
        tracker: JobTracker,
    ) -> Self {
        Self {
            service,
            cache,
            bus,
            tracker,
        }
    }

    /// Publish a failure and hand the error back
    fn fail(&self, action: &str, err: ClientError) -> ClientError {
        if matches!(err, ClientError::Validation(_)) {
            return err;
        }
        let message = match err.detail() {
            Some(detail) => detail.to_string(),
            None => format!("Failed to {}: {}", action, err.user_message()),
        };
        self.bus.error(err.kind(), message);
        err
    }

    /// Run a post-mutation re-fetch, reporting (not propagating) its failure
    async fn resync<C, F>(&self, key: CollectionKey, refresh: F) -> Option<Arc<Vec<C>>>
    where
        F: Future<Output = ClientResult<Arc<Vec<C>>>>,
    {
        match refresh.await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.fail(&format!("reload {}", key), e);
                None
            }
        }
    }

    fn announce(&self, key: CollectionKey, len: usize) {
        self.bus.emit_lossy(key.refreshed_event(len));
    }

    fn deleted_patient(patient_id: PatientId) -> ClientError {
        ClientError::NotFound {
            detail: Some(format!("Patient {} was deleted", patient_id)),
        }
    }

    // ============================================================================
    // Fetch + swap
    // ============================================================================

    async fn refresh_patients(&self, page: PatientPage) -> ClientResult<Arc<Vec<Patient>>> {
        let patients = self.service.list_patients(page.skip, page.limit).await?;
        let snapshot = self.cache.put_patients(page, patients).await;
        self.announce(CollectionKey::Patients, snapshot.len());
        Ok(snapshot)
    }

    async fn refresh_demographics(&self, patient_id: PatientId) -> ClientResult<Arc<Vec<Demographic>>> {
        let records = self.service.list_demographics(patient_id).await?;
        let snapshot = self
            .cache
            .put_demographics(patient_id, records)
            .await
            .ok_or_else(|| Self::deleted_patient(patient_id))?;
        self.announce(CollectionKey::Demographics(patient_id), snapshot.len());
        Ok(snapshot)
    }

    async fn refresh_assessments(&self, patient_id: PatientId) -> ClientResult<Arc<Vec<Assessment>>> {
        let assessments = self.service.list_assessments(patient_id).await?;
        let snapshot = self
            .cache
            .put_assessments(patient_id, assessments)
            .await
            .ok_or_else(|| Self::deleted_patient(patient_id))?;
        self.announce(CollectionKey::Assessments(patient_id), snapshot.len());
        Ok(snapshot)
    }

    async fn refresh_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<Arc<Vec<Recording>>> {
        let recordings = self.service.list_recordings(patient_id, assessment_id).await?;
        let snapshot = self
            .cache
            .put_recordings(patient_id, assessment_id, recordings)
            .await
            .ok_or_else(|| Self::deleted_patient(patient_id))?;
        self.announce(
            CollectionKey::Recordings(patient_id, assessment_id),
            snapshot.len(),
        );
        Ok(snapshot)
    }

    async fn refresh_features(&self, scope: RecordingScope) -> ClientResult<Arc<Vec<Feature>>> {
        let mut features = self.service.list_features(scope).await?;
        for feature in &mut features {
            feature.recording_id = scope.recording_id;
        }
        let snapshot = self
            .cache
            .put_features(scope, features)
            .await
            .ok_or_else(|| Self::deleted_patient(scope.patient_id))?;
        self.announce(CollectionKey::Features(scope.recording_id), snapshot.len());
        Ok(snapshot)
    }

    // ============================================================================
    // Loads
    // ============================================================================

    pub async fn load_patients(&self, page: PatientPage) -> ClientResult<Arc<Vec<Patient>>> {
        self.refresh_patients(page)
            .await
            .map_err(|e| self.fail("load patients", e))
    }

    pub async fn load_patient(&self, patient_id: PatientId) -> ClientResult<Patient> {
        let patient = self
            .service
            .get_patient(patient_id)
            .await
            .map_err(|e| self.fail("load patient", e))?;
        if self.cache.put_patient(patient.clone()).await {
            self.announce(CollectionKey::Patient(patient_id), 1);
        }
        Ok(patient)
    }

    pub async fn load_demographics(&self, patient_id: PatientId) -> ClientResult<Arc<Vec<Demographic>>> {
        self.refresh_demographics(patient_id)
            .await
            .map_err(|e| self.fail("load demographics", e))
    }

    pub async fn load_assessments(&self, patient_id: PatientId) -> ClientResult<Arc<Vec<Assessment>>> {
        self.refresh_assessments(patient_id)
            .await
            .map_err(|e| self.fail("load assessments", e))
    }

    pub async fn load_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<Arc<Vec<Recording>>> {
        self.refresh_recordings(patient_id, assessment_id)
            .await
            .map_err(|e| self.fail("load recordings", e))
    }

    pub async fn load_features(&self, scope: RecordingScope) -> ClientResult<Arc<Vec<Feature>>> {
        self.refresh_features(scope)
            .await
            .map_err(|e| self.fail("load features", e))
    }

    // ============================================================================
    // Patients
    // ============================================================================

    pub async fn create_patient(&self, study_identifier: &str) -> ClientResult<MutationOutcome<Patient, Patient>> {
        let study_identifier = validate_study_identifier(study_identifier)?;

        let patient = self
            .service
            .create_patient(&PatientCreate { study_identifier })
            .await
            .map_err(|e| self.fail("create patient", e))?;
        info!(patient_id = patient.patient_id, "Patient created");
        self.bus.success("Patient created successfully");

        let page = self.cache.patient_page().await;
        let refreshed = self
            .resync(CollectionKey::Patients, self.refresh_patients(page))
            .await;
        Ok(MutationOutcome {
            entity: patient,
            refreshed,
        })
    }

    pub async fn update_patient(
        &self,
        patient_id: PatientId,
        study_identifier: &str,
    ) -> ClientResult<MutationOutcome<Patient, Patient>> {
        let study_identifier = validate_study_identifier(study_identifier)?;

        let patient = self
            .service
            .update_patient(
                patient_id,
                &PatientUpdate {
                    study_identifier: Some(study_identifier),
                },
            )
            .await
            .map_err(|e| self.fail("update patient", e))?;
        self.bus.success("Patient updated successfully");

        if self.cache.put_patient(patient.clone()).await {
            self.announce(CollectionKey::Patient(patient_id), 1);
        }
        let page = self.cache.patient_page().await;
        let refreshed = self
            .resync(CollectionKey::Patients, self.refresh_patients(page))
            .await;
        Ok(MutationOutcome {
            entity: patient,
            refreshed,
        })
    }

    /// Delete a patient and everything under it
    ///
    /// In-flight extraction jobs under the patient are abandoned and its
    /// snapshots evicted before the list is re-fetched. When the deleted
    /// patient was the only row of a later page, the re-fetch steps back one
    /// page.
    pub async fn delete_patient(&self, patient_id: PatientId) -> ClientResult<MutationOutcome<(), Patient>> {
        self.service
            .delete_patient(patient_id)
            .await
            .map_err(|e| self.fail("delete patient", e))?;

        let abandoned = self.tracker.abandon_patient(patient_id);
        self.cache.evict_patient(patient_id).await;
        info!(patient_id, abandoned_jobs = abandoned, "Patient deleted");
        self.bus.success("Patient deleted successfully");

        let mut page = self.cache.patient_page().await;
        if let Some((_, shown)) = self.cache.patients().await {
            let only_row = shown.len() == 1 && shown[0].patient_id == patient_id;
            if only_row && page.skip > 0 {
                page = page.previous();
                debug!(skip = page.skip, "Last row of page deleted, stepping back");
            }
        }

        let refreshed = self
            .resync(CollectionKey::Patients, self.refresh_patients(page))
            .await;
        Ok(MutationOutcome {
            entity: (),
            refreshed,
        })
    }

    // ============================================================================
    // Demographics
    // ============================================================================

    /// Create or update the patient's canonical demographic record
    ///
    /// The first record of the patient's demographics collection is the one
    /// edited; when there is none, a new record is created.
    pub async fn save_demographic(
        &self,
        patient_id: PatientId,
        input: &DemographicInput,
    ) -> ClientResult<MutationOutcome<Demographic, Demographic>> {
        validate_demographic(input)?;

        let existing = match self.cache.demographics(patient_id).await {
            Some(demographics) => demographics.canonical().map(|d| d.demographic_id),
            None => self
                .refresh_demographics(patient_id)
                .await
                .map_err(|e| self.fail("load demographics", e))?
                .first()
                .map(|d| d.demographic_id),
        };

        let saved = match existing {
            Some(demographic_id) => self
                .service
                .update_demographic(patient_id, demographic_id, input)
                .await
                .map_err(|e| self.fail("update demographics", e))?,
            None => self
                .service
                .create_demographic(patient_id, input)
                .await
                .map_err(|e| self.fail("create demographics", e))?,
        };
        self.bus.success("Demographics saved successfully");

        let refreshed = self
            .resync(
                CollectionKey::Demographics(patient_id),
                self.refresh_demographics(patient_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: saved,
            refreshed,
        })
    }

    // ============================================================================
    // Assessments
    // ============================================================================

    pub async fn create_assessment(
        &self,
        patient_id: PatientId,
        draft: &AssessmentDraft,
    ) -> ClientResult<MutationOutcome<Assessment, Assessment>> {
        let payload = draft.to_payload()?;
        let assessment = self
            .service
            .create_assessment(patient_id, &payload)
            .await
            .map_err(|e| self.fail("create assessment", e))?;
        self.bus.success("Assessment created successfully");

        let refreshed = self
            .resync(
                CollectionKey::Assessments(patient_id),
                self.refresh_assessments(patient_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: assessment,
            refreshed,
        })
    }

    pub async fn update_assessment(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        draft: &AssessmentDraft,
    ) -> ClientResult<MutationOutcome<Assessment, Assessment>> {
        let payload = draft.to_payload()?;
        let assessment = self
            .service
            .update_assessment(patient_id, assessment_id, &payload)
            .await
            .map_err(|e| self.fail("update assessment", e))?;
        self.bus.success("Assessment updated successfully");

        let refreshed = self
            .resync(
                CollectionKey::Assessments(patient_id),
                self.refresh_assessments(patient_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: assessment,
            refreshed,
        })
    }

    pub async fn delete_assessment(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> ClientResult<MutationOutcome<(), Assessment>> {
        self.service
            .delete_assessment(patient_id, assessment_id)
            .await
            .map_err(|e| self.fail("delete assessment", e))?;
        self.tracker.abandon_assessment(patient_id, assessment_id);
        self.cache.evict_assessment(patient_id, assessment_id).await;
        self.bus.success("Assessment deleted successfully");

        let refreshed = self
            .resync(
                CollectionKey::Assessments(patient_id),
                self.refresh_assessments(patient_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: (),
            refreshed,
        })
    }

    // ============================================================================
    // Recordings
    // ============================================================================

    pub async fn upload_recording(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        upload: &RecordingUpload,
    ) -> ClientResult<MutationOutcome<Recording, Recording>> {
        validate_recording_upload(upload)?;

        let recording = self
            .service
            .upload_recording(patient_id, assessment_id, upload)
            .await
            .map_err(|e| self.fail("upload recording", e))?;
        info!(
            patient_id,
            assessment_id,
            recording_id = recording.recording_id,
            "Recording uploaded"
        );
        self.bus.success("Recording uploaded successfully");

        let refreshed = self
            .resync(
                CollectionKey::Recordings(patient_id, assessment_id),
                self.refresh_recordings(patient_id, assessment_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: recording,
            refreshed,
        })
    }

    pub async fn delete_recording(&self, scope: RecordingScope) -> ClientResult<MutationOutcome<(), Recording>> {
        self.service
            .delete_recording(scope)
            .await
            .map_err(|e| self.fail("delete recording", e))?;
        self.tracker.abandon(scope.recording_id);
        self.cache.drop_features(scope.recording_id).await;
        self.bus.success("Recording deleted successfully");

        let refreshed = self
            .resync(
                CollectionKey::Recordings(scope.patient_id, scope.assessment_id),
                self.refresh_recordings(scope.patient_id, scope.assessment_id),
            )
            .await;
        Ok(MutationOutcome {
            entity: (),
            refreshed,
        })
    }

    /// Create a task assessment named after the upload's task label and
    /// upload the recording into it
    ///
    /// The assessment is not rolled back when the upload fails; the
    /// assessments collection is re-fetched either way because the first
    /// mutation did land.
    pub async fn upload_audio_test(
        &self,
        patient_id: PatientId,
        upload: &RecordingUpload,
    ) -> ClientResult<MutationOutcome<(Assessment, Recording), Assessment>> {
        validate_recording_upload(upload)?;

        let payload = AssessmentPayload::audio_test(&upload.task_type, upload.recording_date);
        let assessment = self
            .service
            .create_assessment(patient_id, &payload)
            .await
            .map_err(|e| self.fail("create audio test", e))?;

        let uploaded = self
            .service
            .upload_recording(patient_id, assessment.assessment_id, upload)
            .await;
        let recording = match uploaded {
            Ok(recording) => recording,
            Err(e) => {
                let err = self.fail("upload recording", e);
                self.resync(
                    CollectionKey::Assessments(patient_id),
                    self.refresh_assessments(patient_id),
                )
                .await;
                return Err(err);
            }
        };
        self.bus.success("Audio test uploaded successfully");

        let refreshed = self
            .resync(
                CollectionKey::Assessments(patient_id),
                self.refresh_assessments(patient_id),
            )
            .await;
        if refreshed.is_some() {
            self.resync(
                CollectionKey::Recordings(patient_id, assessment.assessment_id),
                self.refresh_recordings(patient_id, assessment.assessment_id),
            )
            .await;
        }
        Ok(MutationOutcome {
            entity: (assessment, recording),
            refreshed,
        })
    }

    /// First assessment of the patient that owns at least one recording
    pub async fn find_first_assessment_with_recordings(
        &self,
        patient_id: PatientId,
    ) -> ClientResult<Option<(Assessment, Arc<Vec<Recording>>)>> {
        let assessments = match self.cache.assessments(patient_id).await {
            Some(assessments) => assessments,
            None => self.load_assessments(patient_id).await?,
        };

        for assessment in assessments.iter() {
            let recordings = match self
                .cache
                .recordings(patient_id, assessment.assessment_id)
                .await
            {
                Some(recordings) => recordings,
                None => {
                    self.load_recordings(patient_id, assessment.assessment_id)
                        .await?
                }
            };
            if !recordings.is_empty() {
                return Ok(Some((assessment.clone(), recordings)));
            }
        }
        Ok(None)
    }

    // ============================================================================
    // Export
    // ============================================================================

    /// CSV of the patient page currently shown, loading it if needed
    pub async fn export_patients_csv(&self) -> ClientResult<String> {
        let patients = match self.cache.patients().await {
            Some((_, patients)) => patients,
            None => {
                let page = self.cache.patient_page().await;
                self.load_patients(page).await?
            }
        };
        Ok(patients_to_csv(&patients))
    }

    pub async fn export_features_csv(&self) -> ClientResult<String> {
        self.service
            .export_features_csv()
            .await
            .map_err(|e| self.fail("export features", e))
    }
}
