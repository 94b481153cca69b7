//! Entity cache
//!
//! Holds the last fetched snapshot of every collection. Snapshots are
//! immutable `Arc<Vec<_>>` values swapped under a write lock, so a reader
//! sees either the previous snapshot or the new one, never a mix.

use neurocap_common::events::ClientEvent;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{
    Assessment, AssessmentId, Demographic, Demographics, Feature, Patient, PatientId, Recording,
    RecordingId, RecordingScope,
};

/// Default patient list page size
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Identity of one cached collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Patients,
    Patient(PatientId),
    Demographics(PatientId),
    Assessments(PatientId),
    Recordings(PatientId, AssessmentId),
    Features(RecordingId),
}

impl CollectionKey {
    /// Bus event announcing a fresh snapshot of this collection
    pub fn refreshed_event(&self, len: usize) -> ClientEvent {
        ClientEvent::CollectionRefreshed {
            collection: self.to_string(),
            len,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Patients => write!(f, "patients"),
            CollectionKey::Patient(pid) => write!(f, "patient[{}]", pid),
            CollectionKey::Demographics(pid) => write!(f, "demographics[patient={}]", pid),
            CollectionKey::Assessments(pid) => write!(f, "assessments[patient={}]", pid),
            CollectionKey::Recordings(pid, aid) => {
                write!(f, "recordings[patient={},assessment={}]", pid, aid)
            }
            CollectionKey::Features(rid) => write!(f, "features[recording={}]", rid),
        }
    }
}

/// Window of the paged patient list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatientPage {
    pub skip: usize,
    pub limit: usize,
}

impl PatientPage {
    pub fn first(limit: usize) -> Self {
        Self {
            skip: 0,
            limit: limit.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            skip: self.skip + self.limit,
            ..self
        }
    }

    /// Previous page, saturating at the first one
    pub fn previous(self) -> Self {
        Self {
            skip: self.skip.saturating_sub(self.limit),
            ..self
        }
    }
}

impl Default for PatientPage {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Default)]
struct CacheState {
    patients: Option<(PatientPage, Arc<Vec<Patient>>)>,
    patient: HashMap<PatientId, Patient>,
    demographics: HashMap<PatientId, Arc<Vec<Demographic>>>,
    assessments: HashMap<PatientId, Arc<Vec<Assessment>>>,
    recordings: HashMap<(PatientId, AssessmentId), Arc<Vec<Recording>>>,
    features: HashMap<RecordingId, (RecordingScope, Arc<Vec<Feature>>)>,
    /// Patients deleted through this client; writes under them are refused.
    /// Grows by one id per delete issued in this session and is never pruned,
    /// since a late poller may outlive any bound chosen here.
    deleted_patients: HashSet<PatientId>,
}

/// Snapshot store shared by the coordinator and the job tracker
#[derive(Default)]
pub struct EntityCache {
    state: RwLock<CacheState>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn patients(&self) -> Option<(PatientPage, Arc<Vec<Patient>>)> {
        self.state.read().await.patients.clone()
    }

    pub async fn patient_page(&self) -> PatientPage {
        self.state
            .read()
            .await
            .patients
            .as_ref()
            .map(|(page, _)| *page)
            .unwrap_or_default()
    }

    pub async fn put_patients(&self, page: PatientPage, patients: Vec<Patient>) -> Arc<Vec<Patient>> {
        let snapshot = Arc::new(patients);
        let mut state = self.state.write().await;
        state.patients = Some((page, snapshot.clone()));
        tracing::debug!(skip = page.skip, limit = page.limit, len = snapshot.len(), "Patient page swapped");
        snapshot
    }

    pub async fn patient(&self, patient_id: PatientId) -> Option<Patient> {
        self.state.read().await.patient.get(&patient_id).cloned()
    }

    pub async fn put_patient(&self, patient: Patient) -> bool {
        let mut state = self.state.write().await;
        if state.deleted_patients.contains(&patient.patient_id) {
            return false;
        }
        state.patient.insert(patient.patient_id, patient);
        true
    }

    pub async fn demographics(&self, patient_id: PatientId) -> Option<Demographics> {
        self.state
            .read()
            .await
            .demographics
            .get(&patient_id)
            .map(|records| Demographics::from(records.as_ref().clone()))
    }

    pub async fn put_demographics(
        &self,
        patient_id: PatientId,
        records: Vec<Demographic>,
    ) -> Option<Arc<Vec<Demographic>>> {
        let snapshot = Arc::new(records);
        let mut state = self.state.write().await;
        if state.deleted_patients.contains(&patient_id) {
            return None;
        }
        state.demographics.insert(patient_id, snapshot.clone());
        tracing::debug!(patient_id, len = snapshot.len(), "Demographics swapped");
        Some(snapshot)
    }

    pub async fn assessments(&self, patient_id: PatientId) -> Option<Arc<Vec<Assessment>>> {
        self.state.read().await.assessments.get(&patient_id).cloned()
    }

    pub async fn put_assessments(
        &self,
        patient_id: PatientId,
        assessments: Vec<Assessment>,
    ) -> Option<Arc<Vec<Assessment>>> {
        let snapshot = Arc::new(assessments);
        let mut state = self.state.write().await;
        if state.deleted_patients.contains(&patient_id) {
            return None;
        }
        let live: HashSet<AssessmentId> = snapshot.iter().map(|a| a.assessment_id).collect();
        state
            .recordings
            .retain(|(pid, aid), _| *pid != patient_id || live.contains(aid));
        state.features.retain(|_, (scope, _)| {
            scope.patient_id != patient_id || live.contains(&scope.assessment_id)
        });
        state.assessments.insert(patient_id, snapshot.clone());
        tracing::debug!(patient_id, len = snapshot.len(), "Assessments swapped");
        Some(snapshot)
    }

    pub async fn recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
    ) -> Option<Arc<Vec<Recording>>> {
        self.state
            .read()
            .await
            .recordings
            .get(&(patient_id, assessment_id))
            .cloned()
    }

    pub async fn put_recordings(
        &self,
        patient_id: PatientId,
        assessment_id: AssessmentId,
        recordings: Vec<Recording>,
    ) -> Option<Arc<Vec<Recording>>> {
        let snapshot = Arc::new(recordings);
        let mut state = self.state.write().await;
        if state.deleted_patients.contains(&patient_id) {
            return None;
        }
        state
            .recordings
            .insert((patient_id, assessment_id), snapshot.clone());
        tracing::debug!(patient_id, assessment_id, len = snapshot.len(), "Recordings swapped");
        Some(snapshot)
    }

    pub async fn features(&self, recording_id: RecordingId) -> Option<Arc<Vec<Feature>>> {
        self.state
            .read()
            .await
            .features
            .get(&recording_id)
            .map(|(_, features)| features.clone())
    }

    /// Replace a recording's feature list
    ///
    /// Returns `None` without writing when the owning patient was deleted.
    pub async fn put_features(
        &self,
        scope: RecordingScope,
        features: Vec<Feature>,
    ) -> Option<Arc<Vec<Feature>>> {
        let snapshot = Arc::new(features);
        let mut state = self.state.write().await;
        if state.deleted_patients.contains(&scope.patient_id) {
            return None;
        }
        state
            .features
            .insert(scope.recording_id, (scope, snapshot.clone()));
        tracing::debug!(
            patient_id = scope.patient_id,
            recording_id = scope.recording_id,
            len = snapshot.len(),
            "Features swapped"
        );
        Some(snapshot)
    }

    pub async fn drop_features(&self, recording_id: RecordingId) {
        self.state.write().await.features.remove(&recording_id);
    }

    /// Forget every snapshot under a deleted patient and refuse later writes
    pub async fn evict_patient(&self, patient_id: PatientId) {
        let mut state = self.state.write().await;
        state.deleted_patients.insert(patient_id);
        state.patient.remove(&patient_id);
        state.demographics.remove(&patient_id);
        state.assessments.remove(&patient_id);
        state.recordings.retain(|(pid, _), _| *pid != patient_id);
        state.features.retain(|_, (scope, _)| scope.patient_id != patient_id);
        tracing::debug!(patient_id, "Evicted patient snapshots");
    }

    /// Forget the recordings and features under a deleted assessment
    pub async fn evict_assessment(&self, patient_id: PatientId, assessment_id: AssessmentId) {
        let mut state = self.state.write().await;
        state.recordings.remove(&(patient_id, assessment_id));
        state.features.retain(|_, (scope, _)| {
            scope.patient_id != patient_id || scope.assessment_id != assessment_id
        });
        tracing::debug!(patient_id, assessment_id, "Evicted assessment snapshots");
    }

    pub async fn is_deleted(&self, patient_id: PatientId) -> bool {
        self.state.read().await.deleted_patients.contains(&patient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn feature(rid: RecordingId) -> Feature {
        Feature {
            feature_name: "jitter".to_string(),
            value: 0.01,
            recording_id: rid,
        }
    }

    #[test]
    fn test_page_step_back_saturates() {
        let page = PatientPage::first(10).next().next();
        assert_eq!(page.skip, 20);
        assert_eq!(page.previous().skip, 10);
        assert_eq!(PatientPage::first(10).previous().skip, 0);
        assert_eq!(PatientPage::first(0).limit, 1);
    }

    #[tokio::test]
    async fn test_snapshot_swap_keeps_old_reader_view() {
        let cache = EntityCache::new();
        let scope = RecordingScope::new(1, 2, 7);
        cache.put_features(scope, vec![feature(7)]).await;
        let before = cache.features(7).await.unwrap();

        cache.put_features(scope, vec![feature(7), feature(7)]).await;
        let after = cache.features(7).await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_evicted_patient_refuses_writes() {
        let cache = EntityCache::new();
        cache.put_features(RecordingScope::new(3, 1, 9), vec![feature(9)]).await;
        cache.put_features(RecordingScope::new(4, 1, 10), vec![feature(10)]).await;

        cache.evict_patient(3).await;

        assert!(cache.features(9).await.is_none());
        assert!(cache.features(10).await.is_some());
        assert!(cache
            .put_features(RecordingScope::new(3, 1, 9), vec![feature(9)])
            .await
            .is_none());
        assert!(cache.put_assessments(3, Vec::new()).await.is_none());
        assert!(cache.is_deleted(3).await);
    }

    #[tokio::test]
    async fn test_assessment_refresh_drops_orphaned_recordings() {
        let cache = EntityCache::new();
        let recording = Recording {
            recording_id: 1,
            assessment_id: 5,
            filename: "a.wav".to_string(),
            file_path: "uploads/a.wav".to_string(),
            task_type: None,
            recording_device: None,
            recording_date: Utc::now(),
        };
        cache.put_recordings(2, 5, vec![recording]).await;
        cache.put_features(RecordingScope::new(2, 5, 1), vec![feature(1)]).await;
        cache.put_assessments(2, Vec::new()).await;
        assert!(cache.recordings(2, 5).await.is_none());
        assert!(cache.features(1).await.is_none());
    }

    #[tokio::test]
    async fn test_evict_assessment_drops_its_features_only() {
        let cache = EntityCache::new();
        cache.put_features(RecordingScope::new(2, 5, 1), vec![feature(1)]).await;
        cache.put_features(RecordingScope::new(2, 6, 3), vec![feature(3)]).await;

        cache.evict_assessment(2, 5).await;

        assert!(cache.features(1).await.is_none());
        assert!(cache.features(3).await.is_some());
        assert!(!cache.is_deleted(2).await);
    }

    #[test]
    fn test_collection_key_display() {
        assert_eq!(CollectionKey::Assessments(3).to_string(), "assessments[patient=3]");
        assert_eq!(CollectionKey::Features(8).to_string(), "features[recording=8]");
    }
}
