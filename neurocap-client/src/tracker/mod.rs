//! Extraction job tracker
//!
//! One independent polling task per recording. Each task owns a child of
//! the tracker's root [`CancellationToken`]; the teardown path and the
//! terminal-state path both go through [`JobCell`], so a job reaches at most
//! one finished state and its side effects fire at most once. A completed or
//! failed job is published to watchers only after its cache writes and
//! notifications are done.
//!
//! Dropping the last [`JobTracker`] clone abandons every tracked job.

mod job;
mod poller;

pub use job::{JobSnapshot, JobTransition, ProcessingJob};

use neurocap_common::config::PollingConfig;
use neurocap_common::events::{JobState, NotificationBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EntityCache;
use crate::error::{ClientError, ClientResult};
use crate::models::{AssessmentId, PatientId, RecordingId, RecordingScope};
use crate::service::RecordService;

/// Polling cadence and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Maximum wait for one status response; a timed-out tick is transient
    pub poll_timeout: Duration,
    /// Wall-clock budget for one job, `None` for unlimited
    pub job_timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            poll_timeout: config.poll_timeout(),
            job_timeout: config.job_timeout(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<RecordingId, Arc<JobCell>>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<RecordingId, Arc<JobCell>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove `cell` from the registry unless a newer job took its slot
fn deregister(registry: &Registry, cell: &Arc<JobCell>) {
    let mut jobs = lock_registry(registry);
    if let Some(current) = jobs.get(&cell.scope.recording_id) {
        if Arc::ptr_eq(current, cell) {
            jobs.remove(&cell.scope.recording_id);
        }
    }
}

/// Finishing transition held back from watchers
struct ClaimedTransition {
    transition: JobTransition,
    snapshot: JobSnapshot,
}

fn announce(bus: &NotificationBus, transition: &JobTransition) {
    if transition.new_state.is_finished() {
        info!(
            recording_id = transition.recording_id,
            task_id = ?transition.task_id.as_ref().map(|t| t.0.as_str()),
            state = ?transition.new_state,
            "Extraction job finished"
        );
    } else {
        debug!(
            recording_id = transition.recording_id,
            from = ?transition.old_state,
            to = ?transition.new_state,
            progress = transition.progress,
            "Extraction job advanced"
        );
    }
    bus.emit_lossy(transition.to_event());
}

/// Shared state of one tracked job
pub(crate) struct JobCell {
    scope: RecordingScope,
    token: CancellationToken,
    job: Mutex<ProcessingJob>,
    watch_tx: watch::Sender<JobSnapshot>,
}

impl JobCell {
    fn new(scope: RecordingScope, token: CancellationToken) -> Self {
        let job = ProcessingJob::new(scope.recording_id);
        let (watch_tx, _) = watch::channel(job.snapshot());
        Self {
            scope,
            token,
            job: Mutex::new(job),
            watch_tx,
        }
    }

    fn lock_job(&self) -> MutexGuard<'_, ProcessingJob> {
        self.job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> JobState {
        self.lock_job().state()
    }

    /// Last published snapshot
    fn snapshot(&self) -> JobSnapshot {
        self.watch_tx.borrow().clone()
    }

    /// Apply a transition under the job lock, then publish it
    ///
    /// Returns `None` when the job refused the transition, in which case
    /// the caller must skip every side effect tied to it.
    fn apply<F>(&self, bus: &NotificationBus, f: F) -> Option<JobTransition>
    where
        F: FnOnce(&mut ProcessingJob) -> Option<JobTransition>,
    {
        let transition = {
            let mut job = self.lock_job();
            let transition = f(&mut job)?;
            self.watch_tx.send_replace(job.snapshot());
            transition
        };
        announce(bus, &transition);
        Some(transition)
    }

    /// Apply a finishing transition without publishing it
    ///
    /// The new state is visible to later transitions at once, so a
    /// concurrent `abandon` becomes a no-op. Watchers keep seeing the previous
    /// snapshot until [`JobCell::publish`] runs.
    fn claim<F>(&self, f: F) -> Option<ClaimedTransition>
    where
        F: FnOnce(&mut ProcessingJob) -> Option<JobTransition>,
    {
        let mut job = self.lock_job();
        let transition = f(&mut job)?;
        Some(ClaimedTransition {
            transition,
            snapshot: job.snapshot(),
        })
    }

    fn publish(&self, bus: &NotificationBus, claimed: ClaimedTransition) {
        self.watch_tx.send_replace(claimed.snapshot);
        announce(bus, &claimed.transition);
    }

    /// Cancel polling and mark the job abandoned
    ///
    /// The token is cancelled before the state changes so anything that
    /// observes `Abandoned` also observes cancellation.
    fn abandon(&self, bus: &NotificationBus) -> bool {
        self.token.cancel();
        self.apply(bus, |job| job.abandon()).is_some()
    }
}

/// Caller-side view of one tracked job
#[derive(Clone)]
pub struct JobHandle {
    cell: Arc<JobCell>,
}

impl JobHandle {
    pub fn scope(&self) -> RecordingScope {
        self.cell.scope
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.cell.snapshot()
    }

    /// Receive every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.cell.watch_tx.subscribe()
    }

    /// Wait until the job is completed, failed or abandoned
    pub async fn wait_finished(&self) -> JobSnapshot {
        let mut rx = self.subscribe();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.state.is_finished() {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }
}

/// Everything a polling task needs, without keeping the tracker alive
#[derive(Clone)]
pub(crate) struct PollContext {
    service: Arc<dyn RecordService>,
    cache: Arc<EntityCache>,
    bus: NotificationBus,
    settings: PollSettings,
    registry: Registry,
}

struct TrackerInner {
    ctx: PollContext,
    root_token: CancellationToken,
}

impl TrackerInner {
    fn abandon_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&RecordingScope) -> bool,
    {
        let cells: Vec<Arc<JobCell>> = {
            let mut jobs = lock_registry(&self.ctx.registry);
            let matching: Vec<RecordingId> = jobs
                .values()
                .filter(|cell| predicate(&cell.scope))
                .map(|cell| cell.scope.recording_id)
                .collect();
            matching.iter().filter_map(|rid| jobs.remove(rid)).collect()
        };

        cells
            .iter()
            .filter(|cell| cell.abandon(&self.ctx.bus))
            .count()
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        let abandoned = self.abandon_where(|_| true);
        self.root_token.cancel();
        if abandoned > 0 {
            debug!(abandoned, "Job tracker dropped, abandoned in-flight jobs");
        }
    }
}

/// Registry of in-flight extraction jobs keyed by recording
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    pub fn new(
        service: Arc<dyn RecordService>,
        cache: Arc<EntityCache>,
        bus: NotificationBus,
        settings: PollSettings,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                ctx: PollContext {
                    service,
                    cache,
                    bus,
                    settings,
                    registry: Arc::new(Mutex::new(HashMap::new())),
                },
                root_token: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.inner.ctx.settings
    }

    /// Start feature extraction for a recording and begin polling
    ///
    /// Rejected with [`ClientError::Conflict`] while another job for the same
    /// recording is starting, pending or running. A failure of the remote
    /// start call aborts before the job reaches `Pending`.
    pub async fn start_extraction(&self, scope: RecordingScope) -> ClientResult<JobHandle> {
        let ctx = &self.inner.ctx;
        let recording_id = scope.recording_id;

        let cell = {
            let mut jobs = lock_registry(&ctx.registry);
            if let Some(existing) = jobs.get(&recording_id) {
                if !existing.state().is_finished() {
                    let err = ClientError::Conflict(format!(
                        "Feature extraction is already running for recording {}",
                        recording_id
                    ));
                    ctx.bus.error(err.kind(), err.user_message());
                    return Err(err);
                }
            }
            let cell = Arc::new(JobCell::new(scope, self.inner.root_token.child_token()));
            jobs.insert(recording_id, cell.clone());
            cell
        };
        let handle = JobHandle { cell: cell.clone() };

        debug!(recording_id, "Starting feature extraction");
        let started = tokio::select! {
            biased;
            _ = cell.token.cancelled() => None,
            result = ctx.service.start_extraction(scope) => Some(result),
        };

        let response = match started {
            None => {
                deregister(&ctx.registry, &cell);
                return Ok(handle);
            }
            Some(Err(e)) => {
                deregister(&ctx.registry, &cell);
                ctx.bus.error(
                    e.kind(),
                    format!("Failed to start feature extraction: {}", e.user_message()),
                );
                return Err(e);
            }
            Some(Ok(response)) => response,
        };

        if cell
            .apply(&ctx.bus, |job| job.accept(response.task_id.clone()))
            .is_none()
        {
            deregister(&ctx.registry, &cell);
            return Ok(handle);
        }

        info!(recording_id, task_id = %response.task_id, "Feature extraction started");
        ctx.bus.info(
            response
                .message
                .unwrap_or_else(|| "Feature extraction started".to_string()),
        );

        tokio::spawn(poller::run(ctx.clone(), cell, response.task_id));
        Ok(handle)
    }

    /// Tear down the job for one recording
    ///
    /// Idempotent: returns `false` when no job was in flight.
    pub fn abandon(&self, recording_id: RecordingId) -> bool {
        self.inner
            .abandon_where(|scope| scope.recording_id == recording_id)
            > 0
    }

    /// Abandon every job under a patient; returns how many were in flight
    pub fn abandon_patient(&self, patient_id: PatientId) -> usize {
        self.inner.abandon_where(|scope| scope.patient_id == patient_id)
    }

    pub fn abandon_assessment(&self, patient_id: PatientId, assessment_id: AssessmentId) -> usize {
        self.inner.abandon_where(|scope| {
            scope.patient_id == patient_id && scope.assessment_id == assessment_id
        })
    }

    pub fn abandon_all(&self) -> usize {
        self.inner.abandon_where(|_| true)
    }

    /// Published state of the job tracked for a recording
    pub fn state_of(&self, recording_id: RecordingId) -> Option<JobState> {
        lock_registry(&self.inner.ctx.registry)
            .get(&recording_id)
            .map(|cell| cell.snapshot().state)
    }

    pub fn handle(&self, recording_id: RecordingId) -> Option<JobHandle> {
        lock_registry(&self.inner.ctx.registry)
            .get(&recording_id)
            .map(|cell| JobHandle { cell: cell.clone() })
    }

    /// Number of jobs still starting, pending or running
    pub fn active_count(&self) -> usize {
        lock_registry(&self.inner.ctx.registry)
            .values()
            .filter(|cell| !cell.state().is_finished())
            .count()
    }
}
