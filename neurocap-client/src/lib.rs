//! NeuroCapture study client
//!
//! Core of the clinical-study data client: a mutation coordinator that keeps
//! the entity cache consistent with the remote record service, and a job
//! tracker that drives feature-extraction jobs to completion.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod models;
pub mod presets;
pub mod service;
pub mod tracker;
pub mod validation;

pub use crate::error::{ClientError, ClientResult};

use neurocap_common::config::TomlConfig;
use neurocap_common::events::NotificationBus;
use std::sync::Arc;

use crate::cache::EntityCache;
use crate::coordinator::MutationCoordinator;
use crate::service::{HttpRecordService, RecordService};
use crate::tracker::{JobTracker, PollSettings};

/// Wiring of the service, cache, bus, tracker and coordinator
#[derive(Clone)]
pub struct StudyClient {
    cache: Arc<EntityCache>,
    bus: NotificationBus,
    tracker: JobTracker,
    coordinator: MutationCoordinator,
}

impl StudyClient {
    pub fn new(service: Arc<dyn RecordService>, bus: NotificationBus, settings: PollSettings) -> Self {
        let cache = Arc::new(EntityCache::new());
        let tracker = JobTracker::new(service.clone(), cache.clone(), bus.clone(), settings);
        let coordinator = MutationCoordinator::new(service, cache.clone(), bus.clone(), tracker.clone());
        Self {
            cache,
            bus,
            tracker,
            coordinator,
        }
    }

    /// Client talking HTTP to the configured study server
    pub fn from_config(config: &TomlConfig) -> ClientResult<Self> {
        let service = HttpRecordService::new(
            config.server.base_url.clone(),
            config.server.request_timeout(),
        )?;
        tracing::info!(base_url = %service.base_url(), "Study server configured");

        Ok(Self::new(
            Arc::new(service),
            NotificationBus::new(config.notifications.capacity),
            PollSettings::from(&config.polling),
        ))
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }
}
