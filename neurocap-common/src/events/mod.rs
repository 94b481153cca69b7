//! Event types for the NeuroCapture event system
//!
//! Provides the shared event definitions and the NotificationBus consumed by
//! whatever presentation layer renders client state.

mod job_types;
mod notification_types;

pub use job_types::JobState;
pub use notification_types::{ErrorKind, Notification, NotificationId, NotificationLevel};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Client event types
///
/// Events are broadcast via NotificationBus and can be serialized for any
/// transport the presentation layer chooses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// A notification entered the active buffer
    NotificationPublished {
        notification: Notification,
    },

    /// A notification left the active buffer (explicit dismissal or overflow)
    NotificationDismissed {
        id: NotificationId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A cached collection was replaced with a freshly fetched snapshot
    ///
    /// Triggers:
    /// - Views bound to `collection` re-render
    CollectionRefreshed {
        /// Human-readable collection key, e.g. `assessments[patient=3]`
        collection: String,
        /// Number of entries in the new snapshot
        len: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An extraction job moved between states
    ///
    /// Emitted for every transition, including progress-only updates while
    /// `Running` (where `old_state == new_state`).
    JobStateChanged {
        recording_id: i64,
        task_id: Option<String>,
        old_state: JobState,
        new_state: JobState,
        /// Progress in [0, 1]
        progress: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ClientEvent {
    /// Notification carried by this event, if any
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            ClientEvent::NotificationPublished { notification } => Some(notification),
            _ => None,
        }
    }
}

/// Bounded notification channel with explicit dismissal
///
/// Live subscribers receive every [`ClientEvent`] via a broadcast channel.
/// Independently, the bus keeps the last `capacity` undismissed
/// notifications so a renderer attaching late can still show them.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<ClientEvent>,
    active: Arc<Mutex<VecDeque<Notification>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl NotificationBus {
    /// Creates a new bus
    ///
    /// # Arguments
    ///
    /// * `capacity` - Broadcast buffer size and maximum number of active
    ///   notifications retained before the oldest is evicted
    ///
    /// # Examples
    ///
    /// ```
    /// use neurocap_common::events::NotificationBus;
    ///
    /// let bus = NotificationBus::new(32);
    /// assert_eq!(bus.capacity(), 32);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            active: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity,
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ClientEvent,
    ) -> Result<usize, broadcast::error::SendError<ClientEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a notification and return its identifier
    pub fn publish(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        error_kind: Option<ErrorKind>,
    ) -> NotificationId {
        let notification = Notification {
            id: NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            level,
            message: message.into(),
            error_kind,
            timestamp: chrono::Utc::now(),
        };
        let id = notification.id;

        let evicted = {
            let mut active = self.lock_active();
            let evicted = if active.len() >= self.capacity {
                active.pop_front()
            } else {
                None
            };
            active.push_back(notification.clone());
            evicted
        };

        if let Some(old) = evicted {
            tracing::debug!(id = %old.id, "Notification buffer full, evicting oldest");
            self.emit_lossy(ClientEvent::NotificationDismissed {
                id: old.id,
                timestamp: chrono::Utc::now(),
            });
        }

        match notification.level {
            NotificationLevel::Error => {
                tracing::warn!(id = %id, kind = ?notification.error_kind, "{}", notification.message)
            }
            _ => tracing::info!(id = %id, "{}", notification.message),
        }

        self.emit_lossy(ClientEvent::NotificationPublished { notification });
        id
    }

    pub fn success(&self, message: impl Into<String>) -> NotificationId {
        self.publish(NotificationLevel::Success, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> NotificationId {
        self.publish(NotificationLevel::Info, message, None)
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> NotificationId {
        self.publish(NotificationLevel::Error, message, Some(kind))
    }

    /// Remove a notification from the active buffer
    ///
    /// Returns `false` if the notification was already dismissed or evicted.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let removed = {
            let mut active = self.lock_active();
            match active.iter().position(|n| n.id == id) {
                Some(idx) => active.remove(idx).is_some(),
                None => false,
            }
        };

        if removed {
            self.emit_lossy(ClientEvent::NotificationDismissed {
                id,
                timestamp: chrono::Utc::now(),
            });
        }
        removed
    }

    /// Snapshot of undismissed notifications, oldest first
    pub fn active(&self) -> Vec<Notification> {
        self.lock_active().iter().cloned().collect()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        // A panicking holder cannot leave the deque half-updated
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
