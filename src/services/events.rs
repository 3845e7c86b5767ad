//! Event system for list operations
//!
//! Services emit a `ListEvent` after their transaction commits; an operation
//! that rolled back emits nothing. Listeners are used for:
//! - Audit logging
//! - Cache invalidation in front-ends
//! - Notifying players about their submissions

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::models::SubmissionStatus;

/// Events emitted by services
#[derive(Debug, Clone, PartialEq)]
pub enum ListEvent {
    // Level events
    LevelPlaced {
        id: String,
        position: i64,
        legacy: bool,
        action_by: String,
    },
    LevelMoved {
        id: String,
        old_position: i64,
        new_position: i64,
        legacy: bool,
        action_by: String,
    },

    // Submission events
    SubmissionChanged {
        id: String,
        level_id: String,
        submitted_by: String,
        status: SubmissionStatus,
    },
    SubmissionDeleted {
        id: String,
        submitted_by: String,
    },

    // Pack events
    PackSaved {
        id: String,
        points: f64,
    },
    PackDeleted {
        id: String,
    },

    // User events
    UserBanned {
        id: String,
    },
    UserUnbanned {
        id: String,
    },
    UsersMerged {
        primary: String,
        secondary: String,
        conflicts: usize,
    },

    // Derived state
    PointsRecomputed {
        min_position: i64,
        max_position: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ListEvent);
}

/// Event bus for broadcasting list events
pub struct EventBus {
    sender: broadcast::Sender<ListEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ListEvent) {
        trace!(event = ?event, "Emitting list event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ListEvent) {
        match event {
            ListEvent::LevelPlaced { id, position, action_by, .. } => {
                info!(id = %id, position, action_by = %action_by, "Level placed");
            }
            ListEvent::LevelMoved {
                id,
                old_position,
                new_position,
                action_by,
                ..
            } => {
                info!(id = %id, old_position, new_position, action_by = %action_by, "Level moved");
            }
            ListEvent::UsersMerged {
                primary,
                secondary,
                conflicts,
            } => {
                info!(primary = %primary, secondary = %secondary, conflicts, "Users merged");
            }
            ListEvent::UserBanned { id } => {
                info!(id = %id, "User banned");
            }
            _ => {
                debug!(event = ?event, "List event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
