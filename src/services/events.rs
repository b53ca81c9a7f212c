//! Event system for quest operations
//!
//! Events are emitted after a transaction commits. They are notifications
//! only; the database remains the record of truth.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Quest events emitted by services
#[derive(Debug, Clone)]
pub enum QuestEvent {
    QuestCreated {
        quest_id: String,
        group_id: String,
        creator_id: String,
    },
    QuestUpdated {
        quest_id: String,
    },
    QuestDeleted {
        quest_id: String,
    },

    ParticipantJoined {
        quest_id: String,
        user_id: String,
    },
    SubmissionReceived {
        quest_id: String,
        user_id: String,
    },
    ParticipantVerified {
        quest_id: String,
        user_id: String,
        verifier_id: String,
    },
    AchievementGranted {
        user_id: String,
        achievement_id: i32,
    },

    SettlementSent {
        quest_id: String,
        user_id: String,
        amount: i64,
        tx_handle: String,
    },
    SettlementFailed {
        quest_id: String,
        user_id: String,
        reason: String,
    },
    SettlementUnknown {
        quest_id: String,
        user_id: String,
        reason: String,
    },
    SettlementSkipped {
        quest_id: String,
        user_id: String,
        reason: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &QuestEvent);
}

/// Event bus for broadcasting quest events
pub struct EventBus {
    sender: broadcast::Sender<QuestEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: QuestEvent) {
        trace!(event = ?event, "Emitting quest event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<QuestEvent> {
        self.sender.subscribe()
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
    fn on_event(&self, event: &QuestEvent) {
        match event {
            QuestEvent::ParticipantVerified { quest_id, user_id, verifier_id } => {
                info!(quest_id = %quest_id, user_id = %user_id, verifier = %verifier_id, "Participant verified");
            }
            QuestEvent::AchievementGranted { user_id, achievement_id } => {
                let name = super::achievements::rule(*achievement_id).map_or("unknown", |r| r.name);
                info!(user_id = %user_id, achievement_id, name, "Achievement granted");
            }
            QuestEvent::SettlementSent { quest_id, user_id, amount, tx_handle } => {
                info!(quest_id = %quest_id, user_id = %user_id, amount, tx = %tx_handle, "Reward settled");
            }
            QuestEvent::SettlementFailed { quest_id, user_id, reason } => {
                warn!(quest_id = %quest_id, user_id = %user_id, reason = %reason, "Reward settlement failed");
            }
            QuestEvent::SettlementUnknown { quest_id, user_id, reason } => {
                warn!(quest_id = %quest_id, user_id = %user_id, reason = %reason, "Reward settlement needs reconciliation");
            }
            _ => {
                debug!(event = ?event, "Quest event");
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(QuestEvent::ParticipantJoined {
            quest_id: "q1".into(),
            user_id: "alice".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            QuestEvent::ParticipantJoined { quest_id, user_id } => {
                assert_eq!(quest_id, "q1");
                assert_eq!(user_id, "alice");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        // Should not panic even with no subscribers
        bus.emit(QuestEvent::QuestDeleted { quest_id: "q1".into() });
    }
}
