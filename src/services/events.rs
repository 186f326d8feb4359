//! Curriculum event bus
//!
//! Every successful write through [`CurriculumService`](super::CurriculumService)
//! is announced here. Listeners use it for audit logs and cache invalidation.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::models::{ItemKind, ProgressStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum CurriculumEvent {
    // Ordering events
    ItemInserted {
        kind: ItemKind,
        parent_id: String,
        item_id: String,
        order: u32,
    },
    ItemMoved {
        kind: ItemKind,
        parent_id: String,
        item_id: String,
        from: u32,
        to: u32,
    },
    ItemDeleted {
        kind: ItemKind,
        parent_id: String,
        item_id: String,
        order: u32,
    },

    // Progress events
    ProgressUpdated {
        user_id: String,
        course_id: String,
        module_id: String,
        content_id: String,
        module_status: ProgressStatus,
        course_status: ProgressStatus,
    },

    // Access events
    AccessEvaluated {
        student_id: String,
        module_id: String,
        has_access: bool,
    },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &CurriculumEvent);
}

/// Broadcast bus for curriculum events
pub struct EventBus {
    sender: broadcast::Sender<CurriculumEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: CurriculumEvent) {
        trace!(event = ?event, "Emitting curriculum event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CurriculumEvent> {
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

/// Audit listener: writes each event to the log
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CurriculumEvent) {
        match event {
            CurriculumEvent::ItemInserted { kind, parent_id, item_id, order } => {
                info!(kind = %kind, parent = %parent_id, item_id = %item_id, order, "Item inserted");
            }
            CurriculumEvent::ItemMoved { kind, parent_id, item_id, from, to } => {
                info!(kind = %kind, parent = %parent_id, item_id = %item_id, from, to, "Item moved");
            }
            CurriculumEvent::ItemDeleted { kind, parent_id, item_id, order } => {
                info!(kind = %kind, parent = %parent_id, item_id = %item_id, order, "Item deleted");
            }
            CurriculumEvent::ProgressUpdated {
                user_id,
                course_id,
                content_id,
                course_status,
                ..
            } => {
                debug!(
                    user = %user_id,
                    course = %course_id,
                    content = %content_id,
                    course_status = ?course_status,
                    "Progress updated"
                );
            }
            CurriculumEvent::AccessEvaluated { .. } => {
                trace!(event = ?event, "Access evaluated");
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

/// Wait for a listener task to finish. Returns `false` and logs when the
/// task panicked or was aborted.
pub async fn join_listener(handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Event listener task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(CurriculumEvent::ItemDeleted {
            kind: ItemKind::Lesson,
            parent_id: "m1".into(),
            item_id: "l1".into(),
            order: 2,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            CurriculumEvent::ItemDeleted { item_id, order, .. } => {
                assert_eq!(item_id, "l1");
                assert_eq!(order, 2);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(CurriculumEvent::AccessEvaluated {
            student_id: "s".into(),
            module_id: "m".into(),
            has_access: true,
        });
    }

    #[tokio::test]
    async fn test_join_listener_reports_failed_task() {
        let bus = Arc::new(EventBus::new());
        let listener = spawn_logging_listener(bus.clone());
        drop(bus);
        assert!(timeout(Duration::from_secs(1), join_listener(listener)).await.unwrap());

        let crashed: tokio::task::JoinHandle<()> = tokio::spawn(async { panic!("listener crashed") });
        assert!(!join_listener(crashed).await);
    }
}
