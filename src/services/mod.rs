//! Caller-facing service layer
//!
//! [`CurriculumService`] is what a request handler talks to. Each operation:
//! - runs under the configured timeout (expiry is `Cancelled`)
//! - retries `Conflict` with bounded backoff
//! - emits a [`CurriculumEvent`] after a successful write
//!
//! ```text
//! Request handler (external)
//!     ↓
//! CurriculumService (timeout, retry, events)
//!     ↓
//! OrderedCollectionManager / ProgressAggregator / AccessGateEvaluator
//!     ↓
//! OrderKeyStore / ProgressStore / GradeStore / ContentCatalog
//! ```

pub mod events;

pub use events::{join_listener, spawn_logging_listener, CurriculumEvent, EventBus, EventListener};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::access::{AccessDecision, AccessGateEvaluator};
use crate::catalog::ContentCatalog;
use crate::config::Config;
use crate::error::{CurriculumError, Result};
use crate::models::{ContentUpdate, CourseProgress, OrderScope, OrderedItem};
use crate::ordering::{MovedItem, Neighbors, OrderedCollectionManager};
use crate::progress::ProgressAggregator;
use crate::retry::RetryPolicy;
use crate::store::{GradeStore, OrderKeyStore, ProgressStore};

/// Everything the core reads from or writes to
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderKeyStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub grades: Arc<dyn GradeStore>,
    pub catalog: Arc<dyn ContentCatalog>,
}

pub struct CurriculumService {
    pub ordering: Arc<OrderedCollectionManager>,
    pub progress: Arc<ProgressAggregator>,
    pub access: Arc<AccessGateEvaluator>,
    pub events: Arc<EventBus>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CurriculumService {
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            orders,
            progress,
            grades,
            catalog,
        } = collaborators;

        Self {
            ordering: Arc::new(
                OrderedCollectionManager::new(orders, catalog.clone())
                    .with_verification(config.verify_writes),
            ),
            progress: Arc::new(
                ProgressAggregator::new(progress, catalog.clone())
                    .with_verification(config.verify_writes),
            ),
            access: Arc::new(
                AccessGateEvaluator::new(catalog, grades)
                    .with_default_passing_grade(config.default_passing_grade),
            ),
            events: Arc::new(EventBus::new()),
            retry: config.retry.clone(),
            timeout: config.operation_timeout(),
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    pub async fn insert_ordered_item(
        &self,
        scope: &OrderScope,
        desired_order: i64,
        item: OrderedItem,
    ) -> Result<OrderedItem> {
        let placed = self
            .bounded("insert_ordered_item", async {
                self.retry
                    .run("insert_ordered_item", || {
                        self.ordering.insert(scope, desired_order, item.clone())
                    })
                    .await
            })
            .await?;

        self.events.emit(CurriculumEvent::ItemInserted {
            kind: scope.kind,
            parent_id: scope.parent_id.clone(),
            item_id: placed.id.clone(),
            order: placed.order,
        });
        Ok(placed)
    }

    pub async fn move_ordered_item(
        &self,
        scope: &OrderScope,
        item_id: &str,
        new_order: i64,
    ) -> Result<MovedItem> {
        let moved = self
            .bounded("move_ordered_item", async {
                self.retry
                    .run("move_ordered_item", || {
                        self.ordering.move_item(scope, item_id, new_order)
                    })
                    .await
            })
            .await?;

        if moved.changed() {
            self.events.emit(CurriculumEvent::ItemMoved {
                kind: scope.kind,
                parent_id: scope.parent_id.clone(),
                item_id: item_id.to_string(),
                from: moved.previous_order,
                to: moved.item.order,
            });
        }
        Ok(moved)
    }

    pub async fn delete_ordered_item(&self, scope: &OrderScope, item_id: &str) -> Result<OrderedItem> {
        let removed = self
            .bounded("delete_ordered_item", async {
                self.retry
                    .run("delete_ordered_item", || self.ordering.delete(scope, item_id))
                    .await
            })
            .await?;

        self.events.emit(CurriculumEvent::ItemDeleted {
            kind: scope.kind,
            parent_id: scope.parent_id.clone(),
            item_id: removed.id.clone(),
            order: removed.order,
        });
        Ok(removed)
    }

    pub async fn list_ordered_items(&self, scope: &OrderScope) -> Result<Vec<OrderedItem>> {
        self.bounded("list_ordered_items", self.ordering.list(scope)).await
    }

    pub async fn neighbors(&self, scope: &OrderScope, item_id: &str) -> Result<Neighbors> {
        self.bounded("neighbors", self.ordering.neighbors(scope, item_id)).await
    }

    // =========================================================================
    // Progress
    // =========================================================================

    pub async fn update_content_progress(&self, update: &ContentUpdate) -> Result<CourseProgress> {
        let progress = self
            .bounded("update_content_progress", async {
                self.retry
                    .run("update_content_progress", || {
                        self.progress.update_content_progress(update)
                    })
                    .await
            })
            .await?;

        let module_status = progress
            .module_progress
            .get(&update.module_id)
            .map(|module| module.status)
            .unwrap_or_default();
        self.events.emit(CurriculumEvent::ProgressUpdated {
            user_id: update.user_id.clone(),
            course_id: update.course_id.clone(),
            module_id: update.module_id.clone(),
            content_id: update.content_id.clone(),
            module_status,
            course_status: progress.status,
        });
        Ok(progress)
    }

    pub async fn initialize_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        self.bounded(
            "initialize_course_progress",
            self.progress.initialize_course_progress(user_id, course_id),
        )
        .await
    }

    pub async fn get_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        self.bounded(
            "get_course_progress",
            self.progress.get_course_progress(user_id, course_id),
        )
        .await
    }

    pub async fn list_user_progress(&self, user_id: &str) -> Result<Vec<CourseProgress>> {
        self.bounded("list_user_progress", self.progress.list_user_progress(user_id))
            .await
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub async fn check_access(&self, student_id: &str, module_id: &str) -> Result<AccessDecision> {
        let decision = self
            .bounded("check_access", self.access.check_access(student_id, module_id))
            .await?;

        self.events.emit(CurriculumEvent::AccessEvaluated {
            student_id: student_id.to_string(),
            module_id: module_id.to_string(),
            has_access: decision.has_access,
        });
        Ok(decision)
    }

    pub async fn check_course_access(&self, student_id: &str, course_id: &str) -> Result<Vec<AccessDecision>> {
        self.bounded(
            "check_course_access",
            self.access.check_course_access(student_id, course_id),
        )
        .await
    }

    /// Run `fut` under the operation timeout. On expiry the future is dropped,
    /// which the stores guarantee leaves no partial write.
    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Operation timed out");
                Err(CurriculumError::Cancelled(format!(
                    "{} exceeded {}ms",
                    operation,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}
