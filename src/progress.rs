//! Hierarchical progress aggregation
//!
//! Content items move `NotStarted → InProgress → Completed`. Modules and
//! courses are rolled up from their children on every write, against the
//! children the catalog enumerates:
//!
//! - a container is `Completed` when every enumerated child is `Completed`
//! - `InProgress` when any recorded child has started
//! - `NotStarted` otherwise
//!
//! When the catalog enumerates nothing for a container the recorded children
//! stand in, and an empty container is never `Completed`. Every recorded
//! module is re-rolled on each write, so a module the catalog has grown since
//! it completed drops back to `InProgress`.
//!
//! Each update is one read-modify-write of the (user, course) document under
//! an optimistic version check. A stale read surfaces as `Conflict`; the
//! service layer retries it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error};

use crate::catalog::ContentCatalog;
use crate::error::{CurriculumError, Result};
use crate::models::{
    ContentProgress, ContentUpdate, CourseProgress, ModuleProgress, ProgressId, ProgressStatus,
};
use crate::store::ProgressStore;

// =============================================================================
// Rollup
// =============================================================================

/// Status of a container given the ids it should contain and the statuses
/// recorded so far
pub fn rollup_status(enumerated: &[String], recorded: &BTreeMap<&str, ProgressStatus>) -> ProgressStatus {
    let complete = if enumerated.is_empty() {
        !recorded.is_empty() && recorded.values().all(ProgressStatus::is_completed)
    } else {
        enumerated
            .iter()
            .all(|id| recorded.get(id.as_str()).is_some_and(ProgressStatus::is_completed))
    };

    if complete {
        ProgressStatus::Completed
    } else if recorded.values().any(|status| *status > ProgressStatus::NotStarted) {
        ProgressStatus::InProgress
    } else {
        ProgressStatus::NotStarted
    }
}

pub fn module_status(module: &ModuleProgress, enumerated: &[String]) -> ProgressStatus {
    let recorded = module
        .content_progress
        .iter()
        .map(|(id, content)| (id.as_str(), content.status))
        .collect();
    rollup_status(enumerated, &recorded)
}

pub fn course_status(course: &CourseProgress, enumerated: &[String]) -> ProgressStatus {
    let recorded = course
        .module_progress
        .iter()
        .map(|(id, module)| (id.as_str(), module.status))
        .collect();
    rollup_status(enumerated, &recorded)
}

/// Set a container's status and keep `completed_at` in step: stamped on entry
/// into `Completed`, cleared if the container leaves it
fn settle(
    status: &mut ProgressStatus,
    completed_at: &mut Option<DateTime<Utc>>,
    next: ProgressStatus,
    now: DateTime<Utc>,
) {
    if next.is_completed() {
        completed_at.get_or_insert(now);
    } else {
        *completed_at = None;
    }
    *status = next;
}

/// Apply one content update to the content entry, creating the module and
/// content entries if needed. Container statuses are left alone.
pub fn apply_content_update(progress: &mut CourseProgress, update: &ContentUpdate, now: DateTime<Utc>) {
    let module = progress
        .module_progress
        .entry(update.module_id.clone())
        .or_insert_with(|| ModuleProgress::new(update.module_id.clone(), now));

    let content = module
        .content_progress
        .entry(update.content_id.clone())
        .or_insert_with(|| ContentProgress::new(update.content_type));

    content.started_at.get_or_insert(now);
    content.time_spent_seconds = content.time_spent_seconds.saturating_add(update.time_spent_delta);
    if let Some(position) = &update.last_position {
        content.last_position = Some(position.clone());
    }

    if update.completed && !content.status.is_completed() {
        content.status = ProgressStatus::Completed;
        content.completed_at = Some(now);
    } else if content.status == ProgressStatus::NotStarted {
        content.status = ProgressStatus::InProgress;
    }

    progress.last_accessed_at = now;
}

/// Content ids the catalog lists for each module, keyed by module id
pub type ModuleListings = BTreeMap<String, Vec<String>>;

fn listing<'a>(listings: &'a ModuleListings, module_id: &str) -> &'a [String] {
    listings.get(module_id).map(Vec::as_slice).unwrap_or(&[])
}

/// Recompute every recorded module and then the course. A module missing
/// from `listings` is rolled up from its recorded children.
pub fn recompute_rollup(
    progress: &mut CourseProgress,
    listings: &ModuleListings,
    course_modules: &[String],
    now: DateTime<Utc>,
) {
    for (module_id, module) in progress.module_progress.iter_mut() {
        let next = module_status(module, listing(listings, module_id));
        settle(&mut module.status, &mut module.completed_at, next, now);
    }

    let next = course_status(progress, course_modules);
    settle(&mut progress.status, &mut progress.completed_at, next, now);
}

// =============================================================================
// Aggregator
// =============================================================================

pub struct ProgressAggregator {
    store: Arc<dyn ProgressStore>,
    catalog: Arc<dyn ContentCatalog>,
    verify_writes: bool,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn ProgressStore>, catalog: Arc<dyn ContentCatalog>) -> Self {
        Self {
            store,
            catalog,
            verify_writes: true,
        }
    }

    /// Re-read the document after every save and check its rollup
    pub fn with_verification(mut self, verify_writes: bool) -> Self {
        self.verify_writes = verify_writes;
        self
    }

    /// Record time spent on (or completion of) one content item and roll the
    /// change up to its module and course. One attempt; a concurrent writer
    /// fails this call with `Conflict`.
    pub async fn update_content_progress(&self, update: &ContentUpdate) -> Result<CourseProgress> {
        let module_contents = self.module_contents(update).await?;
        let course_modules = self.catalog.get_course_modules(&update.course_id).await?;
        let listings = self
            .module_listings(&course_modules, &update.module_id, module_contents)
            .await?;

        let now = Utc::now();
        let (mut progress, expected_version) =
            match self.store.load(&update.user_id, &update.course_id).await? {
                Some(stored) => (stored.value, Some(stored.version)),
                None => (CourseProgress::new(&update.user_id, &update.course_id, now), None),
            };

        apply_content_update(&mut progress, update, now);
        recompute_rollup(&mut progress, &listings, &course_modules, now);

        let version = self.store.save(&progress, expected_version).await?;
        debug!(
            user_id = %update.user_id,
            course_id = %update.course_id,
            module_id = %update.module_id,
            content_id = %update.content_id,
            module_status = ?progress.module_progress.get(&update.module_id).map(|m| m.status),
            course_status = ?progress.status,
            version,
            "Updated content progress"
        );

        if self.verify_writes {
            self.verify(update, &listings, &course_modules).await?;
        }
        Ok(progress)
    }

    /// Create an empty progress document for (user, course) if none exists
    pub async fn initialize_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        if !self.catalog.has_course(course_id).await? {
            return Err(CurriculumError::NotFound(format!("course {}", course_id)));
        }
        if let Some(existing) = self.store.load(user_id, course_id).await? {
            return Ok(existing.value);
        }

        let progress = CourseProgress::new(user_id, course_id, Utc::now());
        match self.store.save(&progress, None).await {
            Ok(_) => {
                debug!(user_id, course_id, "Initialized course progress");
                Ok(progress)
            }
            // Lost the creation race; the winner's document is just as good
            Err(err) if err.is_retryable() => self
                .store
                .load(user_id, course_id)
                .await?
                .map(|stored| stored.value)
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    pub async fn get_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress> {
        self.store
            .load(user_id, course_id)
            .await?
            .map(|stored| stored.value)
            .ok_or_else(|| CurriculumError::NotFound(format!("progress {}", ProgressId::new(user_id, course_id))))
    }

    pub async fn list_user_progress(&self, user_id: &str) -> Result<Vec<CourseProgress>> {
        self.store.list_for_user(user_id).await
    }

    /// Content ids enumerated for the module, after checking the module
    /// belongs to the course and lists the content
    async fn module_contents(&self, update: &ContentUpdate) -> Result<Vec<String>> {
        let course_id = self.catalog.get_module_course(&update.module_id).await?;
        if course_id != update.course_id {
            return Err(CurriculumError::NotFound(format!(
                "module {} in course {}",
                update.module_id, update.course_id
            )));
        }

        let contents = self.catalog.get_module_contents(&update.module_id).await?;
        if !contents.is_empty() {
            match contents.iter().find(|c| c.content_id == update.content_id) {
                None => {
                    return Err(CurriculumError::NotFound(format!(
                        "content {} in module {}",
                        update.content_id, update.module_id
                    )))
                }
                Some(listed) if listed.content_type != update.content_type => {
                    return Err(CurriculumError::InvalidInput(format!(
                        "content {} is a {:?}, not a {:?}",
                        update.content_id, listed.content_type, update.content_type
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(contents.into_iter().map(|c| c.content_id).collect())
    }

    /// Listings for every module of the course, fetched concurrently. The
    /// touched module's listing is already known.
    async fn module_listings(
        &self,
        course_modules: &[String],
        touched: &str,
        touched_contents: Vec<String>,
    ) -> Result<ModuleListings> {
        let others: Vec<&String> = course_modules.iter().filter(|id| id.as_str() != touched).collect();
        let fetched = join_all(others.iter().map(|id| self.catalog.get_module_contents(id))).await;

        let mut listings = ModuleListings::new();
        for (module_id, contents) in others.into_iter().zip(fetched) {
            let ids = contents?.into_iter().map(|c| c.content_id).collect();
            listings.insert(module_id.clone(), ids);
        }
        listings.insert(touched.to_string(), touched_contents);
        Ok(listings)
    }

    async fn verify(
        &self,
        update: &ContentUpdate,
        listings: &ModuleListings,
        course_modules: &[String],
    ) -> Result<()> {
        let id = ProgressId::new(&update.user_id, &update.course_id);
        let stored = self
            .store
            .load(&update.user_id, &update.course_id)
            .await?
            .ok_or_else(|| CurriculumError::inconsistent(&id, "document missing after save"))?;
        let progress = stored.value;

        let stale_module = progress.module_progress.iter().find_map(|(module_id, module)| {
            let expected = module_status(module, listing(listings, module_id));
            (module.status != expected).then(|| {
                format!(
                    "module {} stored as {:?}, children roll up to {:?}",
                    module_id, module.status, expected
                )
            })
        });

        let detail = if !progress.module_progress.contains_key(&update.module_id) {
            Some(format!("module {} missing after save", update.module_id))
        } else if stale_module.is_some() {
            stale_module
        } else if progress.status != course_status(&progress, course_modules) {
            Some(format!(
                "course stored as {:?}, modules roll up to {:?}",
                progress.status,
                course_status(&progress, course_modules)
            ))
        } else {
            None
        };

        match detail {
            Some(detail) => {
                error!(progress = %id, version = stored.version, detail = %detail, "Progress rollup mismatch after write");
                Err(CurriculumError::inconsistent(id, detail))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContentRef, StaticCatalog};
    use crate::models::{ContentType, Versioned};
    use crate::store::MemoryProgressStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_module("m1", "c1")
            .with_module("m2", "c1")
            .with_content("m1", ContentRef::lesson("l1"))
            .with_content("m1", ContentRef::lesson("l2"))
            .with_content("m2", ContentRef::lesson("l3"))
    }

    fn aggregator(catalog: StaticCatalog) -> (ProgressAggregator, Arc<MemoryProgressStore>) {
        let store = Arc::new(MemoryProgressStore::new());
        (ProgressAggregator::new(store.clone(), Arc::new(catalog)), store)
    }

    fn update(module_id: &str, content_id: &str, time: u64, completed: bool) -> ContentUpdate {
        ContentUpdate {
            user_id: "u1".into(),
            course_id: "c1".into(),
            module_id: module_id.into(),
            content_id: content_id.into(),
            content_type: ContentType::Lesson,
            time_spent_delta: time,
            last_position: None,
            completed,
        }
    }

    #[test]
    fn test_rollup_status_rules() {
        let listed = vec!["a".to_string(), "b".to_string()];
        let mut recorded = BTreeMap::new();
        assert_eq!(rollup_status(&listed, &recorded), ProgressStatus::NotStarted);

        recorded.insert("a", ProgressStatus::Completed);
        assert_eq!(rollup_status(&listed, &recorded), ProgressStatus::InProgress);

        recorded.insert("b", ProgressStatus::Completed);
        assert_eq!(rollup_status(&listed, &recorded), ProgressStatus::Completed);

        // nothing enumerated: recorded children decide, empty never completes
        assert_eq!(rollup_status(&[], &recorded), ProgressStatus::Completed);
        assert_eq!(rollup_status(&[], &BTreeMap::new()), ProgressStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_single_item_completion_completes_module_and_course() {
        let catalog = StaticCatalog::new()
            .with_module("m1", "c1")
            .with_content("m1", ContentRef::lesson("l1"));
        let (aggregator, _) = aggregator(catalog);

        let progress = aggregator
            .update_content_progress(&update("m1", "l1", 300, true))
            .await
            .unwrap();

        let module = &progress.module_progress["m1"];
        let content = &module.content_progress["l1"];
        assert_eq!(content.status, ProgressStatus::Completed);
        assert_eq!(content.time_spent_seconds, 300);
        assert_eq!(module.status, ProgressStatus::Completed);
        assert_eq!(progress.status, ProgressStatus::Completed);
        let module_done = module.completed_at.unwrap();
        let course_done = progress.completed_at.unwrap();

        // later activity neither moves the stamps nor resets time
        let again = aggregator
            .update_content_progress(&update("m1", "l1", 60, false))
            .await
            .unwrap();
        let module = &again.module_progress["m1"];
        assert_eq!(module.content_progress["l1"].time_spent_seconds, 360);
        assert_eq!(module.content_progress["l1"].status, ProgressStatus::Completed);
        assert_eq!(module.completed_at, Some(module_done));
        assert_eq!(again.completed_at, Some(course_done));
    }

    #[tokio::test]
    async fn test_partial_progress_is_in_progress() {
        let (aggregator, _) = aggregator(catalog());

        let progress = aggregator
            .update_content_progress(&update("m1", "l1", 10, true))
            .await
            .unwrap();
        assert_eq!(progress.module_progress["m1"].status, ProgressStatus::InProgress);
        assert_eq!(progress.status, ProgressStatus::InProgress);
        assert!(progress.completed_at.is_none());

        aggregator.update_content_progress(&update("m1", "l2", 10, true)).await.unwrap();
        let progress = aggregator
            .update_content_progress(&update("m2", "l3", 10, true))
            .await
            .unwrap();
        assert_eq!(progress.status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_grown_module_no_longer_counts_as_completed() {
        let store = Arc::new(MemoryProgressStore::new());
        let before = StaticCatalog::new()
            .with_module("m1", "c1")
            .with_module("m2", "c1")
            .with_content("m1", ContentRef::lesson("l1"))
            .with_content("m2", ContentRef::lesson("l3"));
        let progress = ProgressAggregator::new(store.clone(), Arc::new(before))
            .update_content_progress(&update("m1", "l1", 10, true))
            .await
            .unwrap();
        assert_eq!(progress.module_progress["m1"].status, ProgressStatus::Completed);

        // m1 gains l2, which this student never opened
        let after = ProgressAggregator::new(store.clone(), Arc::new(catalog()));
        let progress = after
            .update_content_progress(&update("m2", "l3", 10, true))
            .await
            .unwrap();

        let m1 = &progress.module_progress["m1"];
        assert_eq!(m1.status, ProgressStatus::InProgress);
        assert!(m1.completed_at.is_none());
        assert_eq!(progress.module_progress["m2"].status, ProgressStatus::Completed);
        assert_eq!(progress.status, ProgressStatus::InProgress);
        assert!(progress.completed_at.is_none());
        assert_eq!(after.get_course_progress("u1", "c1").await.unwrap(), progress);
    }

    #[tokio::test]
    async fn test_separator_in_ids_does_not_cross_students() {
        let (aggregator, _) = aggregator(catalog().with_module("x", "b:c").with_module("y", "c"));
        let mut first = update("x", "anything", 10, true);
        first.user_id = "a".into();
        first.course_id = "b:c".into();
        aggregator.update_content_progress(&first).await.unwrap();

        assert!(matches!(
            aggregator.get_course_progress("a:b", "c").await,
            Err(CurriculumError::NotFound(_))
        ));

        let mut second = update("y", "other", 5, false);
        second.user_id = "a:b".into();
        second.course_id = "c".into();
        let progress = aggregator.update_content_progress(&second).await.unwrap();
        assert_eq!((progress.user_id.as_str(), progress.course_id.as_str()), ("a:b", "c"));
        assert_eq!(progress.module_progress.keys().collect::<Vec<_>>(), vec!["y"]);

        let untouched = aggregator.get_course_progress("a", "b:c").await.unwrap();
        assert_eq!(untouched.module_progress.keys().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(untouched.status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_last_position_is_overwritten_only_when_given() {
        let (aggregator, _) = aggregator(catalog());
        let mut first = update("m1", "l1", 5, false);
        first.last_position = Some(serde_json::json!({ "block": 3 }));
        aggregator.update_content_progress(&first).await.unwrap();

        let progress = aggregator
            .update_content_progress(&update("m1", "l1", 5, false))
            .await
            .unwrap();
        let content = &progress.module_progress["m1"].content_progress["l1"];
        assert_eq!(content.last_position, Some(serde_json::json!({ "block": 3 })));
        assert_eq!(content.status, ProgressStatus::InProgress);
    }

    #[tokio::test]
    async fn test_rejects_content_outside_catalog() {
        let (aggregator, _) = aggregator(catalog().with_module("other", "c2"));

        let err = aggregator
            .update_content_progress(&update("m1", "l9", 1, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::NotFound(_)));

        let err = aggregator
            .update_content_progress(&update("other", "x", 1, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::NotFound(_)));

        let mut quiz = update("m1", "l1", 1, false);
        quiz.content_type = ContentType::Assessment;
        let err = aggregator.update_content_progress(&quiz).await.unwrap_err();
        assert!(matches!(err, CurriculumError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_module_without_listed_contents_uses_recorded_children() {
        let catalog = StaticCatalog::new().with_module("m1", "c1");
        let (aggregator, _) = aggregator(catalog);

        let progress = aggregator
            .update_content_progress(&update("m1", "anything", 1, true))
            .await
            .unwrap();
        assert_eq!(progress.module_progress["m1"].status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (aggregator, store) = aggregator(catalog());

        let first = aggregator.initialize_course_progress("u1", "c1").await.unwrap();
        let second = aggregator.initialize_course_progress("u1", "c1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, ProgressStatus::NotStarted);
        assert_eq!(store.load("u1", "c1").await.unwrap().unwrap().version, 1);

        assert!(matches!(
            aggregator.initialize_course_progress("u1", "nope").await,
            Err(CurriculumError::NotFound(_))
        ));
        assert!(matches!(
            aggregator.get_course_progress("u2", "c1").await,
            Err(CurriculumError::NotFound(_))
        ));
    }

    /// Store that lets another writer slip in between load and the first save
    struct RacingStore {
        inner: MemoryProgressStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl ProgressStore for RacingStore {
        async fn load(&self, user_id: &str, course_id: &str) -> Result<Option<Versioned<CourseProgress>>> {
            self.inner.load(user_id, course_id).await
        }

        async fn save(&self, progress: &CourseProgress, expected_version: Option<u64>) -> Result<u64> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut rival = progress.clone();
                rival.module_progress.clear();
                self.inner.save(&rival, expected_version).await?;
            }
            self.inner.save(progress, expected_version).await
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<CourseProgress>> {
            self.inner.list_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_write_surfaces_as_conflict() {
        let store = Arc::new(RacingStore {
            inner: MemoryProgressStore::new(),
            raced: AtomicBool::new(false),
        });
        let aggregator = ProgressAggregator::new(store.clone(), Arc::new(catalog()));

        let err = aggregator
            .update_content_progress(&update("m1", "l1", 10, false))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // a fresh attempt reads the rival's document and lands on top of it
        let progress = aggregator
            .update_content_progress(&update("m1", "l1", 10, false))
            .await
            .unwrap();
        assert_eq!(progress.module_progress["m1"].content_progress["l1"].time_spent_seconds, 10);
        assert_eq!(store.inner.load("u1", "c1").await.unwrap().unwrap().version, 2);
    }
}
