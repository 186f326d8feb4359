//! MongoDB store adapters
//!
//! Collections:
//!
//! - `ordered_items` - one document per ordered child, keyed by scope
//! - `order_scopes` - one version counter per scope
//! - `course_progress` - one versioned document per (user, course)
//! - `student_grades` - the existing grade book (`email`, `module`, `grade`)
//!
//! Order commits run inside a multi-document transaction, so the deployment
//! must be a replica set (a single-node replica set is enough).

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::NaiveDate;
use futures::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{GradeStore, OrderKeyStore, ProgressStore};
use crate::error::{CurriculumError, Result};
use crate::models::{
    CourseProgress, GradeRecord, ItemBody, OrderMutation, OrderScope, OrderWrite, OrderedItem,
    ProgressId, ScopeSnapshot, Versioned,
};

pub const ORDERED_ITEMS_COLLECTION: &str = "ordered_items";
pub const ORDER_SCOPES_COLLECTION: &str = "order_scopes";
pub const PROGRESS_COLLECTION: &str = "course_progress";
pub const GRADES_COLLECTION: &str = "student_grades";

/// Handle to the curriculum database; hands out the individual stores
#[derive(Clone)]
pub struct MongoStores {
    client: Client,
    db: Database,
}

impl MongoStores {
    /// Connect, verify with a ping, and make sure indexes exist
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on an unreachable server instead of hanging
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| CurriculumError::Storage(format!("Failed to connect to MongoDB: {}", e)))?;

        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CurriculumError::Storage(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        let stores = Self { client, db };
        stores.apply_indexes().await?;
        Ok(stores)
    }

    async fn apply_indexes(&self) -> Result<()> {
        self.db
            .collection::<Document>(ORDERED_ITEMS_COLLECTION)
            .create_indexes(vec![
                index(doc! { "scope_key": 1, "order": 1 }, "scope_order", false),
                index(doc! { "scope_key": 1, "item_id": 1 }, "scope_item_unique", true),
            ])
            .await?;

        self.db
            .collection::<Document>(PROGRESS_COLLECTION)
            .create_indexes(vec![index(doc! { "user_id": 1 }, "user_index", false)])
            .await?;

        self.db
            .collection::<Document>(GRADES_COLLECTION)
            .create_indexes(vec![index(doc! { "email": 1, "module": 1 }, "email_module", false)])
            .await?;

        Ok(())
    }

    pub fn order_store(&self) -> MongoOrderStore {
        MongoOrderStore {
            client: self.client.clone(),
            items: self.db.collection(ORDERED_ITEMS_COLLECTION),
            scopes: self.db.collection(ORDER_SCOPES_COLLECTION),
        }
    }

    pub fn progress_store(&self) -> MongoProgressStore {
        MongoProgressStore {
            docs: self.db.collection(PROGRESS_COLLECTION),
        }
    }

    pub fn grade_store(&self) -> MongoGradeStore {
        MongoGradeStore {
            grades: self.db.collection(GRADES_COLLECTION),
        }
    }
}

fn index(keys: Document, name: &str, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(unique)
                .build(),
        )
        .build()
}

/// Transaction aborted by a concurrent writer: surface as a retryable conflict
fn map_txn_error(scope: &OrderScope, expected: u64, e: mongodb::error::Error) -> CurriculumError {
    if e.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
        warn!(scope = %scope, error = %e, "Transient transaction error, reporting conflict");
        CurriculumError::conflict(scope, expected, expected)
    } else {
        e.into()
    }
}

// ============================================================================
// Ordered items
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderedItemDoc {
    scope_key: String,
    item_id: String,
    parent_id: String,
    order: i64,
    body: ItemBody,
}

impl OrderedItemDoc {
    fn from_item(scope: &OrderScope, item: &OrderedItem) -> Self {
        Self {
            scope_key: scope.key(),
            item_id: item.id.clone(),
            parent_id: item.parent_id.clone(),
            order: item.order as i64,
            body: item.body.clone(),
        }
    }

    fn into_item(self) -> OrderedItem {
        OrderedItem {
            id: self.item_id,
            parent_id: self.parent_id,
            order: self.order.max(0) as u32,
            body: self.body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScopeVersionDoc {
    version: i64,
}

pub struct MongoOrderStore {
    client: Client,
    items: Collection<OrderedItemDoc>,
    scopes: Collection<ScopeVersionDoc>,
}

impl MongoOrderStore {
    async fn commit_in_session(
        &self,
        session: &mut ClientSession,
        scope: &OrderScope,
        mutation: OrderMutation,
    ) -> Result<u64> {
        let key = scope.key();
        let expected = mutation.expected_version;
        let txn = |e: mongodb::error::Error| map_txn_error(scope, expected, e);

        let current = self
            .scopes
            .find_one(doc! { "_id": &key })
            .session(&mut *session)
            .await
            .map_err(txn)?
            .map(|doc| doc.version.max(0) as u64)
            .unwrap_or(0);
        if current != expected {
            return Err(CurriculumError::conflict(scope, expected, current));
        }

        let bumped = self
            .scopes
            .update_one(
                doc! { "_id": &key, "version": expected as i64 },
                doc! { "$inc": { "version": 1_i64 } },
            )
            .upsert(expected == 0)
            .session(&mut *session)
            .await
            .map_err(txn)?;
        if bumped.matched_count == 0 && bumped.upserted_id.is_none() {
            return Err(CurriculumError::conflict(scope, expected, current + 1));
        }

        let target_id = match &mutation.write {
            OrderWrite::Insert(item) => {
                let existing = self
                    .items
                    .find_one(doc! { "scope_key": &key, "item_id": &item.id })
                    .session(&mut *session)
                    .await
                    .map_err(txn)?;
                if existing.is_some() {
                    return Err(CurriculumError::AlreadyExists(format!(
                        "{} {} in {}",
                        item.kind(),
                        item.id,
                        scope
                    )));
                }
                None
            }
            OrderWrite::Reposition { item_id, .. } | OrderWrite::Remove { item_id } => {
                let existing = self
                    .items
                    .find_one(doc! { "scope_key": &key, "item_id": item_id })
                    .session(&mut *session)
                    .await
                    .map_err(txn)?;
                if existing.is_none() {
                    return Err(CurriculumError::NotFound(format!(
                        "{} {} in {}",
                        scope.kind, item_id, scope
                    )));
                }
                Some(item_id.clone())
            }
        };

        if let Some(shift) = &mutation.shift {
            let mut range = doc! { "$gte": shift.range.from as i64 };
            if let Some(to) = shift.range.to {
                range.insert("$lte", to as i64);
            }
            let mut filter = doc! { "scope_key": &key, "order": range };
            if let Some(ref id) = target_id {
                filter.insert("item_id", doc! { "$ne": id });
            }

            let shifted = self
                .items
                .update_many(filter, doc! { "$inc": { "order": shift.delta as i64 } })
                .session(&mut *session)
                .await
                .map_err(txn)?;
            debug!(scope = %scope, shifted = shifted.modified_count, delta = shift.delta, "Shifted orders");
        }

        match mutation.write {
            OrderWrite::Insert(item) => {
                self.items
                    .insert_one(OrderedItemDoc::from_item(scope, &item))
                    .session(&mut *session)
                    .await
                    .map_err(txn)?;
            }
            OrderWrite::Reposition { item_id, order } => {
                self.items
                    .update_one(
                        doc! { "scope_key": &key, "item_id": &item_id },
                        doc! { "$set": { "order": order as i64 } },
                    )
                    .session(&mut *session)
                    .await
                    .map_err(txn)?;
            }
            OrderWrite::Remove { item_id } => {
                self.items
                    .delete_one(doc! { "scope_key": &key, "item_id": &item_id })
                    .session(&mut *session)
                    .await
                    .map_err(txn)?;
            }
        }

        Ok(expected + 1)
    }
}

#[async_trait]
impl OrderKeyStore for MongoOrderStore {
    async fn snapshot(&self, scope: &OrderScope) -> Result<ScopeSnapshot> {
        let key = scope.key();

        // Version first: items read afterwards are at least this new, and a
        // mutation planned on them fails its version check if they are newer
        let version = self
            .scopes
            .find_one(doc! { "_id": &key })
            .await?
            .map(|doc| doc.version.max(0) as u64)
            .unwrap_or(0);

        let docs: Vec<OrderedItemDoc> = self
            .items
            .find(doc! { "scope_key": &key })
            .sort(doc! { "order": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(ScopeSnapshot {
            version,
            items: docs.into_iter().map(OrderedItemDoc::into_item).collect(),
        })
    }

    async fn commit(&self, scope: &OrderScope, mutation: OrderMutation) -> Result<u64> {
        let expected = mutation.expected_version;
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.commit_in_session(&mut session, scope, mutation).await {
            Ok(version) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| map_txn_error(scope, expected, e))?;
                Ok(version)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(scope = %scope, error = %abort_err, "Failed to abort order transaction");
                }
                Err(err)
            }
        }
    }
}

// ============================================================================
// Course progress
// ============================================================================

/// `_id` is the compound `{ user_id, course_id }` document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDoc {
    #[serde(rename = "_id")]
    id: ProgressId,
    user_id: String,
    course_id: String,
    version: i64,
    progress: CourseProgress,
}

pub struct MongoProgressStore {
    docs: Collection<ProgressDoc>,
}

/// Exact match on the compound `_id`; field order matches `ProgressId`
fn progress_filter(id: &ProgressId) -> Document {
    doc! { "_id": { "user_id": &id.user_id, "course_id": &id.course_id } }
}

impl MongoProgressStore {
    async fn current_version(&self, id: &ProgressId) -> Result<u64> {
        Ok(self
            .docs
            .find_one(progress_filter(id))
            .await?
            .map(|doc| doc.version.max(0) as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn load(&self, user_id: &str, course_id: &str) -> Result<Option<Versioned<CourseProgress>>> {
        Ok(self
            .docs
            .find_one(progress_filter(&ProgressId::new(user_id, course_id)))
            .await?
            .map(|doc| Versioned {
                version: doc.version.max(0) as u64,
                value: doc.progress,
            }))
    }

    async fn save(&self, progress: &CourseProgress, expected_version: Option<u64>) -> Result<u64> {
        let id = progress.id();
        let next = expected_version.unwrap_or(0) + 1;
        let doc = ProgressDoc {
            id: id.clone(),
            user_id: progress.user_id.clone(),
            course_id: progress.course_id.clone(),
            version: next as i64,
            progress: progress.clone(),
        };

        let written = match expected_version {
            None => {
                // Create-only: insert when absent, otherwise touch nothing
                let mut insert = bson::to_document(&doc)?;
                insert.remove("_id");
                let result = self
                    .docs
                    .update_one(progress_filter(&id), doc! { "$setOnInsert": insert })
                    .upsert(true)
                    .await?;
                result.upserted_id.is_some()
            }
            Some(expected) => {
                let mut filter = progress_filter(&id);
                filter.insert("version", expected as i64);
                let result = self.docs.replace_one(filter, &doc).await?;
                result.matched_count == 1
            }
        };

        if !written {
            let actual = self.current_version(&id).await?;
            return Err(CurriculumError::conflict(
                format!("progress {}", id),
                expected_version.unwrap_or(0),
                actual,
            ));
        }

        Ok(next)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<CourseProgress>> {
        let docs: Vec<ProgressDoc> = self
            .docs
            .find(doc! { "user_id": user_id })
            .sort(doc! { "course_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|doc| doc.progress).collect())
    }
}

// ============================================================================
// Grades
// ============================================================================

/// Grade book document as written by the grading service
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GradeDoc {
    email: String,
    module: String,
    grade: f64,
    date_assigned: String,
}

pub struct MongoGradeStore {
    grades: Collection<GradeDoc>,
}

#[async_trait]
impl GradeStore for MongoGradeStore {
    async fn find_grade(&self, subject_key: &str, assessment_key: &str) -> Result<Option<GradeRecord>> {
        let found = self
            .grades
            .find_one(doc! { "email": subject_key.trim(), "module": assessment_key.trim() })
            .await?;

        let Some(doc) = found else {
            return Ok(None);
        };

        let date_assigned = NaiveDate::parse_from_str(doc.date_assigned.trim(), "%Y-%m-%d")
            .map_err(|e| {
                CurriculumError::Storage(format!(
                    "Invalid date_assigned '{}' for {}/{}: {}",
                    doc.date_assigned, doc.email, doc.module, e
                ))
            })?;

        Ok(Some(GradeRecord::new(doc.email, doc.module, doc.grade, date_assigned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_progress_filter_matches_stored_id() {
        let progress = CourseProgress::new("a:b", "c", Utc::now());
        let doc = ProgressDoc {
            id: progress.id(),
            user_id: progress.user_id.clone(),
            course_id: progress.course_id.clone(),
            version: 1,
            progress,
        };

        let stored = bson::to_document(&doc).unwrap();
        let filter = progress_filter(&doc.id);
        assert_eq!(stored.get("_id"), filter.get("_id"));
        assert_ne!(filter, progress_filter(&ProgressId::new("a", "b:c")));
    }
}
