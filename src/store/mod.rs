//! Storage collaborator contracts
//!
//! The components in this crate never talk to a database directly. They go
//! through these traits, which adapters implement:
//!
//! - [`memory`] keeps everything in process (tests, single-node tools)
//! - [`mongo`] maps each store onto a MongoDB collection
//!
//! Every write that must be atomic is a single trait call, so an adapter can
//! wrap it in whatever transaction primitive it has and a dropped future
//! leaves either the old state or the new one.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CourseProgress, GradeRecord, OrderMutation, OrderScope, ScopeSnapshot, Versioned};

pub use memory::{MemoryGradeStore, MemoryOrderStore, MemoryProgressStore};
pub use mongo::{MongoGradeStore, MongoOrderStore, MongoProgressStore, MongoStores};

/// Ordered children keyed by `(scope, order, item_id)`
#[async_trait]
pub trait OrderKeyStore: Send + Sync {
    /// All items of the scope sorted by order, plus the scope version
    async fn snapshot(&self, scope: &OrderScope) -> Result<ScopeSnapshot>;

    /// Apply the bulk shift and the primary write as one unit.
    ///
    /// Fails with `Conflict` (and applies nothing) when the scope version is
    /// no longer `mutation.expected_version`. Returns the new version.
    async fn commit(&self, scope: &OrderScope, mutation: OrderMutation) -> Result<u64>;
}

/// One progress document per (user, course), written with optimistic versioning
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, user_id: &str, course_id: &str) -> Result<Option<Versioned<CourseProgress>>>;

    /// Write `progress` if the stored version still equals `expected_version`.
    ///
    /// `None` means create-only: fails with `Conflict` if a document exists.
    async fn save(&self, progress: &CourseProgress, expected_version: Option<u64>) -> Result<u64>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<CourseProgress>>;
}

/// Read-only grade book
#[async_trait]
pub trait GradeStore: Send + Sync {
    async fn find_grade(&self, subject_key: &str, assessment_key: &str) -> Result<Option<GradeRecord>>;
}
