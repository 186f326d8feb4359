//! In-process store adapters
//!
//! Each store keeps its state behind a single tokio `RwLock`. A commit takes
//! the write lock and applies everything without yielding, so a cancelled
//! caller never leaves a half-applied shift behind.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::{GradeStore, OrderKeyStore, ProgressStore};
use crate::error::{CurriculumError, Result};
use crate::models::{
    CourseProgress, GradeRecord, OrderMutation, OrderScope, OrderShift, OrderWrite, OrderedItem,
    ProgressId, ScopeSnapshot, Versioned,
};

#[derive(Debug, Default)]
struct ScopeState {
    version: u64,
    items: Vec<OrderedItem>,
}

impl ScopeState {
    /// Apply a bulk shift one item at a time, walking away from the
    /// direction of travel so no two items ever share an order mid-shift
    fn apply_shift(&mut self, shift: &OrderShift) {
        let mut affected: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| shift.range.contains(item.order))
            .map(|(index, _)| index)
            .collect();

        if shift.delta > 0 {
            affected.sort_by_key(|&index| std::cmp::Reverse(self.items[index].order));
        } else {
            affected.sort_by_key(|&index| self.items[index].order);
        }

        for index in affected {
            let item = &mut self.items[index];
            item.order = shift.apply_to(item.order);
        }
    }
}

/// Ordered items for every scope, in memory
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    scopes: RwLock<HashMap<OrderScope, ScopeState>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderKeyStore for MemoryOrderStore {
    async fn snapshot(&self, scope: &OrderScope) -> Result<ScopeSnapshot> {
        let scopes = self.scopes.read().await;
        Ok(match scopes.get(scope) {
            Some(state) => {
                let mut items = state.items.clone();
                items.sort_by_key(|item| item.order);
                ScopeSnapshot {
                    version: state.version,
                    items,
                }
            }
            None => ScopeSnapshot::default(),
        })
    }

    async fn commit(&self, scope: &OrderScope, mutation: OrderMutation) -> Result<u64> {
        let mut scopes = self.scopes.write().await;
        let state = scopes.entry(scope.clone()).or_default();

        if state.version != mutation.expected_version {
            return Err(CurriculumError::conflict(
                scope,
                mutation.expected_version,
                state.version,
            ));
        }

        // Validate the primary write before touching anything
        let target = match &mutation.write {
            OrderWrite::Insert(item) => {
                if state.items.iter().any(|existing| existing.id == item.id) {
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
                let index = state
                    .items
                    .iter()
                    .position(|item| &item.id == item_id)
                    .ok_or_else(|| {
                        CurriculumError::NotFound(format!("{} {} in {}", scope.kind, item_id, scope))
                    })?;
                Some(index)
            }
        };

        // The moved or removed item sits outside the shifted range, but step
        // it aside anyway so the shift only ever touches its siblings
        let parked = match (&mutation.write, target) {
            (OrderWrite::Remove { .. }, Some(index)) => {
                state.items.remove(index);
                None
            }
            (OrderWrite::Reposition { .. }, Some(index)) => Some(state.items.remove(index)),
            _ => None,
        };

        if let Some(shift) = &mutation.shift {
            state.apply_shift(shift);
        }

        match mutation.write {
            OrderWrite::Insert(item) => state.items.push(item),
            OrderWrite::Reposition { order, .. } => {
                if let Some(mut item) = parked {
                    item.order = order;
                    state.items.push(item);
                }
            }
            OrderWrite::Remove { .. } => {}
        }

        state.version += 1;
        trace!(scope = %scope, version = state.version, "Committed order mutation");
        Ok(state.version)
    }
}

/// Progress documents keyed by (user, course)
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    docs: RwLock<HashMap<ProgressId, Versioned<CourseProgress>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, user_id: &str, course_id: &str) -> Result<Option<Versioned<CourseProgress>>> {
        let docs = self.docs.read().await;
        Ok(docs.get(&ProgressId::new(user_id, course_id)).cloned())
    }

    async fn save(&self, progress: &CourseProgress, expected_version: Option<u64>) -> Result<u64> {
        let mut docs = self.docs.write().await;
        let id = progress.id();
        let current = docs.get(&id).map(|doc| doc.version);

        let next = match (expected_version, current) {
            (None, None) => 1,
            (Some(expected), Some(actual)) if expected == actual => actual + 1,
            (expected, actual) => {
                return Err(CurriculumError::conflict(
                    format!("progress {}", id),
                    expected.unwrap_or(0),
                    actual.unwrap_or(0),
                ));
            }
        };

        docs.insert(
            id,
            Versioned {
                version: next,
                value: progress.clone(),
            },
        );
        Ok(next)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<CourseProgress>> {
        let docs = self.docs.read().await;
        let mut list: Vec<CourseProgress> = docs
            .values()
            .filter(|doc| doc.value.user_id == user_id)
            .map(|doc| doc.value.clone())
            .collect();
        list.sort_by(|a, b| a.course_id.cmp(&b.course_id));
        Ok(list)
    }
}

/// Grade book in memory
#[derive(Debug, Default)]
pub struct MemoryGradeStore {
    grades: RwLock<HashMap<(String, String), GradeRecord>>,
}

impl MemoryGradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the grade for (subject, assessment)
    pub async fn record(&self, grade: GradeRecord) {
        let key = (grade.subject_key.clone(), grade.assessment_key.clone());
        self.grades.write().await.insert(key, grade);
    }
}

#[async_trait]
impl GradeStore for MemoryGradeStore {
    async fn find_grade(&self, subject_key: &str, assessment_key: &str) -> Result<Option<GradeRecord>> {
        let key = (subject_key.trim().to_string(), assessment_key.trim().to_string());
        Ok(self.grades.read().await.get(&key).cloned())
    }
}
