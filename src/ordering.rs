//! Ordered collection manager
//!
//! Keeps the children of every scope at orders `1..=N` with no gaps or
//! duplicates across insert, move and delete. Each operation plans one
//! [`OrderMutation`] (bulk shift + primary write) against a scope snapshot
//! and hands it to the store as a single atomic commit.
//!
//! Writers to the same scope are serialised by a per-scope async lock in
//! this process and by the scope version check in the store across
//! processes. Different scopes never contend. A scope's lock lives only
//! while some writer holds or awaits it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

use crate::catalog::ContentCatalog;
use crate::error::{CurriculumError, Result};
use crate::models::{
    check_density, ItemKind, OrderMutation, OrderScope, OrderShift, OrderWrite, OrderedItem,
};
use crate::store::OrderKeyStore;

/// An item after a move, with the order it left
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovedItem {
    pub item: OrderedItem,
    pub previous_order: u32,
}

impl MovedItem {
    pub fn changed(&self) -> bool {
        self.item.order != self.previous_order
    }
}

/// Siblings immediately before and after an item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbors {
    pub previous: Option<OrderedItem>,
    pub next: Option<OrderedItem>,
}

pub struct OrderedCollectionManager {
    store: Arc<dyn OrderKeyStore>,
    catalog: Arc<dyn ContentCatalog>,
    locks: DashMap<OrderScope, Arc<Mutex<()>>>,
    verify_writes: bool,
}

impl OrderedCollectionManager {
    pub fn new(store: Arc<dyn OrderKeyStore>, catalog: Arc<dyn ContentCatalog>) -> Self {
        Self {
            store,
            catalog,
            locks: DashMap::new(),
            verify_writes: true,
        }
    }

    /// Re-read the scope after every commit and check density
    pub fn with_verification(mut self, verify_writes: bool) -> Self {
        self.verify_writes = verify_writes;
        self
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Items of a scope in order
    pub async fn list(&self, scope: &OrderScope) -> Result<Vec<OrderedItem>> {
        self.ensure_parent(scope).await?;
        Ok(self.store.snapshot(scope).await?.items)
    }

    pub async fn neighbors(&self, scope: &OrderScope, item_id: &str) -> Result<Neighbors> {
        let items = self.list(scope).await?;
        let index = items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| not_found(scope, item_id))?;

        Ok(Neighbors {
            previous: index.checked_sub(1).map(|i| items[i].clone()),
            next: items.get(index + 1).cloned(),
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Insert `item` at `desired_order`, pushing later siblings up by one.
    ///
    /// Orders past the end are clamped to `N + 1`.
    pub async fn insert(
        &self,
        scope: &OrderScope,
        desired_order: i64,
        mut item: OrderedItem,
    ) -> Result<OrderedItem> {
        check_order(desired_order)?;
        if item.kind() != scope.kind {
            return Err(CurriculumError::InvalidInput(format!(
                "cannot insert a {} into {}",
                item.kind(),
                scope
            )));
        }
        if item.parent_id != scope.parent_id {
            return Err(CurriculumError::InvalidInput(format!(
                "{} {} belongs to {} {}, not {}",
                item.kind(),
                item.id,
                scope.kind.parent_label(),
                item.parent_id,
                scope
            )));
        }
        self.ensure_parent(scope).await?;

        let _guard = self.lock_scope(scope).await;

        let snapshot = self.store.snapshot(scope).await?;
        let count = snapshot.count();
        let order = clamp(desired_order, count + 1);
        let shift = (order <= count).then(|| OrderShift::open_gap(order));

        item.order = order;
        let version = self
            .store
            .commit(
                scope,
                OrderMutation {
                    expected_version: snapshot.version,
                    shift,
                    write: OrderWrite::Insert(item.clone()),
                },
            )
            .await?;

        debug!(scope = %scope, item_id = %item.id, order, version, "Inserted ordered item");
        self.verify(scope).await?;
        Ok(item)
    }

    /// Move an item to `new_order`, rotating the siblings in between.
    ///
    /// Moving to the current order writes nothing. Orders past the end are
    /// clamped to `N`.
    pub async fn move_item(
        &self,
        scope: &OrderScope,
        item_id: &str,
        new_order: i64,
    ) -> Result<MovedItem> {
        check_order(new_order)?;
        self.ensure_parent(scope).await?;

        let _guard = self.lock_scope(scope).await;

        let snapshot = self.store.snapshot(scope).await?;
        let mut item = snapshot
            .position_of(item_id)
            .cloned()
            .ok_or_else(|| not_found(scope, item_id))?;

        let target = clamp(new_order, snapshot.count());
        if target == item.order {
            debug!(scope = %scope, item_id, order = target, "Move to current order, nothing to do");
            return Ok(MovedItem {
                previous_order: item.order,
                item,
            });
        }

        let version = self
            .store
            .commit(
                scope,
                OrderMutation {
                    expected_version: snapshot.version,
                    shift: Some(OrderShift::rotate(item.order, target)),
                    write: OrderWrite::Reposition {
                        item_id: item_id.to_string(),
                        order: target,
                    },
                },
            )
            .await?;

        debug!(scope = %scope, item_id, from = item.order, to = target, version, "Moved ordered item");
        let previous_order = item.order;
        item.order = target;
        self.verify(scope).await?;
        Ok(MovedItem { item, previous_order })
    }

    /// Remove an item and close the gap it leaves
    pub async fn delete(&self, scope: &OrderScope, item_id: &str) -> Result<OrderedItem> {
        self.ensure_parent(scope).await?;

        let _guard = self.lock_scope(scope).await;

        let snapshot = self.store.snapshot(scope).await?;
        let item = snapshot
            .position_of(item_id)
            .cloned()
            .ok_or_else(|| not_found(scope, item_id))?;
        let shift = (item.order < snapshot.count()).then(|| OrderShift::close_gap(item.order));

        let version = self
            .store
            .commit(
                scope,
                OrderMutation {
                    expected_version: snapshot.version,
                    shift,
                    write: OrderWrite::Remove {
                        item_id: item_id.to_string(),
                    },
                },
            )
            .await?;

        debug!(scope = %scope, item_id, order = item.order, version, "Deleted ordered item");
        self.verify(scope).await?;
        Ok(item)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn lock_scope(&self, scope: &OrderScope) -> ScopeGuard<'_> {
        let mut scoped = ScopeGuard {
            locks: &self.locks,
            scope: scope.clone(),
            guard: None,
        };
        let lock = self.locks.entry(scope.clone()).or_default().clone();
        scoped.guard = Some(lock.lock_owned().await);
        scoped
    }

    async fn ensure_parent(&self, scope: &OrderScope) -> Result<()> {
        match scope.kind {
            ItemKind::Module => {
                if !self.catalog.has_course(&scope.parent_id).await? {
                    return Err(CurriculumError::NotFound(format!("course {}", scope.parent_id)));
                }
            }
            ItemKind::Lesson | ItemKind::Assessment => {
                self.catalog.get_module_course(&scope.parent_id).await?;
            }
        }
        Ok(())
    }

    async fn verify(&self, scope: &OrderScope) -> Result<()> {
        if !self.verify_writes {
            return Ok(());
        }

        let snapshot = self.store.snapshot(scope).await?;
        if let Err(detail) = check_density(&snapshot.items) {
            error!(scope = %scope, version = snapshot.version, detail = %detail, "Order density violated after write");
            return Err(CurriculumError::inconsistent(scope, detail));
        }
        Ok(())
    }
}

/// Holds a scope's lock and drops the map entry on release once no other
/// writer shares it
struct ScopeGuard<'a> {
    locks: &'a DashMap<OrderScope, Arc<Mutex<()>>>,
    scope: OrderScope,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one is the map alone
        self.locks.remove_if(&self.scope, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn check_order(order: i64) -> Result<()> {
    if order < 1 {
        return Err(CurriculumError::InvalidOrder { order });
    }
    Ok(())
}

fn clamp(order: i64, max: u32) -> u32 {
    order.min(max.max(1) as i64) as u32
}

fn not_found(scope: &OrderScope, item_id: &str) -> CurriculumError {
    CurriculumError::NotFound(format!("{} {} in {}", scope.kind, item_id, scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::models::{ItemBody, ScopeSnapshot};
    use crate::store::MemoryOrderStore;
    use async_trait::async_trait;

    fn catalog() -> Arc<dyn ContentCatalog> {
        Arc::new(StaticCatalog::new().with_module("m1", "c1").with_module("m2", "c1"))
    }

    fn manager() -> (OrderedCollectionManager, Arc<MemoryOrderStore>) {
        let store = Arc::new(MemoryOrderStore::new());
        (OrderedCollectionManager::new(store.clone(), catalog()), store)
    }

    fn lesson(id: &str) -> OrderedItem {
        OrderedItem::new(
            id,
            "m1",
            ItemBody::Lesson {
                title: format!("Lesson {}", id),
                blocks: vec![],
            },
        )
    }

    async fn ids(manager: &OrderedCollectionManager, scope: &OrderScope) -> Vec<(String, u32)> {
        manager
            .list(scope)
            .await
            .unwrap()
            .into_iter()
            .map(|item| (item.id, item.order))
            .collect()
    }

    async fn seed(manager: &OrderedCollectionManager, scope: &OrderScope, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            manager.insert(scope, i as i64 + 1, lesson(name)).await.unwrap();
        }
    }

    fn pairs(expected: &[(&str, u32)]) -> Vec<(String, u32)> {
        expected.iter().map(|(id, order)| (id.to_string(), *order)).collect()
    }

    #[tokio::test]
    async fn test_insert_in_middle_then_delete_restores_order() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b", "c"]).await;

        let inserted = manager.insert(&scope, 2, lesson("new")).await.unwrap();
        assert_eq!(inserted.order, 2);
        assert_eq!(
            ids(&manager, &scope).await,
            pairs(&[("a", 1), ("new", 2), ("b", 3), ("c", 4)])
        );

        manager.delete(&scope, "new").await.unwrap();
        assert_eq!(ids(&manager, &scope).await, pairs(&[("a", 1), ("b", 2), ("c", 3)]));
    }

    #[tokio::test]
    async fn test_insert_past_end_is_appended() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b"]).await;

        let inserted = manager.insert(&scope, 10, lesson("z")).await.unwrap();
        assert_eq!(inserted.order, 3);
    }

    #[tokio::test]
    async fn test_scope_locks_are_released_after_writes() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b"]).await;
        manager.move_item(&scope, "a", 2).await.unwrap();
        manager.delete(&scope, "b").await.unwrap();
        assert!(manager.delete(&scope, "ghost").await.is_err());

        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_move_down_and_up() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b", "c", "d"]).await;

        manager.move_item(&scope, "a", 3).await.unwrap();
        assert_eq!(
            ids(&manager, &scope).await,
            pairs(&[("b", 1), ("c", 2), ("a", 3), ("d", 4)])
        );

        manager.move_item(&scope, "d", 1).await.unwrap();
        assert_eq!(
            ids(&manager, &scope).await,
            pairs(&[("d", 1), ("b", 2), ("c", 3), ("a", 4)])
        );

        // past the end lands last
        let moved = manager.move_item(&scope, "d", 99).await.unwrap();
        assert_eq!(moved.item.order, 4);
        assert_eq!(moved.previous_order, 1);
    }

    #[tokio::test]
    async fn test_move_to_current_order_writes_nothing() {
        let (manager, store) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b", "c"]).await;
        let before: ScopeSnapshot = store.snapshot(&scope).await.unwrap();

        let moved = manager.move_item(&scope, "b", 2).await.unwrap();

        assert!(!moved.changed());
        assert_eq!(moved.item.order, 2);
        assert_eq!(store.snapshot(&scope).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_invalid_orders_and_missing_items() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a"]).await;

        assert!(matches!(
            manager.insert(&scope, 0, lesson("x")).await,
            Err(CurriculumError::InvalidOrder { order: 0 })
        ));
        assert!(matches!(
            manager.move_item(&scope, "a", -3).await,
            Err(CurriculumError::InvalidOrder { order: -3 })
        ));
        assert!(matches!(
            manager.delete(&scope, "ghost").await,
            Err(CurriculumError::NotFound(_))
        ));
        assert!(matches!(
            manager
                .insert(
                    &OrderScope::lessons("nope"),
                    1,
                    OrderedItem { parent_id: "nope".into(), ..lesson("x") }
                )
                .await,
            Err(CurriculumError::NotFound(_))
        ));
        assert!(matches!(
            manager.list(&OrderScope::modules("no-course")).await,
            Err(CurriculumError::NotFound(_))
        ));
        assert!(matches!(
            manager.insert(&scope, 1, lesson("a")).await,
            Err(CurriculumError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_kind_must_match_scope() {
        let (manager, _) = manager();
        let err = manager
            .insert(&OrderScope::assessments("m1"), 1, lesson("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let (manager, _) = manager();
        let lessons = OrderScope::lessons("m1");
        let quizzes = OrderScope::assessments("m1");
        seed(&manager, &lessons, &["a", "b"]).await;

        let quiz = OrderedItem::new(
            "q1",
            "m1",
            ItemBody::Assessment {
                title: "Functions quiz".into(),
                assessment_type: Default::default(),
            },
        );
        let placed = manager.insert(&quizzes, 1, quiz).await.unwrap();

        assert_eq!(placed.order, 1);
        assert_eq!(ids(&manager, &lessons).await, pairs(&[("a", 1), ("b", 2)]));
    }

    #[tokio::test]
    async fn test_neighbors() {
        let (manager, _) = manager();
        let scope = OrderScope::lessons("m1");
        seed(&manager, &scope, &["a", "b", "c"]).await;

        let middle = manager.neighbors(&scope, "b").await.unwrap();
        assert_eq!(middle.previous.unwrap().id, "a");
        assert_eq!(middle.next.unwrap().id, "c");

        let first = manager.neighbors(&scope, "a").await.unwrap();
        assert!(first.previous.is_none());
    }

    #[tokio::test]
    async fn test_density_holds_over_mixed_operations() {
        let (manager, store) = manager();
        let scope = OrderScope::lessons("m1");
        let mut seed_value: u64 = 42;
        let mut next = move || {
            // small LCG, deterministic across runs
            seed_value = seed_value.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed_value >> 33) as i64
        };

        for step in 0..200 {
            let count = store.snapshot(&scope).await.unwrap().count() as i64;
            match next() % 3 {
                0 => {
                    let order = next() % (count + 3) + 1;
                    manager.insert(&scope, order, lesson(&format!("l{}", step))).await.unwrap();
                }
                1 if count > 0 => {
                    let items = store.snapshot(&scope).await.unwrap().items;
                    let victim = &items[(next() % count) as usize];
                    manager.move_item(&scope, &victim.id, next() % (count + 2) + 1).await.unwrap();
                }
                2 if count > 0 => {
                    let items = store.snapshot(&scope).await.unwrap().items;
                    let victim = &items[(next() % count) as usize];
                    manager.delete(&scope, &victim.id).await.unwrap();
                }
                _ => {}
            }
            let snapshot = store.snapshot(&scope).await.unwrap();
            assert!(check_density(&snapshot.items).is_ok(), "step {}", step);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_into_one_scope_stay_dense() {
        let (manager, store) = manager();
        let manager = Arc::new(manager);
        let scope = OrderScope::lessons("m1");

        let mut handles = Vec::new();
        for i in 0..32 {
            let manager = manager.clone();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                manager.insert(&scope, (i % 4) + 1, lesson(&format!("l{}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.snapshot(&scope).await.unwrap();
        assert_eq!(snapshot.count(), 32);
        assert!(manager.locks.is_empty());
        assert!(check_density(&snapshot.items).is_ok());
    }

    /// Store that drops every shift, so writes leave duplicates behind
    struct ShiftlessStore(MemoryOrderStore);

    #[async_trait]
    impl OrderKeyStore for ShiftlessStore {
        async fn snapshot(&self, scope: &OrderScope) -> Result<ScopeSnapshot> {
            self.0.snapshot(scope).await
        }

        async fn commit(&self, scope: &OrderScope, mut mutation: OrderMutation) -> Result<u64> {
            mutation.shift = None;
            self.0.commit(scope, mutation).await
        }
    }

    #[tokio::test]
    async fn test_lost_shift_is_reported_as_inconsistent() {
        let manager = OrderedCollectionManager::new(
            Arc::new(ShiftlessStore(MemoryOrderStore::new())),
            catalog(),
        );
        let scope = OrderScope::lessons("m1");
        manager.insert(&scope, 1, lesson("a")).await.unwrap();

        let err = manager.insert(&scope, 1, lesson("b")).await.unwrap_err();
        assert!(matches!(err, CurriculumError::InconsistentState { .. }));
    }
}
