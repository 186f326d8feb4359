//! Ordered children and the scopes that own their ordering

use serde::{Deserialize, Serialize};

use super::content::{ItemBody, ItemKind};

/// A per-parent ordering: all lessons of one module, all modules of one
/// course, and so on. Lessons and assessments of the same module are
/// separate scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderScope {
    pub kind: ItemKind,
    pub parent_id: String,
}

impl OrderScope {
    pub fn new(kind: ItemKind, parent_id: impl Into<String>) -> Self {
        Self {
            kind,
            parent_id: parent_id.into(),
        }
    }

    pub fn lessons(module_id: impl Into<String>) -> Self {
        Self::new(ItemKind::Lesson, module_id)
    }

    pub fn assessments(module_id: impl Into<String>) -> Self {
        Self::new(ItemKind::Assessment, module_id)
    }

    pub fn modules(course_id: impl Into<String>) -> Self {
        Self::new(ItemKind::Module, course_id)
    }

    /// Stable string key, used for lock maps and persisted version documents
    pub fn key(&self) -> String {
        format!("{}:{}/{}", self.kind.parent_label(), self.parent_id, self.kind)
    }
}

impl std::fmt::Display for OrderScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// An item holding a position within its scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedItem {
    pub id: String,
    pub parent_id: String,
    /// 1-based position, dense within the scope
    pub order: u32,
    pub body: ItemBody,
}

impl OrderedItem {
    /// Build an unplaced item; `order` is assigned on insert
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>, body: ItemBody) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            order: 0,
            body,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.body.kind()
    }
}

/// Items of one scope, sorted by order, with the scope version they were read at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeSnapshot {
    pub version: u64,
    pub items: Vec<OrderedItem>,
}

impl ScopeSnapshot {
    /// Number of items, which is also the highest order in a dense scope
    pub fn count(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn position_of(&self, item_id: &str) -> Option<&OrderedItem> {
        self.items.iter().find(|item| item.id == item_id)
    }
}

/// Inclusive range of orders; `to = None` means unbounded above
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRange {
    pub from: u32,
    pub to: Option<u32>,
}

impl OrderRange {
    pub fn contains(&self, order: u32) -> bool {
        order >= self.from && self.to.map_or(true, |to| order <= to)
    }
}

/// Bulk `order += delta` over every item of the scope whose order is in `range`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShift {
    pub range: OrderRange,
    pub delta: i32,
}

impl OrderShift {
    /// Make room at `from`: everything at or after it moves up one
    pub fn open_gap(from: u32) -> Self {
        Self {
            range: OrderRange { from, to: None },
            delta: 1,
        }
    }

    /// Close the hole left at `after`: everything after it moves down one
    pub fn close_gap(after: u32) -> Self {
        Self {
            range: OrderRange {
                from: after + 1,
                to: None,
            },
            delta: -1,
        }
    }

    /// Rotate the interval between `old` and `new` so that `old` can move to `new`
    pub fn rotate(old: u32, new: u32) -> Self {
        if new > old {
            Self {
                range: OrderRange {
                    from: old + 1,
                    to: Some(new),
                },
                delta: -1,
            }
        } else {
            Self {
                range: OrderRange {
                    from: new,
                    to: Some(old - 1),
                },
                delta: 1,
            }
        }
    }

    pub fn apply_to(&self, order: u32) -> u32 {
        if self.range.contains(order) {
            (order as i64 + self.delta as i64) as u32
        } else {
            order
        }
    }
}

/// The primary write that accompanies a shift
#[derive(Debug, Clone, PartialEq)]
pub enum OrderWrite {
    Insert(OrderedItem),
    Reposition { item_id: String, order: u32 },
    Remove { item_id: String },
}

/// One atomic unit for an [`crate::store::OrderKeyStore`]: the optional bulk
/// shift and the primary write land together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderMutation {
    /// Scope version the mutation was planned against
    pub expected_version: u64,
    pub shift: Option<OrderShift>,
    pub write: OrderWrite,
}

/// Check the density invariant: orders are exactly 1..=N, no duplicates
pub fn check_density(items: &[OrderedItem]) -> Result<(), String> {
    let mut orders: Vec<u32> = items.iter().map(|item| item.order).collect();
    orders.sort_unstable();
    for (index, order) in orders.iter().enumerate() {
        let expected = index as u32 + 1;
        if *order != expected {
            return Err(format!(
                "expected order {} at position {}, found {} (orders: {:?})",
                expected, index, order, orders
            ));
        }
    }
    Ok(())
}
