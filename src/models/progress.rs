//! Student progress documents
//!
//! One [`CourseProgress`] per (user, course). Module and content entries are
//! created lazily as updates arrive and are never removed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProgressStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Lesson,
    Assessment,
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lesson" => Ok(ContentType::Lesson),
            "assessment" => Ok(ContentType::Assessment),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgress {
    pub content_type: ContentType,
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent_seconds: u64,
    /// Content-specific resume point, opaque to this crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_position: Option<serde_json::Value>,
}

impl ContentProgress {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            status: ProgressStatus::NotStarted,
            started_at: None,
            completed_at: None,
            time_spent_seconds: 0,
            last_position: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub module_id: String,
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// content_id -> progress
    #[serde(default)]
    pub content_progress: BTreeMap<String, ContentProgress>,
}

impl ModuleProgress {
    pub fn new(module_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            module_id: module_id.into(),
            status: ProgressStatus::NotStarted,
            started_at: Some(now),
            completed_at: None,
            content_progress: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub user_id: String,
    pub course_id: String,
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// module_id -> progress
    #[serde(default)]
    pub module_progress: BTreeMap<String, ModuleProgress>,
    pub last_accessed_at: DateTime<Utc>,
}

impl CourseProgress {
    pub fn new(user_id: impl Into<String>, course_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            course_id: course_id.into(),
            status: ProgressStatus::NotStarted,
            started_at: Some(now),
            completed_at: None,
            module_progress: BTreeMap::new(),
            last_accessed_at: now,
        }
    }

    /// Identity of this document
    pub fn id(&self) -> ProgressId {
        ProgressId::new(&self.user_id, &self.course_id)
    }
}

/// Identity of a progress document: the (user, course) pair itself, never a
/// joined string, so ids containing separators cannot collide
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressId {
    pub user_id: String,
    pub course_id: String,
}

impl ProgressId {
    pub fn new(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }
}

impl std::fmt::Display for ProgressId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user {:?} course {:?}", self.user_id, self.course_id)
    }
}

/// A stored document together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// One content-level progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub user_id: String,
    pub course_id: String,
    pub module_id: String,
    pub content_id: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub time_spent_delta: u64,
    #[serde(default)]
    pub last_position: Option<serde_json::Value>,
    #[serde(default)]
    pub completed: bool,
}
