//! Error types for lamad-curriculum

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurriculumError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid order {order}: orders start at 1")]
    InvalidOrder { order: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Optimistic version check failed. Always safe to retry.
    #[error("Concurrent write conflict on {scope}: expected version {expected}, found {actual}")]
    Conflict {
        scope: String,
        expected: u64,
        actual: u64,
    },

    #[error("Content catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A post-write invariant check failed. This is a defect, never retried.
    #[error("Inconsistent state in {scope}: {detail}")]
    InconsistentState { scope: String, detail: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CurriculumError {
    /// Whether a caller may retry the failed operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, CurriculumError::Conflict { .. })
    }

    pub fn conflict(scope: impl ToString, expected: u64, actual: u64) -> Self {
        CurriculumError::Conflict {
            scope: scope.to_string(),
            expected,
            actual,
        }
    }

    pub fn inconsistent(scope: impl ToString, detail: impl Into<String>) -> Self {
        CurriculumError::InconsistentState {
            scope: scope.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<mongodb::error::Error> for CurriculumError {
    fn from(e: mongodb::error::Error) -> Self {
        CurriculumError::Storage(e.to_string())
    }
}

impl From<bson::ser::Error> for CurriculumError {
    fn from(e: bson::ser::Error) -> Self {
        CurriculumError::Storage(format!("BSON encode failed: {}", e))
    }
}

impl From<bson::de::Error> for CurriculumError {
    fn from(e: bson::de::Error) -> Self {
        CurriculumError::Storage(format!("BSON decode failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, CurriculumError>;
