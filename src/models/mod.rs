//! Data types shared by the ordering, progress and access components
//!
//! Persisted shapes belong to the storage adapters; these are the in-memory
//! forms they map to and from.

pub mod content;
pub mod grades;
pub mod ordered;
pub mod progress;

pub use content::{AssessmentType, ContentBlock, Difficulty, ExerciseTestCase, ItemBody, ItemKind};
pub use grades::{GradeRecord, Prerequisite, PrerequisiteEdge, DEFAULT_PASSING_GRADE};
pub use ordered::{
    check_density, OrderMutation, OrderRange, OrderScope, OrderShift, OrderWrite, OrderedItem,
    ScopeSnapshot,
};
pub use progress::{
    ContentProgress, ContentType, ContentUpdate, CourseProgress, ModuleProgress, ProgressId,
    ProgressStatus, Versioned,
};
