//! Lamad curriculum core
//!
//! Backend logic for course authoring and learner progress:
//!
//! - [`ordering`]: dense `1..=N` ordering of modules, lessons and assessments
//!   under their parent, with atomic bulk shifts
//! - [`progress`]: content → module → course progress with synchronous rollup
//!   and optimistic concurrency per (user, course)
//! - [`access`]: prerequisite gates driven by recorded assessment grades
//!
//! Storage and the course catalog are collaborators behind traits
//! ([`store`], [`catalog`]); [`services::CurriculumService`] wires them
//! together for callers.

pub mod access;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod ordering;
pub mod progress;
pub mod retry;
pub mod services;
pub mod store;

pub use access::{AccessDecision, AccessGateEvaluator};
pub use catalog::{ContentCatalog, ContentRef, StaticCatalog};
pub use config::Config;
pub use error::{CurriculumError, Result};
pub use ordering::{MovedItem, Neighbors, OrderedCollectionManager};
pub use progress::ProgressAggregator;
pub use retry::RetryPolicy;
pub use services::{Collaborators, CurriculumEvent, CurriculumService, EventBus};
