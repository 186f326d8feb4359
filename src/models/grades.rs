//! Grade records and prerequisite edges

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Passing threshold used when a prerequisite edge names none (0-100 scale)
pub const DEFAULT_PASSING_GRADE: f64 = 40.0;

/// A student's recorded grade for one assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    /// Student identifier (the grade book keys on email)
    pub subject_key: String,
    pub assessment_key: String,
    pub grade: f64,
    pub date_assigned: NaiveDate,
}

impl GradeRecord {
    pub fn new(
        subject_key: impl Into<String>,
        assessment_key: impl Into<String>,
        grade: f64,
        date_assigned: NaiveDate,
    ) -> Self {
        Self {
            subject_key: subject_key.into().trim().to_string(),
            assessment_key: assessment_key.into().trim().to_string(),
            grade,
            date_assigned,
        }
    }
}

/// Prerequisite as listed by the catalog for a gated module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_grade: Option<f64>,
}

impl Prerequisite {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            passing_grade: None,
        }
    }

    pub fn with_passing_grade(mut self, grade: f64) -> Self {
        self.passing_grade = Some(grade);
        self
    }
}

/// One resolved prerequisite of a gated module. `module_id` is the
/// prerequisite itself; the gated module stays locked until
/// `required_assessment_key`, the assessment closing `module_id`, is graded
/// at or above `passing_grade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    pub module_id: String,
    pub required_assessment_key: String,
    pub passing_grade: f64,
}
