//! Prerequisite gate evaluation
//!
//! A module unlocks once the student's grade on every prerequisite module's
//! assessment reaches its passing grade. Grade lookups run concurrently but
//! results are scanned in listed order, so the reported failure is always
//! the first one listed.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use crate::catalog::ContentCatalog;
use crate::error::Result;
use crate::models::{GradeRecord, Prerequisite, PrerequisiteEdge, DEFAULT_PASSING_GRADE};
use crate::store::GradeStore;

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub module_id: String,
    pub has_access: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_grade: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_grade: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_module: Option<String>,
    /// Points still missing on the blocking assessment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_gap: Option<f64>,
}

impl AccessDecision {
    fn granted(module_id: &str, reason: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            has_access: true,
            reason: reason.to_string(),
            required_grade: None,
            current_grade: None,
            blocking_module: None,
            grade_gap: None,
        }
    }

    fn blocked(module_id: &str, edge: &PrerequisiteEdge, current: f64) -> Self {
        Self {
            module_id: module_id.to_string(),
            has_access: false,
            reason: format!(
                "requires a grade of at least {} on {} (module {}), current grade is {}",
                edge.passing_grade, edge.required_assessment_key, edge.module_id, current
            ),
            required_grade: Some(edge.passing_grade),
            current_grade: Some(current),
            blocking_module: Some(edge.module_id.clone()),
            grade_gap: Some((edge.passing_grade - current).max(0.0)),
        }
    }
}

pub struct AccessGateEvaluator {
    catalog: Arc<dyn ContentCatalog>,
    grades: Arc<dyn GradeStore>,
    default_passing_grade: f64,
}

impl AccessGateEvaluator {
    pub fn new(catalog: Arc<dyn ContentCatalog>, grades: Arc<dyn GradeStore>) -> Self {
        Self {
            catalog,
            grades,
            default_passing_grade: DEFAULT_PASSING_GRADE,
        }
    }

    /// Threshold for prerequisites that do not name one
    pub fn with_default_passing_grade(mut self, grade: f64) -> Self {
        self.default_passing_grade = grade;
        self
    }

    /// Decide whether `student_id` may open `module_id`
    pub async fn check_access(&self, student_id: &str, module_id: &str) -> Result<AccessDecision> {
        let prerequisites = self.catalog.get_module_prerequisites(module_id).await?;
        if prerequisites.is_empty() {
            debug!(student_id, module_id, "No prerequisites, access granted");
            return Ok(AccessDecision::granted(module_id, "no prerequisites"));
        }

        let lookups = join_all(
            prerequisites
                .iter()
                .map(|prerequisite| self.lookup(student_id, prerequisite)),
        )
        .await;

        for lookup in lookups {
            let (edge, record) = lookup?;
            // No grade recorded means the assessment was never passed
            let current = record.map(|r| r.grade).unwrap_or(0.0);
            if current.is_nan() || current < edge.passing_grade {
                debug!(
                    student_id,
                    module_id,
                    blocking_module = %edge.module_id,
                    required = edge.passing_grade,
                    current,
                    "Access denied"
                );
                return Ok(AccessDecision::blocked(module_id, &edge, current));
            }
        }

        debug!(student_id, module_id, "All prerequisites met, access granted");
        Ok(AccessDecision::granted(module_id, "all prerequisites met"))
    }

    /// Access decisions for every module of a course, in course order
    pub async fn check_course_access(&self, student_id: &str, course_id: &str) -> Result<Vec<AccessDecision>> {
        let modules = self.catalog.get_course_modules(course_id).await?;
        join_all(modules.iter().map(|module_id| self.check_access(student_id, module_id)))
            .await
            .into_iter()
            .collect()
    }

    async fn lookup(
        &self,
        student_id: &str,
        prerequisite: &Prerequisite,
    ) -> Result<(PrerequisiteEdge, Option<GradeRecord>)> {
        let key = self
            .catalog
            .get_assessment_key_for_module(&prerequisite.module_id)
            .await?;
        let record = self.grades.find_grade(student_id, &key).await?;

        Ok((
            PrerequisiteEdge {
                module_id: prerequisite.module_id.clone(),
                required_assessment_key: key,
                passing_grade: prerequisite.passing_grade.unwrap_or(self.default_passing_grade),
            },
            record,
        ))
    }
}
