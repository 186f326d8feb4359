//! Read-only content catalog
//!
//! The catalog owns the course → module → content hierarchy and the
//! prerequisite edges between modules. This crate only reads it.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CurriculumError, Result};
use crate::models::{ContentType, Prerequisite};

/// A content item enumerated under a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_id: String,
    pub content_type: ContentType,
}

impl ContentRef {
    pub fn lesson(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: ContentType::Lesson,
        }
    }

    pub fn assessment(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: ContentType::Assessment,
        }
    }
}

/// Lookup contract for the course hierarchy.
///
/// Unknown ids are `NotFound`; backend failures must surface as
/// `CatalogUnavailable`, never as an empty answer.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Prerequisite modules of `module_id`, in listed order
    async fn get_module_prerequisites(&self, module_id: &str) -> Result<Vec<Prerequisite>>;

    /// Grade-book key of the assessment that closes `module_id`
    async fn get_assessment_key_for_module(&self, module_id: &str) -> Result<String>;

    async fn get_module_course(&self, module_id: &str) -> Result<String>;

    /// Every content item the module is made of
    async fn get_module_contents(&self, module_id: &str) -> Result<Vec<ContentRef>>;

    /// Every module of the course, in course order
    async fn get_course_modules(&self, course_id: &str) -> Result<Vec<String>>;

    async fn has_course(&self, course_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseEntry {
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_key: Option<String>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub contents: Vec<ContentRef>,
}

/// Catalog held in memory, loadable from a TOML file.
///
/// ```toml
/// [courses.python]
/// modules = ["python-module1", "python-module2"]
///
/// [modules.python-module2]
/// course_id = "python"
/// prerequisites = [{ module_id = "python-module1" }]
/// contents = [{ content_id = "l1", content_type = "lesson" }]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub courses: BTreeMap<String, CourseEntry>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CurriculumError::CatalogUnavailable(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| CurriculumError::CatalogUnavailable(format!("invalid catalog: {}", e)))
    }

    pub fn with_course(mut self, course_id: impl Into<String>) -> Self {
        self.courses.entry(course_id.into()).or_default();
        self
    }

    /// Register a module at the end of its course's module list
    pub fn with_module(mut self, module_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        let module_id = module_id.into();
        let course_id = course_id.into();
        let course = self.courses.entry(course_id.clone()).or_default();
        if !course.modules.contains(&module_id) {
            course.modules.push(module_id.clone());
        }
        self.modules.entry(module_id).or_insert(ModuleEntry {
            course_id,
            assessment_key: None,
            prerequisites: Vec::new(),
            contents: Vec::new(),
        });
        self
    }

    pub fn with_content(mut self, module_id: &str, content: ContentRef) -> Self {
        if let Some(module) = self.modules.get_mut(module_id) {
            module.contents.push(content);
        }
        self
    }

    pub fn with_prerequisite(mut self, module_id: &str, prerequisite: Prerequisite) -> Self {
        if let Some(module) = self.modules.get_mut(module_id) {
            module.prerequisites.push(prerequisite);
        }
        self
    }

    pub fn with_assessment_key(mut self, module_id: &str, key: impl Into<String>) -> Self {
        if let Some(module) = self.modules.get_mut(module_id) {
            module.assessment_key = Some(key.into());
        }
        self
    }

    fn module(&self, module_id: &str) -> Result<&ModuleEntry> {
        self.modules
            .get(module_id)
            .ok_or_else(|| CurriculumError::NotFound(format!("module {}", module_id)))
    }
}

#[async_trait]
impl ContentCatalog for StaticCatalog {
    async fn get_module_prerequisites(&self, module_id: &str) -> Result<Vec<Prerequisite>> {
        Ok(self.module(module_id)?.prerequisites.clone())
    }

    async fn get_assessment_key_for_module(&self, module_id: &str) -> Result<String> {
        // Modules without an explicit key follow the grade book's naming
        Ok(self
            .module(module_id)?
            .assessment_key
            .clone()
            .unwrap_or_else(|| format!("{}-assessment", module_id)))
    }

    async fn get_module_course(&self, module_id: &str) -> Result<String> {
        Ok(self.module(module_id)?.course_id.clone())
    }

    async fn get_module_contents(&self, module_id: &str) -> Result<Vec<ContentRef>> {
        Ok(self.module(module_id)?.contents.clone())
    }

    async fn get_course_modules(&self, course_id: &str) -> Result<Vec<String>> {
        self.courses
            .get(course_id)
            .map(|course| course.modules.clone())
            .ok_or_else(|| CurriculumError::NotFound(format!("course {}", course_id)))
    }

    async fn has_course(&self, course_id: &str) -> Result<bool> {
        Ok(self.courses.contains_key(course_id))
    }
}
