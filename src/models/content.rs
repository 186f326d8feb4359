//! Typed authoring payloads carried by ordered items
//!
//! Lesson content is a list of tagged blocks rather than free-form maps,
//! so nothing downstream has to inspect untyped JSON to know what it holds.
//! Block order is the position in the list.

use serde::{Deserialize, Serialize};

/// What kind of child an ordered item is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Module ordered within a course
    Module,
    /// Lesson ordered within a module
    Lesson,
    /// Assessment ordered within a module
    Assessment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Module => "module",
            ItemKind::Lesson => "lesson",
            ItemKind::Assessment => "assessment",
        }
    }

    /// Kind of entity that owns this ordering
    pub fn parent_label(&self) -> &'static str {
        match self {
            ItemKind::Module => "course",
            ItemKind::Lesson | ItemKind::Assessment => "module",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(ItemKind::Module),
            "lesson" => Ok(ItemKind::Lesson),
            "assessment" => Ok(ItemKind::Assessment),
            other => Err(format!("unknown item kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentType {
    Coding,
    #[default]
    Quiz,
    Project,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseTestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// One block of lesson content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Code {
        language: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    Exercise {
        instructions: String,
        initial_code: String,
        language: String,
        test_cases: Vec<ExerciseTestCase>,
        #[serde(default)]
        hints: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        solution: Option<String>,
    },
    Image {
        url: String,
        alt_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Authoring payload of an ordered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemBody {
    Module {
        title: String,
        #[serde(default)]
        difficulty: Difficulty,
    },
    Lesson {
        title: String,
        #[serde(default)]
        blocks: Vec<ContentBlock>,
    },
    Assessment {
        title: String,
        #[serde(default)]
        assessment_type: AssessmentType,
    },
}

impl ItemBody {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemBody::Module { .. } => ItemKind::Module,
            ItemBody::Lesson { .. } => ItemKind::Lesson,
            ItemBody::Assessment { .. } => ItemKind::Assessment,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ItemBody::Module { title, .. }
            | ItemBody::Lesson { title, .. }
            | ItemBody::Assessment { title, .. } => title,
        }
    }
}
