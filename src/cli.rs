//! Command-line arguments for the `lamad-curriculum` binary
//!
//! Values given on the command line (or through the environment) override
//! the TOML config file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CurriculumError, Result};
use crate::models::{ContentType, ContentUpdate, ItemBody, ItemKind, OrderedItem};

/// Lamad curriculum - ordering, progress and access gates for courses
#[derive(Parser, Debug, Clone)]
#[command(name = "lamad-curriculum")]
#[command(about = "Ordering, progress and prerequisite gates for Lamad courses")]
pub struct Args {
    /// TOML config file
    #[arg(long, env = "LAMAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Course catalog (TOML)
    #[arg(long, env = "LAMAD_CATALOG", default_value = "catalog.toml")]
    pub catalog: PathBuf,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB")]
    pub mongodb_db: Option<String>,

    /// Passing grade for prerequisites that do not set one
    #[arg(long, env = "DEFAULT_PASSING_GRADE")]
    pub passing_grade: Option<f64>,

    /// Per-operation timeout in milliseconds
    #[arg(long, env = "OPERATION_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Insert a module, lesson or assessment at a position
    Insert {
        /// module, lesson or assessment
        kind: ItemKind,
        /// Owning course (modules) or module (lessons, assessments)
        parent: String,
        /// 1-based position; past the end appends
        order: i64,
        #[arg(long)]
        title: String,
        /// Item id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// JSON file holding the full item body
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
    /// Move an item to a new position
    Move {
        kind: ItemKind,
        parent: String,
        item_id: String,
        order: i64,
    },
    /// Delete an item and close the gap
    Delete {
        kind: ItemKind,
        parent: String,
        item_id: String,
    },
    /// List a scope in order
    List { kind: ItemKind, parent: String },
    /// Record time spent on, or completion of, a content item
    Progress {
        user: String,
        course: String,
        module: String,
        content: String,
        #[arg(long, default_value = "lesson")]
        content_type: ContentType,
        /// Seconds to add to the running total
        #[arg(long, default_value = "0")]
        time: u64,
        #[arg(long)]
        completed: bool,
        /// Resume point as JSON
        #[arg(long)]
        position: Option<String>,
    },
    /// Show one course's progress, or every course of a user
    ShowProgress { user: String, course: Option<String> },
    /// Check whether a student may open a module (or every module of a course)
    Access {
        student: String,
        target: String,
        /// Treat TARGET as a course id
        #[arg(long)]
        course: bool,
    },
}

impl Args {
    /// Layer command-line overrides on top of `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(uri) = &self.mongodb_uri {
            config.mongodb_uri = uri.clone();
        }
        if let Some(db) = &self.mongodb_db {
            config.mongodb_db = db.clone();
        }
        if let Some(grade) = self.passing_grade {
            config.default_passing_grade = grade;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.operation_timeout_ms = timeout_ms;
        }
    }

    /// Config file (if any) with overrides applied, validated
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Item to insert, from a body file or from kind + title
pub fn build_item(
    kind: ItemKind,
    parent: &str,
    title: &str,
    id: Option<&str>,
    body_json: Option<&str>,
) -> Result<OrderedItem> {
    let body = match body_json {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| CurriculumError::InvalidInput(format!("invalid item body: {}", e)))?,
        None => match kind {
            ItemKind::Module => ItemBody::Module {
                title: title.to_string(),
                difficulty: Default::default(),
            },
            ItemKind::Lesson => ItemBody::Lesson {
                title: title.to_string(),
                blocks: Vec::new(),
            },
            ItemKind::Assessment => ItemBody::Assessment {
                title: title.to_string(),
                assessment_type: Default::default(),
            },
        },
    };

    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok(OrderedItem::new(id, parent, body))
}

#[allow(clippy::too_many_arguments)]
pub fn content_update(
    user: &str,
    course: &str,
    module: &str,
    content: &str,
    content_type: ContentType,
    time: u64,
    completed: bool,
    position: Option<&str>,
) -> Result<ContentUpdate> {
    let last_position = position
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| CurriculumError::InvalidInput(format!("invalid position: {}", e)))?;

    Ok(ContentUpdate {
        user_id: user.to_string(),
        course_id: course.to_string(),
        module_id: module.to_string(),
        content_id: content.to_string(),
        content_type,
        time_spent_delta: time,
        last_position,
        completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insert() {
        let args = Args::try_parse_from([
            "lamad-curriculum",
            "--catalog",
            "python.toml",
            "insert",
            "lesson",
            "python-module1",
            "2",
            "--title",
            "Variables",
        ])
        .unwrap();

        match args.command {
            Command::Insert { kind, parent, order, title, id, .. } => {
                assert_eq!(kind, ItemKind::Lesson);
                assert_eq!(parent, "python-module1");
                assert_eq!(order, 2);
                assert_eq!(title, "Variables");
                assert!(id.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let result = Args::try_parse_from(["lamad-curriculum", "list", "chapter", "c1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from([
            "lamad-curriculum",
            "--mongodb-db",
            "lamad_test",
            "--passing-grade",
            "60",
            "show-progress",
            "u1",
        ])
        .unwrap();

        let config = args.resolve_config().unwrap();
        assert_eq!(config.mongodb_db, "lamad_test");
        assert_eq!(config.default_passing_grade, 60.0);
    }

    #[test]
    fn test_build_item_from_kind() {
        let item = build_item(ItemKind::Assessment, "m1", "Quiz", Some("q1"), None).unwrap();
        assert_eq!(item.id, "q1");
        assert_eq!(item.kind(), ItemKind::Assessment);
        assert_eq!(item.body.title(), "Quiz");

        let generated = build_item(ItemKind::Module, "c1", "Basics", None, None).unwrap();
        assert!(Uuid::parse_str(&generated.id).is_ok());
    }

    #[test]
    fn test_build_item_from_body_json() {
        let json = r#"{"kind":"lesson","title":"Loops","blocks":[{"type":"text","text":"for x in xs"}]}"#;
        let item = build_item(ItemKind::Lesson, "m1", "ignored", Some("l1"), Some(json)).unwrap();
        assert_eq!(item.body.title(), "Loops");

        assert!(matches!(
            build_item(ItemKind::Lesson, "m1", "x", None, Some("{")),
            Err(CurriculumError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_content_update_parses_position() {
        let update = content_update(
            "u1",
            "c1",
            "m1",
            "l1",
            ContentType::Lesson,
            30,
            false,
            Some(r#"{"block":2}"#),
        )
        .unwrap();
        assert_eq!(update.last_position, Some(serde_json::json!({ "block": 2 })));
        assert!(content_update("u1", "c1", "m1", "l1", ContentType::Lesson, 0, false, Some("nope")).is_err());
    }
}
