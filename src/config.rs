//! Configuration for lamad-curriculum

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CurriculumError, Result};
use crate::models::DEFAULT_PASSING_GRADE;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// MongoDB connection string
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    /// Passing grade for prerequisites that do not set one (0-100)
    #[serde(default = "default_passing_grade")]
    pub default_passing_grade: f64,

    /// Upper bound for one caller-facing operation, retries included
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Re-read and check invariants after every write
    #[serde(default = "default_true")]
    pub verify_writes: bool,

    /// Backoff for optimistic-concurrency conflicts
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongodb_db() -> String {
    "lamad".to_string()
}

fn default_passing_grade() -> f64 {
    DEFAULT_PASSING_GRADE
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            default_passing_grade: default_passing_grade(),
            operation_timeout_ms: default_operation_timeout_ms(),
            verify_writes: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CurriculumError::Config(format!("failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|e| CurriculumError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CurriculumError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            CurriculumError::Config(format!("failed to write {}: {}", path.as_ref().display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(CurriculumError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(CurriculumError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(0.0..=100.0).contains(&self.default_passing_grade) {
            return Err(CurriculumError::Config(format!(
                "default_passing_grade must be within 0..=100, got {}",
                self.default_passing_grade
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(CurriculumError::Config(
                "operation_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_passing_grade, 40.0);
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            mongodb_db = "lamad_test"

            [retry]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.mongodb_db, "lamad_test");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 25);
        assert!(config.verify_writes);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lamad.toml");

        let mut config = Config::default();
        config.default_passing_grade = 55.0;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.base_delay_ms = 5_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.default_passing_grade = 120.0;
        assert!(config.validate().is_err());
    }
}
