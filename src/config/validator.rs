//! Configuration validation.
//!
//! Structural checks of `kindsync.yaml` run before anything is loaded or
//! contacted. Descriptor content is not validated here.

use tracing::debug;

use super::spec::{
    EngineConfig, PlatformConfig, ProjectConfig, StateBackend, StateConfig, SyncConfig,
};
use crate::error::{ConfigError, Result};

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }
}

/// Validator for `kindsync.yaml`.
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &SyncConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_platform(&config.platform, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_engine(&config.engine, &mut result);

        if config.modules_dir.trim().is_empty() {
            result.error("modules_dir", "Modules directory cannot be empty");
        }

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first) => {
                Err(ConfigError::validation(first.message.clone(), first.field.clone()).into())
            }
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_platform(platform: &PlatformConfig, result: &mut ValidationResult) {
        let url = &platform.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            result.error(
                "platform.base_url",
                format!("Platform URL '{}' must start with http:// or https://", platform.base_url),
            );
        } else if platform.base_url.starts_with("http://") {
            result.warnings.push(String::from(
                "platform.base_url uses plain HTTP; the token is sent unencrypted",
            ));
        }
        if platform.timeout_secs == 0 {
            result.error("platform.timeout_secs", "Timeout must be positive");
        }
        if platform.page_size == 0 {
            result.error("platform.page_size", "Page size must be positive");
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    fn validate_engine(engine: &EngineConfig, result: &mut ValidationResult) {
        if engine.batch_size == 0 {
            result.error("engine.batch_size", "Batch size must be positive");
        }
        if engine.workers == 0 {
            result.error("engine.workers", "At least one worker is required");
        }
        if engine.max_attempts == 0 {
            result.error("engine.max_attempts", "At least one attempt is required");
        }
        if engine.base_delay_ms > engine.max_delay_ms {
            result.error("engine.base_delay_ms", "Base delay cannot exceed max delay");
        }
        if let Some(budget) = engine.time_budget_secs
            && budget <= engine.safety_margin_secs
        {
            result.warnings.push(format!(
                "engine.time_budget_secs ({budget}) does not exceed the safety margin; \
                 runs will suspend immediately"
            ));
        }
    }
}

/// Checks that a name is lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn config(extra: &str) -> SyncConfig {
        let yaml = format!(
            "project:\n  name: analytics\nplatform:\n  base_url: https://api.example.com\n{extra}"
        );
        ConfigParser::new().parse_yaml(&yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&config("")).expect("valid");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let err = ConfigValidator::new()
            .validate(&config("state:\n  backend: s3\n"))
            .expect_err("bucket");
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn test_zero_batch_size() {
        let err = ConfigValidator::new()
            .validate(&config("engine:\n  batch_size: 0\n"))
            .expect_err("batch");
        assert!(matches!(
            err,
            crate::error::SyncError::Config(ConfigError::ValidationError {
                field: Some(ref f),
                ..
            }) if f == "engine.batch_size"
        ));
    }

    #[test]
    fn test_invalid_project_name() {
        let mut bad = config("");
        bad.project.name = String::from("Analytics");
        assert!(ConfigValidator::new().validate(&bad).is_err());
    }

    #[test]
    fn test_short_budget_warns() {
        let result = ConfigValidator::new()
            .validate(&config("engine:\n  time_budget_secs: 10\n"))
            .expect("valid");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("analytics-prod-2"));
        assert!(!is_valid_name("2analytics"));
        assert!(!is_valid_name("ana_lytics"));
        assert!(!is_valid_name(""));
    }
}
