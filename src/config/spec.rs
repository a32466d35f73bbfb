//! Configuration specification types.
//!
//! These structs map to `kindsync.yaml`. Every section except `project` and
//! `platform` may be omitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::kinds::UpdateMode;
use crate::planner::{ExecutorOptions, RetryPolicy};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Per-environment overrides, selected with `--env`.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    /// Platform connection settings.
    pub platform: PlatformConfig,
    /// Checkpoint backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Directory holding one subdirectory of descriptor files per module.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Platform project name.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Overrides applied when an environment is selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Project name in this environment.
    #[serde(default)]
    pub project: Option<String>,
    /// Platform URL in this environment.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Base URL of the platform API.
    pub base_url: String,
    /// Timeout of regular requests, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout of preview queries, in seconds.
    #[serde(default = "default_preview_timeout_secs")]
    pub preview_timeout_secs: u64,
    /// Items per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Checkpoint backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local checkpoint directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based storage.
    #[default]
    Local,
    /// AWS S3-based storage.
    S3,
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum items per remote call.
    pub batch_size: usize,
    /// Attempts per remote call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of any retry delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Kinds processed concurrently within a level.
    pub workers: usize,
    /// How updates are sent.
    pub update_mode: UpdateMode,
    /// Delete and recreate instances of kinds that cannot be updated.
    pub allow_recreate: bool,
    /// Wall-clock budget of a run, in seconds.
    pub time_budget_secs: Option<u64>,
    /// Reserve kept at the end of the budget, in seconds.
    pub safety_margin_secs: u64,
    /// Lifetime of a claim, in seconds.
    pub claim_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            workers: 4,
            update_mode: UpdateMode::Patch,
            allow_recreate: false,
            time_budget_secs: None,
            safety_margin_secs: 30,
            claim_ttl_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Builds the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    /// Builds the executor options. The deadline is set by the orchestrator.
    #[must_use]
    pub const fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            batch_size: self.batch_size,
            allow_recreate: self.allow_recreate,
            retry: self.retry_policy(),
            deadline: None,
        }
    }

    /// Returns the time budget, if any.
    #[must_use]
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

impl SyncConfig {
    /// Applies the overrides of environment `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] if `name`
    /// is not declared.
    pub fn select_environment(&mut self, name: &str) -> Result<(), ConfigError> {
        let Some(env) = self.environments.get(name).cloned() else {
            return Err(ConfigError::UnknownEnvironment {
                name: name.to_string(),
            });
        };
        self.project.environment = name.to_string();
        if let Some(project) = env.project {
            self.project.name = project;
        }
        if let Some(base_url) = env.base_url {
            self.platform.base_url = base_url;
        }
        Ok(())
    }
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_modules_dir() -> String {
    String::from("modules")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_preview_timeout_secs() -> u64 {
    300
}

const fn default_page_size() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        serde_yaml::from_str(
            r"
project:
  name: analytics
platform:
  base_url: https://api.example.com
environments:
  prod:
    project: analytics-prod
",
        )
        .expect("parse")
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.platform.timeout_secs, 30);
        assert_eq!(config.platform.page_size, 1000);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.modules_dir, "modules");
    }

    #[test]
    fn test_select_environment() {
        let mut config = config();
        config.select_environment("prod").expect("prod");
        assert_eq!(config.project.name, "analytics-prod");
        assert_eq!(config.project.environment, "prod");
        assert_eq!(config.platform.base_url, "https://api.example.com");
        assert!(config.select_environment("qa").is_err());
    }

    #[test]
    fn test_engine_policies() {
        let engine = EngineConfig {
            base_delay_ms: 100,
            time_budget_secs: Some(60),
            ..EngineConfig::default()
        };
        let retry = engine.retry_policy();
        assert_eq!(retry.base_delay, Duration::from_millis(100));
        assert_eq!(engine.time_budget(), Some(Duration::from_secs(60)));
        assert_eq!(engine.executor_options().batch_size, 1000);
    }
}
