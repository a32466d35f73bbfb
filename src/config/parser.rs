//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::SyncConfig;
use crate::error::{ConfigError, Result};

/// Environment variable holding the platform bearer token.
pub const TOKEN_ENV: &str = "KINDSYNC_TOKEN";

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<SyncConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<SyncConfig> {
        let config: SyncConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!("Parsed configuration for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads configuration, applies the overrides of `environment` if given,
    /// then environment variable overrides.
    ///
    /// Recognized variables: `KINDSYNC_PROJECT_NAME`,
    /// `KINDSYNC_PLATFORM_URL` and `KINDSYNC_STATE_BUCKET`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// `environment` is not declared.
    pub fn load_with_env(
        &self,
        path: impl AsRef<Path>,
        environment: Option<&str>,
    ) -> Result<SyncConfig> {
        let mut config = self.load_file(path)?;
        if let Some(name) = environment {
            config.select_environment(name)?;
        }
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    fn apply_env_overrides(config: &mut SyncConfig, var: impl Fn(&str) -> Option<String>) {
        if let Some(name) = var("KINDSYNC_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(url) = var("KINDSYNC_PLATFORM_URL") {
            debug!("Overriding platform.base_url from environment");
            config.platform.base_url = url;
        }

        if let Some(bucket) = var("KINDSYNC_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the platform bearer token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_token() -> Result<String> {
        std::env::var(TOKEN_ENV).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: String::from(TOKEN_ENV),
            }
            .into()
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["kindsync.yaml", "kindsync.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::kinds::UpdateMode;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: analytics
platform:
  base_url: https://api.example.com
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.project.name, "analytics");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.engine.workers, 4);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
project:
  name: analytics
  environment: prod
platform:
  base_url: https://api.example.com
  timeout_secs: 10
  page_size: 500
state:
  backend: s3
  bucket: kindsync-state
  prefix: analytics/prod
engine:
  batch_size: 200
  update_mode: replace
  allow_recreate: true
  time_budget_secs: 900
modules_dir: resources
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.engine.batch_size, 200);
        assert_eq!(config.engine.update_mode, UpdateMode::Replace);
        assert!(config.engine.allow_recreate);
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.modules_dir, "resources");
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("kindsync.yaml")))
            .expect_err("invalid");
        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new()
            .parse_yaml("project: {name: a}\nplatform: {base_url: 'http://x'}", None)
            .expect("parse");
        ConfigParser::apply_env_overrides(&mut config, |name| match name {
            "KINDSYNC_PLATFORM_URL" => Some(String::from("http://override")),
            "KINDSYNC_STATE_BUCKET" => Some(String::from("bucket")),
            _ => None,
        });
        assert_eq!(config.project.name, "a");
        assert_eq!(config.platform.base_url, "http://override");
        assert_eq!(config.state.bucket.as_deref(), Some("bucket"));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("kindsync.yml"), "").expect("write");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("kindsync.yml"));
    }
}
