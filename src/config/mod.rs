//! Configuration module for kindsync.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `kindsync.yaml`
//! - Validation of configuration values
//! - Loading local descriptors from the modules directory
//! - Hashing descriptor sets into resumable run keys

mod hash;
mod loader;
mod parser;
mod spec;
mod validator;

pub use hash::DescriptorHasher;
pub use loader::DescriptorLoader;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, TOKEN_ENV};
pub use spec::{
    EngineConfig, EnvironmentConfig, PlatformConfig, ProjectConfig, StateBackend, StateConfig,
    SyncConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
