//! Error types for the kindsync reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration and descriptor loading, checkpoint storage, platform API
//! calls, and reconciliation itself.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for kindsync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint and claim storage errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Platform API errors.
    #[error("Platform API error: {0}")]
    Platform(#[from] PlatformError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// Every variant aborts a run before any mutation is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A configuration or descriptor file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Two local descriptors of the same kind share an identifier.
    #[error("Duplicate {kind} identifier '{identifier}' in {first} and {second}")]
    DuplicateIdentifier {
        /// Kind name.
        kind: String,
        /// The duplicated identifier.
        identifier: String,
        /// Source of the first descriptor.
        first: PathBuf,
        /// Source of the second descriptor.
        second: PathBuf,
    },

    /// A kind name that is not registered.
    #[error(
        "Unknown resource kind '{kind}'{}",
        .referenced_by.as_ref().map(|r| format!(" (referenced by '{r}')")).unwrap_or_default()
    )]
    UnknownKind {
        /// The unknown kind name.
        kind: String,
        /// Kind whose dependency named it, if any.
        referenced_by: Option<String>,
    },

    /// The kind dependency graph contains at least one cycle.
    #[error("Circular dependency between kinds: {}", format_cycles(.cycles))]
    DependencyCycle {
        /// Every strongly-connected component that forms a cycle.
        cycles: Vec<Vec<String>>,
    },

    /// A selected module does not exist.
    #[error("Module or kind '{name}' not found")]
    ModuleNotFound {
        /// The missing module name.
        name: String,
    },

    /// The requested environment is not configured.
    #[error("Unknown environment '{name}'")]
    UnknownEnvironment {
        /// The environment name.
        name: String,
    },
}

/// Checkpoint and claim storage errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Stored record is corrupted.
    #[error("Checkpoint record is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Local filesystem backend error.
    #[error("Local checkpoint backend error: {message}")]
    LocalIo {
        /// Description of the IO error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 checkpoint backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("Checkpoint serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// A conditional write found a different version than expected.
    #[error("Version conflict on '{key}': expected {expected:?}, found {found:?}")]
    VersionConflict {
        /// Record key.
        key: String,
        /// Version the writer expected.
        expected: Option<u64>,
        /// Version actually stored.
        found: Option<u64>,
    },

    /// The unit of work is claimed by another holder.
    #[error("'{unit}' is claimed by {holder} until {expires_at}")]
    ClaimHeld {
        /// Claimed unit.
        unit: String,
        /// Current holder.
        holder: String,
        /// Claim expiry (RFC 3339).
        expires_at: String,
    },

    /// A claim write succeeded but re-validation saw another holder.
    #[error("Claim on '{unit}' was lost to a concurrent writer")]
    ClaimLost {
        /// Claimed unit.
        unit: String,
    },
}

/// Platform API errors, classified from transport responses.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// `401`: credentials missing or rejected.
    #[error("Platform authentication failed: {message}")]
    Unauthorized {
        /// Message from the platform.
        message: String,
    },

    /// `403`: credentials lack access.
    #[error("Platform access denied: {message}")]
    Forbidden {
        /// Message from the platform.
        message: String,
    },

    /// `429`: rate limited.
    #[error("Platform API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// `5xx`: server-side failure.
    #[error("Platform server error: {status} - {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Non-429 `4xx`: validation, conflict, and similar.
    #[error("Platform rejected request: {status} - {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Referenced identifiers do not exist.
    #[error("{count} identifier(s) not found: {}", .missing.join(", "))]
    NotFound {
        /// Number of missing identifiers.
        count: usize,
        /// The missing identifiers in wire form.
        missing: Vec<String>,
    },

    /// Network error.
    #[error("Network error communicating with platform: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Request timed out.
    #[error("Platform request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from platform API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Caller lacks capabilities required for the planned actions.
    #[error("Missing capabilities for {kind}: {}", .missing.join(", "))]
    MissingCapabilities {
        /// Kind name.
        kind: String,
        /// Missing capabilities in display form.
        missing: Vec<String>,
    },

    /// The kind does not support in-place updates.
    #[error("{kind} does not support update; enable allow_recreate to delete and recreate")]
    UpdateNotSupported {
        /// Kind name.
        kind: String,
    },

    /// A differing field cannot be changed on an existing instance.
    #[error(
        "{kind} {identifier}: immutable field(s) {} differ; enable allow_recreate to replace it",
        .fields.join(", ")
    )]
    ImmutableFieldChanged {
        /// Kind name.
        kind: String,
        /// Instance identifier in display form.
        identifier: String,
        /// The differing immutable fields.
        fields: Vec<String>,
    },

    /// Attempted to merge results that belong to different kinds.
    #[error("Cannot merge results of kind '{right}' into '{left}'")]
    ResultKindMismatch {
        /// Kind of the accumulator.
        left: String,
        /// Kind of the merged value.
        right: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Operation label.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        last_error: String,
    },

    /// A descriptor cannot be identified.
    #[error("Invalid {kind} descriptor: {message}")]
    InvalidDescriptor {
        /// Kind name.
        kind: String,
        /// What is wrong.
        message: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// How a failure should be handled by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, rate limits, server errors: retry with backoff.
    Transient,
    /// Validation, conflicts, unsupported operations: record per item.
    Permanent,
    /// Credentials or capabilities are insufficient: stop the kind.
    Authorization,
    /// Retry budget spent or non-remote failure: stop the kind.
    Fatal,
}

/// Result type alias for kindsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| format!("{{{}}}", c.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classifies this error for retry and containment decisions.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Platform(err) => err.class(),
            Self::Reconcile(
                ReconcileError::UpdateNotSupported { .. }
                | ReconcileError::ImmutableFieldChanged { .. }
                | ReconcileError::InvalidDescriptor { .. },
            ) => ErrorClass::Permanent,
            Self::Reconcile(ReconcileError::MissingCapabilities { .. }) => {
                ErrorClass::Authorization
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns the suggested retry delay, if the platform provided one.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Platform(PlatformError::RateLimited { retry_after_secs }) => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local filesystem error with the given message.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalIo {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl PlatformError {
    /// Maps an HTTP status and body to a platform error.
    #[must_use]
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            429 => Self::RateLimited {
                retry_after_secs: retry_after_secs.unwrap_or(1),
            },
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. }
            | Self::Server { .. }
            | Self::Network { .. }
            | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Unauthorized { .. } | Self::Forbidden { .. } => ErrorClass::Authorization,
            Self::Client { .. } | Self::NotFound { .. } | Self::InvalidResponse { .. } => {
                ErrorClass::Permanent
            }
        }
    }

    /// Returns true for authorization-specific failures.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self.class(), ErrorClass::Authorization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let class = |status, retry| PlatformError::from_status(status, "msg", retry).class();
        assert_eq!(class(401, None), ErrorClass::Authorization);
        assert_eq!(class(429, Some(2)), ErrorClass::Transient);
        assert_eq!(class(503, None), ErrorClass::Transient);
        assert_eq!(class(409, None), ErrorClass::Permanent);
        assert_eq!(class(400, None), ErrorClass::Permanent);
    }

    #[test]
    fn test_rate_limit_delay() {
        let err = SyncError::from(PlatformError::from_status(429, "", Some(7)));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_cycle_message_names_every_member() {
        let err = ConfigError::DependencyCycle {
            cycles: vec![vec![String::from("a"), String::from("b")]],
        };
        assert_eq!(err.to_string(), "Circular dependency between kinds: {a, b}");
    }

    #[test]
    fn test_unknown_kind_message() {
        let err = ConfigError::UnknownKind {
            kind: String::from("widgets"),
            referenced_by: Some(String::from("pipelines")),
        };
        assert_eq!(
            err.to_string(),
            "Unknown resource kind 'widgets' (referenced by 'pipelines')"
        );
    }
}
