//! Checkpoint store trait definition.
//!
//! This module defines the common interface for checkpoint storage backends:
//! a key/value store whose writes are conditional on the stored version.

use async_trait::async_trait;
use serde_json::Value;

use super::types::VersionedRecord;
use crate::error::{Result, StateError, SyncError};

/// Trait for checkpoint storage backends.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Reads a record.
    ///
    /// Returns `None` if the key has never been written or was deleted.
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>>;

    /// Writes `value` if the stored version equals `expected`.
    ///
    /// `expected == None` means the key must not exist yet. Returns the
    /// record as written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StateError::VersionConflict`] if another
    /// writer got there first.
    async fn put_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<VersionedRecord>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Writes `value` over whatever version is stored, re-reading on conflict.
///
/// # Errors
///
/// Returns the store error, or a version conflict if the key keeps moving.
pub async fn put_latest(
    store: &dyn CheckpointStore,
    key: &str,
    value: Value,
) -> Result<VersionedRecord> {
    let mut attempts = 0;
    loop {
        let current = store.get(key).await?.map(|r| r.version);
        match store.put_if_version(key, current, value.clone()).await {
            Err(SyncError::State(StateError::VersionConflict { .. })) if attempts < 3 => {
                attempts += 1;
            }
            other => return other,
        }
    }
}
