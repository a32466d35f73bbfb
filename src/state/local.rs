//! Local file-based checkpoint backend.
//!
//! One JSON file per key under a base directory. Writes go to a temporary
//! file that is renamed into place, so a crash never leaves a half-written
//! record. Version checks are serialized by an in-process mutex; the backend
//! is meant for single-machine use.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::store::CheckpointStore;
use super::types::VersionedRecord;
use crate::error::{Result, StateError, SyncError};

/// Default checkpoint directory name.
const STATE_DIR: &str = ".kindsync";

/// Local file-based checkpoint store.
#[derive(Debug)]
pub struct LocalCheckpointStore {
    /// Directory holding one file per key.
    base_dir: PathBuf,
    /// Serializes read-compare-write sequences.
    write_guard: Mutex<()>,
}

impl LocalCheckpointStore {
    /// Creates a store under `.kindsync` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| SyncError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);
        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("{name}.json"))
    }

    async fn read(&self, key: &str) -> Result<Option<VersionedRecord>> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                let message = format!("Failed to read {}: {e}", path.display());
                return Err(StateError::local(message).into());
            }
        };
        let record = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;
        Ok(Some(record))
    }

    async fn write(&self, record: &VersionedRecord) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            StateError::local(format!("Failed to create checkpoint directory: {e}"))
        })?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        let path = self.path_for(&record.key);
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::local(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::local(format!("Failed to write temp file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::local(format!("Failed to sync temp file: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::local(format!("Failed to move record into place: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for LocalCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>> {
        self.read(key).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<VersionedRecord> {
        let _guard = self.write_guard.lock().await;

        let found = self.read(key).await?.map(|r| r.version);
        if found != expected {
            return Err(StateError::VersionConflict {
                key: key.to_string(),
                expected,
                found,
            }
            .into());
        }

        let record = VersionedRecord::next(key, found, value);
        self.write(&record).await?;
        debug!("Wrote {key} v{} to {}", record.version, self.base_dir.display());
        Ok(record)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::local(format!("Failed to delete {key}: {e}")).into()),
        }
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_missing_key() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalCheckpointStore::with_base_dir(dir.path());
        assert!(store.get("nothing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalCheckpointStore::with_base_dir(dir.path());

        let first = store
            .put_if_version("checkpoints/run", None, json!({ "n": 1 }))
            .await
            .expect("create");
        assert_eq!(first.version, 1);

        // A second create loses.
        let err = store
            .put_if_version("checkpoints/run", None, json!({ "n": 2 }))
            .await
            .expect_err("exists");
        assert!(matches!(
            err,
            SyncError::State(StateError::VersionConflict { found: Some(1), .. })
        ));

        let second = store
            .put_if_version("checkpoints/run", Some(1), json!({ "n": 2 }))
            .await
            .expect("update");
        assert_eq!(second.version, 2);

        // A stale version loses too.
        assert!(
            store
                .put_if_version("checkpoints/run", Some(1), json!({ "n": 3 }))
                .await
                .is_err()
        );

        let stored = store.get("checkpoints/run").await.expect("get").expect("record");
        assert_eq!(stored.value, json!({ "n": 2 }));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalCheckpointStore::with_base_dir(dir.path());
        store.put_if_version("k", None, json!(1)).await.expect("put");
        store.delete("k").await.expect("delete");
        store.delete("k").await.expect("delete again");
        assert!(store.get("k").await.expect("get").is_none());

        // Recreating after delete starts over at version 1.
        let again = store.put_if_version("k", None, json!(2)).await.expect("put");
        assert_eq!(again.version, 1);
    }

    #[tokio::test]
    async fn test_corrupted_record() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalCheckpointStore::with_base_dir(dir.path());
        std::fs::write(dir.path().join("bad.json"), "not json").expect("write");
        let err = store.get("bad").await.expect_err("corrupted");
        assert!(matches!(err, SyncError::State(StateError::Corrupted { .. })));
    }
}
