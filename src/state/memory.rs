//! In-memory checkpoint store used by tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::store::CheckpointStore;
use super::types::VersionedRecord;
use crate::error::{Result, StateError};

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, VersionedRecord>,
    /// A competing write applied right after the next successful put.
    intruder: Option<(String, Value)>,
    puts: usize,
}

#[derive(Default)]
pub(crate) struct MemoryCheckpointStore {
    inner: Mutex<Inner>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates another writer overwriting `key` right after our next write
    /// to it succeeds.
    pub fn overwrite_after_next_put(&self, key: &str, value: Value) {
        self.lock().intruder = Some((key.to_string(), value));
    }

    pub fn puts(&self) -> usize {
        self.lock().puts
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().records.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>> {
        Ok(self.lock().records.get(key).cloned())
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<VersionedRecord> {
        let mut inner = self.lock();
        let found = inner.records.get(key).map(|r| r.version);
        if found != expected {
            return Err(StateError::VersionConflict {
                key: key.to_string(),
                expected,
                found,
            }
            .into());
        }
        let record = VersionedRecord::next(key, found, value);
        inner.records.insert(key.to_string(), record.clone());
        inner.puts += 1;

        if inner.intruder.as_ref().is_some_and(|(k, _)| k == key)
            && let Some((_, other)) = inner.intruder.take()
        {
            let competing = VersionedRecord::next(key, Some(record.version), other);
            inner.records.insert(key.to_string(), competing);
        }
        Ok(record)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().records.remove(key);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
