//! Checkpoint record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Result, StateError};
use crate::planner::{ResourceDeployResult, SyncMode};

/// A stored value with its compare-and-swap version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Record key.
    pub key: String,
    /// Monotonic version, starting at 1 on first write.
    pub version: u64,
    /// Stored payload.
    pub value: Value,
    /// When this version was written.
    pub updated_at: DateTime<Utc>,
}

impl VersionedRecord {
    /// Builds the record that follows `previous` (or the first one).
    #[must_use]
    pub fn next(key: &str, previous: Option<u64>, value: Value) -> Self {
        Self {
            key: key.to_string(),
            version: previous.map_or(1, |v| v + 1),
            value,
            updated_at: Utc::now(),
        }
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] if the payload has the wrong shape.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            StateError::Corrupted {
                message: format!("record '{}': {e}", self.key),
            }
            .into()
        })
    }
}

/// Progress of a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Key of the run this checkpoint belongs to.
    pub run_key: String,
    /// Mode of the run.
    pub mode: SyncMode,
    /// Kinds that finished, with their results.
    #[serde(default)]
    pub completed: BTreeMap<String, ResourceDeployResult>,
    /// Progress of kinds interrupted part way through.
    #[serde(default)]
    pub partial: BTreeMap<String, PartialProgress>,
    /// Kinds that had not finished when the run stopped.
    #[serde(default)]
    pub remaining: Vec<String>,
    /// When the checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

impl RunCheckpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new(run_key: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            run_key: run_key.into(),
            mode,
            completed: BTreeMap::new(),
            partial: BTreeMap::new(),
            remaining: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    /// Returns true if `kind` finished in an earlier session.
    #[must_use]
    pub fn is_completed(&self, kind: &str) -> bool {
        self.completed.contains_key(kind)
    }

    /// Records a finished kind.
    pub fn complete(&mut self, result: ResourceDeployResult) {
        self.partial.remove(&result.kind);
        self.remaining.retain(|k| k != &result.kind);
        self.completed.insert(result.kind.clone(), result);
    }

    /// Store key of the checkpoint for `run_key`.
    #[must_use]
    pub fn store_key(run_key: &str) -> String {
        format!("checkpoints/{run_key}")
    }
}

/// What an interrupted kind had applied before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialProgress {
    /// Counters at the time of the interruption.
    pub result: ResourceDeployResult,
    /// Identifiers of applied items, in display form.
    #[serde(default)]
    pub applied: Vec<String>,
}

/// Holder of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Who holds the claim.
    pub holder: String,
    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,
    /// When the claim lapses.
    pub expires_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// Creates a claim valid for `ttl_secs`.
    #[must_use]
    pub fn new(holder: &str, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            holder: holder.to_string(),
            claimed_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
        }
    }

    /// Checks if the claim has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
