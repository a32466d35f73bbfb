//! Claims on units of work.
//!
//! A claim is a record under `claims/<unit>` written with compare-and-swap.
//! Some stores acknowledge a conditional write before every reader sees it,
//! so a claim is only accepted after a re-read shows our version and holder.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::CheckpointStore;
use super::types::ClaimRecord;
use crate::error::{Result, StateError, SyncError};

/// Default claim lifetime in seconds.
pub const CLAIM_TTL_SECS: i64 = 300;

/// A claim held by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Claimed unit.
    pub unit: String,
    /// Version of the claim record we wrote.
    pub version: u64,
}

/// Takes and releases claims for one holder.
pub struct ClaimManager {
    store: Arc<dyn CheckpointStore>,
    holder: String,
    ttl_secs: i64,
}

impl std::fmt::Debug for ClaimManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimManager")
            .field("backend", &self.store.backend_type())
            .field("holder", &self.holder)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl ClaimManager {
    /// Creates a manager with a fresh holder identifier.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            holder: generate_holder_id(),
            ttl_secs,
        }
    }

    /// Overrides the holder identifier.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Gets the holder identifier.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn key(unit: &str) -> String {
        format!("claims/{unit}")
    }

    /// Claims `unit`.
    ///
    /// An expired claim, or one we already hold, is taken over.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ClaimHeld`] if another holder has a live claim
    /// and [`StateError::ClaimLost`] if a concurrent writer won.
    pub async fn claim(&self, unit: &str) -> Result<Claim> {
        let key = Self::key(unit);
        let current = self.store.get(&key).await?;

        if let Some(record) = &current {
            let existing: ClaimRecord = record.decode()?;
            if existing.holder != self.holder && !existing.is_expired() {
                return Err(StateError::ClaimHeld {
                    unit: unit.to_string(),
                    holder: existing.holder,
                    expires_at: existing.expires_at.to_rfc3339(),
                }
                .into());
            }
            if existing.holder != self.holder {
                debug!("Expired claim on {unit} by {}, taking over", existing.holder);
            }
        }

        let claim = ClaimRecord::new(&self.holder, self.ttl_secs);
        let value = serde_json::to_value(&claim)
            .map_err(|e| StateError::serialization(format!("Failed to serialize claim: {e}")))?;

        let written = match self
            .store
            .put_if_version(&key, current.map(|r| r.version), value)
            .await
        {
            Ok(record) => record,
            Err(SyncError::State(StateError::VersionConflict { .. })) => {
                return Err(StateError::ClaimLost {
                    unit: unit.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        let confirmed = match self.store.get(&key).await? {
            Some(record) if record.version == written.version => {
                record.decode::<ClaimRecord>()?.holder == self.holder
            }
            _ => false,
        };
        if !confirmed {
            warn!("Claim on {unit} was overwritten after our write");
            return Err(StateError::ClaimLost {
                unit: unit.to_string(),
            }
            .into());
        }

        info!("Claimed {unit} as {} (v{})", self.holder, written.version);
        Ok(Claim {
            unit: unit.to_string(),
            version: written.version,
        })
    }

    /// Releases `claim` if we still hold it.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn release(&self, claim: &Claim) -> Result<()> {
        let key = Self::key(&claim.unit);
        if let Some(record) = self.store.get(&key).await? {
            let existing: ClaimRecord = record.decode()?;
            if existing.holder == self.holder {
                self.store.delete(&key).await?;
                debug!("Released claim on {}", claim.unit);
            } else {
                debug!("Claim on {} now belongs to {}", claim.unit, existing.holder);
            }
        }
        Ok(())
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];
    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::MemoryCheckpointStore;

    fn manager(store: &Arc<MemoryCheckpointStore>, holder: &str) -> ClaimManager {
        let store: Arc<dyn CheckpointStore> = store.clone();
        ClaimManager::new(store, CLAIM_TTL_SECS).with_holder(holder)
    }

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let first = manager(&store, "a");
        let second = manager(&store, "b");

        let claim = first.claim("spaces").await.expect("claim");
        let err = second.claim("spaces").await.expect_err("held");
        assert!(matches!(
            err,
            SyncError::State(StateError::ClaimHeld { ref holder, .. }) if holder == "a"
        ));

        first.release(&claim).await.expect("release");
        second.claim("spaces").await.expect("free again");
    }

    #[tokio::test]
    async fn test_expired_claim_is_taken_over() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let stale: Arc<dyn CheckpointStore> = store.clone();
        ClaimManager::new(stale, -1)
            .with_holder("gone")
            .claim("schemas")
            .await
            .expect("claim");

        let claim = manager(&store, "b").claim("schemas").await.expect("take over");
        assert_eq!(claim.version, 2);
    }

    #[tokio::test]
    async fn test_reclaim_by_same_holder() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let me = manager(&store, "a");
        me.claim("spaces").await.expect("claim");
        let again = me.claim("spaces").await.expect("reclaim");
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn test_overwritten_claim_is_lost() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let other = serde_json::to_value(ClaimRecord::new("intruder", 60)).expect("value");
        store.overwrite_after_next_put("claims/pipelines", other);

        let err = manager(&store, "a").claim("pipelines").await.expect_err("lost");
        assert!(matches!(err, SyncError::State(StateError::ClaimLost { .. })));
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
