//! Descriptor hashing for run keys.
//!
//! A run key identifies "the same run" across sessions: same project, same
//! environment, same mode and the same descriptors. Only then may a later
//! session resume from a checkpoint.

use sha2::{Digest, Sha256};

use crate::kinds::LocalDescriptor;
use crate::planner::SyncMode;

/// Hasher for local descriptor sets.
#[derive(Debug, Default)]
pub struct DescriptorHasher;

impl DescriptorHasher {
    /// Creates a new descriptor hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a descriptor set, independent of load order.
    #[must_use]
    pub fn hash_descriptors(&self, descriptors: &[LocalDescriptor]) -> String {
        // Object keys serialize in sorted order, so each entry is canonical.
        let mut entries: Vec<String> = descriptors
            .iter()
            .map(|d| format!("{}\u{0}{}", d.kind, serde_json::Value::Object(d.fields.clone())))
            .collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for entry in entries {
            hasher.update(entry.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Builds the run key of a mode over a kind selection and descriptors.
    #[must_use]
    pub fn run_key(
        &self,
        project: &str,
        environment: &str,
        mode: SyncMode,
        selection: &[String],
        descriptors: &[LocalDescriptor],
    ) -> String {
        let mut kinds: Vec<&str> = selection.iter().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds.dedup();

        let mut hasher = Sha256::new();
        hasher.update(kinds.join(",").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.hash_descriptors(descriptors).as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!("{project}-{environment}-{mode}-{}", &hash[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(kind: &str, value: serde_json::Value) -> LocalDescriptor {
        LocalDescriptor::new(kind, value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_hash_ignores_order() {
        let hasher = DescriptorHasher::new();
        let a = descriptor("datasets", json!({ "externalId": "a", "name": "A" }));
        let b = descriptor("datasets", json!({ "name": "B", "externalId": "b" }));
        assert_eq!(
            hasher.hash_descriptors(&[a.clone(), b.clone()]),
            hasher.hash_descriptors(&[b, a])
        );
    }

    #[test]
    fn test_hash_detects_changes() {
        let hasher = DescriptorHasher::new();
        let before = [descriptor("datasets", json!({ "externalId": "a", "name": "A" }))];
        let after = [descriptor("datasets", json!({ "externalId": "a", "name": "B" }))];
        assert_ne!(hasher.hash_descriptors(&before), hasher.hash_descriptors(&after));
    }

    #[test]
    fn test_run_key_includes_mode() {
        let hasher = DescriptorHasher::new();
        let descriptors = [descriptor("spaces", json!({ "space": "s1" }))];
        let deploy = hasher.run_key("analytics", "dev", SyncMode::Deploy, &[], &descriptors);
        let clean = hasher.run_key("analytics", "dev", SyncMode::Clean, &[], &descriptors);
        assert!(deploy.starts_with("analytics-dev-deploy-"));
        assert_ne!(deploy, clean);
        assert_eq!(deploy.len(), "analytics-dev-deploy-".len() + 16);
    }

    #[test]
    fn test_run_key_includes_selection() {
        let hasher = DescriptorHasher::new();
        let descriptors = [descriptor("spaces", json!({ "space": "s1" }))];
        let selection = [String::from("spaces"), String::from("datasets")];
        let reordered = [String::from("datasets"), String::from("spaces")];
        let key = |s: &[String]| hasher.run_key("a", "dev", SyncMode::Deploy, s, &descriptors);
        assert_eq!(key(&selection), key(&reordered));
        assert_ne!(key(&selection), key(&[]));
    }
}
