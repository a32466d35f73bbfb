//! Diff engine for comparing local (desired) and remote (actual) instances.
//!
//! Classification is pure: it never touches the network. The reconciler
//! fetches remote state and feeds pairs through [`DiffEngine::classify`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

use crate::kinds::{
    Diffable, Fields, Identifier, LocalDescriptor, RemoteDescriptor, UpdateMode, UpdatePayload,
};

/// Classification of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Exists locally only.
    Create,
    /// Exists on both sides and differs.
    Update,
    /// Must be removed remotely.
    Delete,
    /// Exists on both sides and matches.
    Unchanged,
}

/// Difference for a single instance.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Instance identifier.
    pub identifier: Identifier,
    /// Classified action.
    pub action: Action,
    /// Local descriptor, absent for orphans.
    pub local: Option<LocalDescriptor>,
    /// Remote descriptor, absent for creates.
    pub remote: Option<RemoteDescriptor>,
    /// Normalized local fields sent on create.
    pub normalized_local: Option<Fields>,
    /// Normalized remote fields, when a remote exists.
    pub normalized_remote: Option<Fields>,
    /// Update payload, for updates only.
    pub payload: Option<UpdatePayload>,
    /// Names of the differing fields.
    pub changed_fields: Vec<String>,
    /// Differing fields that cannot be updated in place.
    pub immutable_fields: Vec<String>,
}

/// Engine classifying local/remote pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    /// How update payloads are built.
    update_mode: UpdateMode,
}

impl DiffEngine {
    /// Creates a diff engine.
    #[must_use]
    pub const fn new(update_mode: UpdateMode) -> Self {
        Self { update_mode }
    }

    /// Returns the update mode.
    #[must_use]
    pub const fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// Classifies a local descriptor against its remote counterpart.
    pub fn classify<K: Diffable + ?Sized>(
        &self,
        kind: &K,
        identifier: Identifier,
        local: &LocalDescriptor,
        remote: Option<&RemoteDescriptor>,
    ) -> ResourceDiff {
        let normalized_local = kind.normalize_local(&local.fields);

        let Some(remote) = remote else {
            trace!("{identifier}: create");
            return ResourceDiff {
                changed_fields: normalized_local.keys().cloned().collect(),
                identifier,
                action: Action::Create,
                local: Some(local.clone()),
                remote: None,
                normalized_local: Some(normalized_local),
                normalized_remote: None,
                payload: None,
                immutable_fields: Vec::new(),
            };
        };

        let normalized_remote = kind.normalize_for_diff(&remote.fields, &local.fields);
        // Identifier fields already matched; they only differ in representation.
        let changed: Vec<String> = changed_fields(&normalized_local, &normalized_remote)
            .into_iter()
            .filter(|field| !kind.is_identifier_field(field))
            .collect();
        let immutable: Vec<String> = changed
            .iter()
            .filter(|field| kind.is_immutable_field(field))
            .cloned()
            .collect();

        let (action, payload) = if changed.is_empty() {
            (Action::Unchanged, None)
        } else {
            let payload = kind.update_payload(
                &identifier,
                &normalized_local,
                &normalized_remote,
                self.update_mode,
            );
            (Action::Update, Some(payload))
        };
        trace!("{identifier}: {action} {changed:?}");

        ResourceDiff {
            identifier,
            action,
            local: Some(local.clone()),
            remote: Some(remote.clone()),
            normalized_local: Some(normalized_local),
            normalized_remote: Some(normalized_remote),
            payload,
            changed_fields: changed,
            immutable_fields: immutable,
        }
    }

    /// Builds a delete diff for a remote instance.
    #[must_use]
    pub fn delete(identifier: Identifier, remote: Option<RemoteDescriptor>) -> ResourceDiff {
        ResourceDiff {
            identifier,
            action: Action::Delete,
            local: None,
            remote,
            normalized_local: None,
            normalized_remote: None,
            payload: None,
            changed_fields: Vec::new(),
            immutable_fields: Vec::new(),
        }
    }
}

/// Returns the sorted names of fields whose values differ.
#[must_use]
pub fn changed_fields(local: &Fields, remote: &Fields) -> Vec<String> {
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    keys.into_iter()
        .filter(|key| local.get(*key) != remote.get(*key))
        .cloned()
        .collect()
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unchanged => "unchanged",
        };
        write!(f, "{s}")
    }
}
