//! Capabilities: named permission scopes required for remote operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Action granted by an ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    /// Read access.
    Read,
    /// Write access (create, update, delete).
    Write,
}

/// Resource scope of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityScope {
    /// All resources of the ACL.
    All,
    /// Only the listed scope ids (for example spaces).
    Ids(BTreeSet<String>),
}

/// One capability: an ACL, an action, and a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    /// ACL name, e.g. `spaces`.
    pub acl: String,
    /// Granted or required action.
    pub action: AclAction,
    /// Scope of the capability.
    pub scope: CapabilityScope,
}

/// A set of capabilities, either granted to a caller or required by a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl Capability {
    /// Creates a capability scoped to all resources.
    pub fn all(acl: impl Into<String>, action: AclAction) -> Self {
        Self {
            acl: acl.into(),
            action,
            scope: CapabilityScope::All,
        }
    }

    /// Creates a capability scoped to specific ids.
    pub fn scoped<I, S>(acl: impl Into<String>, action: AclAction, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acl: acl.into(),
            action,
            scope: CapabilityScope::Ids(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// Returns true if this granted capability satisfies `required`.
    ///
    /// Write access implies read access on the same scope.
    #[must_use]
    pub fn covers(&self, required: &Self) -> bool {
        if self.acl != required.acl {
            return false;
        }
        if self.action != required.action && self.action != AclAction::Write {
            return false;
        }
        match (&self.scope, &required.scope) {
            (CapabilityScope::All, _) => true,
            (CapabilityScope::Ids(_), CapabilityScope::All) => false,
            (CapabilityScope::Ids(granted), CapabilityScope::Ids(needed)) => {
                needed.is_subset(granted)
            }
        }
    }
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Iterates over the capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    /// Returns the required capabilities that no granted capability covers.
    ///
    /// A scoped requirement may be satisfied by the union of several scoped
    /// grants, so scopes are checked id by id.
    #[must_use]
    pub fn missing(&self, required: &Self) -> Vec<Capability> {
        let mut missing = Vec::new();
        for needed in &required.capabilities {
            if self.capabilities.iter().any(|g| g.covers(needed)) {
                continue;
            }
            match &needed.scope {
                CapabilityScope::All => missing.push(needed.clone()),
                CapabilityScope::Ids(ids) => {
                    let uncovered: BTreeSet<String> = ids
                        .iter()
                        .filter(|id| {
                            let single = Capability::scoped(
                                needed.acl.clone(),
                                needed.action,
                                [(*id).clone()],
                            );
                            !self.capabilities.iter().any(|g| g.covers(&single))
                        })
                        .cloned()
                        .collect();
                    if !uncovered.is_empty() {
                        missing.push(Capability {
                            acl: needed.acl.clone(),
                            action: needed.action,
                            scope: CapabilityScope::Ids(uncovered),
                        });
                    }
                }
            }
        }
        missing
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for AclAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.acl, self.action)?;
        if let CapabilityScope::Ids(ids) = &self.scope {
            write!(f, "[{}]", ids.iter().cloned().collect::<Vec<_>>().join(","))?;
        }
        Ok(())
    }
}
