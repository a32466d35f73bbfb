//! Per-kind plans: classified diffs with the sync mode applied.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::diff::{Action, ResourceDiff};
use super::result::ResourceDeployResult;
use crate::kinds::{Fields, KindInfo};

/// What a run does with the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Create and update remote instances to match local ones.
    Deploy,
    /// Delete remote instances that have no local descriptor.
    Clean,
    /// Delete every remote instance of the selected kinds.
    Purge,
    /// Report remote state back; change nothing.
    Pull,
}

impl SyncMode {
    /// Returns true if the mode issues mutations.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Pull)
    }

    /// Returns true if kinds are visited consumers-first.
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(self, Self::Clean | Self::Purge)
    }

    /// Returns true if the full remote extent must be listed.
    #[must_use]
    pub const fn lists_remote(self) -> bool {
        self.is_reverse()
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deploy => "deploy",
            Self::Clean => "clean",
            Self::Purge => "purge",
            Self::Pull => "pull",
        };
        write!(f, "{s}")
    }
}

/// The effective actions for one kind.
#[derive(Debug, Clone)]
pub struct KindPlan {
    /// Kind name.
    pub kind: String,
    /// Mode the plan was built for.
    pub mode: SyncMode,
    /// One diff per instance, with its effective action.
    pub diffs: Vec<ResourceDiff>,
    /// Normalized remote records carried back in pull mode.
    pub pulled: Vec<Fields>,
    /// Warnings raised while applying the mode.
    pub warnings: Vec<String>,
}

impl KindPlan {
    /// Applies `mode` to classified local diffs and remote orphans.
    ///
    /// `classified` holds one diff per local descriptor; `orphans` holds
    /// delete diffs for remote instances with no local counterpart and is
    /// ignored outside clean and purge.
    #[must_use]
    pub fn build(
        info: &KindInfo,
        mode: SyncMode,
        classified: Vec<ResourceDiff>,
        orphans: Vec<ResourceDiff>,
    ) -> Self {
        let mut pulled = Vec::new();
        let mut warnings = Vec::new();

        let mut diffs: Vec<ResourceDiff> = match mode {
            SyncMode::Deploy => classified,
            SyncMode::Pull => {
                pulled = classified
                    .iter()
                    .filter(|d| matches!(d.action, Action::Update | Action::Unchanged))
                    .filter_map(|d| d.normalized_remote.clone())
                    .collect();
                classified
            }
            SyncMode::Clean => classified.into_iter().map(unchanged).chain(orphans).collect(),
            SyncMode::Purge => classified
                .into_iter()
                .map(|d| {
                    if d.remote.is_some() {
                        ResourceDiff {
                            action: Action::Delete,
                            payload: None,
                            ..d
                        }
                    } else {
                        unchanged(d)
                    }
                })
                .chain(orphans)
                .collect(),
        };

        if mode.is_reverse() && !info.supports_drop {
            let blocked = diffs.iter().filter(|d| d.action == Action::Delete).count();
            if blocked > 0 {
                let message = format!(
                    "{} does not support delete; {blocked} instance(s) left in place",
                    info.display_name
                );
                warn!("{message}");
                warnings.push(message);
                diffs = diffs
                    .into_iter()
                    .map(|d| if d.action == Action::Delete { unchanged(d) } else { d })
                    .collect();
            }
        }

        Self {
            kind: info.name.clone(),
            mode,
            diffs,
            pulled,
            warnings,
        }
    }

    /// Returns the number of diffs with `action`.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.diffs.iter().filter(|d| d.action == action).count()
    }

    /// Returns the diffs that will be sent to the platform, in execution
    /// order: deletes, then creates, then updates.
    #[must_use]
    pub fn to_apply(&self) -> Vec<&ResourceDiff> {
        if !self.mode.is_mutating() {
            return Vec::new();
        }
        [Action::Delete, Action::Create, Action::Update]
            .into_iter()
            .flat_map(|action| self.diffs.iter().filter(move |d| d.action == action))
            .collect()
    }

    /// Returns true if nothing would be sent to the platform.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.to_apply().is_empty()
    }

    /// Returns the field sets mutations will touch, for capability checks.
    #[must_use]
    pub fn mutated_fields(&self) -> Vec<&Fields> {
        self.to_apply()
            .into_iter()
            .filter_map(|d| {
                d.local
                    .as_ref()
                    .map(|l| &l.fields)
                    .or_else(|| d.remote.as_ref().map(|r| &r.fields))
            })
            .collect()
    }

    /// Counters as planned, without applying anything.
    #[must_use]
    pub fn planned_result(&self) -> ResourceDeployResult {
        let (created, changed) = if self.mode.is_mutating() {
            (self.count(Action::Create), self.count(Action::Update))
        } else {
            (0, self.count(Action::Update))
        };
        ResourceDeployResult {
            kind: self.kind.clone(),
            created,
            deleted: self.count(Action::Delete),
            changed,
            unchanged: self.count(Action::Unchanged),
            total: self.diffs.len(),
            failed: false,
        }
    }
}

fn unchanged(diff: ResourceDiff) -> ResourceDiff {
    ResourceDiff {
        action: Action::Unchanged,
        payload: None,
        ..diff
    }
}
