//! Per-kind deploy results.

use serde::{Deserialize, Serialize};

use super::diff::Action;
use crate::error::ReconcileError;

/// Counters of one kind's reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeployResult {
    /// Kind name.
    pub kind: String,
    /// Instances created.
    pub created: usize,
    /// Instances deleted.
    pub deleted: usize,
    /// Instances updated (or recreated).
    pub changed: usize,
    /// Instances already in sync.
    pub unchanged: usize,
    /// Instances considered.
    pub total: usize,
    /// Whether anything failed.
    pub failed: bool,
}

/// A single instance that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Identifier in display form.
    pub identifier: String,
    /// Action that was attempted.
    pub action: Action,
    /// Error message.
    pub cause: String,
}

impl ResourceDeployResult {
    /// Creates an empty result for `kind`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Adds `other`'s counters into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ResultKindMismatch`] when the kinds differ.
    pub fn merge(&mut self, other: &Self) -> Result<(), ReconcileError> {
        if self.kind != other.kind {
            return Err(ReconcileError::ResultKindMismatch {
                left: self.kind.clone(),
                right: other.kind.clone(),
            });
        }
        self.created += other.created;
        self.deleted += other.deleted;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.total += other.total;
        self.failed |= other.failed;
        Ok(())
    }

    /// Folds in the counters of an earlier, interrupted session.
    ///
    /// `carried` items were applied by that session and now plan as
    /// unchanged; they are counted once, under the action that applied them.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ResultKindMismatch`] when the kinds differ.
    pub fn resume(&mut self, prior: &Self, carried: usize) -> Result<(), ReconcileError> {
        let applied = Self {
            unchanged: 0,
            total: 0,
            ..prior.clone()
        };
        self.merge(&applied)?;
        self.unchanged = self.unchanged.saturating_sub(carried);
        self.total = self.total.max(prior.total);
        Ok(())
    }

    /// Returns true if nothing was or would be mutated.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.created == 0 && self.deleted == 0 && self.changed == 0
    }
}
