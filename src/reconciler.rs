//! Reconciler for one kind.
//!
//! Fetches the remote counterparts of a kind's local descriptors, classifies
//! every pair and applies the sync mode, producing a [`KindPlan`] that the
//! executor can apply. Nothing here mutates the platform.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::kinds::{Identifier, LocalDescriptor, RemoteDescriptor, ResourceKind};
use crate::planner::{DiffEngine, KindPlan, ResourceDiff, RetryPolicy, SyncMode};

/// Builds per-kind plans from local descriptors and remote state.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    /// Maximum identifiers per retrieve call.
    batch_size: usize,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Retry policy of every read.
    retry: RetryPolicy,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DiffEngine::default(), RetryPolicy::default())
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(diff_engine: DiffEngine, retry: RetryPolicy) -> Self {
        Self {
            batch_size: 1000,
            diff_engine,
            retry,
        }
    }

    /// Sets the retrieve batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }

    /// Returns the diff engine.
    #[must_use]
    pub const fn diff_engine(&self) -> &DiffEngine {
        &self.diff_engine
    }

    /// Retrieves the remote instances matching `identifiers`.
    ///
    /// Identifiers are sent in batches; unknown ones are ignored. The result
    /// is the union of every batch without duplicates, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns the first batch error once its retries are spent.
    pub async fn retrieve_all(
        &self,
        kind: &dyn ResourceKind,
        identifiers: &[Identifier],
    ) -> Result<Vec<RemoteDescriptor>> {
        let label = format!("retrieve {}", kind.info().name);
        let mut seen = BTreeSet::new();
        let mut remotes = Vec::new();

        for chunk in identifiers.chunks(self.batch_size) {
            debug!("{label}: batch of {}", chunk.len());
            let batch = self.retry.run(&label, || kind.retrieve(chunk, true)).await?;
            for remote in batch {
                match kind.identify(&remote.fields) {
                    Ok(id) => {
                        if seen.insert(id) {
                            remotes.push(remote);
                        }
                    }
                    Err(err) => warn!("{label}: ignoring unidentifiable record: {err}"),
                }
            }
        }
        Ok(remotes)
    }

    /// Lists the full remote extent of a kind, page by page.
    ///
    /// A failed page is retried from the same cursor.
    ///
    /// # Errors
    ///
    /// Returns the page error once its retries are spent.
    pub async fn list_all(&self, kind: &dyn ResourceKind) -> Result<Vec<RemoteDescriptor>> {
        let label = format!("list {}", kind.info().name);
        let mut pager = kind.iterate();
        let mut remotes = Vec::new();
        let mut attempt = 0;

        loop {
            match pager.next_page().await {
                Ok(Some(items)) => {
                    attempt = 0;
                    remotes.extend(items);
                }
                Ok(None) => break,
                Err(err) => {
                    attempt += 1;
                    match self.retry.backoff(attempt, &err) {
                        Some(delay) => {
                            warn!("{label} failed ({err}), retry {attempt} in {delay:?}");
                            tokio::time::sleep(delay).await;
                        }
                        None if err.is_retryable() => {
                            return Err(RetryPolicy::exhausted(&label, attempt, &err));
                        }
                        None => return Err(err),
                    }
                }
            }
        }
        debug!("{label}: {} remote instance(s)", remotes.len());
        Ok(remotes)
    }

    /// Plans one kind for `mode`.
    ///
    /// Deploy and pull retrieve the local identifiers only. Clean and purge
    /// list the whole remote extent so that instances with no local
    /// descriptor can be found.
    ///
    /// # Errors
    ///
    /// Returns an error if a local descriptor has no identifier or the
    /// platform cannot be read.
    pub async fn plan_kind(
        &self,
        kind: &dyn ResourceKind,
        locals: &[LocalDescriptor],
        mode: SyncMode,
    ) -> Result<KindPlan> {
        let info = kind.info();
        info!("Planning {} ({mode}): {} local descriptor(s)", info.display_name, locals.len());

        let identifiers = locals
            .iter()
            .map(|local| kind.identify(&local.fields))
            .collect::<Result<Vec<_>>>()?;

        let remotes = if mode.lists_remote() {
            self.list_all(kind).await?
        } else {
            self.retrieve_all(kind, &identifiers).await?
        };

        let mut by_id: BTreeMap<Identifier, RemoteDescriptor> = BTreeMap::new();
        for remote in remotes {
            match kind.identify(&remote.fields) {
                Ok(id) => {
                    by_id.entry(id).or_insert(remote);
                }
                Err(err) => warn!("{}: ignoring unidentifiable record: {err}", info.name),
            }
        }

        let classified: Vec<ResourceDiff> = identifiers
            .iter()
            .zip(locals)
            .map(|(id, local)| {
                self.diff_engine
                    .classify(kind, id.clone(), local, by_id.get(id))
            })
            .collect();

        let orphans = if mode.lists_remote() {
            let local_ids: BTreeSet<&Identifier> = identifiers.iter().collect();
            by_id
                .into_iter()
                .filter(|(id, _)| !local_ids.contains(id))
                .map(|(id, remote)| DiffEngine::delete(id, Some(remote)))
                .collect()
        } else {
            Vec::new()
        };

        let plan = KindPlan::build(info, mode, classified, orphans);
        debug!(
            "{}: {} to apply, {} unchanged",
            info.name,
            plan.to_apply().len(),
            plan.count(crate::planner::Action::Unchanged)
        );
        Ok(plan)
    }
}
