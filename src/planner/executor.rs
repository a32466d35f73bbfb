//! Kind executor for applying one kind's plan.
//!
//! Mutations are sent in batches: deletes first, then creates, then updates.
//! Transient failures are retried with backoff. A batch rejected permanently
//! is replayed item by item so only the offending items are recorded. Retry
//! exhaustion and authorization failures stop the kind, keeping the counts of
//! what already succeeded.

use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::diff::{Action, ResourceDiff};
use super::plan::KindPlan;
use super::result::{ItemFailure, ResourceDeployResult};
use super::retry::RetryPolicy;
use crate::error::{ErrorClass, ReconcileError, Result};
use crate::kinds::{Fields, Identifier, ResourceKind, UpdatePayload};

/// Execution settings shared by every kind of a run.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum items per remote call.
    pub batch_size: usize,
    /// Delete and recreate instances of kinds without update support.
    pub allow_recreate: bool,
    /// Retry policy of each remote call.
    pub retry: RetryPolicy,
    /// Wall-clock deadline checked between batches.
    pub deadline: Option<Instant>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            allow_recreate: false,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

/// Outcome of executing one kind.
#[derive(Debug, Clone)]
pub struct KindExecution {
    /// Counters of what was applied.
    pub result: ResourceDeployResult,
    /// Items that could not be applied.
    pub failures: Vec<ItemFailure>,
    /// Identifiers of applied items, in display form.
    pub applied: Vec<String>,
    /// The deadline passed before every batch was sent.
    pub interrupted: bool,
    /// The error that stopped the kind, if any.
    pub fatal: Option<String>,
}

impl KindExecution {
    fn new(kind: &str) -> Self {
        Self {
            result: ResourceDeployResult::new(kind),
            failures: Vec::new(),
            applied: Vec::new(),
            interrupted: false,
            fatal: None,
        }
    }

    fn finish(mut self) -> Self {
        self.result.failed = self.fatal.is_some() || !self.failures.is_empty();
        self
    }

    fn fail(&mut self, diff: &ResourceDiff, action: Action, cause: String) {
        warn!("{} {} failed: {cause}", action, diff.identifier);
        self.failures.push(ItemFailure {
            identifier: diff.identifier.to_string(),
            action,
            cause,
        });
    }
}

/// Executor for a single kind.
pub struct KindExecutor<'a> {
    kind: &'a dyn ResourceKind,
    options: &'a ExecutorOptions,
}

impl<'a> KindExecutor<'a> {
    /// Creates an executor for `kind`.
    #[must_use]
    pub const fn new(kind: &'a dyn ResourceKind, options: &'a ExecutorOptions) -> Self {
        Self { kind, options }
    }

    /// Applies `plan`.
    ///
    /// Never fails as a whole: failures are recorded in the returned
    /// [`KindExecution`].
    pub async fn execute(&self, plan: &KindPlan) -> KindExecution {
        let info = self.kind.info();
        let mut exec = KindExecution::new(&plan.kind);
        exec.result.total = plan.diffs.len();
        exec.result.unchanged = plan.count(Action::Unchanged);

        if !plan.mode.is_mutating() {
            exec.result = plan.planned_result();
            return exec;
        }

        let of = |action: Action| {
            plan.diffs
                .iter()
                .filter(move |d| d.action == action)
                .collect::<Vec<_>>()
        };
        let deletes = of(Action::Delete);
        let creates = of(Action::Create);
        let mut updates = of(Action::Update);
        let can_recreate = self.options.allow_recreate && info.supports_drop;

        let (mut recreates, mutable): (Vec<_>, Vec<_>) = std::mem::take(&mut updates)
            .into_iter()
            .partition(|d| !d.immutable_fields.is_empty());
        updates = mutable;
        if !recreates.is_empty() && !can_recreate {
            for diff in std::mem::take(&mut recreates) {
                let cause = ReconcileError::ImmutableFieldChanged {
                    kind: info.name.clone(),
                    identifier: diff.identifier.to_string(),
                    fields: diff.immutable_fields.clone(),
                };
                exec.fail(diff, Action::Update, cause.to_string());
            }
        }

        if !updates.is_empty() && !info.supports_update {
            if can_recreate {
                recreates.append(&mut updates);
            } else {
                let cause = ReconcileError::UpdateNotSupported {
                    kind: info.name.clone(),
                }
                .to_string();
                for diff in std::mem::take(&mut updates) {
                    exec.fail(diff, Action::Update, cause.clone());
                }
            }
        }

        if !recreates.is_empty() {
            info!("{}: recreating {} instance(s)", info.display_name, recreates.len());
        }

        let (deleted, stopped) = self.run_phase(Action::Delete, &deletes, &mut exec).await;
        exec.result.deleted += deleted.len();
        if stopped {
            return exec.finish();
        }

        let (removed, stopped) = self.run_phase(Action::Delete, &recreates, &mut exec).await;
        if stopped {
            return exec.finish();
        }
        let (recreated, stopped) = self.run_phase(Action::Create, &removed, &mut exec).await;
        exec.result.changed += recreated.len();
        if stopped {
            return exec.finish();
        }

        let (created, stopped) = self.run_phase(Action::Create, &creates, &mut exec).await;
        exec.result.created += created.len();
        if stopped {
            return exec.finish();
        }

        let (updated, _) = self.run_phase(Action::Update, &updates, &mut exec).await;
        exec.result.changed += updated.len();

        exec.finish()
    }

    fn deadline_passed(&self) -> bool {
        self.options
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Sends `items` in batches. Returns the applied items and whether the
    /// kind must stop.
    async fn run_phase<'p>(
        &self,
        action: Action,
        items: &[&'p ResourceDiff],
        exec: &mut KindExecution,
    ) -> (Vec<&'p ResourceDiff>, bool) {
        let mut done: Vec<&'p ResourceDiff> = Vec::new();
        let name = &self.kind.info().name;

        for chunk in items.chunks(self.options.batch_size.max(1)) {
            if self.deadline_passed() {
                warn!("{name}: time budget reached, stopping before next batch");
                exec.interrupted = true;
                return (done, true);
            }

            let label = format!("{action} {name}");
            debug!("{label}: batch of {}", chunk.len());
            match self.options.retry.run(&label, || self.call(action, chunk)).await {
                Ok(()) => {
                    exec.applied.extend(chunk.iter().map(|d| d.identifier.to_string()));
                    done.extend_from_slice(chunk);
                }
                Err(err) if err.class() == ErrorClass::Permanent && chunk.len() > 1 => {
                    warn!("{label}: batch rejected ({err}), retrying item by item");
                    for item in chunk {
                        let single = std::slice::from_ref(item);
                        match self.options.retry.run(&label, || self.call(action, single)).await {
                            Ok(()) => {
                                exec.applied.push(item.identifier.to_string());
                                done.push(*item);
                            }
                            Err(err) if err.class() == ErrorClass::Permanent => {
                                exec.fail(item, action, err.to_string());
                            }
                            Err(err) => {
                                error!("{label}: {err}");
                                exec.fatal = Some(err.to_string());
                                return (done, true);
                            }
                        }
                    }
                }
                Err(err) if err.class() == ErrorClass::Permanent => {
                    for item in chunk {
                        exec.fail(item, action, err.to_string());
                    }
                }
                Err(err) => {
                    error!("{label}: {err}");
                    exec.fatal = Some(err.to_string());
                    return (done, true);
                }
            }
        }
        (done, false)
    }

    /// Issues one remote call for `chunk`.
    async fn call(&self, action: Action, chunk: &[&ResourceDiff]) -> Result<()> {
        match action {
            Action::Create => {
                let items: Vec<Fields> = chunk
                    .iter()
                    .map(|d| {
                        d.normalized_local
                            .clone()
                            .or_else(|| d.local.as_ref().map(|l| l.fields.clone()))
                            .unwrap_or_default()
                    })
                    .collect();
                self.kind.create(&items).await?;
            }
            Action::Update => {
                let payloads: Vec<UpdatePayload> =
                    chunk.iter().filter_map(|d| d.payload.clone()).collect();
                self.kind.update(&payloads).await?;
            }
            Action::Delete => {
                let ids: Vec<Identifier> = chunk.iter().map(|d| d.identifier.clone()).collect();
                self.kind.delete(&ids).await?;
            }
            Action::Unchanged => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{standard_kind, ApiKind, Identifiable, LocalDescriptor, RemoteDescriptor};
    use crate::planner::{DiffEngine, SyncMode};
    use crate::platform::memory::{InMemoryPlatform, REJECT_MARKER};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(name: &str) -> (ApiKind, Arc<InMemoryPlatform>) {
        let platform = Arc::new(InMemoryPlatform::standard());
        let spec = *standard_kind(name).expect("kind");
        (ApiKind::new(spec, platform.clone(), 100), platform)
    }

    fn plan(kind: &ApiKind, locals: &[Value], remotes: &[Value]) -> KindPlan {
        let engine = DiffEngine::default();
        let remotes: Vec<RemoteDescriptor> =
            remotes.iter().cloned().map(RemoteDescriptor::from_value).collect();
        let diffs = locals
            .iter()
            .map(|value| {
                let fields = value.as_object().cloned().unwrap_or_default();
                let local = LocalDescriptor::new(kind.spec().name, fields);
                let id = kind.identify(&local.fields).expect("id");
                let remote = remotes
                    .iter()
                    .find(|r| kind.identify(&r.fields).ok().as_ref() == Some(&id));
                engine.classify(kind, id, &local, remote)
            })
            .collect();
        KindPlan::build(kind.info(), SyncMode::Deploy, diffs, Vec::new())
    }

    fn options() -> ExecutorOptions {
        ExecutorOptions {
            batch_size: 10,
            retry: RetryPolicy::immediate(3),
            ..ExecutorOptions::default()
        }
    }

    #[tokio::test]
    async fn test_failed_batch_isolates_bad_item() {
        let (kind, platform) = setup("datasets");
        let plan = plan(
            &kind,
            &[
                json!({ "externalId": "a" }),
                json!({ "externalId": "b", REJECT_MARKER: true }),
                json!({ "externalId": "c" }),
            ],
            &[],
        );
        let options = options();
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert_eq!(exec.result.created, 2);
        assert!(exec.result.failed);
        assert_eq!(exec.failures.len(), 1);
        assert_eq!(exec.failures[0].identifier, "b");
        assert_eq!(platform.items("datasets").len(), 2);
        assert!(exec.fatal.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (kind, platform) = setup("datasets");
        platform.fail_transient("create", "datasets", 2);
        let plan = plan(&kind, &[json!({ "externalId": "a" })], &[]);
        let options = options();
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert_eq!(exec.result.created, 1);
        assert!(!exec.result.failed);
        assert_eq!(platform.calls().iter().filter(|c| c.op == "create").count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_the_kind() {
        let (kind, platform) = setup("datasets");
        platform.fail_transient("create", "datasets", 10);
        let plan = plan(
            &kind,
            &[json!({ "externalId": "a" }), json!({ "externalId": "b", "name": "x" })],
            &[json!({ "externalId": "b", "name": "y" })],
        );
        let options = options();
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert!(exec.result.failed);
        assert!(exec.fatal.as_deref().is_some_and(|m| m.contains("after 3 attempts")));
        // The update phase never ran.
        assert_eq!(platform.calls().iter().filter(|c| c.op == "update").count(), 0);
    }

    #[tokio::test]
    async fn test_update_not_supported_without_recreate() {
        let (kind, platform) = setup("schedules");
        let existing =
            json!({ "externalId": "s1", "cron": "0 * * * *", "pipelineExternalId": "p" });
        platform.seed("pipelines/schedules", existing.clone());
        let plan = plan(
            &kind,
            &[json!({ "externalId": "s1", "cron": "5 * * * *", "pipelineExternalId": "p" })],
            &[existing],
        );
        let options = options();
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert_eq!(exec.failures.len(), 1);
        assert!(exec.failures[0].cause.contains("does not support update"));
        assert_eq!(platform.mutation_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_not_supported_recreates_when_allowed() {
        let (kind, platform) = setup("schedules");
        let existing =
            json!({ "externalId": "s1", "cron": "0 * * * *", "pipelineExternalId": "p" });
        platform.seed("pipelines/schedules", existing.clone());
        let plan = plan(
            &kind,
            &[json!({ "externalId": "s1", "cron": "5 * * * *", "pipelineExternalId": "p" })],
            &[existing],
        );
        let options = ExecutorOptions {
            allow_recreate: true,
            ..options()
        };
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert_eq!(exec.result.changed, 1);
        assert!(!exec.result.failed);
        let ops: Vec<&str> = platform.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec!["delete", "create"]);
        assert_eq!(platform.items("pipelines/schedules")[0]["cron"], json!("5 * * * *"));
    }

    fn schema(used_for: &str) -> serde_json::Value {
        json!({ "space": "s1", "externalId": "m1", "usedFor": used_for, "name": "M" })
    }

    #[tokio::test]
    async fn test_immutable_change_fails_every_run() {
        let (kind, platform) = setup("schemas");
        platform.seed("models/schemas", schema("node"));
        let options = options();

        for _ in 0..2 {
            let remotes = platform.items("models/schemas");
            let plan = plan(&kind, &[schema("edge")], &remotes);
            let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

            assert_eq!(exec.result.changed, 0);
            assert!(exec.result.failed);
            assert_eq!(exec.failures.len(), 1);
            assert!(exec.failures[0].cause.contains("usedFor"));
            assert!(exec.failures[0].cause.contains("allow_recreate"));
        }
        assert_eq!(platform.mutation_calls(), 0);
        assert_eq!(platform.items("models/schemas")[0]["usedFor"], json!("node"));
    }

    #[tokio::test]
    async fn test_immutable_change_recreates_when_allowed() {
        let (kind, platform) = setup("schemas");
        platform.seed("models/schemas", schema("node"));
        let options = ExecutorOptions {
            allow_recreate: true,
            ..options()
        };

        let plan1 = plan(&kind, &[schema("edge")], &platform.items("models/schemas"));
        let exec = KindExecutor::new(&kind, &options).execute(&plan1).await;
        assert_eq!(exec.result.changed, 1);
        assert!(!exec.result.failed);
        let ops: Vec<&str> = platform.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec!["delete", "create"]);

        let plan2 = plan(&kind, &[schema("edge")], &platform.items("models/schemas"));
        assert_eq!(plan2.count(Action::Unchanged), 1);
    }

    #[tokio::test]
    async fn test_expired_deadline_interrupts_before_first_batch() {
        let (kind, platform) = setup("datasets");
        let plan = plan(&kind, &[json!({ "externalId": "a" })], &[]);
        let options = ExecutorOptions {
            deadline: Instant::now().checked_sub(Duration::from_secs(1)),
            ..options()
        };
        let exec = KindExecutor::new(&kind, &options).execute(&plan).await;

        assert!(exec.interrupted);
        assert!(!exec.result.failed);
        assert_eq!(platform.mutation_calls(), 0);
    }
}
