//! Deploy orchestrator.
//!
//! Runs every kind of a selection in dependency order. Kinds on the same
//! level run concurrently on a bounded pool; a kind whose dependency failed
//! or was skipped is skipped in turn. Each kind is claimed, checked for
//! capabilities, planned and executed; its outcome never aborts the others.
//! Runs with a time budget stop between levels or batches and leave a
//! checkpoint that a later run with the same key resumes from.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ReconcileError, Result, StateError, SyncError};
use crate::kinds::{CapabilitySet, Fields, KindRegistry, LocalDescriptor, ResourceKind};
use crate::planner::{
    Action, DependencyGraph, ExecutorOptions, ItemFailure, KindExecutor, KindPlan,
    ResourceDeployResult, SyncMode,
};
use crate::reconciler::Reconciler;
use crate::state::{put_latest, CheckpointStore, ClaimManager, PartialProgress, RunCheckpoint};

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Maximum kinds processed at once within a level.
    pub workers: usize,
    /// Plan and report without mutating anything.
    pub dry_run: bool,
    /// Batch, retry and recreate settings. The deadline is set per run.
    pub executor: ExecutorOptions,
    /// Wall-clock budget of the whole run.
    pub time_budget: Option<Duration>,
    /// Time kept in reserve at the end of the budget.
    pub safety_margin: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            dry_run: false,
            executor: ExecutorOptions::default(),
            time_budget: None,
            safety_margin: Duration::from_secs(30),
        }
    }
}

/// One invocation of the engine.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// What to do.
    pub mode: SyncMode,
    /// Every local descriptor of the run.
    pub descriptors: Vec<LocalDescriptor>,
    /// Kinds to process. Empty means every kind that has descriptors.
    pub selection: Vec<String>,
    /// Key under which progress is checkpointed, if resumable.
    pub run_key: Option<String>,
}

/// Final state of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum KindStatus {
    /// Every planned action was applied.
    Completed,
    /// The kind ran but did not finish cleanly.
    Failed {
        /// What went wrong.
        reason: String,
    },
    /// The kind was not attempted, or stopped before mutating.
    Skipped {
        /// Why it was not run.
        reason: String,
    },
}

impl KindStatus {
    /// Returns true for [`KindStatus::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for KindStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::Skipped { .. } => write!(f, "skipped"),
        }
    }
}

/// Outcome of one kind.
#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    /// Kind name.
    pub kind: String,
    /// Display name.
    pub display_name: String,
    /// Final status.
    #[serde(flatten)]
    pub status: KindStatus,
    /// Counters.
    pub result: ResourceDeployResult,
    /// Items that could not be applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
    /// Remote records carried back in pull mode.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pulled: Vec<Fields>,
    /// Non-fatal remarks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// The result was carried over from a checkpoint.
    pub resumed: bool,
}

impl KindReport {
    fn new(kind: &dyn ResourceKind, status: KindStatus) -> Self {
        let info = kind.info();
        Self {
            kind: info.name.clone(),
            display_name: info.display_name.clone(),
            status,
            result: ResourceDeployResult::new(info.name.clone()),
            failures: Vec::new(),
            pulled: Vec::new(),
            warnings: Vec::new(),
            resumed: false,
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every kind completed.
    Completed,
    /// At least one kind failed or was skipped.
    Failed,
    /// The time budget ran out; a checkpoint was left behind.
    Suspended,
}

/// Everything a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Mode of the run.
    pub mode: SyncMode,
    /// Nothing was mutated.
    pub dry_run: bool,
    /// Order in which kinds were visited.
    pub order: Vec<String>,
    /// Per-kind outcomes, in visiting order.
    pub kinds: Vec<KindReport>,
    /// Informational notes from graph construction.
    pub notes: Vec<String>,
    /// Overall status.
    pub status: RunStatus,
}

impl RunReport {
    /// Returns true if every kind completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Returns the report of `kind`.
    #[must_use]
    pub fn kind(&self, kind: &str) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Sums the counters of every kind.
    #[must_use]
    pub fn totals(&self) -> (usize, usize, usize, usize, usize) {
        self.kinds.iter().fold((0, 0, 0, 0, 0), |acc, k| {
            (
                acc.0 + k.result.created,
                acc.1 + k.result.deleted,
                acc.2 + k.result.changed,
                acc.3 + k.result.unchanged,
                acc.4 + k.result.total,
            )
        })
    }
}

/// Everything a worker needs to process one kind.
struct KindJob {
    kind: Arc<dyn ResourceKind>,
    locals: Vec<LocalDescriptor>,
    mode: SyncMode,
    dry_run: bool,
    reconciler: Reconciler,
    executor: ExecutorOptions,
    granted: Arc<CapabilitySet>,
    claims: Option<Arc<ClaimManager>>,
    prior: Option<PartialProgress>,
}

/// What a worker hands back.
struct KindOutcome {
    report: KindReport,
    applied: Vec<String>,
    interrupted: bool,
}

impl KindJob {
    async fn run(self) -> KindOutcome {
        let name = self.kind.info().name.clone();

        let claim = match (&self.claims, self.dry_run) {
            (Some(claims), false) => match claims.claim(&name).await {
                Ok(claim) => Some(claim),
                Err(err) => {
                    warn!("{name}: {err}");
                    return self.finish(KindStatus::Skipped { reason: err.to_string() });
                }
            },
            _ => None,
        };

        let outcome = self.process().await;

        if let (Some(claims), Some(claim)) = (&self.claims, claim)
            && let Err(err) = claims.release(&claim).await
        {
            warn!("{name}: failed to release claim: {err}");
        }
        outcome
    }

    async fn process(&self) -> KindOutcome {
        let info = self.kind.info();

        // Listing the whole extent needs unscoped read access.
        let read_items: Vec<&Fields> = if self.mode.lists_remote() {
            Vec::new()
        } else {
            self.locals.iter().map(|l| &l.fields).collect()
        };
        if (self.mode.lists_remote() || !self.locals.is_empty())
            && let Some(reason) = self.missing(&self.kind.required_capabilities(&read_items, true))
        {
            return self.finish(KindStatus::Skipped { reason });
        }

        let planned = self
            .reconciler
            .plan_kind(self.kind.as_ref(), &self.locals, self.mode)
            .await;
        let plan = match planned {
            Ok(plan) => plan,
            Err(err) => {
                error!("{}: planning failed: {err}", info.name);
                return self.finish(KindStatus::Failed { reason: err.to_string() });
            }
        };

        let mut outcome = self.apply(&plan).await;
        self.carry_over(&plan, &mut outcome);
        outcome
    }

    async fn apply(&self, plan: &KindPlan) -> KindOutcome {
        let mut report = KindReport::new(self.kind.as_ref(), KindStatus::Completed);
        report.warnings.clone_from(&plan.warnings);
        report.pulled.clone_from(&plan.pulled);

        if plan.is_noop() {
            report.result = plan.planned_result();
            return KindOutcome {
                report,
                applied: Vec::new(),
                interrupted: false,
            };
        }

        let required = self.kind.required_capabilities(&plan.mutated_fields(), false);
        if let Some(reason) = self.missing(&required) {
            report.status = KindStatus::Skipped { reason };
            return KindOutcome {
                report,
                applied: Vec::new(),
                interrupted: false,
            };
        }

        if self.dry_run {
            report.result = plan.planned_result();
            return KindOutcome {
                report,
                applied: Vec::new(),
                interrupted: false,
            };
        }

        let exec = KindExecutor::new(self.kind.as_ref(), &self.executor)
            .execute(plan)
            .await;
        report.status = if let Some(fatal) = &exec.fatal {
            KindStatus::Failed { reason: fatal.clone() }
        } else if exec.interrupted {
            KindStatus::Skipped {
                reason: String::from("time budget reached"),
            }
        } else if exec.result.failed {
            KindStatus::Failed {
                reason: format!("{} item(s) failed", exec.failures.len()),
            }
        } else {
            KindStatus::Completed
        };
        report.result = exec.result;
        report.failures = exec.failures;
        KindOutcome {
            report,
            applied: exec.applied,
            interrupted: exec.interrupted,
        }
    }

    /// Folds the progress of an interrupted earlier session into `outcome`.
    fn carry_over(&self, plan: &KindPlan, outcome: &mut KindOutcome) {
        let Some(prior) = &self.prior else {
            return;
        };
        let carried = plan
            .diffs
            .iter()
            .filter(|d| {
                d.action == Action::Unchanged && prior.applied.contains(&d.identifier.to_string())
            })
            .count();
        let name = &self.kind.info().name;
        debug!("{name}: carrying over {carried} item(s) applied in an earlier session");
        if let Err(err) = outcome.report.result.resume(&prior.result, carried) {
            warn!("{name}: {err}");
        }
        outcome.report.resumed = true;
        outcome.applied.splice(0..0, prior.applied.iter().cloned());
    }

    /// Returns the skip reason if `required` is not granted.
    fn missing(&self, required: &CapabilitySet) -> Option<String> {
        let missing = self.granted.missing(required);
        if missing.is_empty() {
            return None;
        }
        let err = ReconcileError::MissingCapabilities {
            kind: self.kind.info().name.clone(),
            missing: missing.iter().map(ToString::to_string).collect(),
        };
        warn!("{err}");
        Some(err.to_string())
    }

    fn finish(&self, status: KindStatus) -> KindOutcome {
        KindOutcome {
            report: KindReport::new(self.kind.as_ref(), status),
            applied: Vec::new(),
            interrupted: false,
        }
    }
}

/// Runs kinds in dependency order.
pub struct DeployOrchestrator {
    registry: Arc<KindRegistry>,
    granted: Arc<CapabilitySet>,
    reconciler: Reconciler,
    options: OrchestratorOptions,
    store: Option<Arc<dyn CheckpointStore>>,
    claims: Option<Arc<ClaimManager>>,
}

impl std::fmt::Debug for DeployOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployOrchestrator")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("store", &self.store.as_ref().map(|s| s.backend_type()))
            .finish_non_exhaustive()
    }
}

impl DeployOrchestrator {
    /// Creates an orchestrator over `registry` with the capabilities the
    /// caller was granted.
    #[must_use]
    pub fn new(
        registry: Arc<KindRegistry>,
        granted: CapabilitySet,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            registry,
            granted: Arc::new(granted),
            reconciler,
            options: OrchestratorOptions::default(),
            store: None,
            claims: None,
        }
    }

    /// Sets the run options.
    #[must_use]
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables checkpoints and claims on `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>, claims: ClaimManager) -> Self {
        self.store = Some(store);
        self.claims = Some(Arc::new(claims));
        self
    }

    /// Groups descriptors by kind and rejects unknown kinds and duplicate
    /// identifiers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, or the identification error of a
    /// descriptor without identifier.
    pub fn group(
        &self,
        descriptors: &[LocalDescriptor],
    ) -> Result<BTreeMap<String, Vec<LocalDescriptor>>> {
        let mut grouped: BTreeMap<String, Vec<LocalDescriptor>> = BTreeMap::new();
        let mut seen: BTreeMap<(String, String), &LocalDescriptor> = BTreeMap::new();

        for descriptor in descriptors {
            let Some(kind) = self.registry.get(&descriptor.kind) else {
                return Err(ConfigError::UnknownKind {
                    kind: descriptor.kind.clone(),
                    referenced_by: Some(descriptor.source.display().to_string()),
                }
                .into());
            };
            let identifier = kind.identify(&descriptor.fields)?.to_string();
            let key = (descriptor.kind.clone(), identifier);
            if let Some(first) = seen.get(&key) {
                return Err(ConfigError::DuplicateIdentifier {
                    kind: key.0,
                    identifier: key.1,
                    first: first.source.clone(),
                    second: descriptor.source.clone(),
                }
                .into());
            }
            seen.insert(key, descriptor);
            grouped
                .entry(descriptor.kind.clone())
                .or_default()
                .push(descriptor.clone());
        }
        Ok(grouped)
    }

    /// Builds the dependency graph of a request without running it.
    ///
    /// # Errors
    ///
    /// Returns the configuration error that would abort the run.
    pub fn graph(&self, request: &RunRequest) -> Result<DependencyGraph> {
        let grouped = self.group(&request.descriptors)?;
        let selection = Self::selection(request, &grouped);
        Ok(DependencyGraph::build(&self.registry, &selection, &grouped)?)
    }

    fn selection(
        request: &RunRequest,
        grouped: &BTreeMap<String, Vec<LocalDescriptor>>,
    ) -> Vec<String> {
        if request.selection.is_empty() {
            grouped.keys().cloned().collect()
        } else {
            request.selection.clone()
        }
    }

    async fn load_checkpoint(
        &self,
        run_key: &str,
        mode: SyncMode,
    ) -> Result<(RunCheckpoint, Option<u64>)> {
        let Some(store) = &self.store else {
            return Ok((RunCheckpoint::new(run_key, mode), None));
        };
        match store.get(&RunCheckpoint::store_key(run_key)).await? {
            Some(record) => {
                let checkpoint: RunCheckpoint = record.decode()?;
                info!(
                    "Resuming run {run_key}: {} kind(s) already completed",
                    checkpoint.completed.len()
                );
                Ok((checkpoint, Some(record.version)))
            }
            None => Ok((RunCheckpoint::new(run_key, mode), None)),
        }
    }

    async fn save_checkpoint(
        &self,
        checkpoint: &RunCheckpoint,
        version: Option<u64>,
    ) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| SyncError::internal(format!("Failed to serialize checkpoint: {e}")))?;
        let key = RunCheckpoint::store_key(&checkpoint.run_key);
        match store.put_if_version(&key, version, value.clone()).await {
            Ok(record) => {
                info!("Checkpoint {key} saved (v{})", record.version);
                Ok(())
            }
            Err(SyncError::State(StateError::VersionConflict { .. })) => {
                warn!("Checkpoint {key} moved underneath us, overwriting");
                put_latest(store.as_ref(), &key, value).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns the blocking dependency of `kind`, if any.
    fn blocker(
        graph: &DependencyGraph,
        kind: &str,
        mode: SyncMode,
        reports: &BTreeMap<String, KindReport>,
    ) -> Option<String> {
        let before = if mode.is_reverse() {
            graph.consumers_of(kind)
        } else {
            graph.producers_of(kind)
        };
        before
            .into_iter()
            .find(|other| reports.get(other).is_some_and(|r| !r.status.is_completed()))
    }

    /// Executes a run.
    ///
    /// # Errors
    ///
    /// Returns configuration errors before anything is contacted, and
    /// checkpoint store errors. Kind-level failures are reported, not
    /// returned.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let mode = request.mode;
        let dry_run = self.options.dry_run;
        let grouped = self.group(&request.descriptors)?;
        let selection = Self::selection(&request, &grouped);
        let graph = DependencyGraph::build(&self.registry, &selection, &grouped)?;
        let selected: BTreeSet<&String> = selection.iter().collect();

        let mut levels = graph.levels().to_vec();
        if mode.is_reverse() {
            levels.reverse();
        }
        let order: Vec<String> = levels.iter().flatten().cloned().collect();
        info!(
            "Starting {mode}{} over {} kind(s): {}",
            if dry_run { " (dry run)" } else { "" },
            order.len(),
            order.join(", ")
        );
        for note in graph.notes() {
            info!("{note}");
        }

        let resumable = request.run_key.as_ref().filter(|_| !dry_run && self.store.is_some());
        let (mut checkpoint, mut version) = match resumable {
            Some(key) => self.load_checkpoint(key, mode).await?,
            None => (RunCheckpoint::new(request.run_key.clone().unwrap_or_default(), mode), None),
        };

        let deadline = self
            .options
            .time_budget
            .map(|budget| Instant::now() + budget.saturating_sub(self.options.safety_margin));
        let mut executor = self.options.executor.clone();
        executor.deadline = deadline;

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut reports: BTreeMap<String, KindReport> = BTreeMap::new();
        let mut suspended = false;

        for level in &levels {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Time budget reached before level {}", level.join(", "));
                suspended = true;
                break;
            }

            let mut tasks = JoinSet::new();
            for name in level {
                let Some(kind) = self.registry.get(name).cloned() else {
                    continue;
                };

                if let Some(result) = checkpoint.completed.get(name) {
                    let mut report = KindReport::new(kind.as_ref(), KindStatus::Completed);
                    report.result = result.clone();
                    report.resumed = true;
                    debug!("{name}: completed in an earlier session");
                    reports.insert(name.clone(), report);
                    continue;
                }

                if let Some(dependency) = Self::blocker(&graph, name, mode, &reports) {
                    let reason = format!("dependency {dependency} did not complete");
                    warn!("{name}: skipped, {reason}");
                    reports.insert(
                        name.clone(),
                        KindReport::new(kind.as_ref(), KindStatus::Skipped { reason }),
                    );
                    continue;
                }

                if mode.is_reverse() && !selected.contains(name) {
                    let mut report = KindReport::new(kind.as_ref(), KindStatus::Completed);
                    report
                        .warnings
                        .push(String::from("included for ordering only; left untouched"));
                    reports.insert(name.clone(), report);
                    continue;
                }

                let job = KindJob {
                    kind,
                    locals: grouped.get(name).cloned().unwrap_or_default(),
                    mode,
                    dry_run,
                    reconciler: self.reconciler,
                    executor: executor.clone(),
                    granted: Arc::clone(&self.granted),
                    claims: self.claims.clone(),
                    prior: checkpoint.partial.get(name).cloned(),
                };
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    job.run().await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome =
                    joined.map_err(|e| SyncError::internal(format!("Worker panicked: {e}")))?;
                let name = outcome.report.kind.clone();
                match &outcome.report.status {
                    KindStatus::Completed => {
                        info!("{name}: {}", summary(&outcome.report.result));
                        checkpoint.complete(outcome.report.result.clone());
                    }
                    KindStatus::Failed { reason } => error!("{name}: failed: {reason}"),
                    KindStatus::Skipped { reason } => warn!("{name}: skipped: {reason}"),
                }
                if outcome.interrupted {
                    suspended = true;
                    checkpoint.partial.insert(
                        name.clone(),
                        PartialProgress {
                            result: outcome.report.result.clone(),
                            applied: outcome.applied,
                        },
                    );
                }
                reports.insert(name, outcome.report);
            }

            if suspended {
                break;
            }
        }

        let kinds: Vec<KindReport> = order
            .iter()
            .filter_map(|name| reports.remove(name))
            .collect();

        let status = if suspended {
            RunStatus::Suspended
        } else if kinds.len() == order.len() && kinds.iter().all(|k| k.status.is_completed()) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        if resumable.is_some() {
            if status == RunStatus::Suspended {
                checkpoint.remaining = order
                    .iter()
                    .filter(|k| !checkpoint.is_completed(k))
                    .cloned()
                    .collect();
                checkpoint.saved_at = chrono::Utc::now();
                self.save_checkpoint(&checkpoint, version.take()).await?;
            } else if let Some(store) = &self.store {
                store.delete(&RunCheckpoint::store_key(&checkpoint.run_key)).await?;
            }
        }

        info!("Run finished: {status:?}");
        Ok(RunReport {
            mode,
            dry_run,
            order,
            kinds,
            notes: graph.notes().to_vec(),
            status,
        })
    }
}

fn summary(result: &ResourceDeployResult) -> String {
    format!(
        "{} created, {} deleted, {} changed, {} unchanged",
        result.created, result.deleted, result.changed, result.unchanged
    )
}
