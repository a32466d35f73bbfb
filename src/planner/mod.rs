//! Planning module for reconciliation runs.
//!
//! This module orders kinds by dependency, classifies local/remote pairs,
//! turns classifications into per-kind plans for a sync mode, and executes
//! those plans in retried batches.

mod diff;
mod executor;
mod graph;
mod plan;
mod result;
mod retry;

pub use diff::{changed_fields, Action, DiffEngine, ResourceDiff};
pub use executor::{ExecutorOptions, KindExecution, KindExecutor};
pub use graph::{DependencyEdge, DependencyGraph, EdgeOrigin};
pub use plan::{KindPlan, SyncMode};
pub use result::{ItemFailure, ResourceDeployResult};
pub use retry::RetryPolicy;
