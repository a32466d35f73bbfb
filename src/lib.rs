// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # kindsync
//!
//! Dependency-ordered, idempotent reconciliation of declarative resource
//! kinds against a remote platform.
//!
//! ## Overview
//!
//! Resources are described locally as YAML descriptors grouped in modules.
//! kindsync compares them with what exists remotely and:
//!
//! - creates, updates or recreates instances in producer-first order (`deploy`)
//! - deletes remote instances with no local descriptor, consumers first (`clean`)
//! - deletes every remote instance of the selected kinds (`purge`)
//! - reports remote state without mutating anything (`pull`)
//!
//! ## Architecture
//!
//! 1. **Kinds**: a registry of typed kinds, each implementing only the CRUD
//!    capabilities the platform supports for it
//! 2. **Graph**: kind dependencies ordered into levels, cycles rejected
//! 3. **Reconciler**: local/remote classification into per-kind plans
//! 4. **Orchestrator**: levels run in order, kinds within a level in parallel,
//!    with retries, capability checks, claims and resumable checkpoints
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and descriptor loading
//! - [`kinds`]: Identifiers, descriptors, capabilities and the kind registry
//! - [`platform`]: Platform API seam and HTTP client
//! - [`planner`]: Dependency graph, diffing, plans, retries and execution
//! - [`reconciler`]: Remote retrieval and per-kind planning
//! - [`orchestrator`]: Run-level ordering, isolation and reporting
//! - [`state`]: Checkpoint stores (local, S3) and claims
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # modules/core/datasets.yaml
//! kind: datasets
//! items:
//!   - externalId: raw
//!     name: Raw data
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod kinds;
pub mod orchestrator;
pub mod planner;
pub mod platform;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DescriptorHasher, DescriptorLoader, SyncConfig};
pub use error::{Result, SyncError};
pub use kinds::{CapabilitySet, Identifier, KindRegistry, LocalDescriptor, ResourceKind};
pub use orchestrator::{DeployOrchestrator, OrchestratorOptions, RunReport, RunRequest};
pub use planner::{DependencyGraph, DiffEngine, SyncMode};
pub use platform::{PlatformApi, PlatformClient};
pub use reconciler::Reconciler;
pub use state::{CheckpointStore, ClaimManager, LocalCheckpointStore, S3CheckpointStore};
