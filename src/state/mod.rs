//! Checkpoint and claim storage.
//!
//! Runs that stop on their time budget persist a [`RunCheckpoint`] and pick
//! up where they left off. Workers claim kinds before mutating them so two
//! runs never touch the same kind at once.

mod claim;
mod local;
#[cfg(test)]
pub(crate) mod memory;
mod s3;
mod store;
mod types;

pub use claim::{generate_holder_id, Claim, ClaimManager, CLAIM_TTL_SECS};
pub use local::LocalCheckpointStore;
pub use s3::S3CheckpointStore;
pub use store::{put_latest, CheckpointStore};
pub use types::{ClaimRecord, PartialProgress, RunCheckpoint, VersionedRecord};
