//! Remote platform access.
//!
//! [`PlatformApi`] is the seam between the engine and the network: one
//! request per kind operation, no retries. Retrying belongs to the executor.

mod client;
#[cfg(test)]
pub(crate) mod memory;
mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::kinds::CapabilitySet;

pub use client::PlatformClient;
pub use types::ListPage;

/// Operations the platform exposes for every kind.
///
/// `path` is the kind's resource path below the project URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Lists one page of instances.
    async fn list(&self, path: &str, cursor: Option<String>, limit: usize) -> Result<ListPage>;

    /// Retrieves instances by encoded identifier.
    async fn retrieve(
        &self,
        path: &str,
        ids: Vec<Value>,
        ignore_unknown: bool,
    ) -> Result<Vec<Value>>;

    /// Creates instances.
    async fn create(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>>;

    /// Updates instances.
    async fn update(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>>;

    /// Deletes instances by encoded identifier.
    async fn delete(&self, path: &str, ids: Vec<Value>) -> Result<usize>;

    /// Returns the capabilities granted to the caller.
    async fn inspect_capabilities(&self) -> Result<CapabilitySet>;
}
