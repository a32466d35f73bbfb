//! The uniform CRUD contract every resource kind satisfies.
//!
//! Each capability is its own trait so that generic code can ask for only
//! what it uses; [`ResourceKind`] combines them for registry entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::capability::CapabilitySet;
use super::descriptor::{Fields, LocalDescriptor, RemoteDescriptor};
use super::identifier::Identifier;
use crate::error::Result;

/// How updates are sent to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Send only the fields that differ.
    #[default]
    Patch,
    /// Send the full desired record.
    Replace,
}

/// One field change inside a patch update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldPatch {
    /// Overwrite the field.
    Set(Value),
    /// Clear the field.
    SetNull,
    /// Add and remove elements of a set-like list field.
    Modify {
        /// Elements to add.
        add: Vec<Value>,
        /// Elements to remove.
        remove: Vec<Value>,
    },
}

/// Update request for one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// Full replacement of every mutable field.
    Replace {
        /// Target instance.
        identifier: Identifier,
        /// Desired fields, without identifier or immutable fields.
        fields: Fields,
    },
    /// Field-level patch.
    Patch {
        /// Target instance.
        identifier: Identifier,
        /// Per-field changes.
        changes: BTreeMap<String, FieldPatch>,
    },
}

impl FieldPatch {
    fn to_wire(&self) -> Value {
        let mut op = Map::new();
        match self {
            Self::Set(value) => {
                op.insert(String::from("set"), value.clone());
            }
            Self::SetNull => {
                op.insert(String::from("setNull"), Value::Bool(true));
            }
            Self::Modify { add, remove } => {
                op.insert(String::from("add"), Value::Array(add.clone()));
                op.insert(String::from("remove"), Value::Array(remove.clone()));
            }
        }
        Value::Object(op)
    }
}

impl UpdatePayload {
    /// Returns the target identifier.
    #[must_use]
    pub const fn identifier(&self) -> &Identifier {
        match self {
            Self::Replace { identifier, .. } | Self::Patch { identifier, .. } => identifier,
        }
    }

    /// Returns the names of the fields this payload touches.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        match self {
            Self::Replace { fields, .. } => fields.keys().cloned().collect(),
            Self::Patch { changes, .. } => changes.keys().cloned().collect(),
        }
    }

    /// Encodes the payload for the update endpoint.
    ///
    /// The identifier parts sit at the top level next to either an `update`
    /// object of field operations or a `replace` object of fields.
    #[must_use]
    pub fn to_wire(&self, encoded_identifier: Value) -> Value {
        let mut item = match encoded_identifier {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(String::from("id"), other);
                map
            }
        };
        match self {
            Self::Replace { fields, .. } => {
                item.insert(String::from("replace"), Value::Object(fields.clone()));
            }
            Self::Patch { changes, .. } => {
                let update = changes
                    .iter()
                    .map(|(field, patch)| (field.clone(), patch.to_wire()))
                    .collect();
                item.insert(String::from("update"), Value::Object(update));
            }
        }
        Value::Object(item)
    }
}

/// Static facts about a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindInfo {
    /// Unique kind name, e.g. `schemas`.
    pub name: String,
    /// Human-readable name used for ordering and reports.
    pub display_name: String,
    /// Kinds this kind references.
    pub dependencies: Vec<String>,
    /// Whether existing instances can be updated in place.
    pub supports_update: bool,
    /// Whether instances can be deleted.
    pub supports_drop: bool,
}

/// Computes instance identifiers.
pub trait Identifiable {
    /// Extracts the identifier from raw fields.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier field is missing.
    fn identify(&self, fields: &Fields) -> Result<Identifier>;

    /// Encodes an identifier for the platform.
    fn encode_identifier(&self, identifier: &Identifier) -> Value {
        identifier.to_wire()
    }
}

/// Normalization and update-payload construction.
pub trait Diffable: Identifiable {
    /// Normalizes a remote record for comparison against `local`.
    fn normalize_for_diff(&self, remote: &Fields, local: &Fields) -> Fields;

    /// Normalizes a local record for comparison.
    fn normalize_local(&self, local: &Fields) -> Fields;

    /// Builds the update payload from two normalized records.
    fn update_payload(
        &self,
        identifier: &Identifier,
        local: &Fields,
        remote: &Fields,
        mode: UpdateMode,
    ) -> UpdatePayload;

    /// Returns true if `field` is part of the identifier.
    fn is_identifier_field(&self, _field: &str) -> bool {
        false
    }

    /// Returns true if `field` cannot be changed after creation.
    fn is_immutable_field(&self, _field: &str) -> bool {
        false
    }
}

/// Batch retrieval by identifier.
#[async_trait]
pub trait Retrievable {
    /// Retrieves instances by identifier.
    ///
    /// # Errors
    ///
    /// With `ignore_unknown == false`, an unknown identifier is a permanent
    /// platform error.
    async fn retrieve(
        &self,
        identifiers: &[Identifier],
        ignore_unknown: bool,
    ) -> Result<Vec<RemoteDescriptor>>;
}

/// Batch creation.
#[async_trait]
pub trait Creatable {
    /// Creates instances from local field sets.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error.
    async fn create(&self, items: &[Fields]) -> Result<Vec<RemoteDescriptor>>;
}

/// Batch update.
#[async_trait]
pub trait Updatable {
    /// Applies update payloads.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error.
    async fn update(&self, payloads: &[UpdatePayload]) -> Result<Vec<RemoteDescriptor>>;
}

/// Batch deletion.
#[async_trait]
pub trait Deletable {
    /// Deletes instances and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error.
    async fn delete(&self, identifiers: &[Identifier]) -> Result<usize>;
}

/// Full enumeration of the remote extent.
pub trait Iterable {
    /// Returns a fresh pager positioned at the first page.
    fn iterate(&self) -> RemotePager;
}

/// A kind registered in the engine.
pub trait ResourceKind:
    Diffable + Retrievable + Creatable + Updatable + Deletable + Iterable + Send + Sync
{
    /// Returns the static kind facts.
    fn info(&self) -> &KindInfo;

    /// Returns `(field, kind)` pairs for references discovered in `local`.
    fn dynamic_dependencies(&self, _local: &LocalDescriptor) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Returns the capabilities needed to act on `items`.
    fn required_capabilities(&self, items: &[&Fields], read_only: bool) -> CapabilitySet;
}

/// One page of a remote listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Items on this page.
    pub items: Vec<RemoteDescriptor>,
    /// Cursor of the next page, if any.
    pub next_cursor: Option<String>,
}

/// Backend of a [`RemotePager`].
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches one page.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error.
    async fn fetch(&self, cursor: Option<String>, limit: usize) -> Result<Page>;
}

/// Lazy, finite cursor over a kind's remote instances.
///
/// Only the current page is held in memory. Calling
/// [`Iterable::iterate`] again starts over.
pub struct RemotePager {
    source: Arc<dyn PageSource>,
    page_size: usize,
    cursor: Option<String>,
    exhausted: bool,
}

impl RemotePager {
    /// Creates a pager over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Returns the next page, or `None` once the listing is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the classified platform error of the page request.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteDescriptor>>> {
        if self.exhausted {
            return Ok(None);
        }

        // The cursor only advances on success, so a failed page can be retried.
        let page = self.source.fetch(self.cursor.clone(), self.page_size).await?;
        match page.next_cursor {
            Some(cursor) => self.cursor = Some(cursor),
            None => {
                self.cursor = None;
                self.exhausted = true;
            }
        }

        if page.items.is_empty() && self.exhausted {
            return Ok(None);
        }
        Ok(Some(page.items))
    }

    /// Drains every remaining page.
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn collect_all(mut self) -> Result<Vec<RemoteDescriptor>> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }
}

impl std::fmt::Debug for RemotePager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePager")
            .field("page_size", &self.page_size)
            .field("cursor", &self.cursor)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}
