//! Resource kinds.
//!
//! This module defines the data model shared by every stage (identifiers,
//! descriptors, capabilities), the CRUD contract kinds implement, the
//! table of concrete kinds, and the registry that maps names to them.

mod api_kind;
mod capability;
mod contract;
mod descriptor;
mod identifier;
mod registry;
mod table;

pub use api_kind::ApiKind;
pub use capability::{AclAction, Capability, CapabilityScope, CapabilitySet};
pub use contract::{
    Creatable, Deletable, Diffable, FieldPatch, Identifiable, Iterable, KindInfo, Page,
    PageSource, RemotePager, ResourceKind, Retrievable, UpdateMode, UpdatePayload, Updatable,
};
pub use descriptor::{Fields, LocalDescriptor, RemoteDescriptor};
pub use identifier::Identifier;
pub use registry::KindRegistry;
pub use table::{standard_kind, DefaultValue, KindSpec, STANDARD_KINDS};
