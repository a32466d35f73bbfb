//! A [`ResourceKind`] backed by a [`KindSpec`] row and the platform API.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::capability::{AclAction, Capability, CapabilitySet};
use super::contract::{
    Creatable, Deletable, Diffable, FieldPatch, Identifiable, Iterable, KindInfo, Page,
    PageSource, RemotePager, ResourceKind, Retrievable, UpdateMode, UpdatePayload, Updatable,
};
use super::descriptor::{Fields, LocalDescriptor, RemoteDescriptor};
use super::identifier::Identifier;
use super::table::KindSpec;
use crate::error::{ReconcileError, Result};
use crate::platform::PlatformApi;

/// Kind implementation driven by its table row.
pub struct ApiKind {
    spec: KindSpec,
    info: KindInfo,
    api: Arc<dyn PlatformApi>,
    page_size: usize,
}

impl ApiKind {
    /// Creates a kind over `api`.
    #[must_use]
    pub fn new(spec: KindSpec, api: Arc<dyn PlatformApi>, page_size: usize) -> Self {
        let info = KindInfo {
            name: spec.name.to_string(),
            display_name: spec.display_name.to_string(),
            dependencies: spec.dependencies.iter().map(ToString::to_string).collect(),
            supports_update: spec.supports_update,
            supports_drop: spec.supports_drop,
        };
        Self {
            spec,
            info,
            api,
            page_size,
        }
    }

    /// Returns the table row.
    #[must_use]
    pub const fn spec(&self) -> &KindSpec {
        &self.spec
    }

    /// Sorts and dedups set-like list fields so element order never differs.
    fn canonical(&self, field: &str, value: &Value) -> Value {
        match value {
            Value::Array(items) if self.spec.is_container(field) => {
                let mut items = items.clone();
                items.sort_by_key(ToString::to_string);
                items.dedup();
                Value::Array(items)
            }
            other => other.clone(),
        }
    }

    fn is_mutable(&self, field: &str) -> bool {
        !(self.spec.is_identifier_field(field) || self.spec.is_immutable(field))
    }

    fn encode_all(&self, identifiers: &[Identifier]) -> Vec<Value> {
        identifiers.iter().map(|id| self.encode_identifier(id)).collect()
    }
}

impl std::fmt::Debug for ApiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKind")
            .field("name", &self.spec.name)
            .field("resource_path", &self.spec.resource_path)
            .finish_non_exhaustive()
    }
}

impl Identifiable for ApiKind {
    fn identify(&self, fields: &Fields) -> Result<Identifier> {
        let mut parts = Vec::with_capacity(self.spec.identifier_fields.len());
        for field in self.spec.identifier_fields {
            let value = match fields.get(*field) {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(ReconcileError::InvalidDescriptor {
                        kind: self.spec.name.to_string(),
                        message: format!("missing identifier field '{field}'"),
                    }
                    .into());
                }
            };
            parts.push(((*field).to_string(), value));
        }
        Ok(Identifier::new(parts))
    }
}

impl Diffable for ApiKind {
    fn normalize_for_diff(&self, remote: &Fields, local: &Fields) -> Fields {
        remote
            .iter()
            .filter(|(field, value)| {
                if local.contains_key(field.as_str()) {
                    return true;
                }
                !(self.spec.is_server_field(field)
                    || value.is_null()
                    || self.spec.default_for(field).as_ref() == Some(*value))
            })
            .map(|(field, value)| (field.clone(), self.canonical(field, value)))
            .collect()
    }

    fn normalize_local(&self, local: &Fields) -> Fields {
        local
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| (field.clone(), self.canonical(field, value)))
            .collect()
    }

    fn update_payload(
        &self,
        identifier: &Identifier,
        local: &Fields,
        remote: &Fields,
        mode: UpdateMode,
    ) -> UpdatePayload {
        match mode {
            UpdateMode::Replace => UpdatePayload::Replace {
                identifier: identifier.clone(),
                fields: local
                    .iter()
                    .filter(|(field, _)| self.is_mutable(field))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            UpdateMode::Patch => {
                let mut changes = BTreeMap::new();
                for (field, value) in local.iter().filter(|(f, _)| self.is_mutable(f)) {
                    let current = remote.get(field);
                    if current == Some(value) {
                        continue;
                    }
                    let patch = match (value, current) {
                        (Value::Array(wanted), Some(Value::Array(have)))
                            if self.spec.is_container(field) =>
                        {
                            let add = wanted.iter().filter(|v| !have.contains(v));
                            let remove = have.iter().filter(|v| !wanted.contains(v));
                            FieldPatch::Modify {
                                add: add.cloned().collect(),
                                remove: remove.cloned().collect(),
                            }
                        }
                        _ => FieldPatch::Set(value.clone()),
                    };
                    changes.insert(field.clone(), patch);
                }
                let dropped = remote
                    .keys()
                    .filter(|f| self.is_mutable(f) && !local.contains_key(*f));
                for field in dropped {
                    changes.insert(field.clone(), FieldPatch::SetNull);
                }
                UpdatePayload::Patch {
                    identifier: identifier.clone(),
                    changes,
                }
            }
        }
    }

    fn is_identifier_field(&self, field: &str) -> bool {
        self.spec.is_identifier_field(field)
    }

    fn is_immutable_field(&self, field: &str) -> bool {
        self.spec.is_immutable(field)
    }
}

#[async_trait]
impl Retrievable for ApiKind {
    async fn retrieve(
        &self,
        identifiers: &[Identifier],
        ignore_unknown: bool,
    ) -> Result<Vec<RemoteDescriptor>> {
        let items = self
            .api
            .retrieve(self.spec.resource_path, self.encode_all(identifiers), ignore_unknown)
            .await?;
        Ok(items.into_iter().map(RemoteDescriptor::from_value).collect())
    }
}

#[async_trait]
impl Creatable for ApiKind {
    async fn create(&self, items: &[Fields]) -> Result<Vec<RemoteDescriptor>> {
        let body = items.iter().cloned().map(Value::Object).collect();
        let created = self.api.create(self.spec.resource_path, body).await?;
        Ok(created.into_iter().map(RemoteDescriptor::from_value).collect())
    }
}

#[async_trait]
impl Updatable for ApiKind {
    async fn update(&self, payloads: &[UpdatePayload]) -> Result<Vec<RemoteDescriptor>> {
        let body = payloads
            .iter()
            .map(|p| p.to_wire(self.encode_identifier(p.identifier())))
            .collect();
        let updated = self.api.update(self.spec.resource_path, body).await?;
        Ok(updated.into_iter().map(RemoteDescriptor::from_value).collect())
    }
}

#[async_trait]
impl Deletable for ApiKind {
    async fn delete(&self, identifiers: &[Identifier]) -> Result<usize> {
        self.api
            .delete(self.spec.resource_path, self.encode_all(identifiers))
            .await
    }
}

/// Listing endpoint of one kind.
struct ListingSource {
    api: Arc<dyn PlatformApi>,
    path: &'static str,
}

#[async_trait]
impl PageSource for ListingSource {
    async fn fetch(&self, cursor: Option<String>, limit: usize) -> Result<Page> {
        let page = self.api.list(self.path, cursor, limit).await?;
        Ok(Page {
            items: page.items.into_iter().map(RemoteDescriptor::from_value).collect(),
            next_cursor: page.next_cursor,
        })
    }
}

impl Iterable for ApiKind {
    fn iterate(&self) -> RemotePager {
        let source = ListingSource {
            api: Arc::clone(&self.api),
            path: self.spec.resource_path,
        };
        RemotePager::new(Arc::new(source), self.page_size)
    }
}

impl ResourceKind for ApiKind {
    fn info(&self) -> &KindInfo {
        &self.info
    }

    fn dynamic_dependencies(&self, local: &LocalDescriptor) -> Vec<(String, String)> {
        self.spec
            .dynamic_references
            .iter()
            .filter(|(field, _)| local.field(field).is_some_and(|v| !v.is_null()))
            .map(|(field, kind)| ((*field).to_string(), (*kind).to_string()))
            .collect()
    }

    fn required_capabilities(&self, items: &[&Fields], read_only: bool) -> CapabilitySet {
        let action = if read_only {
            AclAction::Read
        } else {
            AclAction::Write
        };

        let scoped: Option<BTreeSet<String>> = self.spec.scope_field.and_then(|field| {
            if items.is_empty() {
                return None;
            }
            items
                .iter()
                .map(|item| item.get(field).and_then(Value::as_str).map(ToString::to_string))
                .collect()
        });

        let capability = match scoped {
            Some(ids) => Capability::scoped(self.spec.acl, action, ids),
            None => Capability::all(self.spec.acl, action),
        };
        std::iter::once(capability).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::standard_kind;
    use crate::platform::memory::InMemoryPlatform;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn kind(name: &str) -> (ApiKind, Arc<InMemoryPlatform>) {
        let platform = Arc::new(InMemoryPlatform::standard());
        let spec = *standard_kind(name).expect("standard kind");
        (ApiKind::new(spec, platform.clone(), 2), platform)
    }

    #[test]
    fn test_identify_composite_and_missing() {
        let (schemas, _) = kind("schemas");
        let id = schemas
            .identify(&fields(json!({ "space": "sp", "externalId": "s1" })))
            .expect("identifier");
        assert_eq!(id.to_string(), "externalId:s1/space:sp");

        let err = schemas
            .identify(&fields(json!({ "externalId": "s1" })))
            .expect_err("missing space");
        assert!(err.to_string().contains("missing identifier field 'space'"));
    }

    #[tokio::test]
    async fn test_freshly_created_remote_normalizes_equal() {
        let (datasets, _) = kind("datasets");
        let local = fields(json!({ "externalId": "d1", "name": "Sales", "description": null }));
        let created = datasets.create(&[datasets.normalize_local(&local)]).await.expect("create");

        let remote = &created[0].fields;
        assert!(remote.contains_key("createdTime"));
        assert!(remote.contains_key("writeProtected"));
        assert_eq!(
            datasets.normalize_for_diff(remote, &local),
            datasets.normalize_local(&local)
        );
    }

    #[test]
    fn test_mentioned_default_participates() {
        let (datasets, _) = kind("datasets");
        let local = fields(json!({ "externalId": "d1", "writeProtected": true }));
        let remote = fields(json!({ "externalId": "d1", "writeProtected": false, "id": 7 }));
        let normalized = datasets.normalize_for_diff(&remote, &local);
        assert_eq!(normalized.get("writeProtected"), Some(&json!(false)));
        assert!(!normalized.contains_key("id"));
    }

    #[test]
    fn test_patch_payload_only_changed_fields() {
        let (pipelines, _) = kind("pipelines");
        let id = Identifier::single("externalId", "p1");
        let local = fields(json!({ "externalId": "p1", "name": "new", "labels": ["a", "c"] }));
        let remote = fields(json!({
            "externalId": "p1", "name": "old", "labels": ["a", "b"], "owner": "x"
        }));

        let payload = pipelines.update_payload(&id, &local, &remote, UpdateMode::Patch);
        let UpdatePayload::Patch { changes, .. } = payload else {
            panic!("expected patch payload");
        };
        assert_eq!(changes.get("name"), Some(&FieldPatch::Set(json!("new"))));
        assert_eq!(changes.get("owner"), Some(&FieldPatch::SetNull));
        assert_eq!(
            changes.get("labels"),
            Some(&FieldPatch::Modify {
                add: vec![json!("c")],
                remove: vec![json!("b")],
            })
        );
        assert!(!changes.contains_key("externalId"));
    }

    #[test]
    fn test_replace_strips_immutable_fields() {
        let (schedules, _) = kind("schedules");
        let id = Identifier::single("externalId", "s1");
        let local = fields(json!({
            "externalId": "s1", "pipelineExternalId": "p1", "cron": "0 * * * *"
        }));
        let payload = schedules.update_payload(&id, &local, &Fields::new(), UpdateMode::Replace);
        assert_eq!(payload.field_names(), vec!["cron"]);
    }

    #[test]
    fn test_container_order_is_ignored() {
        let (products, _) = kind("data_products");
        let local = fields(json!({ "space": "sp", "externalId": "dp", "tags": ["b", "a"] }));
        let remote = fields(json!({ "space": "sp", "externalId": "dp", "tags": ["a", "b"] }));
        assert_eq!(
            products.normalize_for_diff(&remote, &local),
            products.normalize_local(&local)
        );
    }

    #[test]
    fn test_dynamic_dependency_and_scoped_capability() {
        let (products, _) = kind("data_products");
        let local = LocalDescriptor::new(
            "data_products",
            fields(json!({ "space": "sp", "externalId": "dp", "sourcePipeline": "p1" })),
        );
        assert_eq!(
            products.dynamic_dependencies(&local),
            vec![(String::from("sourcePipeline"), String::from("pipelines"))]
        );

        let required = products.required_capabilities(&[&local.fields], false);
        let rendered: Vec<String> = required.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["dataproducts:write[sp]"]);

        let read_all = products.required_capabilities(&[], true);
        let rendered: Vec<String> = read_all.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["dataproducts:read"]);
    }

    #[tokio::test]
    async fn test_iterate_pages_through_everything() {
        let (datasets, platform) = kind("datasets");
        for i in 0..5 {
            platform.seed("datasets", json!({ "externalId": format!("d{i}") }));
        }
        let all = datasets.iterate().collect_all().await.expect("listing");
        assert_eq!(all.len(), 5);
        let lists = platform.calls().iter().filter(|c| c.op == "list").count();
        assert_eq!(lists, 3);
    }
}
