//! In-memory platform used by engine tests.
//!
//! Behaves like the real API for the standard kinds: it assigns defaults and
//! server fields on create, understands patch and replace updates, pages
//! listings, and can inject transient or permanent failures.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ListPage, PlatformApi};
use crate::error::{PlatformError, Result, SyncError};
use crate::kinds::{AclAction, Capability, CapabilitySet, KindSpec, STANDARD_KINDS};

/// Field that makes the fake reject a create or update batch.
pub(crate) const REJECT_MARKER: &str = "rejectMe";

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: &'static str,
    pub path: String,
    pub items: usize,
}

#[derive(Default)]
struct Inner {
    stores: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<Call>,
    transient: BTreeMap<(String, String), u32>,
    clock: u64,
}

pub(crate) struct InMemoryPlatform {
    specs: Vec<KindSpec>,
    granted: CapabilitySet,
    inner: Mutex<Inner>,
}

impl InMemoryPlatform {
    /// A fake serving every standard kind, granting full access.
    pub fn standard() -> Self {
        Self::with_specs(STANDARD_KINDS.to_vec())
    }

    pub fn with_specs(specs: Vec<KindSpec>) -> Self {
        let granted = specs
            .iter()
            .map(|spec| Capability::all(spec.acl, AclAction::Write))
            .collect();
        Self {
            specs,
            granted,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_grants(mut self, granted: CapabilitySet) -> Self {
        self.granted = granted;
        self
    }

    /// Makes the next `times` calls of `op` on `path` fail with a 503.
    pub fn fail_transient(&self, op: &str, path: &str, times: u32) {
        self.lock()
            .transient
            .insert((op.to_string(), path.to_string()), times);
    }

    /// Stores an item directly, bypassing defaults and server fields.
    pub fn seed(&self, path: &str, item: Value) {
        let key = self.key_of(path, &item);
        self.lock()
            .stores
            .entry(path.to_string())
            .or_default()
            .insert(key, item);
    }

    pub fn items(&self, path: &str) -> Vec<Value> {
        self.lock()
            .stores
            .get(path)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of create, update and delete calls issued.
    pub fn mutation_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c.op, "create" | "update" | "delete"))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn spec(&self, path: &str) -> Result<&KindSpec> {
        self.specs
            .iter()
            .find(|spec| spec.resource_path == path)
            .ok_or_else(|| {
                PlatformError::from_status(404, format!("no endpoint {path}"), None).into()
            })
    }

    fn key_of(&self, path: &str, item: &Value) -> String {
        let fields: &[&str] = self
            .specs
            .iter()
            .find(|spec| spec.resource_path == path)
            .map_or(&["externalId"], |spec| spec.identifier_fields);
        fields
            .iter()
            .map(|field| {
                let value = item.get(*field).map_or_else(String::new, |v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                format!("{field}:{value}")
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Records the call and consumes one injected transient failure.
    fn enter(&self, op: &'static str, path: &str, items: usize) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call {
            op,
            path: path.to_string(),
            items,
        });
        if let Some(remaining) = inner.transient.get_mut(&(op.to_string(), path.to_string()))
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(PlatformError::from_status(503, "injected outage", None).into());
        }
        Ok(())
    }
}

fn rejected(items: &[Value]) -> Option<SyncError> {
    items
        .iter()
        .any(|item| item.to_string().contains(REJECT_MARKER))
        .then(|| PlatformError::from_status(400, "item rejected by validation", None).into())
}

fn apply_patch(target: &mut Map<String, Value>, update: &Map<String, Value>) {
    for (field, op) in update {
        if let Some(value) = op.get("set") {
            target.insert(field.clone(), value.clone());
        } else if op.get("setNull").is_some() {
            target.remove(field);
        } else {
            let mut list = target
                .get(field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if let Some(remove) = op.get("remove").and_then(Value::as_array) {
                list.retain(|v| !remove.contains(v));
            }
            if let Some(add) = op.get("add").and_then(Value::as_array) {
                for v in add {
                    if !list.contains(v) {
                        list.push(v.clone());
                    }
                }
            }
            target.insert(field.clone(), Value::Array(list));
        }
    }
}

#[async_trait]
impl PlatformApi for InMemoryPlatform {
    async fn list(&self, path: &str, cursor: Option<String>, limit: usize) -> Result<ListPage> {
        self.enter("list", path, 0)?;
        let offset: usize = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
        let all = self.items(path);
        let end = (offset + limit).min(all.len());
        let items = all.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
        Ok(ListPage {
            items,
            next_cursor: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn retrieve(
        &self,
        path: &str,
        ids: Vec<Value>,
        ignore_unknown: bool,
    ) -> Result<Vec<Value>> {
        self.enter("retrieve", path, ids.len())?;
        let inner = self.lock();
        let store = inner.stores.get(path);
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in &ids {
            match store.and_then(|s| s.get(&self.key_of(path, id))) {
                Some(item) => found.push(item.clone()),
                None => missing.push(id.to_string()),
            }
        }
        if !ignore_unknown && !missing.is_empty() {
            return Err(PlatformError::NotFound {
                count: missing.len(),
                missing,
            }
            .into());
        }
        Ok(found)
    }

    async fn create(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>> {
        self.enter("create", path, items.len())?;
        if let Some(err) = rejected(&items) {
            return Err(err);
        }
        let spec = *self.spec(path)?;
        let mut inner = self.lock();
        let keys: Vec<String> = items.iter().map(|item| self.key_of(path, item)).collect();
        let store = inner.stores.entry(path.to_string()).or_default();
        if let Some(key) = keys.iter().find(|k| store.contains_key(*k)) {
            let message = format!("{key} already exists");
            return Err(PlatformError::from_status(409, message, None).into());
        }

        inner.clock += 1;
        let clock = inner.clock;
        let mut created = Vec::new();
        for (key, item) in keys.into_iter().zip(items) {
            let mut fields = match item {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            for (name, default) in spec.defaults {
                fields.entry(name.to_string()).or_insert_with(|| default.to_value());
            }
            for name in spec.server_fields {
                fields.insert((*name).to_string(), Value::from(clock));
            }
            let value = Value::Object(fields);
            inner
                .stores
                .entry(path.to_string())
                .or_default()
                .insert(key, value.clone());
            created.push(value);
        }
        Ok(created)
    }

    async fn update(&self, path: &str, items: Vec<Value>) -> Result<Vec<Value>> {
        self.enter("update", path, items.len())?;
        if let Some(err) = rejected(&items) {
            return Err(err);
        }
        let spec = *self.spec(path)?;
        let mut updated = Vec::new();
        let mut inner = self.lock();
        for item in &items {
            let key = self.key_of(path, item);
            let Some(existing) = inner.stores.get_mut(path).and_then(|s| s.get_mut(&key)) else {
                return Err(PlatformError::NotFound {
                    count: 1,
                    missing: vec![key],
                }
                .into());
            };
            let Some(target) = existing.as_object_mut() else {
                continue;
            };
            if let Some(replace) = item.get("replace").and_then(Value::as_object) {
                let kept: Map<String, Value> = target
                    .iter()
                    .filter(|(k, _)| spec.is_identifier_field(k) || spec.is_server_field(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                *target = kept;
                for (k, v) in replace {
                    target.insert(k.clone(), v.clone());
                }
                for (name, default) in spec.defaults {
                    target.entry(name.to_string()).or_insert_with(|| default.to_value());
                }
            } else if let Some(update) = item.get("update").and_then(Value::as_object) {
                apply_patch(target, update);
            }
            updated.push(existing.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, path: &str, ids: Vec<Value>) -> Result<usize> {
        self.enter("delete", path, ids.len())?;
        let keys: Vec<String> = ids.iter().map(|id| self.key_of(path, id)).collect();
        let mut inner = self.lock();
        let store = inner.stores.entry(path.to_string()).or_default();
        Ok(keys.iter().filter(|key| store.remove(*key).is_some()).count())
    }

    async fn inspect_capabilities(&self) -> Result<CapabilitySet> {
        Ok(self.granted.clone())
    }
}
