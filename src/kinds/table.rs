//! Table-driven kind definitions.
//!
//! Every concrete kind is described by a [`KindSpec`] row; [`STANDARD_KINDS`]
//! is the fixed list the registry is built from.

use serde_json::{Map, Value};

/// Default value the platform assigns when a field is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// A boolean.
    Bool(bool),
    /// A string.
    Str(&'static str),
    /// An integer.
    Int(i64),
    /// `[]`.
    EmptyList,
    /// `{}`.
    EmptyObject,
    /// `null`.
    Null,
}

impl DefaultValue {
    /// Converts the default to a JSON value.
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(b),
            Self::Str(s) => Value::String(s.to_string()),
            Self::Int(i) => Value::from(i),
            Self::EmptyList => Value::Array(Vec::new()),
            Self::EmptyObject => Value::Object(Map::new()),
            Self::Null => Value::Null,
        }
    }
}

/// Static definition of a kind.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    /// Unique kind name.
    pub name: &'static str,
    /// Display name.
    pub display_name: &'static str,
    /// Path of the kind's endpoints below the project URL.
    pub resource_path: &'static str,
    /// Kinds referenced by every instance.
    pub dependencies: &'static [&'static str],
    /// Fields forming the identifier.
    pub identifier_fields: &'static [&'static str],
    /// Fields assigned by the platform.
    pub server_fields: &'static [&'static str],
    /// Platform defaults for omitted fields.
    pub defaults: &'static [(&'static str, DefaultValue)],
    /// Fields that cannot change after creation.
    pub immutable_fields: &'static [&'static str],
    /// Set-like list fields.
    pub container_fields: &'static [&'static str],
    /// `(field, kind)` pairs whose value names an instance of another kind.
    pub dynamic_references: &'static [(&'static str, &'static str)],
    /// ACL guarding the kind.
    pub acl: &'static str,
    /// Field whose value scopes capabilities, if any.
    pub scope_field: Option<&'static str>,
    /// Whether in-place update is supported.
    pub supports_update: bool,
    /// Whether deletion is supported.
    pub supports_drop: bool,
}

const TIMESTAMPS: &[&str] = &["createdTime", "lastUpdatedTime"];

impl KindSpec {
    /// A kind with a single `externalId` identifier and nothing else.
    #[must_use]
    pub const fn minimal(name: &'static str, dependencies: &'static [&'static str]) -> Self {
        Self {
            name,
            display_name: name,
            resource_path: name,
            dependencies,
            identifier_fields: &["externalId"],
            server_fields: TIMESTAMPS,
            defaults: &[],
            immutable_fields: &[],
            container_fields: &[],
            dynamic_references: &[],
            acl: name,
            scope_field: None,
            supports_update: true,
            supports_drop: true,
        }
    }

    /// Returns the default value of `field`, if the platform assigns one.
    #[must_use]
    pub fn default_for(&self, field: &str) -> Option<Value> {
        self.defaults
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value.to_value())
    }

    /// Returns true if `field` is assigned by the platform.
    #[must_use]
    pub fn is_server_field(&self, field: &str) -> bool {
        self.server_fields.contains(&field)
    }

    /// Returns true if `field` is part of the identifier.
    #[must_use]
    pub fn is_identifier_field(&self, field: &str) -> bool {
        self.identifier_fields.contains(&field)
    }

    /// Returns true if `field` cannot be updated.
    #[must_use]
    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable_fields.contains(&field)
    }

    /// Returns true if `field` is a set-like list.
    #[must_use]
    pub fn is_container(&self, field: &str) -> bool {
        self.container_fields.contains(&field)
    }
}

/// The kinds known to the engine, registered once at startup.
pub const STANDARD_KINDS: &[KindSpec] = &[
    KindSpec {
        name: "spaces",
        display_name: "Space",
        resource_path: "models/spaces",
        dependencies: &[],
        identifier_fields: &["space"],
        server_fields: &["createdTime", "lastUpdatedTime", "isGlobal"],
        defaults: &[("description", DefaultValue::Null)],
        immutable_fields: &[],
        container_fields: &[],
        dynamic_references: &[],
        acl: "spaces",
        scope_field: Some("space"),
        supports_update: true,
        supports_drop: true,
    },
    KindSpec {
        name: "datasets",
        display_name: "Data set",
        resource_path: "datasets",
        dependencies: &[],
        identifier_fields: &["externalId"],
        server_fields: &["id", "createdTime", "lastUpdatedTime"],
        defaults: &[
            ("writeProtected", DefaultValue::Bool(false)),
            ("metadata", DefaultValue::EmptyObject),
        ],
        immutable_fields: &[],
        container_fields: &[],
        dynamic_references: &[],
        acl: "datasets",
        scope_field: None,
        supports_update: true,
        supports_drop: false,
    },
    KindSpec {
        name: "schemas",
        display_name: "Schema",
        resource_path: "models/schemas",
        dependencies: &["spaces"],
        identifier_fields: &["space", "externalId"],
        server_fields: &["createdTime", "lastUpdatedTime", "isGlobal", "writable"],
        defaults: &[
            ("usedFor", DefaultValue::Str("node")),
            ("properties", DefaultValue::EmptyObject),
        ],
        immutable_fields: &["usedFor"],
        container_fields: &["implements"],
        dynamic_references: &[],
        acl: "schemas",
        scope_field: Some("space"),
        supports_update: true,
        supports_drop: true,
    },
    KindSpec {
        name: "pipelines",
        display_name: "Pipeline",
        resource_path: "pipelines",
        dependencies: &["schemas", "datasets"],
        identifier_fields: &["externalId"],
        server_fields: &["id", "createdTime", "lastUpdatedTime", "lastSeenTime"],
        defaults: &[
            ("isPaused", DefaultValue::Bool(false)),
            ("schedule", DefaultValue::Null),
            ("labels", DefaultValue::EmptyList),
        ],
        immutable_fields: &[],
        container_fields: &["labels"],
        dynamic_references: &[],
        acl: "pipelines",
        scope_field: None,
        supports_update: true,
        supports_drop: true,
    },
    KindSpec {
        name: "schedules",
        display_name: "Pipeline schedule",
        resource_path: "pipelines/schedules",
        dependencies: &["pipelines"],
        identifier_fields: &["externalId"],
        server_fields: &["id", "createdTime"],
        defaults: &[
            ("isPaused", DefaultValue::Bool(false)),
            ("retries", DefaultValue::Int(0)),
        ],
        immutable_fields: &["pipelineExternalId"],
        container_fields: &[],
        dynamic_references: &[],
        acl: "pipelines",
        scope_field: None,
        supports_update: false,
        supports_drop: true,
    },
    KindSpec {
        name: "data_products",
        display_name: "Data product",
        resource_path: "dataproducts",
        dependencies: &["spaces", "schemas"],
        identifier_fields: &["space", "externalId"],
        server_fields: &["createdTime", "lastUpdatedTime"],
        defaults: &[
            ("tags", DefaultValue::EmptyList),
            ("isGoverned", DefaultValue::Bool(false)),
        ],
        immutable_fields: &[],
        container_fields: &["tags"],
        dynamic_references: &[("sourcePipeline", "pipelines")],
        acl: "dataproducts",
        scope_field: Some("space"),
        supports_update: true,
        supports_drop: true,
    },
];

/// Looks up a standard kind by name.
#[must_use]
pub fn standard_kind(name: &str) -> Option<&'static KindSpec> {
    STANDARD_KINDS.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_kinds_are_unique_and_resolvable() {
        for (i, spec) in STANDARD_KINDS.iter().enumerate() {
            assert!(
                STANDARD_KINDS[i + 1..].iter().all(|other| other.name != spec.name),
                "duplicate kind {}",
                spec.name
            );
            for dep in spec.dependencies {
                assert!(standard_kind(dep).is_some(), "{} depends on unknown {dep}", spec.name);
            }
            for (_, kind) in spec.dynamic_references {
                assert!(standard_kind(kind).is_some());
            }
        }
    }

    #[test]
    fn test_default_lookup() {
        let datasets = standard_kind("datasets").expect("datasets");
        assert_eq!(datasets.default_for("writeProtected"), Some(Value::Bool(false)));
        assert_eq!(datasets.default_for("name"), None);
        assert!(!datasets.supports_drop);
    }
}
