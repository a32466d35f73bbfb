//! Local (desired) and remote (actual) resource descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Raw field mapping of a descriptor.
pub type Fields = Map<String, Value>;

/// Desired state of one instance, as authored in a descriptor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDescriptor {
    /// Kind name.
    pub kind: String,
    /// Module the descriptor was loaded from.
    pub module: String,
    /// Source file.
    pub source: PathBuf,
    /// Raw fields.
    pub fields: Fields,
}

/// Actual state of one instance, as returned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    /// Raw fields, including server-assigned ones.
    pub fields: Fields,
}

impl LocalDescriptor {
    /// Creates a descriptor with no provenance.
    #[must_use]
    pub fn new(kind: impl Into<String>, fields: Fields) -> Self {
        Self {
            kind: kind.into(),
            module: String::new(),
            source: PathBuf::from("<inline>"),
            fields,
        }
    }

    /// Sets the provenance of the descriptor.
    #[must_use]
    pub fn with_source(mut self, module: impl Into<String>, source: impl AsRef<Path>) -> Self {
        self.module = module.into();
        self.source = source.as_ref().to_path_buf();
        self
    }

    /// Returns a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Serializes the fields as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl RemoteDescriptor {
    /// Wraps a platform item.
    ///
    /// Non-object values are wrapped under a `value` field.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            other => {
                let mut fields = Map::new();
                fields.insert(String::from("value"), other);
                Self { fields }
            }
        }
    }

    /// Returns a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
