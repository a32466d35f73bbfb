//! Instance identifiers.
//!
//! An [`Identifier`] is a composite of named string parts (for example
//! `space` and `externalId`). Equality of identifiers defines "same instance"
//! for diffing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of one instance within a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    /// Named identifier parts, sorted by name.
    parts: BTreeMap<String, String>,
}

impl Identifier {
    /// Creates an identifier from named parts.
    pub fn new<K, V>(parts: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            parts: parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Creates a single-part identifier.
    pub fn single(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new([(field.into(), value.into())])
    }

    /// Returns the value of one identifier part.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.parts.get(field).map(String::as_str)
    }

    /// Returns all parts.
    #[must_use]
    pub const fn parts(&self) -> &BTreeMap<String, String> {
        &self.parts
    }

    /// Returns the wire form: a JSON object of the identifier parts.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        Value::Object(
            self.parts
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.parts.len() == 1
            && let Some(value) = self.parts.values().next()
        {
            return write!(f, "{value}");
        }

        for (i, (field, value)) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{field}:{value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_order_does_not_matter() {
        let a = Identifier::new([("space", "sp"), ("externalId", "x1")]);
        let b = Identifier::new([("externalId", "x1"), ("space", "sp")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "externalId:x1/space:sp");
    }

    #[test]
    fn test_single_display_and_wire() {
        let id = Identifier::single("externalId", "x1");
        assert_eq!(id.to_string(), "x1");
        assert_eq!(id.to_wire(), serde_json::json!({ "externalId": "x1" }));
        assert_eq!(id.get("externalId"), Some("x1"));
    }
}
