//! The kind registry: an explicit name → implementation table.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::api_kind::ApiKind;
use super::contract::ResourceKind;
use super::table::STANDARD_KINDS;
use crate::error::ConfigError;
use crate::platform::PlatformApi;

/// Registered kinds, keyed by name.
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, Arc<dyn ResourceKind>>,
}

impl KindRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry of every standard kind over `api`.
    #[must_use]
    pub fn standard(api: &Arc<dyn PlatformApi>, page_size: usize) -> Self {
        let mut kinds = BTreeMap::new();
        for spec in STANDARD_KINDS {
            let kind: Arc<dyn ResourceKind> =
                Arc::new(ApiKind::new(*spec, Arc::clone(api), page_size));
            kinds.insert(spec.name.to_string(), kind);
        }
        debug!("Registered {} standard kinds", kinds.len());
        Self { kinds }
    }

    /// Builds a registry from explicit kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if two kinds share a name.
    pub fn from_kinds(
        kinds: impl IntoIterator<Item = Arc<dyn ResourceKind>>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut registry = Self::new();
        for kind in kinds {
            registry.register(kind)?;
        }
        Ok(registry)
    }

    /// Registers one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register(
        &mut self,
        kind: Arc<dyn ResourceKind>,
    ) -> std::result::Result<(), ConfigError> {
        let name = kind.info().name.clone();
        if self.kinds.contains_key(&name) {
            return Err(ConfigError::validation(
                format!("kind '{name}' registered twice"),
                "kinds",
            ));
        }
        self.kinds.insert(name, kind);
        Ok(())
    }

    /// Looks up a kind.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ResourceKind>> {
        self.kinds.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Returns every registered name in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Returns the number of kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true if no kind is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds.keys()).finish()
    }
}
