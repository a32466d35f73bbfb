//! Descriptor loading.
//!
//! Local descriptors live in `<modules_dir>/<module>/*.yaml`. Each file names
//! one kind and lists its items:
//!
//! ```yaml
//! kind: datasets
//! items:
//!   - externalId: raw
//!     name: Raw data
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::kinds::{Fields, LocalDescriptor};

/// One descriptor file.
#[derive(Debug, Deserialize)]
struct DescriptorFile {
    kind: String,
    #[serde(default)]
    items: Vec<Fields>,
}

/// Loads local descriptors from a modules directory.
#[derive(Debug, Clone)]
pub struct DescriptorLoader {
    root: PathBuf,
}

impl DescriptorLoader {
    /// Creates a loader over `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the modules directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the module names, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the modules directory cannot be read.
    pub fn modules(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(ConfigError::FileNotFound {
                path: self.root.clone(),
            }
            .into());
        }
        let mut modules: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        modules.sort();
        Ok(modules)
    }

    /// Loads every descriptor of `selected` modules, or of all modules when
    /// `selected` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ModuleNotFound`] for an unknown module and
    /// parse errors for malformed files.
    pub fn load(&self, selected: &[String]) -> Result<Vec<LocalDescriptor>> {
        let available = self.modules()?;
        let modules: Vec<&String> = if selected.is_empty() {
            available.iter().collect()
        } else {
            if let Some(missing) = selected.iter().find(|m| !available.contains(m)) {
                return Err(ConfigError::ModuleNotFound {
                    name: missing.clone(),
                }
                .into());
            }
            selected.iter().collect()
        };

        let mut descriptors = Vec::new();
        for module in modules {
            let dir = self.root.join(module);
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|e| e == "yaml" || e == "yml")
                })
                .collect();
            files.sort();

            for file in files {
                descriptors.extend(Self::load_file(&file, module)?);
            }
        }

        info!(
            "Loaded {} descriptor(s) from {}",
            descriptors.len(),
            self.root.display()
        );
        Ok(descriptors)
    }

    /// Loads one descriptor file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(path: &Path, module: &str) -> Result<Vec<LocalDescriptor>> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;
        let file: DescriptorFile =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                message: format!("Invalid descriptor file {}: {e}", path.display()),
                location: Some(path.display().to_string()),
            })?;

        debug!("{}: {} {} item(s)", path.display(), file.items.len(), file.kind);
        Ok(file
            .items
            .into_iter()
            .map(|fields| LocalDescriptor::new(file.kind.clone(), fields).with_source(module, path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        write(
            dir.path(),
            "core/datasets.yaml",
            "kind: datasets\nitems:\n  - externalId: raw\n    name: Raw\n  - externalId: clean\n",
        );
        write(
            dir.path(),
            "core/spaces.yml",
            "kind: spaces\nitems:\n  - space: s1\n",
        );
        write(dir.path(), "core/README.md", "not a descriptor");
        write(
            dir.path(),
            "ingest/pipelines.yaml",
            "kind: pipelines\nitems:\n  - externalId: p1\n    labels: [a, b]\n",
        );
        dir
    }

    #[test]
    fn test_load_all_modules() {
        let dir = fixture();
        let loader = DescriptorLoader::new(dir.path());
        assert_eq!(loader.modules().expect("modules"), vec!["core", "ingest"]);

        let descriptors = loader.load(&[]).expect("load");
        let kinds: Vec<&str> = descriptors.iter().map(|d| d.kind.as_str()).collect();
        assert_eq!(kinds, vec!["datasets", "datasets", "spaces", "pipelines"]);
        assert_eq!(descriptors[0].module, "core");
        assert_eq!(descriptors[0].field("name"), Some(&json!("Raw")));
        assert_eq!(descriptors[3].field("labels"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_load_selected_module() {
        let dir = fixture();
        let descriptors = DescriptorLoader::new(dir.path())
            .load(&[String::from("ingest")])
            .expect("load");
        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].source.ends_with("ingest/pipelines.yaml"));
    }

    #[test]
    fn test_unknown_module() {
        let dir = fixture();
        let err = DescriptorLoader::new(dir.path())
            .load(&[String::from("missing")])
            .expect_err("unknown");
        assert!(matches!(
            err,
            crate::error::SyncError::Config(ConfigError::ModuleNotFound { ref name })
                if name == "missing"
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "core/bad.yaml", "items: []\n");
        let err = DescriptorLoader::new(dir.path()).load(&[]).expect_err("no kind");
        assert!(err.to_string().contains("bad.yaml"));
    }
}
