//! Registry persistence and shared JSON file helpers

use crate::registry::model::Target;
use crate::{RegistryError, RegistryResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use url::Url;

/// The shared target registry (`groups.json`)
///
/// Loaded once per run, mutated in memory, written once at the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    targets: Vec<Target>,
}

impl Registry {
    pub fn new(targets: Vec<Target>) -> RegistryResult<Self> {
        let registry = Self { targets };
        registry.validate()?;
        Ok(registry)
    }

    /// Decodes and validates registry JSON
    pub fn from_json(content: &str) -> RegistryResult<Self> {
        let registry: Self = serde_json::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Loads the registry file; a missing file is an empty registry
    ///
    /// # Arguments
    ///
    /// * `path` - Path to `groups.json`
    ///
    /// # Returns
    ///
    /// * `Ok(Registry)` - Decoded and validated registry
    /// * `Err(RegistryError)` - Unreadable file or malformed entries
    pub fn load(path: &Path) -> RegistryResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Registry {} not found, starting empty", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(RegistryError::Io(e)),
        }
    }

    /// Writes the whole registry atomically
    pub fn save(&self, path: &Path) -> RegistryResult<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [Target] {
        &mut self.targets
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn target_mut(&mut self, name: &str) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Names of targets with at least one available and enabled endpoint, sorted
    pub fn active_targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .targets
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn validate(&self) -> RegistryResult<()> {
        let mut seen = HashSet::new();

        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(RegistryError::InvalidTarget(
                    "target name cannot be empty".to_string(),
                ));
            }

            // Names become file name prefixes under tmp/ and images/
            if target.name.contains(['/', '\\', '\0']) || target.name.contains("..") {
                return Err(RegistryError::InvalidTarget(format!(
                    "target name '{}' cannot contain path separators or '..'",
                    target.name
                )));
            }

            if !seen.insert(target.name.as_str()) {
                return Err(RegistryError::InvalidTarget(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }

            for endpoint in &target.locations {
                let invalid = |message: String| RegistryError::InvalidEndpoint {
                    target: target.name.clone(),
                    message,
                };

                if endpoint.slug.trim().is_empty() {
                    return Err(invalid("slug cannot be empty".to_string()));
                }

                let url = Url::parse(&endpoint.slug)
                    .map_err(|e| invalid(format!("slug '{}': {}", endpoint.slug, e)))?;

                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(invalid(format!(
                        "slug '{}' must use http or https",
                        endpoint.slug
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Serializes `value` as 4-space indented JSON and atomically replaces `path`
///
/// Writes a sibling temp file, syncs it, then renames over the destination so
/// readers never observe a partial file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    buf.push(b'\n');

    let tmp = temp_sibling(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Reads a JSON file, returning `None` when it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}
