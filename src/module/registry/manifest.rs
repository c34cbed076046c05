//! Module manifest parsing
//!
//! Handles parsing `module.toml` manifests, which let tooling describe a
//! module (and preview the activation order) without loading it.

use crate::module::traits::{ModuleDescriptor, ModuleError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked up in each module directory
pub const MANIFEST_FILE: &str = "module.toml";

/// Module manifest (module.toml structure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Stable module id
    pub id: String,
    /// Human-readable name, defaults to the id
    #[serde(default)]
    pub display_name: Option<String>,
    /// Module version (semantic versioning)
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Ids of modules that must be set up first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the module is enabled when configuration does not mention it
    #[serde(default)]
    pub enabled_by_default: bool,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl ModuleManifest {
    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::ConfigError(format!(
                "Failed to read manifest {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse(&contents)
    }

    /// Parse manifest TOML
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        let manifest: ModuleManifest = toml::from_str(contents).map_err(|e| {
            ModuleError::ConfigError(format!("Failed to parse manifest TOML: {}", e))
        })?;

        if manifest.id.trim().is_empty() {
            return Err(ModuleError::ConfigError(
                "Module id cannot be empty".to_string(),
            ));
        }

        Ok(manifest)
    }

    /// Convert to the descriptor the orchestrator works with
    pub fn to_descriptor(&self) -> ModuleDescriptor {
        let mut descriptor = ModuleDescriptor::new(self.id.clone())
            .with_version(self.version.clone())
            .enabled_by_default(self.enabled_by_default);
        if let Some(name) = &self.display_name {
            descriptor = descriptor.with_display_name(name.clone());
        }
        for dep in &self.dependencies {
            descriptor = descriptor.depends_on(dep.clone());
        }
        descriptor
    }
}

impl From<&ModuleManifest> for ModuleDescriptor {
    fn from(manifest: &ModuleManifest) -> Self {
        manifest.to_descriptor()
    }
}
