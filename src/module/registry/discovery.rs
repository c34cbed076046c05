//! Module discovery
//!
//! Scans a directory of module subdirectories for `module.toml` manifests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::registry::manifest::{ModuleManifest, MANIFEST_FILE};
use crate::module::traits::{ModuleDescriptor, ModuleError};
use crate::module::validation::{ManifestValidator, ValidationResult};

/// Discovered module information
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    /// Module directory path
    pub directory: PathBuf,
    /// Module manifest
    pub manifest: ModuleManifest,
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    /// Base directory to scan for modules
    modules_dir: PathBuf,
    validator: ManifestValidator,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner
    pub fn new<P: AsRef<Path>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            validator: ManifestValidator::new(),
        }
    }

    /// Discover all modules in the modules directory, ordered by id
    ///
    /// Unparseable or invalid manifests are skipped with a warning, as is a
    /// second manifest claiming an id that was already found.
    pub fn discover_modules(&self) -> Result<Vec<DiscoveredModule>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        if !self.modules_dir.exists() {
            debug!("Modules directory does not exist: {:?}", self.modules_dir);
            return Ok(Vec::new());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&self.modules_dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        let mut modules: BTreeMap<String, DiscoveredModule> = BTreeMap::new();
        for path in entries {
            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                debug!("No {} found in {:?}, skipping", MANIFEST_FILE, path);
                continue;
            }

            let manifest = match self.load(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping module in {:?}: {}", path, e);
                    continue;
                }
            };

            if let Some(existing) = modules.get(&manifest.id) {
                warn!(
                    "Module {} in {:?} already declared in {:?}, skipping",
                    manifest.id, path, existing.directory
                );
                continue;
            }

            modules.insert(
                manifest.id.clone(),
                DiscoveredModule {
                    directory: path,
                    manifest,
                },
            );
        }

        info!("Discovered {} modules", modules.len());
        Ok(modules.into_values().collect())
    }

    /// Discover a specific module by directory name
    pub fn discover_module(&self, name: &str) -> Result<DiscoveredModule, ModuleError> {
        let directory = self.modules_dir.join(name);
        let manifest_path = directory.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            return Err(ModuleError::ConfigError(format!(
                "Module {} not found (no {} in {:?})",
                name, MANIFEST_FILE, directory
            )));
        }

        let manifest = self.load(&manifest_path)?;
        Ok(DiscoveredModule {
            directory,
            manifest,
        })
    }

    /// Descriptors of every discovered module, keyed by id
    pub fn descriptors(&self) -> Result<BTreeMap<String, ModuleDescriptor>, ModuleError> {
        Ok(self
            .discover_modules()?
            .iter()
            .map(|m| (m.manifest.id.clone(), m.manifest.to_descriptor()))
            .collect())
    }

    fn load(&self, manifest_path: &Path) -> Result<ModuleManifest, ModuleError> {
        let manifest = ModuleManifest::from_file(manifest_path)?;
        match self.validator.validate(&manifest) {
            ValidationResult::Valid => Ok(manifest),
            ValidationResult::Invalid(errors) => Err(ModuleError::ConfigError(format!(
                "Invalid manifest for {}: {}",
                manifest.id,
                errors.join("; ")
            ))),
        }
    }
}
