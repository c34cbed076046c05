//! Manifest validation
//!
//! Checks module manifests for id and version format and for obviously broken
//! dependency lists before they reach the resolver.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::module::registry::manifest::ModuleManifest;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Manifest is valid
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Manifest validator
pub struct ManifestValidator {
    /// Maximum id length
    max_id_len: usize,
}

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new() -> Self {
        Self { max_id_len: 64 }
    }

    /// Validate a module manifest
    pub fn validate(&self, manifest: &ModuleManifest) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.is_valid_id(&manifest.id) {
            errors.push(format!(
                "Invalid module id: {} (must be alphanumeric with dashes/underscores)",
                manifest.id
            ));
        }

        if !self.is_valid_version(&manifest.version) {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                manifest.version
            ));
        }

        if let Err(dep_errors) = self.validate_dependencies(manifest) {
            errors.extend(dep_errors);
        }

        if errors.is_empty() {
            debug!("Manifest validation passed for module: {}", manifest.id);
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for module {}: {:?}",
                manifest.id, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Module ids: start alphanumeric, then alphanumeric, dash or underscore
    #[inline]
    pub fn is_valid_id(&self, id: &str) -> bool {
        if id.is_empty() || id.len() > self.max_id_len {
            return false;
        }

        if !id.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return false;
        }

        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Accepts: major.minor[.patch][-prerelease][+build]
    #[inline]
    pub fn is_valid_version(&self, version: &str) -> bool {
        let base = version.split('+').next().unwrap_or_default();
        let version_part = base.split('-').next().unwrap_or_default();

        let nums: Vec<&str> = version_part.split('.').collect();
        if nums.len() < 2 || nums.len() > 3 {
            return false;
        }

        nums.iter().all(|n| {
            !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && n.parse::<u32>().is_ok()
        })
    }

    fn validate_dependencies(&self, manifest: &ModuleManifest) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();

        for dep in &manifest.dependencies {
            if dep == &manifest.id {
                errors.push(format!("Module {} depends on itself", manifest.id));
            } else if !self.is_valid_id(dep) {
                errors.push(format!("Invalid dependency id: {}", dep));
            }
            if !seen.insert(dep.as_str()) {
                errors.push(format!("Dependency listed twice: {}", dep));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}
