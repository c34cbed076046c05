//! Module registry and discovery
//!
//! Holds registered modules, resolves their dependencies and reads manifests.

pub mod dependencies;
pub mod discovery;
pub mod manifest;
pub mod records;

pub use dependencies::{DependencyGraph, DependencyResolution};
pub use discovery::{DiscoveredModule, ModuleDiscovery};
pub use manifest::ModuleManifest;
pub use records::{ModuleRecord, ModuleRegistry, ModuleStatus};
