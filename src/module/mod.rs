//! Module system for the survival plugin
//!
//! Feature modules (economy, traders, claims, HUD, ...) are compiled into the
//! plugin and orchestrated in-process.
//!
//! ## Architecture
//!
//! - **Registry**: every module is registered once and owns a per-record lock
//! - **Resolution**: enabled modules pull in their dependencies and are ordered
//!   dependencies-first, ties broken by id
//! - **Failure isolation**: a failing hook only takes down the module and the
//!   modules that depend on it
//! - **Typed collaboration**: started modules publish capabilities that other
//!   modules look up by type, never by downcasting a concrete module

pub mod api;
pub mod capability;
pub mod context;
pub mod error;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod traits;
pub mod validation;

pub use capability::{Capabilities, ModuleHandle, ModuleLookup};
pub use context::{ModuleContext, ModuleLogger, SetupContext};
pub use error::OrchestratorError;
pub use manager::{LifecycleReport, ModuleManager, ShutdownReport};
pub use traits::{Module, ModuleDescriptor, ModuleError, ModuleState};
