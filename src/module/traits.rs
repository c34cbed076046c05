//! Module system traits and interfaces
//!
//! Defines the contract every feature module implements and the identity/state
//! types the orchestrator tracks for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::module::capability::Capabilities;
use crate::module::context::SetupContext;

/// Module lifecycle state
///
/// Normal progression is `Disabled -> Setup -> Started -> Stopped`. `Error` is
/// reachable from `Disabled` (skipped because a dependency failed), `Setup` and
/// `Started`. Both `Stopped` and `Error` are terminal for the process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Registered but not yet set up
    #[default]
    Disabled,
    /// Setup hook completed, waiting to be started
    Setup,
    /// Module is running normally
    Started,
    /// Module was shut down
    Stopped,
    /// Module failed (or a dependency failed) and is inert
    Error,
}

impl ModuleState {
    /// Whether the state can never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Stopped | ModuleState::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Disabled, Setup)
                | (Disabled, Error)
                | (Setup, Started)
                | (Setup, Stopped)
                | (Setup, Error)
                | (Started, Stopped)
                | (Started, Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleState::Disabled => "disabled",
            ModuleState::Setup => "setup",
            ModuleState::Started => "started",
            ModuleState::Stopped => "stopped",
            ModuleState::Error => "error",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity and dependency declaration for one feature module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique, stable identifier
    pub id: String,
    /// Human-readable name (informational)
    pub display_name: String,
    /// Module version (informational)
    pub version: String,
    /// Ids of modules that must be set up and started before this one
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Enablement used when the configuration does not mention this module
    #[serde(default)]
    pub enabled_by_default: bool,
}

impl ModuleDescriptor {
    /// Create a descriptor with no dependencies, disabled by default
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            version: "0.1.0".to_string(),
            dependencies: BTreeSet::new(),
            enabled_by_default: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declare a dependency on another module
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    /// Whether the descriptor lists its own id as a dependency
    pub fn depends_on_self(&self) -> bool {
        self.dependencies.contains(&self.id)
    }
}

/// Module trait that all feature modules implement
///
/// Hooks are invoked sequentially by the
/// [`ModuleManager`](crate::module::manager::ModuleManager) in dependency order.
/// Errors are treated opaquely: they are logged and move the module to
/// [`ModuleState::Error`].
#[async_trait]
pub trait Module: Send + Sync {
    /// Identity and declared dependencies
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Module id (shorthand for `descriptor().id`)
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Declared dependency ids
    fn declared_dependencies(&self) -> &BTreeSet<String> {
        &self.descriptor().dependencies
    }

    /// Prepare the module
    ///
    /// Receives the shared collaborators plus handles to the declared
    /// dependencies, all of which have already completed setup.
    async fn on_setup(&mut self, ctx: SetupContext) -> Result<(), ModuleError>;

    /// Begin operation (register listeners, spawn background tasks)
    async fn on_start(&mut self) -> Result<(), ModuleError>;

    /// Release resources
    ///
    /// Must cancel and await any background work the module spawned. The
    /// orchestrator bounds this call with a timeout.
    async fn on_shutdown(&mut self) -> Result<(), ModuleError>;

    /// Typed capabilities other modules may look up once this one is started
    ///
    /// Collected once, right after a successful setup.
    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
    }
}

/// Errors raised by module hooks
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module setup failed: {0}")]
    SetupFailed(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("Module configuration error: {0}")]
    ConfigError(String),

    #[error("Required collaborator unavailable: {0}")]
    MissingCollaborator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout waiting for module")]
    Timeout,
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::ConfigError(e.to_string())
    }
}

impl From<toml::ser::Error> for ModuleError {
    fn from(e: toml::ser::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::OperationError(e.to_string())
    }
}
