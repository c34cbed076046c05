//! Survival Modules - lifecycle orchestration for a survival game-server plugin
//!
//! The plugin is a set of feature modules compiled into one binary. This crate
//! registers them, resolves which ones run (enabled modules pull in their
//! dependencies), and drives them through setup, start and shutdown in
//! dependency order while keeping one module's failure from taking down
//! unrelated ones.
//!
//! ## Lifecycle
//!
//! 1. `ModuleManager::register` for every compiled-in module
//! 2. `setup_all` resolves the activation order and runs setup hooks
//! 3. `start_all` starts every module that set up cleanly
//! 4. `shutdown_all` tears down in reverse order, bounded by timeouts
//!
//! ```rust,no_run
//! use survival_modules::{ModuleManager, PluginConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PluginConfig::default();
//! let mut manager = ModuleManager::with_config(&config);
//! // manager.register(MyModule::new()).await?;
//! manager.setup_all().await?;
//! manager.start_all().await;
//! manager.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod module;
pub mod utils;

pub use config::{LoggingConfig, PluginConfig};
pub use module::{
    Capabilities, LifecycleReport, Module, ModuleDescriptor, ModuleError, ModuleHandle,
    ModuleLookup, ModuleManager, ModuleState, OrchestratorError, SetupContext, ShutdownReport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
