//! Collaborators injected into modules
//!
//! [`ModuleContext`] is built once per orchestrator and shared by every module.
//! [`SetupContext`] wraps it for one module's setup hook together with what is
//! scoped to that module: its configuration directory, logger, task group and
//! the handles of the dependencies it declared (and nothing else).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info_span, Span};

use crate::module::api::{EventBus, PlayerRegistry, SharedStore};
use crate::module::capability::{ModuleHandle, ModuleLookup};
use crate::module::scheduler::{TaskGroup, TaskScheduler};
use crate::module::traits::ModuleError;

/// Name of the configuration file inside a module's directory
pub const MODULE_CONFIG_FILE: &str = "config.toml";

/// Shared, read-only collaborator bundle
#[derive(Clone)]
pub struct ModuleContext {
    events: Arc<EventBus>,
    players: Arc<PlayerRegistry>,
    store: Arc<SharedStore>,
    scheduler: TaskScheduler,
    config_dirs: ConfigDirResolver,
    modules: ModuleLookup,
}

impl ModuleContext {
    pub(crate) fn new(config_root: PathBuf, modules: ModuleLookup) -> Self {
        Self {
            events: Arc::new(EventBus::new()),
            players: Arc::new(PlayerRegistry::new()),
            store: Arc::new(SharedStore::new()),
            scheduler: TaskScheduler::new(),
            config_dirs: ConfigDirResolver::new(config_root),
            modules,
        }
    }

    /// Use a host-owned event bus
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Use a host-owned player registry
    pub fn with_players(mut self, players: Arc<PlayerRegistry>) -> Self {
        self.players = players;
        self
    }

    /// Use a host-owned shared store
    pub fn with_store(mut self, store: Arc<SharedStore>) -> Self {
        self.store = store;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn config_dirs(&self) -> &ConfigDirResolver {
        &self.config_dirs
    }

    /// Started-module lookup for optional integrations
    pub fn modules(&self) -> &ModuleLookup {
        &self.modules
    }

    /// Logger scoped to `module_id`
    pub fn logger(&self, module_id: &str) -> ModuleLogger {
        ModuleLogger::new(module_id)
    }
}

/// Logging helper composed into modules
///
/// Wraps a `module` span carrying the module id; hooks run inside it, so plain
/// `tracing` macros inside a module are attributed automatically.
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    module_id: Arc<str>,
    span: Span,
}

impl ModuleLogger {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: Arc::from(module_id),
            span: info_span!("module", id = %module_id),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn info(&self, message: &str) {
        self.span.in_scope(|| tracing::info!(module = %self.module_id, "{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| tracing::warn!(module = %self.module_id, "{}", message));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| tracing::error!(module = %self.module_id, "{}", message));
    }

    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!(module = %self.module_id, "{}", message));
    }
}

/// Resolves per-module configuration directories under one root
#[derive(Debug, Clone)]
pub struct ConfigDirResolver {
    root: PathBuf,
}

impl ConfigDirResolver {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, module_id: &str) -> ModuleConfigDir {
        ModuleConfigDir {
            module_id: module_id.to_string(),
            path: self.root.join(module_id),
        }
    }
}

/// Configuration directory owned by a single module
///
/// Contents are opaque to the orchestrator; helpers cover the common case of
/// a single TOML file.
#[derive(Debug, Clone)]
pub struct ModuleConfigDir {
    module_id: String,
    path: PathBuf,
}

impl ModuleConfigDir {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config_file(&self) -> PathBuf {
        self.path.join(MODULE_CONFIG_FILE)
    }

    /// Create the directory if needed
    pub fn ensure(&self) -> Result<&Path, ModuleError> {
        fs::create_dir_all(&self.path)?;
        Ok(&self.path)
    }

    /// Deserialize `config.toml`; `Ok(None)` if the file does not exist
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, ModuleError> {
        let file = self.config_file();
        if !file.exists() {
            debug!("No config file for module {}, using defaults", self.module_id);
            return Ok(None);
        }
        let contents = fs::read_to_string(&file)?;
        Ok(Some(toml::from_str(&contents)?))
    }

    /// Load `config.toml`, writing `T::default()` first if it does not exist
    pub fn load_or_init<T>(&self) -> Result<T, ModuleError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        match self.load()? {
            Some(config) => Ok(config),
            None => {
                let config = T::default();
                self.save(&config)?;
                Ok(config)
            }
        }
    }

    pub fn save<T: Serialize>(&self, config: &T) -> Result<(), ModuleError> {
        self.ensure()?;
        let contents = toml::to_string_pretty(config)?;
        fs::write(self.config_file(), contents)?;
        Ok(())
    }

    /// `config.toml` flattened to dotted string keys
    ///
    /// Arrays are joined with commas; a missing file yields an empty map.
    pub fn load_flat(&self) -> Result<HashMap<String, String>, ModuleError> {
        let mut result = HashMap::new();
        if let Some(table) = self.load::<toml::Table>()? {
            for (key, value) in &table {
                flatten_toml_value(key.clone(), value, &mut result);
            }
        }
        Ok(result)
    }
}

fn flatten_toml_value(prefix: String, value: &toml::Value, result: &mut HashMap<String, String>) {
    use toml::Value;

    match value {
        Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        Value::Integer(i) => {
            result.insert(prefix, i.to_string());
        }
        Value::Float(f) => {
            result.insert(prefix, f.to_string());
        }
        Value::Boolean(b) => {
            result.insert(prefix, b.to_string());
        }
        Value::Array(arr) => {
            let values: Vec<String> = arr
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    _ => v.to_string(),
                })
                .collect();
            result.insert(prefix, values.join(","));
        }
        Value::Table(table) => {
            for (key, val) in table {
                flatten_toml_value(format!("{}.{}", prefix, key), val, result);
            }
        }
        Value::Datetime(dt) => {
            result.insert(prefix, dt.to_string());
        }
    }
}

/// Everything a module receives in its setup hook
pub struct SetupContext {
    context: ModuleContext,
    config_dir: ModuleConfigDir,
    logger: ModuleLogger,
    tasks: TaskGroup,
    dependencies: BTreeMap<String, ModuleHandle>,
}

impl SetupContext {
    pub(crate) fn new(
        context: ModuleContext,
        module_id: &str,
        tasks: TaskGroup,
        dependencies: BTreeMap<String, ModuleHandle>,
    ) -> Self {
        Self {
            config_dir: context.config_dirs().resolve(module_id),
            logger: context.logger(module_id),
            context,
            tasks,
            dependencies,
        }
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.context.events()
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        self.context.players()
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        self.context.store()
    }

    pub fn modules(&self) -> &ModuleLookup {
        self.context.modules()
    }

    pub fn config_dir(&self) -> &ModuleConfigDir {
        &self.config_dir
    }

    pub fn logger(&self) -> &ModuleLogger {
        &self.logger
    }

    /// This module's own background task group
    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// Handle of a declared dependency; `None` for anything undeclared
    pub fn dependency(&self, id: &str) -> Option<&ModuleHandle> {
        self.dependencies.get(id)
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn dependency_capability<T: ?Sized + Send + Sync + 'static>(
        &self,
        id: &str,
    ) -> Option<Arc<T>> {
        self.dependency(id)?.capability::<T>()
    }

    /// Like [`dependency_capability`](Self::dependency_capability) but fails
    /// the setup when the capability is missing
    pub fn require_capability<T: ?Sized + Send + Sync + 'static>(
        &self,
        id: &str,
    ) -> Result<Arc<T>, ModuleError> {
        self.dependency_capability::<T>(id).ok_or_else(|| {
            ModuleError::MissingCollaborator(format!(
                "{} does not provide {}",
                id,
                std::any::type_name::<T>()
            ))
        })
    }
}
