//! Module manager for orchestrating all modules
//!
//! Drives registered modules through `Disabled -> Setup -> Started -> Stopped`
//! in dependency order, isolating per-module failures. Lifecycle calls run
//! sequentially on the caller's task; only lookups are expected to happen
//! concurrently (through [`ModuleLookup`]).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::PluginConfig;
use crate::module::capability::{ModuleHandle, ModuleLookup};
use crate::module::context::{ModuleContext, SetupContext};
use crate::module::error::OrchestratorError;
use crate::module::registry::{DependencyGraph, ModuleRecord, ModuleRegistry, ModuleStatus};
use crate::module::scheduler::TaskGroup;
use crate::module::traits::{Module, ModuleState};
use crate::utils::{
    with_custom_timeout, DEFAULT_MODULE_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};

/// Outcome of `setup_all` / `start_all`
#[derive(Debug, Default)]
pub struct LifecycleReport {
    /// Resolved activation order
    pub activation_order: Vec<String>,
    /// Modules that completed the phase
    pub succeeded: Vec<String>,
    /// Modules that failed the phase or were skipped because of a dependency
    pub failures: Vec<OrchestratorError>,
    /// Modules shut down because they dropped out of the activation order
    pub stopped: Vec<String>,
}

impl LifecycleReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.failures.iter().filter_map(|e| e.module()).collect()
    }
}

/// Outcome of `shutdown_all`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Modules whose shutdown hook ran, in teardown order
    pub stopped: Vec<String>,
    /// Modules whose hook did not return within its window
    pub timed_out: Vec<String>,
    /// Modules whose hook returned an error (id, cause)
    pub failed: Vec<(String, String)>,
}

/// Module manager coordinates all registered modules
pub struct ModuleManager {
    registry: Arc<ModuleRegistry>,
    context: ModuleContext,
    /// Module id -> enabled, from configuration and `set_enabled`
    enablement: BTreeMap<String, bool>,
    /// Order produced by the last successful resolution
    activation_order: Vec<String>,
    /// Task groups of modules that completed setup
    task_groups: HashMap<String, TaskGroup>,
    shutdown_timeout: Duration,
    module_shutdown_timeout: Duration,
    shut_down: bool,
}

impl ModuleManager {
    /// Create a manager whose modules keep their configuration under `config_dir`
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        let context = ModuleContext::new(
            config_dir.as_ref().to_path_buf(),
            ModuleLookup::new(Arc::clone(&registry)),
        );

        Self {
            registry,
            context,
            enablement: BTreeMap::new(),
            activation_order: Vec::new(),
            task_groups: HashMap::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            module_shutdown_timeout: DEFAULT_MODULE_SHUTDOWN_TIMEOUT,
            shut_down: false,
        }
    }

    /// Create a manager from plugin configuration
    pub fn with_config(config: &PluginConfig) -> Self {
        let mut manager = Self::new(config.config_dir());
        manager.enablement = config.modules.clone();
        manager.shutdown_timeout = config.shutdown_timeout();
        manager.module_shutdown_timeout = config.module_shutdown_timeout();
        manager
    }

    /// Replace the shared context collaborators (event bus, players, store)
    pub fn map_context(mut self, f: impl FnOnce(ModuleContext) -> ModuleContext) -> Self {
        self.context = f(self.context);
        self
    }

    pub fn with_shutdown_timeouts(mut self, overall: Duration, per_module: Duration) -> Self {
        self.shutdown_timeout = overall;
        self.module_shutdown_timeout = per_module;
        self
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    /// Lookup handle that can be moved into background tasks
    pub fn lookup(&self) -> ModuleLookup {
        self.context.modules().clone()
    }

    /// Register a module
    pub async fn register<M: Module + 'static>(
        &mut self,
        module: M,
    ) -> Result<(), OrchestratorError> {
        self.register_boxed(Box::new(module)).await
    }

    pub async fn register_boxed(
        &mut self,
        module: Box<dyn Module>,
    ) -> Result<(), OrchestratorError> {
        let record = self.registry.insert(module).await?;
        info!(
            "Registered module {} ({} v{})",
            record.id(),
            record.descriptor().display_name,
            record.descriptor().version
        );
        Ok(())
    }

    /// Replace the enablement map (e.g. after the administrator edits configuration)
    pub fn set_enablement(&mut self, enablement: BTreeMap<String, bool>) {
        self.enablement = enablement;
    }

    /// Apply reloaded configuration to the registered modules
    ///
    /// Returns the configured ids that match no registered module.
    pub async fn apply_config(&mut self, config: &PluginConfig) -> Vec<String> {
        self.enablement = config.modules.clone();
        self.shutdown_timeout = config.shutdown_timeout();
        self.module_shutdown_timeout = config.module_shutdown_timeout();
        self.registry.apply_enablement(&self.enablement).await
    }

    /// Toggle one module at runtime
    ///
    /// Takes effect at the next `setup_all`. Disabling a module that an enabled
    /// module depends on is rejected.
    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), OrchestratorError> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::ModuleNotFound(id.to_string()))?;

        if !enabled {
            let descriptors = self.registry.descriptors().await;
            for dependent in DependencyGraph::new(&descriptors).dependents_of(id) {
                let still_enabled = match self.enablement.get(&dependent) {
                    Some(&enabled) => enabled,
                    None => match self.registry.get(&dependent).await {
                        Some(r) => r.is_enabled(),
                        None => false,
                    },
                };
                if still_enabled {
                    return Err(OrchestratorError::DependencyRequired {
                        module: id.to_string(),
                        required_by: dependent,
                    });
                }
            }
        }

        record.set_enabled(enabled);
        self.enablement.insert(id.to_string(), enabled);
        info!("Module {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Resolve the activation order and run every enabled module's setup hook
    ///
    /// Resolution errors (missing dependency, cycle) abort before any module or
    /// enablement flag is touched. Hook failures are isolated to the failing
    /// module and its dependents and reported in the returned report.
    ///
    /// On a re-run, modules from the previous order that are no longer enabled
    /// are shut down in reverse order before any new module is set up. A
    /// stopped module is not set up again.
    pub async fn setup_all(&mut self) -> Result<LifecycleReport, OrchestratorError> {
        info!("Setting up modules ({} registered)", self.registry.len().await);

        let descriptors = self.registry.descriptors().await;
        let enabled: BTreeSet<String> = descriptors
            .values()
            .filter(|d| {
                self.enablement
                    .get(&d.id)
                    .copied()
                    .unwrap_or(d.enabled_by_default)
            })
            .map(|d| d.id.clone())
            .collect();

        let resolution = match DependencyGraph::new(&descriptors).resolve(&enabled) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("Module resolution failed, no module will be set up: {}", e);
                return Err(e);
            }
        };

        self.registry.apply_enablement(&self.enablement).await;
        for id in &resolution.auto_enabled {
            if let Some(record) = self.registry.get(id).await {
                let required_by: Vec<&str> = resolution
                    .dependencies
                    .iter()
                    .filter(|(_, deps)| deps.contains(id))
                    .map(|(m, _)| m.as_str())
                    .collect();
                warn!("Module {} auto-enabled, required by {:?}", id, required_by);
                record.set_enabled(true);
            }
        }

        let mut report = LifecycleReport {
            activation_order: resolution.activation_order.clone(),
            ..Default::default()
        };

        // Modules active under the previous order that are no longer enabled
        let retired: Vec<String> = self
            .activation_order
            .iter()
            .rev()
            .filter(|id| !resolution.activation_order.contains(id))
            .cloned()
            .collect();
        if !retired.is_empty() {
            let deadline = Instant::now() + self.shutdown_timeout;
            let mut shutdown = ShutdownReport::default();
            for id in retired {
                let Some(record) = self.registry.get(&id).await else {
                    continue;
                };
                if !matches!(record.state().await, ModuleState::Setup | ModuleState::Started) {
                    continue;
                }
                info!("Module {} is no longer enabled, stopping it", id);
                self.stop_module(&record, deadline, &mut shutdown).await;
                report.stopped.push(id);
            }
        }

        self.activation_order = resolution.activation_order.clone();
        info!("Activation order: {:?}", self.activation_order);

        for id in &resolution.activation_order {
            let Some(record) = self.registry.get(id).await else {
                continue;
            };

            if record.state().await != ModuleState::Disabled {
                debug!("Module {} already past setup, skipping", id);
                continue;
            }

            if let Some(failure) = self
                .failed_dependency(&record, &[ModuleState::Setup, ModuleState::Started])
                .await
            {
                self.record_dependency_failure(&record, failure, &mut report).await;
                continue;
            }

            let mut dependencies = BTreeMap::new();
            for dep in &record.descriptor().dependencies {
                if let Some(dep_record) = self.registry.get(dep).await {
                    dependencies.insert(dep.clone(), dep_record.handle().await);
                }
            }

            record.transition(ModuleState::Setup).await?;

            let tasks = self.context.scheduler().group(id);
            let setup_ctx =
                SetupContext::new(self.context.clone(), id, tasks.clone(), dependencies);
            let span = setup_ctx.logger().span().clone();

            let result = {
                let mut instance = record.instance().lock().await;
                instance
                    .on_setup(setup_ctx)
                    .instrument(span)
                    .await
                    .map(|_| instance.capabilities())
            };

            match result {
                Ok(capabilities) => {
                    record.set_capabilities(capabilities).await;
                    self.task_groups.insert(id.clone(), tasks);
                    info!("Module {} set up", id);
                    report.succeeded.push(id.clone());
                }
                Err(source) => {
                    error!("Module {} setup failed: {}", id, source);
                    tasks.shutdown(Duration::ZERO).await;
                    record.fail(source.to_string(), None).await;
                    report.failures.push(OrchestratorError::ModuleSetup {
                        module: id.clone(),
                        source,
                    });
                }
            }
        }

        info!(
            "Module setup complete: {} ok, {} failed",
            report.succeeded.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Start every module that completed setup, in activation order
    pub async fn start_all(&mut self) -> LifecycleReport {
        info!("Starting modules");

        let mut report = LifecycleReport {
            activation_order: self.activation_order.clone(),
            ..Default::default()
        };

        for id in self.activation_order.clone() {
            let Some(record) = self.registry.get(&id).await else {
                continue;
            };
            if record.state().await != ModuleState::Setup {
                continue;
            }

            if let Some(failure) = self.failed_dependency(&record, &[ModuleState::Started]).await {
                self.record_dependency_failure(&record, failure, &mut report).await;
                continue;
            }

            let span = self.context.logger(&id).span().clone();
            let result = {
                let mut instance = record.instance().lock().await;
                instance.on_start().instrument(span).await
            };

            match result {
                Ok(()) => {
                    if let Err(e) = record.transition(ModuleState::Started).await {
                        warn!("{}", e);
                    }
                    report.succeeded.push(id.clone());
                }
                Err(source) => {
                    error!("Module {} start failed: {}", id, source);
                    self.release_tasks(&id, Duration::ZERO).await;
                    record.fail(source.to_string(), None).await;
                    report.failures.push(OrchestratorError::ModuleStart {
                        module: id.clone(),
                        source,
                    });
                }
            }
        }

        info!(
            "Module start complete: {} started, {} failed",
            report.succeeded.len(),
            report.failures.len()
        );
        report
    }

    /// Shut down every started module in reverse activation order
    ///
    /// Never fails: hook errors and timeouts are logged and the module still
    /// ends `Stopped`. Each hook gets at most the per-module window and the
    /// whole pass is bounded by the overall shutdown timeout. Only the first
    /// call does anything.
    pub async fn shutdown_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            debug!("Modules already shut down");
            return report;
        }
        self.shut_down = true;

        info!("Shutting down modules");
        let deadline = Instant::now() + self.shutdown_timeout;

        for id in self.activation_order.clone().iter().rev() {
            if let Some(record) = self.registry.get(id).await {
                self.stop_module(&record, deadline, &mut report).await;
            }
        }

        for (id, tasks) in self.task_groups.drain() {
            debug!("Cancelling remaining tasks of module {}", id);
            tasks.shutdown(Duration::ZERO).await;
        }
        self.context.scheduler().cancel_all();

        info!(
            "Module shutdown complete: {} stopped, {} timed out, {} failed",
            report.stopped.len(),
            report.timed_out.len(),
            report.failed.len()
        );
        report
    }

    /// Handle for `id` if it is registered and started
    pub async fn get_module(&self, id: &str) -> Option<ModuleHandle> {
        self.context.modules().get_module(id).await
    }

    /// Capability `T` published by a started module
    pub async fn get_capability<T: ?Sized + Send + Sync + 'static>(
        &self,
        id: &str,
    ) -> Option<Arc<T>> {
        self.context.modules().get_capability::<T>(id).await
    }

    pub async fn module_state(&self, id: &str) -> Option<ModuleState> {
        Some(self.registry.get(id).await?.state().await)
    }

    /// Status of every registered module, ordered by id
    pub async fn list_modules(&self) -> Vec<ModuleStatus> {
        let mut statuses = Vec::new();
        for record in self.registry.snapshot().await {
            statuses.push(record.status().await);
        }
        statuses
    }

    /// Order produced by the last successful `setup_all`
    pub fn activation_order(&self) -> &[String] {
        &self.activation_order
    }

    /// Time left for the next shutdown step
    fn window(&self, deadline: Instant) -> Duration {
        self.module_shutdown_timeout
            .min(deadline.saturating_duration_since(Instant::now()))
    }

    /// Run one module's shutdown hook and release what it holds
    ///
    /// `Setup` modules skip the hook. Modules in any other state that is not
    /// `Started` only have leftover tasks and subscriptions released.
    async fn stop_module(
        &mut self,
        record: &ModuleRecord,
        deadline: Instant,
        report: &mut ShutdownReport,
    ) {
        let id = record.id().to_string();
        match record.state().await {
            ModuleState::Started => {}
            ModuleState::Setup => {
                self.release_tasks(&id, self.window(deadline)).await;
                self.context.events().unsubscribe_module(&id).await;
                if let Err(e) = record.transition(ModuleState::Stopped).await {
                    warn!("{}", e);
                }
                return;
            }
            _ => {
                self.release_tasks(&id, Duration::ZERO).await;
                self.context.events().unsubscribe_module(&id).await;
                return;
            }
        }

        let window = self.window(deadline);
        let span = self.context.logger(&id).span().clone();
        let outcome = with_custom_timeout(
            async {
                let mut instance = record.instance().lock().await;
                instance.on_shutdown().await
            }
            .instrument(span),
            window,
        )
        .await;

        match outcome {
            Ok(Ok(())) => debug!("Module {} shutdown hook completed", id),
            Ok(Err(e)) => {
                warn!("Module {} shutdown hook failed: {}", id, e);
                report.failed.push((id.clone(), e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Module {} shutdown hook did not return within {:?}, continuing",
                    id, window
                );
                report.timed_out.push(id.clone());
            }
        }

        self.release_tasks(&id, self.window(deadline)).await;
        self.context.events().unsubscribe_module(&id).await;

        if let Err(e) = record.transition(ModuleState::Stopped).await {
            warn!("{}", e);
        }
        report.stopped.push(id);
    }

    async fn release_tasks(&mut self, id: &str, timeout: Duration) {
        if let Some(tasks) = self.task_groups.remove(id) {
            if !tasks.shutdown(timeout).await {
                warn!("Module {} left background tasks running past shutdown", id);
            }
        }
    }

    /// First declared dependency whose state is not in `acceptable`
    ///
    /// Returns (dependency, root failure).
    async fn failed_dependency(
        &self,
        record: &ModuleRecord,
        acceptable: &[ModuleState],
    ) -> Option<(String, String)> {
        for dep in &record.descriptor().dependencies {
            let Some(dep_record) = self.registry.get(dep).await else {
                return Some((dep.clone(), dep.clone()));
            };
            if acceptable.contains(&dep_record.state().await) {
                continue;
            }
            let root = dep_record.root_failure().await.unwrap_or_else(|| dep.clone());
            return Some((dep.clone(), root));
        }
        None
    }

    async fn record_dependency_failure(
        &mut self,
        record: &ModuleRecord,
        (dependency, root): (String, String),
        report: &mut LifecycleReport,
    ) {
        let id = record.id().to_string();
        let err = OrchestratorError::DependencyFailed {
            module: id.clone(),
            dependency,
            root: root.clone(),
        };
        error!("{}", err);
        self.release_tasks(&id, Duration::ZERO).await;
        record.fail(err.to_string(), Some(root)).await;
        report.failures.push(err);
    }
}
