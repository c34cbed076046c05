//! Module registry
//!
//! Owns one [`ModuleRecord`] per registered module. Each record carries its own
//! lock, so status queries from background tasks never contend with unrelated
//! modules.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::module::capability::{Capabilities, ModuleHandle};
use crate::module::error::OrchestratorError;
use crate::module::traits::{Module, ModuleDescriptor, ModuleState};

/// Mutable part of a record, guarded by a single per-record lock
#[derive(Default)]
struct RecordStatus {
    state: ModuleState,
    failure: Option<String>,
    root_failure: Option<String>,
    capabilities: Capabilities,
}

/// Registered module
pub struct ModuleRecord {
    descriptor: ModuleDescriptor,
    enabled: AtomicBool,
    status: RwLock<RecordStatus>,
    instance: Mutex<Box<dyn Module>>,
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.descriptor.id)
            .field("enabled", &self.enabled.load(Ordering::SeqCst))
            .finish()
    }
}

/// Point-in-time view of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub state: ModuleState,
    pub enabled: bool,
    /// Failure cause when `state` is `Error`
    pub failure: Option<String>,
}

impl ModuleRecord {
    fn new(instance: Box<dyn Module>) -> Self {
        let descriptor = instance.descriptor().clone();
        Self {
            enabled: AtomicBool::new(descriptor.enabled_by_default),
            descriptor,
            status: RwLock::new(RecordStatus::default()),
            instance: Mutex::new(instance),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The module implementation
    ///
    /// Only the orchestrator locks this, and only for the duration of a hook.
    pub fn instance(&self) -> &Mutex<Box<dyn Module>> {
        &self.instance
    }

    pub async fn state(&self) -> ModuleState {
        self.status.read().await.state
    }

    /// Move to `next`, logging the transition
    pub async fn transition(&self, next: ModuleState) -> Result<(), OrchestratorError> {
        let mut status = self.status.write().await;
        let current = status.state;
        if !current.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                module: self.descriptor.id.clone(),
                from: current,
                to: next,
            });
        }
        status.state = next;
        info!("Module {}: {} -> {}", self.descriptor.id, current, next);
        Ok(())
    }

    /// Move to `Error`, recording the cause and the module the failure started at
    pub async fn fail(&self, cause: String, root: Option<String>) {
        let mut status = self.status.write().await;
        let current = status.state;
        if current != ModuleState::Error && !current.can_transition_to(ModuleState::Error) {
            warn!(
                "Module {}: ignoring failure in terminal state {}: {}",
                self.descriptor.id, current, cause
            );
            return;
        }
        info!("Module {}: {} -> {}", self.descriptor.id, current, ModuleState::Error);
        status.state = ModuleState::Error;
        status.failure = Some(cause);
        status.root_failure = Some(root.unwrap_or_else(|| self.descriptor.id.clone()));
    }

    /// Module whose own failure caused this record to fail
    pub async fn root_failure(&self) -> Option<String> {
        self.status.read().await.root_failure.clone()
    }

    pub async fn set_capabilities(&self, capabilities: Capabilities) {
        debug!(
            "Module {} publishes {} capabilities",
            self.descriptor.id,
            capabilities.len()
        );
        self.status.write().await.capabilities = capabilities;
    }

    /// Handle over the current state and published capabilities
    pub async fn handle(&self) -> ModuleHandle {
        let status = self.status.read().await;
        ModuleHandle::new(
            self.descriptor.clone(),
            status.state,
            status.capabilities.clone(),
        )
    }

    pub async fn status(&self) -> ModuleStatus {
        let status = self.status.read().await;
        ModuleStatus {
            id: self.descriptor.id.clone(),
            display_name: self.descriptor.display_name.clone(),
            version: self.descriptor.version.clone(),
            state: status.state,
            enabled: self.is_enabled(),
            failure: status.failure.clone(),
        }
    }
}

/// Set of known modules
///
/// Owned (behind an `Arc`) by the [`ModuleManager`](crate::module::manager::ModuleManager);
/// there is no process-wide instance.
#[derive(Default)]
pub struct ModuleRegistry {
    records: RwLock<BTreeMap<String, Arc<ModuleRecord>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module in `Disabled`
    pub async fn insert(
        &self,
        instance: Box<dyn Module>,
    ) -> Result<Arc<ModuleRecord>, OrchestratorError> {
        let descriptor = instance.descriptor();
        if descriptor.depends_on_self() {
            return Err(OrchestratorError::InvalidDependency {
                id: descriptor.id.clone(),
            });
        }

        let mut records = self.records.write().await;
        if records.contains_key(&descriptor.id) {
            return Err(OrchestratorError::DuplicateModule {
                id: descriptor.id.clone(),
            });
        }

        let record = Arc::new(ModuleRecord::new(instance));
        records.insert(record.id().to_string(), Arc::clone(&record));
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ModuleRecord>> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// All records ordered by id
    pub async fn snapshot(&self) -> Vec<Arc<ModuleRecord>> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn descriptors(&self) -> BTreeMap<String, ModuleDescriptor> {
        self.records
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.descriptor().clone()))
            .collect()
    }

    /// Apply an enablement map from configuration
    ///
    /// Ids missing from `enablement` fall back to the module's own default.
    /// Unknown ids are ignored with a warning and returned.
    pub async fn apply_enablement(&self, enablement: &BTreeMap<String, bool>) -> Vec<String> {
        let records = self.records.read().await;

        for (id, record) in records.iter() {
            let enabled = enablement
                .get(id)
                .copied()
                .unwrap_or(record.descriptor().enabled_by_default);
            record.set_enabled(enabled);
        }

        let unknown: Vec<String> = enablement
            .keys()
            .filter(|id| !records.contains_key(*id))
            .cloned()
            .collect();
        for id in &unknown {
            warn!("Ignoring configuration for unknown module: {}", id);
        }
        unknown
    }
}
