//! Typed capability lookup
//!
//! Modules publish shared interfaces (usually `Arc<dyn SomeTrait>`) keyed by
//! type. Other modules look them up through a [`ModuleLookup`], which only
//! reveals modules in [`ModuleState::Started`], so half-initialized modules
//! are never observable.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::module::registry::ModuleRegistry;
use crate::module::traits::{ModuleDescriptor, ModuleState};

/// Type-keyed set of interfaces a module exposes
#[derive(Clone, Default)]
pub struct Capabilities {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under its type (which may be a trait object)
    pub fn insert<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) {
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.entries.insert(TypeId::of::<T>(), erased);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| (**entry).downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn contains<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Snapshot of one module as seen by other modules
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    descriptor: ModuleDescriptor,
    state: ModuleState,
    capabilities: Capabilities,
}

impl ModuleHandle {
    pub(crate) fn new(
        descriptor: ModuleDescriptor,
        state: ModuleState,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            descriptor,
            state,
            capabilities,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// State at the time the handle was taken
    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn capability<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.capabilities.get::<T>()
    }
}

/// Read-only access to started modules
///
/// Cheap to clone; safe to use from background tasks.
#[derive(Clone)]
pub struct ModuleLookup {
    registry: Arc<ModuleRegistry>,
}

impl ModuleLookup {
    pub(crate) fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    /// Handle for `id`, or `None` if it is unregistered or not started
    pub async fn get_module(&self, id: &str) -> Option<ModuleHandle> {
        let record = self.registry.get(id).await?;
        let handle = record.handle().await;
        (handle.state() == ModuleState::Started).then_some(handle)
    }

    /// Capability `T` published by `id`, if that module is started
    pub async fn get_capability<T: ?Sized + Send + Sync + 'static>(
        &self,
        id: &str,
    ) -> Option<Arc<T>> {
        self.get_module(id).await?.capability::<T>()
    }

    /// Whether `id` is registered and started
    pub async fn is_started(&self, id: &str) -> bool {
        self.get_module(id).await.is_some()
    }
}

impl fmt::Debug for ModuleLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLookup").finish_non_exhaustive()
    }
}
