//! Shared fixtures for lifecycle tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use survival_modules::module::scheduler::TaskGroup;
use survival_modules::{
    Capabilities, Module, ModuleDescriptor, ModuleError, ModuleManager, SetupContext,
};

/// Ordered record of hook invocations, e.g. `setup:core`, `start:core`
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Module ids that ran `phase`, in call order
    pub fn phase(&self, phase: &str) -> Vec<String> {
        let prefix = format!("{}:", phase);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

/// Configurable module for lifecycle tests
pub struct TestModule {
    descriptor: ModuleDescriptor,
    journal: Journal,
    fail_setup: bool,
    fail_start: bool,
    fail_shutdown: bool,
    hang_shutdown: Option<Duration>,
    capabilities: Capabilities,
    seen_dependencies: Arc<Mutex<Vec<String>>>,
    tasks: Arc<Mutex<Option<TaskGroup>>>,
}

impl TestModule {
    pub fn new(id: &str, journal: &Journal) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(id),
            journal: journal.clone(),
            fail_setup: false,
            fail_start: false,
            fail_shutdown: false,
            hang_shutdown: None,
            capabilities: Capabilities::new(),
            seen_dependencies: Arc::new(Mutex::new(Vec::new())),
            tasks: Arc::new(Mutex::new(None)),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.descriptor = self.descriptor.depends_on(id);
        self
    }

    pub fn enabled(mut self) -> Self {
        self.descriptor = self.descriptor.enabled_by_default(true);
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn hanging_shutdown(mut self, duration: Duration) -> Self {
        self.hang_shutdown = Some(duration);
        self
    }

    pub fn with_capability<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.capabilities.insert(value);
        self
    }

    /// Dependency ids visible in the setup context, filled in at setup
    pub fn seen_dependencies(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.seen_dependencies)
    }

    /// Task group handed over at setup
    pub fn task_slot(&self) -> Arc<Mutex<Option<TaskGroup>>> {
        Arc::clone(&self.tasks)
    }
}

#[async_trait]
impl Module for TestModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn on_setup(&mut self, ctx: SetupContext) -> Result<(), ModuleError> {
        self.journal.push(format!("setup:{}", self.descriptor.id));
        *self.seen_dependencies.lock().unwrap() =
            ctx.dependency_ids().map(str::to_string).collect();
        *self.tasks.lock().unwrap() = Some(ctx.tasks().clone());

        if self.fail_setup {
            return Err(ModuleError::SetupFailed(format!(
                "{} refused to set up",
                self.descriptor.id
            )));
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<(), ModuleError> {
        self.journal.push(format!("start:{}", self.descriptor.id));
        if self.fail_start {
            return Err(ModuleError::OperationError(format!(
                "{} refused to start",
                self.descriptor.id
            )));
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<(), ModuleError> {
        self.journal.push(format!("shutdown:{}", self.descriptor.id));
        if let Some(duration) = self.hang_shutdown {
            tokio::time::sleep(duration).await;
        }
        if self.fail_shutdown {
            return Err(ModuleError::OperationError("flush failed".to_string()));
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }
}

/// Manager over a fresh temporary configuration directory
pub struct Fixture {
    pub temp_dir: TempDir,
    pub manager: ModuleManager,
    pub journal: Journal,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let manager = ModuleManager::new(temp_dir.path());
        Self {
            temp_dir,
            manager,
            journal: Journal::new(),
        }
    }
}
