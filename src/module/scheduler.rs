//! Background task ownership for modules
//!
//! Each module gets its own [`TaskGroup`] at setup. Tasks spawned through it
//! observe a cancellation token derived from the scheduler's root token, so
//! shutting down one module never touches another module's work, while
//! [`TaskScheduler::cancel_all`] still reaches everything.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Factory for per-module task groups
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    root: CancellationToken,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh task group for `module_id`
    pub fn group(&self, module_id: &str) -> TaskGroup {
        TaskGroup {
            module_id: Arc::from(module_id),
            token: self.root.child_token(),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cancel every group created by this scheduler
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

/// Background tasks owned by one module
#[derive(Clone)]
pub struct TaskGroup {
    module_id: Arc<str>,
    token: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskGroup {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Token that fires when the group is shut down
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `task` until it finishes or the group is cancelled
    pub async fn spawn<F>(&self, name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            warn!("Module {}: not spawning {} after shutdown", self.module_id, name);
            return;
        }

        let token = self.token.clone();
        let module_id = Arc::clone(&self.module_id);
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Module {}: task {} cancelled", module_id, name);
                }
                _ = task => {
                    debug!("Module {}: task {} finished", module_id, name);
                }
            }
        });

        let mut handles = self.handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Run `tick` every `period` until the group is cancelled
    ///
    /// The first tick fires after one full period.
    pub async fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.spawn(name, async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }
        })
        .await;
    }

    /// Tasks that have not finished yet
    pub async fn active_tasks(&self) -> usize {
        self.handles
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Cancel all tasks and wait up to `timeout` for them to finish
    ///
    /// Tasks still running afterwards are aborted. Returns `true` if every task
    /// ended within the window. Safe to call more than once.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);
        if handles.is_empty() {
            return true;
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "Module {}: background tasks did not stop within {:?}, aborting",
                    self.module_id, timeout
                );
                for handle in abort_handles {
                    handle.abort();
                }
                false
            }
        }
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("module_id", &self.module_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
