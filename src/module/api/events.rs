//! Event notification system for modules
//!
//! Handles topic subscriptions and delivery to modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::module::traits::ModuleError;

/// Default capacity of a module's event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event delivered to subscribed modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Topic, e.g. `player.join` or `claims.created`
    pub topic: String,
    /// Publisher (module id or `host`)
    pub source: String,
    /// Topic-specific payload
    pub payload: serde_json::Value,
}

/// Event subscription registry
pub struct EventBus {
    /// Subscribers by topic
    subscribers: Arc<TokioMutex<HashMap<String, Vec<String>>>>,
    /// Event channels for each module (module_id -> sender)
    module_channels: Arc<TokioMutex<HashMap<String, mpsc::Sender<Event>>>>,
    channel_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(TokioMutex::new(HashMap::new())),
            module_channels: Arc::new(TokioMutex::new(HashMap::new())),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Subscribe a module to topics, delivering into `sender`
    ///
    /// A later subscription from the same module replaces its channel.
    pub async fn subscribe_module(
        &self,
        module_id: &str,
        topics: &[&str],
        sender: mpsc::Sender<Event>,
    ) {
        info!("Module {} subscribing to topics: {:?}", module_id, topics);

        let mut subscribers = self.subscribers.lock().await;
        let mut channels = self.module_channels.lock().await;

        channels.insert(module_id.to_string(), sender);

        for topic in topics {
            let list = subscribers.entry(topic.to_string()).or_default();
            if !list.iter().any(|id| id == module_id) {
                list.push(module_id.to_string());
            }
        }
    }

    /// Subscribe a module to topics and return the receiving end
    pub async fn subscribe(&self, module_id: &str, topics: &[&str]) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.subscribe_module(module_id, topics, tx).await;
        rx
    }

    /// Unsubscribe a module (when it shuts down)
    pub async fn unsubscribe_module(&self, module_id: &str) {
        debug!("Module {} unsubscribing from events", module_id);

        let mut subscribers = self.subscribers.lock().await;
        let mut channels = self.module_channels.lock().await;

        channels.remove(module_id);

        for list in subscribers.values_mut() {
            list.retain(|id| id != module_id);
        }
        subscribers.retain(|_, list| !list.is_empty());
    }

    /// Publish an event to every module subscribed to `topic`
    ///
    /// Returns how many modules received it. Modules whose channel is closed
    /// are dropped from the bus.
    pub async fn publish(
        &self,
        topic: &str,
        source: &str,
        payload: serde_json::Value,
    ) -> Result<usize, ModuleError> {
        debug!("Publishing event {} from {}", topic, source);

        let targets: Vec<(String, mpsc::Sender<Event>)> = {
            let subscribers = self.subscribers.lock().await;
            let channels = self.module_channels.lock().await;
            subscribers
                .get(topic)
                .into_iter()
                .flatten()
                .filter_map(|id| channels.get(id).map(|sender| (id.clone(), sender.clone())))
                .collect()
        };

        if targets.is_empty() {
            return Ok(0);
        }

        let event = Event {
            topic: topic.to_string(),
            source: source.to_string(),
            payload,
        };

        // Locks are released before sending so a slow subscriber cannot block
        // subscription changes.
        let mut delivered = 0;
        let mut failed_modules = Vec::new();
        for (module_id, sender) in targets {
            if let Err(e) = sender.send(event.clone()).await {
                warn!("Failed to send event to module {}: {}", module_id, e);
                failed_modules.push(module_id);
            } else {
                delivered += 1;
            }
        }

        for module_id in failed_modules {
            self.unsubscribe_module(&module_id).await;
        }

        Ok(delivered)
    }

    /// Modules subscribed to `topic`
    pub async fn get_subscribers(&self, topic: &str) -> Vec<String> {
        let subscribers = self.subscribers.lock().await;
        subscribers.get(topic).cloned().unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
