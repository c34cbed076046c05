//! Shared key/value store
//!
//! Small JSON-valued store for data several modules read (e.g. a player's
//! level, read by claims to size their claim limit). Keys are conventionally
//! prefixed with the owning module id: `leveling.steve.level`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::module::traits::ModuleError;

#[derive(Debug, Default)]
pub struct SharedStore {
    values: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ModuleError> {
        let value = serde_json::to_value(value)?;
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    /// Typed read; `Ok(None)` if the key is absent
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ModuleError> {
        let value = self.values.read().await.get(key).cloned();
        value.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    pub async fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.values.write().await.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }

    /// Keys starting with `prefix`, in order
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.values
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every key starting with `prefix`; returns how many were removed
    pub async fn clear_prefix(&self, prefix: &str) -> usize {
        let mut values = self.values.write().await;
        let before = values.len();
        values.retain(|k, _| !k.starts_with(prefix));
        before - values.len()
    }
}
