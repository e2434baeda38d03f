//! In-memory context store.

use async_trait::async_trait;
use gantry_core::ports::ContextStore;
use gantry_core::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Context store backed by process memory. Contexts are registered before
/// runs start; the store is read-only while runs execute.
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named context. Replaces any previous registration under
    /// the same name.
    pub async fn register(&self, name: &str, secrets: HashMap<String, String>) {
        info!(context = %name, keys = secrets.len(), "Registering context");
        let mut contexts = self.contexts.write().await;
        contexts.insert(name.to_string(), secrets);
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn lookup(&self, context: &str) -> Result<Option<HashMap<String, String>>> {
        let contexts = self.contexts.read().await;
        Ok(contexts.get(context).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_registered_context() {
        let store = InMemoryContextStore::new();
        let mut secrets = HashMap::new();
        secrets.insert("DOCKER_TOKEN".to_string(), "hunter2".to_string());
        store.register("registry", secrets).await;

        let found = store.lookup("registry").await.unwrap().unwrap();
        assert_eq!(found.get("DOCKER_TOKEN").unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_lookup_missing_context() {
        let store = InMemoryContextStore::new();
        assert!(store.lookup("nope").await.unwrap().is_none());
    }
}
