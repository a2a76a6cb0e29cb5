//! The sandbox pool: a `pluginId -> Sandbox` map bounded at a fixed size,
//! evicting by logical `last_accessed` order rather than wall-clock time
//! (spec.md §4.E).

use std::collections::HashMap;

use crate::sandbox::Sandbox;

pub struct LruPool {
    max_size: usize,
    sandboxes: HashMap<String, Sandbox>,
}

impl LruPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            sandboxes: HashMap::new(),
        }
    }

    pub fn get_mut(&mut self, plugin_id: &str) -> Option<&mut Sandbox> {
        self.sandboxes.get_mut(plugin_id)
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.sandboxes.contains_key(plugin_id)
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    /// If at capacity, evict and dispose the least-recently-accessed entry,
    /// returning its plugin id. A no-op below capacity.
    pub fn make_room(&mut self) -> Option<String> {
        if self.sandboxes.len() < self.max_size {
            return None;
        }
        let victim = self
            .sandboxes
            .iter()
            .min_by_key(|(_, sandbox)| sandbox.last_accessed)
            .map(|(id, _)| id.clone())?;
        if let Some(mut sandbox) = self.sandboxes.remove(&victim) {
            sandbox.mark_evicted();
        }
        Some(victim)
    }

    pub fn insert(&mut self, plugin_id: String, sandbox: Sandbox) {
        self.sandboxes.insert(plugin_id, sandbox);
    }

    pub fn remove(&mut self, plugin_id: &str) -> Option<Sandbox> {
        self.sandboxes.remove(plugin_id)
    }

    /// Dispose every live sandbox, used by `PluginManager::dispose_all` at
    /// shutdown.
    pub fn dispose_all(&mut self) {
        for (_, mut sandbox) in self.sandboxes.drain() {
            sandbox.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{HostBridge, SandboxConfig, SandboxError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct NullBridge;

    #[async_trait]
    impl HostBridge for NullBridge {
        async fn fetch(&self, _plugin_id: &str, _url: &str, _opts: Value) -> Result<Value, SandboxError> {
            Ok(Value::Null)
        }
        async fn get_secret(&self, _plugin_id: &str, _key: &str) -> Result<Option<String>, SandboxError> {
            Ok(None)
        }
        async fn store_items(&self, _plugin_id: &str, _items: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn query_items(&self, _plugin_id: &str, _filter: Value) -> Result<Value, SandboxError> {
            Ok(Value::Array(vec![]))
        }
        async fn mark_read(&self, _plugin_id: &str, _ids: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn archive(&self, _plugin_id: &str, _ids: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn request_ai(&self, _plugin_id: &str, _op: &str, _params: Value) -> Result<Value, SandboxError> {
            Ok(Value::Null)
        }
        fn emit_event(&self, _plugin_id: &str, _name: &str, _data: Value) {}
        fn log(&self, _plugin_id: &str, _level: &str, _message: &str) {}
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed_at_capacity() {
        let mut pool = LruPool::new(2);
        for (id, accessed) in [("a", 1u64), ("b", 5u64)] {
            let mut sandbox = Sandbox::new(id.to_string(), Arc::new(NullBridge), SandboxConfig::default());
            sandbox.last_accessed = accessed;
            pool.insert(id.to_string(), sandbox);
        }
        assert_eq!(pool.len(), 2);
        let evicted = pool.make_room();
        assert_eq!(evicted, Some("a".to_string()));
        assert!(!pool.contains("a"));
        assert!(pool.contains("b"));
    }
}
