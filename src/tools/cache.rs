//! Memoized tool results, keyed by tool name and serialized arguments

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tool_name: String,
    arguments: String,
}

impl CacheKey {
    fn new(tool_name: &str, arguments: &Value) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ToolCache {
    cache: Arc<RwLock<HashMap<CacheKey, Value>>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, tool_name: &str, arguments: &Value) -> Option<Value> {
        let key = CacheKey::new(tool_name, arguments);
        self.cache.read().ok()?.get(&key).cloned()
    }

    pub fn insert(&self, tool_name: &str, arguments: &Value, result: Value) {
        let key = CacheKey::new(tool_name, arguments);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, result);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new()
    }
}
