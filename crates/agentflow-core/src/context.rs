use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

/// Run-scoped key/value store shared by every node invocation.
///
/// Cloning the handle shares the underlying store; a fresh context is created
/// at the start of each engine run. Values are JSON so that any node kind can
/// exchange data with any other without a port wire.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with seed values.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        // A panicking processor must not make the context unusable for the rest of the run.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a copy of a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.lock()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Set a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    /// Set a string value.
    pub fn set_str(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), Value::String(value.into()));
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Detached, read-only copy of the current store.
    ///
    /// This is what expression kinds evaluate against: they see the values but
    /// have no handle through which to mutate the run's context.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().clone()
    }

    /// Whether two handles share the same underlying store.
    pub fn same_store(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
