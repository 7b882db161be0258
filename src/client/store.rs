//! Persisted key-value storage abstraction.
//!
//! Mirrors the extension's two storage areas: session-scoped local state and
//! cross-device-synced user settings. Writes bump a change feed that other
//! open pages observe, so tabs stay in sync without server requests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Session-scoped state: status cache, conversation, intent.
    Session,
    /// Cross-device-synced user settings.
    Sync,
}

pub trait StateStore: Send + Sync {
    fn get(&self, area: Area, key: &str) -> Option<Value>;
    fn set(&self, area: Area, key: &str, value: Value);
    fn remove(&self, area: Area, key: &str);
    /// Change feed bumped on every write.
    fn watch(&self) -> watch::Receiver<u64>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn get(&self, area: Area, key: &str) -> Option<Value> {
        (**self).get(area, key)
    }

    fn set(&self, area: Area, key: &str, value: Value) {
        (**self).set(area, key, value);
    }

    fn remove(&self, area: Area, key: &str) {
        (**self).remove(area, key);
    }

    fn watch(&self) -> watch::Receiver<u64> {
        (**self).watch()
    }
}

/// In-memory store used by tests and headless embedding.
pub struct MemoryStore {
    entries: Mutex<HashMap<(Area, String), Value>>,
    version: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            version: watch::channel(0).0,
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, area: Area, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .expect("store poisoned")
            .get(&(area, key.to_string()))
            .cloned()
    }

    fn set(&self, area: Area, key: &str, value: Value) {
        self.entries
            .lock()
            .expect("store poisoned")
            .insert((area, key.to_string()), value);
        self.bump();
    }

    fn remove(&self, area: Area, key: &str) {
        self.entries
            .lock()
            .expect("store poisoned")
            .remove(&(area, key.to_string()));
        self.bump();
    }

    fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
