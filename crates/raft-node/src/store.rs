//! # store
//!
//! why: a node needs somewhere to apply committed commands
//! relations: implements raft_core::StateMachine; read directly by the console's `get`
//! what: MemoryStore

use raft_core::StateMachine;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// In-memory key-value map fed by committed entries
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    fn data(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateMachine for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) {
        trace!(key, bytes = value.len(), "set");
        self.data().insert(key.to_string(), value.to_vec());
    }

    fn delete(&self, key: &str) {
        trace!(key, "delete");
        self.data().remove(key);
    }
}
