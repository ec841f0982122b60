//! # command
//!
//! why: define the unit of replication and the store it is eventually applied to
//! relations: carried inside log.rs entries, applied by the host once committed
//! what: Operation, Command, StateMachine capability

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a command does to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Set,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Set => write!(f, "set"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A single replicated command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub op: Operation,
    pub key: String,
    /// Ignored for `Delete`
    pub value: Vec<u8>,
}

impl Command {
    /// Build a `Set` command
    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Operation::Set,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a `Delete` command
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: Operation::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Hand the command to the store according to its operation
    pub fn apply_to(&self, store: &dyn StateMachine) {
        match self.op {
            Operation::Set => store.set(&self.key, &self.value),
            Operation::Delete => store.delete(&self.key),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operation::Set => write!(f, "set {} ({} bytes)", self.key, self.value.len()),
            Operation::Delete => write!(f, "delete {}", self.key),
        }
    }
}

/// The data store that receives committed commands
///
/// Both calls are fire-and-forget: the consensus layer never reads the store
/// back and assumes every call succeeds.
pub trait StateMachine: Send + Sync {
    fn set(&self, key: &str, value: &[u8]);
    fn delete(&self, key: &str);
}
