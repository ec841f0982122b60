//! # error
//!
//! why: give callers typed failures instead of bare booleans
//! relations: RaftError returned by node.rs propose and config validation,
//!            Rejection returned by log.rs append and collapsed to `success: false` on the wire
//! what: RaftError, Rejection

use crate::log::{LogIndex, Term};
use crate::node::{NodeId, Role};
use thiserror::Error;

/// Failures surfaced to the caller of the client path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaftError {
    /// Writes are only accepted by the leader; there is no forwarding
    #[error("node {id} is not the leader (role: {role}, known leader: {leader:?})")]
    NotLeader {
        id: NodeId,
        role: Role,
        leader: Option<NodeId>,
    },

    /// The entry was appended locally but a majority never acknowledged it
    #[error("entry {index} acknowledged by {acknowledged} of {required} required nodes")]
    QuorumNotReached {
        index: LogIndex,
        acknowledged: usize,
        required: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why an append request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("stale term {term}, current term is {current}")]
    StaleTerm { term: Term, current: Term },

    #[error("prev index {prev_index} is beyond local index {current_index}")]
    MissingHistory {
        prev_index: LogIndex,
        current_index: LogIndex,
    },

    #[error("term at index {index} is {found}, leader expected {expected}")]
    TermMismatch {
        index: LogIndex,
        expected: Term,
        found: Term,
    },

    #[error("entry {found} does not follow index {after}")]
    NonContiguous { after: LogIndex, found: LogIndex },

    #[error("entry {index} conflicts with committed history")]
    CommittedConflict { index: LogIndex },
}
