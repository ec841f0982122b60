//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-node, which owns timers, locking and the network
//! what: role state machine, election logic, log management, peer tracking, message types

pub mod command;
pub mod election;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod peers;

pub use command::{Command, Operation, StateMachine};
pub use election::{quorum_size, ElectionTimer, VoteTally};
pub use error::{RaftError, Rejection};
pub use log::{Log, LogEntry, LogIndex, LogPosition, Term};
pub use message::{AppendRequest, AppendResponse, RaftMessage, VoteRequest, VoteResponse};
pub use node::{NodeId, RaftConfig, RaftNode, Role};
pub use peers::PeerTracker;
