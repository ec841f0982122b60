//! # raft-node
//!
//! why: host the raft-core state machine as a running cluster member
//! relations: depends on raft-core for all consensus decisions
//! what: Node orchestrator, rpc gateway (in-process and tcp), configuration, store, operator console

pub mod config;
pub mod console;
pub mod error;
pub mod gateway;
pub mod node;
pub mod store;
pub mod tcp;

pub use config::{NodeArgs, NodeConfig};
pub use error::TransportError;
pub use gateway::{LocalNetwork, LocalTransport, RpcHandler, Transport};
pub use node::Node;
pub use store::MemoryStore;
pub use tcp::{TcpGateway, TcpTransport};
