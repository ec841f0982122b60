//! # error
//!
//! why: outbound rpc failures need a type the node can log and move past
//! relations: returned by every Transport implementation, produced by gateway.rs and tcp.rs
//! what: TransportError

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("rpc to {peer} timed out after {after:?}")]
    Timeout { peer: String, after: Duration },

    #[error("peer {0} is unreachable")]
    Unreachable(String),

    #[error("expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}
