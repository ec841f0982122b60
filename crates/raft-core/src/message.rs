//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, serialized by the host's rpc gateway
//! what: VoteRequest, VoteResponse, AppendRequest, AppendResponse and the RaftMessage envelope

use crate::log::{LogEntry, LogIndex, Term};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Request a vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Response to a vote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Responder's term, so a stale candidate can step down
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_index: LogIndex,
    pub prev_term: Term,
    pub leader_commit: LogIndex,
    pub entries: Vec<LogEntry>,
}

impl AppendRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Response to an append request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub term: Term,
    pub success: bool,
}

/// Every message that crosses the wire between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendRequest),
    AppendEntriesResponse(AppendResponse),
}

impl RaftMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::VoteRequest(_) => "vote_request",
            RaftMessage::VoteResponse(_) => "vote_response",
            RaftMessage::AppendEntries(_) => "append_entries",
            RaftMessage::AppendEntriesResponse(_) => "append_entries_response",
        }
    }
}

impl From<VoteRequest> for RaftMessage {
    fn from(req: VoteRequest) -> Self {
        RaftMessage::VoteRequest(req)
    }
}

impl From<VoteResponse> for RaftMessage {
    fn from(resp: VoteResponse) -> Self {
        RaftMessage::VoteResponse(resp)
    }
}

impl From<AppendRequest> for RaftMessage {
    fn from(req: AppendRequest) -> Self {
        RaftMessage::AppendEntries(req)
    }
}

impl From<AppendResponse> for RaftMessage {
    fn from(resp: AppendResponse) -> Self {
        RaftMessage::AppendEntriesResponse(resp)
    }
}
