//! # gateway
//!
//! why: separate the node from how its messages travel
//! relations: Node implements RpcHandler and calls peers through a Transport;
//!            tcp.rs provides the networked pair, LocalNetwork the in-process one
//! what: RpcHandler, Transport, dispatch, LocalNetwork, LocalTransport

use crate::error::TransportError;
use raft_core::{AppendRequest, AppendResponse, RaftMessage, VoteRequest, VoteResponse};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Inbound side: one handler per node, registered at startup
pub trait RpcHandler: Send + Sync + 'static {
    fn request_vote(&self, req: VoteRequest) -> VoteResponse;
    fn append_entries(&self, req: AppendRequest) -> AppendResponse;
}

/// Outbound side: issue calls to a peer by address
pub trait Transport: Send + Sync + 'static {
    fn request_vote(
        &self,
        peer: &str,
        req: VoteRequest,
    ) -> impl Future<Output = Result<VoteResponse, TransportError>> + Send;

    fn append_entries(
        &self,
        peer: &str,
        req: AppendRequest,
    ) -> impl Future<Output = Result<AppendResponse, TransportError>> + Send;
}

/// Hand a request to the handler and wrap its answer
pub fn dispatch(handler: &dyn RpcHandler, msg: RaftMessage) -> Result<RaftMessage, TransportError> {
    match msg {
        RaftMessage::VoteRequest(req) => Ok(handler.request_vote(req).into()),
        RaftMessage::AppendEntries(req) => Ok(handler.append_entries(req).into()),
        other => Err(TransportError::UnexpectedResponse {
            expected: "a request",
            got: other.kind(),
        }),
    }
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
    disconnected: HashSet<String>,
}

/// In-process network of handlers keyed by address
///
/// A disconnected address can neither send nor receive, which is enough to
/// model a partitioned node.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.registry().handlers.insert(addr.into(), handler);
    }

    pub fn disconnect(&self, addr: &str) {
        self.registry().disconnected.insert(addr.to_string());
    }

    pub fn reconnect(&self, addr: &str) {
        self.registry().disconnected.remove(addr);
    }

    /// Transport used by the node registered at `local`
    pub fn transport(&self, local: impl Into<String>) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            local: local.into(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, from: &str, to: &str) -> Result<Arc<dyn RpcHandler>, TransportError> {
        let registry = self.registry();
        if registry.disconnected.contains(from) || registry.disconnected.contains(to) {
            return Err(TransportError::Unreachable(to.to_string()));
        }
        registry
            .handlers
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.to_string()))
    }
}

pub struct LocalTransport {
    network: LocalNetwork,
    local: String,
}

impl Transport for LocalTransport {
    async fn request_vote(&self, peer: &str, req: VoteRequest) -> Result<VoteResponse, TransportError> {
        let handler = self.network.route(&self.local, peer)?;
        trace!(from = %self.local, to = peer, "vote request");
        tokio::task::yield_now().await;
        Ok(handler.request_vote(req))
    }

    async fn append_entries(
        &self,
        peer: &str,
        req: AppendRequest,
    ) -> Result<AppendResponse, TransportError> {
        let handler = self.network.route(&self.local, peer)?;
        trace!(
            from = %self.local,
            to = peer,
            heartbeat = req.is_heartbeat(),
            entries = req.entries.len(),
            "append request"
        );
        tokio::task::yield_now().await;
        Ok(handler.append_entries(req))
    }
}
