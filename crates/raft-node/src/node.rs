//! # node
//!
//! why: drive a RaftNode with real time, real concurrency and a network
//! relations: wraps raft_core::RaftNode behind one lock; talks to peers through a Transport;
//!            answers peers as an RpcHandler; applies committed commands to a StateMachine
//! what: Node (election watcher, heartbeat emitter, apply hot path)

use crate::config::NodeConfig;
use crate::error::TransportError;
use crate::gateway::{RpcHandler, Transport};
use raft_core::{
    AppendRequest, AppendResponse, Command, LogEntry, LogIndex, NodeId, RaftError, RaftNode, Role,
    StateMachine, Term, VoteRequest, VoteResponse,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Resolves once `shutdown` carries `true`, or its sender is gone
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Await an rpc for at most `after`
async fn bounded<R>(
    peer: &str,
    after: Duration,
    rpc: impl Future<Output = Result<R, TransportError>>,
) -> Result<R, TransportError> {
    time::timeout(after, rpc)
        .await
        .map_err(|_| TransportError::Timeout {
            peer: peer.to_string(),
            after,
        })?
}

/// Everything guarded by the node lock
struct Core {
    raft: RaftNode,
    /// When the election watcher next fires
    deadline: Instant,
}

impl Core {
    fn rearm(&mut self) {
        self.deadline = Instant::now() + self.raft.next_election_timeout();
    }
}

struct Inner<T> {
    config: NodeConfig,
    peers: Vec<NodeId>,
    state: Mutex<Core>,
    store: Arc<dyn StateMachine>,
    transport: T,
    timer_reset: Notify,
    shutdown: watch::Sender<bool>,
}

/// A cluster member: cheap to clone, every clone drives the same node
pub struct Node<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Node<T> {
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn StateMachine>,
        transport: T,
    ) -> Result<Self, RaftError> {
        config.raft.validate()?;

        let mut raft = RaftNode::with_config(config.id.clone(), config.peers.clone(), config.raft.clone());
        let deadline = Instant::now() + raft.next_election_timeout();
        let peers = raft.peers.clone();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                peers,
                state: Mutex::new(Core { raft, deadline }),
                store,
                transport,
                timer_reset: Notify::new(),
                shutdown,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn role(&self) -> Role {
        self.lock().raft.role()
    }

    pub fn is_leader(&self) -> bool {
        self.lock().raft.is_leader()
    }

    pub fn current_term(&self) -> Term {
        self.lock().raft.current_term()
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.lock().raft.leader().cloned()
    }

    pub fn last_index(&self) -> LogIndex {
        self.lock().raft.log().current_index()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.lock().raft.log().commit_index()
    }

    pub fn dump(&self) -> String {
        self.lock().raft.dump()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Stop the election watcher, heartbeat emitter and anything serving this node
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Run the election watcher until shutdown
    pub async fn run(&self) {
        info!(node = %self.id(), peers = ?self.inner.peers, "node started");
        self.lock().rearm();
        self.election_loop().await;
        info!(node = %self.id(), "node stopped");
    }

    /// Replicate a command and apply it once a majority holds it
    ///
    /// Waits for every peer, each for at most the rpc timeout. Non-leaders
    /// refuse with `NotLeader`; an entry the round could not commit is
    /// reported as `QuorumNotReached` and stays in the log for a later round.
    pub async fn apply(&self, command: Command) -> Result<(), RaftError> {
        let (entry, requests) = {
            let mut core = self.lock();
            let entry = core.raft.propose(command)?;
            (entry, core.raft.replication_requests())
        };
        debug!(node = %self.id(), index = entry.index, term = entry.term, "replicating command");

        self.replicate(requests).await;

        let core = self.lock();
        match core.raft.log().get(entry.index) {
            Some(stored) if stored.term == entry.term && stored.committed => Ok(()),
            _ => {
                let acknowledged = core.raft.acknowledged(entry.index);
                let required = core.raft.quorum_size();
                warn!(node = %self.id(), index = entry.index, acknowledged, required, "quorum not reached");
                Err(RaftError::QuorumNotReached {
                    index: entry.index,
                    acknowledged,
                    required,
                })
            }
        }
    }

    // -- background activities --

    async fn election_loop(&self) {
        let mut shutdown = self.subscribe_shutdown();
        loop {
            let deadline = self.lock().deadline;
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = self.inner.timer_reset.notified() => continue,
                _ = time::sleep_until(deadline) => {}
            }

            let (request, term, leading) = {
                let mut core = self.lock();
                if Instant::now() < core.deadline {
                    continue;
                }
                if core.raft.is_leader() {
                    core.rearm();
                    continue;
                }
                let request = core.raft.start_election();
                self.settle(&mut core);
                (request, core.raft.current_term(), core.raft.is_leader())
            };

            match request {
                Some(request) => {
                    let node = self.clone();
                    tokio::spawn(async move { node.campaign(request).await });
                }
                None if leading => self.spawn_heartbeat(term),
                None => {}
            }
        }
    }

    async fn campaign(&self, request: VoteRequest) {
        let after = self.inner.config.raft.rpc_deadline();
        let mut calls = JoinSet::new();
        for peer in self.inner.peers.iter().cloned() {
            let node = self.clone();
            let request = request.clone();
            calls.spawn(async move {
                let result = bounded(&peer, after, node.inner.transport.request_vote(&peer, request)).await;
                (peer, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            let Ok((peer, result)) = joined else {
                continue;
            };
            let resp: VoteResponse = match result {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(node = %self.id(), %peer, %err, "vote request failed");
                    continue;
                }
            };
            let won = {
                let mut core = self.lock();
                let won = core.raft.handle_vote_response(&peer, &resp);
                self.settle(&mut core);
                won
            };
            if won {
                self.spawn_heartbeat(request.term);
                return;
            }
        }
    }

    /// One emitter per peer, so a slow peer never delays the others
    fn spawn_heartbeat(&self, term: Term) {
        info!(node = %self.id(), term, "heartbeat started");
        for peer in self.inner.peers.iter().cloned() {
            let node = self.clone();
            tokio::spawn(async move { node.heartbeat_loop(term, peer).await });
        }
    }

    /// Replicate to `peer` on every tick while still leader of `term`
    async fn heartbeat_loop(&self, term: Term, peer: NodeId) {
        let mut shutdown = self.subscribe_shutdown();
        let mut ticker = time::interval(self.inner.config.raft.heartbeat());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            let request = {
                let core = self.lock();
                if !core.raft.is_leader() || core.raft.current_term() != term {
                    break;
                }
                core.raft.replication_request(&peer)
            };
            let Some(request) = request else {
                break;
            };
            self.exchange(&peer, request).await;
            self.commit();
        }
        debug!(node = %self.id(), term, %peer, "heartbeat stopped");
    }

    /// Send each request, record the answers, then commit what a majority holds
    async fn replicate(&self, requests: Vec<(NodeId, AppendRequest)>) {
        let mut calls = JoinSet::new();
        for (peer, request) in requests {
            let node = self.clone();
            calls.spawn(async move { node.exchange(&peer, request).await });
        }
        while calls.join_next().await.is_some() {}
        self.commit();
    }

    /// One bounded append to `peer`, with the answer recorded in the tracker
    async fn exchange(&self, peer: &str, request: AppendRequest) {
        let after = self.inner.config.raft.rpc_deadline();
        let rpc = self.inner.transport.append_entries(peer, request.clone());
        let resp: AppendResponse = match bounded(peer, after, rpc).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(node = %self.id(), %peer, %err, "append failed");
                return;
            }
        };
        let mut core = self.lock();
        core.raft.handle_append_response(peer, &request, &resp);
        self.settle(&mut core);
    }

    fn commit(&self) {
        let mut core = self.lock();
        let committed = core.raft.advance_commit();
        self.apply_committed(&committed);
    }

    // -- helpers, called with the lock held --

    /// Apply newly committed entries in index order
    fn apply_committed(&self, entries: &[LogEntry]) {
        for entry in entries {
            entry.command.apply_to(self.inner.store.as_ref());
            debug!(node = %self.id(), index = entry.index, command = %entry.command, "applied");
        }
    }

    /// Re-arm the election deadline if the last interaction asked for it
    fn settle(&self, core: &mut Core) {
        if core.raft.take_election_reset() {
            core.rearm();
            self.inner.timer_reset.notify_one();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> RpcHandler for Node<T> {
    fn request_vote(&self, req: VoteRequest) -> VoteResponse {
        let mut core = self.lock();
        let resp = core.raft.handle_vote_request(&req);
        self.settle(&mut core);
        resp
    }

    fn append_entries(&self, req: AppendRequest) -> AppendResponse {
        let mut core = self.lock();
        let (resp, committed) = core.raft.handle_append_entries(req);
        self.apply_committed(&committed);
        self.settle(&mut core);
        resp
    }
}
