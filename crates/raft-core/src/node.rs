//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management,
//!            peers.rs for replication progress, election.rs for timing and vote counting
//! what: Role, RaftConfig, RaftNode with vote/append handlers, propose and commit advancement

use crate::command::Command;
use crate::election::{quorum_size, ElectionTimer, VoteTally};
use crate::error::RaftError;
use crate::log::{Log, LogEntry, LogIndex, LogPosition, Term};
use crate::message::{AppendRequest, AppendResponse, VoteRequest, VoteResponse};
use crate::peers::PeerTracker;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node identity; peers are identified by their configured address
pub type NodeId = String;

/// The three possible roles a Raft node can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive role - listens for heartbeats, votes when asked
    Follower,
    /// Transitional role - requesting votes to become leader
    Candidate,
    /// Active role - accepts commands, replicates the log, sends heartbeats
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Self::Follower
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        };
        f.write_str(name)
    }
}

/// Timing configuration, all durations in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
    /// Upper bound on a single outbound rpc
    pub rpc_timeout: u64,
    /// Seed for the election timer; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 500,
            election_timeout_max: 1000,
            heartbeat_interval: 50,
            rpc_timeout: 200,
            seed: None,
        }
    }
}

impl RaftConfig {
    /// Election timeouts must comfortably exceed the heartbeat period
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.heartbeat_interval == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout range {}..{} is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.election_timeout_min < 2 * self.heartbeat_interval {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout {}ms must be at least twice the heartbeat interval {}ms",
                self.election_timeout_min, self.heartbeat_interval
            )));
        }
        if self.rpc_timeout == 0 {
            return Err(RaftError::InvalidConfig("rpc timeout must be positive".into()));
        }
        if self.rpc_timeout + self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "rpc timeout {}ms plus heartbeat {}ms must stay below the election timeout {}ms",
                self.rpc_timeout, self.heartbeat_interval, self.election_timeout_min
            )));
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }
}

/// A single Raft node in the cluster
///
/// Synchronous and transport-agnostic: the host feeds it requests, responses
/// and timer expiries, and carries its outgoing messages.
#[derive(Debug)]
pub struct RaftNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Every other member of the cluster
    pub peers: Vec<NodeId>,
    pub config: RaftConfig,
    role: Role,
    voted_for: Option<NodeId>,
    leader: Option<NodeId>,
    log: Log,
    tracker: PeerTracker,
    tally: Option<VoteTally>,
    timer: ElectionTimer,
    election_reset: bool,
}

impl RaftNode {
    /// Create a new Raft node in Follower role with the default timing
    pub fn new(id: impl Into<NodeId>, peers: Vec<NodeId>) -> Self {
        Self::with_config(id, peers, RaftConfig::default())
    }

    pub fn with_config(id: impl Into<NodeId>, peers: Vec<NodeId>, config: RaftConfig) -> Self {
        let id = id.into();
        let peers: Vec<NodeId> = peers.into_iter().filter(|p| *p != id).collect();
        Self {
            tracker: PeerTracker::new(&peers),
            timer: ElectionTimer::new(&config),
            id,
            peers,
            config,
            role: Role::Follower,
            voted_for: None,
            leader: None,
            log: Log::new(),
            tally: None,
            election_reset: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> Term {
        self.log.current_term()
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    /// Leader of the current term, if one has been heard from
    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn tracker(&self) -> &PeerTracker {
        &self.tracker
    }

    /// Votes held by the current candidacy
    pub fn votes(&self) -> usize {
        self.tally.as_ref().map_or(0, VoteTally::count)
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.cluster_size())
    }

    pub fn has_quorum(&self) -> bool {
        self.tally.as_ref().is_some_and(VoteTally::has_quorum)
    }

    /// True once per pending election-timer reset; the host re-arms its timer
    pub fn take_election_reset(&mut self) -> bool {
        std::mem::take(&mut self.election_reset)
    }

    /// A new randomized election timeout
    pub fn next_election_timeout(&mut self) -> Duration {
        self.timer.next_timeout()
    }

    // -- role transitions --

    /// The only place the role changes
    fn transition(&mut self, to: Role, term: Term) {
        let from = self.role;
        debug_assert!(
            !(from == Role::Leader && to == Role::Candidate),
            "leaders step down to follower first"
        );

        if self.log.observe_term(term) {
            self.voted_for = None;
            self.leader = None;
        }

        match to {
            Role::Follower => {
                self.tally = None;
                self.election_reset = true;
            }
            Role::Candidate => {
                self.voted_for = Some(self.id.clone());
                self.leader = None;
                self.tally = Some(VoteTally::new(term, &self.id, self.quorum_size()));
                self.election_reset = true;
            }
            Role::Leader => {
                self.tally = None;
                self.leader = Some(self.id.clone());
                self.tracker.reset();
            }
        }

        self.role = to;
        if from != to {
            info!(node = %self.id, term = self.current_term(), %from, %to, "role changed");
        }
    }

    /// Step down, adopting `term` if it is newer
    pub fn become_follower(&mut self, term: Term) {
        self.transition(Role::Follower, term);
    }

    /// Begin a new term as candidate
    ///
    /// Returns the request to send to every peer, or `None` when no election
    /// is needed: leaders never start one, and a single-node cluster wins
    /// immediately.
    pub fn start_election(&mut self) -> Option<VoteRequest> {
        if self.role == Role::Leader {
            return None;
        }

        let term = self.current_term() + 1;
        self.transition(Role::Candidate, term);
        info!(node = %self.id, term, "starting election");

        if self.has_quorum() {
            self.transition(Role::Leader, term);
            return None;
        }

        let last = self.log.last_position();
        Some(VoteRequest {
            term,
            candidate_id: self.id.clone(),
            last_log_index: last.index,
            last_log_term: last.term,
        })
    }

    // -- election --

    /// Decide whether to vote for a candidate
    pub fn handle_vote_request(&mut self, req: &VoteRequest) -> VoteResponse {
        if req.term < self.current_term() {
            debug!(node = %self.id, candidate = %req.candidate_id, term = req.term, "rejecting stale vote request");
            return VoteResponse {
                term: self.current_term(),
                vote_granted: false,
            };
        }

        if req.term > self.current_term() {
            self.become_follower(req.term);
        }

        let free = match &self.voted_for {
            None => true,
            Some(v) => *v == req.candidate_id,
        };
        let mine = self.log.last_position();
        let up_to_date = req.last_log_term > mine.term
            || (req.last_log_term == mine.term && req.last_log_index >= mine.index);

        let granted = free && up_to_date;
        if granted {
            self.voted_for = Some(req.candidate_id.clone());
            self.election_reset = true;
            info!(node = %self.id, candidate = %req.candidate_id, term = req.term, "granted vote");
        } else {
            debug!(node = %self.id, candidate = %req.candidate_id, term = req.term, free, up_to_date, "vote refused");
        }

        VoteResponse {
            term: self.current_term(),
            vote_granted: granted,
        }
    }

    /// Count a vote; returns true if this vote made us leader
    pub fn handle_vote_response(&mut self, from: &str, resp: &VoteResponse) -> bool {
        if resp.term > self.current_term() {
            self.become_follower(resp.term);
            return false;
        }
        if self.role != Role::Candidate || resp.term < self.current_term() || !resp.vote_granted {
            return false;
        }

        let Some(tally) = self.tally.as_mut() else {
            return false;
        };
        if tally.term() != resp.term {
            return false;
        }
        tally.record(from);
        debug!(node = %self.id, voter = from, votes = tally.count(), "vote received");

        if tally.has_quorum() {
            let term = tally.term();
            self.transition(Role::Leader, term);
            return true;
        }
        false
    }

    // -- replication, follower side --

    /// Apply an append request from a leader
    ///
    /// Returns the response and the entries newly committed by it, which the
    /// host applies to its state machine in order.
    pub fn handle_append_entries(&mut self, req: AppendRequest) -> (AppendResponse, Vec<LogEntry>) {
        let term = self.current_term();
        if req.term < term {
            debug!(node = %self.id, leader = %req.leader_id, term = req.term, "rejecting stale append");
            return (
                AppendResponse {
                    term,
                    success: false,
                },
                Vec::new(),
            );
        }

        if req.term > term || self.role != Role::Follower {
            if self.role == Role::Leader && req.term == term {
                warn!(node = %self.id, other = %req.leader_id, term, "second leader in term, stepping down");
            }
            self.become_follower(req.term);
        }
        self.leader = Some(req.leader_id.clone());
        self.election_reset = true;

        let result = self.log.append_entries(
            req.term,
            req.prev_index,
            req.prev_term,
            req.leader_commit,
            req.entries,
        );
        let response = |success| AppendResponse {
            term: self.log.current_term(),
            success,
        };
        match result {
            Ok(committed) => (response(true), committed),
            Err(rejection) => {
                warn!(node = %self.id, leader = %req.leader_id, %rejection, "append rejected");
                (response(false), Vec::new())
            }
        }
    }

    // -- replication, leader side --

    /// Leader appends a client command to its own log
    ///
    /// Non-leaders refuse without touching the log.
    pub fn propose(&mut self, command: Command) -> Result<LogEntry, RaftError> {
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                id: self.id.clone(),
                role: self.role,
                leader: self.leader.clone(),
            });
        }
        Ok(self.log.append_command(command))
    }

    /// Append request bringing `peer` up to date from its tracked position
    pub fn replication_request(&self, peer: &str) -> Option<AppendRequest> {
        if self.role != Role::Leader {
            return None;
        }
        let prev = self.tracker.get(peer)?;
        Some(AppendRequest {
            term: self.current_term(),
            leader_id: self.id.clone(),
            prev_index: prev.index,
            prev_term: self.log.term_at(prev.index).unwrap_or(prev.term),
            leader_commit: self.log.commit_index(),
            entries: self.log.entries_after(prev.index),
        })
    }

    /// One request per peer; empty unless leader
    pub fn replication_requests(&self) -> Vec<(NodeId, AppendRequest)> {
        self.peers
            .iter()
            .filter_map(|p| self.replication_request(p).map(|r| (p.clone(), r)))
            .collect()
    }

    /// Record a follower's answer to `req` in the tracker
    pub fn handle_append_response(&mut self, peer: &str, req: &AppendRequest, resp: &AppendResponse) {
        if resp.term > self.current_term() {
            self.become_follower(resp.term);
            return;
        }
        if self.role != Role::Leader || req.term != self.current_term() {
            return;
        }

        let prev = LogPosition {
            index: req.prev_index,
            term: req.prev_term,
        };
        if resp.success {
            let reached = req.entries.last().map_or(prev, LogEntry::position);
            self.tracker.record_success(peer, reached);
        } else {
            self.tracker.record_rejection(peer, prev, &self.log);
        }
    }

    /// Commit the highest current-term entry held by a majority
    ///
    /// Returns the newly committed entries in index order.
    pub fn advance_commit(&mut self) -> Vec<LogEntry> {
        if self.role != Role::Leader {
            return Vec::new();
        }
        let candidate = self
            .tracker
            .majority_index(self.log.current_index(), self.quorum_size());
        if candidate <= self.log.commit_index() {
            return Vec::new();
        }
        // Entries from earlier terms only commit behind one of our own
        if self.log.term_at(candidate) != Some(self.current_term()) {
            return Vec::new();
        }
        self.log.commit(candidate)
    }

    /// Nodes, this one included, known to hold `index`
    pub fn acknowledged(&self, index: LogIndex) -> usize {
        let own = usize::from(self.log.current_index() >= index);
        own + self.tracker.acknowledged(index)
    }

    /// Human-readable snapshot for operators; a leader also lists peer progress
    pub fn dump(&self) -> String {
        let mut out = format!(
            "id={} role={} term={} logTerm={} index={} commitIndex={}\n",
            self.id,
            self.role,
            self.current_term(),
            self.log.last_term(),
            self.log.current_index(),
            self.log.commit_index()
        );
        for entry in self.log.entries() {
            let _ = writeln!(out, "{entry}");
        }
        if self.role == Role::Leader {
            for (peer, pos) in self.tracker.iter() {
                let _ = writeln!(out, "peer {peer} index={} term={}", pos.index, pos.term);
            }
        }
        out
    }
}
