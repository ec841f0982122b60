//! # election
//!
//! why: keep election timing and vote counting out of the role state machine
//! relations: used by node.rs when starting elections and counting vote responses
//! what: quorum_size, ElectionTimer (per-node seeded rng), VoteTally

use crate::log::Term;
use crate::node::{NodeId, RaftConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::time::Duration;

/// Strict majority of a cluster, the node itself included
pub fn quorum_size(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Draws randomized election timeouts from the node's own generator
#[derive(Debug)]
pub struct ElectionTimer {
    rng: StdRng,
    min_ms: u64,
    max_ms: u64,
}

impl ElectionTimer {
    pub fn new(config: &RaftConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            min_ms: config.election_timeout_min,
            max_ms: config.election_timeout_max.max(config.election_timeout_min),
        }
    }

    /// A fresh timeout in `[min, max]`; re-drawn on every reset
    pub fn next_timeout(&mut self) -> Duration {
        Duration::from_millis(self.rng.gen_range(self.min_ms..=self.max_ms))
    }
}

/// Votes collected by a candidate during one term
#[derive(Debug, Clone)]
pub struct VoteTally {
    term: Term,
    quorum: usize,
    granted: BTreeSet<NodeId>,
}

impl VoteTally {
    /// A candidate always starts with its own vote
    pub fn new(term: Term, candidate: &str, quorum: usize) -> Self {
        let mut granted = BTreeSet::new();
        granted.insert(candidate.to_string());
        Self {
            term,
            quorum,
            granted,
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    /// Count a grant; repeated grants from the same voter count once
    pub fn record(&mut self, voter: &str) -> bool {
        self.granted.insert(voter.to_string())
    }

    pub fn count(&self) -> usize {
        self.granted.len()
    }

    pub fn has_quorum(&self) -> bool {
        self.count() >= self.quorum
    }
}
