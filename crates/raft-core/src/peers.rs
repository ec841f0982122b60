//! # peers
//!
//! why: remember how far each follower has caught up so the leader knows what to send and when a majority holds an entry
//! relations: owned by node.rs, consulted only while leader
//! what: PeerTracker

use crate::log::{Log, LogIndex, LogPosition};
use crate::node::NodeId;
use std::collections::BTreeMap;
use tracing::trace;

/// Last log position known to be replicated on each peer
#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    progress: BTreeMap<NodeId, LogPosition>,
}

impl PeerTracker {
    /// Every peer starts at the empty prefix
    pub fn new<'a>(peers: impl IntoIterator<Item = &'a NodeId>) -> Self {
        Self {
            progress: peers
                .into_iter()
                .map(|p| (p.clone(), LogPosition::START))
                .collect(),
        }
    }

    /// Forget all progress; done on every election win
    pub fn reset(&mut self) {
        for pos in self.progress.values_mut() {
            *pos = LogPosition::START;
        }
    }

    pub fn get(&self, peer: &str) -> Option<LogPosition> {
        self.progress.get(peer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &LogPosition)> {
        self.progress.iter()
    }

    /// Peer accepted everything up to `pos`. Positions only move forward.
    pub fn record_success(&mut self, peer: &str, pos: LogPosition) -> bool {
        match self.progress.get_mut(peer) {
            Some(current) if pos.index > current.index => {
                trace!(peer, index = pos.index, "peer advanced");
                *current = pos;
                true
            }
            _ => false,
        }
    }

    /// Peer refused a request built on `prev`; try one entry deeper next time.
    ///
    /// Ignored when the tracker has already moved on from `prev`, so late or
    /// duplicated rejections cannot undo progress.
    pub fn record_rejection(&mut self, peer: &str, prev: LogPosition, log: &Log) {
        if let Some(current) = self.progress.get_mut(peer) {
            if current.index == prev.index {
                *current = log.walk(prev);
                trace!(peer, index = current.index, "peer stepped back");
            }
        }
    }

    /// Number of peers known to hold `index`
    pub fn acknowledged(&self, index: LogIndex) -> usize {
        self.progress.values().filter(|p| p.index >= index).count()
    }

    /// Highest index held by at least `quorum` nodes, counting the leader at `leader_index`
    pub fn majority_index(&self, leader_index: LogIndex, quorum: usize) -> LogIndex {
        let mut indexes: Vec<LogIndex> = self.progress.values().map(|p| p.index).collect();
        indexes.push(leader_index);
        indexes.sort_unstable_by(|a, b| b.cmp(a));
        quorum
            .checked_sub(1)
            .and_then(|i| indexes.get(i))
            .copied()
            .unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PeerTracker {
        let peers = vec!["b".to_string(), "c".to_string()];
        PeerTracker::new(&peers)
    }

    #[test]
    fn peers_start_at_empty_prefix() {
        let t = tracker();
        assert_eq!(t.get("b"), Some(LogPosition::START));
        assert_eq!(t.get("c"), Some(LogPosition::START));
        assert_eq!(t.get("z"), None);
    }

    #[test]
    fn success_only_moves_forward() {
        let mut t = tracker();
        assert!(t.record_success("b", LogPosition { index: 3, term: 1 }));
        assert!(!t.record_success("b", LogPosition { index: 1, term: 1 }));
        assert_eq!(t.get("b").unwrap().index, 3);
    }

    #[test]
    fn majority_index_counts_leader() {
        let mut t = tracker();
        t.record_success("b", LogPosition { index: 2, term: 1 });

        // leader at 4, b at 2, c at -1 -> two of three hold index 2
        assert_eq!(t.majority_index(4, 2), 2);
        assert_eq!(t.majority_index(4, 3), -1);
        assert_eq!(t.majority_index(4, 1), 4);
    }

    #[test]
    fn reset_forgets_progress() {
        let mut t = tracker();
        t.record_success("c", LogPosition { index: 5, term: 2 });
        t.reset();
        assert_eq!(t.get("c"), Some(LogPosition::START));
        assert_eq!(t.acknowledged(0), 0);
    }
}
