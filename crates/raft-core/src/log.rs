//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by node.rs, walked by peers.rs during leader repair
//! what: LogEntry, LogPosition, Log with the follower append policy and commit index management

use crate::command::Command;
use crate::error::Rejection;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, trace};

/// Election epoch
pub type Term = u64;

/// Position in the log; `-1` is the empty prefix before the first entry
pub type LogIndex = i64;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The index of this entry in the log (0-indexed)
    pub index: LogIndex,
    /// Set once a majority is known to hold the entry
    pub committed: bool,
    /// The command to be applied to the state machine
    pub command: Command,
}

impl LogEntry {
    /// Create a new, uncommitted log entry
    pub fn new(term: Term, index: LogIndex, command: Command) -> Self {
        Self {
            term,
            index,
            committed: false,
            command,
        }
    }

    pub fn position(&self) -> LogPosition {
        LogPosition {
            index: self.index,
            term: self.term,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.committed { "*" } else { " " };
        write!(f, "{mark}[{}] term={} {}", self.index, self.term, self.command)
    }
}

/// Index and term of an entry, without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub index: LogIndex,
    pub term: Term,
}

impl LogPosition {
    /// The empty prefix: matches every log
    pub const START: LogPosition = LogPosition { index: -1, term: 0 };
}

impl Default for LogPosition {
    fn default() -> Self {
        Self::START
    }
}

/// In-memory replicated log
///
/// Invariants: `entries[i].index == i`, `commit_index <= current_index`, and
/// nothing at or below `commit_index` is ever rewritten or removed.
#[derive(Debug, Clone)]
pub struct Log {
    current_term: Term,
    current_index: LogIndex,
    commit_index: LogIndex,
    entries: Vec<LogEntry>,
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

impl Log {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            current_index: -1,
            commit_index: -1,
            entries: Vec::new(),
        }
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    /// Highest appended index, `-1` when empty
    pub fn current_index(&self) -> LogIndex {
        self.current_index
    }

    /// Highest committed index, `-1` when nothing is committed
    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    /// Term recorded at `index`; the empty prefix has term 0
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == -1 {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    /// Term of the last entry, 0 when empty
    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(0, |e| e.term)
    }

    pub fn last_position(&self) -> LogPosition {
        LogPosition {
            index: self.current_index,
            term: self.last_term(),
        }
    }

    /// Position of the entry just before `pos`, used when a follower rejects
    pub fn walk(&self, pos: LogPosition) -> LogPosition {
        if pos.index <= 0 {
            return LogPosition::START;
        }
        let index = pos.index - 1;
        LogPosition {
            index,
            term: self.term_at(index).unwrap_or(0),
        }
    }

    /// Clones of every entry with an index greater than `index`
    pub fn entries_after(&self, index: LogIndex) -> Vec<LogEntry> {
        let start = usize::try_from(index + 1).unwrap_or(0);
        self.entries.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Raise the current term; lower terms are ignored. Returns true if raised.
    pub fn observe_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            self.current_term = term;
            true
        } else {
            false
        }
    }

    /// Leader side: append a client command at the next index in the current term
    pub fn append_command(&mut self, command: Command) -> LogEntry {
        let entry = LogEntry::new(self.current_term, self.current_index + 1, command);
        self.push(entry.clone());
        debug!(index = entry.index, term = entry.term, "appended command");
        entry
    }

    /// Follower side: apply an append request from the leader
    ///
    /// On success returns the entries newly committed by `leader_commit`, in
    /// index order. A rejection leaves the entries untouched, although a
    /// higher `term` is still adopted.
    pub fn append_entries(
        &mut self,
        term: Term,
        prev_index: LogIndex,
        prev_term: Term,
        leader_commit: LogIndex,
        entries: Vec<LogEntry>,
    ) -> Result<Vec<LogEntry>, Rejection> {
        trace!(
            term,
            prev_index,
            prev_term,
            leader_commit,
            entries = entries.len(),
            "append request"
        );
        if term < self.current_term {
            return Err(Rejection::StaleTerm {
                term,
                current: self.current_term,
            });
        }
        self.observe_term(term);

        // Bootstrapping an empty log needs no prior-entry check
        if self.current_index == -1 && entries.first().is_some_and(|e| e.index == 0) {
            check_contiguous(-1, &entries)?;
            let verified = self.store(entries);
            return Ok(self.commit(leader_commit.min(verified)));
        }

        if self.current_index < prev_index {
            return Err(Rejection::MissingHistory {
                prev_index,
                current_index: self.current_index,
            });
        }

        match self.term_at(prev_index) {
            Some(found) if found == prev_term => {}
            found => {
                return Err(Rejection::TermMismatch {
                    index: prev_index,
                    expected: prev_term,
                    found: found.unwrap_or(0),
                })
            }
        }

        check_contiguous(prev_index, &entries)?;
        if let Some(index) = self.first_conflict(&entries) {
            if index <= self.commit_index {
                return Err(Rejection::CommittedConflict { index });
            }
        }

        let verified = if entries.is_empty() {
            prev_index
        } else {
            self.store(entries)
        };
        Ok(self.commit(leader_commit.min(verified)))
    }

    /// Mark every entry in `(commit_index, index]` committed and return them
    ///
    /// No-op for `index <= commit_index`; an index past the end is clamped.
    pub fn commit(&mut self, index: LogIndex) -> Vec<LogEntry> {
        let index = index.min(self.current_index);
        if index <= self.commit_index {
            return Vec::new();
        }

        let start = (self.commit_index + 1) as usize;
        let end = index as usize;
        let committed: Vec<LogEntry> = self.entries[start..=end]
            .iter_mut()
            .map(|e| {
                e.committed = true;
                e.clone()
            })
            .collect();

        self.commit_index = index;
        info!(index, count = committed.len(), "committed entries");
        committed
    }

    /// Index of the first incoming entry whose term disagrees with ours
    fn first_conflict(&self, entries: &[LogEntry]) -> Option<LogIndex> {
        entries
            .iter()
            .find(|e| self.term_at(e.index).is_some_and(|t| t != e.term))
            .map(|e| e.index)
    }

    /// Write a verified batch: skip entries we already hold, replace a diverging suffix.
    /// Returns the index of the last entry in the batch.
    fn store(&mut self, entries: Vec<LogEntry>) -> LogIndex {
        let mut last = self.current_index;
        for mut entry in entries {
            last = entry.index;
            match self.get(entry.index).map(|e| e.term) {
                Some(term) if term == entry.term => continue,
                Some(_) => self.truncate_from(entry.index),
                None => {}
            }
            entry.committed = false;
            self.push(entry);
        }
        last
    }

    fn truncate_from(&mut self, index: LogIndex) {
        debug!(
            index,
            dropped = self.current_index - index + 1,
            "truncating diverging suffix"
        );
        self.entries.truncate(index as usize);
        self.current_index = index - 1;
    }

    fn push(&mut self, entry: LogEntry) {
        self.current_index = entry.index;
        self.observe_term(entry.term);
        self.entries.push(entry);
    }
}

/// Batch must continue directly after `after` without gaps
fn check_contiguous(after: LogIndex, entries: &[LogEntry]) -> Result<(), Rejection> {
    let mut expected = after + 1;
    for entry in entries {
        if entry.index != expected {
            return Err(Rejection::NonContiguous {
                after: expected - 1,
                found: entry.index,
            });
        }
        expected += 1;
    }
    Ok(())
}
