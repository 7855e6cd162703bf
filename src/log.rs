// In-memory window over the persisted log.
//
// Holds the last snapshot plus a contiguous suffix of regular entries in
// [first_index ..= last_index], with O(1) index arithmetic into the
// backing deque. Committed entries are never truncated; the caller
// enforces that bound.

use std::collections::VecDeque;

use crate::error::{RaftError, Result};
use crate::model::{GroupMembers, LogEntry, LogIndex, SnapshotChunk, Term};

/// The last complete snapshot, kept with its chunks so a leader can serve
/// installs to lagging followers.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    /// Log index the snapshot covers up to (inclusive)
    pub index: LogIndex,

    /// Term of the entry at `index`
    pub term: Term,

    /// Group membership as of `index`
    pub members: GroupMembers,

    /// The snapshot's chunks, in chunk order
    pub chunks: Vec<SnapshotChunk>,
}

/// Result of looking up a log position.
#[derive(Debug)]
pub enum LogLookup<'a> {
    /// The entry is inside the in-memory window
    Entry(&'a LogEntry),

    /// The index was compacted into the snapshot
    SnapshotBoundary,

    /// The index is beyond the last entry
    Missing,
}

/// Ordered window of log entries above the last snapshot.
pub struct RaftLog {
    /// Entries from `first_index` upward, contiguous
    entries: VecDeque<LogEntry>,

    /// Index of the entry immediately following the last snapshot, or 1
    first_index: LogIndex,

    /// Last complete snapshot, if any
    snapshot: Option<SnapshotRecord>,
}

impl RaftLog {
    /// Create an empty log starting at index 1.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            first_index: 1,
            snapshot: None,
        }
    }

    /// Rebuild a log window from restored state: the latest snapshot (if
    /// any) plus the entries above it.
    pub fn restored(snapshot: Option<SnapshotRecord>, entries: Vec<LogEntry>) -> Result<Self> {
        let mut log = Self::new();
        if let Some(snapshot) = snapshot {
            log.first_index = snapshot.index + 1;
            log.snapshot = Some(snapshot);
        }
        log.append(entries)?;
        Ok(log)
    }

    pub fn first_index(&self) -> LogIndex {
        self.first_index
    }

    pub fn last_index(&self) -> LogIndex {
        match self.entries.back() {
            Some(entry) => entry.index,
            None => self.first_index - 1,
        }
    }

    pub fn last_term(&self) -> Term {
        match self.entries.back() {
            Some(entry) => entry.term,
            None => self.snapshot.as_ref().map(|s| s.term).unwrap_or(0),
        }
    }

    /// Index covered by the last snapshot; 0 when there is none.
    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot.as_ref().map(|s| s.index).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Option<&SnapshotRecord> {
        self.snapshot.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a log position, distinguishing compacted indices from
    /// indices beyond the tail.
    pub fn lookup(&self, index: LogIndex) -> LogLookup<'_> {
        if index < self.first_index {
            return LogLookup::SnapshotBoundary;
        }
        match self.entries.get((index - self.first_index) as usize) {
            Some(entry) => LogLookup::Entry(entry),
            None => LogLookup::Missing,
        }
    }

    /// Entry at `index`, if it is inside the window.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        match self.lookup(index) {
            LogLookup::Entry(entry) => Some(entry),
            _ => None,
        }
    }

    /// Term of the entry at `index`. Index 0 has term 0; the snapshot
    /// boundary index resolves to the snapshot term. `None` below the
    /// boundary or beyond the tail.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        if let Some(snapshot) = &self.snapshot {
            if index == snapshot.index {
                return Some(snapshot.term);
            }
        }
        self.get(index).map(|entry| entry.term)
    }

    /// Append contiguous entries at the tail. The first entry must sit at
    /// `last_index + 1`, indices must be contiguous and terms
    /// non-decreasing.
    pub fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        let mut expected = self.last_index() + 1;
        let mut floor_term = self.last_term();

        for entry in entries {
            if entry.index != expected {
                return Err(RaftError::Internal(format!(
                    "log append index mismatch: expected {expected}, got {}",
                    entry.index
                )));
            }
            if entry.term < floor_term {
                return Err(RaftError::Internal(format!(
                    "log append term regression at index {}: {} < {floor_term}",
                    entry.index, entry.term
                )));
            }
            floor_term = entry.term;
            expected += 1;
            self.entries.push_back(entry);
        }
        Ok(())
    }

    /// Remove `[index ..= last_index]` and return the removed entries in
    /// order. The caller enforces that `index` is above the commit index.
    pub fn truncate_from(&mut self, index: LogIndex) -> Result<Vec<LogEntry>> {
        if index < self.first_index {
            return Err(RaftError::Internal(format!(
                "cannot truncate below the log window at {index}"
            )));
        }
        let offset = (index - self.first_index) as usize;
        if offset >= self.entries.len() {
            return Ok(Vec::new());
        }
        Ok(self.entries.split_off(offset).into())
    }

    /// Clone up to `max` entries starting at `from`.
    pub fn slice(&self, from: LogIndex, max: usize) -> Vec<LogEntry> {
        if from < self.first_index {
            return Vec::new();
        }
        let offset = (from - self.first_index) as usize;
        self.entries
            .iter()
            .skip(offset)
            .take(max)
            .cloned()
            .collect()
    }

    /// Install a snapshot and compact the window.
    ///
    /// Entries at or below the snapshot index are dropped. Entries above
    /// it are retained only when the window provably agrees with the
    /// snapshot (it contained the boundary entry with the matching term);
    /// otherwise the whole suffix is discarded.
    pub fn install_snapshot(&mut self, record: SnapshotRecord) {
        let boundary_consistent = match self.term_at(record.index) {
            Some(term) => term == record.term,
            None => false,
        };

        if boundary_consistent && record.index < self.last_index() {
            let keep_from = (record.index + 1).max(self.first_index);
            let offset = (keep_from - self.first_index) as usize;
            self.entries.drain(..offset);
        } else {
            self.entries.clear();
        }

        self.first_index = record.index + 1;
        tracing::debug!(
            snapshot_index = record.index,
            snapshot_term = record.term,
            retained = self.entries.len(),
            "installed snapshot into log window"
        );
        self.snapshot = Some(record);
    }
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryOperation;

    fn entry(index: LogIndex, term: Term) -> LogEntry {
        LogEntry::new(index, term, EntryOperation::Noop)
    }

    fn members() -> GroupMembers {
        GroupMembers::bootstrap(vec![crate::common::Endpoint::new("n1", "local")])
    }

    fn snapshot(index: LogIndex, term: Term) -> SnapshotRecord {
        SnapshotRecord {
            index,
            term,
            members: members(),
            chunks: Vec::new(),
        }
    }

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new();
        assert_eq!(log.first_index(), 1);
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.term_at(0), Some(0));
        assert!(matches!(log.lookup(1), LogLookup::Missing));
        assert!(matches!(log.lookup(0), LogLookup::SnapshotBoundary));
    }

    #[test]
    fn test_append_contiguous() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.term_at(2), Some(1));
    }

    #[test]
    fn test_append_with_gap_fails() {
        let mut log = RaftLog::new();
        assert!(log.append(vec![entry(5, 1)]).is_err());
    }

    #[test]
    fn test_append_term_regression_fails() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, 3)]).unwrap();
        assert!(log.append(vec![entry(2, 2)]).is_err());
    }

    #[test]
    fn test_truncate_from_tail() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();

        let removed = log.truncate_from(2).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].index, 2);
        assert_eq!(log.last_index(), 1);

        // the next append reuses the truncated index
        log.append(vec![entry(2, 3)]).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_at(2), Some(3));
    }

    #[test]
    fn test_slice_is_bounded() {
        let mut log = RaftLog::new();
        log.append((1..=10).map(|i| entry(i, 1)).collect()).unwrap();

        let batch = log.slice(4, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].index, 4);
        assert_eq!(batch[2].index, 6);
        assert!(log.slice(11, 5).is_empty());
    }

    #[test]
    fn test_install_snapshot_keeps_consistent_suffix() {
        let mut log = RaftLog::new();
        log.append((1..=6).map(|i| entry(i, 1)).collect()).unwrap();

        log.install_snapshot(snapshot(4, 1));
        assert_eq!(log.first_index(), 5);
        assert_eq!(log.last_index(), 6);
        assert_eq!(log.snapshot_index(), 4);
        assert!(matches!(log.lookup(3), LogLookup::SnapshotBoundary));
        assert_eq!(log.term_at(4), Some(1));
    }

    #[test]
    fn test_install_snapshot_discards_divergent_suffix() {
        let mut log = RaftLog::new();
        log.append((1..=6).map(|i| entry(i, 1)).collect()).unwrap();

        // snapshot term disagrees with the entry at the boundary
        log.install_snapshot(snapshot(4, 2));
        assert_eq!(log.first_index(), 5);
        assert_eq!(log.last_index(), 4);
        assert!(log.is_empty());
    }

    #[test]
    fn test_install_snapshot_beyond_tail_resets_window() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, 1), entry(2, 1)]).unwrap();

        log.install_snapshot(snapshot(10, 3));
        assert_eq!(log.first_index(), 11);
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.last_term(), 3);
    }

    #[test]
    fn test_restored_log() {
        let log = RaftLog::restored(
            Some(snapshot(3, 1)),
            vec![entry(4, 2), entry(5, 2)],
        )
        .unwrap();
        assert_eq!(log.first_index(), 4);
        assert_eq!(log.last_index(), 5);
        assert_eq!(log.term_at(3), Some(1));
        assert_eq!(log.term_at(5), Some(2));
    }
}
