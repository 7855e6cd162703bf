// In-memory store variant.
//
// Used by tests and by anything that can afford to lose state on process
// exit. The handle is cheaply cloneable; the node owns one clone while a
// test keeps another to inspect durability or simulate a restart. Only
// flushed mutations are visible through `restored_state`, which is what
// makes crash simulation honest.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Endpoint, NodeId};
use crate::error::{RaftError, Result};
use crate::model::{GroupMembers, LogEntry, LogIndex, SnapshotChunk, Term};
use crate::store::{PersistentStore, RestoredSnapshot, RestoredState};

#[derive(Default)]
struct Durable {
    local: Option<Endpoint>,
    initial_members: Option<GroupMembers>,
    term: Term,
    voted_for: Option<NodeId>,
    entries: BTreeMap<LogIndex, LogEntry>,
    snapshots: BTreeMap<LogIndex, SnapshotAccumulator>,
}

#[derive(Default)]
struct SnapshotAccumulator {
    term: Term,
    chunk_count: u32,
    members: Option<GroupMembers>,
    chunks: BTreeMap<u32, SnapshotChunk>,
}

impl SnapshotAccumulator {
    fn is_complete(&self) -> bool {
        self.chunk_count > 0 && self.chunks.len() as u32 == self.chunk_count
    }
}

#[derive(Default)]
struct Inner {
    opened: bool,
    durable: Durable,
    pending: Vec<Mutation>,
    fail_next_flush: bool,
}

enum Mutation {
    InitialMembers(Endpoint, GroupMembers),
    Term(Term, Option<NodeId>),
    Entry(LogEntry),
    Chunk(SnapshotChunk),
    TruncateEntriesFrom(LogIndex),
    TruncateSnapshotsUntil(LogIndex),
}

/// Cloneable in-memory implementation of [`PersistentStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next flush to fail, to exercise fatal store error
    /// handling.
    pub fn fail_next_flush(&self) {
        self.inner.lock().fail_next_flush = true;
    }

    /// Rebuild the durable state as a restart would see it. Unflushed
    /// mutations are invisible, like a crash before fsync.
    pub fn restored_state(&self) -> Option<RestoredState> {
        let inner = self.inner.lock();
        let durable = &inner.durable;
        let local = durable.local.clone()?;
        let initial_members = durable.initial_members.clone()?;

        let snapshot = durable
            .snapshots
            .iter()
            .rev()
            .find(|(_, accum)| accum.is_complete())
            .map(|(&index, accum)| RestoredSnapshot {
                index,
                term: accum.term,
                members: accum
                    .members
                    .clone()
                    .unwrap_or_else(|| initial_members.clone()),
                chunks: accum.chunks.values().cloned().collect(),
            });

        let boundary = snapshot.as_ref().map(|s| s.index).unwrap_or(0);
        let entries = durable
            .entries
            .range(boundary + 1..)
            .map(|(_, entry)| entry.clone())
            .collect();

        Some(RestoredState {
            local_endpoint: local,
            initial_members,
            term: durable.term,
            voted_for: durable.voted_for.clone(),
            snapshot,
            entries,
        })
    }

    /// Number of durable log entries, for test assertions.
    pub fn durable_entry_count(&self) -> usize {
        self.inner.lock().durable.entries.len()
    }
}

impl PersistentStore for InMemoryStore {
    fn open(&mut self) -> Result<()> {
        self.inner.lock().opened = true;
        Ok(())
    }

    fn persist_initial_members(
        &mut self,
        local: &Endpoint,
        initial: &GroupMembers,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.durable.local.is_some() {
            return Err(RaftError::StoreError(
                "initial members already persisted".to_string(),
            ));
        }
        inner
            .pending
            .push(Mutation::InitialMembers(local.clone(), initial.clone()));
        Ok(())
    }

    fn persist_term(&mut self, term: Term, voted_for: Option<&NodeId>) -> Result<()> {
        self.inner
            .lock()
            .pending
            .push(Mutation::Term(term, voted_for.cloned()));
        Ok(())
    }

    fn persist_log_entry(&mut self, entry: &LogEntry) -> Result<()> {
        self.inner.lock().pending.push(Mutation::Entry(entry.clone()));
        Ok(())
    }

    fn persist_snapshot_chunk(&mut self, chunk: &SnapshotChunk) -> Result<()> {
        self.inner.lock().pending.push(Mutation::Chunk(chunk.clone()));
        Ok(())
    }

    fn truncate_log_entries_from(&mut self, index: LogIndex) -> Result<()> {
        self.inner
            .lock()
            .pending
            .push(Mutation::TruncateEntriesFrom(index));
        Ok(())
    }

    fn truncate_snapshot_chunks_until(&mut self, index: LogIndex) -> Result<()> {
        self.inner
            .lock()
            .pending
            .push(Mutation::TruncateSnapshotsUntil(index));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.opened {
            return Err(RaftError::StoreError("store is not open".to_string()));
        }
        if inner.fail_next_flush {
            inner.fail_next_flush = false;
            inner.pending.clear();
            return Err(RaftError::StoreError("injected flush failure".to_string()));
        }

        let mutations = std::mem::take(&mut inner.pending);
        let durable = &mut inner.durable;
        for mutation in mutations {
            match mutation {
                Mutation::InitialMembers(local, initial) => {
                    durable.local = Some(local);
                    durable.initial_members = Some(initial);
                }
                Mutation::Term(term, voted_for) => {
                    durable.term = term;
                    durable.voted_for = voted_for;
                }
                Mutation::Entry(entry) => {
                    durable.entries.insert(entry.index, entry);
                }
                Mutation::Chunk(chunk) => {
                    let accum = durable
                        .snapshots
                        .entry(chunk.snapshot_index)
                        .or_default();
                    accum.term = chunk.snapshot_term;
                    accum.chunk_count = chunk.chunk_count;
                    accum.members = Some(chunk.group_members.clone());
                    accum.chunks.insert(chunk.chunk_index, chunk);
                }
                Mutation::TruncateEntriesFrom(index) => {
                    durable.entries.split_off(&index);
                }
                Mutation::TruncateSnapshotsUntil(index) => {
                    durable
                        .snapshots
                        .retain(|&at, accum| at > index || accum.is_complete());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryOperation;

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(id, "127.0.0.1:7000")
    }

    fn bootstrap_store(local: &Endpoint, peers: Vec<Endpoint>) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.open().unwrap();
        store
            .persist_initial_members(local, &GroupMembers::bootstrap(peers))
            .unwrap();
        store.flush().unwrap();
        store
    }

    #[test]
    fn test_unflushed_mutations_are_invisible() {
        let local = endpoint("n1");
        let mut store = bootstrap_store(&local, vec![local.clone()]);

        store
            .persist_log_entry(&LogEntry::new(1, 1, EntryOperation::Noop))
            .unwrap();
        assert_eq!(store.durable_entry_count(), 0);

        store.flush().unwrap();
        assert_eq!(store.durable_entry_count(), 1);
    }

    #[test]
    fn test_restore_round_trip() {
        let local = endpoint("n1");
        let mut store = bootstrap_store(&local, vec![local.clone(), endpoint("n2")]);

        store.persist_term(3, Some(&"n2".to_string())).unwrap();
        for i in 1..=4 {
            store
                .persist_log_entry(&LogEntry::new(i, 3, EntryOperation::Noop))
                .unwrap();
        }
        store.flush().unwrap();

        let restored = store.restored_state().unwrap();
        assert_eq!(restored.local_endpoint.id, "n1");
        assert_eq!(restored.term, 3);
        assert_eq!(restored.voted_for.as_deref(), Some("n2"));
        assert_eq!(restored.entries.len(), 4);
        assert!(restored.snapshot.is_none());
    }

    #[test]
    fn test_restore_ignores_incomplete_snapshot() {
        let local = endpoint("n1");
        let members = GroupMembers::bootstrap(vec![local.clone()]);
        let mut store = bootstrap_store(&local, vec![local.clone()]);

        // one of two chunks persisted
        store
            .persist_snapshot_chunk(&SnapshotChunk {
                snapshot_index: 5,
                snapshot_term: 2,
                chunk_index: 0,
                chunk_count: 2,
                payload: bytes::Bytes::from_static(b"half"),
                group_members: members.clone(),
            })
            .unwrap();
        store.flush().unwrap();

        let restored = store.restored_state().unwrap();
        assert!(restored.snapshot.is_none());

        store
            .persist_snapshot_chunk(&SnapshotChunk {
                snapshot_index: 5,
                snapshot_term: 2,
                chunk_index: 1,
                chunk_count: 2,
                payload: bytes::Bytes::from_static(b"rest"),
                group_members: members,
            })
            .unwrap();
        store.flush().unwrap();

        let restored = store.restored_state().unwrap();
        let snapshot = restored.snapshot.unwrap();
        assert_eq!(snapshot.index, 5);
        assert_eq!(snapshot.chunks.len(), 2);
    }

    #[test]
    fn test_truncate_entries_reuses_index() {
        let local = endpoint("n1");
        let mut store = bootstrap_store(&local, vec![local.clone()]);

        for i in 1..=3 {
            store
                .persist_log_entry(&LogEntry::new(i, 1, EntryOperation::Noop))
                .unwrap();
        }
        store.truncate_log_entries_from(2).unwrap();
        store
            .persist_log_entry(&LogEntry::new(2, 2, EntryOperation::Noop))
            .unwrap();
        store.flush().unwrap();

        let restored = store.restored_state().unwrap();
        assert_eq!(restored.entries.len(), 2);
        assert_eq!(restored.entries[1].index, 2);
        assert_eq!(restored.entries[1].term, 2);
    }

    #[test]
    fn test_injected_flush_failure() {
        let local = endpoint("n1");
        let mut store = bootstrap_store(&local, vec![local.clone()]);

        store.fail_next_flush();
        store
            .persist_log_entry(&LogEntry::new(1, 1, EntryOperation::Noop))
            .unwrap();
        assert!(store.flush().is_err());
        assert_eq!(store.durable_entry_count(), 0);
    }
}
