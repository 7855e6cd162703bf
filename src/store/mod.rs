// Durable persistence seam of the consensus core.
//
// The node owns exactly one store handle for its lifetime and calls it
// from its own timeline only. Implementations may block inside `flush`;
// the contract is that every mutation issued before a `flush` is durable
// once `flush` returns. No vote reply, append acknowledgment, or commit
// advance leaves the node before the flush that covers it.

use crate::common::{Endpoint, NodeId};
use crate::error::Result;
use crate::model::{GroupMembers, LogEntry, LogIndex, SnapshotChunk, Term};

pub mod memory;

pub use memory::InMemoryStore;

/// Durable sink for term votes, bootstrap identity, log entries and
/// snapshot chunks.
pub trait PersistentStore: Send {
    /// Prepare the store. Idempotent; fails if the medium is unreadable.
    fn open(&mut self) -> Result<()>;

    /// Write the bootstrap identity. Called at most once, on first boot.
    fn persist_initial_members(
        &mut self,
        local: &Endpoint,
        initial: &GroupMembers,
    ) -> Result<()>;

    /// Record the current term and the vote cast in it, if any. Durable
    /// before any vote for that term is sent.
    fn persist_term(&mut self, term: Term, voted_for: Option<&NodeId>) -> Result<()>;

    /// Persist one log entry. Entries arrive in index order from the
    /// window's first index; a gap appears only from a preceding snapshot
    /// install.
    fn persist_log_entry(&mut self, entry: &LogEntry) -> Result<()>;

    /// Persist one snapshot chunk. The snapshot is complete only once all
    /// chunks for its index are persisted and a flush has returned.
    fn persist_snapshot_chunk(&mut self, chunk: &SnapshotChunk) -> Result<()>;

    /// Remove entries at and above `index`; the next persisted entry
    /// reuses `index`.
    fn truncate_log_entries_from(&mut self, index: LogIndex) -> Result<()>;

    /// Discard partially collected snapshots at or below `index`.
    fn truncate_snapshot_chunks_until(&mut self, index: LogIndex) -> Result<()>;

    /// Make every prior mutation durable before returning.
    fn flush(&mut self) -> Result<()>;
}

/// Snapshot portion of a restored state.
#[derive(Debug, Clone)]
pub struct RestoredSnapshot {
    pub index: LogIndex,
    pub term: Term,
    pub members: GroupMembers,
    pub chunks: Vec<SnapshotChunk>,
}

/// Everything a store reproduces after a restart: the bootstrap identity,
/// the latest term and vote, the latest complete snapshot and the log
/// entries above it.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub local_endpoint: Endpoint,
    pub initial_members: GroupMembers,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub snapshot: Option<RestoredSnapshot>,
    pub entries: Vec<LogEntry>,
}
