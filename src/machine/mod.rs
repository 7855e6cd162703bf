// State machine seam of the consensus core.
//
// The node applies committed operations in strict commit order, takes and
// installs snapshots through the same seam, and runs read-only operations
// for queries without touching the log.

use bytes::Bytes;

use crate::error::Result;
use crate::model::LogIndex;

pub mod kv;

pub use kv::{KvOperation, KvResponse, KvStateMachine};

/// Contract a replicated state machine must satisfy.
pub trait StateMachine: Send {
    /// Apply a committed operation. Must be deterministic: any two
    /// machines applying the same operations in the same order produce
    /// the same responses and the same state.
    fn apply(&mut self, log_index: LogIndex, operation: &Bytes) -> Result<Bytes>;

    /// Serialize a self-contained image of the state at `log_index` as
    /// one or more chunk payloads. After this returns, the caller may
    /// evict all log entries at or below `log_index`.
    fn take_snapshot(&self, log_index: LogIndex) -> Result<Vec<Bytes>>;

    /// Replace the whole state with a snapshot. Atomic: a partial install
    /// must never be observable.
    fn install_snapshot(&mut self, log_index: LogIndex, chunks: &[Bytes]) -> Result<()>;

    /// Run a read-only operation against the current state, without a log
    /// append.
    fn run_operation(&self, operation: &Bytes) -> Result<Bytes>;
}
