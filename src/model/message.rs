// Wire messages of the consensus protocol.
//
// Messages are plain values: built once with every field and handed to the
// transport by move. The transport treats them as an opaque carrier; only
// the core interprets them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{GroupId, NodeId};
use crate::model::{GroupMembers, LogEntry, LogIndex, SnapshotChunk, Term};

/// Fields shared by every protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Group the message belongs to
    pub group_id: GroupId,

    /// Sending member
    pub sender: NodeId,

    /// Sender's term at send time
    pub term: Term,
}

/// Request for a vote in the sender's term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub header: MessageHeader,

    /// Index of the candidate's last log entry
    pub last_log_index: LogIndex,

    /// Term of the candidate's last log entry
    pub last_log_term: Term,

    /// True when an existing leader prompted this candidacy; voters skip
    /// the leader-stickiness check for sticky candidacies
    pub sticky: bool,
}

/// Answer to a vote request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub header: MessageHeader,

    /// True if the vote was granted for `header.term`
    pub granted: bool,
}

/// Log replication request; empty `entries` is a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub header: MessageHeader,

    /// Index of the entry immediately preceding `entries`
    pub previous_log_index: LogIndex,

    /// Term of the entry at `previous_log_index`
    pub previous_log_term: Term,

    /// Entries to append, contiguous from `previous_log_index + 1`
    pub entries: Vec<LogEntry>,

    /// Leader's commit index
    pub leader_commit_index: LogIndex,

    /// Highest read-barrier sequence number awaiting acknowledgment
    pub query_seq_no: u64,

    /// Per-follower monotonic sequence number, echoed in responses
    pub flow_control_seq_no: u64,
}

/// Follower accepted the append and made the entries durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesSuccessResponse {
    pub header: MessageHeader,

    /// Follower's last log index after the append
    pub last_log_index: LogIndex,

    /// Echo of the request's read-barrier sequence number
    pub query_seq_no: u64,

    /// Echo of the request's flow control sequence number
    pub flow_control_seq_no: u64,
}

/// Follower rejected the append due to a log mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesFailureResponse {
    pub header: MessageHeader,

    /// Conservative hint for the leader's next attempt
    pub expected_next_index: LogIndex,

    /// Echo of the request's flow control sequence number
    pub flow_control_seq_no: u64,
}

/// Chunked snapshot transfer for a follower behind the leader's log window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub header: MessageHeader,

    /// Log index the snapshot covers up to
    pub snapshot_index: LogIndex,

    /// Term of the entry at `snapshot_index`
    pub snapshot_term: Term,

    /// Total number of chunks in the snapshot
    pub chunk_count: u32,

    /// The subset of chunks carried by this request
    pub chunks: Vec<SnapshotChunk>,

    /// Group membership as of `snapshot_index`
    pub group_members_at_index: GroupMembers,

    /// Highest read-barrier sequence number awaiting acknowledgment
    pub query_seq_no: u64,

    /// Per-follower monotonic sequence number, echoed in responses
    pub flow_control_seq_no: u64,
}

/// Follower's view of a snapshot transfer in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub header: MessageHeader,

    /// Snapshot the response refers to
    pub snapshot_index: LogIndex,

    /// Chunk indices still missing; empty means the install completed
    pub requested: BTreeSet<u32>,

    /// Echo of the request's flow control sequence number
    pub flow_control_seq_no: u64,
}

/// Leader tells the target follower to start an election immediately,
/// used for graceful leader handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLeaderElectionRequest {
    pub header: MessageHeader,
}

/// Every message the core sends or receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesSuccessResponse(AppendEntriesSuccessResponse),
    AppendEntriesFailureResponse(AppendEntriesFailureResponse),
    InstallSnapshotRequest(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
    TriggerLeaderElectionRequest(TriggerLeaderElectionRequest),
}

impl RaftMessage {
    pub fn header(&self) -> &MessageHeader {
        match self {
            RaftMessage::VoteRequest(m) => &m.header,
            RaftMessage::VoteResponse(m) => &m.header,
            RaftMessage::AppendEntriesRequest(m) => &m.header,
            RaftMessage::AppendEntriesSuccessResponse(m) => &m.header,
            RaftMessage::AppendEntriesFailureResponse(m) => &m.header,
            RaftMessage::InstallSnapshotRequest(m) => &m.header,
            RaftMessage::InstallSnapshotResponse(m) => &m.header,
            RaftMessage::TriggerLeaderElectionRequest(m) => &m.header,
        }
    }
}
