// Value types of the consensus core.
//
// Everything here is an immutable value once constructed: log entries,
// snapshot chunks, group membership views, node reports. Wire messages
// live in the `message` submodule.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::{Endpoint, GroupId, NodeId};
use crate::error::{RaftError, Result};

pub mod message;

/// Election epoch. Monotonically non-decreasing; each term has at most one
/// leader.
pub type Term = u64;

/// Position in the replicated log. Starts at 1; 0 means "no entry".
pub type LogIndex = u64;

/// The operation carried by a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntryOperation {
    /// Commits the new leader's term without touching the state machine
    Noop,

    /// Same as Noop, appended when the new-term operation is enabled
    NewTerm,

    /// Opaque state machine operation
    Apply(Bytes),

    /// Single-server membership change; carries the full new member view
    MembershipChange(GroupMembers),

    /// Marks the whole group for termination once committed
    TerminateGroup,
}

impl EntryOperation {
    pub fn is_membership_change(&self) -> bool {
        matches!(self, EntryOperation::MembershipChange(_))
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, EntryOperation::TerminateGroup)
    }
}

/// Entry in the replicated log. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of this entry in the log
    pub index: LogIndex,

    /// Term in which the entry was appended by a leader
    pub term: Term,

    /// The operation to run when the entry commits
    pub operation: EntryOperation,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, operation: EntryOperation) -> Self {
        Self {
            index,
            term,
            operation,
        }
    }
}

/// One chunk of a state machine snapshot.
///
/// A snapshot is complete once all `chunk_count` chunks for its
/// `snapshot_index` are present; chunks are order-independent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotChunk {
    /// Log index the snapshot covers up to (inclusive)
    pub snapshot_index: LogIndex,

    /// Term of the entry at `snapshot_index`
    pub snapshot_term: Term,

    /// Position of this chunk, 0-based
    pub chunk_index: u32,

    /// Total number of chunks in the snapshot
    pub chunk_count: u32,

    /// Serialized state machine data
    pub payload: Bytes,

    /// Group membership as of `snapshot_index`
    pub group_members: GroupMembers,
}

/// A view of the group's membership anchored at a log index.
///
/// `members` holds every replicated member; `voting` the subset counted
/// toward election and commit quorums. Members outside `voting` are
/// learners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembers {
    /// Index of the log entry that established this view (0 = bootstrap)
    pub log_index: LogIndex,

    /// All replicated members, keyed by id
    pub members: BTreeMap<NodeId, Endpoint>,

    /// Ids of members counted toward quorums
    pub voting: BTreeSet<NodeId>,
}

impl GroupMembers {
    /// Bootstrap view: every initial member votes, anchored at index 0.
    pub fn bootstrap(initial: impl IntoIterator<Item = Endpoint>) -> Self {
        let members: BTreeMap<NodeId, Endpoint> =
            initial.into_iter().map(|e| (e.id.clone(), e)).collect();
        let voting = members.keys().cloned().collect();
        Self {
            log_index: 0,
            members,
            voting,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn is_voting(&self, id: &str) -> bool {
        self.voting.contains(id)
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.members.get(id)
    }

    /// Number of votes a quorum requires.
    pub fn majority(&self) -> usize {
        self.voting.len() / 2 + 1
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Derive the view that results from applying a single-server change,
    /// anchored at `log_index`.
    pub fn apply_change(
        &self,
        change: &MembershipChange,
        log_index: LogIndex,
    ) -> Result<GroupMembers> {
        let mut next = self.clone();
        next.log_index = log_index;

        match change {
            MembershipChange::AddMember(endpoint) => {
                if next.contains(&endpoint.id) {
                    return Err(RaftError::InvalidArgument(format!(
                        "{} is already a group member",
                        endpoint.id
                    )));
                }
                next.voting.insert(endpoint.id.clone());
                next.members.insert(endpoint.id.clone(), endpoint.clone());
            }
            MembershipChange::AddLearner(endpoint) => {
                if next.contains(&endpoint.id) {
                    return Err(RaftError::InvalidArgument(format!(
                        "{} is already a group member",
                        endpoint.id
                    )));
                }
                next.members.insert(endpoint.id.clone(), endpoint.clone());
            }
            MembershipChange::RemoveMember(id) => {
                if next.members.remove(id.as_str()).is_none() {
                    return Err(RaftError::InvalidArgument(format!(
                        "{id} is not a group member"
                    )));
                }
                next.voting.remove(id.as_str());
            }
            MembershipChange::PromoteToVoter(id) => {
                if !next.contains(id) {
                    return Err(RaftError::InvalidArgument(format!(
                        "{id} is not a group member"
                    )));
                }
                if !next.voting.insert(id.clone()) {
                    return Err(RaftError::InvalidArgument(format!(
                        "{id} is already a voting member"
                    )));
                }
            }
        }

        Ok(next)
    }
}

/// Single-server membership change modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MembershipChange {
    /// Add a new voting member
    AddMember(Endpoint),

    /// Add a new non-voting member
    AddLearner(Endpoint),

    /// Remove a member (voting or learner)
    RemoveMember(NodeId),

    /// Move an existing learner into the voting set
    PromoteToVoter(NodeId),
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Constructed but the store is not open yet
    Initial,

    /// Serving the protocol
    Active,

    /// A membership change entry is appended but not yet committed
    UpdatingMembership,

    /// A terminate entry is appended but not yet committed
    TerminatingGroup,

    /// Shut down; ignores further events
    Terminated,
}

/// Protocol role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passively receives log entries from the leader
    Follower,

    /// Requesting votes for leadership
    Candidate,

    /// Drives log replication
    Leader,

    /// Replicated but not counted toward quorums until promoted
    Learner,
}

/// Consistency policy of a query.
#[derive(Debug, Clone)]
pub enum QueryPolicy {
    /// Read-barrier heartbeat round before executing on the leader;
    /// observes every write committed before the query was submitted
    Linearizable,

    /// Executes on the leader immediately; unsafe under leadership
    /// uncertainty
    LeaderLocal,

    /// Executes on any member once its commit index reaches
    /// `min_commit_index`
    EventualConsistency { min_commit_index: LogIndex },
}

/// Successful outcome of a replicated operation or a query.
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Commit index at which the operation took effect
    pub commit_index: LogIndex,

    /// State machine response
    pub response: Bytes,
}

/// Log metrics exposed through the node report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLogStats {
    pub first_index: LogIndex,
    pub last_index: LogIndex,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub snapshot_index: LogIndex,
    pub snapshot_term: Term,
}

/// Point-in-time snapshot of a node, for admin and observer surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftNodeReport {
    pub group_id: GroupId,
    pub endpoint: Endpoint,
    pub status: NodeStatus,
    pub role: Role,
    pub term: Term,
    pub leader: Option<Endpoint>,
    pub committed_members: GroupMembers,
    pub effective_members: GroupMembers,
    pub log: RaftLogStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(id, "127.0.0.1:7000")
    }

    fn three_members() -> GroupMembers {
        GroupMembers::bootstrap(vec![endpoint("n1"), endpoint("n2"), endpoint("n3")])
    }

    #[test]
    fn test_bootstrap_members_all_vote() {
        let members = three_members();
        assert_eq!(members.log_index, 0);
        assert_eq!(members.member_count(), 3);
        assert_eq!(members.majority(), 2);
        assert!(members.is_voting("n2"));
    }

    #[test]
    fn test_add_member_grows_quorum() {
        let members = three_members();
        let grown = members
            .apply_change(&MembershipChange::AddMember(endpoint("n4")), 7)
            .unwrap();

        assert_eq!(grown.log_index, 7);
        assert_eq!(grown.member_count(), 4);
        assert_eq!(grown.majority(), 3);
        // original view is untouched
        assert_eq!(members.member_count(), 3);
    }

    #[test]
    fn test_learner_excluded_from_quorum() {
        let members = three_members();
        let with_learner = members
            .apply_change(&MembershipChange::AddLearner(endpoint("n4")), 5)
            .unwrap();

        assert_eq!(with_learner.member_count(), 4);
        assert!(!with_learner.is_voting("n4"));
        assert_eq!(with_learner.majority(), 2);

        let promoted = with_learner
            .apply_change(&MembershipChange::PromoteToVoter("n4".to_string()), 9)
            .unwrap();
        assert!(promoted.is_voting("n4"));
        assert_eq!(promoted.majority(), 3);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let members = three_members();
        let result = members.apply_change(&MembershipChange::AddMember(endpoint("n2")), 4);
        assert!(matches!(result, Err(RaftError::InvalidArgument(_))));
    }

    #[test]
    fn test_remove_unknown_member_rejected() {
        let members = three_members();
        let result =
            members.apply_change(&MembershipChange::RemoveMember("n9".to_string()), 4);
        assert!(matches!(result, Err(RaftError::InvalidArgument(_))));
    }

    #[test]
    fn test_remove_member_shrinks_quorum() {
        let members = three_members();
        let shrunk = members
            .apply_change(&MembershipChange::RemoveMember("n3".to_string()), 11)
            .unwrap();
        assert_eq!(shrunk.member_count(), 2);
        assert_eq!(shrunk.majority(), 2);
        assert!(!shrunk.contains("n3"));
    }
}
