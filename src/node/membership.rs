// Single-server membership reconfiguration.
//
// One change at a time: a change entry is appended with the new member
// view, the new quorum takes effect from that entry onward, and the
// committed view catches up when the entry commits. If the entry is
// truncated the effective view reverts to the committed one.

use tokio::sync::oneshot;

use crate::error::{RaftError, Result};
use crate::model::{
    EntryOperation, GroupMembers, LogEntry, LogIndex, MembershipChange, NodeStatus, Role,
};
use crate::node::{FollowerProgress, PendingCompletion, RaftNode};

impl RaftNode {
    /// Apply a single-server membership change through the log.
    ///
    /// `expected_group_members_commit_index` must match the committed
    /// member view's index; a stale expectation fails with an invalid
    /// argument so callers cannot race each other.
    pub fn change_membership(
        &mut self,
        change: MembershipChange,
        expected_group_members_commit_index: LogIndex,
        completion: oneshot::Sender<Result<GroupMembers>>,
    ) {
        if self.role != Role::Leader {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        }
        if self.effective_members.log_index != self.committed_members.log_index {
            let _ = completion.send(Err(RaftError::CannotReplicate(
                "another membership change is in progress".to_string(),
            )));
            return;
        }
        if let Err(e) = self.check_can_append() {
            let _ = completion.send(Err(e));
            return;
        }
        if expected_group_members_commit_index != self.committed_members.log_index {
            let _ = completion.send(Err(RaftError::InvalidArgument(format!(
                "expected member view at {} but the committed view is at {}",
                expected_group_members_commit_index, self.committed_members.log_index
            ))));
            return;
        }

        let index = self.log.last_index() + 1;
        let new_members = match self.committed_members.apply_change(&change, index) {
            Ok(members) => members,
            Err(e) => {
                let _ = completion.send(Err(e));
                return;
            }
        };

        tracing::info!(
            node_id = %self.endpoint.id,
            change = ?change,
            log_index = index,
            "appending membership change"
        );
        match self.leader_append(EntryOperation::MembershipChange(new_members.clone())) {
            Ok(appended_at) => {
                debug_assert_eq!(appended_at, index);
                self.on_membership_entry_appended(&new_members);
                self.pending
                    .insert(index, PendingCompletion::Membership(completion));
                self.advance_commit();
                self.broadcast_append_entries();
            }
            Err(e) => {
                let message = e.to_string();
                self.fail_fatally(e);
                let _ = completion.send(Err(RaftError::StoreError(message)));
            }
        }
    }

    /// Append-time side effects of a replicated entry: the effective
    /// member view and the lifecycle status move as soon as the entry is
    /// in the log, before it commits.
    pub(crate) fn note_appended_marker(&mut self, entry: &LogEntry) {
        match &entry.operation {
            EntryOperation::MembershipChange(members) => {
                self.on_membership_entry_appended(&members.clone());
            }
            EntryOperation::TerminateGroup => {
                self.terminate_index = Some(entry.index);
                if self.status != NodeStatus::Terminated {
                    self.status = NodeStatus::TerminatingGroup;
                }
            }
            _ => {}
        }
    }

    pub(crate) fn on_membership_entry_appended(&mut self, members: &GroupMembers) {
        self.effective_members = members.clone();
        if self.status == NodeStatus::Active {
            self.status = NodeStatus::UpdatingMembership;
        }

        match self.role {
            Role::Leader => {
                // start replicating to new members right away; members
                // being removed keep receiving entries until the change
                // commits
                let next_index = self.log.last_index() + 1;
                let now = self.now;
                let own_id = self.endpoint.id.clone();
                if let Some(leader) = self.leader.as_mut() {
                    for id in members.members.keys() {
                        if *id != own_id {
                            leader
                                .followers
                                .entry(id.clone())
                                .or_insert_with(|| FollowerProgress::new(next_index, now));
                        }
                    }
                }
            }
            Role::Follower | Role::Learner => {
                // voting status may have changed for this node
                self.role = self.follower_role();
            }
            Role::Candidate => {}
        }
    }

    /// Commit-time side effects of a membership entry.
    pub(crate) fn commit_membership_entry(&mut self, index: LogIndex, members: GroupMembers) {
        self.committed_members = members.clone();
        if self.status == NodeStatus::UpdatingMembership
            && self.effective_members.log_index == members.log_index
        {
            self.status = NodeStatus::Active;
        }

        tracing::info!(
            node_id = %self.endpoint.id,
            log_index = index,
            member_count = members.member_count(),
            "membership change committed"
        );

        if let Some(PendingCompletion::Membership(tx)) = self.pending.remove(&index) {
            let _ = tx.send(Ok(members.clone()));
        }

        if self.role == Role::Leader {
            if !members.contains(&self.endpoint.id) {
                // this leader removed itself; hand the group over
                tracing::info!(
                    node_id = %self.endpoint.id,
                    "removed from the group, stepping down"
                );
                self.leader_id = None;
                self.step_down_from_leadership();
                return;
            }
            if let Some(leader) = self.leader.as_mut() {
                leader
                    .followers
                    .retain(|id, _| members.contains(id));
            }
        }
    }

    /// Undo the append-time effects of truncated-away entries.
    pub(crate) fn revert_uncommitted_markers(&mut self, removed: &[LogEntry]) {
        let mut membership_reverted = false;
        for entry in removed {
            match &entry.operation {
                EntryOperation::MembershipChange(_) => membership_reverted = true,
                EntryOperation::TerminateGroup => {
                    if self.terminate_index == Some(entry.index) {
                        self.terminate_index = None;
                        if self.status == NodeStatus::TerminatingGroup {
                            self.status = NodeStatus::Active;
                        }
                    }
                }
                _ => {}
            }
        }

        if membership_reverted {
            self.effective_members = self.committed_members.clone();
            if self.status == NodeStatus::UpdatingMembership {
                self.status = NodeStatus::Active;
            }
            if self.role != Role::Leader && self.role != Role::Candidate {
                self.role = self.follower_role();
            }
        }
    }
}
