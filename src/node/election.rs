// Leader election, vote handling and leadership transfer.
//
// Votes are durable before they travel: a candidate persists its
// self-vote before requesting, a voter persists its grant before
// replying. Leader stickiness suppresses disruptive candidacies on the
// voter side and forces a quorum-silent leader to step down.

use std::collections::HashSet;

use tokio::sync::oneshot;

use crate::common::NodeId;
use crate::error::{RaftError, Result};
use crate::model::message::{
    RaftMessage, TriggerLeaderElectionRequest, VoteRequest, VoteResponse,
};
use crate::model::{EntryOperation, NodeStatus, Role};
use crate::node::{CandidateState, FollowerProgress, LeaderState, RaftNode, TransferState};

impl RaftNode {
    /// Stand for election. `sticky` marks a candidacy prompted by the
    /// current leader (graceful handoff), which voters exempt from the
    /// stickiness check.
    pub(crate) fn start_election(&mut self, sticky: bool) {
        if self.role == Role::Leader || self.status == NodeStatus::Terminated {
            return;
        }
        if !self.effective_members.is_voting(&self.endpoint.id) {
            self.reset_election_deadline();
            return;
        }

        self.current_term += 1;
        self.voted_for = Some(self.endpoint.id.clone());
        self.leader_id = None;
        self.role = Role::Candidate;

        let own_id = self.endpoint.id.clone();
        if let Err(e) = self
            .store
            .persist_term(self.current_term, Some(&own_id))
            .and_then(|_| self.store.flush())
        {
            self.fail_fatally(e);
            return;
        }

        let mut granted = HashSet::new();
        granted.insert(own_id);
        self.candidate = Some(CandidateState { granted });
        self.reset_election_deadline();

        tracing::info!(
            node_id = %self.endpoint.id,
            term = self.current_term,
            sticky = sticky,
            "starting election"
        );

        let request = VoteRequest {
            header: self.header(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
            sticky,
        };
        let voters: Vec<NodeId> = self
            .effective_members
            .voting
            .iter()
            .filter(|id| **id != self.endpoint.id)
            .cloned()
            .collect();
        for id in voters {
            self.send_to_id(&id, RaftMessage::VoteRequest(request.clone()));
        }

        self.try_win_election();
    }

    pub(crate) fn handle_vote_request(&mut self, request: VoteRequest) {
        let candidate_id = request.header.sender.clone();
        let mut granted = false;

        if request.header.term == self.current_term {
            let vote_available = match &self.voted_for {
                None => true,
                Some(voted) => *voted == candidate_id,
            };
            let log_up_to_date = (request.last_log_term, request.last_log_index)
                >= (self.log.last_term(), self.log.last_index());
            let sticky_ok = request.sticky || !self.heard_from_leader_recently();

            if vote_available && log_up_to_date && sticky_ok {
                if self.voted_for.is_none() {
                    self.voted_for = Some(candidate_id.clone());
                    let term = self.current_term;
                    if let Err(e) = self
                        .store
                        .persist_term(term, Some(&candidate_id))
                        .and_then(|_| self.store.flush())
                    {
                        self.fail_fatally(e);
                        return;
                    }
                }
                granted = true;
                self.reset_election_deadline();
                tracing::debug!(
                    node_id = %self.endpoint.id,
                    candidate = %candidate_id,
                    term = self.current_term,
                    "vote granted"
                );
            }
        }

        let response = VoteResponse {
            header: self.header(),
            granted,
        };
        self.send_to_id(&candidate_id, RaftMessage::VoteResponse(response));
    }

    pub(crate) fn handle_vote_response(&mut self, response: VoteResponse) {
        if response.header.term < self.current_term || self.role != Role::Candidate {
            return;
        }
        if !response.granted {
            return;
        }
        if !self.effective_members.is_voting(&response.header.sender) {
            return;
        }
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.granted.insert(response.header.sender);
        }
        self.try_win_election();
    }

    fn try_win_election(&mut self) {
        let won = self
            .candidate
            .as_ref()
            .map(|c| c.granted.len() >= self.effective_members.majority())
            .unwrap_or(false);
        if won {
            self.become_leader();
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.endpoint.id.clone());
        self.candidate = None;
        self.last_leader_contact = None;

        let next_index = self.log.last_index() + 1;
        let followers = self
            .effective_members
            .members
            .keys()
            .filter(|id| **id != self.endpoint.id)
            .map(|id| (id.clone(), FollowerProgress::new(next_index, self.now)))
            .collect();
        self.leader = Some(LeaderState {
            followers,
            query_seq_no: 0,
            pending_queries: Vec::new(),
            transfer: None,
            next_heartbeat_at: self.now,
        });

        tracing::info!(
            node_id = %self.endpoint.id,
            term = self.current_term,
            last_log_index = self.log.last_index(),
            "elected leader"
        );

        // commit the new term with an empty entry
        let operation = if self.config.enable_new_term_operation {
            EntryOperation::NewTerm
        } else {
            EntryOperation::Noop
        };
        match self.leader_append(operation) {
            Ok(_) => {
                self.advance_commit();
                self.broadcast_append_entries();
            }
            Err(e) => self.fail_fatally(e),
        }
    }

    /// Leader-side duties on each tick: heartbeats when due, and the
    /// stickiness check that demotes a leader cut off from its quorum.
    pub(crate) fn leader_tick(&mut self) {
        let Some(leader) = self.leader.as_ref() else {
            return;
        };

        if self.effective_members.voting.len() > 1 {
            let timeout = self.config.leader_heartbeat_timeout;
            let mut responsive = if self.effective_members.is_voting(&self.endpoint.id) {
                1
            } else {
                0
            };
            responsive += leader
                .followers
                .iter()
                .filter(|(id, progress)| {
                    self.effective_members.is_voting(id)
                        && self.now.saturating_duration_since(progress.last_response_at) < timeout
                })
                .count();

            if responsive < self.effective_members.majority() {
                tracing::warn!(
                    node_id = %self.endpoint.id,
                    term = self.current_term,
                    "lost contact with the quorum, stepping down"
                );
                self.leader_id = None;
                self.step_down_from_leadership();
                return;
            }
        }

        if self.now >= leader.next_heartbeat_at {
            self.broadcast_append_entries();
        }
    }

    /// Hand leadership to `target`: replicate it up to date, then tell
    /// it to start a sticky election.
    pub fn transfer_leadership(
        &mut self,
        target: NodeId,
        completion: oneshot::Sender<Result<()>>,
    ) {
        if self.role != Role::Leader {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        }
        if target == self.endpoint.id {
            let _ = completion.send(Ok(()));
            return;
        }
        if !self.effective_members.is_voting(&target) {
            let _ = completion.send(Err(RaftError::InvalidArgument(format!(
                "{target} is not a voting member"
            ))));
            return;
        }
        let Some(leader) = self.leader.as_mut() else {
            let _ = completion.send(Err(RaftError::NotLeader { leader: None }));
            return;
        };
        if leader.transfer.is_some() {
            let _ = completion.send(Err(RaftError::CannotReplicate(
                "a leadership transfer is already in progress".to_string(),
            )));
            return;
        }
        leader.transfer = Some(TransferState { target, completion });

        self.try_complete_transfer();
        if self.leader.as_ref().is_some_and(|l| l.transfer.is_some()) {
            // hurry the target along
            self.broadcast_append_entries();
        }
    }

    /// Fires the handoff once the transfer target has acknowledged the
    /// leader's whole log.
    pub(crate) fn try_complete_transfer(&mut self) {
        let last_index = self.log.last_index();
        let Some(leader) = self.leader.as_mut() else {
            return;
        };
        let caught_up = match leader.transfer.as_ref() {
            Some(transfer) => leader
                .followers
                .get(&transfer.target)
                .is_some_and(|p| p.match_index >= last_index),
            None => return,
        };
        if !caught_up {
            return;
        }

        let Some(transfer) = leader.transfer.take() else {
            return;
        };
        tracing::info!(
            node_id = %self.endpoint.id,
            target = %transfer.target,
            "transferring leadership"
        );
        let request = TriggerLeaderElectionRequest {
            header: self.header(),
        };
        self.send_to_id(
            &transfer.target,
            RaftMessage::TriggerLeaderElectionRequest(request),
        );
        let _ = transfer.completion.send(Ok(()));
    }

    /// The current leader asked this node to take over.
    pub(crate) fn handle_trigger_election(&mut self, request: TriggerLeaderElectionRequest) {
        if request.header.term < self.current_term || self.role == Role::Leader {
            return;
        }
        tracing::info!(
            node_id = %self.endpoint.id,
            leader = %request.header.sender,
            "leader requested an immediate election"
        );
        self.start_election(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::model::message::{
        AppendEntriesRequest, MessageHeader, RaftMessage, VoteRequest,
    };
    use crate::model::{EntryOperation, LogEntry, Role};
    use crate::node::test_support::*;

    fn vote_request(term: u64, candidate: &str, last_index: u64, last_term: u64) -> VoteRequest {
        VoteRequest {
            header: MessageHeader {
                group_id: "group-1".to_string(),
                sender: candidate.to_string(),
                term,
            },
            last_log_index: last_index,
            last_log_term: last_term,
            sticky: false,
        }
    }

    #[test]
    fn test_vote_granted_and_persisted_before_reply() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        node.handle_message(RaftMessage::VoteRequest(vote_request(1, "n2", 0, 0)));

        let sent = outbox.lock();
        let (target, message) = sent.last().unwrap();
        assert_eq!(target, "n2");
        match message {
            RaftMessage::VoteResponse(r) => {
                assert!(r.granted);
                assert_eq!(r.header.term, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(node.term(), 1);
    }

    #[test]
    fn test_second_candidate_rejected_in_same_term() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        node.handle_message(RaftMessage::VoteRequest(vote_request(1, "n2", 0, 0)));
        node.handle_message(RaftMessage::VoteRequest(vote_request(1, "n3", 0, 0)));

        let sent = outbox.lock();
        match &sent.last().unwrap().1 {
            RaftMessage::VoteResponse(r) => assert!(!r.granted),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_vote_rejected_for_stale_candidate_log() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        // a term-1 leader replicates one entry to n1
        node.handle_message(RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            header: MessageHeader {
                group_id: "group-1".to_string(),
                sender: "n3".to_string(),
                term: 1,
            },
            previous_log_index: 0,
            previous_log_term: 0,
            entries: vec![LogEntry::new(1, 1, EntryOperation::Noop)],
            leader_commit_index: 0,
            query_seq_no: 0,
            flow_control_seq_no: 1,
        }));

        // a candidate whose log is empty loses the up-to-date check even
        // with the stickiness bit set
        let mut stale = vote_request(2, "n2", 0, 0);
        stale.sticky = true;
        node.handle_message(RaftMessage::VoteRequest(stale));
        match &outbox.lock().last().unwrap().1 {
            RaftMessage::VoteResponse(r) => assert!(!r.granted),
            other => panic!("unexpected message: {other:?}"),
        };

        // the same candidate with a matching log is granted
        let mut current = vote_request(2, "n2", 1, 1);
        current.sticky = true;
        node.handle_message(RaftMessage::VoteRequest(current));
        match &outbox.lock().last().unwrap().1 {
            RaftMessage::VoteResponse(r) => assert!(r.granted),
            other => panic!("unexpected message: {other:?}"),
        };
    }

    #[test]
    fn test_election_deadline_promotes_follower() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        assert_eq!(node.role(), Role::Follower);
        node.tick(now + Duration::from_secs(2));
        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.term(), 1);

        let vote_requests = outbox
            .lock()
            .iter()
            .filter(|(_, m)| matches!(m, RaftMessage::VoteRequest(_)))
            .count();
        assert_eq!(vote_requests, 2);
    }

    #[test]
    fn test_single_node_group_elects_itself() {
        let now = Instant::now();
        let (mut node, _outbox) = build_node("n1", &["n1"], now);

        node.tick(now + Duration::from_secs(2));
        assert_eq!(node.role(), Role::Leader);
        // noop entry committed immediately
        assert_eq!(node.commit_index(), 1);
    }
}
