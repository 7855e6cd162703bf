// Log replication and snapshot transfer.
//
// The leader streams batched appends per follower, falling back to the
// chunked snapshot install protocol when a follower is behind the log
// window. Followers make entries durable before acknowledging. Commit
// advances over the median of voting match indices, restricted to
// current-term entries.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::common::NodeId;
use crate::error::RaftError;
use crate::log::SnapshotRecord;
use crate::model::message::{
    AppendEntriesFailureResponse, AppendEntriesRequest, AppendEntriesSuccessResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, RaftMessage,
};
use crate::model::{LogEntry, LogIndex, NodeStatus, Role, SnapshotChunk};
use crate::node::{IncomingSnapshot, RaftNode};

impl RaftNode {
    /// Send an append (or snapshot) to every follower and reschedule the
    /// heartbeat.
    pub(crate) fn broadcast_append_entries(&mut self) {
        let Some(leader) = self.leader.as_mut() else {
            return;
        };
        leader.next_heartbeat_at = self.now + self.config.leader_heartbeat_period;
        let followers: Vec<NodeId> = leader.followers.keys().cloned().collect();
        for id in followers {
            self.send_append_to(&id);
        }
    }

    /// Send the next batch to one follower, switching to a snapshot
    /// install when its next index fell behind the log window.
    pub(crate) fn send_append_to(&mut self, id: &NodeId) {
        let snapshot_boundary = self.log.snapshot_index();
        let commit_index = self.commit_index;

        let Some(leader) = self.leader.as_mut() else {
            return;
        };
        let query_seq_no = leader.query_seq_no;
        let Some(progress) = leader.followers.get_mut(id) else {
            return;
        };

        if progress.next_index <= snapshot_boundary {
            self.send_snapshot_to(id, None);
            return;
        }

        progress.flow_seq_sent += 1;
        let flow_seq = progress.flow_seq_sent;
        let next_index = progress.next_index;

        let previous_log_index = next_index - 1;
        let previous_log_term = self.log.term_at(previous_log_index).unwrap_or(0);
        let entries = self
            .log
            .slice(next_index, self.config.append_entries_request_batch_size);

        let request = AppendEntriesRequest {
            header: self.header(),
            previous_log_index,
            previous_log_term,
            entries,
            leader_commit_index: commit_index,
            query_seq_no,
            flow_control_seq_no: flow_seq,
        };
        self.send_to_id(id, RaftMessage::AppendEntriesRequest(request));
    }

    /// Ship snapshot chunks to a lagging follower. `requested` narrows
    /// the batch to chunks the follower reported missing.
    fn send_snapshot_to(&mut self, id: &NodeId, requested: Option<&BTreeSet<u32>>) {
        let batch_size = self.config.append_entries_request_batch_size;
        let Some(snapshot) = self.log.snapshot() else {
            return;
        };
        let snapshot_index = snapshot.index;
        let snapshot_term = snapshot.term;
        let chunk_count = snapshot.chunks.len() as u32;
        let members = snapshot.members.clone();
        let chunks: Vec<SnapshotChunk> = match requested {
            Some(wanted) => snapshot
                .chunks
                .iter()
                .filter(|c| wanted.contains(&c.chunk_index))
                .take(batch_size)
                .cloned()
                .collect(),
            None => snapshot.chunks.iter().take(batch_size).cloned().collect(),
        };

        let heartbeat_timeout = self.config.leader_heartbeat_timeout;
        let now = self.now;
        let Some(leader) = self.leader.as_mut() else {
            return;
        };
        let query_seq_no = leader.query_seq_no;
        let Some(progress) = leader.followers.get_mut(id) else {
            return;
        };

        // a full (unsolicited) resend waits out the in-flight window
        if requested.is_none() {
            if let Some(since) = progress.snapshot_inflight_since {
                if now.saturating_duration_since(since) < heartbeat_timeout {
                    return;
                }
            }
        }
        progress.snapshot_inflight_since = Some(now);
        progress.flow_seq_sent += 1;
        let flow_seq = progress.flow_seq_sent;

        tracing::debug!(
            node_id = %self.endpoint.id,
            follower = %id,
            snapshot_index = snapshot_index,
            chunks = chunks.len(),
            "sending snapshot chunks"
        );
        let request = InstallSnapshotRequest {
            header: self.header(),
            snapshot_index,
            snapshot_term,
            chunk_count,
            chunks,
            group_members_at_index: members,
            query_seq_no,
            flow_control_seq_no: flow_seq,
        };
        self.send_to_id(id, RaftMessage::InstallSnapshotRequest(request));
    }

    // --- follower side -------------------------------------------------

    pub(crate) fn handle_append_entries(&mut self, request: AppendEntriesRequest) {
        let leader_id = request.header.sender.clone();

        if request.header.term < self.current_term {
            // stale leader; our header term will make it step down
            let response = AppendEntriesFailureResponse {
                header: self.header(),
                expected_next_index: self.log.last_index() + 1,
                flow_control_seq_no: request.flow_control_seq_no,
            };
            self.send_to_id(&leader_id, RaftMessage::AppendEntriesFailureResponse(response));
            return;
        }

        // valid leader for the current term
        self.leader_id = Some(leader_id.clone());
        self.last_leader_contact = Some(self.now);
        self.reset_election_deadline();
        if self.role == Role::Candidate {
            self.candidate = None;
            self.role = self.follower_role();
        }

        // log consistency check
        let previous = request.previous_log_index;
        let consistent = self.log.term_at(previous) == Some(request.previous_log_term);
        if !consistent {
            let expected_next_index = if previous < self.log.first_index() {
                // diverged below the window; restart from its base
                self.log.first_index()
            } else if previous > self.log.last_index() {
                self.log.last_index() + 1
            } else {
                // conflicting tail entry: drop it before the retry
                if !self.truncate_conflicting_tail(previous) {
                    return;
                }
                self.log.last_index() + 1
            };
            let response = AppendEntriesFailureResponse {
                header: self.header(),
                expected_next_index,
                flow_control_seq_no: request.flow_control_seq_no,
            };
            self.send_to_id(&leader_id, RaftMessage::AppendEntriesFailureResponse(response));
            return;
        }

        // skip entries already present; truncate on the first conflict
        let mut appended = false;
        for entry in request.entries {
            if entry.index <= self.log.snapshot_index() {
                continue;
            }
            match self.log.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if !self.truncate_conflicting_tail(entry.index) {
                        return;
                    }
                    if !self.append_one(entry) {
                        return;
                    }
                    appended = true;
                }
                None => {
                    if !self.append_one(entry) {
                        return;
                    }
                    appended = true;
                }
            }
        }
        if appended {
            if let Err(e) = self.store.flush() {
                self.fail_fatally(e);
                return;
            }
        }

        if request.leader_commit_index > self.commit_index {
            self.commit_index = request
                .leader_commit_index
                .min(self.log.last_index());
            self.apply_committed();
            if self.status == NodeStatus::Terminated {
                return;
            }
        }

        let response = AppendEntriesSuccessResponse {
            header: self.header(),
            last_log_index: self.log.last_index(),
            query_seq_no: request.query_seq_no,
            flow_control_seq_no: request.flow_control_seq_no,
        };
        self.send_to_id(&leader_id, RaftMessage::AppendEntriesSuccessResponse(response));
    }

    /// Append one replicated entry to the log and the store, and run its
    /// append-time side effects. Returns false after a fatal failure.
    fn append_one(&mut self, entry: LogEntry) -> bool {
        if let Err(e) = self.log.append(vec![entry.clone()]) {
            self.fail_fatally(e);
            return false;
        }
        if let Err(e) = self.store.persist_log_entry(&entry) {
            self.fail_fatally(e);
            return false;
        }
        self.note_appended_marker(&entry);
        true
    }

    /// Remove the conflicting tail `[index ..]` from log and store.
    /// Returns false after a fatal failure.
    fn truncate_conflicting_tail(&mut self, index: LogIndex) -> bool {
        if index <= self.commit_index {
            self.fail_fatally(RaftError::Internal(format!(
                "asked to truncate committed entry {index} (commit index {})",
                self.commit_index
            )));
            return false;
        }
        let removed = match self.log.truncate_from(index) {
            Ok(removed) => removed,
            Err(e) => {
                self.fail_fatally(e);
                return false;
            }
        };
        if let Err(e) = self
            .store
            .truncate_log_entries_from(index)
            .and_then(|_| self.store.flush())
        {
            self.fail_fatally(e);
            return false;
        }
        self.revert_uncommitted_markers(&removed);
        tracing::debug!(
            node_id = %self.endpoint.id,
            from = index,
            removed = removed.len(),
            "truncated conflicting log tail"
        );
        true
    }

    // --- leader side ---------------------------------------------------

    pub(crate) fn handle_append_success(&mut self, response: AppendEntriesSuccessResponse) {
        if response.header.term < self.current_term || self.role != Role::Leader {
            return;
        }
        let sender = response.header.sender.clone();
        let last_index = self.log.last_index();

        let continue_streaming = {
            let Some(leader) = self.leader.as_mut() else {
                return;
            };
            let Some(progress) = leader.followers.get_mut(&sender) else {
                return;
            };
            if response.flow_control_seq_no < progress.flow_seq_acked {
                return; // stale response
            }
            progress.flow_seq_acked = response.flow_control_seq_no;
            progress.last_response_at = self.now;
            progress.snapshot_inflight_since = None;
            // a follower with a longer stale tail may report beyond our
            // own log; only entries we actually hold count as matched
            let acknowledged = response.last_log_index.min(last_index);
            progress.match_index = progress.match_index.max(acknowledged);
            progress.next_index = progress.next_index.max(acknowledged + 1);
            progress.query_seq_acked = progress.query_seq_acked.max(response.query_seq_no);
            progress.next_index <= last_index
        };

        self.advance_commit();
        if self.status == NodeStatus::Terminated {
            return;
        }
        self.serve_pending_queries();
        self.try_complete_transfer();
        if continue_streaming {
            self.send_append_to(&sender);
        }
    }

    pub(crate) fn handle_append_failure(&mut self, response: AppendEntriesFailureResponse) {
        if response.header.term < self.current_term || self.role != Role::Leader {
            return;
        }
        let sender = response.header.sender.clone();
        let last_index = self.log.last_index();

        {
            let Some(leader) = self.leader.as_mut() else {
                return;
            };
            let Some(progress) = leader.followers.get_mut(&sender) else {
                return;
            };
            if response.flow_control_seq_no < progress.flow_seq_acked {
                return;
            }
            progress.flow_seq_acked = response.flow_control_seq_no;
            progress.last_response_at = self.now;
            progress.snapshot_inflight_since = None;

            let hint = response.expected_next_index.max(1);
            progress.next_index = hint.max(progress.match_index + 1).min(last_index + 1);
        }

        self.send_append_to(&sender);
    }

    // --- snapshot install, follower side -------------------------------

    pub(crate) fn handle_install_snapshot(&mut self, request: InstallSnapshotRequest) {
        let leader_id = request.header.sender.clone();

        if request.header.term < self.current_term {
            let response = InstallSnapshotResponse {
                header: self.header(),
                snapshot_index: request.snapshot_index,
                requested: BTreeSet::new(),
                flow_control_seq_no: request.flow_control_seq_no,
            };
            self.send_to_id(&leader_id, RaftMessage::InstallSnapshotResponse(response));
            return;
        }

        self.leader_id = Some(leader_id.clone());
        self.last_leader_contact = Some(self.now);
        self.reset_election_deadline();
        if self.role == Role::Candidate {
            self.candidate = None;
            self.role = self.follower_role();
        }

        // already covered by our own log or snapshot
        if request.snapshot_index <= self.log.snapshot_index()
            || request.snapshot_index <= self.commit_index
        {
            let response = InstallSnapshotResponse {
                header: self.header(),
                snapshot_index: request.snapshot_index,
                requested: BTreeSet::new(),
                flow_control_seq_no: request.flow_control_seq_no,
            };
            self.send_to_id(&leader_id, RaftMessage::InstallSnapshotResponse(response));
            return;
        }

        // start (or restart) collecting this snapshot
        let restart = self
            .incoming_snapshot
            .as_ref()
            .map(|inc| inc.index != request.snapshot_index)
            .unwrap_or(true);
        if restart {
            if let Err(e) = self
                .store
                .truncate_snapshot_chunks_until(request.snapshot_index - 1)
            {
                self.fail_fatally(e);
                return;
            }
            self.incoming_snapshot = Some(IncomingSnapshot {
                index: request.snapshot_index,
                term: request.snapshot_term,
                chunk_count: request.chunk_count,
                members: request.group_members_at_index.clone(),
                chunks: Default::default(),
            });
        }

        let mut persisted = false;
        if let Some(incoming) = self.incoming_snapshot.as_mut() {
            for chunk in request.chunks {
                if chunk.snapshot_index != incoming.index
                    || incoming.chunks.contains_key(&chunk.chunk_index)
                {
                    continue;
                }
                if let Err(e) = self.store.persist_snapshot_chunk(&chunk) {
                    self.fail_fatally(e);
                    return;
                }
                incoming.chunks.insert(chunk.chunk_index, chunk);
                persisted = true;
            }
        }
        if persisted {
            if let Err(e) = self.store.flush() {
                self.fail_fatally(e);
                return;
            }
        }

        let (missing, complete) = match self.incoming_snapshot.as_ref() {
            Some(incoming) => {
                let missing: BTreeSet<u32> = (0..incoming.chunk_count)
                    .filter(|i| !incoming.chunks.contains_key(i))
                    .collect();
                let complete = missing.is_empty();
                (missing, complete)
            }
            None => return,
        };

        if complete {
            if !self.install_collected_snapshot() {
                return;
            }
        }

        let response = InstallSnapshotResponse {
            header: self.header(),
            snapshot_index: request.snapshot_index,
            requested: missing,
            flow_control_seq_no: request.flow_control_seq_no,
        };
        self.send_to_id(&leader_id, RaftMessage::InstallSnapshotResponse(response));
    }

    /// All chunks are durable: install into the state machine, compact
    /// the log window and adopt the snapshot's membership.
    fn install_collected_snapshot(&mut self) -> bool {
        let Some(incoming) = self.incoming_snapshot.take() else {
            return true;
        };

        let payloads: Vec<Bytes> = incoming.chunks.values().map(|c| c.payload.clone()).collect();
        if let Err(e) = self.machine.install_snapshot(incoming.index, &payloads) {
            self.fail_fatally(e);
            return false;
        }

        let record = SnapshotRecord {
            index: incoming.index,
            term: incoming.term,
            members: incoming.members,
            chunks: incoming.chunks.into_values().collect(),
        };
        let snapshot_index = record.index;
        let members = record.members.clone();
        self.log.install_snapshot(record);

        // entries the window discarded must not resurface on restart
        if self.log.is_empty() {
            if let Err(e) = self
                .store
                .truncate_log_entries_from(snapshot_index + 1)
                .and_then(|_| self.store.flush())
            {
                self.fail_fatally(e);
                return false;
            }
        }

        self.commit_index = self.commit_index.max(snapshot_index);
        self.last_applied = snapshot_index;
        self.applied_since_snapshot = 0;

        // snapshot membership is committed as of its index
        if members.log_index >= self.committed_members.log_index {
            self.committed_members = members;
        }
        if self.effective_members.log_index <= self.committed_members.log_index {
            self.effective_members = self.committed_members.clone();
        } else if self.log.get(self.effective_members.log_index).is_none() {
            // the entry carrying the effective view was discarded
            self.effective_members = self.committed_members.clone();
            if self.status == NodeStatus::UpdatingMembership {
                self.status = NodeStatus::Active;
            }
        }
        if let Some(index) = self.terminate_index {
            let still_present = self
                .log
                .get(index)
                .map(|e| e.operation.is_terminate())
                .unwrap_or(false);
            if !still_present && self.status == NodeStatus::TerminatingGroup {
                self.status = NodeStatus::Active;
                self.terminate_index = None;
            }
        }
        self.role = if self.role == Role::Leader {
            Role::Leader
        } else {
            self.follower_role()
        };

        tracing::info!(
            node_id = %self.endpoint.id,
            snapshot_index = snapshot_index,
            "snapshot installed"
        );
        self.serve_waiting_reads();
        true
    }

    // --- snapshot install, leader side ---------------------------------

    pub(crate) fn handle_snapshot_response(&mut self, response: InstallSnapshotResponse) {
        if response.header.term < self.current_term || self.role != Role::Leader {
            return;
        }
        let sender = response.header.sender.clone();
        let last_index = self.log.last_index();
        let current_snapshot = self.log.snapshot_index();

        let outcome = {
            let Some(leader) = self.leader.as_mut() else {
                return;
            };
            let Some(progress) = leader.followers.get_mut(&sender) else {
                return;
            };
            if response.flow_control_seq_no < progress.flow_seq_acked {
                return;
            }
            progress.flow_seq_acked = response.flow_control_seq_no;
            progress.last_response_at = self.now;

            if response.snapshot_index != current_snapshot {
                // refers to a superseded snapshot; restart from the
                // current one on the next heartbeat
                progress.snapshot_inflight_since = None;
                return;
            }

            if response.requested.is_empty() {
                progress.snapshot_inflight_since = None;
                progress.match_index = progress.match_index.max(response.snapshot_index);
                progress.next_index = progress.next_index.max(response.snapshot_index + 1);
                progress.next_index <= last_index
            } else {
                self.send_snapshot_to(&sender, Some(&response.requested));
                return;
            }
        };

        self.advance_commit();
        self.serve_pending_queries();
        self.try_complete_transfer();
        if outcome {
            self.send_append_to(&sender);
        }
    }

    // --- commit --------------------------------------------------------

    /// Advance the commit index to the highest entry replicated on a
    /// quorum of voting members, provided it belongs to the current
    /// term. Prior-term entries commit only through it.
    pub(crate) fn advance_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let Some(leader) = self.leader.as_ref() else {
            return;
        };

        let mut match_indices: Vec<LogIndex> = self
            .effective_members
            .voting
            .iter()
            .map(|id| {
                if *id == self.endpoint.id {
                    self.log.last_index()
                } else {
                    leader
                        .followers
                        .get(id)
                        .map(|p| p.match_index)
                        .unwrap_or(0)
                }
            })
            .collect();
        if match_indices.is_empty() {
            return;
        }
        match_indices.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = match_indices[self.effective_members.majority() - 1];

        if quorum_index > self.commit_index
            && self.log.term_at(quorum_index) == Some(self.current_term)
        {
            tracing::trace!(
                node_id = %self.endpoint.id,
                commit_index = quorum_index,
                "commit index advanced"
            );
            self.commit_index = quorum_index;
            self.apply_committed();
        }
    }

    // --- local snapshots -----------------------------------------------

    /// Take a state machine snapshot every `commit_count_to_take_snapshot`
    /// applied entries, persist its chunks and compact the log window.
    pub(crate) fn maybe_take_local_snapshot(&mut self) {
        if self.applied_since_snapshot < self.config.commit_count_to_take_snapshot {
            return;
        }
        let index = self.last_applied;
        let Some(term) = self.log.term_at(index) else {
            return;
        };

        let payloads = match self.machine.take_snapshot(index) {
            Ok(payloads) => payloads,
            Err(e) => {
                self.fail_fatally(e);
                return;
            }
        };
        let chunk_count = payloads.len() as u32;
        let members = self.committed_members.clone();
        let chunks: Vec<SnapshotChunk> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| SnapshotChunk {
                snapshot_index: index,
                snapshot_term: term,
                chunk_index: i as u32,
                chunk_count,
                payload,
                group_members: members.clone(),
            })
            .collect();

        for chunk in &chunks {
            if let Err(e) = self.store.persist_snapshot_chunk(chunk) {
                self.fail_fatally(e);
                return;
            }
        }
        if let Err(e) = self
            .store
            .flush()
            .and_then(|_| self.store.truncate_snapshot_chunks_until(index - 1))
            .and_then(|_| self.store.flush())
        {
            self.fail_fatally(e);
            return;
        }

        self.log.install_snapshot(SnapshotRecord {
            index,
            term,
            members,
            chunks,
        });
        self.applied_since_snapshot = 0;
        tracing::info!(
            node_id = %self.endpoint.id,
            snapshot_index = index,
            chunks = chunk_count,
            "took local snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use crate::machine::KvOperation;
    use crate::model::message::{AppendEntriesRequest, MessageHeader, RaftMessage};
    use crate::model::{EntryOperation, LogEntry, Role};
    use crate::node::test_support::*;

    fn append_request(
        term: u64,
        leader: &str,
        previous: (u64, u64),
        entries: Vec<LogEntry>,
        commit: u64,
    ) -> AppendEntriesRequest {
        AppendEntriesRequest {
            header: MessageHeader {
                group_id: "group-1".to_string(),
                sender: leader.to_string(),
                term,
            },
            previous_log_index: previous.0,
            previous_log_term: previous.1,
            entries,
            leader_commit_index: commit,
            query_seq_no: 0,
            flow_control_seq_no: 1,
        }
    }

    #[test]
    fn test_follower_accepts_and_acknowledges_appends() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n2", &["n1", "n2", "n3"], now);

        let entries = vec![
            LogEntry::new(1, 1, EntryOperation::Noop),
            LogEntry::new(
                2,
                1,
                EntryOperation::Apply(KvOperation::put("k", b"v".to_vec()).encode()),
            ),
        ];
        node.handle_message(RaftMessage::AppendEntriesRequest(append_request(
            1,
            "n1",
            (0, 0),
            entries,
            0,
        )));

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.term(), 1);
        match &outbox.lock().last().unwrap().1 {
            RaftMessage::AppendEntriesSuccessResponse(r) => {
                assert_eq!(r.last_log_index, 2);
                assert_eq!(r.flow_control_seq_no, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        };
    }

    #[test]
    fn test_follower_rejects_append_with_missing_previous() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n2", &["n1", "n2", "n3"], now);

        let request = append_request(
            1,
            "n1",
            (5, 1),
            vec![LogEntry::new(6, 1, EntryOperation::Noop)],
            0,
        );
        node.handle_message(RaftMessage::AppendEntriesRequest(request));

        match &outbox.lock().last().unwrap().1 {
            RaftMessage::AppendEntriesFailureResponse(r) => {
                assert_eq!(r.expected_next_index, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        };
    }

    #[test]
    fn test_follower_truncates_conflicting_tail() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n2", &["n1", "n2", "n3"], now);

        // term-1 leader replicates two entries, none committed
        node.handle_message(RaftMessage::AppendEntriesRequest(append_request(
            1,
            "n1",
            (0, 0),
            vec![
                LogEntry::new(1, 1, EntryOperation::Noop),
                LogEntry::new(2, 1, EntryOperation::Noop),
            ],
            0,
        )));

        // term-2 leader overwrites index 2
        node.handle_message(RaftMessage::AppendEntriesRequest(append_request(
            2,
            "n3",
            (1, 1),
            vec![LogEntry::new(2, 2, EntryOperation::Noop)],
            0,
        )));

        match &outbox.lock().last().unwrap().1 {
            RaftMessage::AppendEntriesSuccessResponse(r) => {
                assert_eq!(r.last_log_index, 2);
                assert_eq!(r.header.term, 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(node.term(), 2);
    }

    #[test]
    fn test_follower_applies_committed_entries() {
        let now = Instant::now();
        let (mut node, _outbox) = build_node("n2", &["n1", "n2", "n3"], now);

        node.handle_message(RaftMessage::AppendEntriesRequest(append_request(
            1,
            "n1",
            (0, 0),
            vec![
                LogEntry::new(1, 1, EntryOperation::Noop),
                LogEntry::new(
                    2,
                    1,
                    EntryOperation::Apply(KvOperation::put("k", b"v".to_vec()).encode()),
                ),
            ],
            2,
        )));

        assert_eq!(node.commit_index(), 2);
        let report = node.report();
        assert_eq!(report.log.last_applied, 2);
    }

    #[test]
    fn test_leader_replicates_and_commits_on_majority() {
        let now = Instant::now();
        let (mut node, outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        // win the election
        node.tick(now + Duration::from_secs(1));
        assert_eq!(node.role(), Role::Candidate);
        let term = node.term();
        grant_vote(&mut node, "n2", term);
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.commit_index(), 0); // noop not yet acknowledged

        // follower n2 acknowledges the noop
        acknowledge(&mut node, "n2", term, 1);
        assert_eq!(node.commit_index(), 1);

        // submit an operation; commits once one follower acknowledges
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        node.submit(KvOperation::put("k", b"v".to_vec()).encode(), tx);
        assert_eq!(node.commit_index(), 1);
        acknowledge(&mut node, "n3", term, 2);
        assert_eq!(node.commit_index(), 2);

        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome.commit_index, 2);

        let appends = outbox
            .lock()
            .iter()
            .filter(|(_, m)| matches!(m, RaftMessage::AppendEntriesRequest(_)))
            .count();
        assert!(appends >= 2);
    }

    #[test]
    fn test_stale_flow_control_response_dropped() {
        let now = Instant::now();
        let (mut node, _outbox) = build_node("n1", &["n1", "n2", "n3"], now);

        node.tick(now + Duration::from_secs(1));
        let term = node.term();
        grant_vote(&mut node, "n2", term);
        acknowledge_with_flow(&mut node, "n2", term, 1, 5);
        assert_eq!(node.commit_index(), 1);

        // a reordered older response must not regress anything
        acknowledge_with_flow(&mut node, "n2", term, 0, 2);
        assert_eq!(node.commit_index(), 1);
    }

    pub(super) fn grant_vote(node: &mut crate::node::RaftNode, from: &str, term: u64) {
        node.handle_message(RaftMessage::VoteResponse(
            crate::model::message::VoteResponse {
                header: MessageHeader {
                    group_id: "group-1".to_string(),
                    sender: from.to_string(),
                    term,
                },
                granted: true,
            },
        ));
    }

    pub(super) fn acknowledge(
        node: &mut crate::node::RaftNode,
        from: &str,
        term: u64,
        last_log_index: u64,
    ) {
        acknowledge_with_flow(node, from, term, last_log_index, u64::MAX / 2);
    }

    fn acknowledge_with_flow(
        node: &mut crate::node::RaftNode,
        from: &str,
        term: u64,
        last_log_index: u64,
        flow: u64,
    ) {
        node.handle_message(RaftMessage::AppendEntriesSuccessResponse(
            crate::model::message::AppendEntriesSuccessResponse {
                header: MessageHeader {
                    group_id: "group-1".to_string(),
                    sender: from.to_string(),
                    term,
                },
                last_log_index,
                query_seq_no: 0,
                flow_control_seq_no: flow,
            },
        ));
    }

    #[test]
    fn test_submit_on_follower_fails_not_leader() {
        let now = Instant::now();
        let (mut node, _outbox) = build_node("n2", &["n1", "n2", "n3"], now);

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        node.submit(Bytes::from_static(b"x"), tx);
        match rx.try_recv().unwrap() {
            Err(crate::error::RaftError::NotLeader { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
