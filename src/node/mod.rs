// The Raft node engine.
//
// A single-threaded cooperative actor: every state transition - an
// inbound message, a timer tick, a client request, an apply step - runs
// to completion on the node's own timeline. Callers on other threads
// reach it through the group runtime's mailbox; the engine itself holds
// no locks. Store flushes may block the current event but never
// interleave with another one.
//
// Submodules split the protocol surface: elections and leadership
// transfer, log replication and snapshots, membership changes, queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;

use crate::common::{Endpoint, GroupId, NodeId};
use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::{RaftLog, SnapshotRecord};
use crate::machine::StateMachine;
use crate::model::message::{MessageHeader, RaftMessage};
use crate::model::{
    CommitResult, EntryOperation, GroupMembers, LogEntry, LogIndex, NodeStatus, RaftLogStats,
    RaftNodeReport, Role, SnapshotChunk, Term,
};
use crate::runtime::Transport;
use crate::store::{PersistentStore, RestoredState};

mod election;
mod membership;
mod query;
mod replication;

/// Replication bookkeeping the leader keeps per follower.
struct FollowerProgress {
    /// Next log index to send
    next_index: LogIndex,

    /// Highest log index known replicated on the follower
    match_index: LogIndex,

    /// Monotonic sequence number stamped on each outbound request
    flow_seq_sent: u64,

    /// Highest sequence number echoed back; responses below it are stale
    flow_seq_acked: u64,

    /// Highest read-barrier sequence number the follower confirmed
    query_seq_acked: u64,

    /// Set while a snapshot transfer is outstanding, to avoid overlap
    snapshot_inflight_since: Option<Instant>,

    /// Last time any response arrived from the follower
    last_response_at: Instant,
}

impl FollowerProgress {
    fn new(next_index: LogIndex, now: Instant) -> Self {
        Self {
            next_index,
            match_index: 0,
            flow_seq_sent: 0,
            flow_seq_acked: 0,
            query_seq_acked: 0,
            snapshot_inflight_since: None,
            last_response_at: now,
        }
    }
}

struct CandidateState {
    /// Voting members that granted this candidacy
    granted: HashSet<NodeId>,
}

struct PendingQuery {
    seq_no: u64,
    /// Leader log index at request time; execution waits for the commit
    /// index to reach it
    barrier_index: LogIndex,
    operation: Bytes,
    completion: oneshot::Sender<Result<CommitResult>>,
}

struct TransferState {
    target: NodeId,
    completion: oneshot::Sender<Result<()>>,
}

struct LeaderState {
    followers: HashMap<NodeId, FollowerProgress>,
    /// Last issued read-barrier sequence number
    query_seq_no: u64,
    pending_queries: Vec<PendingQuery>,
    transfer: Option<TransferState>,
    next_heartbeat_at: Instant,
}

/// Snapshot transfer being collected on a follower.
struct IncomingSnapshot {
    index: LogIndex,
    term: Term,
    chunk_count: u32,
    members: GroupMembers,
    chunks: BTreeMap<u32, SnapshotChunk>,
}

/// Client future owned by the node until completed or failed.
enum PendingCompletion {
    Operation(oneshot::Sender<Result<CommitResult>>),
    Membership(oneshot::Sender<Result<GroupMembers>>),
    Terminate(oneshot::Sender<Result<LogIndex>>),
}

/// Eventually-consistent read parked until the commit index catches up.
struct WaitingRead {
    min_commit_index: LogIndex,
    deadline: Instant,
    operation: Bytes,
    completion: oneshot::Sender<Result<CommitResult>>,
}

/// The consensus engine for one member of one Raft group.
pub struct RaftNode {
    group_id: GroupId,
    endpoint: Endpoint,
    config: RaftConfig,

    store: Box<dyn PersistentStore>,
    machine: Box<dyn StateMachine>,
    transport: Box<dyn Transport>,

    status: NodeStatus,
    role: Role,
    current_term: Term,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    log: RaftLog,
    committed_members: GroupMembers,
    effective_members: GroupMembers,
    /// Index of an appended but uncommitted terminate entry
    terminate_index: Option<LogIndex>,

    now: Instant,
    election_deadline: Instant,
    last_leader_contact: Option<Instant>,
    rng: StdRng,

    candidate: Option<CandidateState>,
    leader: Option<LeaderState>,
    incoming_snapshot: Option<IncomingSnapshot>,

    pending: BTreeMap<LogIndex, PendingCompletion>,
    waiting_reads: Vec<WaitingRead>,
    applied_since_snapshot: u64,
}

/// Builds a [`RaftNode`] from explicit configuration and collaborators;
/// no process-wide state is consulted.
pub struct NodeBuilder {
    group_id: GroupId,
    endpoint: Endpoint,
    initial_members: Vec<Endpoint>,
    restored: Option<RestoredState>,
    config: RaftConfig,
    store: Option<Box<dyn PersistentStore>>,
    machine: Option<Box<dyn StateMachine>>,
    transport: Option<Box<dyn Transport>>,
    rng_seed: Option<u64>,
}

impl NodeBuilder {
    pub fn new(group_id: impl Into<GroupId>, endpoint: Endpoint) -> Self {
        Self {
            group_id: group_id.into(),
            endpoint,
            initial_members: Vec::new(),
            restored: None,
            config: RaftConfig::default(),
            store: None,
            machine: None,
            transport: None,
            rng_seed: None,
        }
    }

    /// Bootstrap membership for a brand-new group.
    pub fn initial_members(mut self, members: Vec<Endpoint>) -> Self {
        self.initial_members = members;
        self
    }

    /// Restart from state read back from the store.
    pub fn restored(mut self, state: RestoredState) -> Self {
        self.restored = Some(state);
        self
    }

    pub fn config(mut self, config: RaftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: impl PersistentStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn machine(mut self, machine: impl StateMachine + 'static) -> Self {
        self.machine = Some(Box::new(machine));
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Pin the election timeout randomness, for reproducible tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self, now: Instant) -> Result<RaftNode> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| RaftError::InvalidArgument("store is required".to_string()))?;
        let machine = self
            .machine
            .ok_or_else(|| RaftError::InvalidArgument("state machine is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| RaftError::InvalidArgument("transport is required".to_string()))?;

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut node = RaftNode {
            group_id: self.group_id,
            endpoint: self.endpoint,
            config: self.config,
            store,
            machine,
            transport,
            status: NodeStatus::Initial,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            log: RaftLog::new(),
            committed_members: GroupMembers::bootstrap(Vec::new()),
            effective_members: GroupMembers::bootstrap(Vec::new()),
            terminate_index: None,
            now,
            election_deadline: now,
            last_leader_contact: None,
            rng,
            candidate: None,
            leader: None,
            incoming_snapshot: None,
            pending: BTreeMap::new(),
            waiting_reads: Vec::new(),
            applied_since_snapshot: 0,
        };

        match self.restored {
            Some(restored) => node.initialize_restored(restored)?,
            None => node.initialize_bootstrap(self.initial_members)?,
        }

        node.reset_election_deadline();
        tracing::info!(
            group_id = %node.group_id,
            node_id = %node.endpoint.id,
            term = node.current_term,
            role = ?node.role,
            "raft node started"
        );
        Ok(node)
    }
}

impl RaftNode {
    fn initialize_bootstrap(&mut self, initial: Vec<Endpoint>) -> Result<()> {
        if initial.is_empty() {
            return Err(RaftError::InvalidArgument(
                "bootstrap requires initial members".to_string(),
            ));
        }
        let members = GroupMembers::bootstrap(initial);
        if !members.contains(&self.endpoint.id) {
            return Err(RaftError::InvalidArgument(format!(
                "{} is not among the initial members",
                self.endpoint.id
            )));
        }

        self.store.open()?;
        self.store
            .persist_initial_members(&self.endpoint, &members)?;
        self.store.persist_term(0, None)?;
        self.store.flush()?;

        self.committed_members = members.clone();
        self.effective_members = members;
        self.role = self.follower_role();
        self.status = NodeStatus::Active;
        Ok(())
    }

    fn initialize_restored(&mut self, restored: RestoredState) -> Result<()> {
        if restored.local_endpoint.id != self.endpoint.id {
            return Err(RaftError::InvalidArgument(format!(
                "store belongs to {}, not {}",
                restored.local_endpoint.id, self.endpoint.id
            )));
        }

        self.store.open()?;
        self.current_term = restored.term;
        self.voted_for = restored.voted_for;

        let snapshot_record = restored.snapshot.map(|s| SnapshotRecord {
            index: s.index,
            term: s.term,
            members: s.members,
            chunks: s.chunks,
        });

        if let Some(record) = &snapshot_record {
            let payloads: Vec<Bytes> =
                record.chunks.iter().map(|c| c.payload.clone()).collect();
            self.machine.install_snapshot(record.index, &payloads)?;
            self.commit_index = record.index;
            self.last_applied = record.index;
            self.committed_members = record.members.clone();
        } else {
            self.committed_members = restored.initial_members.clone();
        }
        self.effective_members = self.committed_members.clone();

        self.log = RaftLog::restored(snapshot_record, restored.entries)?;

        // Recover membership views from the restored tail. A membership
        // entry can only have been appended once every earlier one was
        // committed, so all but the newest are committed views.
        let mut terminating = None;
        let mut memberships: Vec<GroupMembers> = Vec::new();
        for index in self.log.first_index()..=self.log.last_index() {
            if let Some(entry) = self.log.get(index) {
                match &entry.operation {
                    EntryOperation::MembershipChange(m) => memberships.push(m.clone()),
                    EntryOperation::TerminateGroup => terminating = Some(entry.index),
                    _ => {}
                }
            }
        }
        if let Some(newest) = memberships.pop() {
            if let Some(previous) = memberships.pop() {
                self.committed_members = previous;
            }
            self.effective_members = newest;
        }

        self.terminate_index = terminating;
        self.status = if terminating.is_some() {
            NodeStatus::TerminatingGroup
        } else if self.effective_members.log_index > self.committed_members.log_index {
            NodeStatus::UpdatingMembership
        } else {
            NodeStatus::Active
        };
        self.role = self.follower_role();
        Ok(())
    }

    // --- accessors -----------------------------------------------------

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> Term {
        self.current_term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn leader_endpoint(&self) -> Option<Endpoint> {
        self.leader_id
            .as_ref()
            .and_then(|id| self.effective_members.endpoint(id))
            .cloned()
    }

    pub fn is_terminated(&self) -> bool {
        self.status == NodeStatus::Terminated
    }

    /// Point-in-time view of the node for admin and observer surfaces.
    pub fn report(&self) -> RaftNodeReport {
        RaftNodeReport {
            group_id: self.group_id.clone(),
            endpoint: self.endpoint.clone(),
            status: self.status,
            role: self.role,
            term: self.current_term,
            leader: self.leader_endpoint(),
            committed_members: self.committed_members.clone(),
            effective_members: self.effective_members.clone(),
            log: RaftLogStats {
                first_index: self.log.first_index(),
                last_index: self.log.last_index(),
                commit_index: self.commit_index,
                last_applied: self.last_applied,
                snapshot_index: self.log.snapshot_index(),
                snapshot_term: self.log.snapshot().map(|s| s.term).unwrap_or(0),
            },
        }
    }

    // --- event entry points --------------------------------------------

    /// Periodic timer pulse. Drives election deadlines, leader
    /// heartbeats, the leader's quorum-contact check and bounded waits.
    pub fn tick(&mut self, now: Instant) {
        if self.status == NodeStatus::Terminated {
            return;
        }
        self.now = now;
        self.expire_waiting_reads();

        match self.role {
            Role::Leader => self.leader_tick(),
            Role::Follower | Role::Candidate => {
                if now >= self.election_deadline {
                    self.start_election(false);
                }
            }
            Role::Learner => {
                // learners never stand for election
                if now >= self.election_deadline {
                    self.reset_election_deadline();
                }
            }
        }
    }

    /// Inbound protocol message from the transport.
    pub fn handle_message(&mut self, message: RaftMessage) {
        if self.status == NodeStatus::Terminated {
            return;
        }
        let header = message.header();
        if header.group_id != self.group_id {
            tracing::warn!(
                group_id = %self.group_id,
                foreign = %header.group_id,
                "dropping message for a foreign group"
            );
            return;
        }
        if header.term > self.current_term {
            if self.adopt_term(header.term).is_none() {
                return;
            }
        }

        match message {
            RaftMessage::VoteRequest(m) => self.handle_vote_request(m),
            RaftMessage::VoteResponse(m) => self.handle_vote_response(m),
            RaftMessage::AppendEntriesRequest(m) => self.handle_append_entries(m),
            RaftMessage::AppendEntriesSuccessResponse(m) => self.handle_append_success(m),
            RaftMessage::AppendEntriesFailureResponse(m) => self.handle_append_failure(m),
            RaftMessage::InstallSnapshotRequest(m) => self.handle_install_snapshot(m),
            RaftMessage::InstallSnapshotResponse(m) => self.handle_snapshot_response(m),
            RaftMessage::TriggerLeaderElectionRequest(m) => self.handle_trigger_election(m),
        }
    }

    /// Replicate an operation through the log. The completion fires with
    /// the commit index and the state machine response once the entry
    /// commits and applies.
    pub fn submit(&mut self, operation: Bytes, completion: oneshot::Sender<Result<CommitResult>>) {
        if self.role != Role::Leader {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        }
        if let Err(e) = self.check_can_append() {
            let _ = completion.send(Err(e));
            return;
        }

        match self.leader_append(EntryOperation::Apply(operation)) {
            Ok(index) => {
                self.pending
                    .insert(index, PendingCompletion::Operation(completion));
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

    /// Append a terminate marker. Once it commits, every node of the
    /// group applies it and moves to `Terminated`.
    pub fn terminate_group(&mut self, completion: oneshot::Sender<Result<LogIndex>>) {
        if self.role != Role::Leader {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        }
        if let Err(e) = self.check_can_append() {
            let _ = completion.send(Err(e));
            return;
        }

        match self.leader_append(EntryOperation::TerminateGroup) {
            Ok(index) => {
                self.status = NodeStatus::TerminatingGroup;
                self.terminate_index = Some(index);
                self.pending
                    .insert(index, PendingCompletion::Terminate(completion));
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

    /// Local shutdown: the node stops serving and fails its pending
    /// requests. The group itself keeps running elsewhere.
    pub fn shutdown(&mut self) {
        if self.status == NodeStatus::Terminated {
            return;
        }
        tracing::info!(node_id = %self.endpoint.id, "raft node shutting down");
        self.status = NodeStatus::Terminated;
        self.fail_everything(|| RaftError::CannotReplicate("node shut down".to_string()));
    }

    // --- shared internals ----------------------------------------------

    fn header(&self) -> MessageHeader {
        MessageHeader {
            group_id: self.group_id.clone(),
            sender: self.endpoint.id.clone(),
            term: self.current_term,
        }
    }

    fn follower_role(&self) -> Role {
        if self.effective_members.is_voting(&self.endpoint.id) {
            Role::Follower
        } else {
            Role::Learner
        }
    }

    fn not_leader_error(&self) -> RaftError {
        RaftError::NotLeader {
            leader: self.leader_endpoint(),
        }
    }

    fn check_can_append(&self) -> Result<()> {
        match self.status {
            NodeStatus::Active | NodeStatus::UpdatingMembership => {}
            NodeStatus::Initial | NodeStatus::TerminatingGroup | NodeStatus::Terminated => {
                return Err(RaftError::CannotReplicate(format!(
                    "node status is {:?}",
                    self.status
                )));
            }
        }
        if self.pending.len() >= self.config.max_pending_log_entry_count {
            return Err(RaftError::CannotReplicate(
                "pending request registry is full".to_string(),
            ));
        }
        let uncommitted = self.log.last_index().saturating_sub(self.commit_index);
        if uncommitted >= self.config.max_uncommitted_log_entry_count {
            return Err(RaftError::CannotReplicate(
                "uncommitted log tail is at capacity".to_string(),
            ));
        }
        Ok(())
    }

    /// Append an entry to the leader's own log and make it durable.
    fn leader_append(&mut self, operation: EntryOperation) -> Result<LogIndex> {
        let index = self.log.last_index() + 1;
        let entry = LogEntry::new(index, self.current_term, operation);
        self.log.append(vec![entry.clone()])?;
        self.store.persist_log_entry(&entry)?;
        self.store.flush()?;
        Ok(index)
    }

    fn send_to_id(&mut self, id: &NodeId, message: RaftMessage) {
        let target = self
            .effective_members
            .endpoint(id)
            .or_else(|| self.committed_members.endpoint(id))
            .cloned();
        match target {
            Some(endpoint) => self.transport.send(&endpoint, message),
            None => tracing::warn!(
                node_id = %self.endpoint.id,
                target = %id,
                "no endpoint known for message target"
            ),
        }
    }

    fn random_election_timeout(&mut self) -> std::time::Duration {
        let min = self.config.leader_election_timeout_min.as_millis() as u64;
        let max = self.config.leader_election_timeout_max.as_millis() as u64;
        std::time::Duration::from_millis(self.rng.random_range(min..=max))
    }

    fn reset_election_deadline(&mut self) {
        let timeout = self.random_election_timeout();
        self.election_deadline = self.now + timeout;
    }

    fn heard_from_leader_recently(&self) -> bool {
        match self.last_leader_contact {
            Some(at) => {
                self.now.saturating_duration_since(at) < self.config.leader_heartbeat_timeout
            }
            None => false,
        }
    }

    /// Move to the higher term discovered on a message. Returns `None`
    /// when the durable term write failed and the node went fatal.
    fn adopt_term(&mut self, term: Term) -> Option<()> {
        debug_assert!(term > self.current_term);
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        if let Err(e) = self
            .store
            .persist_term(term, None)
            .and_then(|_| self.store.flush())
        {
            self.fail_fatally(e);
            return None;
        }
        if self.role == Role::Leader {
            tracing::info!(
                node_id = %self.endpoint.id,
                term = term,
                "observed higher term, stepping down"
            );
            self.step_down_from_leadership();
        } else {
            self.candidate = None;
            self.role = self.follower_role();
        }
        Some(())
    }

    /// Leave leadership: cancel leader-only work and demote. Pending
    /// replications were appended but their outcome is unknown.
    fn step_down_from_leadership(&mut self) {
        if let Some(leader) = self.leader.take() {
            for query in leader.pending_queries {
                let _ = query.completion.send(Err(self.not_leader_error()));
            }
            if let Some(transfer) = leader.transfer {
                let _ = transfer.completion.send(Err(self.not_leader_error()));
            }
        }
        for (_, completion) in std::mem::take(&mut self.pending) {
            let error = RaftError::IndeterminateState(
                "leadership lost before the commit outcome was known".to_string(),
            );
            match completion {
                PendingCompletion::Operation(tx) => {
                    let _ = tx.send(Err(error));
                }
                PendingCompletion::Membership(tx) => {
                    let _ = tx.send(Err(error));
                }
                PendingCompletion::Terminate(tx) => {
                    let _ = tx.send(Err(error));
                }
            }
        }
        self.candidate = None;
        self.role = self.follower_role();
        self.reset_election_deadline();
    }

    /// Durable storage failed: the node is done. Every pending future
    /// fails with a store error.
    fn fail_fatally(&mut self, error: RaftError) {
        tracing::error!(
            node_id = %self.endpoint.id,
            error = %error,
            "fatal persistence failure, terminating node"
        );
        self.status = NodeStatus::Terminated;
        let message = error.to_string();
        self.fail_everything(|| RaftError::StoreError(message.clone()));
        self.role = Role::Follower;
    }

    fn fail_everything(&mut self, make_error: impl Fn() -> RaftError) {
        if let Some(leader) = self.leader.take() {
            for query in leader.pending_queries {
                let _ = query.completion.send(Err(make_error()));
            }
            if let Some(transfer) = leader.transfer {
                let _ = transfer.completion.send(Err(make_error()));
            }
        }
        for (_, completion) in std::mem::take(&mut self.pending) {
            match completion {
                PendingCompletion::Operation(tx) => {
                    let _ = tx.send(Err(make_error()));
                }
                PendingCompletion::Membership(tx) => {
                    let _ = tx.send(Err(make_error()));
                }
                PendingCompletion::Terminate(tx) => {
                    let _ = tx.send(Err(make_error()));
                }
            }
        }
        for read in std::mem::take(&mut self.waiting_reads) {
            let _ = read.completion.send(Err(make_error()));
        }
        self.candidate = None;
    }

    // --- apply ---------------------------------------------------------

    /// Apply every committed entry in strict index order, then run the
    /// bookkeeping that depends on the new applied state.
    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let entry = match self.log.get(index) {
                Some(entry) => entry.clone(),
                None => {
                    self.fail_fatally(RaftError::Internal(format!(
                        "committed entry {index} missing from the log window"
                    )));
                    return;
                }
            };

            match entry.operation {
                EntryOperation::Noop | EntryOperation::NewTerm => {}
                EntryOperation::Apply(ref payload) => match self.machine.apply(index, payload) {
                    Ok(response) => {
                        if let Some(PendingCompletion::Operation(tx)) = self.pending.remove(&index)
                        {
                            let _ = tx.send(Ok(CommitResult {
                                commit_index: index,
                                response,
                            }));
                        }
                    }
                    Err(e) => {
                        self.fail_fatally(e);
                        return;
                    }
                },
                EntryOperation::MembershipChange(ref members) => {
                    self.commit_membership_entry(index, members.clone());
                }
                EntryOperation::TerminateGroup => {
                    self.last_applied = index;
                    self.finish_termination(index);
                    return;
                }
            }

            self.last_applied = index;
            self.applied_since_snapshot += 1;
        }

        self.maybe_take_local_snapshot();
        self.serve_waiting_reads();
        if self.role == Role::Leader {
            self.serve_pending_queries();
        }
    }

    fn finish_termination(&mut self, index: LogIndex) {
        tracing::info!(
            node_id = %self.endpoint.id,
            commit_index = index,
            "terminate entry committed, group is done"
        );
        if self.role == Role::Leader {
            // let followers learn the final commit index before this
            // node goes silent
            self.broadcast_append_entries();
        }
        self.status = NodeStatus::Terminated;
        self.terminate_index = None;
        if let Some(PendingCompletion::Terminate(tx)) = self.pending.remove(&index) {
            let _ = tx.send(Ok(index));
        }
        self.fail_everything(|| RaftError::CannotReplicate("group terminated".to_string()));
    }
}
