// Query execution policies.
//
// Linearizable reads ride a read-barrier heartbeat: the leader stamps a
// fresh sequence number on its appends, and executes the read once a
// majority of voters echoed it and the commit index reached the leader's
// log index at request time. Leader-local reads skip the barrier;
// eventually-consistent reads run on any member once its commit index
// reaches the caller's floor, with a bounded wait.

use bytes::Bytes;

use tokio::sync::oneshot;

use crate::error::{RaftError, Result};
use crate::model::{CommitResult, NodeStatus, QueryPolicy, Role};
use crate::node::{PendingQuery, RaftNode, WaitingRead};

impl RaftNode {
    /// Run a read-only operation under the given consistency policy.
    pub fn query(
        &mut self,
        operation: Bytes,
        policy: QueryPolicy,
        completion: oneshot::Sender<Result<CommitResult>>,
    ) {
        if self.status == NodeStatus::Terminated {
            let _ = completion.send(Err(RaftError::CannotReplicate(
                "node is terminated".to_string(),
            )));
            return;
        }

        match policy {
            QueryPolicy::LeaderLocal => {
                if self.role != Role::Leader {
                    let _ = completion.send(Err(self.not_leader_error()));
                    return;
                }
                let result = self.run_read(&operation, self.commit_index);
                let _ = completion.send(result);
            }
            QueryPolicy::Linearizable => self.linearizable_query(operation, completion),
            QueryPolicy::EventualConsistency { min_commit_index } => {
                if self.commit_index >= min_commit_index {
                    let result = self.run_read(&operation, self.commit_index);
                    let _ = completion.send(result);
                } else {
                    self.waiting_reads.push(WaitingRead {
                        min_commit_index,
                        deadline: self.now + self.config.leader_heartbeat_timeout,
                        operation,
                        completion,
                    });
                }
            }
        }
    }

    fn linearizable_query(
        &mut self,
        operation: Bytes,
        completion: oneshot::Sender<Result<CommitResult>>,
    ) {
        if self.role != Role::Leader {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        }
        let barrier_index = self.log.last_index();
        let Some(leader) = self.leader.as_mut() else {
            let _ = completion.send(Err(self.not_leader_error()));
            return;
        };
        if leader.pending_queries.len() >= self.config.max_pending_log_entry_count {
            let _ = completion.send(Err(RaftError::CannotReplicate(
                "pending query registry is full".to_string(),
            )));
            return;
        }

        leader.query_seq_no += 1;
        let seq_no = leader.query_seq_no;
        leader.pending_queries.push(PendingQuery {
            seq_no,
            barrier_index,
            operation,
            completion,
        });
        tracing::debug!(
            node_id = %self.endpoint.id,
            query_seq_no = seq_no,
            barrier_index = barrier_index,
            "read barrier issued"
        );

        // the barrier heartbeat carries the new sequence number
        self.broadcast_append_entries();
        self.serve_pending_queries();
    }

    /// Complete every pending linearizable query whose barrier holds: a
    /// majority of voters acknowledged its sequence number and the commit
    /// index reached its barrier index.
    pub(crate) fn serve_pending_queries(&mut self) {
        let Some(leader) = self.leader.as_ref() else {
            return;
        };
        if leader.pending_queries.is_empty() {
            return;
        }

        let majority = self.effective_members.majority();
        let commit_index = self.commit_index;
        let own_votes = usize::from(self.effective_members.is_voting(&self.endpoint.id));

        let ready_seq: Vec<u64> = leader
            .pending_queries
            .iter()
            .filter(|query| {
                if commit_index < query.barrier_index {
                    return false;
                }
                let acked = own_votes
                    + leader
                        .followers
                        .iter()
                        .filter(|(id, progress)| {
                            self.effective_members.is_voting(id)
                                && progress.query_seq_acked >= query.seq_no
                        })
                        .count();
                acked >= majority
            })
            .map(|query| query.seq_no)
            .collect();
        if ready_seq.is_empty() {
            return;
        }

        let Some(leader) = self.leader.as_mut() else {
            return;
        };
        let (ready, rest): (Vec<PendingQuery>, Vec<PendingQuery>) =
            std::mem::take(&mut leader.pending_queries)
                .into_iter()
                .partition(|query| ready_seq.contains(&query.seq_no));
        leader.pending_queries = rest;

        for query in ready {
            let result = self.run_read(&query.operation, self.commit_index);
            let _ = query.completion.send(result);
        }
    }

    /// Serve parked eventually-consistent reads whose commit floor has
    /// been reached.
    pub(crate) fn serve_waiting_reads(&mut self) {
        if self.waiting_reads.is_empty() {
            return;
        }
        let commit_index = self.commit_index;
        let ready: Vec<WaitingRead> = {
            let (ready, rest) = std::mem::take(&mut self.waiting_reads)
                .into_iter()
                .partition(|read| commit_index >= read.min_commit_index);
            self.waiting_reads = rest;
            ready
        };
        for read in ready {
            let result = self.run_read(&read.operation, self.commit_index);
            let _ = read.completion.send(result);
        }
    }

    /// Fail parked reads whose bounded wait expired.
    pub(crate) fn expire_waiting_reads(&mut self) {
        if self.waiting_reads.is_empty() {
            return;
        }
        let now = self.now;
        let (expired, rest): (Vec<WaitingRead>, Vec<WaitingRead>) =
            std::mem::take(&mut self.waiting_reads)
                .into_iter()
                .partition(|read| now >= read.deadline);
        self.waiting_reads = rest;
        for read in expired {
            let _ = read.completion.send(Err(RaftError::Timeout(format!(
                "commit index did not reach {} in time",
                read.min_commit_index
            ))));
        }
    }

    fn run_read(&self, operation: &Bytes, commit_index: u64) -> Result<CommitResult> {
        self.machine
            .run_operation(operation)
            .map(|response| CommitResult {
                commit_index,
                response,
            })
    }
}
