// Group runtime: the actor shell around a Raft node.
//
// The runtime owns the node, its mailbox, the timer pulse and the report
// publisher. Every event - inbound message, client request, tick - runs
// on the node's single timeline inside one spawned task; callers talk to
// it through the cloneable handle and await oneshot completions.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::common::{Endpoint, NodeId};
use crate::error::{RaftError, Result};
use crate::model::message::RaftMessage;
use crate::model::{CommitResult, GroupMembers, LogIndex, MembershipChange, QueryPolicy, RaftNodeReport};
use crate::node::{NodeBuilder, RaftNode};

pub mod transport;

pub use transport::{InMemoryNetwork, InMemoryTransport, Transport};

/// Mailbox capacity of a group runtime.
const MAILBOX_CAPACITY: usize = 1024;

/// One unit of work on the node's serial timeline.
pub enum NodeEvent {
    /// Inbound protocol message pushed by the transport
    Message(RaftMessage),

    /// Replicate an operation
    Submit {
        operation: Bytes,
        completion: oneshot::Sender<Result<CommitResult>>,
    },

    /// Run a read-only operation
    Query {
        operation: Bytes,
        policy: QueryPolicy,
        completion: oneshot::Sender<Result<CommitResult>>,
    },

    /// Apply a single-server membership change
    ChangeMembership {
        change: MembershipChange,
        expected_group_members_commit_index: LogIndex,
        completion: oneshot::Sender<Result<GroupMembers>>,
    },

    /// Hand leadership to another member
    TransferLeadership {
        target: NodeId,
        completion: oneshot::Sender<Result<()>>,
    },

    /// Replicate a terminate marker for the whole group
    TerminateGroup {
        completion: oneshot::Sender<Result<LogIndex>>,
    },

    /// Ask for a point-in-time node report
    Report {
        completion: oneshot::Sender<RaftNodeReport>,
    },

    /// Stop this node locally
    Shutdown,
}

/// Spawns group runtimes.
pub struct RaftGroup;

impl RaftGroup {
    /// Build the node and run it inside a dedicated task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(builder: NodeBuilder) -> Result<RaftGroupHandle> {
        let node = builder.build(Instant::now())?;
        let endpoint = node.endpoint().clone();
        let tick_period = node.config().tick_period();
        let report_period = node.config().report_publish_period;

        let (event_tx, event_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (report_tx, report_rx) = watch::channel(node.report());

        tokio::spawn(run_node(node, event_rx, report_tx, tick_period, report_period));

        Ok(RaftGroupHandle {
            events: event_tx,
            reports: report_rx,
            endpoint,
        })
    }
}

async fn run_node(
    mut node: RaftNode,
    mut events: mpsc::Receiver<NodeEvent>,
    reports: watch::Sender<RaftNodeReport>,
    tick_period: std::time::Duration,
    report_period: std::time::Duration,
) {
    let mut tick = time::interval(tick_period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = time::interval(report_period);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                node.tick(Instant::now());
            }
            _ = report.tick() => {
                let _ = reports.send(node.report());
            }
            event = events.recv() => {
                match event {
                    None | Some(NodeEvent::Shutdown) => {
                        node.shutdown();
                        let _ = reports.send(node.report());
                        break;
                    }
                    Some(event) => dispatch_event(&mut node, event),
                }
            }
        }

        if node.is_terminated() {
            let _ = reports.send(node.report());
            break;
        }
    }
    tracing::debug!(node_id = %node.endpoint().id, "group runtime stopped");
}

fn dispatch_event(node: &mut RaftNode, event: NodeEvent) {
    match event {
        NodeEvent::Message(message) => node.handle_message(message),
        NodeEvent::Submit {
            operation,
            completion,
        } => node.submit(operation, completion),
        NodeEvent::Query {
            operation,
            policy,
            completion,
        } => node.query(operation, policy, completion),
        NodeEvent::ChangeMembership {
            change,
            expected_group_members_commit_index,
            completion,
        } => node.change_membership(change, expected_group_members_commit_index, completion),
        NodeEvent::TransferLeadership { target, completion } => {
            node.transfer_leadership(target, completion)
        }
        NodeEvent::TerminateGroup { completion } => node.terminate_group(completion),
        NodeEvent::Report { completion } => {
            let _ = completion.send(node.report());
        }
        NodeEvent::Shutdown => unreachable!("handled in the event loop"),
    }
}

/// Client-side handle to a running group member.
#[derive(Clone)]
pub struct RaftGroupHandle {
    events: mpsc::Sender<NodeEvent>,
    reports: watch::Receiver<RaftNodeReport>,
    endpoint: Endpoint,
}

impl RaftGroupHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Mailbox sender for transports to push inbound messages into.
    pub fn mailbox(&self) -> mpsc::Sender<NodeEvent> {
        self.events.clone()
    }

    /// Receiver of the periodically published node reports.
    pub fn watch_reports(&self) -> watch::Receiver<RaftNodeReport> {
        self.reports.clone()
    }

    /// Replicate an operation and wait for its commit outcome.
    pub async fn submit(&self, operation: Bytes) -> Result<CommitResult> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::Submit {
            operation,
            completion: tx,
        })
        .await?;
        Self::completed(rx.await)
    }

    /// Run a read-only operation under the given policy.
    pub async fn query(&self, operation: Bytes, policy: QueryPolicy) -> Result<CommitResult> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::Query {
            operation,
            policy,
            completion: tx,
        })
        .await?;
        Self::completed(rx.await)
    }

    /// Apply a single-server membership change.
    pub async fn change_membership(
        &self,
        change: MembershipChange,
        expected_group_members_commit_index: LogIndex,
    ) -> Result<GroupMembers> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::ChangeMembership {
            change,
            expected_group_members_commit_index,
            completion: tx,
        })
        .await?;
        Self::completed(rx.await)
    }

    /// Hand leadership to another voting member.
    pub async fn transfer_leadership(&self, target: impl Into<NodeId>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::TransferLeadership {
            target: target.into(),
            completion: tx,
        })
        .await?;
        Self::completed(rx.await)
    }

    /// Replicate a terminate marker; resolves to its commit index.
    pub async fn terminate_group(&self) -> Result<LogIndex> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::TerminateGroup { completion: tx })
            .await?;
        Self::completed(rx.await)
    }

    /// Point-in-time node report.
    pub async fn report(&self) -> Result<RaftNodeReport> {
        let (tx, rx) = oneshot::channel();
        self.send_event(NodeEvent::Report { completion: tx }).await?;
        rx.await
            .map_err(|_| Self::stopped_error())
    }

    /// Stop the node locally. The rest of the group keeps running.
    pub async fn shutdown(&self) {
        let _ = self.events.send(NodeEvent::Shutdown).await;
    }

    async fn send_event(&self, event: NodeEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Self::stopped_error())
    }

    fn completed<T>(outcome: std::result::Result<Result<T>, oneshot::error::RecvError>) -> Result<T> {
        outcome.map_err(|_| Self::stopped_error())?
    }

    fn stopped_error() -> RaftError {
        RaftError::CannotReplicate("raft group runtime stopped".to_string())
    }
}
