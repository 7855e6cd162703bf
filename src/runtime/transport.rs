// Outbound message seam and the in-memory network.
//
// The node writes messages to a `Transport` from its own thread; the
// transport pushes inbound messages into the owning runtime's mailbox.
// Delivery is best-effort: a dropped message is indistinguishable from a
// lost packet and the protocol retries around it.
//
// `InMemoryNetwork` wires a group of runtimes together in-process, with
// per-node partitioning for fault injection in tests.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use crate::common::{Endpoint, NodeId};
use crate::model::message::RaftMessage;
use crate::runtime::NodeEvent;

/// Write-only message sink handed to a node.
pub trait Transport: Send {
    /// Best-effort send; no delivery guarantee is required.
    fn send(&mut self, target: &Endpoint, message: RaftMessage);
}

struct NetworkInner {
    mailboxes: DashMap<NodeId, mpsc::Sender<NodeEvent>>,
    partitioned: DashSet<NodeId>,
}

/// In-process message router connecting the members of a group.
#[derive(Clone)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                mailboxes: DashMap::new(),
                partitioned: DashSet::new(),
            }),
        }
    }

    /// Register a member's mailbox under its id.
    pub fn register(&self, id: NodeId, mailbox: mpsc::Sender<NodeEvent>) {
        self.inner.mailboxes.insert(id, mailbox);
    }

    pub fn deregister(&self, id: &str) {
        self.inner.mailboxes.remove(id);
    }

    /// Cut a member off from the network in both directions.
    pub fn partition(&self, id: &str) {
        self.inner.partitioned.insert(id.to_string());
    }

    /// Reconnect a previously partitioned member.
    pub fn heal(&self, id: &str) {
        self.inner.partitioned.remove(id);
    }

    /// A transport handle for the named member.
    pub fn transport(&self, id: impl Into<NodeId>) -> InMemoryTransport {
        InMemoryTransport {
            local: id.into(),
            inner: self.inner.clone(),
        }
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-node handle into an [`InMemoryNetwork`].
pub struct InMemoryTransport {
    local: NodeId,
    inner: Arc<NetworkInner>,
}

impl Transport for InMemoryTransport {
    fn send(&mut self, target: &Endpoint, message: RaftMessage) {
        if self.inner.partitioned.contains(&self.local)
            || self.inner.partitioned.contains(&target.id)
        {
            return;
        }
        if let Some(mailbox) = self.inner.mailboxes.get(&target.id) {
            if mailbox.try_send(NodeEvent::Message(message)).is_err() {
                tracing::trace!(
                    from = %self.local,
                    to = %target.id,
                    "mailbox full or closed, dropping message"
                );
            }
        }
    }
}
