// Shared identifier types for the consensus core.
//
// An endpoint couples a stable member identity with a transport address.
// The address is opaque to the core; two endpoints are the same member
// exactly when their ids match, even if one of them has moved.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Stable identity of a Raft group member.
pub type NodeId = String;

/// Identity of a Raft group.
pub type GroupId = String;

/// A group member: stable id plus a transport address the core never
/// interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable member id. Equality and hashing use only this field.
    pub id: NodeId,

    /// Opaque transport address, handed to the transport as-is.
    pub address: String,
}

impl Endpoint {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_endpoint_equality_by_id_only() {
        let a = Endpoint::new("node1", "10.0.0.1:7000");
        let b = Endpoint::new("node1", "10.0.0.9:7000");
        let c = Endpoint::new("node2", "10.0.0.1:7000");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
