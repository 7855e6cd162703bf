use std::time::Duration;

use crate::error::{RaftError, Result};

/// Raft node configuration parameters.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Minimum election timeout (randomized between min and max)
    pub leader_election_timeout_min: Duration,

    /// Maximum election timeout (randomized between min and max)
    pub leader_election_timeout_max: Duration,

    /// Interval between append requests while the leader is idle
    pub leader_heartbeat_period: Duration,

    /// A follower declares the leader lost after this much silence; a
    /// leader steps down after losing heartbeat responses from a majority
    /// for this long
    pub leader_heartbeat_timeout: Duration,

    /// Take a state machine snapshot every this many applied entries
    pub commit_count_to_take_snapshot: u64,

    /// Bound on the uncommitted log tail; also the truncation bound
    pub max_uncommitted_log_entry_count: u64,

    /// Bound on client futures awaiting commit
    pub max_pending_log_entry_count: usize,

    /// Maximum entries (or snapshot chunks) per outbound request
    pub append_entries_request_batch_size: usize,

    /// A freshly elected leader appends a NewTerm entry instead of a Noop
    pub enable_new_term_operation: bool,

    /// Cadence of the periodic node report publication
    pub report_publish_period: Duration,

    /// Lagging followers may fetch snapshot chunks from peer followers
    pub transfer_snapshots_from_followers_enabled: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            leader_election_timeout_min: Duration::from_millis(150),
            leader_election_timeout_max: Duration::from_millis(300),
            leader_heartbeat_period: Duration::from_millis(50),
            leader_heartbeat_timeout: Duration::from_millis(300),
            commit_count_to_take_snapshot: 10_000,
            max_uncommitted_log_entry_count: 1_000,
            max_pending_log_entry_count: 1_000,
            append_entries_request_batch_size: 100,
            enable_new_term_operation: false,
            report_publish_period: Duration::from_secs(3),
            transfer_snapshots_from_followers_enabled: false,
        }
    }
}

impl RaftConfig {
    /// Validate the configuration before a node is built with it.
    pub fn validate(&self) -> Result<()> {
        if self.leader_election_timeout_min > self.leader_election_timeout_max {
            return Err(RaftError::InvalidArgument(
                "election timeout min exceeds max".to_string(),
            ));
        }
        if self.leader_election_timeout_min.is_zero() {
            return Err(RaftError::InvalidArgument(
                "election timeout must be non-zero".to_string(),
            ));
        }
        if self.leader_heartbeat_period.is_zero() || self.report_publish_period.is_zero() {
            return Err(RaftError::InvalidArgument(
                "heartbeat and report periods must be non-zero".to_string(),
            ));
        }
        if self.leader_heartbeat_period >= self.leader_election_timeout_min {
            return Err(RaftError::InvalidArgument(
                "heartbeat period must be shorter than the election timeout".to_string(),
            ));
        }
        if self.append_entries_request_batch_size == 0 {
            return Err(RaftError::InvalidArgument(
                "append entries batch size must be positive".to_string(),
            ));
        }
        if self.commit_count_to_take_snapshot == 0 {
            return Err(RaftError::InvalidArgument(
                "snapshot commit count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Timer pulse granularity: the smaller of the heartbeat period and a
    /// quarter of the minimum election timeout.
    pub fn tick_period(&self) -> Duration {
        self.leader_heartbeat_period
            .min(self.leader_election_timeout_min / 4)
    }
}
