//! Synchronous replication parameters

use std::time::Duration;

/// Parameters gating synchronous commit. Both are runtime-mutable through
/// the limbo's setters, which re-evaluate the queue under the new values.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Peers (origin included) that must acknowledge a position before it
    /// can be confirmed
    pub synchro_quorum: usize,
    /// How long a submitter waits for its quorum before preempting the
    /// queue with a rollback
    pub synchro_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            synchro_quorum: 1,
            synchro_timeout: Duration::from_secs(5),
        }
    }
}

impl ReplicationConfig {
    /// Single-node operation: the local journal write alone is the quorum
    pub fn local_only() -> Self {
        Self::default()
    }

    /// Majority quorum for a cluster of `replicas` nodes
    pub fn majority_of(replicas: usize) -> Self {
        Self {
            synchro_quorum: replicas / 2 + 1,
            ..Self::default()
        }
    }
}
