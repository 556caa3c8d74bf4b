//! CONFIRM/ROLLBACK journal row structures

use serde::{Deserialize, Serialize};

use crate::types::{Lsn, PeerId};

/// Kind of a synchro row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynchroKind {
    /// Commit the origin's synchronous stream up to the carried position
    Confirm,
    /// Abort the origin's synchronous stream from the carried position on
    Rollback,
}

impl std::fmt::Display for SynchroKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynchroKind::Confirm => write!(f, "CONFIRM"),
            SynchroKind::Rollback => write!(f, "ROLLBACK"),
        }
    }
}

/// One synchro row: a commit-prefix or abort-suffix decision for an
/// origin's synchronous stream at a given position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchroRecord {
    /// Replica whose synchronous stream the decision applies to
    pub origin_id: PeerId,
    /// Journal position the decision is anchored at
    pub lsn: Lsn,
    pub kind: SynchroKind,
}

impl SynchroRecord {
    pub fn confirm(origin_id: PeerId, lsn: Lsn) -> Self {
        Self {
            origin_id,
            lsn,
            kind: SynchroKind::Confirm,
        }
    }

    pub fn rollback(origin_id: PeerId, lsn: Lsn) -> Self {
        Self {
            origin_id,
            lsn,
            kind: SynchroKind::Rollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = SynchroRecord::confirm(2, 15);
        let encoded = bincode::serialize(&record).unwrap();
        let decoded: SynchroRecord = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SynchroKind::Confirm.to_string(), "CONFIRM");
        assert_eq!(SynchroKind::Rollback.to_string(), "ROLLBACK");
    }

    #[test]
    fn test_constructors_set_the_kind() {
        assert_eq!(SynchroRecord::confirm(1, 5).kind, SynchroKind::Confirm);
        assert_eq!(SynchroRecord::rollback(1, 5).kind, SynchroKind::Rollback);
    }
}
