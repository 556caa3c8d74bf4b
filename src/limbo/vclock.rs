//! Per-peer acknowledged position vector

use std::collections::HashMap;

use crate::types::{Lsn, PeerId};

/// Monotonic mapping from peer id to the highest journal position that
/// peer has acknowledged. Entries are never removed.
#[derive(Debug, Default)]
pub struct PeerPositions {
    positions: HashMap<PeerId, Lsn>,
}

impl PeerPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest position acknowledged by `peer`, zero when the peer has not
    /// acknowledged anything yet
    pub fn get(&self, peer: PeerId) -> Lsn {
        self.positions.get(&peer).copied().unwrap_or(0)
    }

    /// Advance `peer` to `lsn` and return the previous value. Positions
    /// are monotonic per peer; a regressing update is ignored.
    pub fn follow(&mut self, peer: PeerId, lsn: Lsn) -> Lsn {
        let slot = self.positions.entry(peer).or_insert(0);
        let prev = *slot;
        if lsn < prev {
            log::warn!(
                "ignoring position regress for peer {}: {} < {}",
                peer,
                lsn,
                prev
            );
            return prev;
        }
        *slot = lsn;
        prev
    }

    /// Number of peers whose acknowledged position is at or above `lsn`
    pub fn count_at_or_above(&self, lsn: Lsn) -> usize {
        self.positions.values().filter(|&&pos| pos >= lsn).count()
    }

    /// Snapshot of the vector, sorted by peer id
    pub fn snapshot(&self) -> Vec<(PeerId, Lsn)> {
        let mut pairs: Vec<(PeerId, Lsn)> =
            self.positions.iter().map(|(&p, &l)| (p, l)).collect();
        pairs.sort_unstable_by_key(|&(p, _)| p);
        pairs
    }
}
