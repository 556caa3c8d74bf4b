//! MiniSync - a minimal quorum-replication transaction limbo
//!
//! This crate implements the serialization point of a node that takes part
//! in synchronous, quorum-confirmed replication: the in-memory queue where
//! transactions sit after their local journal write until enough peers
//! acknowledge the position, and the machinery that turns acknowledgements
//! into ordered CONFIRM/ROLLBACK decisions.
//!
//! Architecture Overview:
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Write path (producers)                   │
//! │      append → local journal write → assign_lsn → wait       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Limbo                              │
//! │   ordered queue · per-peer positions · quorum decisions     │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   ▲
//!                    ▼                   │
//! ┌──────────────────────────┐ ┌────────────────────────────────┐
//! │     Journal bridge       │ │      Replication feed          │
//! │ (CONFIRM/ROLLBACK rows)  │ │  (peer acks, replicated rows)  │
//! └──────────────────────────┘ └────────────────────────────────┘

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod journal;
pub mod limbo;
pub mod txn;
pub mod types;

pub use error::{LimboError, Result};
pub use journal::{FileJournal, Journal, SynchroKind, SynchroRecord};
pub use limbo::{Limbo, LimboEntry, PeerPositions, ReplicationConfig};
pub use txn::{HookId, Txn};
pub use types::{Lsn, PeerId, TxnId, LSN_UNASSIGNED, PEER_ID_NIL};

static LIMBO: OnceLock<Limbo> = OnceLock::new();

/// Install the process-wide limbo. The first call creates it; later calls
/// return the already-installed instance.
pub fn init(
    local_id: PeerId,
    config: ReplicationConfig,
    journal: Arc<dyn Journal>,
) -> &'static Limbo {
    LIMBO.get_or_init(|| Limbo::new(local_id, config, journal))
}

/// The process-wide limbo, when [`init`] has run
pub fn instance() -> Option<&'static Limbo> {
    LIMBO.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::SyncSender;

    struct NullJournal;

    impl Journal for NullJournal {
        fn submit(&self, record: SynchroRecord, responder: SyncSender<i64>) -> Result<()> {
            let _ = responder.send(record.lsn);
            Ok(())
        }
    }

    #[test]
    fn test_init_installs_a_single_instance() {
        let first = init(1, ReplicationConfig::default(), Arc::new(NullJournal));
        let second = init(9, ReplicationConfig::default(), Arc::new(NullJournal));
        assert!(std::ptr::eq(first, second));

        let limbo = instance().expect("init ran");
        assert_eq!(limbo.local_id(), 1);
        assert!(limbo.is_empty());
    }
}
