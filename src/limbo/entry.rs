//! Per-transaction limbo bookkeeping

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::txn::Txn;
use crate::types::{Lsn, LSN_UNASSIGNED};

/// One queued synchronous transaction.
///
/// The entry is shared between the queue and its submitter through `Arc`,
/// so the submitter still observes the terminal flags after the entry has
/// left the queue. Fields are written only under the limbo lock; reads can
/// happen from any thread.
pub struct LimboEntry {
    txn: Arc<Txn>,
    /// Journal position, [`LSN_UNASSIGNED`] until the local write lands
    lsn: AtomicI64,
    /// Peers known to have persisted up to `lsn`
    ack_count: AtomicUsize,
    is_commit: AtomicBool,
    is_rollback: AtomicBool,
}

impl LimboEntry {
    pub(crate) fn new(txn: Arc<Txn>) -> Arc<Self> {
        Arc::new(Self {
            txn,
            lsn: AtomicI64::new(LSN_UNASSIGNED),
            ack_count: AtomicUsize::new(0),
            is_commit: AtomicBool::new(false),
            is_rollback: AtomicBool::new(false),
        })
    }

    pub fn txn(&self) -> &Arc<Txn> {
        &self.txn
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn.load(Ordering::Acquire)
    }

    pub(crate) fn set_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn, Ordering::Release);
    }

    pub fn ack_count(&self) -> usize {
        self.ack_count.load(Ordering::Acquire)
    }

    /// Count one more acknowledging peer, returning the new count
    pub(crate) fn bump_ack_count(&self) -> usize {
        self.ack_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Rebuild the count from the position vector after a late lsn
    /// assignment
    pub(crate) fn set_ack_count(&self, count: usize) {
        self.ack_count.store(count, Ordering::Release);
    }

    pub fn is_commit(&self) -> bool {
        self.is_commit.load(Ordering::Acquire)
    }

    pub fn is_rollback(&self) -> bool {
        self.is_rollback.load(Ordering::Acquire)
    }

    pub(crate) fn set_commit(&self) {
        debug_assert!(!self.is_rollback());
        self.is_commit.store(true, Ordering::Release);
    }

    pub(crate) fn set_rollback(&self) {
        debug_assert!(!self.is_commit());
        self.is_rollback.store(true, Ordering::Release);
    }

    /// A terminal flag has been installed
    pub fn is_complete(&self) -> bool {
        self.is_commit() || self.is_rollback()
    }
}

impl std::fmt::Debug for LimboEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimboEntry")
            .field("txn", &self.txn.id())
            .field("lsn", &self.lsn())
            .field("ack_count", &self.ack_count())
            .field("is_commit", &self.is_commit())
            .field("is_rollback", &self.is_rollback())
            .finish()
    }
}
