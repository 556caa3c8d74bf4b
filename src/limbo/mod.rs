//! Synchronous transaction limbo
//!
//! The limbo is the ordered, in-memory queue of transactions that have
//! been written to the local journal but are not yet confirmed by a quorum
//! of peers. It turns per-transaction durability signals (local journal
//! write completions plus remote position acknowledgements) into ordered
//! CONFIRM/ROLLBACK decisions and drives the per-transaction wake-ups.
//!
//! ## Queue discipline
//!
//! - entries join at the tail, in local journal-write order
//! - CONFIRM commits a prefix: entries leave through the head
//! - ROLLBACK aborts a suffix: entries leave through the tail
//!
//! The queue belongs to a single origin replica at a time; appending a
//! transaction from a different origin while the queue is non-empty is
//! refused.
//!
//! ## Waiting
//!
//! All suspended submitters sleep on one condition variable with a
//! deadline and re-check their own entry on wake-up; every decision path
//! broadcasts it. Condition waits have no cancellation, so a timeout is
//! the only way a submitter preempts the queue, and the submitter holding
//! the head entry is the one that drives the cascading rollback.
//!
//! A CONFIRM/ROLLBACK row is written to the journal while the limbo lock
//! is held, so a second decision scan can never run while one is in
//! flight.

pub mod config;
pub mod entry;
pub mod vclock;

pub use config::ReplicationConfig;
pub use entry::LimboEntry;
pub use vclock::PeerPositions;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{LimboError, Result};
use crate::journal::{Journal, SynchroKind, SynchroRecord};
use crate::txn::{Txn, SIGNATURE_QUORUM_TIMEOUT, SIGNATURE_SYNC_ROLLBACK};
use crate::types::{Lsn, PeerId, LSN_UNASSIGNED, PEER_ID_NIL};

/// State guarded by the limbo lock
struct LimboInner {
    queue: VecDeque<Arc<LimboEntry>>,
    /// Replica the queued transactions belong to; nil iff the queue is
    /// empty
    origin_id: PeerId,
    positions: PeerPositions,
    synchro_quorum: usize,
    synchro_timeout: Duration,
}

/// The synchronous transaction limbo
pub struct Limbo {
    inner: Mutex<LimboInner>,
    wait_cond: Condvar,
    journal: Arc<dyn Journal>,
    /// Replica id of this node, substituted for peer id 0 at append
    local_id: PeerId,
    /// Entries aborted through the tail since creation
    rollback_count: AtomicU64,
}

impl Limbo {
    pub fn new(local_id: PeerId, config: ReplicationConfig, journal: Arc<dyn Journal>) -> Self {
        debug_assert_ne!(local_id, PEER_ID_NIL);
        debug_assert!(config.synchro_quorum > 0);
        Self {
            inner: Mutex::new(LimboInner {
                queue: VecDeque::new(),
                origin_id: PEER_ID_NIL,
                positions: PeerPositions::new(),
                synchro_quorum: config.synchro_quorum,
                synchro_timeout: config.synchro_timeout,
            }),
            wait_cond: Condvar::new(),
            journal,
            local_id,
            rollback_count: AtomicU64::new(0),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, LimboInner> {
        self.inner.lock().expect("limbo lock poisoned")
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().queue.len()
    }

    /// Origin the queue currently belongs to, nil when empty
    pub fn origin_id(&self) -> PeerId {
        self.lock_inner().origin_id
    }

    /// Monotonic count of entries aborted through the tail. External
    /// readers compare it across observations to detect rollbacks.
    pub fn rollback_count(&self) -> u64 {
        self.rollback_count.load(Ordering::Acquire)
    }

    pub fn synchro_quorum(&self) -> usize {
        self.lock_inner().synchro_quorum
    }

    pub fn synchro_timeout(&self) -> Duration {
        self.lock_inner().synchro_timeout
    }

    /// Snapshot of the per-peer acknowledged positions, sorted by peer id
    pub fn peer_positions_snapshot(&self) -> Vec<(PeerId, Lsn)> {
        self.lock_inner().positions.snapshot()
    }

    pub fn first_entry(&self) -> Option<Arc<LimboEntry>> {
        self.lock_inner().queue.front().cloned()
    }

    pub fn last_entry(&self) -> Option<Arc<LimboEntry>> {
        self.lock_inner().queue.back().cloned()
    }

    /// Queue a transaction behind everything already waiting.
    ///
    /// `peer_id` names the replica the transaction originates from; zero
    /// means the local node. The first append adopts the origin; while
    /// the queue is non-empty transactions from any other origin are
    /// refused with [`LimboError::ForeignSync`].
    pub fn append(&self, peer_id: PeerId, txn: &Arc<Txn>) -> Result<Arc<LimboEntry>> {
        debug_assert!(txn.wait_sync());
        let peer_id = if peer_id == PEER_ID_NIL {
            self.local_id
        } else {
            peer_id
        };

        let mut inner = self.lock_inner();
        if inner.origin_id != peer_id {
            if inner.origin_id == PEER_ID_NIL || inner.queue.is_empty() {
                inner.origin_id = peer_id;
            } else {
                return Err(LimboError::ForeignSync {
                    origin: inner.origin_id,
                });
            }
        }
        inner
            .queue
            .try_reserve(1)
            .map_err(|_| LimboError::OutOfMemory)?;
        let entry = LimboEntry::new(Arc::clone(txn));
        inner.queue.push_back(Arc::clone(&entry));
        Ok(entry)
    }

    /// Record the journal position the entry's transaction landed at.
    ///
    /// For a locally originated queue the acknowledged-position vector is
    /// re-counted, picking up acks that arrived before the position was
    /// known. For a remote origin the position is recorded as-is; ack
    /// accounting is the owner's business.
    pub fn assign_lsn(&self, entry: &LimboEntry, lsn: Lsn) {
        let inner = self.lock_inner();
        debug_assert_ne!(inner.origin_id, PEER_ID_NIL);
        debug_assert_eq!(entry.lsn(), LSN_UNASSIGNED);
        debug_assert!(lsn > 0);
        debug_assert!(entry.txn().wait_ack());

        entry.set_lsn(lsn);
        if inner.origin_id == self.local_id {
            let acks = inner.positions.count_at_or_above(lsn);
            debug_assert!(acks >= entry.ack_count());
            entry.set_ack_count(acks);
        }
    }

    /// A peer acknowledged everything up to `lsn`. Re-scans the queue and,
    /// when a prefix newly reaches the quorum, writes and applies a
    /// CONFIRM for it.
    pub fn ack(&self, peer_id: PeerId, lsn: Lsn) {
        let mut inner = self.lock_inner();
        if inner.queue.is_empty() {
            return;
        }
        debug_assert_ne!(inner.origin_id, PEER_ID_NIL);

        let prev = inner.positions.follow(peer_id, lsn);
        let quorum = inner.synchro_quorum;
        let mut confirm_lsn = LSN_UNASSIGNED;
        for e in inner.queue.iter() {
            if e.lsn() > lsn {
                break;
            }
            if !e.txn().wait_ack() {
                // Async entries ride along with whatever prefix confirms;
                // they never advance it on their own.
                debug_assert_eq!(e.lsn(), LSN_UNASSIGNED);
            } else if e.lsn() <= prev {
                // This peer was already counted for the entry. Covers
                // unassigned entries too.
            } else if e.bump_ack_count() >= quorum {
                // Quorum first reached here; keep walking, later entries
                // may cross as well now that this peer moved.
                confirm_lsn = e.lsn();
            }
        }
        if confirm_lsn == LSN_UNASSIGNED {
            return;
        }

        let origin = inner.origin_id;
        if let Err(e) = self.write_synchro(origin, confirm_lsn, SynchroKind::Confirm) {
            // Acks stay recorded; a later ack re-runs the scan and
            // retries the write.
            log::error!("CONFIRM({}) write failed: {}", confirm_lsn, e);
            return;
        }
        self.read_confirm_locked(&mut inner, confirm_lsn);
        drop(inner);
        self.wait_cond.notify_all();
    }

    /// Suspend the calling submitter until its entry reaches a terminal
    /// state.
    ///
    /// Returns `Ok` on commit and [`LimboError::SyncRollback`] on
    /// rollback. When the configured timeout expires first, the submitter
    /// holding the head entry writes a ROLLBACK at its position and aborts
    /// the whole queue tail-first, returning
    /// [`LimboError::QuorumTimeout`]; every other timed-out submitter
    /// waits for that cascade to cover its entry.
    pub fn wait_complete(&self, entry: &Arc<LimboEntry>) -> Result<()> {
        debug_assert!(entry.lsn() > 0 || !entry.txn().wait_ack());
        if entry.is_complete() {
            return Self::completion_result(entry);
        }
        debug_assert!(!entry.txn().is_done());
        debug_assert!(entry.txn().wait_sync());

        let start = Instant::now();
        let mut inner = self.lock_inner();
        let timed_out = loop {
            if entry.is_complete() {
                break false;
            }
            // Re-read the timeout every pass: a parameter change
            // broadcasts the condition so sleepers pick the new value up.
            let deadline = start + inner.synchro_timeout;
            let now = Instant::now();
            if now >= deadline {
                break true;
            }
            let (guard, _) = self
                .wait_cond
                .wait_timeout(inner, deadline - now)
                .expect("limbo lock poisoned");
            inner = guard;
        };
        if !timed_out {
            drop(inner);
            return Self::completion_result(entry);
        }

        debug_assert!(!inner.queue.is_empty());
        let is_head = inner
            .queue
            .front()
            .map_or(false, |head| Arc::ptr_eq(head, entry));
        if !is_head {
            // Not the first timed-out entry: another submitter is already
            // driving the cascading rollback. Wait for it to cover us.
            while !entry.is_complete() {
                inner = self.wait_cond.wait(inner).expect("limbo lock poisoned");
            }
            drop(inner);
            return Self::completion_result(entry);
        }

        // Head submitter drives the rollback of the entire queue, its own
        // entry included.
        let rollback_lsn = entry.lsn();
        if rollback_lsn > 0 {
            let origin = inner.origin_id;
            if let Err(e) = self.write_synchro(origin, rollback_lsn, SynchroKind::Rollback) {
                // The local cascade proceeds regardless; peers time the
                // stream out on their side.
                log::error!("ROLLBACK({}) write failed: {}", rollback_lsn, e);
            }
        }
        log::warn!(
            "quorum timeout: rolling back {} queued transaction(s) from lsn {}",
            inner.queue.len(),
            rollback_lsn
        );
        while let Some(e) = self.pop_tail_locked(&mut inner) {
            e.txn().set_signature(SIGNATURE_QUORUM_TIMEOUT);
            e.txn().clear_sync_flags();
            e.txn().complete();
            if Arc::ptr_eq(&e, entry) {
                break;
            }
        }
        drop(inner);
        self.wait_cond.notify_all();
        Err(LimboError::QuorumTimeout)
    }

    /// Suspend until the transaction currently at the tail reaches a
    /// terminal state. Returns immediately when the queue is empty.
    pub fn wait_last_confirm(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        let tail = match inner.queue.back() {
            Some(tail) => Arc::clone(tail),
            None => return Ok(()),
        };

        let waitpoint = Arc::new(ConfirmWaitpoint::default());
        let wp = Arc::clone(&waitpoint);
        let commit_hook = tail.txn().on_commit(move |_| {
            wp.is_confirm.store(true, Ordering::Release);
        });
        let wp = Arc::clone(&waitpoint);
        let rollback_hook = tail.txn().on_rollback(move |_| {
            wp.is_rollback.store(true, Ordering::Release);
        });

        let start = Instant::now();
        loop {
            if waitpoint.is_confirm.load(Ordering::Acquire) {
                return Ok(());
            }
            if waitpoint.is_rollback.load(Ordering::Acquire) {
                return Err(LimboError::SyncRollback);
            }
            let deadline = start + inner.synchro_timeout;
            let now = Instant::now();
            if now >= deadline {
                tail.txn().remove_commit_hook(commit_hook);
                tail.txn().remove_rollback_hook(rollback_hook);
                return Err(LimboError::QuorumTimeout);
            }
            let (guard, _) = self
                .wait_cond
                .wait_timeout(inner, deadline - now)
                .expect("limbo lock poisoned");
            inner = guard;
        }
    }

    /// Apply a replicated or recovered synchro row
    pub fn apply(&self, record: &SynchroRecord) {
        match record.kind {
            SynchroKind::Confirm => self.read_confirm(record.lsn),
            SynchroKind::Rollback => self.read_rollback(record.lsn),
        }
    }

    /// Commit the queue prefix covered by a CONFIRM at `lsn`
    pub fn read_confirm(&self, lsn: Lsn) {
        let mut inner = self.lock_inner();
        self.read_confirm_locked(&mut inner, lsn);
        drop(inner);
        self.wait_cond.notify_all();
    }

    /// Abort the queue suffix covered by a ROLLBACK at `lsn`
    pub fn read_rollback(&self, lsn: Lsn) {
        let mut inner = self.lock_inner();
        self.read_rollback_locked(&mut inner, lsn);
        drop(inner);
        self.wait_cond.notify_all();
    }

    /// Administratively drain the queue: confirm every sync entry at or
    /// below `confirm_lsn`, roll back everything beyond.
    pub fn force_empty(&self, confirm_lsn: Lsn) {
        let mut inner = self.lock_inner();
        if inner.queue.is_empty() {
            return;
        }
        let origin = inner.origin_id;

        // Last confirmable sync position, and the first sync position
        // beyond it. An entry whose local write is still in flight cannot
        // be confirmed and has no position a rollback row could carry; it
        // ends the confirmable prefix and is left to the timeout path.
        let mut last_quorum = LSN_UNASSIGNED;
        let mut rollback = LSN_UNASSIGNED;
        for e in inner.queue.iter() {
            if !e.txn().wait_ack() {
                continue;
            }
            let lsn = e.lsn();
            if lsn != LSN_UNASSIGNED && lsn <= confirm_lsn {
                last_quorum = lsn;
            } else {
                if lsn != LSN_UNASSIGNED {
                    rollback = lsn;
                }
                break;
            }
        }

        if last_quorum != LSN_UNASSIGNED {
            if let Err(e) = self.write_synchro(origin, last_quorum, SynchroKind::Confirm) {
                log::error!("force_empty: CONFIRM({}) write failed: {}", last_quorum, e);
            }
            self.read_confirm_locked(&mut inner, last_quorum);
        }
        if rollback != LSN_UNASSIGNED {
            if let Err(e) = self.write_synchro(origin, rollback, SynchroKind::Rollback) {
                log::error!("force_empty: ROLLBACK({}) write failed: {}", rollback, e);
            }
            self.read_rollback_locked(&mut inner, rollback);
        }
        drop(inner);
        self.wait_cond.notify_all();
    }

    /// Re-evaluate the queue after a quorum or timeout change
    pub fn on_parameters_change(&self) {
        let mut inner = self.lock_inner();
        self.parameters_change_locked(&mut inner);
        drop(inner);
        // Wake everyone even when nothing confirmed: timed-out sleepers
        // have to observe the new timeout.
        self.wait_cond.notify_all();
    }

    /// Change the quorum and re-evaluate the queue under it
    pub fn set_synchro_quorum(&self, quorum: usize) {
        debug_assert!(quorum > 0);
        let mut inner = self.lock_inner();
        inner.synchro_quorum = quorum;
        self.parameters_change_locked(&mut inner);
        drop(inner);
        self.wait_cond.notify_all();
    }

    /// Change the wait timeout; sleeping submitters pick it up
    pub fn set_synchro_timeout(&self, timeout: Duration) {
        debug_assert!(timeout > Duration::ZERO);
        let mut inner = self.lock_inner();
        inner.synchro_timeout = timeout;
        self.parameters_change_locked(&mut inner);
        drop(inner);
        self.wait_cond.notify_all();
    }

    fn completion_result(entry: &LimboEntry) -> Result<()> {
        debug_assert!(entry.is_complete());
        if entry.is_rollback() {
            Err(LimboError::SyncRollback)
        } else {
            Ok(())
        }
    }

    /// Write one synchro row and wait for the journal to acknowledge it.
    /// Runs under the limbo lock: no second decision scan can start while
    /// the row is in flight.
    fn write_synchro(&self, origin_id: PeerId, lsn: Lsn, kind: SynchroKind) -> Result<()> {
        debug_assert_ne!(origin_id, PEER_ID_NIL);
        debug_assert!(lsn > 0);

        let record = SynchroRecord {
            origin_id,
            lsn,
            kind,
        };
        let (tx, rx) = mpsc::sync_channel(1);
        self.journal.submit(record, tx)?;
        let result = rx
            .recv()
            .map_err(|e| LimboError::LogIo(format!("journal response lost: {}", e)))?;
        if result < 0 {
            return Err(LimboError::LogIo(format!(
                "journal refused {}({}) with {}",
                kind, lsn, result
            )));
        }
        log::debug!("{}({}) written for origin {}", kind, lsn, origin_id);
        Ok(())
    }

    /// Mark the tail entry rolled back and detach it. Commits leave
    /// through the head, rollbacks through the tail.
    fn pop_tail_locked(&self, inner: &mut LimboInner) -> Option<Arc<LimboEntry>> {
        let e = inner.queue.back().cloned()?;
        e.set_rollback();
        inner.queue.pop_back();
        self.rollback_count.fetch_add(1, Ordering::AcqRel);
        if inner.queue.is_empty() {
            inner.origin_id = PEER_ID_NIL;
        }
        Some(e)
    }

    fn read_confirm_locked(&self, inner: &mut LimboInner, lsn: Lsn) {
        while let Some(e) = inner.queue.front().cloned() {
            if e.txn().wait_ack() && (e.lsn() == LSN_UNASSIGNED || e.lsn() > lsn) {
                // Sync entry past the confirmation, or one whose local
                // journal write is still in flight: the prefix ends here.
                // Async entries always ride with the committed prefix.
                break;
            }
            e.set_commit();
            inner.queue.pop_front();
            e.txn().clear_sync_flags();
            // Finish the transaction only once its local write landed;
            // otherwise the write completion finishes it.
            if e.txn().signature() >= 0 {
                e.txn().complete();
            }
        }
        if inner.queue.is_empty() {
            inner.origin_id = PEER_ID_NIL;
        }
    }

    fn read_rollback_locked(&self, inner: &mut LimboInner, lsn: Lsn) {
        // Earliest sync entry at or above the rollback position. Entries
        // are scanned from the tail; positions grow towards it.
        let mut stop_index = None;
        for (i, e) in inner.queue.iter().enumerate().rev() {
            if !e.txn().wait_ack() {
                continue;
            }
            if e.lsn() < lsn {
                break;
            }
            stop_index = Some(i);
        }
        let Some(stop_index) = stop_index else {
            return;
        };

        // Abort the suffix tail-first, through the found entry inclusive
        while inner.queue.len() > stop_index {
            let Some(e) = self.pop_tail_locked(inner) else {
                break;
            };
            e.txn().set_signature(SIGNATURE_SYNC_ROLLBACK);
            e.txn().clear_sync_flags();
            e.txn().complete();
        }
    }

    fn parameters_change_locked(&self, inner: &mut LimboInner) {
        if inner.queue.is_empty() {
            return;
        }
        let quorum = inner.synchro_quorum;
        let mut confirm_lsn = LSN_UNASSIGNED;
        for e in inner.queue.iter() {
            if !e.txn().wait_ack() {
                debug_assert_eq!(e.lsn(), LSN_UNASSIGNED);
                continue;
            }
            if e.ack_count() < quorum {
                break;
            }
            confirm_lsn = e.lsn();
            debug_assert!(confirm_lsn > 0);
        }
        if confirm_lsn > 0 {
            let origin = inner.origin_id;
            if let Err(e) = self.write_synchro(origin, confirm_lsn, SynchroKind::Confirm) {
                // The quorum already shrank; there is no later trigger to
                // retry with.
                panic!(
                    "couldn't write CONFIRM({}) to the journal: {}",
                    confirm_lsn, e
                );
            }
            self.read_confirm_locked(inner, confirm_lsn);
        }
    }
}

/// Progress flags for a confirmation waiter, set by the one-shot hooks on
/// the tail transaction
#[derive(Default)]
struct ConfirmWaitpoint {
    is_confirm: AtomicBool,
    is_rollback: AtomicBool,
}
