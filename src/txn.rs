//! Transaction record as seen by the limbo
//!
//! The limbo never owns transaction semantics; it reads the gating flags,
//! records a signed outcome in `signature`, and finishes the transaction
//! through [`Txn::complete`]. The record also carries one-shot
//! commit/rollback hooks so non-transactional waiters can observe a
//! terminal state.
//!
//! ## Signature protocol
//!
//! `signature` starts at [`SIGNATURE_PENDING`] and becomes the journal
//! write result (non-negative) once the local write finishes. The limbo
//! overwrites it with [`SIGNATURE_QUORUM_TIMEOUT`] or
//! [`SIGNATURE_SYNC_ROLLBACK`] when it aborts the transaction.
//! [`Txn::complete`] dispatches on the sign: non-negative runs the commit
//! hooks, negative the rollback hooks. It runs exactly once; a journal
//! write result arriving after a terminal state is ignored, so completion
//! does not depend on which thread delivers it.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::TxnId;

/// Signed outcome recorded on a transaction. Non-negative once the local
/// journal write finished; negative values are sentinels.
pub type Signature = i64;

/// The local journal write has not completed yet.
pub const SIGNATURE_PENDING: Signature = -1;
/// Aborted because the synchronous quorum was not collected in time.
pub const SIGNATURE_QUORUM_TIMEOUT: Signature = -2;
/// Aborted by a ROLLBACK decision covering the entry's position.
pub const SIGNATURE_SYNC_ROLLBACK: Signature = -3;

/// Handle to a registered completion hook, used to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

type CompletionHook = Box<dyn FnOnce(&Txn) + Send>;

/// A transaction from the limbo's point of view
pub struct Txn {
    id: TxnId,
    /// Commit is gated by the limbo
    wait_sync: AtomicBool,
    /// Originates locally and collects acks on its own position
    wait_ack: AtomicBool,
    /// Terminal hooks already ran
    is_done: AtomicBool,
    signature: AtomicI64,
    next_hook_id: AtomicU64,
    commit_hooks: Mutex<Vec<(HookId, CompletionHook)>>,
    rollback_hooks: Mutex<Vec<(HookId, CompletionHook)>>,
}

impl Txn {
    fn with_flags(id: TxnId, wait_sync: bool, wait_ack: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            wait_sync: AtomicBool::new(wait_sync),
            wait_ack: AtomicBool::new(wait_ack),
            is_done: AtomicBool::new(false),
            signature: AtomicI64::new(SIGNATURE_PENDING),
            next_hook_id: AtomicU64::new(1),
            commit_hooks: Mutex::new(Vec::new()),
            rollback_hooks: Mutex::new(Vec::new()),
        })
    }

    /// A transaction outside the limbo's jurisdiction
    pub fn new(id: TxnId) -> Arc<Self> {
        Self::with_flags(id, false, false)
    }

    /// A synchronous transaction: queued, and collecting acks on its own
    /// journal position
    pub fn new_sync(id: TxnId) -> Arc<Self> {
        Self::with_flags(id, true, true)
    }

    /// An asynchronous transaction riding the queue: committed when the
    /// nearest preceding synchronous transaction is
    pub fn new_async(id: TxnId) -> Arc<Self> {
        Self::with_flags(id, true, false)
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn wait_sync(&self) -> bool {
        self.wait_sync.load(Ordering::Acquire)
    }

    pub fn wait_ack(&self) -> bool {
        self.wait_ack.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.is_done.load(Ordering::Acquire)
    }

    pub fn signature(&self) -> Signature {
        self.signature.load(Ordering::Acquire)
    }

    /// Overwrite the recorded outcome. Used by the limbo to install the
    /// abort sentinels before finishing the transaction.
    pub fn set_signature(&self, signature: Signature) {
        self.signature.store(signature, Ordering::Release);
    }

    /// Drop both limbo gates. Called once a terminal decision covers the
    /// transaction; after this the journal write completion may finish it.
    pub fn clear_sync_flags(&self) {
        self.wait_sync.store(false, Ordering::Release);
        self.wait_ack.store(false, Ordering::Release);
    }

    /// Record the signed result of the local journal write. When the
    /// transaction is no longer gated by the limbo this also finishes it;
    /// a result arriving after a terminal state is ignored.
    pub fn journal_written(&self, signature: Signature) {
        if self.is_done() {
            return;
        }
        self.set_signature(signature);
        if !self.wait_sync() {
            self.complete();
        }
    }

    /// Finish the transaction: run the commit hooks when the signature is
    /// non-negative, the rollback hooks otherwise. Runs exactly once.
    pub fn complete(&self) {
        if self.is_done.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = if self.signature() >= 0 {
            std::mem::take(&mut *self.commit_hooks.lock().expect("commit_hooks lock poisoned"))
        } else {
            std::mem::take(&mut *self.rollback_hooks.lock().expect("rollback_hooks lock poisoned"))
        };
        for (_, hook) in hooks {
            hook(self);
        }
    }

    fn alloc_hook_id(&self) -> HookId {
        HookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach a one-shot hook that runs when the transaction commits
    pub fn on_commit<F>(&self, hook: F) -> HookId
    where
        F: FnOnce(&Txn) + Send + 'static,
    {
        let id = self.alloc_hook_id();
        self.commit_hooks
            .lock()
            .expect("commit_hooks lock poisoned")
            .push((id, Box::new(hook)));
        id
    }

    /// Attach a one-shot hook that runs when the transaction rolls back
    pub fn on_rollback<F>(&self, hook: F) -> HookId
    where
        F: FnOnce(&Txn) + Send + 'static,
    {
        let id = self.alloc_hook_id();
        self.rollback_hooks
            .lock()
            .expect("rollback_hooks lock poisoned")
            .push((id, Box::new(hook)));
        id
    }

    /// Detach a commit hook that has not fired yet
    pub fn remove_commit_hook(&self, id: HookId) {
        self.commit_hooks
            .lock()
            .expect("commit_hooks lock poisoned")
            .retain(|(hook_id, _)| *hook_id != id);
    }

    /// Detach a rollback hook that has not fired yet
    pub fn remove_rollback_hook(&self, id: HookId) {
        self.rollback_hooks
            .lock()
            .expect("rollback_hooks lock poisoned")
            .retain(|(hook_id, _)| *hook_id != id);
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("wait_sync", &self.wait_sync())
            .field("wait_ack", &self.wait_ack())
            .field("is_done", &self.is_done())
            .field("signature", &self.signature())
            .finish()
    }
}
