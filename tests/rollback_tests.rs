//! Timeout cascades, replicated rollbacks and administrative draining

use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use minisync::txn::{SIGNATURE_QUORUM_TIMEOUT, SIGNATURE_SYNC_ROLLBACK};
use minisync::{
    Journal, Limbo, LimboError, ReplicationConfig, Result, SynchroKind, SynchroRecord, Txn,
    PEER_ID_NIL,
};

/// Journal double that acknowledges immediately and records every row
struct RecordingJournal {
    rows: Mutex<Vec<SynchroRecord>>,
}

impl RecordingJournal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
        })
    }

    fn rows(&self) -> Vec<SynchroRecord> {
        self.rows.lock().unwrap().clone()
    }
}

impl Journal for RecordingJournal {
    fn submit(&self, record: SynchroRecord, responder: SyncSender<i64>) -> Result<()> {
        self.rows.lock().unwrap().push(record);
        let _ = responder.send(record.lsn);
        Ok(())
    }
}

fn setup(quorum: usize, timeout: Duration) -> (Arc<Limbo>, Arc<RecordingJournal>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let journal = RecordingJournal::new();
    let config = ReplicationConfig {
        synchro_quorum: quorum,
        synchro_timeout: timeout,
    };
    let limbo = Arc::new(Limbo::new(
        1,
        config,
        Arc::clone(&journal) as Arc<dyn Journal>,
    ));
    (limbo, journal)
}

fn append_sync(limbo: &Limbo, id: u64, lsn: i64) -> (Arc<Txn>, Arc<minisync::LimboEntry>) {
    let txn = Txn::new_sync(id);
    txn.set_signature(lsn);
    let entry = limbo.append(0, &txn).unwrap();
    limbo.assign_lsn(&entry, lsn);
    (txn, entry)
}

#[test]
fn test_timeout_cascades_from_the_head() {
    let (limbo, journal) = setup(3, Duration::from_millis(150));

    let (t1, e1) = append_sync(&limbo, 1, 10);
    let (t2, e2) = append_sync(&limbo, 2, 11);

    // Only two of the three required acks ever arrive
    limbo.ack(1, 11);
    limbo.ack(2, 11);

    let head_waiter = {
        let limbo = Arc::clone(&limbo);
        let entry = Arc::clone(&e1);
        thread::spawn(move || limbo.wait_complete(&entry))
    };
    let tail_waiter = {
        let limbo = Arc::clone(&limbo);
        let entry = Arc::clone(&e2);
        thread::spawn(move || limbo.wait_complete(&entry))
    };

    // The head submitter drives the cascade and reports the timeout;
    // the one behind it is collateral and reports the rollback
    match head_waiter.join().unwrap() {
        Err(LimboError::QuorumTimeout) => {}
        other => panic!("Expected QuorumTimeout, got {:?}", other),
    }
    match tail_waiter.join().unwrap() {
        Err(LimboError::SyncRollback) => {}
        other => panic!("Expected SyncRollback, got {:?}", other),
    }

    assert!(e1.is_rollback() && e2.is_rollback());
    assert!(limbo.is_empty());
    assert_eq!(limbo.origin_id(), PEER_ID_NIL);
    assert_eq!(limbo.rollback_count(), 2);
    assert_eq!(t1.signature(), SIGNATURE_QUORUM_TIMEOUT);
    assert_eq!(t2.signature(), SIGNATURE_QUORUM_TIMEOUT);
    assert!(t1.is_done() && t2.is_done());

    // The ROLLBACK row is anchored at the head position
    assert_eq!(journal.rows(), vec![SynchroRecord::rollback(1, 10)]);
}

#[test]
fn test_replicated_rollback_aborts_the_suffix_only() {
    let (limbo, _journal) = setup(3, Duration::from_secs(5));

    let (_t1, e1) = append_sync(&limbo, 1, 10);
    let (t2, e2) = append_sync(&limbo, 2, 11);
    let (t3, e3) = append_sync(&limbo, 3, 12);

    limbo.read_rollback(11);

    assert!(!e1.is_complete());
    assert!(e2.is_rollback() && e3.is_rollback());
    assert_eq!(limbo.len(), 1);
    assert_eq!(limbo.origin_id(), 1);
    assert_eq!(limbo.rollback_count(), 2);
    assert_eq!(t2.signature(), SIGNATURE_SYNC_ROLLBACK);
    assert_eq!(t3.signature(), SIGNATURE_SYNC_ROLLBACK);
}

#[test]
fn test_rollback_coverage_boundaries() {
    let (limbo, _journal) = setup(3, Duration::from_secs(5));

    // A position below every queued entry covers the whole queue
    let (_t1, e1) = append_sync(&limbo, 1, 10);
    limbo.read_rollback(9);
    assert!(e1.is_rollback());
    assert!(limbo.is_empty());

    // A position beyond every entry aborts nothing
    let (_t2, e2) = append_sync(&limbo, 2, 20);
    limbo.read_rollback(21);
    assert!(!e2.is_complete());
    assert_eq!(limbo.len(), 1);
}

#[test]
fn test_rollback_wakes_a_suspended_submitter() {
    let (limbo, _journal) = setup(3, Duration::from_secs(5));

    let (_t1, e1) = append_sync(&limbo, 1, 10);
    let waiter = {
        let limbo = Arc::clone(&limbo);
        let entry = Arc::clone(&e1);
        thread::spawn(move || limbo.wait_complete(&entry))
    };
    thread::sleep(Duration::from_millis(50));
    limbo.apply(&SynchroRecord::rollback(1, 10));

    match waiter.join().unwrap() {
        Err(LimboError::SyncRollback) => {}
        other => panic!("Expected SyncRollback, got {:?}", other),
    }
}

#[test]
fn test_rollback_of_txn_with_unfinished_local_write() {
    let (limbo, _journal) = setup(3, Duration::from_secs(5));

    // The transaction is queued and positioned, but its own journal
    // write completion has not run yet
    let txn = Txn::new_sync(1);
    let entry = limbo.append(0, &txn).unwrap();
    limbo.assign_lsn(&entry, 10);

    limbo.read_rollback(10);
    assert!(entry.is_rollback());
    assert_eq!(txn.signature(), SIGNATURE_SYNC_ROLLBACK);
    assert!(txn.is_done());

    // The late write completion finds the terminal state and is ignored
    txn.journal_written(10);
    assert_eq!(txn.signature(), SIGNATURE_SYNC_ROLLBACK);
}

#[test]
fn test_force_empty_confirms_the_prefix_and_aborts_the_rest() {
    let (limbo, journal) = setup(3, Duration::from_secs(5));

    let (t1, e1) = append_sync(&limbo, 1, 10);
    let (t2, e2) = append_sync(&limbo, 2, 15);
    let (_t3, e3) = append_sync(&limbo, 3, 20);

    limbo.force_empty(15);

    assert!(e1.is_commit() && e2.is_commit());
    assert!(e3.is_rollback());
    assert!(limbo.is_empty());
    assert_eq!(limbo.origin_id(), PEER_ID_NIL);
    assert!(t1.is_done() && t2.is_done());
    assert_eq!(
        journal.rows(),
        vec![
            SynchroRecord::confirm(1, 15),
            SynchroRecord::rollback(1, 20),
        ]
    );
}

#[test]
fn test_force_empty_with_nothing_beyond_writes_no_rollback() {
    let (limbo, journal) = setup(3, Duration::from_secs(5));

    let (_t1, e1) = append_sync(&limbo, 1, 10);
    limbo.force_empty(50);

    assert!(e1.is_commit());
    assert!(limbo.is_empty());
    let rows = journal.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, SynchroKind::Confirm);
}

#[test]
fn test_rollback_rows_follow_confirm_rows() {
    let (limbo, journal) = setup(2, Duration::from_millis(150));

    // First round confirms at 10
    let (_t1, e1) = append_sync(&limbo, 1, 10);
    limbo.ack(1, 10);
    limbo.ack(2, 10);
    assert!(e1.is_commit());

    // Second round starves and rolls back at 20
    let (_t2, e2) = append_sync(&limbo, 2, 20);
    limbo.ack(1, 20);
    match limbo.wait_complete(&e2) {
        Err(LimboError::QuorumTimeout) => {}
        other => panic!("Expected QuorumTimeout, got {:?}", other),
    }

    let rows = journal.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], SynchroRecord::confirm(1, 10));
    assert_eq!(rows[1], SynchroRecord::rollback(1, 20));
    assert!(rows[1].lsn > rows[0].lsn);
}

#[test]
fn test_wait_last_confirm_reports_a_rollback() {
    let (limbo, _journal) = setup(3, Duration::from_secs(5));

    let (_t1, e1) = append_sync(&limbo, 1, 10);
    let waiter = {
        let limbo = Arc::clone(&limbo);
        thread::spawn(move || limbo.wait_last_confirm())
    };
    thread::sleep(Duration::from_millis(50));
    limbo.read_rollback(10);

    match waiter.join().unwrap() {
        Err(LimboError::SyncRollback) => {}
        other => panic!("Expected SyncRollback, got {:?}", other),
    }
    assert!(e1.is_rollback());
}

#[test]
fn test_shrinking_the_timeout_wakes_a_sleeping_submitter() {
    let (limbo, journal) = setup(3, Duration::from_secs(30));

    let (_t1, e1) = append_sync(&limbo, 1, 10);
    let waiter = {
        let limbo = Arc::clone(&limbo);
        let entry = Arc::clone(&e1);
        thread::spawn(move || limbo.wait_complete(&entry))
    };

    // Let the waiter pass its deadline under the new, far shorter value
    thread::sleep(Duration::from_millis(200));
    limbo.set_synchro_timeout(Duration::from_millis(100));

    match waiter.join().unwrap() {
        Err(LimboError::QuorumTimeout) => {}
        other => panic!("Expected QuorumTimeout, got {:?}", other),
    }
    assert!(e1.is_rollback());
    assert_eq!(journal.rows(), vec![SynchroRecord::rollback(1, 10)]);
}

#[test]
fn test_quorum_shrink_confirms_waiting_entries() {
    let (limbo, journal) = setup(3, Duration::from_secs(5));

    let (t1, e1) = append_sync(&limbo, 1, 10);
    limbo.ack(1, 10);
    limbo.ack(2, 10);
    assert!(!e1.is_complete());

    let waiter = {
        let limbo = Arc::clone(&limbo);
        let entry = Arc::clone(&e1);
        thread::spawn(move || limbo.wait_complete(&entry))
    };
    thread::sleep(Duration::from_millis(50));
    limbo.set_synchro_quorum(2);

    waiter.join().unwrap().unwrap();
    assert!(e1.is_commit());
    assert!(t1.is_done());
    assert_eq!(journal.rows(), vec![SynchroRecord::confirm(1, 10)]);
}
