//! Journal bridge - the submit/acknowledge contract for synchro rows
//!
//! The limbo persists its CONFIRM/ROLLBACK decisions through this
//! interface. A row is submitted for asynchronous durability together with
//! a per-submission responder channel; the journal answers with a signed
//! result, negative on failure. Each submission gets its own responder, so
//! a suspended writer is woken individually by its own completion.
//!
//! [`FileJournal`] is the bundled implementation: a dedicated worker
//! thread appends length-prefixed bincode rows to a file and fsyncs before
//! acknowledging. Rows that arrive back through replication or recovery
//! can be read with [`read_records`] and fed to the limbo's
//! `read_confirm`/`read_rollback`.

pub mod record;

pub use record::{SynchroKind, SynchroRecord};

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};

use crate::error::{LimboError, Result};

/// Signed result delivered on a submission's responder when the write
/// failed before reaching the journal file.
pub const JOURNAL_WRITE_FAILED: i64 = -1;

/// Interface the limbo writes synchro rows through
pub trait Journal: Send + Sync {
    /// Submit one row for asynchronous durability. The signed result is
    /// delivered on `responder`: the row's position on success, negative
    /// on failure.
    fn submit(&self, record: SynchroRecord, responder: SyncSender<i64>) -> Result<()>;
}

/// A request to persist one synchro row
pub struct JournalWriteRequest {
    pub record: SynchroRecord,
    pub responder: SyncSender<i64>,
}

/// Control messages for the journal worker thread
pub enum JournalMessage {
    /// Normal write request
    Write(JournalWriteRequest),
    /// Shutdown the worker
    Shutdown,
}

/// File-backed journal: one worker thread owning the file handle
pub struct FileJournal {
    sender: SyncSender<JournalMessage>,
}

impl FileJournal {
    /// Open (or create) the journal file and spawn the worker thread
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::sync_channel::<JournalMessage>(1024);
        std::thread::spawn(move || journal_worker_thread(file, rx));
        Ok(Self { sender: tx })
    }

    /// Ask the worker to exit once queued writes are drained
    pub fn shutdown(&self) {
        let _ = self.sender.send(JournalMessage::Shutdown);
    }
}

impl Journal for FileJournal {
    fn submit(&self, record: SynchroRecord, responder: SyncSender<i64>) -> Result<()> {
        self.sender
            .send(JournalMessage::Write(JournalWriteRequest { record, responder }))
            .map_err(|e| LimboError::LogIo(format!("journal worker channel closed: {}", e)))
    }
}

fn journal_worker_thread(mut file: File, rx: mpsc::Receiver<JournalMessage>) {
    loop {
        match rx.recv() {
            Ok(JournalMessage::Write(req)) => {
                let result = match write_record(&mut file, &req.record) {
                    Ok(()) => req.record.lsn,
                    Err(e) => {
                        log::error!(
                            "journal write of {}({}) failed: {}",
                            req.record.kind,
                            req.record.lsn,
                            e
                        );
                        JOURNAL_WRITE_FAILED
                    }
                };
                // The submitter may have given up on the wait already
                let _ = req.responder.send(result);
            }
            Ok(JournalMessage::Shutdown) | Err(_) => {
                log::info!("journal worker shutting down");
                break;
            }
        }
    }
}

/// Write one row: 4-byte little-endian length prefix, then the bincode
/// payload, fsynced before returning.
fn write_record(file: &mut File, record: &SynchroRecord) -> Result<()> {
    let encoded =
        bincode::serialize(record).map_err(|e| LimboError::LogIo(e.to_string()))?;
    let len = encoded.len() as u32;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(&encoded)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Read rows back from a journal file. A truncated tail (partial length
/// prefix or payload) ends the scan; malformed payloads are skipped.
pub fn read_records(path: &Path) -> Result<Vec<SynchroRecord>> {
    let mut records = Vec::new();
    if !path.exists() {
        return Ok(records);
    }
    let mut file = File::open(path)?;
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut record_buf = vec![0u8; len];
        match file.read_exact(&mut record_buf) {
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        match bincode::deserialize::<SynchroRecord>(&record_buf) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!("Skipping malformed journal row: {}", e);
            }
        }
    }
    Ok(records)
}
