//! Error types for MiniSync
//!
//! Defines a unified error type covering queue admission, synchronous
//! waits and journal submission.

use std::fmt;
use std::io;

use crate::types::PeerId;

/// Unified error type for limbo operations
#[derive(Debug)]
pub enum LimboError {
    /// The queue already holds unconfirmed transactions from another origin
    ForeignSync {
        /// The origin the queue currently belongs to
        origin: PeerId,
    },
    /// Entry allocation failed during append
    OutOfMemory,
    /// A synchronous wait expired before the quorum was collected
    QuorumTimeout,
    /// The wait ended because the entry was rolled back
    SyncRollback,
    /// Submission of a CONFIRM/ROLLBACK row to the journal failed
    LogIo(String),
    /// I/O error (journal file operations)
    Io(io::Error),
}

impl fmt::Display for LimboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimboError::ForeignSync { origin } => write!(
                f,
                "queue holds unconfirmed synchronous transactions from replica {}",
                origin
            ),
            LimboError::OutOfMemory => write!(f, "out of memory while queueing a transaction"),
            LimboError::QuorumTimeout => write!(f, "quorum was not reached in time"),
            LimboError::SyncRollback => write!(f, "transaction was rolled back by the queue"),
            LimboError::LogIo(msg) => write!(f, "journal write failed: {}", msg),
            LimboError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LimboError {}

impl From<io::Error> for LimboError {
    fn from(e: io::Error) -> Self {
        LimboError::Io(e)
    }
}

/// Result type alias for limbo operations
pub type Result<T> = std::result::Result<T, LimboError>;
