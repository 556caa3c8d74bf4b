//! Core identifier types shared across the crate

/// Log sequence number. Journal positions are strictly positive; the limbo
/// uses [`LSN_UNASSIGNED`] for an entry whose local write is still in flight.
pub type Lsn = i64;

/// Replica identifier. Real replicas carry non-zero ids; zero is reserved
/// (see [`PEER_ID_NIL`]).
pub type PeerId = u32;

/// Transaction ID
pub type TxnId = u64;

/// Position of an entry that has not been written to the local journal yet.
pub const LSN_UNASSIGNED: Lsn = -1;

/// Nil replica id. As a queue origin it means "no origin adopted"; as an
/// argument to `append` it means "substitute the local replica id".
pub const PEER_ID_NIL: PeerId = 0;
