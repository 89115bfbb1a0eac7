//! Error taxonomy for the WAL and catalog subsystem.
//!
//! Every fallible operation in this crate returns a `WalError`. Recovery
//! recovers locally only from [`WalError::ShortRead`]; every other variant
//! unwinds to the top of recovery or to [`crate::transaction::TransactionBuilder::commit`].
//! Nothing is swallowed along the way.

use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WalError>;

/// Error kinds produced by the WAL core.
///
/// Propagation policy: everything but `ShortRead` is fatal to the
/// operation in progress.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// End-of-segment reached mid-record. Recovered locally by the
    /// `Replayer`: the segment is closed and its still-open transactions
    /// are aborted.
    #[error("short read: segment ended mid-record at offset {offset}")]
    ShortRead {
        /// Byte offset at which the read ran out of data.
        offset: u64,
    },

    /// Bad byte-order mark, unexpected version stamp, or an unparsable
    /// type row in the header file. Fatal to the segment/header.
    #[error("corrupt header: {reason}")]
    CorruptHeader {
        /// Human-readable description of what failed to parse.
        reason: String,
    },

    /// A record referenced an external type id that is no longer present
    /// in the type registry, or a reserved tag that is never valid
    /// (e.g. the legacy packed multi-column row insert).
    #[error("unknown type id {0}")]
    UnknownType(i8),

    /// An atom or count exceeded what the wire format can represent.
    #[error("value too large: {0}")]
    ValueTooLarge(String),

    /// `add_bat` called for an `object_id` that already has a live
    /// catalog entry.
    #[error("object {0} already has a live catalog entry")]
    Duplicate(i32),

    /// Operation referenced an `object_id` with no live catalog entry.
    #[error("no live catalog entry for object {0}")]
    NotFound(i32),

    /// Underlying filesystem failure. Fatal: on a write this poisons the
    /// WAL instance; on a read during recovery it aborts recovery.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The column store collaborator failed a `sub_commit`, `open`,
    /// `close`, `retain` or `release` call. Treated identically to
    /// `Io`.
    #[error("store error: {0}")]
    Store(String),

    /// Raised instead of attempting an operation on a `Wal` that a prior
    /// `Io` or `Store` failure already poisoned. Carries the poisoning
    /// error's message for the caller's log.
    #[error("wal instance poisoned by a prior fatal error: {0}")]
    Poisoned(String),
}

impl WalError {
    /// True for the one error kind the `Replayer` recovers from locally.
    pub fn is_short_read(&self) -> bool {
        matches!(self, WalError::ShortRead { .. })
    }

    /// True for errors that poison the instance: every further call must
    /// fail fast rather than attempt to make progress.
    pub fn is_fatal(&self) -> bool {
        !self.is_short_read()
    }

    /// True for the subset of fatal errors that poison a `Wal` instance:
    /// a failed durability barrier or a store collaborator that can no
    /// longer be trusted. Narrower than `is_fatal` — a `Duplicate` or
    /// `NotFound` is fatal to the transaction that raised it but says
    /// nothing about the state of the log or store, so it does not
    /// poison the instance.
    pub fn poisons(&self) -> bool {
        matches!(self, WalError::Io(_) | WalError::Store(_))
    }
}
