//! The column-store collaborator and an in-memory reference
//! implementation for tests.
//!
//! The WAL core never persists column data itself; it only logs and
//! replays operations against a store that implements this trait. Kept
//! as a plain trait object, one coarse seam, no generics leaking into
//! the rest of the crate.

use std::collections::HashMap;

use crate::error::WalError;
use crate::types::{Bid, LogId, ObjectId, Tid};
use crate::value::AtomValue;

/// Everything a restart needs from the store to resume without replaying
/// a single segment the last checkpoint already reclaimed: the
/// watermark, and the catalog/sequence snapshot that was live as of that
/// watermark. The catalog is stored recursively as BATs in the same
/// column store it manages, committed in a separate always-included
/// entry of every sub-commit set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryState {
    /// Last `log_id` folded into a `sub_commit`.
    pub log_id: LogId,
    /// Last `tid` folded into a `sub_commit`.
    pub tid: Tid,
    /// Catalog rows as of that `sub_commit`, as `(bid, object_id, row_count)`.
    pub catalog_rows: Vec<(Bid, ObjectId, i64)>,
    /// Sequence entries as of that `sub_commit`, as `(key, value)`.
    pub sequence_entries: Vec<(ObjectId, i64)>,
}

/// Operations the WAL core requires of the underlying column store.
pub trait ColumnStore {
    /// Open `bid` for reading/writing. Called before any mutation is
    /// replayed or applied against it for the first time in this
    /// process.
    fn open(&mut self, bid: Bid) -> Result<(), WalError>;

    /// Close a column that the catalog no longer references.
    fn close(&mut self, bid: Bid) -> Result<(), WalError>;

    /// Add one logical reference on behalf of the catalog.
    fn retain(&mut self, bid: Bid) -> Result<(), WalError>;

    /// Drop one logical reference. The store is free to reclaim the
    /// column once its reference count reaches zero.
    fn release(&mut self, bid: Bid) -> Result<(), WalError>;

    /// Atomically persist exactly `bids` (sized to `sizes`), the
    /// catalog's live rows and the sequence store's live entries as of
    /// this checkpoint, and record `(log_id, tid)` as the new recovery
    /// watermark. A store that cannot recompute its catalog from `bids`
    /// alone (e.g. one backed only by replay) must keep `catalog_rows`
    /// and `sequence_entries` around for [`ColumnStore::recovery_state`].
    #[allow(clippy::too_many_arguments)]
    fn sub_commit(
        &mut self,
        bids: &[Bid],
        sizes: &[i64],
        catalog_rows: &[(Bid, ObjectId, i64)],
        sequence_entries: &[(ObjectId, i64)],
        log_id: LogId,
        tid: Tid,
    ) -> Result<(), WalError>;

    /// The most recently sub-committed recovery state, if any. `Wal::open`
    /// uses this to seed the catalog and sequence store before replaying
    /// forward from `log_id + 1`, so that rows whose `LOG_CREATE` lived in
    /// a segment a prior checkpoint already unlinked are not lost.
    fn recovery_state(&self) -> Option<RecoveryState>;

    /// Write one constant value to `count` consecutive positions
    /// starting at `offset` (`LOG_UPDATE_CONST`).
    fn write_const(&mut self, bid: Bid, offset: i64, count: i64, value: &AtomValue) -> Result<(), WalError>;

    /// Append `values` starting at `offset` (`LOG_UPDATE_BULK`).
    fn write_bulk(&mut self, bid: Bid, offset: i64, values: &[AtomValue]) -> Result<(), WalError>;

    /// Write `values` at the explicit row positions `oids` (`LOG_UPDATE`).
    fn write_at(&mut self, bid: Bid, oids: &[i64], values: &[AtomValue]) -> Result<(), WalError>;

    /// Truncate the column in place (`LOG_CLEAR`).
    fn clear(&mut self, bid: Bid) -> Result<(), WalError>;
}

/// An in-memory `ColumnStore` used by tests in place of a real storage
/// engine.
#[derive(Debug, Default)]
pub struct MemStore {
    columns: HashMap<Bid, Vec<Option<AtomValue>>>,
    refcounts: HashMap<Bid, u32>,
    /// Watermark recorded by the last successful `sub_commit`.
    pub last_watermark: Option<(LogId, Tid)>,
    /// Bids included in the last successful `sub_commit`, for assertions.
    pub last_sub_commit_bids: Vec<Bid>,
    recovery_state: Option<RecoveryState>,
}

impl MemStore {
    /// An empty store.
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Snapshot of a column's contents, for test assertions.
    pub fn column(&self, bid: Bid) -> Option<&[Option<AtomValue>]> {
        self.columns.get(&bid).map(|v| v.as_slice())
    }

    /// Current reference count for `bid` (0 once fully released).
    pub fn refcount(&self, bid: Bid) -> u32 {
        *self.refcounts.get(&bid).unwrap_or(&0)
    }

    fn column_mut(&mut self, bid: Bid) -> &mut Vec<Option<AtomValue>> {
        self.columns.entry(bid).or_default()
    }
}

impl ColumnStore for MemStore {
    fn open(&mut self, bid: Bid) -> Result<(), WalError> {
        self.columns.entry(bid).or_default();
        *self.refcounts.entry(bid).or_insert(0) += 1;
        Ok(())
    }

    fn close(&mut self, bid: Bid) -> Result<(), WalError> {
        self.columns.remove(&bid);
        self.refcounts.remove(&bid);
        Ok(())
    }

    fn retain(&mut self, bid: Bid) -> Result<(), WalError> {
        *self.refcounts.entry(bid).or_insert(0) += 1;
        Ok(())
    }

    fn release(&mut self, bid: Bid) -> Result<(), WalError> {
        let count = self.refcounts.entry(bid).or_insert(0);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.columns.remove(&bid);
            self.refcounts.remove(&bid);
        }
        Ok(())
    }

    fn sub_commit(
        &mut self,
        bids: &[Bid],
        sizes: &[i64],
        catalog_rows: &[(Bid, ObjectId, i64)],
        sequence_entries: &[(ObjectId, i64)],
        log_id: LogId,
        tid: Tid,
    ) -> Result<(), WalError> {
        if bids.len() != sizes.len() {
            return Err(WalError::Store(
                "sub_commit bids/sizes length mismatch".to_string(),
            ));
        }
        for (&bid, &size) in bids.iter().zip(sizes) {
            let col = self.column_mut(bid);
            col.resize(size.max(0) as usize, None);
        }
        self.last_watermark = Some((log_id, tid));
        self.last_sub_commit_bids = bids.to_vec();
        self.recovery_state = Some(RecoveryState {
            log_id,
            tid,
            catalog_rows: catalog_rows.to_vec(),
            sequence_entries: sequence_entries.to_vec(),
        });
        Ok(())
    }

    fn recovery_state(&self) -> Option<RecoveryState> {
        self.recovery_state.clone()
    }

    fn write_const(&mut self, bid: Bid, offset: i64, count: i64, value: &AtomValue) -> Result<(), WalError> {
        let col = self.column_mut(bid);
        let start = offset.max(0) as usize;
        let end = start + count.max(0) as usize;
        if col.len() < end {
            col.resize(end, None);
        }
        for slot in &mut col[start..end] {
            *slot = Some(value.clone());
        }
        Ok(())
    }

    fn write_bulk(&mut self, bid: Bid, offset: i64, values: &[AtomValue]) -> Result<(), WalError> {
        let col = self.column_mut(bid);
        let start = offset.max(0) as usize;
        let end = start + values.len();
        if col.len() < end {
            col.resize(end, None);
        }
        for (slot, value) in col[start..end].iter_mut().zip(values) {
            *slot = Some(value.clone());
        }
        Ok(())
    }

    fn write_at(&mut self, bid: Bid, oids: &[i64], values: &[AtomValue]) -> Result<(), WalError> {
        if oids.len() != values.len() {
            return Err(WalError::Store(
                "write_at oids/values length mismatch".to_string(),
            ));
        }
        let col = self.column_mut(bid);
        for (&oid, value) in oids.iter().zip(values) {
            let pos = oid.max(0) as usize;
            if col.len() <= pos {
                col.resize(pos + 1, None);
            }
            col[pos] = Some(value.clone());
        }
        Ok(())
    }

    fn clear(&mut self, bid: Bid) -> Result<(), WalError> {
        self.column_mut(bid).clear();
        Ok(())
    }
}
