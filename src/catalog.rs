//! The catalog: `object_id -> bid` mapping with tombstone-based logical
//! deletion.
//!
//! Modeled as parallel columns — a value column alongside a tombstone
//! column — rather than as a single `HashMap<ObjectId, Row>`: deletion
//! only ever marks a row, it never removes it until compaction runs, so
//! the row's position is meaningful on its own (it is exactly what the
//! tombstone column references).

use std::collections::HashMap;

use crate::error::WalError;
use crate::store::ColumnStore;
use crate::types::{Bid, ObjectId, Tid};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    bid: Bid,
    object_id: ObjectId,
    row_count: i64,
    /// `None` while live. `Some(tid)` once `del_bat` logically removed it;
    /// the row survives until a checkpoint with `saved_tid >= tid`.
    last_tid: Option<Tid>,
}

/// In-memory reconstruction of the catalog, rebuilt by replaying
/// `LOG_CREATE`/`LOG_DESTROY`/`LOG_CLEAR` and kept live by
/// `TransactionBuilder` during normal operation.
#[derive(Debug, Default)]
pub struct Catalog {
    rows: Vec<Row>,
    by_object_id: HashMap<ObjectId, usize>,
    by_bid: HashMap<Bid, usize>,
}

impl Catalog {
    /// An empty catalog, as seen before any segment has been replayed.
    pub fn new() -> Self {
        Catalog::default()
    }

    /// `O(1)` lookup of the live `bid` for `object_id`, masked by
    /// tombstones: a condemned row (`last_tid` set) is invisible here
    /// even though it still occupies a slot until compaction.
    pub fn find_bat(&self, object_id: ObjectId) -> Option<Bid> {
        self.by_object_id.get(&object_id).map(|&i| self.rows[i].bid)
    }

    /// Register a new live entry. Fails with `Duplicate` if `object_id`
    /// already has a live row — the caller must `del_bat` first.
    pub fn add_bat(&mut self, bid: Bid, object_id: ObjectId) -> Result<(), WalError> {
        if self.by_object_id.contains_key(&object_id) {
            return Err(WalError::Duplicate(object_id));
        }
        let idx = self.rows.len();
        self.rows.push(Row {
            bid,
            object_id,
            row_count: 0,
            last_tid: None,
        });
        self.by_object_id.insert(object_id, idx);
        self.by_bid.insert(bid, idx);
        Ok(())
    }

    /// Mark the row for `bid` condemned at `tid`. The row keeps its slot
    /// (and the store keeps its reference) until a checkpoint compacts
    /// it away.
    pub fn del_bat(&mut self, bid: Bid, tid: Tid) -> Result<(), WalError> {
        let idx = *self.by_bid.get(&bid).ok_or(WalError::NotFound(bid))?;
        let row = &mut self.rows[idx];
        self.by_object_id.remove(&row.object_id);
        row.last_tid = Some(tid);
        Ok(())
    }

    /// Only ever raises the cached row count; a recovered prefix of a
    /// bulk update transaction must never undercount relative to a
    /// count seen by an earlier, since-superseded replay pass.
    pub fn update_row_count(&mut self, object_id: ObjectId, n: i64) -> Result<(), WalError> {
        let idx = *self
            .by_object_id
            .get(&object_id)
            .ok_or(WalError::NotFound(object_id))?;
        let row = &mut self.rows[idx];
        if n > row.row_count {
            row.row_count = n;
        }
        Ok(())
    }

    /// Cached row count for a live object, if any.
    pub fn row_count(&self, object_id: ObjectId) -> Option<i64> {
        self.by_object_id.get(&object_id).map(|&i| self.rows[i].row_count)
    }

    /// Every live `bid`, for the checkpointer's sub-commit set.
    pub fn live_bids(&self) -> impl Iterator<Item = (Bid, i64)> + '_ {
        self.rows
            .iter()
            .filter(|r| r.last_tid.is_none())
            .map(|r| (r.bid, r.row_count))
    }

    /// Every live row as `(bid, object_id, row_count)`. This is what the
    /// checkpointer hands the store to persist as the catalog's own
    /// "BAT" content — the catalog is stored recursively in the same
    /// column store it manages — so that a restart can reconstruct live
    /// rows whose originating `LOG_CREATE` lived in a segment a prior
    /// checkpoint already reclaimed.
    pub fn live_rows(&self) -> impl Iterator<Item = (Bid, ObjectId, i64)> + '_ {
        self.rows
            .iter()
            .filter(|r| r.last_tid.is_none())
            .map(|r| (r.bid, r.object_id, r.row_count))
    }

    /// Rebuild a catalog from a store-persisted snapshot of live rows.
    /// Every row is live by construction: the snapshot is taken from
    /// [`Catalog::live_rows`], which never includes a condemned row.
    pub fn from_persisted_rows(rows: &[(Bid, ObjectId, i64)]) -> Self {
        let mut catalog = Catalog::new();
        for &(bid, object_id, row_count) in rows {
            let idx = catalog.rows.len();
            catalog.rows.push(Row {
                bid,
                object_id,
                row_count,
                last_tid: None,
            });
            catalog.by_object_id.insert(object_id, idx);
            catalog.by_bid.insert(bid, idx);
        }
        catalog
    }

    /// Physically drop every row condemned at or before `saved_tid`,
    /// releasing its store reference. Returns the released bids so the
    /// caller can log what was reclaimed.
    pub fn compact(&mut self, saved_tid: Tid, store: &mut dyn ColumnStore) -> Result<Vec<Bid>, WalError> {
        let mut released = Vec::new();
        let mut kept = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            match row.last_tid {
                Some(last_tid) if last_tid <= saved_tid => {
                    store.release(row.bid)?;
                    released.push(row.bid);
                }
                _ => kept.push(row),
            }
        }
        self.rows = kept;
        self.rebuild_indexes();
        Ok(released)
    }

    fn rebuild_indexes(&mut self) {
        self.by_object_id.clear();
        self.by_bid.clear();
        for (idx, row) in self.rows.iter().enumerate() {
            self.by_bid.insert(row.bid, idx);
            if row.last_tid.is_none() {
                self.by_object_id.insert(row.object_id, idx);
            }
        }
    }

    /// Number of condemned rows still awaiting compaction.
    pub fn tombstone_count(&self) -> usize {
        self.rows.iter().filter(|r| r.last_tid.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn add_then_find_roundtrips() {
        let mut cat = Catalog::new();
        cat.add_bat(1, 7).unwrap();
        assert_eq!(cat.find_bat(7), Some(1));
    }

    #[test]
    fn add_bat_duplicate_object_id_fails() {
        let mut cat = Catalog::new();
        cat.add_bat(1, 7).unwrap();
        let err = cat.add_bat(2, 7).unwrap_err();
        assert!(matches!(err, WalError::Duplicate(7)));
    }

    #[test]
    fn del_bat_hides_object_id_but_keeps_row_until_compaction() {
        let mut cat = Catalog::new();
        cat.add_bat(1, 7).unwrap();
        cat.del_bat(1, 5).unwrap();
        assert_eq!(cat.find_bat(7), None);
        assert_eq!(cat.tombstone_count(), 1);
    }

    #[test]
    fn update_row_count_never_decreases() {
        let mut cat = Catalog::new();
        cat.add_bat(1, 7).unwrap();
        cat.update_row_count(7, 10).unwrap();
        cat.update_row_count(7, 3).unwrap();
        assert_eq!(cat.row_count(7), Some(10));
        cat.update_row_count(7, 20).unwrap();
        assert_eq!(cat.row_count(7), Some(20));
    }

    #[test]
    fn compact_releases_only_condemned_rows_at_or_before_watermark() {
        let mut cat = Catalog::new();
        cat.add_bat(1, 7).unwrap();
        cat.add_bat(2, 8).unwrap();
        cat.del_bat(1, 5).unwrap();
        cat.del_bat(2, 50).unwrap();

        let mut store = MemStore::new();
        store.open(1).unwrap();
        store.open(2).unwrap();

        let released = cat.compact(10, &mut store).unwrap();
        assert_eq!(released, vec![1]);
        assert_eq!(cat.tombstone_count(), 1);
    }

    #[test]
    fn del_bat_unknown_bid_is_not_found() {
        let mut cat = Catalog::new();
        let err = cat.del_bat(99, 1).unwrap_err();
        assert!(matches!(err, WalError::NotFound(99)));
    }
}
