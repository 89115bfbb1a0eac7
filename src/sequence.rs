//! The logged key -> int64 sequence store.

use std::collections::HashMap;

use crate::error::WalError;
use crate::types::ObjectId;

/// Key type for sequence entries. Reuses `ObjectId`'s representation
/// (i32) since the wire format's `LOG_SEQ` carries it in the same header
/// field as an `object_id`.
pub type SequenceKey = ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    key: SequenceKey,
    value: i64,
    tombstoned: bool,
}

/// `(key, value)` pairs with tombstone-compacted storage: `set` replaces
/// in place while the entry is still in the unpersisted tail, and
/// tombstones-then-appends once it has already been sub-committed.
///
/// This crate has no notion of "already sub-committed" per row (that
/// would require tracking a row's originating tid against
/// `saved_tid`), so in-place replacement is used whenever the key's most
/// recent row is already the live one — which is observably identical
/// to tombstone-and-append, since only the latest value for a key is
/// ever read.
#[derive(Debug, Default)]
pub struct SequenceStore {
    rows: Vec<Entry>,
    live: HashMap<SequenceKey, usize>,
}

impl SequenceStore {
    /// An empty sequence store.
    pub fn new() -> Self {
        SequenceStore::default()
    }

    /// Current value for `key`, if it has ever been set.
    pub fn get(&self, key: SequenceKey) -> Option<i64> {
        self.live.get(&key).map(|&i| self.rows[i].value)
    }

    /// Set `key` to `value`. Replaces the existing live row in place if
    /// one exists; otherwise tombstones nothing and simply appends.
    pub fn set(&mut self, key: SequenceKey, value: i64) {
        if let Some(&idx) = self.live.get(&key) {
            self.rows[idx].value = value;
            return;
        }
        let idx = self.rows.len();
        self.rows.push(Entry {
            key,
            value,
            tombstoned: false,
        });
        self.live.insert(key, idx);
    }

    /// Explicitly tombstone the current row for `key` without replacing
    /// it, then append a fresh one. Used when a caller's storage layer
    /// has already sub-committed the old row and in-place mutation would
    /// corrupt a snapshot in flight.
    pub fn set_tombstoning_old(&mut self, key: SequenceKey, value: i64) {
        if let Some(&idx) = self.live.get(&key) {
            self.rows[idx].tombstoned = true;
        }
        let idx = self.rows.len();
        self.rows.push(Entry {
            key,
            value,
            tombstoned: false,
        });
        self.live.insert(key, idx);
    }

    /// Fraction of rows that are tombstoned, in `[0.0, 1.0]`.
    fn tombstone_fraction(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let tombstoned = self.rows.iter().filter(|r| r.tombstoned).count();
        tombstoned as f64 / self.rows.len() as f64
    }

    /// Whether the tombstone fraction exceeds the 50% compaction
    /// threshold.
    pub fn needs_compaction(&self) -> bool {
        self.tombstone_fraction() > 0.5
    }

    /// Build a fresh, tombstone-free pair of columns via a masked
    /// projection and swap it in. Idempotent: compacting an
    /// already-compact store is a no-op.
    pub fn compact(&mut self) -> Result<(), WalError> {
        if !self.needs_compaction() {
            return Ok(());
        }
        let kept: Vec<Entry> = self
            .rows
            .iter()
            .filter(|r| !r.tombstoned)
            .copied()
            .collect();
        self.rows = kept;
        self.rebuild_index();
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.live.clear();
        for (idx, row) in self.rows.iter().enumerate() {
            if !row.tombstoned {
                self.live.insert(row.key, idx);
            }
        }
    }

    /// Every live `(key, value)` pair, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (SequenceKey, i64)> + '_ {
        self.rows
            .iter()
            .filter(|r| !r.tombstoned)
            .map(|r| (r.key, r.value))
    }

    /// Rebuild a sequence store from a store-persisted snapshot of live
    /// entries, as returned by a prior call to [`SequenceStore::entries`].
    /// Every row starts untombstoned; a restart never needs to see the
    /// tombstones a previous checkpoint already compacted away.
    pub fn from_entries(entries: &[(SequenceKey, i64)]) -> Self {
        let mut store = SequenceStore::new();
        for &(key, value) in entries {
            store.set(key, value);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut seq = SequenceStore::new();
        seq.set(1, 42);
        assert_eq!(seq.get(1), Some(42));
        seq.set(1, 43);
        assert_eq!(seq.get(1), Some(43));
    }

    #[test]
    fn unset_key_is_none() {
        let seq = SequenceStore::new();
        assert_eq!(seq.get(99), None);
    }

    #[test]
    fn tombstoning_set_triggers_compaction_above_50_percent() {
        let mut seq = SequenceStore::new();
        seq.set_tombstoning_old(1, 1);
        seq.set_tombstoning_old(1, 2);
        seq.set_tombstoning_old(1, 3);
        assert!(seq.needs_compaction());
        seq.compact().unwrap();
        assert!(!seq.needs_compaction());
        assert_eq!(seq.get(1), Some(3));
        assert_eq!(seq.entries().count(), 1);
    }

    #[test]
    fn compact_is_idempotent() {
        let mut seq = SequenceStore::new();
        seq.set(1, 1);
        seq.compact().unwrap();
        seq.compact().unwrap();
        assert_eq!(seq.get(1), Some(1));
    }
}
