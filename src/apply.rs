//! Applies one decoded [`Action`] to the catalog, sequence store, and
//! column store collaborator.
//!
//! Shared between `TransactionBuilder::commit` (applying a freshly
//! buffered, just-logged transaction) and `Replayer` (applying a
//! transaction recovered from disk) so the two code paths can never
//! silently drift apart on what a given action means.
//!
//! `bid == object_id` at creation time: the wire format's `LOG_CREATE`
//! carries only `object_id` and a type, so the column's physical
//! identifier starts out equal to its logical one. The catalog and
//! `Action` model still keep the two fields distinct so that a future
//! compaction pass could renumber a `bid` without touching any logged
//! `object_id`, even though this crate's `Catalog::compact` only removes
//! rows today and never reassigns a surviving one's `bid`.

use crate::catalog::Catalog;
use crate::error::WalError;
use crate::replay::Action;
use crate::sequence::SequenceStore;
use crate::store::ColumnStore;
use crate::types::Tid;

/// Apply one committed action. `tid` is the owning transaction's id,
/// used to stamp `del_bat`'s tombstone.
pub fn apply_action(
    tid: Tid,
    action: &Action,
    catalog: &mut Catalog,
    sequences: &mut SequenceStore,
    store: &mut dyn ColumnStore,
) -> Result<(), WalError> {
    match action {
        Action::Create { object_id, .. } => {
            store.open(*object_id)?;
            catalog.add_bat(*object_id, *object_id)?;
        }
        Action::Destroy { object_id } => {
            let bid = catalog
                .find_bat(*object_id)
                .ok_or(WalError::NotFound(*object_id))?;
            catalog.del_bat(bid, tid)?;
        }
        Action::Clear { object_id } => {
            let bid = catalog
                .find_bat(*object_id)
                .ok_or(WalError::NotFound(*object_id))?;
            store.clear(bid)?;
        }
        Action::Seq { key, value } => {
            sequences.set(*key, *value);
        }
        Action::UpdateConst {
            object_id,
            count,
            offset,
            value,
        } => {
            let bid = catalog
                .find_bat(*object_id)
                .ok_or(WalError::NotFound(*object_id))?;
            store.write_const(bid, *offset, *count, value)?;
            catalog.update_row_count(*object_id, offset + count)?;
        }
        Action::UpdateBulk {
            object_id,
            offset,
            values,
        } => {
            let bid = catalog
                .find_bat(*object_id)
                .ok_or(WalError::NotFound(*object_id))?;
            store.write_bulk(bid, *offset, values)?;
            catalog.update_row_count(*object_id, offset + values.len() as i64)?;
        }
        Action::Update {
            object_id,
            oids,
            values,
        } => {
            let bid = catalog
                .find_bat(*object_id)
                .ok_or(WalError::NotFound(*object_id))?;
            store.write_at(bid, oids, values)?;
            if let Some(&max_oid) = oids.iter().max() {
                catalog.update_row_count(*object_id, max_oid + 1)?;
            }
        }
    }
    Ok(())
}

/// A [`crate::replay::ReplayTarget`] that applies directly into a live
/// catalog/sequence-store/column-store triple. Used both for normal
/// startup recovery and for the checkpointer's flushing-mode replay
/// (with a no-op store, see [`crate::checkpoint`]).
pub struct RecoveryTarget<'a> {
    pub catalog: &'a mut Catalog,
    pub sequences: &'a mut SequenceStore,
    pub store: &'a mut dyn ColumnStore,
    /// Highest tid whose `LOG_END` (commit) has been observed so far —
    /// seeded from a checkpoint snapshot's watermark when recovering from
    /// one, so `already_committed` can recognize a transaction replay is
    /// about to re-apply that the snapshot already reflects.
    pub saved_tid: Tid,
}

impl<'a> crate::replay::ReplayTarget for RecoveryTarget<'a> {
    fn apply(&mut self, tid: Tid, action: &Action) -> Result<(), WalError> {
        apply_action(tid, action, self.catalog, self.sequences, self.store)
    }

    fn note_commit(&mut self, tid: Tid, _commit_ts: i64) {
        if tid > self.saved_tid {
            self.saved_tid = tid;
        }
    }

    fn already_committed(&self, tid: Tid) -> bool {
        tid <= self.saved_tid
    }
}
