//! `TransactionBuilder` accumulates one in-progress transaction's
//! actions and emits `LOG_START`, the action bodies, and `LOG_END`
//! atomically with respect to the log stream.
//!
//! Each `log_*` call both appends its record to the current segment and
//! applies the action directly to the live catalog/sequence-store/column
//! store, through the same [`crate::apply::apply_action`] the
//! [`crate::replay::Replayer`] uses. `commit()` therefore only ever fails
//! on the durability barrier — it returns an error iff the flush fails;
//! a `Duplicate` or `NotFound` surfaces immediately from the `log_*`
//! call that triggered it. An aborted transaction's in-memory effects
//! are **not** rolled back here: only a future replay, driven by the
//! `LOG_END(id != tid)` marker, discards them.

use crate::apply::apply_action;
use crate::catalog::Catalog;
use crate::codec::record::LogRecord;
use crate::config::WalConfig;
use crate::error::WalError;
use crate::log_stream::LogStream;
use crate::replay::Action;
use crate::sequence::SequenceStore;
use crate::store::ColumnStore;
use crate::types::{ColumnType, ObjectId, Tid, TypeRegistry};
use crate::value::AtomValue;

/// One open transaction, borrowing every piece of `Wal` state it needs
/// to mutate. Only one can exist at a time, matching the single-writer
/// concurrency model.
pub struct TransactionBuilder<'a> {
    registry: &'a TypeRegistry,
    config: &'a WalConfig,
    log: &'a mut LogStream,
    catalog: &'a mut Catalog,
    sequences: &'a mut SequenceStore,
    store: &'a mut dyn ColumnStore,
    saved_tid: &'a mut Tid,
    poisoned: &'a mut Option<String>,
    tid: Tid,
    commit_ts: i64,
    disabled: bool,
    finished: bool,
}

impl<'a> TransactionBuilder<'a> {
    /// Begin a new transaction. Assigns `tid = ++*current_tid` and writes
    /// `LOG_START(id=tid, commit_ts)` unless `disabled`. `flush_now`
    /// forces a segment rotation first, for a clean-rollover mode used at
    /// known-idle moments; otherwise a rotation happens only if the current segment is past
    /// its soft cap.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        current_tid: &mut Tid,
        saved_tid: &'a mut Tid,
        poisoned: &'a mut Option<String>,
        commit_ts: i64,
        disabled: bool,
        flush_now: bool,
        registry: &'a TypeRegistry,
        config: &'a WalConfig,
        log: &'a mut LogStream,
        catalog: &'a mut Catalog,
        sequences: &'a mut SequenceStore,
        store: &'a mut dyn ColumnStore,
    ) -> Result<Self, WalError> {
        *current_tid += 1;
        let tid = *current_tid;

        if !disabled {
            if flush_now || log.should_rotate(config) {
                if let Err(e) = log.rotate(config) {
                    if e.poisons() {
                        *poisoned = Some(e.to_string());
                    }
                    return Err(e);
                }
            }
            let bytes = LogRecord::Start { tid, commit_ts }.to_bytes(registry)?;
            if let Err(e) = log.append(config, &bytes) {
                if e.poisons() {
                    *poisoned = Some(e.to_string());
                }
                return Err(e);
            }
        }

        Ok(TransactionBuilder {
            registry,
            config,
            log,
            catalog,
            sequences,
            store,
            saved_tid,
            poisoned,
            tid,
            commit_ts,
            disabled,
            finished: false,
        })
    }

    /// The tid this builder was assigned.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    fn write_and_apply(&mut self, record: LogRecord, action: Action) -> Result<(), WalError> {
        if self.disabled {
            return Ok(());
        }
        let bytes = record.to_bytes(self.registry)?;
        if let Err(e) = self.log.append(self.config, &bytes) {
            self.poison_on(&e);
            return Err(e);
        }
        apply_action(self.tid, &action, self.catalog, self.sequences, self.store).map_err(|e| {
            self.poison_on(&e);
            e
        })
    }

    fn poison_on(&mut self, e: &WalError) {
        if e.poisons() {
            *self.poisoned = Some(e.to_string());
        }
    }

    /// `LOG_CREATE(object_id, type)`.
    pub fn log_create(&mut self, object_id: ObjectId, ty: ColumnType) -> Result<(), WalError> {
        if self.disabled {
            return Ok(());
        }
        let type_id = self
            .registry
            .external_id(ty)
            .ok_or(WalError::UnknownType(0))?;
        self.write_and_apply(
            LogRecord::Create { object_id, type_id },
            Action::Create { object_id, type_id },
        )
    }

    /// `LOG_DESTROY(object_id)`.
    pub fn log_destroy(&mut self, object_id: ObjectId) -> Result<(), WalError> {
        self.write_and_apply(
            LogRecord::Destroy { object_id },
            Action::Destroy { object_id },
        )
    }

    /// `LOG_CLEAR(object_id)`.
    pub fn log_clear(&mut self, object_id: ObjectId) -> Result<(), WalError> {
        self.write_and_apply(LogRecord::Clear { object_id }, Action::Clear { object_id })
    }

    /// `LOG_SEQ(key, value)`.
    pub fn log_sequence(&mut self, key: i32, value: i64) -> Result<(), WalError> {
        self.write_and_apply(LogRecord::Seq { key, value }, Action::Seq { key, value })
    }

    /// `LOG_UPDATE_CONST(object_id, count, type, offset, value)`: write
    /// `value` to `count` consecutive positions starting at `offset`.
    pub fn log_const(
        &mut self,
        object_id: ObjectId,
        offset: i64,
        count: i64,
        value: AtomValue,
    ) -> Result<(), WalError> {
        self.write_and_apply(
            LogRecord::UpdateConst {
                object_id,
                count,
                offset,
                value: value.clone(),
            },
            Action::UpdateConst {
                object_id,
                count,
                offset,
                value,
            },
        )
    }

    /// `LOG_UPDATE_BULK(object_id, count, type, offset, values)`: append
    /// `values` starting at `offset`.
    pub fn log_bulk(
        &mut self,
        object_id: ObjectId,
        offset: i64,
        values: Vec<AtomValue>,
    ) -> Result<(), WalError> {
        self.write_and_apply(
            LogRecord::UpdateBulk {
                object_id,
                offset,
                values: values.clone(),
            },
            Action::UpdateBulk {
                object_id,
                offset,
                values,
            },
        )
    }

    /// `LOG_UPDATE(object_id, count, type, oids, values)`: write `values`
    /// at the explicit positions `oids`.
    pub fn log_update(
        &mut self,
        object_id: ObjectId,
        oids: Vec<i64>,
        values: Vec<AtomValue>,
    ) -> Result<(), WalError> {
        self.write_and_apply(
            LogRecord::Update {
                object_id,
                oids: oids.clone(),
                values: values.clone(),
            },
            Action::Update {
                object_id,
                oids,
                values,
            },
        )
    }

    /// Commit: write `LOG_END(id=tid)` and flush. The only failure mode
    /// is the durability barrier — every `log_*` call above has already
    /// surfaced any catalog/store error by the time `commit` runs.
    pub fn commit(mut self) -> Result<(), WalError> {
        self.finished = true;
        if self.disabled {
            *self.saved_tid = self.tid;
            return Ok(());
        }
        let bytes = LogRecord::End { id: self.tid }.to_bytes(self.registry)?;
        if let Err(e) = self.log.append(self.config, &bytes) {
            self.poison_on(&e);
            return Err(e);
        }
        if let Err(e) = self.log.flush() {
            // A failed fsync is the canonical poisoning error: the
            // caller cannot tell whether the bytes already on disk are
            // durable, so every further call on this instance must fail
            // fast rather than build on an uncertain durability barrier.
            self.poison_on(&e);
            return Err(e);
        }
        self.log.record_commit(self.tid, self.commit_ts);
        *self.saved_tid = self.tid;
        Ok(())
    }

    /// Abort: write `LOG_END(id != tid)` and flush. In-memory effects
    /// already applied by `log_*` calls are left in place — the WAL does
    /// not roll them back; only a future replay discards them, driven by
    /// the mismatched id.
    pub fn abort(mut self) -> Result<(), WalError> {
        self.finished = true;
        if self.disabled {
            return Ok(());
        }
        let abort_id = if self.tid == 0 { 1 } else { 0 };
        let bytes = LogRecord::End { id: abort_id }.to_bytes(self.registry)?;
        if let Err(e) = self.log.append(self.config, &bytes) {
            self.poison_on(&e);
            return Err(e);
        }
        self.log.flush().map_err(|e| {
            self.poison_on(&e);
            e
        })
    }
}

impl<'a> Drop for TransactionBuilder<'a> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                tid = self.tid,
                "TransactionBuilder dropped without commit() or abort()"
            );
        }
    }
}
