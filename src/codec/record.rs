//! On-disk record format.
//!
//! Every record starts with a 5-byte header: `kind: u8` followed by
//! `id: i32`. `id` means different things depending on `kind` — the tid
//! for `LOG_START`/`LOG_END`, the `object_id` for the catalog and update
//! records, the sequence key for `LOG_SEQ` — but it is always present at
//! a fixed offset so a reader can always locate the next record's start
//! once it knows the current one's length.
//!
//! Tag numbers match the legacy on-disk numbering exactly (`LOG_START` =
//! 0 .. `LOG_CLEAR` = 8) so that upgraded logs and fresh logs share one
//! tag space. Tag 9 is reserved for the legacy packed multi-column row
//! insert (`LOG_ROW`); no writer in this crate ever emits it, and if the
//! `Replayer` or `LegacyUpgrader` ever reads it, decoding fails with
//! `WalError::UnknownType` rather than silently skipping it.

use crate::codec::cursor::{Reader, Writer};
use crate::error::WalError;
use crate::types::{ColumnType, ObjectId, Tid, TypeRegistry};
use crate::value::{decode_array, encode_array, AtomValue};

/// Byte-order mark written as the first two bytes of every segment.
/// `0x04D2` little-endian is 1234 decimal, matching the legacy format's
/// byte-order sentinel.
pub const BOM: u16 = 0x04D2;

/// On-disk record kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Begin a transaction.
    Start = 0,
    /// End a transaction (commit if `id == tid`, abort otherwise).
    End = 1,
    /// Write one constant atom to `count` consecutive positions.
    UpdateConst = 2,
    /// Append `count` atoms in bulk, starting at `offset`.
    UpdateBulk = 3,
    /// Write `count` atoms at `count` explicit row positions.
    Update = 4,
    /// Create a catalog entry for `object_id`.
    Create = 5,
    /// Destroy the catalog entry for `object_id`.
    Destroy = 6,
    /// Set a sequence value.
    Seq = 7,
    /// Truncate the column referenced by `object_id`.
    Clear = 8,
}

impl RecordKind {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => RecordKind::Start,
            1 => RecordKind::End,
            2 => RecordKind::UpdateConst,
            3 => RecordKind::UpdateBulk,
            4 => RecordKind::Update,
            5 => RecordKind::Create,
            6 => RecordKind::Destroy,
            7 => RecordKind::Seq,
            8 => RecordKind::Clear,
            _ => return None,
        })
    }
}

/// One parsed log record, with its body fully decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// `LOG_START(id=tid, commit_ts)`.
    Start { tid: Tid, commit_ts: i64 },
    /// `LOG_END(id)`. Commits the open transaction with `id == tid`;
    /// aborts it otherwise.
    End { id: Tid },
    /// `LOG_CREATE(object_id, type)`.
    Create {
        object_id: ObjectId,
        type_id: i8,
    },
    /// `LOG_DESTROY(object_id)`.
    Destroy { object_id: ObjectId },
    /// `LOG_CLEAR(object_id)`.
    Clear { object_id: ObjectId },
    /// `LOG_SEQ(key, value)`.
    Seq { key: i32, value: i64 },
    /// `LOG_UPDATE_CONST(object_id, count, type, offset, value)`.
    UpdateConst {
        object_id: ObjectId,
        count: i64,
        offset: i64,
        value: AtomValue,
    },
    /// `LOG_UPDATE_BULK(object_id, count, type, offset, values)`.
    UpdateBulk {
        object_id: ObjectId,
        offset: i64,
        values: Vec<AtomValue>,
    },
    /// `LOG_UPDATE(object_id, count, type, oids, values)`.
    Update {
        object_id: ObjectId,
        oids: Vec<i64>,
        values: Vec<AtomValue>,
    },
}

impl LogRecord {
    /// Serialize this record to its on-disk byte representation,
    /// including the 5-byte header.
    pub fn to_bytes(&self, registry: &TypeRegistry) -> Result<Vec<u8>, WalError> {
        let mut w = Writer::with_capacity(32);
        match self {
            LogRecord::Start { tid, commit_ts } => {
                write_header(&mut w, RecordKind::Start, *tid);
                w.write_i64(*commit_ts);
            }
            LogRecord::End { id } => {
                write_header(&mut w, RecordKind::End, *id);
            }
            LogRecord::Create { object_id, type_id } => {
                write_header(&mut w, RecordKind::Create, *object_id);
                w.write_i8(*type_id);
            }
            LogRecord::Destroy { object_id } => {
                write_header(&mut w, RecordKind::Destroy, *object_id);
            }
            LogRecord::Clear { object_id } => {
                write_header(&mut w, RecordKind::Clear, *object_id);
            }
            LogRecord::Seq { key, value } => {
                write_header(&mut w, RecordKind::Seq, *key);
                w.write_i64(*value);
            }
            LogRecord::UpdateConst {
                object_id,
                count,
                offset,
                value,
            } => {
                write_header(&mut w, RecordKind::UpdateConst, *object_id);
                w.write_i64(*count);
                w.write_i8(external_type(registry, value.column_type())?);
                w.write_i64(*offset);
                value.encode(&mut w)?;
            }
            LogRecord::UpdateBulk {
                object_id,
                offset,
                values,
            } => {
                write_header(&mut w, RecordKind::UpdateBulk, *object_id);
                w.write_i64(values.len() as i64);
                w.write_i8(external_type(registry, array_type(values))?);
                w.write_i64(*offset);
                encode_array(values, &mut w)?;
            }
            LogRecord::Update {
                object_id,
                oids,
                values,
            } => {
                if oids.len() != values.len() {
                    return Err(WalError::ValueTooLarge(
                        "LOG_UPDATE oid/value length mismatch".to_string(),
                    ));
                }
                write_header(&mut w, RecordKind::Update, *object_id);
                w.write_i64(oids.len() as i64);
                w.write_i8(external_type(registry, array_type(values))?);
                for oid in oids {
                    w.write_i64(*oid);
                }
                encode_array(values, &mut w)?;
            }
        }
        Ok(w.into_bytes())
    }

    /// Parse one record starting at `r`'s current position. `r` must be
    /// positioned at the start of a record header; on success the
    /// cursor is left just past the record.
    pub fn from_reader(r: &mut Reader<'_>, registry: &TypeRegistry) -> Result<Self, WalError> {
        let kind_byte = r.read_u8()?;
        let id = r.read_i32()?;
        let kind = RecordKind::from_u8(kind_byte).ok_or_else(|| {
            // Tag 9 (legacy LOG_ROW) and anything higher are never valid.
            WalError::UnknownType(kind_byte as i8)
        })?;

        Ok(match kind {
            RecordKind::Start => LogRecord::Start {
                tid: id,
                commit_ts: r.read_i64()?,
            },
            RecordKind::End => LogRecord::End { id },
            RecordKind::Create => LogRecord::Create {
                object_id: id,
                type_id: r.read_i8()?,
            },
            RecordKind::Destroy => LogRecord::Destroy { object_id: id },
            RecordKind::Clear => LogRecord::Clear { object_id: id },
            RecordKind::Seq => LogRecord::Seq {
                key: id,
                value: r.read_i64()?,
            },
            RecordKind::UpdateConst => {
                let count = r.read_i64()?;
                let type_id = r.read_i8()?;
                let ty = resolve_type(registry, type_id)?;
                let offset = r.read_i64()?;
                let value = AtomValue::decode(ty, r)?;
                LogRecord::UpdateConst {
                    object_id: id,
                    count,
                    offset,
                    value,
                }
            }
            RecordKind::UpdateBulk => {
                let count = r.read_i64()?;
                let type_id = r.read_i8()?;
                let ty = resolve_type(registry, type_id)?;
                let offset = r.read_i64()?;
                let values = decode_array(ty, count as usize, r)?;
                LogRecord::UpdateBulk {
                    object_id: id,
                    offset,
                    values,
                }
            }
            RecordKind::Update => {
                let count = r.read_i64()? as usize;
                let type_id = r.read_i8()?;
                let ty = resolve_type(registry, type_id)?;
                let mut oids = Vec::with_capacity(count);
                for _ in 0..count {
                    oids.push(r.read_i64()?);
                }
                let values = decode_array(ty, count, r)?;
                LogRecord::Update {
                    object_id: id,
                    oids,
                    values,
                }
            }
        })
    }
}

fn write_header(w: &mut Writer, kind: RecordKind, id: i32) {
    w.write_u8(kind as u8);
    w.write_i32(id);
}

fn resolve_type(registry: &TypeRegistry, external_id: i8) -> Result<ColumnType, WalError> {
    registry
        .resolve(external_id)
        .ok_or(WalError::UnknownType(external_id))
}

fn external_type(registry: &TypeRegistry, ty: ColumnType) -> Result<i8, WalError> {
    registry
        .external_id(ty)
        .ok_or_else(|| WalError::UnknownType(0))
}

fn array_type(values: &[AtomValue]) -> ColumnType {
    values
        .first()
        .map(|v| v.column_type())
        .unwrap_or(ColumnType::Int32)
}
