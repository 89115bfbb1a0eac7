//! `LegacyUpgrader`: reads the previous on-disk log layout — distinct
//! record tags, a `(type_char, id)` pair in place of an integer
//! `object_id`, and a string-keyed catalog — and rewrites it into the
//! current format exactly once, before a normal [`crate::replay::Replayer`]
//! pass ever runs against the directory.
//!
//! Design note: the upgrader takes its target directory and the
//! boot-time [`TypeRegistry`] as plain arguments and returns a fresh
//! [`LegacyUpgradeOutcome`]; there is no back-reference into a sibling
//! module the way an older logger implementation might call back into
//! the new one. Any state the caller needs afterward — here, the
//! legacy `(type_char, id) -> object_id` mapping — is returned by
//! value.
//!
//! This module only ever *transcodes*: it never mutates a live catalog
//! or column store directly. It emits one new-format transaction
//! (`LOG_START` / `LOG_CREATE` / `LOG_UPDATE_BULK` / `LOG_CLEAR` /
//! `LOG_END`) per legacy record into a brand-new segment, deletes the
//! old-format segments, and rewrites the header at
//! [`crate::header::CURRENT_VERSION`]. A normal [`crate::replay::Replayer`]
//! pass over that new segment reconstructs the same catalog a direct
//! application would have produced, so there is exactly one code path
//! that turns logged actions into catalog state — no second, legacy-only
//! apply routine.

use std::collections::HashMap;
use std::fs;

use crate::codec::cursor::{Reader, Writer};
use crate::codec::record::LogRecord;
use crate::config::WalConfig;
use crate::error::WalError;
use crate::header::Header;
use crate::log_stream::LogStream;
use crate::segment::Segment;
use crate::types::{ColumnType, LogId, ObjectId, TypeRegistry};
use crate::value::{decode_array, AtomValue};

/// Legacy record tags. A disjoint numbering from [`crate::codec::record::RecordKind`]
/// — these bytes are only ever read from a directory whose header
/// predates [`crate::header::LEGACY_VERSION_BOUNDARY`], never mixed with
/// current-format bytes in the same segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum OldTag {
    /// `LOG_CREATE_ID(name, type_char, id)`.
    CreateId = 0,
    /// `LOG_INSERT_ID(type_char, id, count, values)`.
    InsertId = 1,
    /// `LOG_USE_ID(type_char, id)`: reference an existing legacy entry
    /// without modifying it.
    UseId = 2,
    /// `LOG_CLEAR_ID(type_char, id)`.
    ClearId = 3,
}

impl OldTag {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => OldTag::CreateId,
            1 => OldTag::InsertId,
            2 => OldTag::UseId,
            3 => OldTag::ClearId,
            _ => return None,
        })
    }
}

/// One decoded legacy record.
#[derive(Debug, Clone, PartialEq)]
enum OldRecord {
    CreateId {
        name: String,
        type_char: u8,
        id: i64,
    },
    InsertId {
        type_char: u8,
        id: i64,
        values: Vec<AtomValue>,
    },
    UseId {
        type_char: u8,
        id: i64,
    },
    ClearId {
        type_char: u8,
        id: i64,
    },
}

/// Maps a legacy single-byte type tag to the current [`ColumnType`].
/// `t` is kept as a generic fixed-width alias matching what the
/// original format used for test fixture columns.
fn map_legacy_type(type_char: u8) -> Option<ColumnType> {
    Some(match type_char {
        b'b' => ColumnType::Bool,
        b'c' => ColumnType::Int8,
        b's' => ColumnType::Int16,
        b'i' | b't' => ColumnType::Int32,
        b'l' => ColumnType::Int64,
        b'f' => ColumnType::Float32,
        b'd' => ColumnType::Float64,
        b'S' => ColumnType::Str,
        b'B' => ColumnType::Bytes,
        _ => return None,
    })
}

fn read_old_record(r: &mut Reader<'_>) -> Result<OldRecord, WalError> {
    let tag_byte = r.read_u8()?;
    let tag = OldTag::from_u8(tag_byte).ok_or(WalError::UnknownType(tag_byte as i8))?;
    Ok(match tag {
        OldTag::CreateId => {
            let name_len = r.read_u32()? as usize;
            let name_bytes = r.read_bytes(name_len)?;
            let name = String::from_utf8(name_bytes.to_vec()).map_err(|e| WalError::CorruptHeader {
                reason: format!("legacy catalog name not utf8: {e}"),
            })?;
            let type_char = r.read_u8()?;
            let id = r.read_i64()?;
            OldRecord::CreateId { name, type_char, id }
        }
        OldTag::InsertId => {
            let type_char = r.read_u8()?;
            let id = r.read_i64()?;
            let count = r.read_i64()? as usize;
            let ty = map_legacy_type(type_char).ok_or(WalError::UnknownType(type_char as i8))?;
            let values = decode_array(ty, count, r)?;
            OldRecord::InsertId { type_char, id, values }
        }
        OldTag::UseId => {
            let type_char = r.read_u8()?;
            let id = r.read_i64()?;
            OldRecord::UseId { type_char, id }
        }
        OldTag::ClearId => {
            let type_char = r.read_u8()?;
            let id = r.read_i64()?;
            OldRecord::ClearId { type_char, id }
        }
    })
}

/// What one upgrade run produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyUpgradeOutcome {
    /// Whether the directory actually needed upgrading (`false` is the
    /// fixed point: a second run against an already-upgraded directory
    /// must be a no-op).
    pub upgraded: bool,
    /// `(type_char, legacy_id) -> object_id` for every `LOG_CREATE_ID`
    /// encountered, so callers can resolve `find_bat_by_legacy_id`.
    pub legacy_mapping: HashMap<(u8, i64), ObjectId>,
    /// The single new-format segment written, if any.
    pub written_log_id: Option<LogId>,
}

impl LegacyUpgradeOutcome {
    /// Resolve a legacy `(type_char, id)` pair to the `object_id` a
    /// post-upgrade `Catalog::find_bat` call should be given.
    pub fn find_object_id(&self, type_char: u8, id: i64) -> Option<ObjectId> {
        self.legacy_mapping.get(&(type_char, id)).copied()
    }
}

/// Transcodes an old-format directory into the current format.
pub struct LegacyUpgrader;

impl LegacyUpgrader {
    /// Run the upgrade. A no-op (returns `upgraded: false`) if the
    /// directory's header is already at or past
    /// [`crate::header::LEGACY_VERSION_BOUNDARY`] — this is what makes a
    /// second invocation a fixed point.
    pub fn upgrade(config: &WalConfig, registry: &TypeRegistry) -> Result<LegacyUpgradeOutcome, WalError> {
        let header = Header::read(&config.dir)?;
        if !header.needs_legacy_upgrade() {
            return Ok(LegacyUpgradeOutcome {
                upgraded: false,
                ..Default::default()
            });
        }

        let old_ids = LogStream::list_segment_ids(config)?;
        let mut legacy_mapping = HashMap::new();
        let mut row_counts: HashMap<i64, i64> = HashMap::new();
        let mut new_records: Vec<LogRecord> = Vec::new();

        for log_id in &old_ids {
            let body = Segment::read_body(config, *log_id)?;
            let mut r = Reader::new(&body, 0);
            loop {
                if r.remaining() == 0 {
                    break;
                }
                let record = match read_old_record(&mut r) {
                    Ok(record) => record,
                    Err(e) if e.is_short_read() => break,
                    Err(e) => return Err(e),
                };
                match record {
                    OldRecord::CreateId { type_char, id, .. } => {
                        let ty = map_legacy_type(type_char).ok_or(WalError::UnknownType(type_char as i8))?;
                        let type_id = registry.external_id(ty).ok_or(WalError::UnknownType(type_char as i8))?;
                        let object_id = legacy_object_id(id);
                        legacy_mapping.insert((type_char, id), object_id);
                        new_records.push(LogRecord::Create { object_id, type_id });
                    }
                    OldRecord::InsertId { type_char, id, values } => {
                        let object_id = legacy_mapping
                            .get(&(type_char, id))
                            .copied()
                            .unwrap_or_else(|| legacy_object_id(id));
                        let offset = *row_counts.get(&id).unwrap_or(&0);
                        row_counts.insert(id, offset + values.len() as i64);
                        new_records.push(LogRecord::UpdateBulk {
                            object_id,
                            offset,
                            values,
                        });
                    }
                    OldRecord::UseId { .. } => {
                        // References an existing entry without mutating
                        // it; nothing to transcode.
                    }
                    OldRecord::ClearId { type_char, id } => {
                        let object_id = legacy_mapping
                            .get(&(type_char, id))
                            .copied()
                            .unwrap_or_else(|| legacy_object_id(id));
                        row_counts.insert(id, 0);
                        new_records.push(LogRecord::Clear { object_id });
                    }
                }
            }
        }

        let new_log_id = old_ids.iter().copied().max().unwrap_or(0) + 1;
        let mut w = Writer::new();
        w.write_bytes(&LogRecord::Start { tid: 1, commit_ts: 0 }.to_bytes(registry)?);
        for record in &new_records {
            w.write_bytes(&record.to_bytes(registry)?);
        }
        w.write_bytes(&LogRecord::End { id: 1 }.to_bytes(registry)?);

        let mut segment = Segment::create(config, new_log_id)?;
        segment.write(config, &w.into_bytes())?;
        segment.flush()?;
        segment.close()?;

        for log_id in &old_ids {
            let path = config.segment_path(*log_id);
            fs::remove_file(&path)?;
        }

        Header::current(registry).write_atomic(&config.dir)?;

        Ok(LegacyUpgradeOutcome {
            upgraded: true,
            legacy_mapping,
            written_log_id: Some(new_log_id),
        })
    }
}

/// Legacy ids are caller-assigned and already unique; reused as the new
/// `object_id` the same way a fresh `log_create` uses `bid == object_id`
/// (see [`crate::apply`]).
fn legacy_object_id(legacy_id: i64) -> ObjectId {
    legacy_id as ObjectId
}
