//! Identifiers and the type registry.
//!
//! `object_id` is the caller-chosen, restart-stable identity of a column.
//! `bid` is the column store's physical identity and is never stable
//! across catalog compactions. `tid` is assigned by the
//! [`crate::transaction::TransactionBuilder`] and is monotonic within a
//! single run. `log_id` numbers WAL segments and is monotonic across all
//! time, including across restarts.

use std::fmt;

/// Logical, caller-chosen identifier for a persistent column. Stable
/// across restarts.
pub type ObjectId = i32;

/// Physical column identifier in the underlying store. Not stable across
/// catalog compactions.
pub type Bid = i32;

/// Transaction identifier. Monotonically increasing within a run.
pub type Tid = i32;

/// WAL segment number. Monotonically increasing across all time.
pub type LogId = u64;

/// A column type, internal to this process.
///
/// Fixed-width types occupy the non-negative half of the external id
/// space; variable-width types occupy the negative half starting at
/// `-127`. The registry translates between this enum and the external,
/// on-disk id so that adding a new `ColumnType` variant can never
/// invalidate an older log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Packed bit column (32 bits per storage word).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// IEEE-754 single precision float.
    Float32,
    /// IEEE-754 double precision float.
    Float64,
    /// Variable-length UTF-8 string.
    Str,
    /// Variable-length opaque byte blob.
    Bytes,
}

impl ColumnType {
    /// Stable, boot-time-fixed name used in the on-disk header's
    /// `<external_id>,<internal_name>` type table.
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "bit",
            ColumnType::Int8 => "int8",
            ColumnType::Int16 => "int16",
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Float32 => "flt32",
            ColumnType::Float64 => "flt64",
            ColumnType::Str => "str",
            ColumnType::Bytes => "blob",
        }
    }

    /// Whether values of this type are fixed-width on the wire (no
    /// per-atom length prefix needed).
    pub fn is_fixed_width(self) -> bool {
        !matches!(self, ColumnType::Str | ColumnType::Bytes)
    }
}

/// Maps an external, on-disk type id (a small signed byte) to an
/// internal [`ColumnType`].
///
/// The registry is fixed at boot from the code, not read from disk: the
/// log only ever carries the external id, so the mapping below is the
/// single source of truth for decoding. The header file's type table
/// records the same mapping for operator visibility, but is never
/// consulted to decide what an id means.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    by_external: Vec<(i8, ColumnType)>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry {
            by_external: vec![
                (0, ColumnType::Bool),
                (1, ColumnType::Int8),
                (2, ColumnType::Int16),
                (3, ColumnType::Int32),
                (4, ColumnType::Int64),
                (5, ColumnType::Float32),
                (6, ColumnType::Float64),
                (-1, ColumnType::Str),
                (-2, ColumnType::Bytes),
            ],
        }
    }
}

impl TypeRegistry {
    /// Build the boot-time registry. Currently identical to `Default`;
    /// kept as a named constructor so call sites read like `WalConfig::new()`.
    pub fn boot() -> Self {
        Self::default()
    }

    /// Resolve an external id read from the log to its internal type.
    pub fn resolve(&self, external_id: i8) -> Option<ColumnType> {
        self.by_external
            .iter()
            .find(|(id, _)| *id == external_id)
            .map(|(_, ty)| *ty)
    }

    /// Resolve an internal type back to its external id, for encoding.
    pub fn external_id(&self, ty: ColumnType) -> Option<i8> {
        self.by_external
            .iter()
            .find(|(_, t)| *t == ty)
            .map(|(id, _)| *id)
    }

    /// Iterate `(external_id, name)` pairs for writing the header's type
    /// table.
    pub fn entries(&self) -> impl Iterator<Item = (i8, &'static str)> + '_ {
        self.by_external.iter().map(|(id, ty)| (*id, ty.name()))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_roundtrips_every_builtin_type() {
        let reg = TypeRegistry::boot();
        for (id, ty) in reg.by_external.clone() {
            assert_eq!(reg.resolve(id), Some(ty));
            assert_eq!(reg.external_id(ty), Some(id));
        }
    }

    #[test]
    fn unknown_external_id_resolves_to_none() {
        let reg = TypeRegistry::boot();
        assert_eq!(reg.resolve(99), None);
    }

    #[test]
    fn fixed_width_classification() {
        assert!(ColumnType::Int32.is_fixed_width());
        assert!(!ColumnType::Str.is_fixed_width());
        assert!(!ColumnType::Bytes.is_fixed_width());
    }
}
