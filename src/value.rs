//! Atom values and their on-disk encoding.
//!
//! For every fixed-width type the on-disk length is implied by the type;
//! variable-width atoms are preceded by a `u32` length. Bit columns are
//! packed 32 bits per storage word, matching the underlying column
//! store's in-memory layout so that a bulk update can be copied in
//! without repacking.
//!
//! Modeled as a sum type over the known atoms plus a variable-length
//! escape, dispatched through the type registry: the compiler checks
//! exhaustiveness here instead of a table of function pointers.

use crate::codec::cursor::{Reader, Writer};
use crate::error::WalError;
use crate::types::ColumnType;

/// One decoded atom value.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomValue {
    /// Packed bit.
    Bool(bool),
    /// 8-bit signed integer.
    Int8(i8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// Single-precision float.
    Float32(f32),
    /// Double-precision float.
    Float64(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque byte blob.
    Bytes(Vec<u8>),
}

impl AtomValue {
    /// The `ColumnType` this value belongs to.
    pub fn column_type(&self) -> ColumnType {
        match self {
            AtomValue::Bool(_) => ColumnType::Bool,
            AtomValue::Int8(_) => ColumnType::Int8,
            AtomValue::Int16(_) => ColumnType::Int16,
            AtomValue::Int32(_) => ColumnType::Int32,
            AtomValue::Int64(_) => ColumnType::Int64,
            AtomValue::Float32(_) => ColumnType::Float32,
            AtomValue::Float64(_) => ColumnType::Float64,
            AtomValue::Str(_) => ColumnType::Str,
            AtomValue::Bytes(_) => ColumnType::Bytes,
        }
    }

    /// Encode a single atom (used by `LOG_UPDATE_CONST`). Bit columns
    /// still spend one full 32-bit word, matching the packed-word layout
    /// used for arrays.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WalError> {
        match self {
            AtomValue::Bool(v) => w.write_u32(if *v { 1 } else { 0 }),
            AtomValue::Int8(v) => w.write_i8(*v),
            AtomValue::Int16(v) => w.write_i16(*v),
            AtomValue::Int32(v) => w.write_i32(*v),
            AtomValue::Int64(v) => w.write_i64(*v),
            AtomValue::Float32(v) => w.write_f32(*v),
            AtomValue::Float64(v) => w.write_f64(*v),
            AtomValue::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > u32::MAX as usize {
                    return Err(WalError::ValueTooLarge(format!(
                        "string atom of {} bytes",
                        bytes.len()
                    )));
                }
                w.write_u32(bytes.len() as u32);
                w.write_bytes(bytes);
            }
            AtomValue::Bytes(b) => {
                if b.len() > u32::MAX as usize {
                    return Err(WalError::ValueTooLarge(format!(
                        "byte atom of {} bytes",
                        b.len()
                    )));
                }
                w.write_u32(b.len() as u32);
                w.write_bytes(b);
            }
        }
        Ok(())
    }

    /// Decode a single atom of the given type.
    pub fn decode(ty: ColumnType, r: &mut Reader<'_>) -> Result<Self, WalError> {
        Ok(match ty {
            ColumnType::Bool => AtomValue::Bool(r.read_u32()? != 0),
            ColumnType::Int8 => AtomValue::Int8(r.read_i8()?),
            ColumnType::Int16 => AtomValue::Int16(r.read_i16()?),
            ColumnType::Int32 => AtomValue::Int32(r.read_i32()?),
            ColumnType::Int64 => AtomValue::Int64(r.read_i64()?),
            ColumnType::Float32 => AtomValue::Float32(r.read_f32()?),
            ColumnType::Float64 => AtomValue::Float64(r.read_f64()?),
            ColumnType::Str => {
                let len = r.read_u32()? as usize;
                let bytes = r.read_bytes(len)?;
                AtomValue::Str(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| WalError::CorruptHeader {
                            reason: format!("non-utf8 string atom: {e}"),
                        })?,
                )
            }
            ColumnType::Bytes => {
                let len = r.read_u32()? as usize;
                AtomValue::Bytes(r.read_bytes(len)?.to_vec())
            }
        })
    }
}

/// Encode `count` atoms back-to-back. Bool arrays are packed 32 bits per
/// word, LSB first, with the final word zero-padded past `count` bits.
pub fn encode_array(values: &[AtomValue], w: &mut Writer) -> Result<(), WalError> {
    if let Some(first) = values.first() {
        if first.column_type() == ColumnType::Bool {
            let mut word: u32 = 0;
            let mut bit = 0u32;
            for v in values {
                let b = matches!(v, AtomValue::Bool(true));
                if b {
                    word |= 1 << bit;
                }
                bit += 1;
                if bit == 32 {
                    w.write_u32(word);
                    word = 0;
                    bit = 0;
                }
            }
            if bit > 0 {
                w.write_u32(word);
            }
            return Ok(());
        }
    }
    for v in values {
        v.encode(w)?;
    }
    Ok(())
}

/// Decode `count` atoms of type `ty`.
pub fn decode_array(
    ty: ColumnType,
    count: usize,
    r: &mut Reader<'_>,
) -> Result<Vec<AtomValue>, WalError> {
    if ty == ColumnType::Bool {
        let words = count.div_ceil(32);
        let mut out = Vec::with_capacity(count);
        let mut remaining = count;
        for _ in 0..words {
            let word = r.read_u32()?;
            let in_word = remaining.min(32);
            for bit in 0..in_word {
                out.push(AtomValue::Bool((word >> bit) & 1 != 0));
            }
            remaining -= in_word;
        }
        return Ok(out);
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(AtomValue::decode(ty, r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_single(v: AtomValue) {
        let mut w = Writer::new();
        v.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, 0);
        let decoded = AtomValue::decode(v.column_type(), &mut r).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn every_atom_type_roundtrips() {
        roundtrip_single(AtomValue::Bool(true));
        roundtrip_single(AtomValue::Bool(false));
        roundtrip_single(AtomValue::Int8(-5));
        roundtrip_single(AtomValue::Int16(-1234));
        roundtrip_single(AtomValue::Int32(i32::MIN));
        roundtrip_single(AtomValue::Int64(i64::MAX));
        roundtrip_single(AtomValue::Float32(3.5));
        roundtrip_single(AtomValue::Float64(-2.25));
        roundtrip_single(AtomValue::Str("hello wal".to_string()));
        roundtrip_single(AtomValue::Bytes(vec![9, 8, 7]));
        roundtrip_single(AtomValue::Str(String::new()));
    }

    #[test]
    fn bulk_encoding_of_n_values_decodes_to_n_equal_values() {
        let values = vec![AtomValue::Int32(42); 7];
        let mut w = Writer::new();
        encode_array(&values, &mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, 0);
        let decoded = decode_array(ColumnType::Int32, 7, &mut r).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn bool_array_packs_across_word_boundary() {
        let values: Vec<AtomValue> = (0..40).map(|i| AtomValue::Bool(i % 3 == 0)).collect();
        let mut w = Writer::new();
        encode_array(&values, &mut w).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 8); // 2 words for 40 bits
        let mut r = Reader::new(&bytes, 0);
        let decoded = decode_array(ColumnType::Bool, 40, &mut r).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn bool_array_of_one_still_spends_a_full_word() {
        let values = vec![AtomValue::Bool(true)];
        let mut w = Writer::new();
        encode_array(&values, &mut w).unwrap();
        assert_eq!(w.len(), 4);
    }
}
