//! Tuples: immutable, refcounted msgpack-encoded records.

pub mod format;
pub mod key_def;
pub(crate) mod msgpack;

use std::cmp::Ordering;
use std::sync::Arc;

pub use format::{FieldDef, TupleFormat};
pub use key_def::{Collation, FieldType, KeyDef, KeyPart, SortOrder};

use crate::error::{Error, Result};
use msgpack::Scalar;

struct TupleInner {
    format: Arc<TupleFormat>,
    raw: Box<[u8]>,
    /// Parallel to `format.indexed_fields()`: byte offset, within `raw`, of
    /// each indexed field's value.
    offsets: Vec<u32>,
}

/// An immutable, reference-counted tuple. Cloning is an `Arc` bump, matching
/// the "pinned by index insertion and cursor position" lifecycle from the
/// data model: every index and every live cursor holds its own clone.
#[derive(Clone)]
pub struct Tuple(Arc<TupleInner>);

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.raw == other.0.raw
    }
}
impl Eq for Tuple {}

impl std::fmt::Debug for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tuple({} bytes)", self.0.raw.len())
    }
}

/// Build a tuple from a raw msgpack array and the format that owns it,
/// precomputing offsets for every field an index cares about.
pub fn tuple_new(format: Arc<TupleFormat>, raw: Vec<u8>) -> Result<Tuple> {
    format.validate_raw(&raw)?;
    let (_, header_len) = msgpack::read_array_header(&raw)?;
    let mut offsets = vec![0u32; format.indexed_fields().len()];
    let mut pos = header_len;
    for (field_no, want_slot) in field_cursor(&format) {
        if pos >= raw.len() {
            return Err(Error::FormatMismatch("tuple truncated".into()));
        }
        if let Some(slot) = want_slot {
            offsets[slot] = pos as u32;
        }
        let n = msgpack::skip_value(&raw[pos..])?;
        pos += n;
        let _ = field_no;
    }
    Ok(Tuple(Arc::new(TupleInner {
        format,
        raw: raw.into_boxed_slice(),
        offsets,
    })))
}

/// Yields `(field_no, Some(slot_in_offsets))` for indexed fields and
/// `(field_no, None)` for the rest, in ascending field order.
fn field_cursor(format: &TupleFormat) -> impl Iterator<Item = (u32, Option<usize>)> + '_ {
    (0..format.field_count() as u32).map(move |fno| (fno, format.offset_slot(fno)))
}

impl Tuple {
    pub fn raw(&self) -> &[u8] {
        &self.0.raw
    }

    pub fn format(&self) -> &Arc<TupleFormat> {
        &self.0.format
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Return the raw msgpack-encoded slice for `field_no`. O(1) if the
    /// field is indexed, otherwise a linear scan from the tuple's start.
    pub fn field(&self, field_no: u32) -> Result<Option<&[u8]>> {
        if field_no as usize >= self.0.format.field_count() {
            return Ok(None);
        }
        if let Some(slot) = self.0.format.offset_slot(field_no) {
            let off = self.0.offsets[slot] as usize;
            let n = msgpack::skip_value(&self.0.raw[off..])?;
            return Ok(Some(&self.0.raw[off..off + n]));
        }
        let (_, mut pos) = msgpack::read_array_header(&self.0.raw)?;
        for fno in 0..field_no {
            let n = msgpack::skip_value(&self.0.raw[pos..])?;
            pos += n;
            let _ = fno;
        }
        let n = msgpack::skip_value(&self.0.raw[pos..])?;
        Ok(Some(&self.0.raw[pos..pos + n]))
    }

    fn scalar_at(&self, field_no: u32, is_nullable: bool) -> Result<Scalar<'_>> {
        let raw = self
            .field(field_no)?
            .ok_or_else(|| Error::InternalError(format!("field {} out of range", field_no)))?;
        let (scalar, _) = msgpack::decode_scalar(raw)?;
        if scalar.is_nil() && !is_nullable {
            return Err(Error::FormatMismatch(format!(
                "field {} is null but not nullable",
                field_no
            )));
        }
        Ok(scalar)
    }

    /// Compare two tuples by projecting both onto `key_def`'s parts.
    pub fn compare(&self, other: &Tuple, key_def: &KeyDef) -> Result<Ordering> {
        for part in key_def.parts() {
            let a = self.scalar_at(part.field_no, part.is_nullable)?;
            let b = other.scalar_at(part.field_no, part.is_nullable)?;
            let ord = compare_scalars(&a, &b, part)?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Compare against a raw msgpack array of `part_count` probe values, as
    /// used by `find_by_key`/`Seek*` opcodes.
    pub fn compare_with_key(
        &self,
        key: &[u8],
        part_count: usize,
        key_def: &KeyDef,
    ) -> Result<Ordering> {
        let (n, mut pos) = msgpack::read_array_header(key)?;
        let n = n as usize;
        if n < part_count || part_count > key_def.part_count() {
            return Err(Error::InternalError("key part_count mismatch".into()));
        }
        for part in key_def.parts().iter().take(part_count) {
            let (kb, klen) = msgpack::decode_scalar(&key[pos..])?;
            pos += klen;
            let a = self.scalar_at(part.field_no, part.is_nullable)?;
            let ord = compare_scalars(&a, &kb, part)?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Extract a single key (non-multikey case) as an owned msgpack array.
    pub fn extract_key(&self, key_def: &KeyDef) -> Result<Vec<u8>> {
        self.extract_key_at(key_def, None)
    }

    /// `multikey_idx = None` is only valid for non-multikey defs; for a
    /// multikey def, `None` means "encode the whole multikey array field"
    /// which callers use only to validate shape, while [`extract_keys_multi`]
    /// is the entry point that actually fans out one key per element.
    pub fn extract_key_at(
        &self,
        key_def: &KeyDef,
        multikey_idx: Option<usize>,
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, key_def.part_count() as u32)
            .map_err(|e| Error::DecodeError(e.to_string()))?;
        for part in key_def.parts() {
            let raw = if Some(part.field_no) == key_def.multikey_field() {
                let idx = multikey_idx.ok_or_else(|| {
                    Error::InternalError("multikey extraction requires an element index".into())
                })?;
                self.multikey_element(part.field_no, idx)?
            } else {
                self.field(part.field_no)?
                    .ok_or_else(|| Error::InternalError("missing key field".into()))?
                    .to_vec()
            };
            buf.extend_from_slice(&raw);
        }
        Ok(buf)
    }

    /// Multikey case: one key per element of the array at `key_def`'s
    /// designated multikey field.
    pub fn extract_keys_multi(&self, key_def: &KeyDef) -> Result<Vec<Vec<u8>>> {
        let mk_field = key_def
            .multikey_field()
            .ok_or_else(|| Error::InternalError("key def is not multikey".into()))?;
        let raw = self
            .field(mk_field)?
            .ok_or_else(|| Error::InternalError("missing multikey field".into()))?;
        let (n, _) = msgpack::read_array_header(raw)?;
        (0..n as usize)
            .map(|idx| self.extract_key_at(key_def, Some(idx)))
            .collect()
    }

    fn multikey_element(&self, field_no: u32, idx: usize) -> Result<Vec<u8>> {
        let raw = self
            .field(field_no)?
            .ok_or_else(|| Error::InternalError("missing multikey field".into()))?;
        let (n, mut pos) = msgpack::read_array_header(raw)?;
        if idx >= n as usize {
            return Err(Error::InternalError("multikey index out of range".into()));
        }
        for _ in 0..idx {
            pos += msgpack::skip_value(&raw[pos..])?;
        }
        let len = msgpack::skip_value(&raw[pos..])?;
        Ok(raw[pos..pos + len].to_vec())
    }
}

#[cfg(test)]
#[path = "tuple_test.rs"]
mod tuple_test;

fn compare_scalars(a: &Scalar<'_>, b: &Scalar<'_>, part: &KeyPart) -> Result<Ordering> {
    let ord = match (a.is_nil(), b.is_nil()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match part.field_type {
            FieldType::String => match (a, b) {
                (Scalar::Str(x), Scalar::Str(y)) => part.collation.compare_str(x, y),
                _ => return Err(Error::FormatMismatch("expected string key part".into())),
            },
            FieldType::Unsigned | FieldType::Integer | FieldType::Number | FieldType::Double => a
                .compare_cross_numeric(b)
                .ok_or_else(|| Error::FormatMismatch("non-numeric value in numeric part".into()))?,
            FieldType::Boolean => match (a, b) {
                (Scalar::Bool(x), Scalar::Bool(y)) => x.cmp(y),
                _ => return Err(Error::FormatMismatch("expected bool key part".into())),
            },
            FieldType::Scalar | FieldType::Any | FieldType::Array => {
                a.compare_cross_numeric(b).unwrap_or(Ordering::Equal)
            }
        },
    };
    Ok(if part.sort_order == SortOrder::Desc {
        ord.reverse()
    } else {
        ord
    })
}
