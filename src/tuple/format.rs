//! Tuple format: a shared, immutable descriptor of a space's row shape.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tuple::key_def::FieldType;

/// One logical field's static shape, as declared by the owning space's
/// definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub is_nullable: bool,
}

/// Immutable per-space descriptor. Shared by every [`crate::tuple::Tuple`]
/// belonging to the space and released only once no tuple and no space
/// reference it any more (`Arc` refcounting does this for free).
#[derive(Debug)]
pub struct TupleFormat {
    fields: Vec<FieldDef>,
    /// Field numbers that at least one live index keys on; these get an
    /// O(1) offset computed once at tuple construction.
    indexed_fields: Vec<u32>,
}

impl TupleFormat {
    pub fn new(fields: Vec<FieldDef>, indexed_fields: Vec<u32>) -> Arc<TupleFormat> {
        let mut indexed_fields = indexed_fields;
        indexed_fields.sort_unstable();
        indexed_fields.dedup();
        Arc::new(TupleFormat {
            fields,
            indexed_fields,
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_def(&self, field_no: u32) -> Option<&FieldDef> {
        self.fields.get(field_no as usize)
    }

    pub fn is_nullable(&self, field_no: u32) -> bool {
        self.fields
            .get(field_no as usize)
            .map(|f| f.is_nullable)
            .unwrap_or(true)
    }

    pub fn indexed_fields(&self) -> &[u32] {
        &self.indexed_fields
    }

    pub(crate) fn offset_slot(&self, field_no: u32) -> Option<usize> {
        self.indexed_fields.binary_search(&field_no).ok()
    }

    /// Validate a decoded tuple against the declared field types, the way
    /// `space_replace` checks format before touching the primary index.
    pub fn validate_raw(&self, raw: &[u8]) -> Result<()> {
        let (count, _) = crate::tuple::msgpack::read_array_header(raw)
            .map_err(|_| Error::FormatMismatch("tuple is not a msgpack array".into()))?;
        if (count as usize) != self.fields.len() {
            return Err(Error::FormatMismatch(format!(
                "tuple has {} fields, format expects {}",
                count,
                self.fields.len()
            )));
        }
        Ok(())
    }
}
