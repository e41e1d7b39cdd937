//! Key definitions: the ordered list of `(field_no, type, collation, order)`
//! parts that gives every index its total order.

use std::cmp::Ordering;

/// Scalar type a key part decodes to. Mirrors the msgpack-level type lattice
/// a tuple field can carry; `Scalar`/`Any` are the permissive members used by
/// indexes that don't care about the concrete encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Unsigned,
    Integer,
    String,
    Number,
    Double,
    Boolean,
    Scalar,
    Array,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collation {
    None,
    Unicode,
    UnicodeCaseInsensitive,
    Binary,
}

impl Collation {
    pub(crate) fn compare_str(&self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::UnicodeCaseInsensitive => {
                a.to_lowercase().cmp(&b.to_lowercase())
            }
            // `Unicode`/`Binary`/`None` all fall back to byte-wise order;
            // a real unicode collation table is out of scope for the core.
            Collation::Unicode | Collation::Binary | Collation::None => a.cmp(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPart {
    pub field_no: u32,
    pub field_type: FieldType,
    pub collation: Collation,
    pub sort_order: SortOrder,
    pub is_nullable: bool,
}

impl KeyPart {
    pub fn new(field_no: u32, field_type: FieldType) -> KeyPart {
        KeyPart {
            field_no,
            field_type,
            collation: Collation::None,
            sort_order: SortOrder::Asc,
            is_nullable: false,
        }
    }

    pub fn nullable(mut self, yes: bool) -> KeyPart {
        self.is_nullable = yes;
        self
    }

    pub fn collation(mut self, c: Collation) -> KeyPart {
        self.collation = c;
        self
    }

    pub fn desc(mut self) -> KeyPart {
        self.sort_order = SortOrder::Desc;
        self
    }
}

/// An ordered key definition: `part_count = 0` is rejected by [`KeyDef::new`]
/// since no active index may be keyed on nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDef {
    parts: Vec<KeyPart>,
    is_unique: bool,
    is_multikey: bool,
    multikey_field: Option<u32>,
}

impl KeyDef {
    pub fn new(parts: Vec<KeyPart>, is_unique: bool) -> crate::error::Result<KeyDef> {
        if parts.is_empty() {
            return Err(crate::error::Error::InvalidAlter(
                "key def must have at least one part".into(),
            ));
        }
        Ok(KeyDef {
            parts,
            is_unique,
            is_multikey: false,
            multikey_field: None,
        })
    }

    pub fn with_multikey(mut self, array_field_no: u32) -> KeyDef {
        self.is_multikey = true;
        self.multikey_field = Some(array_field_no);
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_unique(&self) -> bool {
        self.is_unique
    }

    pub fn is_multikey(&self) -> bool {
        self.is_multikey
    }

    pub fn multikey_field(&self) -> Option<u32> {
        self.multikey_field
    }
}
