//! `Mem`: the VM's register value cell.
//!
//! Unlike [`crate::tuple::Tuple`], a `Mem` is a short-lived scratch value
//! manipulated by opcode handlers; it is not refcounted. Overwrite sites
//! call [`Mem::release`] explicitly rather than relying on an automatic
//! `Drop`, because a register can alias another register's owned buffer
//! across a `Move` (the owning one transfers the flag, the source becomes
//! `Null`) and an eager destructor would fight that transfer.

use bitflags::bitflags;

use crate::tuple::Tuple;

bitflags! {
    pub struct MemFlags: u8 {
        const OWNS_MEMORY      = 0b0000_0001;
        const EPHEMERAL_REF     = 0b0000_0010;
        const STATIC_REF        = 0b0000_0100;
        const ZERO_PADDED_BLOB  = 0b0000_1000;
        const SUBTYPE_MSGPACK   = 0b0001_0000;
        const NULL_CLEARED      = 0b0010_0000;
    }
}

/// A cursor-row reference: which cursor, and the generation it was read at
/// (so a later `Column` read can detect a stale cache, mirroring
/// `cacheStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRef {
    pub cursor: usize,
    pub generation: u64,
}

/// A saved VM frame reference, used by registers that hold a sub-program
/// result pending `Return`.
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub frame_id: usize,
}

/// Per-group aggregate accumulator state threaded through `AggStep`.
#[derive(Debug, Clone, Default)]
pub struct AggContext {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
    Str(String),
    Blob(Vec<u8>),
    /// A msgpack-encoded record, e.g. the output of `MakeRecord`.
    MsgpackBlob(Vec<u8>),
    Pointer(usize),
    Frame(FrameRef),
    Agg(Box<AggContext>),
    Row(RowRef),
}

/// One VM register. `flags` records which memory-ownership discipline the
/// payload currently follows; at most one ownership flag may be set at a
/// time (enforced by [`Mem::check_invariants`], used in debug builds).
#[derive(Debug, Clone)]
pub struct Mem {
    payload: Payload,
    flags: MemFlags,
}

impl Default for Mem {
    fn default() -> Mem {
        Mem::null()
    }
}

impl Mem {
    pub fn null() -> Mem {
        Mem {
            payload: Payload::Null,
            flags: MemFlags::empty(),
        }
    }

    pub fn int(v: i64) -> Mem {
        Mem {
            payload: Payload::Int(v),
            flags: MemFlags::empty(),
        }
    }

    pub fn uint(v: u64) -> Mem {
        Mem {
            payload: Payload::UInt(v),
            flags: MemFlags::empty(),
        }
    }

    pub fn real(v: f64) -> Mem {
        Mem {
            payload: Payload::Double(v),
            flags: MemFlags::empty(),
        }
    }

    pub fn boolean(v: bool) -> Mem {
        Mem {
            payload: Payload::Bool(v),
            flags: MemFlags::empty(),
        }
    }

    pub fn owned_str(v: String) -> Mem {
        Mem {
            payload: Payload::Str(v),
            flags: MemFlags::OWNS_MEMORY,
        }
    }

    pub fn owned_blob(v: Vec<u8>) -> Mem {
        Mem {
            payload: Payload::Blob(v),
            flags: MemFlags::OWNS_MEMORY,
        }
    }

    pub fn msgpack_blob(v: Vec<u8>) -> Mem {
        Mem {
            payload: Payload::MsgpackBlob(v),
            flags: MemFlags::OWNS_MEMORY | MemFlags::SUBTYPE_MSGPACK,
        }
    }

    pub fn ephemeral_str(v: String) -> Mem {
        Mem {
            payload: Payload::Str(v),
            flags: MemFlags::EPHEMERAL_REF,
        }
    }

    pub fn row_ref(cursor: usize, generation: u64) -> Mem {
        Mem {
            payload: Payload::Row(RowRef { cursor, generation }),
            flags: MemFlags::empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Overwrite this cell with `Null`, honouring the "at most one
    /// memory-owning flag" invariant by dropping the old payload first.
    pub fn release(&mut self) {
        self.payload = Payload::Null;
        self.flags = MemFlags::NULL_CLEARED;
    }

    /// `Move P1 P2`: transfer ownership, leaving the source cell `Null`.
    /// The destination inherits the exact flags of the source.
    pub fn move_from(&mut self, src: &mut Mem) {
        self.payload = std::mem::replace(&mut src.payload, Payload::Null);
        self.flags = src.flags;
        src.flags = MemFlags::NULL_CLEARED;
    }

    /// `Copy P1 P2`: a deep, value-preserving copy that never shares an
    /// owned buffer between two cells.
    pub fn copy_from(&mut self, src: &Mem) {
        self.payload = src.payload.clone();
        self.flags = if src.flags.contains(MemFlags::OWNS_MEMORY)
            || src.flags.contains(MemFlags::SUBTYPE_MSGPACK)
        {
            src.flags
        } else {
            src.flags & !(MemFlags::EPHEMERAL_REF)
        };
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int(v) => Some(*v),
            Payload::UInt(v) => i64::try_from(*v).ok(),
            Payload::Double(v) => Some(*v as i64),
            Payload::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.payload {
            Payload::Int(v) => Some(*v as f64),
            Payload::UInt(v) => Some(*v as f64),
            Payload::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Blob(v) | Payload::MsgpackBlob(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        let owning = [
            MemFlags::OWNS_MEMORY,
            MemFlags::EPHEMERAL_REF,
            MemFlags::STATIC_REF,
        ]
        .iter()
        .filter(|f| self.flags.contains(**f))
        .count();
        debug_assert!(owning <= 1, "Mem carries more than one ownership flag");
    }
}

/// SQL-standard cast rules, including `'true'`/`'false'` string-to-bool.
/// `Mem::cast(Mem::cast(x, t), t) == Mem::cast(x, t)` for all scalar `t`
/// (idempotence is exercised in `mem_test.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
}

pub fn cast(src: &Mem, to: CastType) -> Mem {
    if src.is_null() {
        return Mem::null();
    }
    match to {
        CastType::Integer => match src.as_i64() {
            Some(v) => Mem::int(v),
            None => match src.as_str() {
                Some(s) => Mem::int(s.trim().parse::<i64>().unwrap_or(0)),
                None => Mem::int(0),
            },
        },
        CastType::Real => match src.as_f64() {
            Some(v) => Mem::real(v),
            None => match src.as_str() {
                Some(s) => Mem::real(s.trim().parse::<f64>().unwrap_or(0.0)),
                None => Mem::real(0.0),
            },
        },
        CastType::Text => match &src.payload {
            Payload::Str(s) => Mem::owned_str(s.clone()),
            Payload::Int(v) => Mem::owned_str(v.to_string()),
            Payload::UInt(v) => Mem::owned_str(v.to_string()),
            Payload::Double(v) => Mem::owned_str(v.to_string()),
            Payload::Bool(v) => Mem::owned_str(if *v { "true" } else { "false" }.to_string()),
            _ => Mem::owned_str(String::new()),
        },
        CastType::Boolean => match &src.payload {
            Payload::Bool(v) => Mem::boolean(*v),
            Payload::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Mem::boolean(true),
                "false" => Mem::boolean(false),
                _ => Mem::boolean(src.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            },
            _ => Mem::boolean(src.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        },
        CastType::Blob => match &src.payload {
            Payload::Blob(b) | Payload::MsgpackBlob(b) => Mem::owned_blob(b.clone()),
            Payload::Str(s) => Mem::owned_blob(s.as_bytes().to_vec()),
            _ => Mem::owned_blob(Vec::new()),
        },
    }
}

/// `MakeRecord`: pack `mems` into a msgpack array, applying column
/// affinities first. `is_ephemeral` records whether the returned blob must
/// not outlive the caller's frame (ephemeral sorter keys, for instance).
pub fn make_record(mems: &[Mem], affinity: &[CastType]) -> Vec<u8> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, mems.len() as u32).ok();
    for (i, m) in mems.iter().enumerate() {
        let m = match affinity.get(i) {
            Some(a) => cast(m, *a),
            None => m.clone(),
        };
        encode_mem(&mut buf, &m);
    }
    buf
}

fn encode_mem(buf: &mut Vec<u8>, m: &Mem) {
    match &m.payload {
        Payload::Null => {
            rmp::encode::write_nil(buf).ok();
        }
        Payload::Int(v) => {
            rmp::encode::write_sint(buf, *v).ok();
        }
        Payload::UInt(v) => {
            rmp::encode::write_uint(buf, *v).ok();
        }
        Payload::Double(v) => {
            rmp::encode::write_f64(buf, *v).ok();
        }
        Payload::Bool(v) => {
            rmp::encode::write_bool(buf, *v).ok();
        }
        Payload::Str(v) => {
            rmp::encode::write_str(buf, v).ok();
        }
        Payload::Blob(v) | Payload::MsgpackBlob(v) => {
            buf.extend_from_slice(v);
        }
        Payload::Pointer(_) | Payload::Frame(_) | Payload::Agg(_) | Payload::Row(_) => {
            rmp::encode::write_nil(buf).ok();
        }
    };
}

/// `Column`: extract field `idx` from a tuple, or `default` if the tuple
/// has fewer fields than `idx` (the VM uses this for schema-evolution
/// backfill on an ALTER TABLE ADD COLUMN).
pub fn column(tuple: &Tuple, idx: u32, default: Option<&Mem>) -> Mem {
    match tuple.field(idx) {
        Ok(Some(raw)) => match crate::tuple::msgpack::decode_scalar(raw) {
            Ok((scalar, _)) => scalar_to_mem(&scalar),
            Err(_) => Mem::null(),
        },
        _ => default.cloned().unwrap_or_else(Mem::null),
    }
}

fn scalar_to_mem(s: &crate::tuple::msgpack::Scalar<'_>) -> Mem {
    use crate::tuple::msgpack::Scalar;
    match s {
        Scalar::Nil => Mem::null(),
        Scalar::Bool(v) => Mem::boolean(*v),
        Scalar::Int(v) => Mem::int(*v),
        Scalar::UInt(v) => Mem::uint(*v),
        Scalar::Float(v) => Mem::real(*v),
        Scalar::Str(v) => Mem::owned_str(v.to_string()),
        Scalar::Bin(v) => Mem::owned_blob(v.to_vec()),
        Scalar::Compound(v) => Mem::msgpack_blob(v.to_vec()),
    }
}

#[cfg(test)]
#[path = "mem_test.rs"]
mod mem_test;
