//! Minimal msgpack value walker used by the tuple layer.
//!
//! The core never needs a general-purpose msgpack object model: it only
//! needs to (a) skip over a value to find the next field's offset and
//! (b) decode scalars for key comparison. Both are implemented directly
//! against [`rmp::Marker`] rather than through a recursive `serde`
//! deserializer, the way a tuple/field accessor on the hot insert/lookup
//! path is expected to behave.

use rmp::Marker;

use crate::error::{Error, Result};

/// A decoded scalar, used only for comparisons; strings/blobs keep
/// borrowing the original tuple buffer to avoid an allocation per compare.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar<'a> {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    Bin(&'a [u8]),
    /// Array/map encountered where a scalar was expected; kept as raw bytes
    /// so multikey extraction can recurse into it without copying.
    Compound(&'a [u8]),
}

fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}
fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
fn be64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Returns `(scalar, bytes_consumed)`. Compound types (array/map) are
/// returned as `Scalar::Compound` pointing at their full encoded span.
pub fn decode_scalar(buf: &[u8]) -> Result<(Scalar<'_>, usize)> {
    if buf.is_empty() {
        return Err(Error::DecodeError("empty buffer".into()));
    }
    let marker = Marker::from_u8(buf[0]);
    let rest = &buf[1..];
    Ok(match marker {
        Marker::FixPos(v) => (Scalar::UInt(v as u64), 1),
        Marker::FixNeg(v) => (Scalar::Int(v as i64), 1),
        Marker::Null => (Scalar::Nil, 1),
        Marker::True => (Scalar::Bool(true), 1),
        Marker::False => (Scalar::Bool(false), 1),
        Marker::U8 => (Scalar::UInt(need(rest, 1)?[0] as u64), 2),
        Marker::U16 => (Scalar::UInt(be16(need(rest, 2)?) as u64), 3),
        Marker::U32 => (Scalar::UInt(be32(need(rest, 4)?) as u64), 5),
        Marker::U64 => (Scalar::UInt(be64(need(rest, 8)?)), 9),
        Marker::I8 => (Scalar::Int(need(rest, 1)?[0] as i8 as i64), 2),
        Marker::I16 => (Scalar::Int(be16(need(rest, 2)?) as i16 as i64), 3),
        Marker::I32 => (Scalar::Int(be32(need(rest, 4)?) as i32 as i64), 5),
        Marker::I64 => (Scalar::Int(be64(need(rest, 8)?) as i64), 9),
        Marker::F32 => {
            let bits = be32(need(rest, 4)?);
            (Scalar::Float(f32::from_bits(bits) as f64), 5)
        }
        Marker::F64 => {
            let bits = be64(need(rest, 8)?);
            (Scalar::Float(f64::from_bits(bits)), 9)
        }
        Marker::FixStr(len) => {
            let len = len as usize;
            let s = str_of(need(rest, len)?)?;
            (Scalar::Str(s), 1 + len)
        }
        Marker::Str8 => {
            let len = need(rest, 1)?[0] as usize;
            let s = str_of(need(&rest[1..], len)?)?;
            (Scalar::Str(s), 2 + len)
        }
        Marker::Str16 => {
            let len = be16(need(rest, 2)?) as usize;
            let s = str_of(need(&rest[2..], len)?)?;
            (Scalar::Str(s), 3 + len)
        }
        Marker::Str32 => {
            let len = be32(need(rest, 4)?) as usize;
            let s = str_of(need(&rest[4..], len)?)?;
            (Scalar::Str(s), 5 + len)
        }
        Marker::Bin8 => {
            let len = need(rest, 1)?[0] as usize;
            (Scalar::Bin(need(&rest[1..], len)?), 2 + len)
        }
        Marker::Bin16 => {
            let len = be16(need(rest, 2)?) as usize;
            (Scalar::Bin(need(&rest[2..], len)?), 3 + len)
        }
        Marker::Bin32 => {
            let len = be32(need(rest, 4)?) as usize;
            (Scalar::Bin(need(&rest[4..], len)?), 5 + len)
        }
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
            let n = skip_value(buf)?;
            (Scalar::Compound(&buf[..n]), n)
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            let n = skip_value(buf)?;
            (Scalar::Compound(&buf[..n]), n)
        }
        other => {
            return Err(Error::DecodeError(format!(
                "unsupported msgpack marker {:?}",
                other
            )))
        }
    })
}

fn need(buf: &[u8], n: usize) -> Result<&[u8]> {
    if buf.len() < n {
        Err(Error::DecodeError("truncated msgpack value".into()))
    } else {
        Ok(&buf[..n])
    }
}

fn str_of(b: &[u8]) -> Result<&str> {
    std::str::from_utf8(b).map_err(|e| Error::DecodeError(e.to_string()))
}

/// Returns the number of bytes the value starting at `buf[0]` occupies,
/// recursing into arrays and maps.
pub fn skip_value(buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Err(Error::DecodeError("empty buffer".into()));
    }
    let marker = Marker::from_u8(buf[0]);
    Ok(match marker {
        Marker::FixArray(n) => skip_seq(&buf[1..], n as usize)? + 1,
        Marker::Array16 => {
            let n = be16(need(&buf[1..], 2)?) as usize;
            skip_seq(&buf[3..], n)? + 3
        }
        Marker::Array32 => {
            let n = be32(need(&buf[1..], 4)?) as usize;
            skip_seq(&buf[5..], n)? + 5
        }
        Marker::FixMap(n) => skip_seq(&buf[1..], (n as usize) * 2)? + 1,
        Marker::Map16 => {
            let n = be16(need(&buf[1..], 2)?) as usize;
            skip_seq(&buf[3..], n * 2)? + 3
        }
        Marker::Map32 => {
            let n = be32(need(&buf[1..], 4)?) as usize;
            skip_seq(&buf[5..], n * 2)? + 5
        }
        _ => decode_scalar(buf)?.1,
    })
}

fn skip_seq(mut buf: &[u8], count: usize) -> Result<usize> {
    let mut total = 0;
    for _ in 0..count {
        let n = skip_value(buf)?;
        total += n;
        buf = &buf[n..];
    }
    Ok(total)
}

/// Read the array header at the start of `buf`, returning `(count, header_len)`.
pub fn read_array_header(buf: &[u8]) -> Result<(u32, usize)> {
    if buf.is_empty() {
        return Err(Error::DecodeError("empty buffer".into()));
    }
    match Marker::from_u8(buf[0]) {
        Marker::FixArray(n) => Ok((n as u32, 1)),
        Marker::Array16 => Ok((be16(need(&buf[1..], 2)?) as u32, 3)),
        Marker::Array32 => Ok((be32(need(&buf[1..], 4)?), 5)),
        other => Err(Error::DecodeError(format!(
            "expected array header, found {:?}",
            other
        ))),
    }
}

impl<'a> Scalar<'a> {
    pub fn compare_cross_numeric(&self, other: &Scalar<'_>) -> Option<std::cmp::Ordering> {
        use Scalar::*;
        let a = self.as_f64_lossless();
        let b = other.as_f64_lossless();
        match (self, other) {
            (UInt(x), UInt(y)) => Some(x.cmp(y)),
            (Int(x), Int(y)) => Some(x.cmp(y)),
            (UInt(x), Int(y)) => {
                if *y < 0 {
                    Some(std::cmp::Ordering::Greater)
                } else {
                    Some(x.cmp(&(*y as u64)))
                }
            }
            (Int(x), UInt(y)) => {
                if *x < 0 {
                    Some(std::cmp::Ordering::Less)
                } else {
                    Some((*x as u64).cmp(y))
                }
            }
            _ => a.partial_cmp(&b),
        }
    }

    fn as_f64_lossless(&self) -> f64 {
        match self {
            Scalar::UInt(v) => *v as f64,
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
            _ => f64::NAN,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Scalar::Nil)
    }
}
