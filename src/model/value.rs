//! The tagged-union [`Value`] type with a total order across all variants.

use crate::encoding::{self, EncodingError};
use crate::model::{Identifier, Text};

/// A single stored value.
///
/// Carries every primitive domain type the engine persists, plus the two
/// range sentinels `NEG_INF`/`POS_INF` used by predicate evaluation (they
/// are never written by a client; `Value::NEG_INF`/`Value::POS_INF` exist
/// purely so [`super::super::lock::Operator`] ranges can be expressed in
/// terms of ordinary `Value` comparisons).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Text),
    Tag(Text),
    Link(Identifier),
    Timestamp(i64),
    /// Sentinel: compares less than every other value.
    NegativeInfinity,
    /// Sentinel: compares greater than every other value.
    PositiveInfinity,
}

/// Stable per-variant rank used to totally order values of different
/// underlying types. Order is significant and must never change once
/// blocks have been written with it, since it defines on-disk sort order.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::NegativeInfinity => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) => 2,
        Value::Long(_) => 3,
        Value::Float(_) => 4,
        Value::Double(_) => 5,
        Value::Timestamp(_) => 6,
        Value::Link(_) => 7,
        Value::Tag(_) => 8,
        Value::String(_) => 9,
        Value::PositiveInfinity => 10,
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        use Value::*;

        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }

        match (self, other) {
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Link(a), Link(b)) => a.cmp(b),
            (Tag(a), Tag(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (NegativeInfinity, NegativeInfinity) => Ordering::Equal,
            (PositiveInfinity, PositiveInfinity) => Ordering::Equal,
            _ => Ordering::Equal, // unreachable: same rank implies same variant
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        type_rank(self).hash(state);
        match self {
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Long(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Double(f) => f.to_bits().hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Link(id) => id.hash(state),
            Value::Tag(t) | Value::String(t) => t.hash(state),
            Value::NegativeInfinity | Value::PositiveInfinity => {}
        }
    }
}

impl Value {
    pub const NEG_INF: Value = Value::NegativeInfinity;
    pub const POS_INF: Value = Value::PositiveInfinity;

    fn wire_tag(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) => 1,
            Value::Long(_) => 2,
            Value::Float(_) => 3,
            Value::Double(_) => 4,
            Value::String(_) => 5,
            Value::Tag(_) => 6,
            Value::Link(_) => 7,
            Value::Timestamp(_) => 8,
            Value::NegativeInfinity => 9,
            Value::PositiveInfinity => 10,
        }
    }
}

impl encoding::Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.wire_tag().encode_to(buf)?;
        match self {
            Value::Boolean(b) => b.encode_to(buf),
            Value::Integer(i) => i.to_le_bytes().encode_to(buf),
            Value::Long(i) => i.encode_to(buf),
            Value::Float(f) => f.to_le_bytes().encode_to(buf),
            Value::Double(f) => f.to_le_bytes().encode_to(buf),
            Value::String(s) | Value::Tag(s) => s.encode_to(buf),
            Value::Link(id) => id.encode_to(buf),
            Value::Timestamp(t) => t.encode_to(buf),
            Value::NegativeInfinity | Value::PositiveInfinity => Ok(()),
        }
    }
}

impl encoding::Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        let value = match tag {
            0 => {
                let (b, n) = bool::decode_from(&buf[off..])?;
                off += n;
                Value::Boolean(b)
            }
            1 => {
                let (bytes, n) = <[u8; 4]>::decode_from(&buf[off..])?;
                off += n;
                Value::Integer(i32::from_le_bytes(bytes))
            }
            2 => {
                let (i, n) = i64::decode_from(&buf[off..])?;
                off += n;
                Value::Long(i)
            }
            3 => {
                let (bytes, n) = <[u8; 4]>::decode_from(&buf[off..])?;
                off += n;
                Value::Float(f32::from_le_bytes(bytes))
            }
            4 => {
                let (bytes, n) = <[u8; 8]>::decode_from(&buf[off..])?;
                off += n;
                Value::Double(f64::from_le_bytes(bytes))
            }
            5 => {
                let (s, n) = Text::decode_from(&buf[off..])?;
                off += n;
                Value::String(s)
            }
            6 => {
                let (s, n) = Text::decode_from(&buf[off..])?;
                off += n;
                Value::Tag(s)
            }
            7 => {
                let (id, n) = Identifier::decode_from(&buf[off..])?;
                off += n;
                Value::Link(id)
            }
            8 => {
                let (t, n) = i64::decode_from(&buf[off..])?;
                off += n;
                Value::Timestamp(t)
            }
            9 => Value::NegativeInfinity,
            10 => Value::PositiveInfinity,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Value",
                });
            }
        };
        Ok((value, off))
    }
}
