//! # Data Model
//!
//! Fundamental value types shared across the storage engine: [`Identifier`],
//! [`Text`], [`Value`], [`Action`], [`Version`], and the [`Composite`] key
//! used by bloom filters and index sidecars.
//!
//! ## Design Invariants
//!
//! - Every type here implements [`crate::encoding::Encode`] /
//!   [`crate::encoding::Decode`] so it can be written to and read from
//!   blocks, buffer pages, and the wire `Write` format with a single,
//!   hand-rolled, dependency-free codec (see [`crate::encoding`]).
//! - [`Value`] has a total order across all of its variants, including the
//!   two sentinels `NEG_INF` and `POS_INF` used by range predicates.
//! - [`Composite`] hashing is stable across process runs and platforms —
//!   it deliberately does not use `std::hash::Hash`/`DefaultHasher`, whose
//!   algorithm is not guaranteed stable across Rust versions.

pub mod text;
pub mod value;

#[cfg(test)]
mod tests;

pub use text::Text;
pub use value::Value;

use crate::encoding::{self, EncodingError};

// ------------------------------------------------------------------------------------------------
// Identifier
// ------------------------------------------------------------------------------------------------

/// A 64-bit unsigned record identifier.
///
/// `Identifier` is the locator dimension of the primary family and the
/// value dimension of the secondary family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub u64);

impl Identifier {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl encoding::Encode for Identifier {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl encoding::Decode for Identifier {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (v, n) = u64::decode_from(buf)?;
        Ok((Self(v), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Action
// ------------------------------------------------------------------------------------------------

/// The kind of mutation a [`crate::write::Write`] represents.
///
/// `Compare` is a read-time-only sentinel used by higher layers evaluating
/// predicates against the current buffer/database state; it is never
/// constructed by the write path and must never be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Remove,
    Compare,
}

impl Action {
    /// Returns the single-byte wire tag for this action.
    ///
    /// `Compare` has no wire tag: encoding a `Compare` action is a logic
    /// error in the caller and is rejected rather than silently persisted.
    fn wire_tag(self) -> Result<u8, EncodingError> {
        match self {
            Action::Add => Ok(0),
            Action::Remove => Ok(1),
            Action::Compare => Err(EncodingError::Custom(
                "Action::Compare must never be persisted".into(),
            )),
        }
    }
}

impl encoding::Encode for Action {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.wire_tag()?.encode_to(buf)
    }
}

impl encoding::Decode for Action {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let action = match tag {
            0 => Action::Add,
            1 => Action::Remove,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Action",
                });
            }
        };
        Ok((action, n))
    }
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// A monotonic, microsecond-resolution logical timestamp.
///
/// Uniqueness is guaranteed by the clock source ([`Version::next`]), not
/// by wall-clock resolution alone: if two calls land in the same
/// microsecond, the counter is bumped past any previously issued value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl encoding::Encode for Version {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl encoding::Decode for Version {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (v, n) = u64::decode_from(buf)?;
        Ok((Self(v), n))
    }
}

/// Process-wide monotonic clock handing out strictly-increasing
/// [`Version`] stamps, uniqued past wall-clock resolution.
///
/// Grounded on the teacher's `Memtable::next_lsn` (`AtomicU64`, `fetch_add`)
/// in `src/memtable/mod.rs`, generalised into a shared clock so Buffer and
/// Database agree on one version space.
#[derive(Debug, Default)]
pub struct Clock {
    last: std::sync::atomic::AtomicU64,
}

impl Clock {
    pub const fn new() -> Self {
        Self {
            last: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Returns a version strictly greater than any previously returned by
    /// this clock, derived from the current wall-clock microsecond count
    /// but bumped forward when the wall clock has not advanced.
    pub fn next(&self) -> Version {
        use std::sync::atomic::Ordering;

        let now_micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = if now_micros > prev { now_micros } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Version(candidate),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Advances the clock so that future calls to [`Clock::next`] never
    /// return a value less than or equal to `version`. Used during
    /// recovery to resume after the highest version observed on disk.
    pub fn observe(&self, version: Version) {
        use std::sync::atomic::Ordering;
        let mut prev = self.last.load(Ordering::SeqCst);
        while version.0 > prev {
            match self.last.compare_exchange_weak(
                prev,
                version.0,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Composite
// ------------------------------------------------------------------------------------------------

/// A fixed-width, run- and platform-stable hash over an ordered list of
/// [`crate::encoding::Encode`] components.
///
/// Used as the bloom filter key and the index sidecar key. Two components
/// that encode to the same bytes always hash to the same `Composite`,
/// independent of process, platform endianness, or Rust version — which
/// rules out `std::hash::Hash` (the algorithm and its stability are not
/// guaranteed across Rust versions). Instead this implements FNV-1a, a
/// simple, fully specified, 64-bit algorithm, applied twice with distinct
/// offset bases to fill 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Composite(pub [u8; 16]);

const FNV_OFFSET_LO: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_OFFSET_HI: u64 = 0x9e37_79b9_7f4a_7c15;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

impl Composite {
    /// Builds a composite from the byte-stable encoding of each component,
    /// in order. A length-prefix separates components so that, e.g.,
    /// `("ab", "c")` and `("a", "bc")` never collide.
    pub fn of(parts: &[&dyn encoding::Encode]) -> Result<Self, EncodingError> {
        let mut joined = Vec::new();
        for part in parts {
            let bytes = encoding::encode_to_vec(*part)?;
            (bytes.len() as u32).encode_to(&mut joined)?;
            joined.extend_from_slice(&bytes);
        }
        Ok(Self::of_bytes(&joined))
    }

    /// Builds a composite directly from raw bytes (used when the caller
    /// already has a canonical byte representation, e.g. during repair
    /// when replaying raw block data).
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut lo = FNV_OFFSET_LO;
        let mut hi = FNV_OFFSET_HI;
        for &b in bytes {
            lo ^= b as u64;
            lo = lo.wrapping_mul(FNV_PRIME);
            hi ^= (b as u64).wrapping_add(1);
            hi = hi.wrapping_mul(FNV_PRIME).rotate_left(13);
        }
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&lo.to_le_bytes());
        out[8..].copy_from_slice(&hi.to_le_bytes());
        Composite(out)
    }
}

impl encoding::Encode for Composite {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl encoding::Decode for Composite {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bytes, n) = <[u8; 16]>::decode_from(buf)?;
        Ok((Composite(bytes), n))
    }
}
