//! One-sided composite bloom filters.
//!
//! Every [`crate::block::Block`] carries a bloom filter over the
//! [`crate::model::Composite`] keys it contains, so a lookup can skip the
//! block entirely instead of seeking into its data region. The filter is
//! one-sided: it never produces a false negative, so `may_contain() ==
//! false` is a definitive answer, while `true` only means "worth
//! checking".
//!
//! On-disk framing mirrors the teacher's WAL/SSTable block layout:
//!
//! ```text
//! [MAGIC: 4][VERSION: u32][ITEM_COUNT: u64][FP_RATE_BITS: u64]
//! [FILTER_LEN: u32][FILTER_BYTES][CRC32_LE]
//! ```
//!
//! so corruption of the filter body is detected the same way corruption of
//! a WAL record or SSTable block is detected, and a corrupted filter can
//! be repaired by rescanning the block's data and rebuilding from scratch
//! (see [`CompositeFilter::repair_from`]).

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Composite;

const FILTER_MAGIC: [u8; 4] = *b"BLM0";
const FILTER_VERSION: u32 = 1;

/// Target false-positive rate for newly built filters.
///
/// Matches the teacher's SSTable bloom (`SST_BLOOM_FILTER_FALSE_POSITIVE_RATE`);
/// reused verbatim since both are point-lookup filters over variable-size
/// key sets sized at construction time.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Errors returned by [`CompositeFilter`] persistence and repair.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BloomError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch in bloom filter body")]
    ChecksumMismatch,

    #[error("bloom filter header magic or version mismatch")]
    InvalidHeader,

    #[error("bloom filter library error: {0}")]
    Library(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A persistent, one-sided bloom filter over [`Composite`] keys.
pub struct CompositeFilter {
    inner: Bloom<Composite>,
    item_count: u64,
    fp_rate: f64,
}

impl CompositeFilter {
    /// Builds an empty filter sized for `expected_items` entries at
    /// [`DEFAULT_FALSE_POSITIVE_RATE`].
    pub fn new(expected_items: u64) -> Result<Self, BloomError> {
        Self::with_fp_rate(expected_items, DEFAULT_FALSE_POSITIVE_RATE)
    }

    pub fn with_fp_rate(expected_items: u64, fp_rate: f64) -> Result<Self, BloomError> {
        let count = expected_items.max(1);
        let inner = Bloom::new_for_fp_rate(count as usize, fp_rate)
            .map_err(|e| BloomError::Library(format!("{e:?}")))?;
        Ok(Self {
            inner,
            item_count: count,
            fp_rate,
        })
    }

    /// Builds a filter from an exact set of composites, e.g. when a block
    /// is being built from records already held in memory.
    pub fn build<'a, I>(composites: I, fp_rate: f64) -> Result<Self, BloomError>
    where
        I: IntoIterator<Item = &'a Composite>,
    {
        let items: Vec<&Composite> = composites.into_iter().collect();
        let mut filter = Self::with_fp_rate(items.len() as u64, fp_rate)?;
        for c in items {
            filter.insert(c);
        }
        Ok(filter)
    }

    pub fn insert(&mut self, key: &Composite) {
        self.inner.set(key);
    }

    /// Returns `false` only when `key` is definitely absent; `true` means
    /// "maybe present, go check the block".
    pub fn may_contain(&self, key: &Composite) -> bool {
        self.inner.check(key)
    }

    /// Serializes this filter's body (not including the framing header)
    /// to bytes, for embedding inside a block's sidecar region.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.as_slice().to_vec()
    }

    /// Writes the full framed filter (header + body + CRC) to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BloomError> {
        let body = self.to_bytes();

        let mut out = Vec::with_capacity(4 + 4 + 8 + 8 + 4 + body.len() + 4);
        out.extend_from_slice(&FILTER_MAGIC);
        out.extend_from_slice(&FILTER_VERSION.to_le_bytes());
        out.extend_from_slice(&self.item_count.to_le_bytes());
        out.extend_from_slice(&self.fp_rate.to_bits().to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);

        let mut hasher = Crc32::new();
        hasher.update(&body);
        out.extend_from_slice(&hasher.finalize().to_le_bytes());

        let mut file = File::create(path.as_ref())?;
        file.write_all(&out)?;
        file.sync_all()?;
        debug!(bytes = out.len(), path = %path.as_ref().display(), "wrote bloom filter");
        Ok(())
    }

    /// Reads and verifies a filter previously written with [`Self::save`].
    ///
    /// On checksum failure the caller should fall back to
    /// [`Self::repair_from`] rather than treating the block as unreadable
    /// — a filter is a pure optimization and can always be rebuilt from
    /// the block's own data.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BloomError> {
        let mut file = File::open(path.as_ref())?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, BloomError> {
        if buf.len() < 4 + 4 + 8 + 8 + 4 + 4 {
            return Err(BloomError::InvalidHeader);
        }
        let mut off = 0;
        let magic: [u8; 4] = buf[off..off + 4].try_into().unwrap();
        off += 4;
        if magic != FILTER_MAGIC {
            return Err(BloomError::InvalidHeader);
        }
        let version = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        if version != FILTER_VERSION {
            return Err(BloomError::InvalidHeader);
        }
        let item_count = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let fp_rate = f64::from_bits(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()));
        off += 8;
        let body_len = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as usize;
        off += 4;

        if buf.len() < off + body_len + 4 {
            return Err(BloomError::InvalidHeader);
        }
        let body = &buf[off..off + body_len];
        let stored_crc = u32::from_le_bytes(buf[off + body_len..off + body_len + 4].try_into().unwrap());

        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(BloomError::ChecksumMismatch);
        }

        let inner = Bloom::from_slice(body).map_err(|e| BloomError::Library(format!("{e:?}")))?;
        Ok(Self {
            inner,
            item_count,
            fp_rate,
        })
    }

    /// Rebuilds a filter from scratch by rescanning an authoritative set
    /// of composites, discarding whatever filter (if any) previously
    /// existed. Used when [`Self::load`] reports a checksum mismatch, or
    /// when a block's filter sidecar is missing entirely.
    pub fn repair_from<'a, I>(composites: I) -> Result<Self, BloomError>
    where
        I: IntoIterator<Item = &'a Composite>,
    {
        warn!("rebuilding bloom filter from block data");
        Self::build(composites, DEFAULT_FALSE_POSITIVE_RATE)
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("item_count", &self.item_count)
            .field("fp_rate", &self.fp_rate)
            .finish()
    }
}
