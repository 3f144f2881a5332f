//! # Block
//!
//! An immutable, sorted, on-disk run of [`Revision`]s belonging to one
//! family (primary, secondary, or search), plus its bloom filter and
//! index sidecar. A block starts *mutable* — an in-memory sorted
//! multiset accepting inserts — and becomes *immutable* exactly once,
//! via [`Block::sync`].
//!
//! Generic over the family's sort triple `(L, K, V)` rather than an
//! inheritance hierarchy of three block subclasses: the comparator and
//! revision shape are the only things that vary per family, and Rust
//! generics express that directly (see `DESIGN.md` for why this replaces
//! the abstract-base-class design the original used).
//!
//! State machine:
//! ```text
//! (created-mutable) --insert*--> (mutable) --sync--> (immutable) --evict--> (disk-only)
//! ```
//!
//! Grounded on the teacher's SSTable split between building
//! (`src/sstable/mod.rs`'s header/footer/bloom/index encoding) and reading
//! (`SSTable::open`, `SSTable::get`, mmap'd zero-copy block access).

pub mod hot_cache;
pub mod index;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::bloom::{BloomError, CompositeFilter};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::model::{Action, Composite, Version};
use index::BlockIndex;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    #[error("index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("attempted to mutate an immutable block")]
    IllegalStateNotMutable,

    #[error("attempted to iterate a still-mutable block as if immutable")]
    IllegalStateMutable,

    #[error("block data is malformed: {0}")]
    MalformedBlock(String),
}

/// A single persisted fact: `(locator, key, value, version, action)`,
/// sorted by `(locator, key, version, value)` within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision<L, K, V> {
    pub locator: L,
    pub key: K,
    pub value: V,
    pub version: Version,
    pub action: Action,
}

impl<L, K, V> Revision<L, K, V> {
    pub fn new(locator: L, key: K, value: V, version: Version, action: Action) -> Self {
        Self {
            locator,
            key,
            value,
            version,
            action,
        }
    }
}

impl<L: Ord, K: Ord, V: Ord> PartialOrd for Revision<L, K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<L: Ord, K: Ord, V: Ord> Ord for Revision<L, K, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.locator, &self.key, &self.version, &self.value).cmp(&(
            &other.locator,
            &other.key,
            &other.version,
            &other.value,
        ))
    }
}

impl<L: Encode, K: Encode, V: Encode> Encode for Revision<L, K, V> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let mut body = Vec::new();
        self.action.encode_to(&mut body)?;
        self.version.encode_to(&mut body)?;
        self.locator.encode_to(&mut body)?;
        let key_bytes = encoding::encode_to_vec(&self.key)?;
        (key_bytes.len() as u32).encode_to(&mut body)?;
        body.extend_from_slice(&key_bytes);
        self.value.encode_to(&mut body)?;

        (body.len() as u32).encode_to(buf)?;
        buf.extend_from_slice(&body);
        Ok(())
    }
}

impl<L: Decode, K: Decode, V: Decode> Decode for Revision<L, K, V> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (body_len, prefix_len) = u32::decode_from(buf)?;
        let body_start = prefix_len;
        let body_end = body_start + body_len as usize;
        if body_end > buf.len() {
            return Err(EncodingError::UnexpectedEof {
                needed: body_len as usize,
                available: buf.len().saturating_sub(body_start),
            });
        }
        let body = &buf[body_start..body_end];
        let mut off = 0;
        let (action, n) = Action::decode_from(&body[off..])?;
        off += n;
        let (version, n) = Version::decode_from(&body[off..])?;
        off += n;
        let (locator, n) = L::decode_from(&body[off..])?;
        off += n;
        let (_key_size, n) = u32::decode_from(&body[off..])?;
        off += n;
        let (key, n) = K::decode_from(&body[off..])?;
        off += n;
        let (value, _n) = V::decode_from(&body[off..])?;

        Ok((
            Revision::new(locator, key, value, version, action),
            body_end,
        ))
    }
}

/// Composite keys computed for one revision, used against the bloom
/// filter and index sidecar: `(L)`, `(L,K)`, and `(L,K,V)`.
fn revision_composites<L: Encode, K: Encode, V: Encode>(
    r: &Revision<L, K, V>,
) -> Result<(Composite, Composite, Composite), EncodingError> {
    let l = Composite::of(&[&r.locator])?;
    let lk = Composite::of(&[&r.locator, &r.key])?;
    let lkv = Composite::of(&[&r.locator, &r.key, &r.value])?;
    Ok((l, lk, lkv))
}

/// The three on-disk paths a synced block occupies.
#[derive(Debug, Clone)]
pub struct BlockPaths {
    pub data: PathBuf,
    pub filter: PathBuf,
    pub index: PathBuf,
}

impl BlockPaths {
    pub fn for_id(dir: impl AsRef<Path>, id: u64) -> Self {
        let dir = dir.as_ref();
        Self {
            data: dir.join(format!("{id}.blk")),
            filter: dir.join(format!("{id}.fltr")),
            index: dir.join(format!("{id}.indx")),
        }
    }
}

enum Store<L, K, V> {
    /// Accepting inserts; not yet written to disk.
    Mutable(BTreeSet<Revision<L, K, V>>),
    /// Frozen. `hot` is `Some` immediately after sync and until the
    /// [`hot_cache::HotCache`] evicts it; `mmap` is always present once
    /// synced so a cold seek can still reach the data.
    Immutable {
        mmap: Mmap,
        hot: Option<Arc<BTreeSet<Revision<L, K, V>>>>,
    },
}

/// A block of revisions for one family. See the module docs for the
/// mutable/immutable state machine.
pub struct Block<L, K, V> {
    pub id: u64,
    mutable: AtomicBool,
    bloom: RwLock<CompositeFilter>,
    index: RwLock<BlockIndex>,
    store: RwLock<Store<L, K, V>>,
    size_bytes: AtomicU64,
}

impl<L, K, V> Block<L, K, V>
where
    L: Ord + Clone + Encode + Decode + std::fmt::Debug,
    K: Ord + Clone + Encode + Decode + std::fmt::Debug,
    V: Ord + Clone + Encode + Decode + std::fmt::Debug,
{
    /// Creates a new, empty, mutable block with the given `block_id`.
    pub fn new_mutable(id: u64) -> Result<Self, BlockError> {
        Ok(Self {
            id,
            mutable: AtomicBool::new(true),
            bloom: RwLock::new(CompositeFilter::new(1024)?),
            index: RwLock::new(BlockIndex::new()),
            store: RwLock::new(Store::Mutable(BTreeSet::new())),
            size_bytes: AtomicU64::new(0),
        })
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.load(Ordering::SeqCst)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::SeqCst)
    }

    /// Inserts a new revision. Takes the block's own write-lock; callers
    /// on a concurrent sorted backing store that already serializes
    /// external access should prefer [`Self::insert_unsafe`].
    pub fn insert(&self, locator: L, key: K, value: V, version: Version, action: Action) -> Result<(), BlockError> {
        self.insert_revision(Revision::new(locator, key, value, version, action), true)
    }

    /// Same as [`Self::insert`] but does not re-check mutability with an
    /// extra acquire/release pair beyond the store lock itself — for
    /// callers (e.g. `Database::accept`) that already serialize family
    /// writers externally and have already established the block is
    /// mutable.
    pub fn insert_unsafe(&self, locator: L, key: K, value: V, version: Version, action: Action) -> Result<(), BlockError> {
        self.insert_revision(Revision::new(locator, key, value, version, action), false)
    }

    fn insert_revision(&self, revision: Revision<L, K, V>, check_mutable: bool) -> Result<(), BlockError> {
        if check_mutable && !self.is_mutable() {
            return Err(BlockError::IllegalStateNotMutable);
        }
        let (l, lk, lkv) = revision_composites(&revision)?;
        let encoded_len = encoding::encode_to_vec(&revision)?.len() as u64;

        {
            let mut store = self.store.write().expect("block store poisoned");
            match &mut *store {
                Store::Mutable(tree) => {
                    tree.insert(revision);
                }
                Store::Immutable { .. } => return Err(BlockError::IllegalStateNotMutable),
            }
        }

        let mut bloom = self.bloom.write().expect("block bloom poisoned");
        bloom.insert(&l);
        bloom.insert(&lk);
        bloom.insert(&lkv);
        drop(bloom);

        self.size_bytes.fetch_add(encoded_len, Ordering::SeqCst);
        Ok(())
    }

    /// Freezes the block, writing its data, bloom filter, and index
    /// sidecar to `paths`. A no-op (with a warning) if the block is
    /// already immutable or still empty.
    pub fn sync(&self, paths: &BlockPaths) -> Result<(), BlockError> {
        if !self.is_mutable() {
            warn!(block_id = self.id, "sync called on already-immutable block; ignoring");
            return Ok(());
        }

        let snapshot = {
            let store = self.store.read().expect("block store poisoned");
            match &*store {
                Store::Mutable(tree) => tree.clone(),
                Store::Immutable { .. } => unreachable!("checked is_mutable above"),
            }
        };

        if snapshot.is_empty() {
            warn!(block_id = self.id, "sync called on empty mutable block; doing nothing");
            return Ok(());
        }

        self.mutable.store(false, Ordering::SeqCst);

        let mut data = Vec::new();
        let mut index_entries = Vec::with_capacity(snapshot.len());
        for revision in &snapshot {
            let start = data.len() as u32;
            revision.encode_to(&mut data)?;
            // "byte offset just past the last byte of the run" — end is
            // exclusive, fixing the off-by-one the original took as
            // `position() - 1` after the final revision.
            let end = data.len() as u32;
            let (l, lk, _lkv) = revision_composites(revision)?;
            index_entries.push((l, lk, start, end));
        }

        let mut file = File::create(&paths.data)?;
        file.write_all(&data)?;
        file.sync_all()?;

        let index = BlockIndex::build(&index_entries);
        index.save(&paths.index)?;
        *self.index.write().expect("block index poisoned") = index;

        {
            let bloom = self.bloom.read().expect("block bloom poisoned");
            bloom.save(&paths.filter)?;
        }

        let mmap_file = File::open(&paths.data)?;
        let mmap = unsafe { Mmap::map(&mmap_file)? };

        *self.store.write().expect("block store poisoned") = Store::Immutable {
            mmap,
            hot: Some(Arc::new(snapshot)),
        };

        debug!(block_id = self.id, bytes = data.len(), entries = index_entries.len(), "synced block");
        Ok(())
    }

    /// Seeks all revisions matching `locator` into `out`, in sorted order.
    pub fn seek_locator(&self, locator: &L, out: &mut Vec<Revision<L, K, V>>) -> Result<(), BlockError> {
        let composite = Composite::of(&[locator])?;
        if !self.bloom.read().expect("block bloom poisoned").may_contain(&composite) {
            return Ok(());
        }

        let store = self.store.read().expect("block store poisoned");
        match &*store {
            Store::Mutable(tree) => {
                out.extend(tree.iter().filter(|r| &r.locator == locator).cloned());
                Ok(())
            }
            Store::Immutable { mmap, hot } => {
                if let Some(hot) = hot {
                    out.extend(hot.iter().filter(|r| &r.locator == locator).cloned());
                    return Ok(());
                }
                let index = self.index.read().expect("block index poisoned");
                match index.locator_range(&composite) {
                    Some((start, end)) => self.decode_range(mmap, start, end, out),
                    None => Ok(()),
                }
            }
        }
    }

    /// Seeks all revisions matching `(locator, key)` into `out`, in sorted order.
    pub fn seek_locator_key(&self, locator: &L, key: &K, out: &mut Vec<Revision<L, K, V>>) -> Result<(), BlockError> {
        let composite = Composite::of(&[locator, key])?;
        if !self.bloom.read().expect("block bloom poisoned").may_contain(&composite) {
            return Ok(());
        }

        let store = self.store.read().expect("block store poisoned");
        match &*store {
            Store::Mutable(tree) => {
                out.extend(
                    tree.iter()
                        .filter(|r| &r.locator == locator && &r.key == key)
                        .cloned(),
                );
                Ok(())
            }
            Store::Immutable { mmap, hot } => {
                if let Some(hot) = hot {
                    out.extend(
                        hot.iter()
                            .filter(|r| &r.locator == locator && &r.key == key)
                            .cloned(),
                    );
                    return Ok(());
                }
                let index = self.index.read().expect("block index poisoned");
                match index.locator_key_range(&composite) {
                    Some((start, end)) => self.decode_range(mmap, start, end, out),
                    None => Ok(()),
                }
            }
        }
    }

    fn decode_range(&self, mmap: &Mmap, start: u32, end: u32, out: &mut Vec<Revision<L, K, V>>) -> Result<(), BlockError> {
        let slice = mmap
            .get(start as usize..end as usize)
            .ok_or_else(|| BlockError::MalformedBlock("index range out of bounds".into()))?;
        let mut offset = 0usize;
        while offset < slice.len() {
            let (revision, consumed) = Revision::decode_from(&slice[offset..])?;
            out.push(revision);
            offset += consumed;
        }
        Ok(())
    }

    /// Rebuilds the bloom filter and index sidecar by rescanning the
    /// block's own data file — the only unrecoverable loss is the data
    /// file itself, which this cannot repair.
    pub fn repair(&self, paths: &BlockPaths) -> Result<(), BlockError> {
        let file = File::open(&paths.data)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut revisions = Vec::new();
        let mut offset = 0usize;
        while offset < mmap.len() {
            let (revision, consumed) = Revision::decode_from(&mmap[offset..])
                .map_err(|e| BlockError::MalformedBlock(e.to_string()))?;
            revisions.push(revision);
            offset += consumed;
        }

        let mut composites = Vec::with_capacity(revisions.len() * 3);
        let mut index_entries = Vec::with_capacity(revisions.len());
        let mut cursor = 0u32;
        for revision in &revisions {
            let (l, lk, lkv) = revision_composites(revision)?;
            let encoded_len = encoding::encode_to_vec(revision)?.len() as u32;
            let start = cursor;
            let end = cursor + encoded_len;
            cursor = end;
            composites.push(l);
            composites.push(lk);
            composites.push(lkv);
            index_entries.push((l, lk, start, end));
        }

        let filter = CompositeFilter::repair_from(&composites)?;
        filter.save(&paths.filter)?;
        let index = BlockIndex::repair_from(&index_entries);
        index.save(&paths.index)?;

        *self.bloom.write().expect("block bloom poisoned") = filter;
        *self.index.write().expect("block index poisoned") = index;
        self.mutable.store(false, Ordering::SeqCst);
        *self.store.write().expect("block store poisoned") = Store::Immutable { mmap, hot: None };

        warn!(block_id = self.id, revisions = revisions.len(), "repaired block from data file");
        Ok(())
    }

    /// Opens a previously-synced block from disk, reading its filter and
    /// index sidecars. Falls back to [`Self::repair`] on corruption.
    pub fn open(id: u64, paths: &BlockPaths) -> Result<Self, BlockError> {
        let file = File::open(&paths.data)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let bloom = match CompositeFilter::load(&paths.filter) {
            Ok(b) => b,
            Err(err) => {
                warn!(block_id = id, %err, "bloom filter unreadable, will repair");
                CompositeFilter::new(1)?
            }
        };
        let index = match BlockIndex::load(&paths.index) {
            Ok(i) => i,
            Err(err) => {
                warn!(block_id = id, %err, "index sidecar unreadable, will repair");
                BlockIndex::new()
            }
        };

        let block = Self {
            id,
            mutable: AtomicBool::new(false),
            bloom: RwLock::new(bloom),
            index: RwLock::new(index),
            store: RwLock::new(Store::Immutable { mmap, hot: None }),
            size_bytes: AtomicU64::new(0),
        };

        let needs_repair = {
            let bloom_empty = block.bloom.read().expect("poisoned").item_count() == 0;
            let index_empty = block.index.read().expect("poisoned").is_empty();
            bloom_empty || index_empty
        };
        if needs_repair {
            block.repair(paths)?;
        }

        Ok(block)
    }

    /// Registers this block's hot in-memory set with a [`hot_cache::HotCache`].
    pub fn as_evictable(self: &Arc<Self>) -> Arc<dyn hot_cache::Evictable>
    where
        L: Send + Sync + 'static,
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        Arc::clone(self) as Arc<dyn hot_cache::Evictable>
    }

    pub fn block_id(&self) -> u64 {
        self.id
    }
}

impl<L, K, V> hot_cache::Evictable for Block<L, K, V>
where
    L: Ord + Clone + Encode + Decode + std::fmt::Debug + Send + Sync,
    K: Ord + Clone + Encode + Decode + std::fmt::Debug + Send + Sync,
    V: Ord + Clone + Encode + Decode + std::fmt::Debug + Send + Sync,
{
    fn evict(&self) {
        let mut store = self.store.write().expect("block store poisoned");
        if let Store::Immutable { hot, .. } = &mut *store {
            if hot.take().is_some() {
                trace!(block_id = self.id, "evicted hot in-memory revision set");
            }
        }
    }

    fn block_id(&self) -> u64 {
        self.id
    }
}
