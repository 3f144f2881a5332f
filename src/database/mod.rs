//! # Database
//!
//! Owns the three parallel block-family lists (primary, secondary,
//! search), the bounded record caches sitting in front of them, and the
//! master read/write lock guarding structural changes to the lists
//! (`triggerSync` swapping in new current blocks).
//!
//! No executor crate is pulled in for the parallel block load/write/sync
//! fan-out — like the teacher's `Engine::open`/flush path, which drives
//! everything under its own `RwLock` without a thread pool, parallelism
//! here is a handful of `std::thread::scope` spawns, one per family.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockError, BlockPaths, Revision};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::model::{Action, Clock, Composite, Identifier, Text, Value, Version};
use crate::record::search::{self, SearchRecord, TermRef};
use crate::record::{Record, RecordError};
use crate::write::Write;

pub type PrimaryBlock = Block<Identifier, Text, Value>;
pub type SecondaryBlock = Block<Text, Value, Identifier>;
pub type SearchBlock = Block<Text, Text, TermRef>;
pub type PrimaryRecord = Record<Identifier, Text, Value>;
pub type SecondaryRecord = Record<Text, Value, Identifier>;

/// Spec §5's "~100,000 entries" record-cache guidance.
const CACHE_CAPACITY: usize = 100_000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatabaseError {
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("buffer error: {0}")]
    Buffer(#[from] crate::buffer::BufferError),
}

struct BlockLists {
    primary: Vec<Arc<PrimaryBlock>>,
    secondary: Vec<Arc<SecondaryBlock>>,
    search: Vec<Arc<SearchBlock>>,
}

/// The on-disk, multi-family, multi-version store sitting behind the
/// Buffer. See the module docs and spec §4.7 for the startup/accept/sync
/// lifecycle.
pub struct Database {
    primary_dir: PathBuf,
    secondary_dir: PathBuf,
    search_dir: PathBuf,
    clock: Arc<Clock>,
    blocks: RwLock<BlockLists>,
    primary_cache: Mutex<LruCache<Identifier, PrimaryRecord>>,
    primary_partial_cache: Mutex<LruCache<(Identifier, Text), PrimaryRecord>>,
    secondary_cache: Mutex<LruCache<Text, SecondaryRecord>>,
    first_write_guard: Mutex<bool>,
}

impl Database {
    /// Loads (or creates) the on-disk family directories under `dir`,
    /// discovers and opens existing blocks, prunes half-synced crash
    /// residue, and mints an initial empty mutable block per family.
    pub fn start(dir: impl AsRef<Path>, clock: Arc<Clock>) -> Result<Self, DatabaseError> {
        let dir = dir.as_ref();
        let primary_dir = dir.join("cpb");
        let secondary_dir = dir.join("csb");
        let search_dir = dir.join("ctb");
        fs::create_dir_all(&primary_dir)?;
        fs::create_dir_all(&secondary_dir)?;
        fs::create_dir_all(&search_dir)?;

        let (primary_entries, secondary_entries, search_entries) = std::thread::scope(|scope| {
            let p = scope.spawn(|| scan_family_ids(&primary_dir));
            let s = scope.spawn(|| scan_family_ids(&secondary_dir));
            let t = scope.spawn(|| scan_family_ids(&search_dir));
            (
                p.join().expect("scan thread panicked"),
                s.join().expect("scan thread panicked"),
                t.join().expect("scan thread panicked"),
            )
        });
        let primary_entries = primary_entries?;
        let secondary_entries = secondary_entries?;
        let search_entries = search_entries?;

        let primary_ids: HashSet<u64> = primary_entries.iter().map(|(id, _)| *id).collect();
        let secondary_ids: HashSet<u64> = secondary_entries.iter().map(|(id, _)| *id).collect();
        let search_ids: HashSet<u64> = search_entries.iter().map(|(id, _)| *id).collect();

        let keep: HashSet<u64> = primary_ids.intersection(&secondary_ids).copied().collect();
        if primary_ids.len() != keep.len() || secondary_ids.len() != keep.len() {
            warn!(
                primary = primary_ids.len(),
                secondary = secondary_ids.len(),
                kept = keep.len(),
                "pruned half-synced blocks not present in both primary and secondary"
            );
        }
        let keep_search: HashSet<u64> = search_ids.intersection(&keep).copied().collect();

        let mut kept_ids: Vec<u64> = keep.into_iter().collect();
        kept_ids.sort_unstable();
        let mut kept_search_ids: Vec<u64> = keep_search.into_iter().collect();
        kept_search_ids.sort_unstable();

        let (primary, secondary, search) = std::thread::scope(|scope| {
            let p = scope.spawn(|| open_blocks::<Identifier, Text, Value>(&primary_dir, &kept_ids));
            let s = scope.spawn(|| open_blocks::<Text, Value, Identifier>(&secondary_dir, &kept_ids));
            let t = scope.spawn(|| open_blocks::<Text, Text, TermRef>(&search_dir, &kept_search_ids));
            (
                p.join().expect("open thread panicked"),
                s.join().expect("open thread panicked"),
                t.join().expect("open thread panicked"),
            )
        });

        let db = Self {
            primary_dir,
            secondary_dir,
            search_dir,
            clock,
            blocks: RwLock::new(BlockLists { primary, secondary, search }),
            primary_cache: Mutex::new(LruCache::new(cache_capacity())),
            primary_partial_cache: Mutex::new(LruCache::new(cache_capacity())),
            secondary_cache: Mutex::new(LruCache::new(cache_capacity())),
            first_write_guard: Mutex::new(true),
        };

        db.trigger_sync(false)?;
        info!(dir = %dir.display(), "database started");
        Ok(db)
    }

    /// Applies `write` to all three families. Returns `false` (without
    /// effect) if this is the first write observed since startup and it
    /// is already reflected in the persisted primary record — a
    /// re-transported write surviving a crash mid-transport.
    pub fn accept(&self, write: &Write) -> Result<bool, DatabaseError> {
        let mut guard = self.first_write_guard.lock().expect("database first-write guard poisoned");
        if *guard {
            *guard = false;
            drop(guard);
            if self.already_persisted(write)? {
                warn!(record = %write.record, key = %write.key, "skipping re-transported write already present in database");
                return Ok(false);
            }
        } else {
            drop(guard);
        }

        let (primary, secondary, search) = {
            let lists = self.blocks.read().expect("database blocks poisoned");
            (
                Arc::clone(lists.primary.last().expect("database always has a current primary block")),
                Arc::clone(lists.secondary.last().expect("database always has a current secondary block")),
                Arc::clone(lists.search.last().expect("database always has a current search block")),
            )
        };

        let record = write.record;
        let key = write.key.clone();
        let value = write.value.clone();
        let version = write.version;
        let action = write.action;
        let tokens = search_tokens(&value, record);

        std::thread::scope(|scope| -> Result<(), DatabaseError> {
            let hp = scope.spawn(|| primary.insert_unsafe(record, key.clone(), value.clone(), version, action));
            let hs = scope.spawn(|| secondary.insert_unsafe(key.clone(), value.clone(), record, version, action));
            let ht = scope.spawn(|| -> Result<(), BlockError> {
                for (term, term_ref) in &tokens {
                    search.insert_unsafe(key.clone(), term.clone(), *term_ref, version, action)?;
                }
                Ok(())
            });
            hp.join().expect("primary insert thread panicked")?;
            hs.join().expect("secondary insert thread panicked")?;
            ht.join().expect("search insert thread panicked")?;
            Ok(())
        })?;

        self.freshen_caches(record, &key, &value, version, action);
        Ok(true)
    }

    fn already_persisted(&self, write: &Write) -> Result<bool, DatabaseError> {
        let record = self.get_primary_record(write.record)?;
        Ok(record.last_version(&write.key).is_some_and(|last| last >= write.version))
    }

    fn freshen_caches(&self, record: Identifier, key: &Text, value: &Value, version: Version, action: Action) {
        let primary_revision = Revision::new(record, key.clone(), value.clone(), version, action);
        let secondary_revision = Revision::new(key.clone(), value.clone(), record, version, action);

        let mut primary_cache = self.primary_cache.lock().expect("database primary cache poisoned");
        if let Some(existing) = primary_cache.get_mut(&record) {
            if let Err(err) = existing.append(primary_revision.clone()) {
                warn!(%err, "evicting stale cached primary record after append conflict");
                primary_cache.pop(&record);
            }
        }
        drop(primary_cache);

        let partial_key = (record, key.clone());
        let mut partial_cache = self.primary_partial_cache.lock().expect("database partial cache poisoned");
        if let Some(existing) = partial_cache.get_mut(&partial_key) {
            if let Err(err) = existing.append(primary_revision) {
                warn!(%err, "evicting stale cached partial primary record after append conflict");
                partial_cache.pop(&partial_key);
            }
        }
        drop(partial_cache);

        let mut secondary_cache = self.secondary_cache.lock().expect("database secondary cache poisoned");
        if let Some(existing) = secondary_cache.get_mut(key) {
            if let Err(err) = existing.append(secondary_revision) {
                warn!(%err, "evicting stale cached secondary record after append conflict");
                secondary_cache.pop(key);
            }
        }
    }

    /// The full materialized primary record for `record`, from cache or
    /// built fresh by seeking every primary block.
    pub fn get_primary_record(&self, record: Identifier) -> Result<PrimaryRecord, DatabaseError> {
        if let Some(cached) = self.primary_cache.lock().expect("database primary cache poisoned").get(&record) {
            return Ok(cached.clone());
        }

        let mut revisions = Vec::new();
        {
            let lists = self.blocks.read().expect("database blocks poisoned");
            for block in &lists.primary {
                block.seek_locator(&record, &mut revisions)?;
            }
        }
        let mut rec = PrimaryRecord::new(record);
        for revision in revisions {
            rec.append(revision)?;
        }

        self.primary_cache
            .lock()
            .expect("database primary cache poisoned")
            .put(record, rec.clone());
        Ok(rec)
    }

    /// The primary record for `record`, narrowed to `key` only.
    pub fn get_primary_record_partial(&self, record: Identifier, key: &Text) -> Result<PrimaryRecord, DatabaseError> {
        let cache_key = (record, key.clone());
        if let Some(cached) = self
            .primary_partial_cache
            .lock()
            .expect("database partial cache poisoned")
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        let mut revisions = Vec::new();
        {
            let lists = self.blocks.read().expect("database blocks poisoned");
            for block in &lists.primary {
                block.seek_locator_key(&record, key, &mut revisions)?;
            }
        }
        let mut rec = PrimaryRecord::new(record);
        for revision in revisions {
            rec.append(revision)?;
        }

        self.primary_partial_cache
            .lock()
            .expect("database partial cache poisoned")
            .put(cache_key, rec.clone());
        Ok(rec)
    }

    /// The secondary record for `key` (all records currently holding
    /// some value under `key`, indexed by value).
    pub fn get_secondary_record(&self, key: &Text) -> Result<SecondaryRecord, DatabaseError> {
        if let Some(cached) = self.secondary_cache.lock().expect("database secondary cache poisoned").get(key) {
            return Ok(cached.clone());
        }

        let mut revisions = Vec::new();
        {
            let lists = self.blocks.read().expect("database blocks poisoned");
            for block in &lists.secondary {
                block.seek_locator(key, &mut revisions)?;
            }
        }
        let mut rec = SecondaryRecord::new(key.clone());
        for revision in revisions {
            rec.append(revision)?;
        }

        self.secondary_cache
            .lock()
            .expect("database secondary cache poisoned")
            .put(key.clone(), rec.clone());
        Ok(rec)
    }

    /// The materialized search record for `key`, built fresh from every
    /// search block — never cached, since a search record can be
    /// arbitrarily large. Exposed so `engine::search` can merge
    /// not-yet-transported buffer writes onto it before querying.
    pub fn get_search_record_raw(&self, key: &Text) -> Result<SearchRecord, DatabaseError> {
        let mut revisions = Vec::new();
        {
            let lists = self.blocks.read().expect("database blocks poisoned");
            for block in &lists.search {
                block.seek_locator(key, &mut revisions)?;
            }
        }
        let mut rec: SearchRecord = Record::new(key.clone());
        for revision in revisions {
            if let Err(err) = rec.append_same_version_allowed(revision) {
                warn!(%err, key = %key, "dropping out-of-order search revision while rebuilding search record");
            }
        }
        Ok(rec)
    }

    /// Evaluates `query` against the search family for `key`.
    pub fn get_search_record(&self, key: &Text, query: &str) -> Result<BTreeSet<Identifier>, DatabaseError> {
        let rec = self.get_search_record_raw(key)?;
        Ok(search::search(&rec, query))
    }

    pub fn contains(&self, record: Identifier) -> Result<bool, DatabaseError> {
        Ok(!self.get_primary_record(record)?.current_map().is_empty())
    }

    /// Under the master write-lock: optionally syncs each family's
    /// current block (no-op if that block is already immutable or empty),
    /// then mints a fresh mutable block for any family whose current
    /// block just became — or already was — immutable.
    pub fn trigger_sync(&self, do_sync: bool) -> Result<(), DatabaseError> {
        let next_id = self.clock.next().value();
        let mut lists = self.blocks.write().expect("database blocks poisoned");
        let BlockLists { primary, secondary, search } = &mut *lists;
        let primary_dir = &self.primary_dir;
        let secondary_dir = &self.secondary_dir;
        let search_dir = &self.search_dir;

        std::thread::scope(|scope| -> Result<(), DatabaseError> {
            let hp = scope.spawn(|| sync_and_replace(primary, primary_dir, do_sync, next_id));
            let hs = scope.spawn(|| sync_and_replace(secondary, secondary_dir, do_sync, next_id));
            let ht = scope.spawn(|| sync_and_replace(search, search_dir, do_sync, next_id));
            hp.join().expect("sync thread panicked")?;
            hs.join().expect("sync thread panicked")?;
            ht.join().expect("sync thread panicked")?;
            Ok(())
        })?;

        debug!(block_id = next_id, do_sync, "triggered database sync");
        Ok(())
    }

    pub fn block_counts(&self) -> (usize, usize, usize) {
        let lists = self.blocks.read().expect("database blocks poisoned");
        (lists.primary.len(), lists.secondary.len(), lists.search.len())
    }
}

/// Lets [`crate::buffer::Buffer`] drain into a `Database` without the
/// buffer module depending on `database` directly.
impl crate::buffer::TransportDestination for Database {
    type Error = DatabaseError;

    fn accept(&self, write: Write) -> Result<(), Self::Error> {
        Database::accept(self, &write)?;
        Ok(())
    }

    fn trigger_sync(&self, do_sync: bool) -> Result<(), Self::Error> {
        Database::trigger_sync(self, do_sync)
    }
}

fn cache_capacity() -> NonZeroUsize {
    NonZeroUsize::new(CACHE_CAPACITY).expect("CACHE_CAPACITY is nonzero")
}

/// Tokenizes a string/tag value into `(term, TermRef)` pairs suitable for
/// search-family revisions; any other value type contributes none.
fn search_tokens(value: &Value, record: Identifier) -> Vec<(Text, TermRef)> {
    let text = match value {
        Value::String(t) | Value::Tag(t) => t.as_str(),
        _ => return Vec::new(),
    };
    search::tokenize(text)
        .into_iter()
        .enumerate()
        .map(|(position, token)| (Text::intern(&token), TermRef::new(record, position as u32)))
        .collect()
}

/// Scans `dir` for `<id>.blk` files, parsing each file's id from its
/// filename and its content hash (for crash-residue dedup) by hashing the
/// raw bytes — unreadable or unparsable files are skipped and logged.
fn scan_family_ids(dir: &Path) -> Result<Vec<(u64, PathBuf)>, DatabaseError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "blk"))
        .collect();
    paths.sort();

    let mut seen_hashes: HashSet<Composite> = HashSet::new();
    let mut entries = Vec::new();
    for path in paths {
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            warn!(path = %path.display(), "skipping block file with unparsable id");
            continue;
        };
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable block file");
                continue;
            }
        };
        let hash = Composite::of_bytes(&bytes);
        if !seen_hashes.insert(hash) {
            warn!(path = %path.display(), id, "skipping duplicate-content block file");
            continue;
        }
        entries.push((id, path));
    }
    Ok(entries)
}

/// Opens every kept block id in `family_dir`, skipping (and logging) any
/// that fail to construct as malformed.
fn open_blocks<L, K, V>(family_dir: &Path, ids: &[u64]) -> Vec<Arc<Block<L, K, V>>>
where
    L: Ord + Clone + Encode + Decode + std::fmt::Debug,
    K: Ord + Clone + Encode + Decode + std::fmt::Debug,
    V: Ord + Clone + Encode + Decode + std::fmt::Debug,
{
    ids.iter()
        .filter_map(|&id| {
            let paths = BlockPaths::for_id(family_dir, id);
            match Block::open(id, &paths) {
                Ok(block) => Some(Arc::new(block)),
                Err(err) => {
                    warn!(id, %err, "skipping malformed block");
                    None
                }
            }
        })
        .collect()
}

/// Syncs `list`'s current block (if `do_sync` and it is still mutable and
/// nonempty) and mints a new mutable block only if the current one just
/// became — or already was — immutable, so an empty sync cycle (spec
/// §4.7: "search blocks may legitimately be absent") never leaves two
/// mutable blocks stacked in the same family.
fn sync_and_replace<L, K, V>(list: &mut Vec<Arc<Block<L, K, V>>>, dir: &Path, do_sync: bool, next_id: u64) -> Result<(), DatabaseError>
where
    L: Ord + Clone + Encode + Decode + std::fmt::Debug,
    K: Ord + Clone + Encode + Decode + std::fmt::Debug,
    V: Ord + Clone + Encode + Decode + std::fmt::Debug,
{
    if do_sync {
        if let Some(current) = list.last() {
            if current.is_mutable() {
                let paths = BlockPaths::for_id(dir, current.block_id());
                current.sync(&paths)?;
            }
        }
    }

    let needs_new = match list.last() {
        Some(current) => !current.is_mutable(),
        None => true,
    };
    if needs_new {
        list.push(Arc::new(Block::new_mutable(next_id)?));
    }
    Ok(())
}
