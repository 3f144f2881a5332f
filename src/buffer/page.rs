//! A single fixed-capacity, mmap'd, append-only journal page.
//!
//! Record framing (`[size:u32][write bytes]`) and the "reserve the full
//! file length up front so it can be mmap'd" trick are carried over from
//! the teacher's `src/wal/mod.rs` append/replay discipline, even though
//! the on-disk shape differs: a WAL grows without bound and is read back
//! sequentially; a `Page` is a fixed-size ring of in-flight writes that
//! gets deleted once fully transported.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use memmap2::MmapMut;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::bloom::CompositeFilter;
use crate::encoding::{self, Decode};
use crate::model::Composite;
use crate::write::Write as BufferWrite;

/// Default page capacity: 8 MiB, matching the teacher's default WAL
/// record-size ceiling scaled up for a whole page of writes.
pub const DEFAULT_PAGE_CAPACITY: u64 = 8 * 1024 * 1024;

const LEN_PREFIX_SIZE: u64 = 4;

/// Size of the persisted `head` cursor stored at the start of every page
/// file: how many of this page's writes have already been transported.
/// Without this, `head` would live only in the in-memory `AtomicU64` and
/// `Page::open` would always resume scanning from the first write,
/// re-emitting already-transported writes into the database after a
/// restart (spec testable property #2, "at-most-once transport").
const HEADER_SIZE: u64 = 8;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] encoding::EncodingError),

    /// The page cannot fit the next write. Handled locally by the
    /// [`super::Buffer`] rolling to a new page — never surfaced past it.
    #[error("page capacity exceeded")]
    CapacityExceeded,
}

/// An append-only mmap'd file of length `capacity`: an 8-byte persisted
/// `head` counter followed by writes in insertion order, plus an
/// in-memory bloom filter over `(record, key, value)` composites. `head`
/// marks how many of this page's writes have already been transported;
/// it is mirrored into the in-memory `AtomicU64` for lock-free reads but
/// every update is flushed back to the file so a restart resumes exactly
/// where transport left off instead of re-emitting already-accepted
/// writes.
pub struct Page {
    path: PathBuf,
    mmap: RwLock<MmapMut>,
    capacity: u64,
    cursor: AtomicU64,
    writes: RwLock<Vec<BufferWrite>>,
    head: AtomicU64,
    bloom: RwLock<CompositeFilter>,
}

impl Page {
    /// Creates a new, empty page backed by a freshly-allocated file of
    /// `capacity` bytes at `path`.
    pub fn create(path: impl AsRef<Path>, capacity: u64) -> Result<Self, PageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.set_len(capacity)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[0..HEADER_SIZE as usize].copy_from_slice(&0u64.to_le_bytes());
        mmap.flush_range(0, HEADER_SIZE as usize)?;

        debug!(path = %path.display(), capacity, "created buffer page");
        Ok(Self {
            path,
            mmap: RwLock::new(mmap),
            capacity,
            cursor: AtomicU64::new(HEADER_SIZE),
            writes: RwLock::new(Vec::new()),
            head: AtomicU64::new(0),
            bloom: RwLock::new(CompositeFilter::new(4096)?),
        })
    }

    /// Reopens an existing page file, reading the persisted `head`
    /// counter and then replaying writes from the `[size:u32][bytes]`
    /// stream that follows it. A `size == 0` record marks the end of
    /// valid writes within the page's reserved length. The bloom filter
    /// is built only from writes at or past `head`, since already-
    /// transported writes are no longer relevant to a pending-write
    /// membership check.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let capacity = file.metadata()?.len();
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let head_bytes: [u8; 8] = mmap[0..HEADER_SIZE as usize]
            .try_into()
            .expect("slice is exactly 8 bytes");
        let persisted_head = u64::from_le_bytes(head_bytes);

        let mut writes = Vec::new();
        let mut cursor = HEADER_SIZE;
        loop {
            if cursor + LEN_PREFIX_SIZE > capacity {
                break;
            }
            let size_bytes: [u8; 4] = mmap[cursor as usize..(cursor + LEN_PREFIX_SIZE) as usize]
                .try_into()
                .expect("slice is exactly 4 bytes");
            let size = u32::from_le_bytes(size_bytes);
            if size == 0 {
                break;
            }
            let body_start = (cursor + LEN_PREFIX_SIZE) as usize;
            let body_end = body_start + size as usize;
            if body_end as u64 > capacity {
                break;
            }
            let (write, _) = BufferWrite::decode_from(&mmap[body_start..body_end])?;
            writes.push(write);
            cursor = body_end as u64;
        }

        let head = persisted_head.min(writes.len() as u64);
        let mut bloom = CompositeFilter::new(4096)?;
        for write in writes.iter().skip(head as usize) {
            for composite in write_composites(write)? {
                bloom.insert(&composite);
            }
        }

        debug!(path = %path.display(), writes = writes.len(), head, "reopened buffer page");
        Ok(Self {
            path,
            mmap: RwLock::new(mmap),
            capacity,
            cursor: AtomicU64::new(cursor),
            writes: RwLock::new(writes),
            head: AtomicU64::new(head),
            bloom: RwLock::new(bloom),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `write`, persisting it to the mmap and force-flushing
    /// before returning. Returns [`PageError::CapacityExceeded`] if the
    /// remaining space cannot fit `write` plus its length prefix.
    pub fn append(&self, write: BufferWrite) -> Result<(), PageError> {
        let bytes = encoding::encode_to_vec(&write)?;
        let needed = LEN_PREFIX_SIZE + bytes.len() as u64;

        let cursor = self.cursor.load(Ordering::SeqCst);
        if cursor + needed + LEN_PREFIX_SIZE > self.capacity {
            // the trailing LEN_PREFIX_SIZE guarantees room for a
            // terminating zero-length marker on the next open().
            return Err(PageError::CapacityExceeded);
        }

        {
            let mut mmap = self.mmap.write().expect("page mmap poisoned");
            let start = cursor as usize;
            mmap[start..start + 4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            mmap[start + 4..start + 4 + bytes.len()].copy_from_slice(&bytes);
            mmap.flush_range(start, 4 + bytes.len())?;
        }
        self.cursor.store(cursor + needed, Ordering::SeqCst);

        let composites = write_composites(&write)?;
        {
            let mut bloom = self.bloom.write().expect("page bloom poisoned");
            for c in &composites {
                bloom.insert(c);
            }
        }
        self.writes.write().expect("page writes poisoned").push(write);
        trace!(path = %self.path.display(), "appended write to buffer page");
        Ok(())
    }

    /// Returns the next untransported write without advancing `head`.
    pub fn next(&self) -> Option<BufferWrite> {
        let head = self.head.load(Ordering::SeqCst) as usize;
        self.writes.read().expect("page writes poisoned").get(head).cloned()
    }

    /// Advances `head` past the write last returned by [`Self::next`],
    /// persisting the new count to the page's header so a restart never
    /// replays and re-accepts a write this page has already handed off.
    pub fn remove(&self) {
        let new_head = self.head.fetch_add(1, Ordering::SeqCst) + 1;
        let mut mmap = self.mmap.write().expect("page mmap poisoned");
        mmap[0..HEADER_SIZE as usize].copy_from_slice(&new_head.to_le_bytes());
        if let Err(err) = mmap.flush_range(0, HEADER_SIZE as usize) {
            warn!(path = %self.path.display(), %err, "failed to persist buffer page head cursor");
        }
    }

    pub fn is_exhausted(&self) -> bool {
        let head = self.head.load(Ordering::SeqCst) as usize;
        head >= self.writes.read().expect("page writes poisoned").len()
    }

    pub fn len(&self) -> usize {
        self.writes.read().expect("page writes poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of every write still on the page (from `head`
    /// onward), in insertion order — used by the fault-tolerant
    /// iterate/verify/explore/search/browse overlay operations.
    pub fn pending_writes(&self) -> Vec<BufferWrite> {
        let head = self.head.load(Ordering::SeqCst) as usize;
        self.writes.read().expect("page writes poisoned")[head..].to_vec()
    }

    pub fn might_contain(&self, composite: &Composite) -> bool {
        self.bloom.read().expect("page bloom poisoned").may_contain(composite)
    }

    /// Unmaps and removes the underlying file.
    pub fn delete(self) -> Result<(), PageError> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)?;
        debug!(path = %path.display(), "deleted buffer page");
        Ok(())
    }
}

pub(crate) fn write_composites(write: &BufferWrite) -> Result<[Composite; 3], encoding::EncodingError> {
    let l = Composite::of(&[&write.record])?;
    let lk = Composite::of(&[&write.record, &write.key])?;
    let lkv = Composite::of(&[&write.record, &write.key, &write.value])?;
    Ok([l, lk, lkv])
}

/// Page files are named by creation timestamp (microseconds since the
/// epoch) so natural filename order reflects creation order.
pub fn page_file_name(created_at_micros: u64) -> String {
    format!("{created_at_micros}.buf")
}
