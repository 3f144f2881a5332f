//! # Engine
//!
//! The façade surrounding layers see (spec §6.6): one `insert`/`verify`/
//! `select`/`browse`/`explore`/`search`/`chronologize`/`audit`/`contains`
//! call surface over a [`crate::buffer::Buffer`] (the durable overlay of
//! not-yet-transported writes) and a [`crate::database::Database`] (the
//! persisted, triple-indexed store), plus the [`crate::lock::RangeLockService`]
//! serializing range-predicate reads against single-point writes.
//!
//! Every read merges the Buffer's pending writes onto the Database's
//! persisted state before returning — read-your-writes (spec §5 "Ordering
//! guarantees") falls out of always consulting the overlay first.
//!
//! The background transport worker is the single dedicated thread spec §9
//! "Cooperative async" asks for: it blocks on `Buffer::wait_until_transportable`
//! and drains one write at a time, exactly mirroring the teacher's own
//! single-`RwLock`-no-executor philosophy (`src/engine/mod.rs`'s `EngineInner`)
//! generalized from a lock-guarded struct to a lock-guarded pipeline stage.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{info, warn};

use crate::block::Revision;
use crate::buffer::{Buffer, BufferError};
use crate::database::{Database, DatabaseError};
use crate::lock::{LockError, Operator, RangeLockService, RangeToken};
use crate::model::{Action, Clock, Identifier, Text, Value, Version};
use crate::record::search::{self, TermRef};
use crate::record::{AuditEntry, RecordError};
use crate::write::Write;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

/// `Version(u64::MAX)`, standing in for "no timestamp given — read the
/// current state", so every timestamped read path can treat `ts: None`
/// uniformly as "include every version ever observed".
fn effective_ts(ts: Option<Version>) -> Version {
    ts.unwrap_or(Version::from(u64::MAX))
}

/// The storage engine façade: owns the Buffer, the Database, the range
/// lock service, and the background transport worker tying them together.
pub struct Engine {
    buffer: Arc<Buffer>,
    database: Arc<Database>,
    locks: RangeLockService,
    clock: Arc<Clock>,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Starts the Buffer and Database under `dir` (spec §6.1: `buffer/`
    /// and `db/` subdirectories) and spawns the background transport
    /// worker. Call [`Engine::stop`] for a clean shutdown.
    pub fn start(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let dir = dir.as_ref();
        let clock = Arc::new(Clock::new());
        let buffer = Arc::new(Buffer::start(dir.join("buffer"), Arc::clone(&clock))?);
        let database = Arc::new(Database::start(dir.join("db"), Arc::clone(&clock))?);

        let engine = Self {
            buffer,
            database,
            locks: RangeLockService::new(),
            clock,
            stopped: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        };
        engine.spawn_worker();
        info!(dir = %dir.display(), "engine started");
        Ok(engine)
    }

    fn spawn_worker(&self) {
        let buffer = Arc::clone(&self.buffer);
        let database = Arc::clone(&self.database);
        let stopped = Arc::clone(&self.stopped);
        let handle = std::thread::spawn(move || {
            while !stopped.load(Ordering::SeqCst) {
                buffer.wait_until_transportable();
                loop {
                    match buffer.transport(database.as_ref(), true) {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(err) => {
                            warn!(%err, "transport step failed, retrying on next wake");
                            break;
                        }
                    }
                }
            }
        });
        *self.worker.lock().expect("engine worker handle poisoned") = Some(handle);
    }

    /// Stops the background transport worker and joins it. Pending
    /// buffer writes are left on disk for the next `start` to replay.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.buffer.stop();
        if let Some(handle) = self.worker.lock().expect("engine worker handle poisoned").take() {
            let _ = handle.join();
        }
        info!("engine stopped");
    }

    /// Forces a transport-drained checkpoint: flushes every pending
    /// buffer write into the Database, then syncs all three families.
    pub fn sync(&self) -> Result<(), EngineError> {
        while self.buffer.transport(self.database.as_ref(), false)? {}
        self.database.trigger_sync(true)?;
        Ok(())
    }

    /// Records one mutation, stamped with the engine's clock.
    pub fn insert(&self, action: Action, record: Identifier, key: Text, value: Value) -> Result<(), EngineError> {
        let _guard = self.locks.get_write_lock(key.clone(), value.clone());
        let write = Write::new(action, record, key, value, self.clock.next());
        self.buffer.insert(write)?;
        Ok(())
    }

    /// Whether `(record, key, value)` held at `ts` (or now, if `ts` is
    /// `None`), replaying pending buffer writes on top of the persisted
    /// baseline.
    pub fn verify(&self, record: Identifier, key: &Text, value: &Value, ts: Option<Version>) -> Result<bool, EngineError> {
        let resolved_ts = effective_ts(ts);
        let baseline = match ts {
            Some(at) => self.database.get_primary_record_partial(record, key)?.select_at(key, at).contains(value),
            None => self.database.get_primary_record_partial(record, key)?.present(key, value),
        };
        Ok(self.buffer.verify(record, key, value, resolved_ts, baseline))
    }

    /// Every key's value set for `record`, at `ts` (or now).
    pub fn select(&self, record: Identifier, ts: Option<Version>) -> Result<BTreeMap<Text, BTreeSet<Value>>, EngineError> {
        let mut rec = self.database.get_primary_record(record)?;
        self.merge_primary_writes(&mut rec, record, None)?;
        Ok(rec.browse_at(effective_ts(ts)))
    }

    /// `key`'s value set for `record`, at `ts` (or now).
    pub fn select_key(&self, key: &Text, record: Identifier, ts: Option<Version>) -> Result<BTreeSet<Value>, EngineError> {
        let mut rec = self.database.get_primary_record_partial(record, key)?;
        self.merge_primary_writes(&mut rec, record, Some(key))?;
        Ok(rec.select_at(key, effective_ts(ts)))
    }

    /// Every value currently (or at `ts`) held under `key`, mapped to the
    /// records holding it.
    pub fn browse(&self, key: &Text, ts: Option<Version>) -> Result<BTreeMap<Value, BTreeSet<Identifier>>, EngineError> {
        let rec = self.merged_secondary_record(key)?;
        Ok(rec.browse_at(effective_ts(ts)))
    }

    /// Evaluates a range predicate over `key`, returning each matching
    /// record mapped to the subset of its values that satisfy it.
    /// Acquires a read lock over the predicate for the duration of the
    /// read (spec §4.8/§5).
    pub fn explore(
        &self,
        key: &Text,
        operator: Operator,
        values: Vec<Value>,
        ts: Option<Version>,
    ) -> Result<BTreeMap<Identifier, BTreeSet<Value>>, EngineError> {
        let token = RangeToken::new(key.clone(), operator, values)?;
        let _guard = self.locks.get_read_lock(key.clone(), token.operator, token.values.clone())?;

        let rec = self.merged_secondary_record(key)?;
        let mut out: BTreeMap<Identifier, BTreeSet<Value>> = BTreeMap::new();
        for (value, records) in rec.browse_at(effective_ts(ts)) {
            if !token.matches(&value) {
                continue;
            }
            for record in records {
                out.entry(record).or_default().insert(value.clone());
            }
        }
        Ok(out)
    }

    /// Every record whose indexed text under `key` matches `query` as a
    /// phrase, including not-yet-transported buffer writes.
    pub fn search(&self, key: &Text, query: &str) -> Result<BTreeSet<Identifier>, EngineError> {
        let mut rec = self.database.get_search_record_raw(key)?;
        for write in self.buffer.iterate() {
            if &write.key != key {
                continue;
            }
            for (term, term_ref) in search_tokens(&write.value, write.record) {
                let revision = Revision::new(key.clone(), term, term_ref, write.version, write.action);
                if let Err(err) = rec.append_same_version_allowed(revision) {
                    warn!(%err, "dropping stale buffer search revision during merge");
                }
            }
        }
        Ok(search::search(&rec, query))
    }

    /// Every change to `key` for `record` with `start <= version < end`,
    /// each entry the full value set immediately after that change.
    pub fn chronologize(
        &self,
        key: &Text,
        record: Identifier,
        start: Version,
        end: Version,
    ) -> Result<BTreeMap<Version, BTreeSet<Value>>, EngineError> {
        let mut rec = self.database.get_primary_record_partial(record, key)?;
        self.merge_primary_writes(&mut rec, record, Some(key))?;
        Ok(rec.chronologize(key, start, end).into_iter().collect())
    }

    /// The full audit trail for `record`, optionally narrowed to `key`.
    pub fn audit(&self, record: Identifier, key: Option<&Text>) -> Result<Vec<AuditEntry>, EngineError> {
        let mut rec = self.database.get_primary_record(record)?;
        self.merge_primary_writes(&mut rec, record, None)?;
        Ok(rec.audit(key))
    }

    /// Whether `record` currently has any value under any key, including
    /// not-yet-transported buffer writes.
    pub fn contains(&self, record: Identifier) -> Result<bool, EngineError> {
        if self.database.contains(record)? {
            return Ok(true);
        }
        Ok(self.buffer.overlay_for_record(record).values().any(|set| !set.is_empty()))
    }

    fn merged_secondary_record(&self, key: &Text) -> Result<crate::database::SecondaryRecord, EngineError> {
        let mut rec = self.database.get_secondary_record(key)?;
        for write in self.buffer.iterate() {
            if &write.key != key {
                continue;
            }
            let revision = Revision::new(key.clone(), write.value, write.record, write.version, write.action);
            if let Err(err) = rec.append(revision) {
                warn!(%err, "dropping stale buffer secondary revision during merge");
            }
        }
        Ok(rec)
    }

    /// Appends every pending buffer write touching `record` (optionally
    /// narrowed to `key`) onto `rec` as primary-family revisions. Buffer
    /// versions are always greater than any persisted version (spec §5
    /// "Version monotonicity"), so out-of-order appends only arise from a
    /// duplicate replay, which is logged and dropped rather than failing
    /// the whole read.
    fn merge_primary_writes(
        &self,
        rec: &mut crate::database::PrimaryRecord,
        record: Identifier,
        key: Option<&Text>,
    ) -> Result<(), EngineError> {
        for write in self.buffer.iterate() {
            if write.record != record {
                continue;
            }
            if key.is_some_and(|k| &write.key != k) {
                continue;
            }
            let revision = Revision::new(write.record, write.key.clone(), write.value.clone(), write.version, write.action);
            if let Err(err) = rec.append(revision) {
                warn!(%err, "dropping stale buffer primary revision during merge");
            }
        }
        Ok(())
    }
}

/// Tokenizes a string/tag value into `(term, TermRef)` pairs, mirroring
/// `database`'s write-time indexing so a buffer-pending write contributes
/// the same search postings it would after transport.
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
