//! # Record
//!
//! [`Record<L, K, V>`] is the in-memory materialized view of every
//! revision belonging to one locator (optionally narrowed to a single
//! key): a current-state map, a per-key history, and a running
//! cardinality counter. Blocks push revisions into a `Record` during
//! seek and then forget about it — no block ever holds a back-pointer
//! to the records it populated (spec §9, "Cyclic graphs & back
//! references").
//!
//! Grounded on the teacher's per-key version-chain shape in
//! `src/memtable/mod.rs` (`BTreeMap<Reverse<u64>, _>` chains per key),
//! generalized here to the generic `(L, K, V)` triple and widened from
//! "most recent wins" to "full ordered history".

pub mod search;


use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::block::Revision;
use crate::model::{Action, Version};

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordError {
    #[error("revision version {got} is not strictly greater than the last appended version {last} for this key")]
    OutOfOrder { last: u64, got: u64 },
}

/// A human-readable description of one revision's effect, for `audit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub version: Version,
    pub description: String,
}

/// A full, history-retaining materialized view of one locator's revisions.
#[derive(Debug, Clone)]
pub struct Record<L, K, V> {
    locator: L,
    current: BTreeMap<K, BTreeSet<V>>,
    history: BTreeMap<K, Vec<Revision<L, K, V>>>,
    last_version_by_key: HashMap<K, Version>,
    cardinality: u64,
}

impl<L, K, V> Record<L, K, V>
where
    L: Ord + Clone,
    K: Ord + Clone + std::hash::Hash,
    V: Ord + Clone,
{
    pub fn new(locator: L) -> Self {
        Self {
            locator,
            current: BTreeMap::new(),
            history: BTreeMap::new(),
            last_version_by_key: HashMap::new(),
            cardinality: 0,
        }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    /// Appends a new revision. The revision's version must be strictly
    /// greater than the last version appended for *this key* (spec §8
    /// property 6: the version sequence in `history[K]` is strictly
    /// increasing) — versions across different keys of the same locator
    /// are not required to interleave in order.
    pub fn append(&mut self, revision: Revision<L, K, V>) -> Result<(), RecordError> {
        self.append_impl(revision, true)
    }

    /// Appends a new revision without rejecting a repeated version for
    /// the same key — only a version *older* than the last one seen is
    /// an error. Used by the search family: indexing a text value with a
    /// repeated token (e.g. "to be or not to be") legitimately produces
    /// more than one revision for the same `(key, version)` pair, one
    /// per occurrence, and all of them are positive contributions to
    /// append (search.rs, spec §3), not a replayed duplicate.
    pub fn append_same_version_allowed(&mut self, revision: Revision<L, K, V>) -> Result<(), RecordError> {
        self.append_impl(revision, false)
    }

    fn append_impl(&mut self, revision: Revision<L, K, V>, strict: bool) -> Result<(), RecordError> {
        if let Some(last) = self.last_version_by_key.get(&revision.key) {
            let out_of_order = if strict { revision.version <= *last } else { revision.version < *last };
            if out_of_order {
                return Err(RecordError::OutOfOrder {
                    last: last.value(),
                    got: revision.version.value(),
                });
            }
        }
        self.last_version_by_key
            .insert(revision.key.clone(), revision.version);
        self.cardinality += 1;

        let entry = self.current.entry(revision.key.clone()).or_default();
        match revision.action {
            Action::Add => {
                entry.insert(revision.value.clone());
            }
            Action::Remove => {
                entry.remove(&revision.value);
            }
            Action::Compare => {}
        }

        self.history.entry(revision.key.clone()).or_default().push(revision);
        Ok(())
    }

    /// The last version appended for `key`, if any — used by
    /// `database`'s first-write re-verification guard to detect
    /// re-transport of an already-persisted write after a crash mid-
    /// transport (spec §7 "acceptable" flag).
    pub fn last_version(&self, key: &K) -> Option<Version> {
        self.last_version_by_key.get(key).copied()
    }

    /// `O(1)` (map lookup) check of current membership.
    pub fn present(&self, key: &K, value: &V) -> bool {
        self.current.get(key).is_some_and(|set| set.contains(value))
    }

    /// All values currently present under `key`.
    pub fn current_values(&self, key: &K) -> BTreeSet<V> {
        self.current.get(key).cloned().unwrap_or_default()
    }

    /// All keys with at least one value currently present.
    pub fn current_map(&self) -> BTreeMap<K, BTreeSet<V>> {
        self.current
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replays `key`'s history up to and including `ts`, returning the
    /// set of values present at that instant.
    pub fn select_at(&self, key: &K, ts: Version) -> BTreeSet<V> {
        let mut set = BTreeSet::new();
        if let Some(history) = self.history.get(key) {
            for revision in history {
                if revision.version > ts {
                    break;
                }
                match revision.action {
                    Action::Add => {
                        set.insert(revision.value.clone());
                    }
                    Action::Remove => {
                        set.remove(&revision.value);
                    }
                    Action::Compare => {}
                }
            }
        }
        set
    }

    /// Replays every key's history up to `ts`, omitting keys left empty.
    pub fn browse_at(&self, ts: Version) -> BTreeMap<K, BTreeSet<V>> {
        self.history
            .keys()
            .filter_map(|key| {
                let set = self.select_at(key, ts);
                if set.is_empty() {
                    None
                } else {
                    Some((key.clone(), set))
                }
            })
            .collect()
    }

    /// Yields `(version, snapshot)` for every change to `key` with
    /// `start <= version < end`, each snapshot reflecting the full state
    /// after that change (not just the delta).
    pub fn chronologize(&self, key: &K, start: Version, end: Version) -> Vec<(Version, BTreeSet<V>)> {
        let mut out = Vec::new();
        let mut set = self.select_at(key, Version::from(start.value().saturating_sub(1)));
        if let Some(history) = self.history.get(key) {
            for revision in history {
                if revision.version < start {
                    continue;
                }
                if revision.version >= end {
                    break;
                }
                match revision.action {
                    Action::Add => {
                        set.insert(revision.value.clone());
                    }
                    Action::Remove => {
                        set.remove(&revision.value);
                    }
                    Action::Compare => {}
                }
                out.push((revision.version, set.clone()));
            }
        }
        out
    }

    /// Human-readable audit trail. `key = None` merges all keys, sorted
    /// by version.
    pub fn audit(&self, key: Option<&K>) -> Vec<AuditEntry>
    where
        K: std::fmt::Debug,
        V: std::fmt::Debug,
    {
        let mut entries: Vec<AuditEntry> = match key {
            Some(k) => self
                .history
                .get(k)
                .into_iter()
                .flatten()
                .map(|r| audit_entry(r))
                .collect(),
            None => self
                .history
                .values()
                .flatten()
                .map(|r| audit_entry(r))
                .collect(),
        };
        entries.sort_by_key(|e| e.version);
        entries
    }
}

fn audit_entry<L, K: std::fmt::Debug, V: std::fmt::Debug>(r: &Revision<L, K, V>) -> AuditEntry {
    let verb = match r.action {
        Action::Add => "ADD",
        Action::Remove => "REMOVE",
        Action::Compare => "COMPARE",
    };
    AuditEntry {
        version: r.version,
        description: format!("{verb} {:?} AS {:?}", r.key, r.value),
    }
}

/// A marker type whose `entry_set` panics and whose `size` reports a
/// counter — preserved intentionally (spec §9): `AmnesiaRecord` users
/// only ever need the count, and a panic on `entry_set` catches any
/// caller that mistakenly expects the full history to still be there.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHistoryMap {
    cardinality: u64,
}

impl NoOpHistoryMap {
    pub fn size(&self) -> u64 {
        self.cardinality
    }

    /// Always panics. Do not call on an `AmnesiaRecord` — it never
    /// retained anything to iterate.
    pub fn entry_set(&self) -> ! {
        panic!("NoOpHistoryMap retains no entries; AmnesiaRecord only counts revisions")
    }
}

/// A `Record` variant that discards history entirely, keeping only a
/// cardinality counter. Used for corrupt-block probing and other
/// counting-only use cases where retaining full history would be
/// wasteful or impossible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmnesiaRecord {
    history: NoOpHistoryMap,
}

impl AmnesiaRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self) {
        self.history.cardinality += 1;
    }

    pub fn cardinality(&self) -> u64 {
        self.history.size()
    }

    pub fn history(&self) -> &NoOpHistoryMap {
        &self.history
    }
}
