//! # Range lock service
//!
//! Predicate-aware locking for the range conditions evaluated by
//! `engine::explore` and friends. A read lock is taken over the (key,
//! operator, values) triple a query is about to evaluate; a write lock is
//! taken over the single (key, value) pair a write is about to add or
//! remove. Two locks conflict only when at least one is a write and their
//! predicates overlap on the extended `Value` domain — disjoint ranges (or
//! two reads, which never write) never block each other (spec §4.8,
//! §5 "Range lock service").
//!
//! Grounded on the teacher's `src/wal/mod.rs` group-commit waiter queue
//! (threads park on a condition and are woken individually once their
//! condition clears) — generalized here from "my commit batch is durable"
//! to "my predicate no longer conflicts", and switched from
//! `std::sync::Condvar` to `crossbeam::sync::Parker`/`Unparker` so each
//! waiter parks on its own handle instead of all waiters sharing one
//! condvar and re-checking in a loop.
//!
//! `RangeToken::decode_from` previously tracked a manual element index that
//! was never advanced (an off-by-one matching the original source's
//! `RangeToken` deserializer); here it is fixed by decoding the values
//! through [`crate::encoding::decode_vec`], whose loop correctly advances
//! the read offset every iteration.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam::sync::{Parker, Unparker};
use thiserror::Error;
use tracing::trace;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::model::{Text, Value};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum LockError {
    #[error("operator {operator:?} requires {expected} value(s), got {got}")]
    WrongArity {
        operator: Operator,
        expected: usize,
        got: usize,
    },
}

/// Whether a `Between` bound includes its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Open,
    Closed,
}

/// A range predicate operator, matching spec §4.8's table. `Between`
/// carries its own lower/upper inclusivity so one variant covers all four
/// combinations (`[a,b]`, `(a,b)`, `[a,b)`, `(a,b]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between(Bound, Bound),
    Regex,
    NotRegex,
    Contains,
    NotContains,
}

impl Operator {
    fn arity(self) -> usize {
        match self {
            Operator::Between(..) => 2,
            _ => 1,
        }
    }

    fn wire_tag(self) -> u8 {
        match self {
            Operator::Equals => 0,
            Operator::NotEquals => 1,
            Operator::GreaterThan => 2,
            Operator::GreaterThanOrEqual => 3,
            Operator::LessThan => 4,
            Operator::LessThanOrEqual => 5,
            Operator::Between(..) => 6,
            Operator::Regex => 7,
            Operator::NotRegex => 8,
            Operator::Contains => 9,
            Operator::NotContains => 10,
        }
    }
}

impl Encode for Operator {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.wire_tag().encode_to(buf)?;
        if let Operator::Between(lower, upper) = self {
            let bound_tag = |b: &Bound| if *b == Bound::Closed { 1u8 } else { 0u8 };
            bound_tag(lower).encode_to(buf)?;
            bound_tag(upper).encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Operator {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        let operator = match tag {
            0 => Operator::Equals,
            1 => Operator::NotEquals,
            2 => Operator::GreaterThan,
            3 => Operator::GreaterThanOrEqual,
            4 => Operator::LessThan,
            5 => Operator::LessThanOrEqual,
            6 => {
                let (lower, n) = u8::decode_from(&buf[off..])?;
                off += n;
                let (upper, n) = u8::decode_from(&buf[off..])?;
                off += n;
                let bound = |b: u8| if b == 1 { Bound::Closed } else { Bound::Open };
                Operator::Between(bound(lower), bound(upper))
            }
            7 => Operator::Regex,
            8 => Operator::NotRegex,
            9 => Operator::Contains,
            10 => Operator::NotContains,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Operator",
                });
            }
        };
        Ok((operator, off))
    }
}

/// One predicate over a single key: `key operator values…`. Built by a
/// read (`explore`) or a write (a single `value` wrapped as `Equals`), and
/// compared against every other live token on the same key via
/// [`RangeToken::intersects`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeToken {
    pub key: Text,
    pub operator: Operator,
    pub values: Vec<Value>,
}

impl RangeToken {
    pub fn new(key: Text, operator: Operator, values: Vec<Value>) -> Result<Self, LockError> {
        let expected = operator.arity();
        if values.len() != expected {
            return Err(LockError::WrongArity {
                operator,
                expected,
                got: values.len(),
            });
        }
        Ok(Self { key, operator, values })
    }

    /// Normalizes this token's predicate into a set of disjoint closed/open
    /// intervals over the extended `Value` domain. `NotEquals` is the
    /// domain split around its one excluded point; `Regex`/`NotRegex`/
    /// `Contains`/`NotContains` cannot be expressed as a range at all, so
    /// they normalize to the universal interval and conservatively conflict
    /// with everything on the same key, per spec §4.8.
    fn ranges(&self) -> Vec<Interval> {
        let universal = Interval::new(
            Endpoint::new(Value::NEG_INF, true),
            Endpoint::new(Value::POS_INF, true),
        );
        match self.operator {
            Operator::Equals => {
                let v = self.values[0].clone();
                vec![Interval::new(Endpoint::new(v.clone(), true), Endpoint::new(v, true))]
            }
            Operator::NotEquals => {
                let v = self.values[0].clone();
                vec![
                    Interval::new(Endpoint::new(Value::NEG_INF, true), Endpoint::new(v.clone(), false)),
                    Interval::new(Endpoint::new(v, false), Endpoint::new(Value::POS_INF, true)),
                ]
            }
            Operator::GreaterThan => {
                vec![Interval::new(
                    Endpoint::new(self.values[0].clone(), false),
                    Endpoint::new(Value::POS_INF, true),
                )]
            }
            Operator::GreaterThanOrEqual => {
                vec![Interval::new(
                    Endpoint::new(self.values[0].clone(), true),
                    Endpoint::new(Value::POS_INF, true),
                )]
            }
            Operator::LessThan => {
                vec![Interval::new(
                    Endpoint::new(Value::NEG_INF, true),
                    Endpoint::new(self.values[0].clone(), false),
                )]
            }
            Operator::LessThanOrEqual => {
                vec![Interval::new(
                    Endpoint::new(Value::NEG_INF, true),
                    Endpoint::new(self.values[0].clone(), true),
                )]
            }
            Operator::Between(lower, upper) => {
                vec![Interval::new(
                    Endpoint::new(self.values[0].clone(), lower == Bound::Closed),
                    Endpoint::new(self.values[1].clone(), upper == Bound::Closed),
                )]
            }
            Operator::Regex | Operator::NotRegex | Operator::Contains | Operator::NotContains => {
                vec![universal]
            }
        }
    }

    /// Whether `self` and `other` (which must share the same key) describe
    /// overlapping regions of the value domain.
    pub fn intersects(&self, other: &RangeToken) -> bool {
        if self.key != other.key {
            return false;
        }
        let mine = self.ranges();
        let theirs = other.ranges();
        mine.iter().any(|a| theirs.iter().any(|b| a.overlaps(b)))
    }

    /// Evaluates this predicate literally against one concrete value —
    /// used by `engine::explore`, not by lock conflict detection (which
    /// stays conservative for `Regex`/`Contains` per [`RangeToken::ranges`]).
    pub fn matches(&self, candidate: &Value) -> bool {
        match self.operator {
            Operator::Equals => candidate == &self.values[0],
            Operator::NotEquals => candidate != &self.values[0],
            Operator::GreaterThan => candidate > &self.values[0],
            Operator::GreaterThanOrEqual => candidate >= &self.values[0],
            Operator::LessThan => candidate < &self.values[0],
            Operator::LessThanOrEqual => candidate <= &self.values[0],
            Operator::Between(lower, upper) => {
                let lower_ok = if lower == Bound::Closed {
                    candidate >= &self.values[0]
                } else {
                    candidate > &self.values[0]
                };
                let upper_ok = if upper == Bound::Closed {
                    candidate <= &self.values[1]
                } else {
                    candidate < &self.values[1]
                };
                lower_ok && upper_ok
            }
            Operator::Regex | Operator::NotRegex | Operator::Contains | Operator::NotContains => {
                self.matches_text(candidate)
            }
        }
    }

    fn matches_text(&self, candidate: &Value) -> bool {
        let (Value::String(c) | Value::Tag(c)) = candidate else {
            return false;
        };
        let (Value::String(p) | Value::Tag(p)) = &self.values[0] else {
            return false;
        };
        match self.operator {
            Operator::Contains => c.as_str().contains(p.as_str()),
            Operator::NotContains => !c.as_str().contains(p.as_str()),
            Operator::Regex | Operator::NotRegex => {
                let is_match = regex::Regex::new(p.as_str()).is_ok_and(|re| re.is_match(c.as_str()));
                if self.operator == Operator::Regex {
                    is_match
                } else {
                    !is_match
                }
            }
            _ => unreachable!("matches_text is only called for text operators"),
        }
    }
}

impl Encode for RangeToken {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.operator.encode_to(buf)?;
        encoding::encode_vec(&self.values, buf)
    }
}

impl Decode for RangeToken {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = Text::decode_from(&buf[off..])?;
        off += n;
        let (operator, n) = Operator::decode_from(&buf[off..])?;
        off += n;
        let (values, n) = encoding::decode_vec::<Value>(&buf[off..])?;
        off += n;
        Ok((Self { key, operator, values }, off))
    }
}

/// A half-open-or-closed bound on the extended `Value` domain.
#[derive(Debug, Clone)]
struct Endpoint {
    value: Value,
    inclusive: bool,
}

impl Endpoint {
    fn new(value: Value, inclusive: bool) -> Self {
        Self { value, inclusive }
    }
}

#[derive(Debug, Clone)]
struct Interval {
    low: Endpoint,
    high: Endpoint,
}

impl Interval {
    fn new(low: Endpoint, high: Endpoint) -> Self {
        Self { low, high }
    }

    /// True when `high` sits strictly before `low` with no shared point —
    /// the gap case that means the two intervals carrying these endpoints
    /// as a seam do *not* overlap there.
    fn strictly_before(high: &Endpoint, low: &Endpoint) -> bool {
        match high.value.cmp(&low.value) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => !(high.inclusive && low.inclusive),
        }
    }

    fn overlaps(&self, other: &Interval) -> bool {
        !Self::strictly_before(&self.high, &other.low) && !Self::strictly_before(&other.high, &self.low)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Read,
    Write,
}

fn kinds_conflict(a: LockKind, b: LockKind) -> bool {
    !(a == LockKind::Read && b == LockKind::Read)
}

struct Waiter {
    id: u64,
    token: RangeToken,
    kind: LockKind,
    unparker: Unparker,
}

struct HeldLock {
    id: u64,
    kind: LockKind,
    token: RangeToken,
}

#[derive(Default)]
struct KeyLockState {
    held: Vec<HeldLock>,
    waiters: Vec<Waiter>,
}

/// A sharded, predicate-aware lock table. Every lock is acquired with a
/// range predicate; two locks on the same key conflict only if at least
/// one is a write and their predicates' value ranges overlap.
///
/// Grounded on the teacher's `src/wal/mod.rs` group-commit shape for the
/// block/wake dance, sharded the way `src/sstable/mod.rs`'s block cache
/// shards its `Mutex<HashMap<_, _>>` table to keep contention local to one
/// key's shard rather than a single global lock.
pub struct RangeLockService {
    shards: Vec<Mutex<HashMap<Text, KeyLockState>>>,
    next_id: AtomicU64,
}

impl Default for RangeLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeLockService {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(0),
        }
    }

    fn shard_index(&self, key: &Text) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Blocks until a read lock over `(key, operator, values)` can be held
    /// without conflicting with any currently held write, then returns a
    /// guard that releases it on drop.
    pub fn get_read_lock(
        &self,
        key: Text,
        operator: Operator,
        values: Vec<Value>,
    ) -> Result<RangeLockGuard<'_>, LockError> {
        let token = RangeToken::new(key, operator, values)?;
        Ok(self.acquire(token, LockKind::Read))
    }

    /// Blocks until a write lock over the single point `key == value` can
    /// be held without conflicting with any currently held lock, then
    /// returns a guard that releases it on drop.
    pub fn get_write_lock(&self, key: Text, value: Value) -> RangeLockGuard<'_> {
        let token = RangeToken::new(key, Operator::Equals, vec![value])
            .expect("Operator::Equals always takes exactly one value");
        self.acquire(token, LockKind::Write)
    }

    fn acquire(&self, token: RangeToken, kind: LockKind) -> RangeLockGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        loop {
            let parker = Parker::new();
            let shard_idx = self.shard_index(&token.key);
            {
                let mut shard = self.shards[shard_idx].lock().expect("range lock shard poisoned");
                let state = shard.entry(token.key.clone()).or_default();
                let conflict = state
                    .held
                    .iter()
                    .any(|held| kinds_conflict(kind, held.kind) && token.intersects(&held.token));
                if !conflict {
                    state.held.push(HeldLock {
                        id,
                        kind,
                        token: token.clone(),
                    });
                    trace!(key = %token.key, ?kind, "range lock acquired");
                    return RangeLockGuard {
                        service: self,
                        id,
                        kind,
                        token,
                    };
                }
                state.waiters.push(Waiter {
                    id,
                    token: token.clone(),
                    kind,
                    unparker: parker.unparker().clone(),
                });
            }
            parker.park();
        }
    }

    fn release(&self, id: u64, kind: LockKind, token: &RangeToken) {
        let shard_idx = self.shard_index(&token.key);
        let mut shard = self.shards[shard_idx].lock().expect("range lock shard poisoned");
        let Some(state) = shard.get_mut(&token.key) else {
            return;
        };
        if let Some(pos) = state.held.iter().position(|h| h.id == id) {
            state.held.remove(pos);
        }
        trace!(key = %token.key, ?kind, "range lock released");

        let waiters = std::mem::take(&mut state.waiters);
        let mut still_blocked = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            let conflict = state
                .held
                .iter()
                .any(|held| kinds_conflict(waiter.kind, held.kind) && waiter.token.intersects(&held.token));
            if conflict {
                still_blocked.push(waiter);
            } else {
                waiter.unparker.unpark();
            }
        }
        state.waiters = still_blocked;

        if state.held.is_empty() && state.waiters.is_empty() {
            shard.remove(&token.key);
        }
    }
}

/// An RAII handle to one held range lock; dropping it releases the lock
/// and wakes any now-unblocked waiters on the same key.
pub struct RangeLockGuard<'a> {
    service: &'a RangeLockService,
    id: u64,
    kind: LockKind,
    token: RangeToken,
}

impl Drop for RangeLockGuard<'_> {
    fn drop(&mut self) {
        self.service.release(self.id, self.kind, &self.token);
    }
}
