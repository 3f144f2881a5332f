//! Search-family specifics: the position-tagged term reference used as
//! the search family's value type, and the `search(query)` query
//! evaluator that tokenizes a query, intersects per-term posting lists,
//! and enforces positional adjacency for multi-token phrases.

use std::collections::{BTreeMap, BTreeSet};

use crate::encoding::{Decode, Encode, EncodingError};
use crate::model::{Identifier, Text};
use crate::record::Record;

/// A reference to one occurrence of a term: which record it occurs in,
/// and at what token position within that record's indexed text for the
/// given key. Multiple `TermRef`s for the same `(key, term)` accumulate
/// across a record's history — search revisions are append-only positive
/// contributions (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TermRef {
    pub record: Identifier,
    pub position: u32,
}

impl TermRef {
    pub fn new(record: Identifier, position: u32) -> Self {
        Self { record, position }
    }
}

impl Encode for TermRef {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.record.encode_to(buf)?;
        self.position.encode_to(buf)
    }
}

impl Decode for TermRef {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (record, n) = Identifier::decode_from(&buf[off..])?;
        off += n;
        let (position, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { record, position }, off))
    }
}

/// A materialized search record: keyed by term, valued by the set of
/// occurrences across every record indexed under one key name.
pub type SearchRecord = Record<Text, Text, TermRef>;

/// Splits text into lowercase whitespace-delimited tokens. Shared by query
/// evaluation and by `database`'s write-time indexing so a stored term and
/// a queried term are tokenized identically.
pub(crate) fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(|s| s.to_lowercase()).collect()
}

/// Evaluates `query` against `record` (the search record for one key),
/// returning the set of record identifiers whose indexed text contains
/// the query's tokens as a contiguous phrase.
pub fn search(record: &SearchRecord, query: &str) -> BTreeSet<Identifier> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return BTreeSet::new();
    }

    let postings: Vec<BTreeMap<Identifier, BTreeSet<u32>>> = tokens
        .iter()
        .map(|token| {
            let term = Text::intern(token);
            let mut by_record: BTreeMap<Identifier, BTreeSet<u32>> = BTreeMap::new();
            for term_ref in record.current_values(&term) {
                by_record.entry(term_ref.record).or_default().insert(term_ref.position);
            }
            by_record
        })
        .collect();

    if postings.iter().any(|p| p.is_empty()) {
        return BTreeSet::new();
    }

    let mut candidates: BTreeSet<Identifier> = postings[0].keys().copied().collect();
    for p in &postings[1..] {
        let keys: BTreeSet<Identifier> = p.keys().copied().collect();
        candidates = candidates.intersection(&keys).copied().collect();
    }

    if tokens.len() == 1 {
        return candidates;
    }

    let mut result = BTreeSet::new();
    for rec in candidates {
        let first_positions = &postings[0][&rec];
        let is_phrase_match = first_positions.iter().any(|&start| {
            postings[1..]
                .iter()
                .enumerate()
                .all(|(i, p)| p[&rec].contains(&(start + i as u32 + 1)))
        });
        if is_phrase_match {
            result.insert(rec);
        }
    }
    result
}
