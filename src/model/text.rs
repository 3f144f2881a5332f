//! Interned, immutable UTF-8 string wrapper.
//!
//! [`Text`] backs both record keys and search terms. Every `Text` produced
//! by [`Text::from`] or [`Text::decode_from`] is interned in a process-wide
//! table, so repeated keys (`"name"`, `"age"`, …) share one allocation and
//! compare in O(1) via pointer equality before ever touching the bytes.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, RwLock};

use crate::encoding::{self, EncodingError};

fn interner() -> &'static RwLock<HashSet<Arc<str>>> {
    static INTERNER: OnceLock<RwLock<HashSet<Arc<str>>>> = OnceLock::new();
    INTERNER.get_or_init(|| RwLock::new(HashSet::new()))
}

/// An immutable, interned UTF-8 string.
///
/// Cloning a `Text` is an `Arc` clone (cheap). Equality first tries
/// pointer identity (true for any two `Text` built from equal strings,
/// since both go through the same interner) and falls back to a byte
/// comparison so a `Text` built without interning (there is no such path
/// in this crate, but the fallback keeps the invariant from becoming a
/// safety requirement) still compares correctly.
#[derive(Clone, Eq)]
pub struct Text(Arc<str>);

impl Text {
    /// Interns `s`, returning the shared `Text` handle.
    pub fn intern(s: &str) -> Self {
        if let Some(existing) = interner().read().expect("interner poisoned").get(s) {
            return Text(Arc::clone(existing));
        }
        let mut table = interner().write().expect("interner poisoned");
        if let Some(existing) = table.get(s) {
            return Text(Arc::clone(existing));
        }
        let arc: Arc<str> = Arc::from(s);
        table.insert(Arc::clone(&arc));
        Text(arc)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Text::intern(value)
    }
}

impl From<String> for Text {
    fn from(value: String) -> Self {
        Text::intern(&value)
    }
}

impl std::ops::Deref for Text {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Text({:?})", self.0)
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl std::hash::Hash for Text {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for Text {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Text {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl encoding::Encode for Text {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.as_ref().encode_to(buf)
    }
}

impl encoding::Decode for Text {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (s, n) = String::decode_from(buf)?;
        Ok((Text::intern(&s), n))
    }
}
