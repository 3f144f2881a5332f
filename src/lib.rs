//! # ChronoDB
//!
//! An embeddable, transactional, version-tracked record store. Every
//! write is append-only and carries a logical version; nothing already
//! written is ever overwritten or deleted in place, so a record's full
//! history is always queryable.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Engine                           │
//! │  ┌────────────┐   transport    ┌───────────────────────┐  │
//! │  │   Buffer    │ ─────────────► │       Database         │  │
//! │  │ (append-only│  one write at  │  ┌───────┬───────────┐ │  │
//! │  │  .buf pages)│  a time        │  │primary│secondary  │ │  │
//! │  └────────────┘                 │  │ (cpb) │  (csb)    │ │  │
//! │                                 │  └───────┴───────────┘ │  │
//! │                                 │  ┌───────────────────┐ │  │
//! │                                 │  │  search (ctb)     │ │  │
//! │                                 │  └───────────────────┘ │  │
//! │                                 └───────────────────────┘  │
//! │                     RangeLockService (sharded per key)     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`model`] | Core value types: `Identifier`, `Text`, `Value`, `Version`, `Composite` |
//! | [`encoding`] | Dependency-free `Encode`/`Decode` binary codec |
//! | [`bloom`] | One-sided persistent bloom filter over `Composite` keys |
//! | [`write`] | The `Write` transport unit moved from Buffer to Database |
//! | [`block`] | Immutable, sorted, on-disk revision runs with bloom + index sidecars |
//! | [`record`] | In-memory materialized view of one locator's revisions, plus search |
//! | [`buffer`] | Durable, append-only staging area for writes before transport |
//! | [`database`] | The on-disk, triple-indexed, multi-version store |
//! | [`lock`] | Sharded range-predicate lock service |
//! | [`engine`] | The façade tying Buffer, Database, and locks together |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronodb::engine::Engine;
//! use chronodb::model::{Identifier, Text, Value};
//! use chronodb::model::Action;
//!
//! let engine = Engine::start("/tmp/my_db").unwrap();
//!
//! let record = Identifier::new(1);
//! let name = Text::intern("name");
//! engine.insert(Action::Add, record, name.clone(), Value::String(Text::intern("alice"))).unwrap();
//!
//! assert!(engine.verify(record, &name, &Value::String(Text::intern("alice")), None).unwrap());
//!
//! engine.stop();
//! ```

#![allow(dead_code)]

pub mod block;
pub mod bloom;
pub mod buffer;
pub mod database;
pub mod encoding;
pub mod engine;
pub mod lock;
pub mod model;
pub mod record;
pub mod write;
