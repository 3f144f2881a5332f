use super::*;
use crate::model::{Identifier, Text, Value};
use tempfile::tempdir;

type PrimaryBlock = Block<Identifier, Text, Value>;

#[test]
fn insert_then_seek_before_sync_returns_in_sorted_order() {
    let block = PrimaryBlock::new_mutable(1).unwrap();
    let rec = Identifier::new(1);
    block
        .insert(rec, Text::intern("name"), Value::String(Text::intern("alice")), Version::from(1), Action::Add)
        .unwrap();
    block
        .insert(rec, Text::intern("age"), Value::Integer(30), Version::from(2), Action::Add)
        .unwrap();

    let mut out = Vec::new();
    block.seek_locator(&rec, &mut out).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out[0] <= out[1]);
}

#[test]
fn insert_on_immutable_block_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = BlockPaths::for_id(dir.path(), 1);
    let block = PrimaryBlock::new_mutable(1).unwrap();
    block
        .insert(Identifier::new(1), Text::intern("k"), Value::Boolean(true), Version::from(1), Action::Add)
        .unwrap();
    block.sync(&paths).unwrap();

    let result = block.insert(Identifier::new(2), Text::intern("k"), Value::Boolean(false), Version::from(2), Action::Add);
    assert!(matches!(result, Err(BlockError::IllegalStateNotMutable)));
}

#[test]
fn sync_then_seek_round_trips_through_mmap_after_eviction() {
    let dir = tempdir().unwrap();
    let paths = BlockPaths::for_id(dir.path(), 7);
    let block = PrimaryBlock::new_mutable(7).unwrap();
    let rec = Identifier::new(42);
    block
        .insert(rec, Text::intern("email"), Value::String(Text::intern("a@b.com")), Version::from(10), Action::Add)
        .unwrap();
    block.sync(&paths).unwrap();

    // simulate hot-cache eviction
    use hot_cache::Evictable;
    block.evict();

    let mut out = Vec::new();
    block.seek_locator(&rec, &mut out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key, Text::intern("email"));
}

#[test]
fn seek_for_absent_locator_is_empty() {
    let dir = tempdir().unwrap();
    let paths = BlockPaths::for_id(dir.path(), 2);
    let block = PrimaryBlock::new_mutable(2).unwrap();
    block
        .insert(Identifier::new(1), Text::intern("k"), Value::Boolean(true), Version::from(1), Action::Add)
        .unwrap();
    block.sync(&paths).unwrap();

    let mut out = Vec::new();
    block.seek_locator(&Identifier::new(999), &mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn empty_sync_is_a_noop() {
    let dir = tempdir().unwrap();
    let paths = BlockPaths::for_id(dir.path(), 3);
    let block = PrimaryBlock::new_mutable(3).unwrap();
    block.sync(&paths).unwrap();
    assert!(block.is_mutable());
    assert!(!paths.data.exists());
}

#[test]
fn open_and_repair_recovers_from_corrupted_sidecars() {
    let dir = tempdir().unwrap();
    let paths = BlockPaths::for_id(dir.path(), 9);
    let block = PrimaryBlock::new_mutable(9).unwrap();
    let rec = Identifier::new(3);
    block
        .insert(rec, Text::intern("status"), Value::Tag(Text::intern("active")), Version::from(1), Action::Add)
        .unwrap();
    block.sync(&paths).unwrap();

    // corrupt the filter file
    std::fs::write(&paths.filter, b"not a bloom filter").unwrap();

    let reopened = PrimaryBlock::open(9, &paths).unwrap();
    let mut out = Vec::new();
    reopened.seek_locator(&rec, &mut out).unwrap();
    assert_eq!(out.len(), 1);
}

#[test]
fn revision_round_trips_through_encode_decode() {
    let r: Revision<Identifier, Text, Value> = Revision::new(
        Identifier::new(5),
        Text::intern("k"),
        Value::Long(-9),
        Version::from(3),
        Action::Remove,
    );
    let bytes = encoding::encode_to_vec(&r).unwrap();
    let (decoded, n): (Revision<Identifier, Text, Value>, usize) = encoding::decode_from_slice(&bytes).unwrap();
    assert_eq!(decoded, r);
    assert_eq!(n, bytes.len());
}
