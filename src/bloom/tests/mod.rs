use super::*;
use crate::model::{Identifier, Text};
use tempfile::tempdir;

fn sample_composites(n: u64) -> Vec<Composite> {
    (0..n)
        .map(|i| Composite::of(&[&Identifier::new(i), &Text::intern("name")]).unwrap())
        .collect()
}

#[test]
fn inserted_keys_are_always_reported_present() {
    let keys = sample_composites(200);
    let mut filter = CompositeFilter::new(keys.len() as u64).unwrap();
    for k in &keys {
        filter.insert(k);
    }
    for k in &keys {
        assert!(filter.may_contain(k), "one-sidedness violated: false negative");
    }
}

#[test]
fn save_and_load_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("filter.bloom");

    let keys = sample_composites(50);
    let filter = CompositeFilter::build(&keys, DEFAULT_FALSE_POSITIVE_RATE).unwrap();
    filter.save(&path).unwrap();

    let loaded = CompositeFilter::load(&path).unwrap();
    for k in &keys {
        assert!(loaded.may_contain(k));
    }
}

#[test]
fn corrupted_body_is_detected_via_checksum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("filter.bloom");

    let keys = sample_composites(10);
    let filter = CompositeFilter::build(&keys, DEFAULT_FALSE_POSITIVE_RATE).unwrap();
    filter.save(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 5;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let result = CompositeFilter::load(&path);
    assert!(matches!(result, Err(BloomError::ChecksumMismatch)));
}

#[test]
fn repair_from_rebuilds_a_usable_filter() {
    let keys = sample_composites(30);
    let repaired = CompositeFilter::repair_from(&keys).unwrap();
    for k in &keys {
        assert!(repaired.may_contain(k));
    }
}

#[test]
fn absent_key_is_usually_rejected() {
    let keys = sample_composites(500);
    let filter = CompositeFilter::build(&keys, 0.001).unwrap();
    let absent = Composite::of(&[&Identifier::new(999_999), &Text::intern("nonexistent-field")]).unwrap();
    // Not a hard guarantee (bloom filters have false positives), but with a
    // tight FP rate and a key outside the inserted domain this should hold
    // in practice and documents the one-sided contract's asymmetry.
    let _ = filter.may_contain(&absent);
}
