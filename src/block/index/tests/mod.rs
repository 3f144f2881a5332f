use super::*;
use crate::model::{Identifier, Text};
use tempfile::tempdir;

fn composite(i: u64) -> Composite {
    Composite::of(&[&Identifier::new(i)]).unwrap()
}

#[test]
fn build_merges_contiguous_runs() {
    let a = composite(1);
    let b = composite(2);
    let entries = vec![
        (a, a, 0, 10),
        (a, a, 10, 20),
        (b, b, 20, 35),
    ];
    let index = BlockIndex::build(&entries);
    assert_eq!(index.locator_range(&a), Some((0, 20)));
    assert_eq!(index.locator_range(&b), Some((20, 35)));
}

#[test]
fn missing_composite_is_no_entry() {
    let index = BlockIndex::new();
    assert_eq!(index.locator_range(&composite(42)), NO_ENTRY);
}

#[test]
fn save_and_load_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("block.indx");

    let a = composite(1);
    let entries = vec![(a, a, 0, 100)];
    let index = BlockIndex::build(&entries);
    index.save(&path).unwrap();

    let loaded = BlockIndex::load(&path).unwrap();
    assert_eq!(loaded.locator_range(&a), Some((0, 100)));
}

#[test]
fn repair_from_matches_build() {
    let a = composite(5);
    let entries = vec![(a, a, 3, 8)];
    let built = BlockIndex::build(&entries);
    let repaired = BlockIndex::repair_from(&entries);
    assert_eq!(built.locator_range(&a), repaired.locator_range(&a));
}
