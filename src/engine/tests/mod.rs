use tempfile::tempdir;

use super::*;

fn text(s: &str) -> Text {
    Text::intern(s)
}

#[test]
fn insert_then_verify_reads_own_write_before_any_sync() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(1);
    let key = text("name");
    let value = Value::String(text("alice"));

    engine.insert(Action::Add, record, key.clone(), value.clone()).unwrap();
    assert!(engine.verify(record, &key, &value, None).unwrap());

    engine.stop();
}

#[test]
fn select_and_browse_reflect_pending_writes() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(1);
    let key = text("age");
    let value = Value::Integer(30);

    engine.insert(Action::Add, record, key.clone(), value.clone()).unwrap();

    let selected = engine.select(record, None).unwrap();
    assert!(selected[&key].contains(&value));

    let narrowed = engine.select_key(&key, record, None).unwrap();
    assert!(narrowed.contains(&value));

    let browsed = engine.browse(&key, None).unwrap();
    assert!(browsed[&value].contains(&record));

    engine.stop();
}

#[test]
fn explore_returns_matching_records_with_their_matching_values() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let key = text("score");

    engine.insert(Action::Add, Identifier::new(1), key.clone(), Value::Integer(5)).unwrap();
    engine.insert(Action::Add, Identifier::new(2), key.clone(), Value::Integer(15)).unwrap();

    let hits = engine.explore(&key, Operator::GreaterThan, vec![Value::Integer(10)], None).unwrap();
    assert!(hits.contains_key(&Identifier::new(2)));
    assert!(!hits.contains_key(&Identifier::new(1)));
    assert!(hits[&Identifier::new(2)].contains(&Value::Integer(15)));

    engine.stop();
}

#[test]
fn search_finds_not_yet_transported_text() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(7);
    let key = text("bio");

    engine
        .insert(Action::Add, record, key.clone(), Value::String(text("the quick brown fox")))
        .unwrap();

    let hits = engine.search(&key, "quick brown").unwrap();
    assert!(hits.contains(&record));

    engine.stop();
}

#[test]
fn sync_drains_the_buffer_into_the_database() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(3);
    let key = text("name");
    let value = Value::String(text("bob"));

    engine.insert(Action::Add, record, key.clone(), value.clone()).unwrap();
    engine.sync().unwrap();

    assert!(engine.buffer.iterate().is_empty());
    assert!(engine.verify(record, &key, &value, None).unwrap());

    engine.stop();
}

#[test]
fn chronologize_sees_pending_and_persisted_versions_together() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(4);
    let key = text("status");

    engine.insert(Action::Add, record, key.clone(), Value::Tag(text("pending"))).unwrap();
    engine.sync().unwrap();
    engine.insert(Action::Remove, record, key.clone(), Value::Tag(text("pending"))).unwrap();
    engine.insert(Action::Add, record, key.clone(), Value::Tag(text("done"))).unwrap();

    let history = engine.chronologize(&key, record, Version::from(0), Version::from(u64::MAX)).unwrap();
    assert_eq!(history.len(), 3);
    let last = history.values().last().unwrap();
    assert!(last.contains(&Value::Tag(text("done"))));
    assert!(!last.contains(&Value::Tag(text("pending"))));

    engine.stop();
}

#[test]
fn contains_is_true_for_a_record_with_only_a_pending_write() {
    let dir = tempdir().unwrap();
    let engine = Engine::start(dir.path()).unwrap();
    let record = Identifier::new(5);

    assert!(!engine.contains(record).unwrap());
    engine.insert(Action::Add, record, text("k"), Value::Integer(1)).unwrap();
    assert!(engine.contains(record).unwrap());

    engine.stop();
}

#[test]
fn restart_recovers_buffered_and_persisted_state() {
    let dir = tempdir().unwrap();
    let record = Identifier::new(6);
    let key = text("name");
    let value = Value::String(text("carol"));
    {
        let engine = Engine::start(dir.path()).unwrap();
        engine.insert(Action::Add, record, key.clone(), value.clone()).unwrap();
        engine.stop();
    }

    let engine = Engine::start(dir.path()).unwrap();
    assert!(engine.verify(record, &key, &value, None).unwrap());
    engine.stop();
}
