use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::model::Text;

fn key(s: &str) -> Text {
    Text::intern(s)
}

#[test]
fn equals_tokens_on_the_same_value_intersect() {
    let a = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    let b = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    assert!(a.intersects(&b));
}

#[test]
fn equals_tokens_on_different_values_do_not_intersect() {
    let a = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    let b = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(11)]).unwrap();
    assert!(!a.intersects(&b));
}

#[test]
fn tokens_on_different_keys_never_intersect() {
    let a = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    let b = RangeToken::new(key("age"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    assert!(!a.intersects(&b));
}

#[test]
fn greater_than_does_not_intersect_its_own_boundary() {
    // GT 10 is the open interval (10, +inf); EQ 10 is the single point {10}.
    let gt = RangeToken::new(key("score"), Operator::GreaterThan, vec![Value::Integer(10)]).unwrap();
    let eq = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    assert!(!gt.intersects(&eq));

    let gte = RangeToken::new(key("score"), Operator::GreaterThanOrEqual, vec![Value::Integer(10)]).unwrap();
    assert!(gte.intersects(&eq));
}

#[test]
fn between_inclusivity_controls_boundary_overlap() {
    let open = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Open, Bound::Open),
        vec![Value::Integer(0), Value::Integer(10)],
    )
    .unwrap();
    let at_upper = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    assert!(!open.intersects(&at_upper));

    let closed = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Closed, Bound::Closed),
        vec![Value::Integer(0), Value::Integer(10)],
    )
    .unwrap();
    assert!(closed.intersects(&at_upper));
}

#[test]
fn not_equals_excludes_only_its_one_point() {
    let neq = RangeToken::new(key("score"), Operator::NotEquals, vec![Value::Integer(10)]).unwrap();
    let at = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(10)]).unwrap();
    let elsewhere = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(11)]).unwrap();
    assert!(!neq.intersects(&at));
    assert!(neq.intersects(&elsewhere));
}

#[test]
fn regex_and_contains_conflict_with_everything_on_the_same_key() {
    let regex = RangeToken::new(key("name"), Operator::Regex, vec![Value::String(key("^a"))]).unwrap();
    let far_away = RangeToken::new(key("name"), Operator::Equals, vec![Value::String(key("zzz"))]).unwrap();
    assert!(regex.intersects(&far_away));
}

#[test]
fn between_between_pairs_use_the_same_interval_machinery() {
    let left = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Closed, Bound::Open),
        vec![Value::Integer(0), Value::Integer(10)],
    )
    .unwrap();
    let right = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Closed, Bound::Closed),
        vec![Value::Integer(10), Value::Integer(20)],
    )
    .unwrap();
    // [0, 10) and [10, 20] share no point: the left interval excludes 10.
    assert!(!left.intersects(&right));
}

#[test]
fn matches_evaluates_the_predicate_against_one_value() {
    let between = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Closed, Bound::Open),
        vec![Value::Integer(0), Value::Integer(10)],
    )
    .unwrap();
    assert!(between.matches(&Value::Integer(0)));
    assert!(!between.matches(&Value::Integer(10)));
    assert!(between.matches(&Value::Integer(5)));
}

#[test]
fn contains_and_regex_match_literally_against_text() {
    let contains = RangeToken::new(key("bio"), Operator::Contains, vec![Value::String(key("fox"))]).unwrap();
    assert!(contains.matches(&Value::String(key("a quick fox"))));
    assert!(!contains.matches(&Value::String(key("a quick dog"))));

    let re = RangeToken::new(key("bio"), Operator::Regex, vec![Value::String(key("^quick"))]).unwrap();
    assert!(re.matches(&Value::String(key("quick brown fox"))));
    assert!(!re.matches(&Value::String(key("a quick fox"))));
}

#[test]
fn wrong_arity_is_rejected() {
    let err = RangeToken::new(key("score"), Operator::Equals, vec![Value::Integer(1), Value::Integer(2)])
        .unwrap_err();
    assert_eq!(
        err,
        LockError::WrongArity {
            operator: Operator::Equals,
            expected: 1,
            got: 2,
        }
    );
}

#[test]
fn range_token_round_trips_through_encode_decode() {
    let token = RangeToken::new(
        key("score"),
        Operator::Between(Bound::Open, Bound::Closed),
        vec![Value::Integer(1), Value::Integer(2)],
    )
    .unwrap();
    let bytes = encoding::encode_to_vec(&token).unwrap();
    let (decoded, consumed) = RangeToken::decode_from(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, token);
}

#[test]
fn disjoint_read_locks_never_block_each_other() {
    let service = RangeLockService::new();
    let _a = service
        .get_read_lock(key("score"), Operator::LessThan, vec![Value::Integer(10)])
        .unwrap();
    let _b = service
        .get_read_lock(key("score"), Operator::GreaterThanOrEqual, vec![Value::Integer(10)])
        .unwrap();
}

#[test]
fn write_lock_blocks_until_conflicting_read_lock_is_released() {
    let service = Arc::new(RangeLockService::new());
    let read = service
        .get_read_lock(key("score"), Operator::GreaterThan, vec![Value::Integer(10)])
        .unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let writer = {
        let service = Arc::clone(&service);
        let acquired = Arc::clone(&acquired);
        std::thread::spawn(move || {
            tx.send(()).unwrap();
            let guard = service.get_write_lock(key("score"), Value::Integer(15));
            acquired.store(true, Ordering::SeqCst);
            drop(guard);
        })
    };

    rx.recv().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst), "writer should still be blocked by the overlapping read lock");

    drop(read);
    writer.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn write_lock_on_a_disjoint_value_acquires_immediately_even_while_blocked_elsewhere() {
    // T1 takes a read lock over (score, GT, 10). T2 tries a write lock at
    // 15 (blocks), then a second writer at 5 should acquire immediately
    // since 5 does not fall in (10, +inf).
    let service = RangeLockService::new();
    let _read = service
        .get_read_lock(key("score"), Operator::GreaterThan, vec![Value::Integer(10)])
        .unwrap();

    let low = service.get_write_lock(key("score"), Value::Integer(5));
    drop(low);
}
