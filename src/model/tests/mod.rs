use crate::encoding::{decode_from_slice, encode_to_vec};
use crate::model::{Action, Clock, Composite, Identifier, Text, Value, Version};

#[test]
fn identifier_round_trips() {
    let id = Identifier::new(42);
    let bytes = encode_to_vec(&id).unwrap();
    let (decoded, n): (Identifier, usize) = decode_from_slice(&bytes).unwrap();
    assert_eq!(decoded, id);
    assert_eq!(n, bytes.len());
}

#[test]
fn action_round_trips_add_and_remove() {
    for action in [Action::Add, Action::Remove] {
        let bytes = encode_to_vec(&action).unwrap();
        let (decoded, _): (Action, usize) = decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded, action);
    }
}

#[test]
fn action_compare_is_rejected_at_encode_time() {
    let result = encode_to_vec(&Action::Compare);
    assert!(result.is_err());
}

#[test]
fn clock_next_is_strictly_monotonic() {
    let clock = Clock::new();
    let mut prev = clock.next();
    for _ in 0..1000 {
        let v = clock.next();
        assert!(v > prev, "clock must never repeat or go backwards");
        prev = v;
    }
}

#[test]
fn clock_observe_advances_past_recovered_version() {
    let clock = Clock::new();
    clock.observe(Version::from(1_000_000_000));
    let v = clock.next();
    assert!(v.value() > 1_000_000_000);
}

#[test]
fn composite_is_deterministic_across_calls() {
    let a = Identifier::new(7);
    let k = Text::intern("name");
    let c1 = Composite::of(&[&a, &k]).unwrap();
    let c2 = Composite::of(&[&a, &k]).unwrap();
    assert_eq!(c1, c2);
}

#[test]
fn composite_length_prefixing_avoids_boundary_collisions() {
    let a = Text::intern("ab");
    let b = Text::intern("c");
    let c = Text::intern("a");
    let d = Text::intern("bc");
    let left = Composite::of(&[&a, &b]).unwrap();
    let right = Composite::of(&[&c, &d]).unwrap();
    assert_ne!(left, right);
}

#[test]
fn composite_of_bytes_matches_manual_concatenation_semantics() {
    let raw = b"hello world";
    let c1 = Composite::of_bytes(raw);
    let c2 = Composite::of_bytes(raw);
    assert_eq!(c1, c2);
    let c3 = Composite::of_bytes(b"hello worlz");
    assert_ne!(c1, c3);
}

#[test]
fn text_interning_gives_pointer_identity_for_equal_strings() {
    let a = Text::intern("concourse");
    let b = Text::intern("concourse");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), b.as_str());
}

#[test]
fn text_round_trips_and_reinterns() {
    let t = Text::intern("a-key");
    let bytes = encode_to_vec(&t).unwrap();
    let (decoded, _): (Text, usize) = decode_from_slice(&bytes).unwrap();
    assert_eq!(decoded, t);
    // re-interning the same content must yield the same backing allocation.
    assert_eq!(decoded.as_str(), "a-key");
}

#[test]
fn text_ordering_is_by_content() {
    let a = Text::intern("alpha");
    let b = Text::intern("beta");
    assert!(a < b);
}

fn round_trip_value(v: Value) -> Value {
    let bytes = encode_to_vec(&v).unwrap();
    let (decoded, n): (Value, usize) = decode_from_slice(&bytes).unwrap();
    assert_eq!(n, bytes.len());
    decoded
}

#[test]
fn value_round_trips_every_variant() {
    let values = vec![
        Value::Boolean(true),
        Value::Boolean(false),
        Value::Integer(-7),
        Value::Long(i64::MIN),
        Value::Float(1.5),
        Value::Double(-3.25),
        Value::String(Text::intern("hello")),
        Value::Tag(Text::intern("tagged")),
        Value::Link(Identifier::new(99)),
        Value::Timestamp(1_700_000_000),
        Value::NEG_INF,
        Value::POS_INF,
    ];
    for v in values {
        let decoded = round_trip_value(v.clone());
        assert_eq!(decoded, v);
    }
}

#[test]
fn value_total_order_places_sentinels_at_extremes() {
    let mut values = vec![
        Value::POS_INF,
        Value::Long(5),
        Value::Boolean(true),
        Value::NEG_INF,
        Value::Integer(-1),
        Value::String(Text::intern("z")),
    ];
    values.sort();
    assert_eq!(values.first(), Some(&Value::NEG_INF));
    assert_eq!(values.last(), Some(&Value::POS_INF));
}

#[test]
fn value_float_ordering_is_total_including_nan() {
    let mut values = vec![
        Value::Float(f32::NAN),
        Value::Float(-1.0),
        Value::Float(1.0),
        Value::Float(0.0),
    ];
    // total_cmp must not panic and must produce a consistent order.
    values.sort();
    assert_eq!(values.len(), 4);
}

#[test]
fn value_ordering_is_stable_across_type_ranks() {
    assert!(Value::Boolean(true) < Value::Integer(0));
    assert!(Value::Integer(i32::MAX) < Value::Long(i64::MIN));
    assert!(Value::Long(i64::MAX) < Value::Float(f32::MIN));
    assert!(Value::Link(Identifier::new(0)) < Value::Tag(Text::intern("a")));
    assert!(Value::Tag(Text::intern("z")) < Value::String(Text::intern("a")));
}
