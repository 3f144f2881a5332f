use super::*;
use crate::encoding::{decode_from_slice, encode_to_vec};

#[test]
fn write_round_trips_add() {
    let w = Write::add(
        Identifier::new(1),
        Text::intern("name"),
        Value::String(Text::intern("alice")),
        Version::from(100),
    );
    let bytes = encode_to_vec(&w).unwrap();
    let (decoded, n): (Write, usize) = decode_from_slice(&bytes).unwrap();
    assert_eq!(decoded, w);
    assert_eq!(n, bytes.len());
}

#[test]
fn write_round_trips_remove() {
    let w = Write::remove(
        Identifier::new(7),
        Text::intern("age"),
        Value::Integer(30),
        Version::from(42),
    );
    let bytes = encode_to_vec(&w).unwrap();
    let (decoded, _): (Write, usize) = decode_from_slice(&bytes).unwrap();
    assert_eq!(decoded, w);
}

#[test]
fn write_with_compare_action_cannot_be_encoded() {
    let w = Write::new(
        crate::model::Action::Compare,
        Identifier::new(1),
        Text::intern("k"),
        Value::Boolean(true),
        Version::from(1),
    );
    assert!(encode_to_vec(&w).is_err());
}
