use super::*;

#[test]
fn cast_is_idempotent_for_every_scalar_type() {
    let src = Mem::owned_str("123".to_string());
    for t in [
        CastType::Integer,
        CastType::Real,
        CastType::Text,
        CastType::Boolean,
        CastType::Blob,
    ] {
        let once = cast(&src, t);
        let twice = cast(&once, t);
        match (once.payload(), twice.payload()) {
            (Payload::Int(a), Payload::Int(b)) => assert_eq!(a, b),
            (Payload::Double(a), Payload::Double(b)) => assert_eq!(a, b),
            (Payload::Str(a), Payload::Str(b)) => assert_eq!(a, b),
            (Payload::Bool(a), Payload::Bool(b)) => assert_eq!(a, b),
            (Payload::Blob(a), Payload::Blob(b)) => assert_eq!(a, b),
            _ => panic!("cast changed payload shape across a second application"),
        }
    }
}

#[test]
fn bool_from_string_follows_true_false_literals() {
    let t = cast(&Mem::owned_str("true".into()), CastType::Boolean);
    assert!(matches!(t.payload(), Payload::Bool(true)));
    let f = cast(&Mem::owned_str("false".into()), CastType::Boolean);
    assert!(matches!(f.payload(), Payload::Bool(false)));
}

#[test]
fn move_clears_source_and_transfers_flags() {
    let mut src = Mem::owned_str("hello".into());
    let mut dst = Mem::null();
    dst.move_from(&mut src);
    assert!(src.is_null());
    assert_eq!(dst.as_str(), Some("hello"));
    assert!(dst.flags().contains(MemFlags::OWNS_MEMORY));
}

#[test]
fn copy_does_not_alias_source() {
    let src = Mem::owned_blob(vec![1, 2, 3]);
    let mut dst = Mem::null();
    dst.copy_from(&src);
    assert_eq!(dst.as_blob(), Some(&[1u8, 2, 3][..]));
    assert_eq!(src.as_blob(), Some(&[1u8, 2, 3][..]));
}

#[test]
fn make_record_then_column_round_trips() {
    let fmt = crate::tuple::TupleFormat::new(
        vec![
            crate::tuple::FieldDef {
                name: "a".into(),
                field_type: crate::tuple::FieldType::Unsigned,
                is_nullable: false,
            },
            crate::tuple::FieldDef {
                name: "b".into(),
                field_type: crate::tuple::FieldType::String,
                is_nullable: false,
            },
        ],
        vec![],
    );
    let mems = vec![Mem::uint(5), Mem::owned_str("hi".into())];
    let raw = make_record(&mems, &[]);
    let tuple = crate::tuple::tuple_new(fmt, raw).unwrap();
    let a = column(&tuple, 0, None);
    let b = column(&tuple, 1, None);
    assert_eq!(a.as_i64(), Some(5));
    assert_eq!(b.as_str(), Some("hi"));
}

#[test]
fn division_semantics_are_explicit_about_zero() {
    // Integer division by zero and float division by zero (via NaN) both
    // yield Null at the opcode layer; this only checks the raw arithmetic
    // primitives the Divide opcode relies on.
    let a = 10_i64;
    let b = 0_i64;
    assert_eq!(a.checked_div(b), None);
    assert!((1.0_f64 / 0.0).is_infinite());
    assert!((0.0_f64 / 0.0).is_nan());
}
