use super::*;

fn uint_string_format() -> Arc<TupleFormat> {
    TupleFormat::new(
        vec![
            FieldDef {
                name: "id".into(),
                field_type: FieldType::Unsigned,
                is_nullable: false,
            },
            FieldDef {
                name: "name".into(),
                field_type: FieldType::String,
                is_nullable: false,
            },
        ],
        vec![0],
    )
}

fn encode_uint_str(id: u64, name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    rmp::encode::write_str(&mut buf, name).unwrap();
    buf
}

fn pk() -> KeyDef {
    KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap()
}

#[test]
fn field_access_indexed_is_direct() {
    let fmt = uint_string_format();
    let t = tuple_new(fmt, encode_uint_str(7, "a")).unwrap();
    let (scalar, _) = msgpack::decode_scalar(t.field(0).unwrap().unwrap()).unwrap();
    assert_eq!(scalar, Scalar::UInt(7));
}

#[test]
fn compare_orders_by_key_def() {
    let fmt = uint_string_format();
    let a = tuple_new(fmt.clone(), encode_uint_str(1, "a")).unwrap();
    let b = tuple_new(fmt, encode_uint_str(2, "a")).unwrap();
    assert_eq!(a.compare(&b, &pk()).unwrap(), Ordering::Less);
    assert_eq!(b.compare(&a, &pk()).unwrap(), Ordering::Greater);
    assert_eq!(a.compare(&a, &pk()).unwrap(), Ordering::Equal);
}

#[test]
fn extract_key_round_trips_through_compare_with_key() {
    let fmt = uint_string_format();
    let t = tuple_new(fmt, encode_uint_str(42, "x")).unwrap();
    let kd = pk();
    let key = t.extract_key(&kd).unwrap();
    assert_eq!(t.compare_with_key(&key, 1, &kd).unwrap(), Ordering::Equal);
}

#[test]
fn multikey_extraction_yields_one_key_per_element() {
    let fmt = TupleFormat::new(
        vec![
            FieldDef {
                name: "id".into(),
                field_type: FieldType::Unsigned,
                is_nullable: false,
            },
            FieldDef {
                name: "tags".into(),
                field_type: FieldType::Array,
                is_nullable: false,
            },
        ],
        vec![1],
    );
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, 1).unwrap();
    rmp::encode::write_array_len(&mut buf, 3).unwrap();
    rmp::encode::write_uint(&mut buf, 10).unwrap();
    rmp::encode::write_uint(&mut buf, 20).unwrap();
    rmp::encode::write_uint(&mut buf, 30).unwrap();

    let t = tuple_new(fmt, buf).unwrap();
    let kd = KeyDef::new(vec![KeyPart::new(1, FieldType::Unsigned)], false)
        .unwrap()
        .with_multikey(1);
    let keys = t.extract_keys_multi(&kd).unwrap();
    assert_eq!(keys.len(), 3);
    assert_ne!(keys[0], keys[1]);
}

#[test]
fn null_in_non_nullable_field_is_rejected() {
    let fmt = uint_string_format();
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_nil(&mut buf).unwrap();
    rmp::encode::write_str(&mut buf, "x").unwrap();
    let t = tuple_new(fmt, buf).unwrap();
    assert!(t.compare(&t, &pk()).is_err());
}
