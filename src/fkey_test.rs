use super::*;
use crate::index::tree::TreeIndex;
use crate::space::{Space, SpaceDef};
use crate::tuple::{tuple_new, FieldDef, FieldType, KeyPart, TupleFormat};
use std::cell::RefCell;
use std::rc::Rc;

fn parent_space() -> SpaceRef {
    let fmt = TupleFormat::new(
        vec![FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false }],
        vec![0],
    );
    let kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let pk = Box::new(TreeIndex::new("primary", kd));
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 1).unwrap();
    rmp::encode::write_uint(&mut buf, 1u64).unwrap();
    let t = tuple_new(fmt.clone(), buf).unwrap();
    let mut space = Space::new(
        SpaceDef { id: 2, name: "parent".into(), field_count: 1, is_temporary: false, is_local: false },
        fmt,
        vec![pk],
    )
    .unwrap();
    space.replace(None, Some(&t), crate::index::ReplaceMode::Insert).unwrap();
    Rc::new(RefCell::new(space))
}

fn child_tuple(id: u64, parent_id: u64) -> Tuple {
    let fmt = TupleFormat::new(
        vec![
            FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false },
            FieldDef { name: "parent_id".into(), field_type: FieldType::Unsigned, is_nullable: true },
        ],
        vec![0, 1],
    );
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    rmp::encode::write_uint(&mut buf, parent_id).unwrap();
    tuple_new(fmt, buf).unwrap()
}

fn fixture_constraint() -> (SpaceCache, ForeignKeyConstraint) {
    let mut cache = SpaceCache::new();
    let parent = parent_space();
    cache.cache_replace(None, Some(parent)).unwrap();
    let fk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let fk = ForeignKeyConstraint::new(
        "child_parent_fk",
        "parent_id",
        1,
        KeyMapping::Single { local_field: 1 },
        2,
        0,
        fk_kd,
        false,
        false,
    )
    .unwrap();
    (cache, fk)
}

#[test]
fn insert_check_fails_when_referenced_row_is_missing() {
    let (cache, fk) = fixture_constraint();
    let tuple = child_tuple(10, 99);
    let err = fk
        .check_insert(&cache, &tuple, RecoveryState::Normal)
        .unwrap_err();
    assert!(matches!(err, Error::FieldForeignKeyFailed(_, _)));
}

#[test]
fn insert_check_passes_when_referenced_row_exists() {
    let (cache, fk) = fixture_constraint();
    let tuple = child_tuple(10, 1);
    fk.check_insert(&cache, &tuple, RecoveryState::Normal).unwrap();
}

#[test]
fn insert_check_is_skipped_during_recovery() {
    let (cache, fk) = fixture_constraint();
    let tuple = child_tuple(10, 99);
    fk.check_insert(&cache, &tuple, RecoveryState::InitialRecovery).unwrap();
}

// `attach`'s holder must follow the foreign index across an alter that
// renumbers it, as long as the key shape it depends on survives somewhere
// on the new space.
#[test]
fn attach_re_resolves_the_foreign_index_after_it_is_renumbered() {
    let mut cache = SpaceCache::new();
    let parent = parent_space();
    cache.cache_replace(None, Some(parent.clone())).unwrap();

    let fk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let fk = ForeignKeyConstraint::new(
        "child_parent_fk",
        "parent_id",
        1,
        KeyMapping::Single { local_field: 1 },
        2,
        0,
        fk_kd,
        false,
        false,
    )
    .unwrap();
    let fk = Rc::new(RefCell::new(fk));
    ForeignKeyConstraint::attach(&fk, &mut cache, false).unwrap();
    assert_eq!(fk.borrow().foreign_index_id, 0);

    // Rebuild "parent" with the old key shape moved from iid 0 to iid 1.
    let fmt = TupleFormat::new(
        vec![
            FieldDef { name: "other".into(), field_type: FieldType::Unsigned, is_nullable: false },
            FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false },
        ],
        vec![0],
    );
    let new_pk_kd =
        Arc::new(KeyDef::new(vec![KeyPart::new(1, FieldType::Unsigned)], true).unwrap());
    let new_sk_kd =
        Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let new_pk = Box::new(TreeIndex::new("primary", new_pk_kd));
    let new_sk = Box::new(TreeIndex::new("by_id", new_sk_kd));
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, 0u64).unwrap();
    rmp::encode::write_uint(&mut buf, 1u64).unwrap();
    let t = tuple_new(fmt.clone(), buf).unwrap();
    let mut new_space = Space::new(
        SpaceDef { id: 2, name: "parent".into(), field_count: 2, is_temporary: false, is_local: false },
        fmt,
        vec![new_pk, new_sk],
    )
    .unwrap();
    new_space.replace(None, Some(&t), crate::index::ReplaceMode::Insert).unwrap();
    let new_space = Rc::new(RefCell::new(new_space));

    cache.cache_replace(Some(parent), Some(new_space)).unwrap();

    assert_eq!(fk.borrow().foreign_index_id, 1);
}

#[test]
fn rejects_attaching_a_non_temporary_space_to_a_temporary_one() {
    let fk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let err = ForeignKeyConstraint::new(
        "bad_fk",
        "parent_id",
        1,
        KeyMapping::Single { local_field: 1 },
        2,
        0,
        fk_kd,
        false,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidAlter(_)));
}
