use super::*;
use crate::engine::EngineContext;
use crate::index::avl::AvlIndex;
use crate::index::rtree::RTreeIndex;
use crate::index::tree::TreeIndex;
use crate::tuple::{tuple_new, FieldDef, FieldType, KeyPart, TupleFormat};

fn fixture() -> (EngineContext, SpaceRef) {
    let fmt = TupleFormat::new(
        vec![FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false }],
        vec![0],
    );
    let pk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let pk = Box::new(TreeIndex::new("primary", pk_kd));
    let space = Space::new(
        SpaceDef { id: 7, name: "s".into(), field_count: 1, is_temporary: false, is_local: false },
        fmt.clone(),
        vec![pk],
    )
    .unwrap();
    let space_ref: SpaceRef = Rc::new(RefCell::new(space));

    let mut engine = EngineContext::new();
    engine.cache_mut().cache_replace(None, Some(space_ref.clone())).unwrap();

    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 1).unwrap();
    rmp::encode::write_uint(&mut buf, 1).unwrap();
    let t = tuple_new(fmt, buf).unwrap();
    space_ref.borrow_mut().replace(None, Some(&t), ReplaceMode::Insert).unwrap();

    (engine, space_ref)
}

#[test]
fn adding_a_secondary_index_builds_it_from_the_primary() {
    let (mut engine, space_ref) = fixture();
    let sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], false).unwrap());
    let op = AddIndex::new(
        1,
        sk_kd,
        Box::new(|kd, _cfg| Box::new(AvlIndex::new("secondary", kd)) as Box<dyn IndexVtab>),
    );
    let mut plan = AlterPlan::new(space_ref.clone(), vec![Box::new(op)]);
    plan.build(&engine).unwrap();
    plan.commit(&mut engine).unwrap();

    let version_before = engine.cache().cache_version();
    let new_space = engine.cache().get(7).unwrap();
    assert_eq!(new_space.borrow().indexes().len(), 2);
    assert_eq!(new_space.borrow().index(1).unwrap().size(), 1);
    assert!(version_before > 0);
}

// `AddIndex::alter`'s live-build regime installs a temporary `on_replace`
// trigger on the old space to mirror concurrent writes into the index under
// construction; it must come back off once the scan settles, or every
// later write against that space would pay for a build that's long done.
#[test]
fn building_a_secondary_index_live_leaves_no_trigger_behind() {
    let (mut engine, space_ref) = fixture();
    assert_eq!(space_ref.borrow().replace_trigger_count(), 0);

    let sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], false).unwrap());
    let op = AddIndex::new(
        1,
        sk_kd,
        Box::new(|kd, cfg| Box::new(TreeIndex::with_capacity("secondary", kd, cfg.page_capacity))
            as Box<dyn IndexVtab>),
    );
    let mut plan = AlterPlan::new(space_ref.clone(), vec![Box::new(op)]);
    plan.build(&engine).unwrap();

    assert_eq!(space_ref.borrow().replace_trigger_count(), 0);

    plan.commit(&mut engine).unwrap();
    let new_space = engine.cache().get(7).unwrap();
    assert_eq!(new_space.borrow().index(1).unwrap().size(), 1);
}

fn spatial_fixture() -> (EngineContext, SpaceRef) {
    let fmt = TupleFormat::new(
        vec![
            FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false },
            FieldDef { name: "bbox".into(), field_type: FieldType::Array, is_nullable: false },
        ],
        vec![0],
    );
    let pk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let pk = Box::new(TreeIndex::new("primary", pk_kd));
    let space = Space::new(
        SpaceDef { id: 9, name: "geo".into(), field_count: 2, is_temporary: false, is_local: false },
        fmt.clone(),
        vec![pk],
    )
    .unwrap();
    let space_ref: SpaceRef = Rc::new(RefCell::new(space));

    let mut engine = EngineContext::new();
    engine.cache_mut().cache_replace(None, Some(space_ref.clone())).unwrap();

    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, 1).unwrap();
    rmp::encode::write_array_len(&mut buf, 4).unwrap();
    for v in [0.0f64, 0.0, 1.0, 1.0] {
        rmp::encode::write_f64(&mut buf, v).unwrap();
    }
    let t = tuple_new(fmt, buf).unwrap();
    space_ref.borrow_mut().replace(None, Some(&t), ReplaceMode::Insert).unwrap();

    (engine, space_ref)
}

// `EngineConfig::rtree_node_capacity` must reach a live `RTreeIndex` the
// same way `page_capacity` reaches a live `TreeIndex`, not just the
// crate-wide `NODE_CAPACITY` default.
#[test]
fn adding_a_spatial_index_threads_the_configured_node_capacity() {
    let (mut engine, space_ref) = spatial_fixture();
    let sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(1, FieldType::Array)], false).unwrap());
    let op = AddIndex::new(
        1,
        sk_kd,
        Box::new(|kd, cfg| {
            Box::new(RTreeIndex::with_capacity("bbox", kd, cfg.rtree_node_capacity))
                as Box<dyn IndexVtab>
        }),
    );
    let mut plan = AlterPlan::new(space_ref.clone(), vec![Box::new(op)]);
    plan.build(&engine).unwrap();
    plan.commit(&mut engine).unwrap();

    let new_space = engine.cache().get(9).unwrap();
    assert_eq!(new_space.borrow().index(1).unwrap().size(), 1);
}

#[test]
fn rollback_discards_the_half_built_index_and_leaves_the_cache_untouched() {
    let (mut engine, space_ref) = fixture();
    let version_before = engine.cache().cache_version();
    let sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], false).unwrap());
    let op = AddIndex::new(
        1,
        sk_kd,
        Box::new(|kd, _cfg| Box::new(AvlIndex::new("secondary", kd)) as Box<dyn IndexVtab>),
    );
    let mut plan = AlterPlan::new(space_ref.clone(), vec![Box::new(op)]);
    plan.build(&engine).unwrap();
    plan.rollback().unwrap();

    assert_eq!(engine.cache().cache_version(), version_before);
    let still_old = engine.cache().get(7).unwrap();
    assert_eq!(still_old.borrow().indexes().len(), 1);
}

// Simulates a WAL write failure: the plan is built (the replacement index
// fully constructed) but `commit` is never called, only `rollback`, exactly
// the "errors before WAL submission" path this orchestrator documents.
#[test]
fn rollback_after_a_drop_and_add_preserves_the_original_index() {
    let fmt = TupleFormat::new(
        vec![FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false }],
        vec![0],
    );
    let mut engine = EngineContext::new();

    let pk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let pk = Box::new(TreeIndex::new("primary", pk_kd));
    let old_sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], false).unwrap());
    let old_sk = Box::new(AvlIndex::new("secondary", old_sk_kd));
    let space = Space::new(
        SpaceDef { id: 3, name: "s".into(), field_count: 1, is_temporary: false, is_local: false },
        fmt.clone(),
        vec![pk, old_sk],
    )
    .unwrap();
    let space_ref: SpaceRef = Rc::new(RefCell::new(space));
    engine.cache_mut().cache_replace(None, Some(space_ref.clone())).unwrap();
    for id in 1..=3u64 {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, id).unwrap();
        let t = tuple_new(fmt.clone(), buf).unwrap();
        space_ref.borrow_mut().replace(None, Some(&t), ReplaceMode::Insert).unwrap();
    }
    let version_before = engine.cache().cache_version();

    let new_sk_kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let ops: Vec<Box<dyn AlterOp>> = vec![
        Box::new(DropIndex { iid: 1 }),
        Box::new(AddIndex::new(
            1,
            new_sk_kd,
            Box::new(|kd, _cfg| Box::new(AvlIndex::new("secondary", kd)) as Box<dyn IndexVtab>),
        )),
    ];
    let mut plan = AlterPlan::new(space_ref.clone(), ops);
    plan.build(&engine).unwrap();
    plan.rollback().unwrap();

    assert_eq!(engine.cache().cache_version(), version_before);
    let still_old = engine.cache().get(3).unwrap();
    let s = still_old.borrow();
    assert_eq!(s.indexes().len(), 2);
    assert_eq!(s.index(0).unwrap().size(), 3);
    assert_eq!(s.index(1).unwrap().size(), 3);
    assert!(!s.index(1).unwrap().key_def().is_unique());
}
