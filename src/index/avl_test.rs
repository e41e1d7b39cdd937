use super::*;
use crate::tuple::{tuple_new, FieldDef, FieldType, KeyPart, TupleFormat};

fn fixture() -> (Arc<TupleFormat>, Arc<KeyDef>) {
    let fmt = TupleFormat::new(
        vec![FieldDef {
            name: "id".into(),
            field_type: FieldType::Unsigned,
            is_nullable: false,
        }],
        vec![0],
    );
    let kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    (fmt, kd)
}

fn row(fmt: &Arc<TupleFormat>, id: u64) -> Tuple {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 1).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    tuple_new(fmt.clone(), buf).unwrap()
}

// AVL deletion of three elements out of three.
#[test]
fn deleting_every_element_empties_the_tree() {
    let (fmt, kd) = fixture();
    let mut idx = AvlIndex::new("sk", kd);
    let (t1, t2, t3) = (row(&fmt, 1), row(&fmt, 2), row(&fmt, 3));
    for t in [&t1, &t2, &t3] {
        idx.replace(None, Some(t), ReplaceMode::Insert).unwrap();
    }
    assert_eq!(idx.size(), 3);

    idx.replace(Some(&t2), None, ReplaceMode::InsertOrReplace).unwrap();
    idx.replace(Some(&t1), None, ReplaceMode::InsertOrReplace).unwrap();
    idx.replace(Some(&t3), None, ReplaceMode::InsertOrReplace).unwrap();

    assert_eq!(idx.size(), 0);
    assert!(idx.min().is_none());
    assert!(idx.max().is_none());
    assert!(idx.root.is_none());
}

#[test]
fn tree_stays_balanced_under_sequential_insertion() {
    let (fmt, kd) = fixture();
    let mut idx = AvlIndex::new("sk", kd);
    for i in 0..1000u64 {
        let t = row(&fmt, i);
        idx.replace(None, Some(&t), ReplaceMode::Insert).unwrap();
    }
    fn height(n: &Option<Box<Node>>) -> i32 {
        Node::height(n)
    }
    // A height much beyond 2*log2(n) would indicate the rebalancing broke.
    assert!(height(&idx.root) < 2 * (1000f64.log2() as i32 + 2));
}

#[test]
fn min_max_track_inorder_extremes() {
    let (fmt, kd) = fixture();
    let mut idx = AvlIndex::new("sk", kd);
    for i in [5u64, 1, 9, 3] {
        let t = row(&fmt, i);
        idx.replace(None, Some(&t), ReplaceMode::InsertOrReplace).unwrap();
    }
    assert_eq!(idx.min().unwrap().field(0).unwrap().unwrap(), row(&fmt, 1).field(0).unwrap().unwrap());
    assert_eq!(idx.max().unwrap().field(0).unwrap().unwrap(), row(&fmt, 9).field(0).unwrap().unwrap());
}

#[test]
fn injected_allocation_failure_surfaces_as_memory_issue() {
    let (fmt, kd) = fixture();
    let mut idx = AvlIndex::new("sk", kd);
    inject_alloc_failure_after(0);
    let t = row(&fmt, 1);
    let err = idx.replace(None, Some(&t), ReplaceMode::Insert).unwrap_err();
    assert!(matches!(err, crate::error::Error::MemoryIssue));
}
