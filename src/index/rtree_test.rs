use super::*;
use crate::tuple::{tuple_new, FieldDef, FieldType, KeyPart, TupleFormat};

fn fixture() -> (Arc<TupleFormat>, Arc<KeyDef>) {
    let fmt = TupleFormat::new(
        vec![
            FieldDef {
                name: "id".into(),
                field_type: FieldType::Unsigned,
                is_nullable: false,
            },
            FieldDef {
                name: "bbox".into(),
                field_type: FieldType::Array,
                is_nullable: false,
            },
        ],
        vec![1],
    );
    let kd = Arc::new(KeyDef::new(vec![KeyPart::new(1, FieldType::Array)], false).unwrap());
    (fmt, kd)
}

fn row_rect(fmt: &Arc<TupleFormat>, id: u64, rect: [f64; 4]) -> Tuple {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    rmp::encode::write_array_len(&mut buf, 4).unwrap();
    for v in rect {
        rmp::encode::write_f64(&mut buf, v).unwrap();
    }
    tuple_new(fmt.clone(), buf).unwrap()
}

fn probe_rect(rect: [f64; 4]) -> Vec<u8> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 4).unwrap();
    for v in rect {
        rmp::encode::write_f64(&mut buf, v).unwrap();
    }
    buf
}

#[test]
fn overlapping_query_finds_intersecting_rectangles() {
    let (fmt, kd) = fixture();
    let mut idx = RTreeIndex::new("geo", kd);
    let a = row_rect(&fmt, 1, [0.0, 0.0, 2.0, 2.0]);
    let b = row_rect(&fmt, 2, [10.0, 10.0, 12.0, 12.0]);
    idx.replace(None, Some(&a), ReplaceMode::Insert).unwrap();
    idx.replace(None, Some(&b), ReplaceMode::Insert).unwrap();
    assert_eq!(idx.size(), 2);

    let probe = probe_rect([1.0, 1.0, 3.0, 3.0]);
    let mut it = idx
        .iterator(IterType::Overlaps, Some(&probe), 1)
        .unwrap();
    let mut found = Vec::new();
    while let Some(t) = it.next().unwrap() {
        found.push(t);
    }
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].field(0).unwrap().unwrap(), a.field(0).unwrap().unwrap());
}

#[test]
fn deleting_a_rectangle_drops_it_from_the_index() {
    let (fmt, kd) = fixture();
    let mut idx = RTreeIndex::new("geo", kd);
    let a = row_rect(&fmt, 1, [0.0, 0.0, 1.0, 1.0]);
    idx.replace(None, Some(&a), ReplaceMode::Insert).unwrap();
    assert_eq!(idx.size(), 1);
    idx.replace(Some(&a), None, ReplaceMode::InsertOrReplace).unwrap();
    assert_eq!(idx.size(), 0);
    assert!(idx.min().is_none());
}

#[test]
fn splitting_a_node_past_capacity_preserves_every_member() {
    let (fmt, kd) = fixture();
    let mut idx = RTreeIndex::new("geo", kd);
    for i in 0..(NODE_CAPACITY as u64 * 3) {
        let x = i as f64;
        let t = row_rect(&fmt, i, [x, x, x + 0.5, x + 0.5]);
        idx.replace(None, Some(&t), ReplaceMode::Insert).unwrap();
    }
    assert_eq!(idx.size(), NODE_CAPACITY as u64 * 3);
    let mut it = idx.iterator(IterType::All, None, 0).unwrap();
    let mut count = 0;
    while it.next().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, NODE_CAPACITY as u64 * 3);
}

// A tight `node_capacity` forces several splits over the same insert
// count that fits in a single default-capacity node; the split bookkeeping
// must not lose or duplicate a member along the way.
#[test]
fn with_capacity_still_finds_every_member_after_forced_splits() {
    let (fmt, kd) = fixture();
    let mut idx = RTreeIndex::with_capacity("geo", kd, 2);
    for i in 0..20u64 {
        let x = i as f64;
        let t = row_rect(&fmt, i, [x, x, x + 0.5, x + 0.5]);
        idx.replace(None, Some(&t), ReplaceMode::Insert).unwrap();
    }
    assert_eq!(idx.size(), 20);
    let mut it = idx.iterator(IterType::All, None, 0).unwrap();
    let mut count = 0;
    while it.next().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 20);
}

#[test]
fn rejects_key_based_replace() {
    let (fmt, kd) = fixture();
    let mut idx = RTreeIndex::new("geo", kd);
    let a = row_rect(&fmt, 1, [0.0, 0.0, 1.0, 1.0]);
    let err = idx
        .replace(None, Some(&a), ReplaceMode::Replace)
        .unwrap_err();
    assert!(matches!(err, crate::error::Error::Unsupported(_)));
}

#[test]
fn contains_and_belongs_are_mirror_predicates() {
    let outer = Rect { min: [0.0, 0.0], max: [10.0, 10.0] };
    let inner = Rect { min: [1.0, 1.0], max: [2.0, 2.0] };
    assert!(contains(&outer, &inner, false));
    assert!(contains(&outer, &inner, true));
    assert!(belongs(&inner, &outer, false));
    assert!(!contains(&inner, &outer, false));
}
