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
                name: "name".into(),
                field_type: FieldType::String,
                is_nullable: false,
            },
        ],
        vec![0],
    );
    let kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    (fmt, kd)
}

fn row(fmt: &Arc<TupleFormat>, id: u64, name: &str) -> Tuple {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    rmp::encode::write_str(&mut buf, name).unwrap();
    tuple_new(fmt.clone(), buf).unwrap()
}

// Primary-index uniqueness: a second insert under the same key must fail
// without disturbing the first row.
#[test]
fn unique_primary_index_insertion() {
    let (fmt, kd) = fixture();
    let mut idx = TreeIndex::new("primary", kd);
    let a = row(&fmt, 1, "a");
    let b = row(&fmt, 1, "b");

    assert_eq!(idx.replace(None, Some(&a), ReplaceMode::Insert).unwrap(), None);
    let err = idx.replace(None, Some(&b), ReplaceMode::Insert).unwrap_err();
    assert!(err.is_duplicate_key());

    assert_eq!(idx.size(), 1);
    let key = a.extract_key(&idx.key_def).unwrap();
    let found = idx.find_by_key(&key, 1).unwrap().unwrap();
    assert_eq!(found.raw(), a.raw());
}

#[test]
fn replace_mode_rejects_missing_key() {
    let (fmt, kd) = fixture();
    let mut idx = TreeIndex::new("primary", kd);
    let a = row(&fmt, 1, "a");
    let err = idx.replace(None, Some(&a), ReplaceMode::Replace).unwrap_err();
    assert!(matches!(err, crate::error::Error::NotFound));
}

#[test]
fn pages_are_reclaimed_when_index_is_dropped() {
    let before = outstanding_pages();
    {
        let (fmt, kd) = fixture();
        let mut idx = TreeIndex::new("primary", kd);
        for i in 0..500u64 {
            let t = row(&fmt, i, "x");
            idx.replace(None, Some(&t), ReplaceMode::Insert).unwrap();
        }
        assert!(outstanding_pages() > before);
    }
    assert_eq!(outstanding_pages(), before);
}

// A tighter `page_capacity` must split sooner, exercising the capacity
// threaded in through `with_capacity` rather than the crate-wide default.
#[test]
fn with_capacity_splits_pages_sooner_than_the_default() {
    let (fmt, kd) = fixture();
    let mut default_idx = TreeIndex::new("primary", kd.clone());
    let before = outstanding_pages();
    for i in 0..8u64 {
        default_idx.replace(None, Some(&row(&fmt, i, "x")), ReplaceMode::Insert).unwrap();
    }
    let default_pages = outstanding_pages() - before;
    assert_eq!(default_pages, 0, "8 rows must fit in one page at the default capacity");

    let mut tight_idx = TreeIndex::with_capacity("primary", kd, 4);
    let before = outstanding_pages();
    for i in 0..8u64 {
        tight_idx.replace(None, Some(&row(&fmt, i, "x")), ReplaceMode::Insert).unwrap();
    }
    assert!(outstanding_pages() - before > 0, "8 rows over a capacity-4 page must split");
}

#[test]
fn random_inserts_stay_sorted_and_reversible() {
    use rand::prelude::random;

    let (fmt, kd) = fixture();
    let mut idx = TreeIndex::new("primary", kd);
    let mut ids: Vec<u64> = (0..200).map(|_| random::<u64>() % 1000).collect();
    ids.sort_unstable();
    ids.dedup();
    for &id in &ids {
        let t = row(&fmt, id, "x");
        idx.replace(None, Some(&t), ReplaceMode::InsertOrReplace).unwrap();
    }

    let mut forward = idx.iterator(IterType::All, None, 0).unwrap();
    let mut seen = vec![];
    while let Some(t) = forward.next().unwrap() {
        seen.push(t.extract_key(&idx.key_def).unwrap());
    }
    assert_eq!(seen.len(), ids.len());
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "tree iteration must come back in key order");
}

#[test]
fn iteration_is_sorted_ascending_and_descending() {
    let (fmt, kd) = fixture();
    let mut idx = TreeIndex::new("primary", kd);
    for i in [3u64, 1, 2] {
        let t = row(&fmt, i, "x");
        idx.replace(None, Some(&t), ReplaceMode::InsertOrReplace).unwrap();
    }
    let mut it = idx.iterator(IterType::All, None, 0).unwrap();
    let mut seen = vec![];
    while let Some(t) = it.next().unwrap() {
        seen.push(t.field(0).unwrap().unwrap().to_vec());
    }
    assert_eq!(seen.len(), 3);
}
