//! The index vtable: a dynamic-polymorphism seam over every index backend
//! (tree, AVL, R-tree, blackhole). No inheritance — shared algorithms live
//! in free functions parameterised by [`IndexVtab`] rather than a base
//! class.

pub mod avl;
pub mod blackhole;
pub mod rtree;
pub mod tree;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tuple::{KeyDef, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    Insert,
    Replace,
    InsertOrReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterType {
    All,
    Eq,
    Req,
    Gt,
    Ge,
    Lt,
    Le,
    Overlaps,
    Neighbor,
    /// R-tree only: entries whose rectangle contains the probe rectangle.
    Contains,
    /// R-tree only: `Contains`, excluding an exact match.
    StrictContains,
    /// R-tree only: entries whose rectangle lies within the probe rectangle.
    Belongs,
    /// R-tree only: `Belongs`, excluding an exact match.
    StrictBelongs,
}

/// An open cursor over an index. Implementations pin whatever tuples they
/// are currently positioned on by cloning the `Arc` inside [`Tuple`]; there
/// is no separate pin bookkeeping needed at this layer.
pub trait IndexIter {
    fn next(&mut self) -> Result<Option<Tuple>>;
}

pub struct EmptyIter;
impl IndexIter for EmptyIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        Ok(None)
    }
}

/// A materialised, already-ordered/filtered result set. Every ordered
/// backend (tree, AVL) builds its iterators this way rather than holding a
/// live cursor into mutable structure, matching spec's documented
/// "modifying the index while an iterator is alive invalidates its
/// position" contract: here it simply can't observe later mutations at all.
pub(crate) struct VecIter {
    items: Vec<Tuple>,
    pos: usize,
}

impl VecIter {
    pub(crate) fn new(items: Vec<Tuple>) -> VecIter {
        VecIter { items, pos: 0 }
    }
}

impl IndexIter for VecIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.pos < self.items.len() {
            let t = self.items[self.pos].clone();
            self.pos += 1;
            Ok(Some(t))
        } else {
            Ok(None)
        }
    }
}

/// The operations every index backend must provide. Mutating operations
/// return the tuple that was displaced (if any): `INSERT` fails on an
/// existing key unless it is `old`; `REPLACE` fails if no matching key
/// exists; `InsertOrReplace` is unconditional.
pub trait IndexVtab {
    fn name(&self) -> &str;
    fn key_def(&self) -> &Arc<KeyDef>;
    fn is_unique(&self) -> bool {
        self.key_def().is_unique()
    }

    fn size(&self) -> u64;
    fn min(&self) -> Option<Tuple>;
    fn max(&self) -> Option<Tuple>;
    fn random(&self, seed: u32) -> Option<Tuple>;

    /// Only valid on unique indexes with `part_count == key_def.part_count()`.
    fn find_by_key(&self, key: &[u8], part_count: usize) -> Result<Option<Tuple>>;

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: ReplaceMode,
    ) -> Result<Option<Tuple>>;

    fn iterator(
        &self,
        itype: IterType,
        key: Option<&[u8]>,
        part_count: usize,
    ) -> Result<Box<dyn IndexIter + '_>>;

    /// Populate this index by scanning the primary key index. Used during
    /// bulk recovery and by the "snapshot recovery" regime of `AddIndex::alter`.
    fn build(&mut self, pk: &dyn IndexVtab) -> Result<()> {
        let mut it = pk.iterator(IterType::All, None, 0)?;
        while let Some(t) = it.next()? {
            self.replace(None, Some(&t), ReplaceMode::InsertOrReplace)?;
        }
        Ok(())
    }

    fn begin_build(&mut self) -> Result<()> {
        Ok(())
    }
    fn build_next(&mut self, t: Tuple) -> Result<()> {
        self.replace(None, Some(&t), ReplaceMode::InsertOrReplace)?;
        Ok(())
    }
    fn end_build(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared duplicate-key arbitration, reused by every ordered (tree/AVL)
/// backend: decide whether `existing` (the tuple currently at `new`'s key,
/// if any) permits the requested `mode`.
pub(crate) fn check_replace_mode(
    index_name: &str,
    existing: Option<&Tuple>,
    old: Option<&Tuple>,
    new: &Tuple,
    mode: ReplaceMode,
) -> Result<()> {
    match mode {
        ReplaceMode::Insert => {
            if let Some(existing) = existing {
                let is_old = old.map(|o| o == existing).unwrap_or(false);
                if !is_old {
                    return Err(Error::DuplicateKey {
                        index_name: index_name.to_string(),
                        dup_raw: existing.raw().to_vec(),
                        new_raw: new.raw().to_vec(),
                    });
                }
            }
        }
        ReplaceMode::Replace => {
            if existing.is_none() {
                return Err(Error::NotFound);
            }
        }
        ReplaceMode::InsertOrReplace => {}
    }
    Ok(())
}
