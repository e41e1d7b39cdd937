//! Spaces: a named container of indexes (primary first) sharing one tuple
//! format, plus the `space_replace` algorithm that keeps every index of a
//! space consistent as a single atomic unit.
//!
//! `Space` owns its indexes outright, by value, behind a `Box` per index
//! since each backend is a distinct concrete type reached only through
//! [`crate::index::IndexVtab`].

pub mod alter;
pub mod cache;

use crate::error::{Error, Result};
use crate::index::{IndexVtab, ReplaceMode};
use crate::tuple::{KeyDef, Tuple, TupleFormat};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SpaceDef {
    pub id: u32,
    pub name: String,
    pub field_count: u32,
    pub is_temporary: bool,
    pub is_local: bool,
}

pub type ReplaceTrigger = Box<dyn Fn(Option<&Tuple>, Option<&Tuple>) -> Result<()>>;

/// A named container of indexes. `indexes[0]` is always primary and unique,
/// enforced by [`Space::new`].
pub struct Space {
    pub def: SpaceDef,
    pub format: Arc<TupleFormat>,
    indexes: Vec<Box<dyn IndexVtab>>,
    replace_triggers: Vec<ReplaceTrigger>,
    holders: Vec<cache::Holder>,
}

impl Space {
    pub fn new(
        def: SpaceDef,
        format: Arc<TupleFormat>,
        indexes: Vec<Box<dyn IndexVtab>>,
    ) -> Result<Space> {
        match indexes.first() {
            Some(pk) if pk.is_unique() => {}
            Some(_) => {
                return Err(Error::InvalidAlter(
                    "primary index (iid 0) must be unique".into(),
                ))
            }
            None => {
                return Err(Error::InvalidAlter(
                    "space must have at least a primary index".into(),
                ))
            }
        }
        Ok(Space {
            def,
            format,
            indexes,
            replace_triggers: Vec::new(),
            holders: Vec::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.def.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn index(&self, iid: u32) -> Result<&dyn IndexVtab> {
        self.indexes
            .get(iid as usize)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::NoSuchIndex(iid, self.def.name.clone()))
    }

    pub fn index_mut(&mut self, iid: u32) -> Result<&mut (dyn IndexVtab + 'static)> {
        self.indexes
            .get_mut(iid as usize)
            .map(|b| b.as_mut())
            .ok_or_else(|| Error::NoSuchIndex(iid, self.def.name.clone()))
    }

    pub fn indexes(&self) -> &[Box<dyn IndexVtab>] {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut Vec<Box<dyn IndexVtab>> {
        &mut self.indexes
    }

    pub fn primary_key_def(&self) -> &Arc<KeyDef> {
        self.indexes[0].key_def()
    }

    pub fn on_replace(&mut self, trigger: ReplaceTrigger) {
        self.replace_triggers.push(trigger);
    }

    pub fn clear_replace_triggers(&mut self) {
        self.replace_triggers.clear();
    }

    pub fn replace_trigger_count(&self) -> usize {
        self.replace_triggers.len()
    }

    /// Drop every trigger installed after `len` — lets a caller that
    /// temporarily hooks `on_replace` (an online index build, say) remove
    /// just its own trigger afterward without disturbing anyone else's.
    pub fn truncate_replace_triggers(&mut self, len: usize) {
        self.replace_triggers.truncate(len);
    }

    pub fn holders(&self) -> &[cache::Holder] {
        &self.holders
    }

    pub fn holders_mut(&mut self) -> &mut Vec<cache::Holder> {
        &mut self.holders
    }

    pub fn is_pinned(&self, htype: cache::HolderType) -> bool {
        self.holders
            .iter()
            .any(|h| h.htype == htype && !h.selfpin)
    }

    /// Atomic-across-indexes replace. See the module doc for the
    /// compensation algorithm on secondary-index failure.
    pub fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: ReplaceMode,
    ) -> Result<Option<Tuple>> {
        if let Some(t) = new {
            self.format.validate_raw(t.raw())?;
        }

        let canonical_old = self.indexes[0].replace(old, new, mode)?;
        let effective_old = canonical_old.as_ref().or(old);

        for i in 1..self.indexes.len() {
            let res = self.indexes[i].replace(effective_old, new, ReplaceMode::InsertOrReplace);
            if let Err(err) = res {
                for k in (0..i).rev() {
                    self.indexes[k]
                        .replace(new, effective_old, ReplaceMode::InsertOrReplace)
                        .expect("compensating replace must be infallible by construction");
                }
                return Err(err);
            }
        }

        for trigger in &self.replace_triggers {
            trigger(effective_old, new)?;
        }

        Ok(canonical_old)
    }

    pub fn foreach(&self, mut visitor: impl FnMut(&Tuple) -> Result<()>) -> Result<()> {
        let mut it = self.indexes[0].iterator(crate::index::IterType::All, None, 0)?;
        while let Some(t) = it.next()? {
            visitor(&t)?;
        }
        Ok(())
    }
}

/// Walk every space in a cache, system spaces first in ascending id order,
/// as recovery requires.
pub fn space_foreach(
    cache: &cache::SpaceCache,
    mut visitor: impl FnMut(&Space) -> Result<()>,
) -> Result<()> {
    let mut ids: Vec<u32> = cache.ids().collect();
    ids.sort_unstable_by_key(|&id| (id >= cache::SYSTEM_SPACE_ID_THRESHOLD, id));
    for id in ids {
        if let Some(space) = cache.get(id) {
            let borrowed = space.borrow();
            visitor(&borrowed)?;
        }
    }
    Ok(())
}
