//! The space cache: process-wide `id → Space` and `name → Space` maps, a
//! monotonic `cache_version`, and the pin/unpin machinery that lets a
//! constraint (today: foreign keys) hold a weak reference to a space that
//! survives `cache_replace`.
//!
//! Spaces are kept behind `Rc<RefCell<Space>>` rather than owned outright:
//! cooperative single-threaded scheduling (see the engine's recovery-state
//! doc comment) means interior mutability without `Sync` is the idiomatic
//! fit here — no locking needed when nothing ever crosses a thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::space::Space;

/// System spaces (schema/index/sequence metadata) are conventionally given
/// ids below this threshold and must be visited first during recovery.
pub const SYSTEM_SPACE_ID_THRESHOLD: u32 = 512;

pub type SpaceRef = Rc<RefCell<Space>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderType {
    ForeignKey,
}

pub struct Holder {
    pub id: u64,
    pub htype: HolderType,
    pub selfpin: bool,
    pub on_replace: Box<dyn FnMut(&Space)>,
}

impl std::fmt::Debug for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Holder")
            .field("id", &self.id)
            .field("htype", &self.htype)
            .field("selfpin", &self.selfpin)
            .finish()
    }
}

#[derive(Default)]
pub struct SpaceCache {
    by_id: HashMap<u32, SpaceRef>,
    by_name: HashMap<String, u32>,
    cache_version: u64,
    next_holder_id: u64,
}

impl SpaceCache {
    pub fn new() -> SpaceCache {
        SpaceCache::default()
    }

    pub fn cache_version(&self) -> u64 {
        self.cache_version
    }

    pub fn get(&self, id: u32) -> Option<SpaceRef> {
        self.by_id.get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<SpaceRef> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_id.keys().copied()
    }

    fn insert_maps(&mut self, space: &SpaceRef) {
        let (id, name) = {
            let s = space.borrow();
            (s.id(), s.name().to_string())
        };
        self.by_id.insert(id, space.clone());
        self.by_name.insert(name, id);
    }

    /// `cache_replace(old, new)`, the three cases from the module doc:
    /// insert (`old = None`), delete (`new = None`), or replace (both set,
    /// same id).
    pub fn cache_replace(&mut self, old: Option<SpaceRef>, new: Option<SpaceRef>) -> Result<()> {
        match (old, new) {
            (None, Some(new)) => {
                let (id, name) = {
                    let s = new.borrow();
                    (s.id(), s.name().to_string())
                };
                self.insert_maps(&new);
                self.cache_version += 1;
                debug!(
                    target: "space_cache",
                    "insert space {:?} (id {}), cache_version -> {}",
                    name, id, self.cache_version
                );
                Ok(())
            }
            (Some(old), None) => {
                let (id, name, pinned) = {
                    let s = old.borrow();
                    (
                        s.id(),
                        s.name().to_string(),
                        s.is_pinned(HolderType::ForeignKey),
                    )
                };
                if pinned {
                    return Err(Error::InternalError(format!(
                        "cannot delete space {:?}: still pinned by a non-self holder",
                        name
                    )));
                }
                self.by_id.remove(&id);
                self.by_name.remove(&name);
                self.cache_version += 1;
                debug!(
                    target: "space_cache",
                    "delete space {:?} (id {}), cache_version -> {}",
                    name, id, self.cache_version
                );
                Ok(())
            }
            (Some(old), Some(new)) => {
                let (old_id, old_name) = {
                    let s = old.borrow();
                    (s.id(), s.name().to_string())
                };
                let new_id = new.borrow().id();
                if old_id != new_id {
                    return Err(Error::InternalError(
                        "cache_replace requires matching space ids".into(),
                    ));
                }
                let new_name = new.borrow().name().to_string();
                if old_name != new_name {
                    self.by_name.remove(&old_name);
                }
                {
                    let mut holders = std::mem::take(old.borrow_mut().holders_mut());
                    trace!(
                        target: "space_cache",
                        "notifying {} holder(s) of space {} replace",
                        holders.len(), old_id
                    );
                    for holder in holders.iter_mut() {
                        (holder.on_replace)(&new.borrow());
                    }
                    *new.borrow_mut().holders_mut() = holders;
                }
                self.by_id.insert(new_id, new.clone());
                self.by_name.insert(new_name, new_id);
                self.cache_version += 1;
                debug!(
                    target: "space_cache",
                    "replace space {:?} (id {}), cache_version -> {}",
                    new_name, new_id, self.cache_version
                );
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    /// Pin `space` on behalf of `holder_on_replace`, returning the holder id
    /// needed to `unpin` later.
    pub fn pin(
        &mut self,
        space: &SpaceRef,
        htype: HolderType,
        selfpin: bool,
        on_replace: Box<dyn FnMut(&Space)>,
    ) -> u64 {
        self.next_holder_id += 1;
        let id = self.next_holder_id;
        space.borrow_mut().holders_mut().push(Holder {
            id,
            htype,
            selfpin,
            on_replace,
        });
        id
    }

    pub fn unpin(&mut self, space: &SpaceRef, holder_id: u64) {
        space.borrow_mut().holders_mut().retain(|h| h.id != holder_id);
    }
}

/// A `(space_id, index_id, last_version, cached_ptr)` tuple, validated
/// lazily against the owning cache's `cache_version`.
pub struct WeakIndexRef {
    space_id: u32,
    index_id: u32,
    last_version: RefCell<u64>,
    cached: RefCell<Weak<RefCell<Space>>>,
    /// `space_id == 0` marks an ephemeral scratch space, pinned by direct
    /// ownership rather than the cache; validation is then a no-op.
    ephemeral: bool,
}

impl WeakIndexRef {
    pub fn new(cache: &SpaceCache, space_id: u32, index_id: u32) -> WeakIndexRef {
        let ephemeral = space_id == 0;
        let cached = if ephemeral {
            Weak::new()
        } else {
            cache
                .get(space_id)
                .map(|s| Rc::downgrade(&s))
                .unwrap_or_default()
        };
        WeakIndexRef {
            space_id,
            index_id,
            last_version: RefCell::new(cache.cache_version()),
            cached: RefCell::new(cached),
            ephemeral,
        }
    }

    /// Returns `true` iff the index is still live under the same
    /// `(space_id, index_id)` and has not been altered out from under us.
    pub fn check(&self, cache: &SpaceCache) -> bool {
        if self.ephemeral {
            return true;
        }
        if *self.last_version.borrow() == cache.cache_version() {
            return self.cached.borrow().upgrade().is_some();
        }
        match cache.get(self.space_id) {
            Some(space) => {
                let has_index = space.borrow().index(self.index_id).is_ok();
                *self.cached.borrow_mut() = Rc::downgrade(&space);
                *self.last_version.borrow_mut() = cache.cache_version();
                has_index
            }
            None => {
                *self.cached.borrow_mut() = Weak::new();
                *self.last_version.borrow_mut() = cache.cache_version();
                false
            }
        }
    }

    pub fn space(&self) -> Option<SpaceRef> {
        self.cached.borrow().upgrade()
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
