//! The alter-space orchestrator: turns a list of [`AlterOp`]s into either a
//! fully-applied schema change (after WAL commit) or no visible trace at all
//! (on WAL rollback), building the new index structures *before* the WAL
//! record is written.
//!
//! Ops are boxed trait objects (`Box<dyn AlterOp>`), one per schema-change
//! step, so a plan can mix drops, adds, and renames without a combinatorial
//! enum of alter kinds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineContext, RecoveryState};
use crate::error::{Error, Result};
use crate::index::{IndexVtab, ReplaceMode};
use crate::index_build::IndexBuildCtx;
use crate::space::cache::SpaceRef;
use crate::space::{Space, SpaceDef};
use crate::tuple::KeyDef;
use std::sync::Arc;

/// One step of a schema change. Every hook defaults to a no-op so an op
/// that only needs, say, `alter` doesn't have to restate the rest.
pub trait AlterOp {
    fn prepare(&mut self, _old: &Space, _dropped: &[u32]) -> Result<()> {
        Ok(())
    }
    /// `Some(iid)` marks this op as dropping `iid`, so a sibling `AddIndex`
    /// targeting the same slot isn't rejected as "already exists".
    fn dropped_iid(&self) -> Option<u32> {
        None
    }
    fn alter_def(&mut self, _def: &mut SpaceDef, _key_defs: &mut Vec<Arc<KeyDef>>) -> Result<()> {
        Ok(())
    }
    fn alter(&mut self, _old: &mut Space, _new: &mut Space, _engine: &EngineContext) -> Result<()> {
        Ok(())
    }
    fn commit(&mut self, _old: &mut Space, _new: &mut Space) -> Result<()> {
        Ok(())
    }
    fn rollback(&mut self, _old: &mut Space, _new: &mut Space) -> Result<()> {
        Ok(())
    }
}

/// Drop the index at `iid`.
pub struct DropIndex {
    pub iid: u32,
}

impl AlterOp for DropIndex {
    fn prepare(&mut self, old: &Space, _dropped: &[u32]) -> Result<()> {
        if self.iid == 0 {
            return Err(Error::InvalidAlter("cannot drop the primary index directly".into()));
        }
        old.index(self.iid)?;
        Ok(())
    }

    fn dropped_iid(&self) -> Option<u32> {
        Some(self.iid)
    }
}

/// Add a new index at `iid` with `key_def`, built by one of the three
/// regimes `alter` dispatches on.
pub struct AddIndex {
    pub iid: u32,
    pub key_def: Arc<KeyDef>,
    pub make: Box<dyn Fn(Arc<KeyDef>, &EngineConfig) -> Box<dyn IndexVtab>>,
    built: Option<Box<dyn IndexVtab>>,
}

impl AddIndex {
    pub fn new(
        iid: u32,
        key_def: Arc<KeyDef>,
        make: Box<dyn Fn(Arc<KeyDef>, &EngineConfig) -> Box<dyn IndexVtab>>,
    ) -> AddIndex {
        AddIndex {
            iid,
            key_def,
            make,
            built: None,
        }
    }

    /// Build `idx` live against `old`'s primary key: an `on_replace` trigger
    /// installed on `old` for the scan's duration mirrors any write landing
    /// on the space being read into `idx` through the same
    /// `on_replace`/`before_commit`/`on_commit` sequence a real writer
    /// statement would drive, rather than copying a frozen snapshot. Each
    /// individual `Space::replace` call observed during the scan is treated
    /// as its own one-statement transaction, since nothing else runs
    /// between them in this engine's synchronous alter path.
    fn build_online(
        idx: Box<dyn IndexVtab>,
        old: &mut Space,
        cfg: &EngineConfig,
    ) -> Result<Box<dyn IndexVtab>> {
        let cmp_def = old.primary_key_def().clone();
        let new_format = old.format.clone();
        let check_unique = idx.is_unique();
        let ctx = Rc::new(RefCell::new(IndexBuildCtx::new(
            idx,
            new_format,
            cmp_def,
            check_unique,
            cfg.yield_every,
        )));

        let trigger_ctx = ctx.clone();
        let next_txn = Rc::new(Cell::new(0u64));
        let pre_len = old.replace_trigger_count();
        old.on_replace(Box::new(move |o, n| {
            let txn = next_txn.get() + 1;
            next_txn.set(txn);
            let mut ctx = trigger_ctx.borrow_mut();
            ctx.on_replace(txn, o, n)?;
            ctx.before_commit(txn)?;
            ctx.on_commit(txn);
            Ok(())
        }));

        let scan_result = {
            let pk = old.index(0)?;
            ctx.borrow_mut().scan(pk, || Ok(true))
        };
        old.truncate_replace_triggers(pre_len);
        scan_result?;
        ctx.borrow_mut().finalize()?;

        let ctx = Rc::try_unwrap(ctx)
            .unwrap_or_else(|_| unreachable!("trigger removed before the index is reclaimed"))
            .into_inner();
        Ok(ctx.into_index())
    }
}

impl AlterOp for AddIndex {
    fn prepare(&mut self, old: &Space, dropped: &[u32]) -> Result<()> {
        if (self.iid as usize) < old.indexes().len() && !dropped.contains(&self.iid) {
            return Err(Error::InvalidAlter(format!(
                "index {} already exists, use ModifyIndex",
                self.iid
            )));
        }
        Ok(())
    }

    fn alter(&mut self, old: &mut Space, new: &mut Space, engine: &EngineContext) -> Result<()> {
        let mut idx = (self.make)(self.key_def.clone(), engine.config());
        let is_primary = self.iid == 0;

        // A Drop(iid)+Add(iid) pair lands here too. When the key parts and
        // uniqueness haven't actually changed (a pure rename, or the same
        // index rebuilt under a different vtable), build from the old index
        // at that slot instead of rescanning the whole primary key.
        if let Ok(existing) = old.index(self.iid) {
            if existing.key_def().parts() == self.key_def.parts()
                && existing.key_def().is_unique() == self.key_def.is_unique()
            {
                idx.build(existing)?;
                self.built = Some(idx);
                let _ = new;
                return Ok(());
            }
        }

        match engine.recovery_state() {
            RecoveryState::InitialRecovery => {
                if !is_primary {
                    self.built = Some(idx);
                    return Ok(());
                }
            }
            RecoveryState::FinalRecovery => {
                if is_primary {
                    idx.build(old.index(0)?)?;
                }
            }
            RecoveryState::Normal => {
                if is_primary {
                    idx.build(old.index(0)?)?;
                } else {
                    idx = Self::build_online(idx, old, engine.config())?;
                }
            }
        }
        self.built = Some(idx);
        let _ = new;
        Ok(())
    }

    fn commit(&mut self, _old: &mut Space, new: &mut Space) -> Result<()> {
        let idx = self
            .built
            .take()
            .ok_or_else(|| Error::InternalError("AddIndex committed before alter ran".into()))?;
        let indexes = new.indexes_mut();
        while indexes.len() <= self.iid as usize {
            let placeholder_kd = self.key_def.clone();
            indexes.push(Box::new(crate::index::blackhole::BlackholeIndex::new(
                "placeholder",
                placeholder_kd,
            )));
        }
        indexes[self.iid as usize] = idx;
        Ok(())
    }

    fn rollback(&mut self, _old: &mut Space, _new: &mut Space) -> Result<()> {
        // Dropping `self.built` frees the half-constructed index and every
        // tuple refcount it held.
        self.built = None;
        Ok(())
    }
}

/// Modify an existing index's definition in place (used for the
/// `Drop(iid)+Add(iid)` collapse `prepare` performs when the two ops only
/// differ in a non-data-affecting way).
pub struct ModifyIndex {
    pub iid: u32,
    pub key_def: Arc<KeyDef>,
}

impl AlterOp for ModifyIndex {
    fn prepare(&mut self, old: &Space, _dropped: &[u32]) -> Result<()> {
        old.index(self.iid)?;
        Ok(())
    }
}

pub struct ModifySpace {
    pub new_name: Option<String>,
}

impl AlterOp for ModifySpace {
    fn alter_def(&mut self, def: &mut SpaceDef, _key_defs: &mut Vec<Arc<KeyDef>>) -> Result<()> {
        if let Some(name) = &self.new_name {
            def.name = name.clone();
        }
        Ok(())
    }
}

/// An ordered list of `AlterOp`s over a cloned `space_def`, driving the
/// five-step state machine documented on the module.
pub struct AlterPlan {
    ops: Vec<Box<dyn AlterOp>>,
    old: SpaceRef,
    new_def: SpaceDef,
    new: Option<SpaceRef>,
}

impl AlterPlan {
    pub fn new(old: SpaceRef, ops: Vec<Box<dyn AlterOp>>) -> AlterPlan {
        let new_def = old.borrow().def.clone();
        AlterPlan {
            ops,
            old,
            new_def,
            new: None,
        }
    }

    /// Prepare + AlterDef + CreateNew + Alter. On any error the
    /// partially-built new space and plan are dropped, no WAL record is
    /// written, matching the "errors before WAL submission" policy.
    pub fn build(&mut self, engine: &EngineContext) -> Result<()> {
        {
            let old = self.old.borrow();
            let dropped: Vec<u32> = self.ops.iter().filter_map(|op| op.dropped_iid()).collect();
            for op in self.ops.iter_mut() {
                op.prepare(&old, &dropped)?;
            }
        }

        let mut key_defs: Vec<Arc<KeyDef>> = self
            .old
            .borrow()
            .indexes()
            .iter()
            .map(|i| i.key_def().clone())
            .collect();
        for op in self.ops.iter_mut() {
            op.alter_def(&mut self.new_def, &mut key_defs)?;
        }

        let old_format = self.old.borrow().format.clone();
        let pk_kd = key_defs
            .get(0)
            .cloned()
            .ok_or_else(|| Error::InvalidAlter("space must retain a primary key".into()))?;
        let placeholder = Box::new(crate::index::blackhole::BlackholeIndex::new(
            "placeholder-pk",
            pk_kd,
        ));
        let new_space = Space::new(self.new_def.clone(), old_format, vec![placeholder])?;
        let new_ref: SpaceRef = Rc::new(RefCell::new(new_space));

        {
            let mut old = self.old.borrow_mut();
            let mut new = new_ref.borrow_mut();
            for op in self.ops.iter_mut() {
                op.alter(&mut old, &mut new, engine)?;
            }
        }

        self.new = Some(new_ref);
        Ok(())
    }

    /// Runs after the WAL record for the alter is durable: swap unchanged
    /// indexes across by key-def equality, run each op's `commit`, then
    /// splice the new space into the cache.
    pub fn commit(&mut self, engine: &mut EngineContext) -> Result<()> {
        let new_ref = self
            .new
            .take()
            .ok_or_else(|| Error::InternalError("commit called before build".into()))?;

        {
            let mut old = self.old.borrow_mut();
            let mut new = new_ref.borrow_mut();
            let old_key_defs: Vec<Arc<KeyDef>> =
                old.indexes().iter().map(|i| i.key_def().clone()).collect();
            for (iid, old_kd) in old_key_defs.iter().enumerate() {
                let unchanged = new
                    .indexes()
                    .get(iid)
                    .map(|i| i.key_def() == old_kd)
                    .unwrap_or(false);
                if unchanged {
                    let placeholder: Box<dyn IndexVtab> =
                        Box::new(crate::index::blackhole::BlackholeIndex::new(
                            "retired",
                            old_kd.clone(),
                        ));
                    let moved = std::mem::replace(&mut old.indexes_mut()[iid], placeholder);
                    new.indexes_mut()[iid] = moved;
                }
            }
            for op in self.ops.iter_mut() {
                op.commit(&mut old, &mut new)?;
            }
            new.clear_replace_triggers();
        }

        let space_id = self.old.borrow().id();
        engine.cache_mut().cache_replace(Some(self.old.clone()), Some(new_ref))?;
        debug!(target: "alter", "space {} alter committed, {} op(s) applied", space_id, self.ops.len());
        Ok(())
    }

    /// Runs each op's `rollback` and discards the new space entirely.
    pub fn rollback(&mut self) -> Result<()> {
        let space_id = self.old.borrow().id();
        if let Some(new_ref) = self.new.take() {
            let mut old = self.old.borrow_mut();
            let mut new = new_ref.borrow_mut();
            for op in self.ops.iter_mut() {
                op.rollback(&mut old, &mut new)?;
            }
        }
        warn!(target: "alter", "space {} alter rolled back, new space discarded", space_id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "alter_test.rs"]
mod alter_test;
