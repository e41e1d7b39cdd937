//! Foreign-key tuple constraints: `check_insert`/`check_delete`, cache
//! attach/re-resolution, and the data-temporary/local-space attach rules.

use crate::engine::RecoveryState;
use crate::error::{Error, FkFieldError, Result};
use crate::space::cache::{HolderType, SpaceCache, SpaceRef};
use crate::space::Space;
use crate::tuple::{KeyDef, Tuple};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// One configured key-field mapping: either a single direct field, or a
/// list of local field numbers gathered, in the foreign index's key order,
/// into a composite probe key.
pub enum KeyMapping {
    Single { local_field: u32 },
    Complex { local_fields: Vec<u32> },
}

pub struct ForeignKeyConstraint {
    pub name: String,
    pub local_field_path: String,
    pub local_field_id: u32,
    pub mapping: KeyMapping,
    pub foreign_space_id: u32,
    pub foreign_index_id: u32,
    pub foreign_key_def: Arc<KeyDef>,
    pub local_is_data_temporary: bool,
    pub foreign_is_data_temporary: bool,
    holder_id: Option<u64>,
}

impl ForeignKeyConstraint {
    pub fn new(
        name: impl Into<String>,
        local_field_path: impl Into<String>,
        local_field_id: u32,
        mapping: KeyMapping,
        foreign_space_id: u32,
        foreign_index_id: u32,
        foreign_key_def: Arc<KeyDef>,
        local_is_data_temporary: bool,
        foreign_is_data_temporary: bool,
    ) -> Result<ForeignKeyConstraint> {
        if !local_is_data_temporary && foreign_is_data_temporary {
            return Err(Error::InvalidAlter(format!(
                "foreign key {:?}: a non-data-temporary space may not reference a data-temporary one",
                name.into()
            )));
        }
        Ok(ForeignKeyConstraint {
            name: name.into(),
            local_field_path: local_field_path.into(),
            local_field_id,
            mapping,
            foreign_space_id,
            foreign_index_id,
            foreign_key_def,
            local_is_data_temporary,
            foreign_is_data_temporary,
            holder_id: None,
        })
    }

    fn err(&self, is_complex: bool) -> Error {
        let detail = FkFieldError {
            name: self.name.clone(),
            field_path: self.local_field_path.clone(),
            field_id: self.local_field_id,
        };
        if is_complex {
            Error::ComplexForeignKeyFailed(self.name.clone(), detail)
        } else {
            Error::FieldForeignKeyFailed(self.name.clone(), detail)
        }
    }

    fn probe_key(&self, tuple: &Tuple) -> Result<Option<Vec<u8>>> {
        match &self.mapping {
            KeyMapping::Single { local_field } => {
                match tuple.field(*local_field)? {
                    None => Ok(None),
                    Some(raw) => {
                        let mut buf = Vec::new();
                        rmp::encode::write_array_len(&mut buf, 1)
                            .map_err(|e| Error::DecodeError(e.to_string()))?;
                        buf.extend_from_slice(raw);
                        Ok(Some(buf))
                    }
                }
            }
            KeyMapping::Complex { local_fields } => {
                let mut parts = Vec::with_capacity(local_fields.len());
                let mut all_null = true;
                for &f in local_fields {
                    let raw = tuple
                        .field(f)?
                        .ok_or_else(|| Error::InternalError("missing fk field".into()))?;
                    let (scalar, _) = crate::tuple::msgpack::decode_scalar(raw)?;
                    if !scalar.is_nil() {
                        all_null = false;
                    }
                    parts.push(raw);
                }
                if all_null {
                    return Ok(None);
                }
                let mut buf = Vec::new();
                rmp::encode::write_array_len(&mut buf, parts.len() as u32)
                    .map_err(|e| Error::DecodeError(e.to_string()))?;
                for p in parts {
                    buf.extend_from_slice(p);
                }
                Ok(Some(buf))
            }
        }
    }

    /// `check_insert`. During recovery the check is skipped entirely since
    /// the referenced data may not be loaded yet.
    pub fn check_insert(
        &self,
        cache: &SpaceCache,
        tuple: &Tuple,
        recovery: RecoveryState,
    ) -> Result<()> {
        if recovery != RecoveryState::Normal {
            return Ok(());
        }
        let is_complex = matches!(self.mapping, KeyMapping::Complex { .. });
        let key = match self.probe_key(tuple)? {
            None => return Ok(()),
            Some(k) => k,
        };
        let foreign = cache
            .get(self.foreign_space_id)
            .ok_or_else(|| Error::NoSuchSpace(format!("fk target {}", self.foreign_space_id)))?;
        let found = {
            let space = foreign.borrow();
            let idx = space.index(self.foreign_index_id)?;
            idx.find_by_key(&key, self.foreign_key_def.part_count())?
        };
        if found.is_none() {
            return Err(self.err(is_complex));
        }
        Ok(())
    }

    /// `check_delete`. A `replaced_with` tuple matching on the foreign
    /// index's key def short-circuits the local-index probe.
    pub fn check_delete(
        &self,
        cache: &SpaceCache,
        local_space: &SpaceRef,
        local_index_id: u32,
        deleted: &Tuple,
        replaced_with: Option<&Tuple>,
    ) -> Result<()> {
        if let Some(new) = replaced_with {
            if deleted.compare(new, &self.foreign_key_def).map(|o| o.is_eq()).unwrap_or(false) {
                return Ok(());
            }
        }
        let key = match self.probe_key(deleted)? {
            None => return Ok(()),
            Some(k) => k,
        };
        let _ = cache;
        let found = {
            let space = local_space.borrow();
            let idx = space.index(local_index_id)?;
            idx.find_by_key(&key, self.foreign_key_def.part_count())?
        };
        if found.is_some() {
            return Err(Error::ForeignKeyIntegrity(self.name.clone()));
        }
        Ok(())
    }

    /// Pin the foreign space via the cache. `on_replace` re-resolves
    /// `foreign_index_id`/`foreign_key_def` against the altered space: an
    /// index rebuild or rename can renumber indexes without changing the
    /// key shape this constraint actually depends on, so the holder looks
    /// for a same-shape index first at the old slot, then anywhere else on
    /// the space, before giving up and leaving the stale ids in place.
    ///
    /// Takes `this` by shared ownership, not `&mut self`: the re-resolution
    /// callback is held by the cache past the end of this call, so it can
    /// only capture a `Weak` reference, not a plain borrow. `selfpin` marks
    /// a recursive foreign key (local space references itself), which does
    /// not count towards "is the space deletable".
    pub fn attach(
        this: &Rc<RefCell<ForeignKeyConstraint>>,
        cache: &mut SpaceCache,
        selfpin: bool,
    ) -> Result<()> {
        let foreign_space_id = this.borrow().foreign_space_id;
        let foreign = cache
            .get(foreign_space_id)
            .ok_or_else(|| Error::NoSuchSpace(format!("fk target {}", foreign_space_id)))?;

        let weak = Rc::downgrade(this);
        let id = cache.pin(
            &foreign,
            HolderType::ForeignKey,
            selfpin,
            Box::new(move |new_space: &Space| {
                let this = match weak.upgrade() {
                    Some(this) => this,
                    None => return,
                };
                let mut fk = this.borrow_mut();
                if let Ok(still_there) = new_space.index(fk.foreign_index_id) {
                    if still_there.key_def().parts() == fk.foreign_key_def.parts() {
                        return;
                    }
                }
                for (iid, idx) in new_space.indexes().iter().enumerate() {
                    if idx.key_def().parts() == fk.foreign_key_def.parts() {
                        fk.foreign_index_id = iid as u32;
                        fk.foreign_key_def = idx.key_def().clone();
                        return;
                    }
                }
            }),
        );
        this.borrow_mut().holder_id = Some(id);
        Ok(())
    }

    pub fn detach(&mut self, cache: &mut SpaceCache, foreign: &SpaceRef) {
        if let Some(id) = self.holder_id.take() {
            cache.unpin(foreign, id);
        }
    }
}

#[cfg(test)]
#[path = "fkey_test.rs"]
mod fkey_test;
