//! `BlackholeIndex`: accepts `INSERT` and discards it, holding nothing.
//!
//! Grounded on the same "accept, never retain" idea as a `/dev/null`-style
//! sink; used for spaces that only need triggers/replication fan-out to
//! observe a write, never a queryable copy of it.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{EmptyIter, IndexIter, IndexVtab, IterType, ReplaceMode};
use crate::tuple::{KeyDef, Tuple};

pub struct BlackholeIndex {
    name: String,
    key_def: Arc<KeyDef>,
}

impl BlackholeIndex {
    pub fn new(name: impl Into<String>, key_def: Arc<KeyDef>) -> BlackholeIndex {
        BlackholeIndex {
            name: name.into(),
            key_def,
        }
    }
}

impl IndexVtab for BlackholeIndex {
    fn name(&self) -> &str {
        &self.name
    }
    fn key_def(&self) -> &Arc<KeyDef> {
        &self.key_def
    }
    fn is_unique(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        0
    }
    fn min(&self) -> Option<Tuple> {
        None
    }
    fn max(&self) -> Option<Tuple> {
        None
    }
    fn random(&self, _seed: u32) -> Option<Tuple> {
        None
    }

    fn find_by_key(&self, _key: &[u8], _part_count: usize) -> Result<Option<Tuple>> {
        Ok(None)
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        _mode: ReplaceMode,
    ) -> Result<Option<Tuple>> {
        match (old, new) {
            (None, Some(_)) => Ok(None),
            (None, None) => Ok(None),
            _ => Err(Error::Unsupported(
                "blackhole index only accepts plain insert".into(),
            )),
        }
    }

    fn iterator(
        &self,
        _itype: IterType,
        _key: Option<&[u8]>,
        _part_count: usize,
    ) -> Result<Box<dyn IndexIter + '_>> {
        Ok(Box::new(EmptyIter))
    }

    fn build(&mut self, _pk: &dyn IndexVtab) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "blackhole_test.rs"]
mod blackhole_test;
