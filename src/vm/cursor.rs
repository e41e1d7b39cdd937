//! VM cursors: a handle over an index iterator, an external sorter, or a
//! pseudo-tuple register.
//!
//! Every index backend already materialises its iterator eagerly into a
//! `Vec<Tuple>` (see `index::VecIter`), so a cursor just snapshots that
//! vector at `Rewind`/`Seek` time instead of holding a live borrow across
//! VM steps — sidesteps tying the cursor's lifetime to the space's
//! `RefCell` borrow for the whole scan.

use crate::error::{Error, Result};
use crate::index::{IndexVtab, IterType, ReplaceMode};
use crate::space::cache::SpaceRef;
use crate::tuple::Tuple;

pub enum CursorSource {
    Index { space: SpaceRef, iid: u32 },
    Ephemeral,
    Pseudo { reg: usize },
    Sorter,
}

/// `cacheStatus`: incremented on every cursor movement; a cached column
/// read taken at one generation is stale at any other.
pub struct Cursor {
    pub source: CursorSource,
    pub is_write: bool,
    rows: Vec<Tuple>,
    pos: Option<usize>,
    pub generation: u64,
}

impl Cursor {
    pub fn open_index(space: SpaceRef, iid: u32, is_write: bool) -> Cursor {
        Cursor {
            source: CursorSource::Index { space, iid },
            is_write,
            rows: Vec::new(),
            pos: None,
            generation: 0,
        }
    }

    pub fn open_ephemeral(rows: Vec<Tuple>) -> Cursor {
        Cursor {
            source: CursorSource::Ephemeral,
            is_write: true,
            rows,
            pos: None,
            generation: 0,
        }
    }

    pub fn open_pseudo(reg: usize) -> Cursor {
        Cursor {
            source: CursorSource::Pseudo { reg },
            is_write: false,
            rows: Vec::new(),
            pos: None,
            generation: 0,
        }
    }

    fn reload(&mut self, itype: IterType, key: Option<&[u8]>, part_count: usize) -> Result<()> {
        match &self.source {
            CursorSource::Index { space, iid } => {
                let space = space.borrow();
                let index = space.index(*iid)?;
                let mut it = index.iterator(itype, key, part_count)?;
                let mut rows = Vec::new();
                while let Some(t) = it.next()? {
                    rows.push(t);
                }
                self.rows = rows;
            }
            CursorSource::Ephemeral | CursorSource::Pseudo { .. } | CursorSource::Sorter => {}
        }
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<bool> {
        self.reload(IterType::All, None, 0)?;
        self.generation += 1;
        self.pos = if self.rows.is_empty() { None } else { Some(0) };
        Ok(self.pos.is_some())
    }

    pub fn last(&mut self) -> Result<bool> {
        self.reload(IterType::All, None, 0)?;
        self.generation += 1;
        self.pos = if self.rows.is_empty() { None } else { Some(self.rows.len() - 1) };
        Ok(self.pos.is_some())
    }

    pub fn seek(&mut self, itype: IterType, key: &[u8], part_count: usize) -> Result<bool> {
        self.reload(itype, Some(key), part_count)?;
        self.generation += 1;
        self.pos = if self.rows.is_empty() { None } else { Some(0) };
        Ok(self.pos.is_some())
    }

    pub fn next(&mut self) -> Result<bool> {
        self.generation += 1;
        match self.pos {
            Some(p) if p + 1 < self.rows.len() => {
                self.pos = Some(p + 1);
                Ok(true)
            }
            _ => {
                self.pos = None;
                Ok(false)
            }
        }
    }

    pub fn prev(&mut self) -> Result<bool> {
        self.generation += 1;
        match self.pos {
            Some(p) if p > 0 => {
                self.pos = Some(p - 1);
                Ok(true)
            }
            _ => {
                self.pos = None;
                Ok(false)
            }
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos.is_none()
    }

    pub fn current(&self) -> Option<&Tuple> {
        self.pos.and_then(|p| self.rows.get(p))
    }

    pub fn close(&mut self) {
        self.rows.clear();
        self.pos = None;
    }

    pub fn index_space(&self) -> Result<(&SpaceRef, u32)> {
        match &self.source {
            CursorSource::Index { space, iid } => Ok((space, *iid)),
            _ => Err(Error::Unsupported("cursor is not an index cursor".into())),
        }
    }

    /// `IdxInsert`/`IdxDelete`/`IdxReplace`/`SorterInsert`: mutate the
    /// cursor's backing store, invalidating the snapshotted row set so the
    /// next navigation re-reads it.
    ///
    /// An index cursor always mutates through `Space::replace`, never a
    /// single index's `replace` directly — Tarantool has no notion of
    /// writing one index of a space in isolation, so every secondary index
    /// and every `on_replace` trigger must see the same row the cursor's
    /// own index does.
    pub fn mutate(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: ReplaceMode,
    ) -> Result<Option<Tuple>> {
        match &self.source {
            CursorSource::Index { space, .. } => {
                let mut space = space.borrow_mut();
                let displaced = space.replace(old, new, mode)?;
                self.rows.clear();
                self.pos = None;
                Ok(displaced)
            }
            CursorSource::Ephemeral => {
                if let Some(o) = old {
                    self.rows.retain(|t| t != o);
                }
                if let Some(n) = new {
                    self.rows.push(n.clone());
                }
                self.pos = None;
                Ok(None)
            }
            _ => Err(Error::Unsupported("cursor does not support mutation".into())),
        }
    }
}
