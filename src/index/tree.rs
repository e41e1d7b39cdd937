//! `TreeIndex`: an in-memory B+-tree-shaped index.
//!
//! Internally this keeps tuples in sorted pages drawn from a shared slab,
//! a packed page-oriented layout kept mutable: pages are rebalanced on
//! insert instead of being built once and frozen. Page allocation/free is
//! tracked through an explicit counter so a test harness can assert it
//! never leaks.

use std::sync::{atomic::AtomicUsize, atomic::Ordering as AtomicOrdering, Arc};

use crate::error::Result;
use crate::index::{check_replace_mode, EmptyIter, IndexIter, IndexVtab, IterType, ReplaceMode, VecIter};
use crate::tuple::{KeyDef, Tuple};

pub const PAGE_CAPACITY: usize = 64;

/// Process-wide outstanding-page counter, backing a simple bump-allocated
/// node pool.
static OUTSTANDING_PAGES: AtomicUsize = AtomicUsize::new(0);

pub fn outstanding_pages() -> usize {
    OUTSTANDING_PAGES.load(AtomicOrdering::SeqCst)
}

struct Page {
    entries: Vec<Tuple>,
}

impl Page {
    fn new() -> Page {
        OUTSTANDING_PAGES.fetch_add(1, AtomicOrdering::SeqCst);
        Page { entries: Vec::new() }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        OUTSTANDING_PAGES.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

pub struct TreeIndex {
    name: String,
    key_def: Arc<KeyDef>,
    pages: Vec<Page>,
    page_capacity: usize,
}

impl TreeIndex {
    pub fn new(name: impl Into<String>, key_def: Arc<KeyDef>) -> TreeIndex {
        Self::with_capacity(name, key_def, PAGE_CAPACITY)
    }

    /// As [`TreeIndex::new`], but with a page capacity other than
    /// [`PAGE_CAPACITY`] — the seam `EngineConfig::page_capacity` drives
    /// when an alter op builds a fresh `TreeIndex`.
    pub fn with_capacity(
        name: impl Into<String>,
        key_def: Arc<KeyDef>,
        page_capacity: usize,
    ) -> TreeIndex {
        TreeIndex {
            name: name.into(),
            key_def,
            pages: vec![Page::new()],
            page_capacity: page_capacity.max(1),
        }
    }

    fn locate(&self, t: &Tuple) -> (usize, usize, bool) {
        // `pages` are maintained so every entry in page i sorts before
        // every entry in page i+1; binary-search pages by their first key,
        // then the target page by entry.
        let page_idx = match self
            .pages
            .binary_search_by(|p| match p.entries.first() {
                Some(first) => first.compare(t, &self.key_def).unwrap_or(std::cmp::Ordering::Less),
                None => std::cmp::Ordering::Less,
            }) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let page = &self.pages[page_idx];
        match page
            .entries
            .binary_search_by(|e| e.compare(t, &self.key_def).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => (page_idx, i, true),
            Err(i) => (page_idx, i, false),
        }
    }

    fn split_if_full(&mut self, page_idx: usize) {
        if self.pages[page_idx].entries.len() <= self.page_capacity {
            return;
        }
        let mut right = Page::new();
        let mid = self.pages[page_idx].entries.len() / 2;
        right.entries = self.pages[page_idx].entries.split_off(mid);
        self.pages.insert(page_idx + 1, right);
    }

    fn find_existing(&self, t: &Tuple) -> Option<Tuple> {
        let (page_idx, pos, found) = self.locate(t);
        if found {
            Some(self.pages[page_idx].entries[pos].clone())
        } else {
            None
        }
    }
}

impl IndexVtab for TreeIndex {
    fn name(&self) -> &str {
        &self.name
    }
    fn key_def(&self) -> &Arc<KeyDef> {
        &self.key_def
    }

    fn size(&self) -> u64 {
        self.pages.iter().map(|p| p.entries.len() as u64).sum()
    }

    fn min(&self) -> Option<Tuple> {
        self.pages.iter().find_map(|p| p.entries.first().cloned())
    }

    fn max(&self) -> Option<Tuple> {
        self.pages.iter().rev().find_map(|p| p.entries.last().cloned())
    }

    fn random(&self, seed: u32) -> Option<Tuple> {
        let n = self.size();
        if n == 0 {
            return None;
        }
        let idx = (seed as u64 % n) as usize;
        let mut remaining = idx;
        for page in &self.pages {
            if remaining < page.entries.len() {
                return Some(page.entries[remaining].clone());
            }
            remaining -= page.entries.len();
        }
        None
    }

    fn find_by_key(&self, key: &[u8], part_count: usize) -> Result<Option<Tuple>> {
        for page in &self.pages {
            for e in &page.entries {
                if e.compare_with_key(key, part_count, &self.key_def)? == std::cmp::Ordering::Equal
                {
                    return Ok(Some(e.clone()));
                }
            }
        }
        Ok(None)
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: ReplaceMode,
    ) -> Result<Option<Tuple>> {
        match (old, new) {
            (Some(old), None) => {
                let (page_idx, pos, found) = self.locate(old);
                if found {
                    Ok(Some(self.pages[page_idx].entries.remove(pos)))
                } else {
                    Ok(None)
                }
            }
            (old_hint, Some(new)) => {
                let existing = self.find_existing(new);
                check_replace_mode(&self.name, existing.as_ref(), old_hint, new, mode)?;
                let (page_idx, pos, found) = self.locate(new);
                let displaced = if found {
                    Some(std::mem::replace(
                        &mut self.pages[page_idx].entries[pos],
                        new.clone(),
                    ))
                } else {
                    self.pages[page_idx].entries.insert(pos, new.clone());
                    None
                };
                self.split_if_full(page_idx);
                Ok(displaced)
            }
            (None, None) => Ok(None),
        }
    }

    fn iterator(
        &self,
        itype: IterType,
        key: Option<&[u8]>,
        part_count: usize,
    ) -> Result<Box<dyn IndexIter + '_>> {
        let all: Vec<Tuple> = self.pages.iter().flat_map(|p| p.entries.iter().cloned()).collect();
        let kd = self.key_def.clone();
        let filtered: Vec<Tuple> = match (itype, key) {
            (IterType::All, _) => all,
            (IterType::Eq, Some(k)) => all
                .into_iter()
                .filter(|t| {
                    t.compare_with_key(k, part_count, &kd)
                        .map(|o| o == std::cmp::Ordering::Equal)
                        .unwrap_or(false)
                })
                .collect(),
            (IterType::Req, Some(k)) => {
                let mut v: Vec<Tuple> = all
                    .into_iter()
                    .filter(|t| {
                        t.compare_with_key(k, part_count, &kd)
                            .map(|o| o == std::cmp::Ordering::Equal)
                            .unwrap_or(false)
                    })
                    .collect();
                v.reverse();
                v
            }
            (IterType::Gt, Some(k)) => all
                .into_iter()
                .filter(|t| {
                    t.compare_with_key(k, part_count, &kd)
                        .map(|o| o == std::cmp::Ordering::Greater)
                        .unwrap_or(false)
                })
                .collect(),
            (IterType::Ge, Some(k)) => all
                .into_iter()
                .filter(|t| {
                    t.compare_with_key(k, part_count, &kd)
                        .map(|o| o != std::cmp::Ordering::Less)
                        .unwrap_or(false)
                })
                .collect(),
            (IterType::Lt, Some(k)) => {
                let mut v: Vec<Tuple> = all
                    .into_iter()
                    .filter(|t| {
                        t.compare_with_key(k, part_count, &kd)
                            .map(|o| o == std::cmp::Ordering::Less)
                            .unwrap_or(false)
                    })
                    .collect();
                v.reverse();
                v
            }
            (IterType::Le, Some(k)) => {
                let mut v: Vec<Tuple> = all
                    .into_iter()
                    .filter(|t| {
                        t.compare_with_key(k, part_count, &kd)
                            .map(|o| o != std::cmp::Ordering::Greater)
                            .unwrap_or(false)
                    })
                    .collect();
                v.reverse();
                v
            }
            _ => return Ok(Box::new(EmptyIter)),
        };
        Ok(Box::new(VecIter::new(filtered)))
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
