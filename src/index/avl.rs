//! `AvlIndex`: a balanced binary tree index, one tuple per node.
//!
//! Node shape and the `take()`-based detach-then-rebuild rotation style
//! follow the classic left/right-as-`Option<Box<Node>>` tree shape, rebuilt
//! bottom-up on every insert/delete; the rebalancing itself is classic AVL
//! (height-balance-factor rotations) rather than red-black.

use std::sync::Arc;

use crate::error::Result;
use crate::index::{check_replace_mode, EmptyIter, IndexIter, IndexVtab, IterType, ReplaceMode, VecIter};
use crate::tuple::{KeyDef, Tuple};

/// Test-only fault injection: when set, the next `n`th allocation fails
/// with `MemoryIssue`.
#[cfg(test)]
thread_local! {
    static FAIL_AFTER: std::cell::Cell<Option<usize>> = std::cell::Cell::new(None);
}

#[cfg(test)]
pub fn inject_alloc_failure_after(n: usize) {
    FAIL_AFTER.with(|f| f.set(Some(n)));
}

fn alloc_ok() -> crate::error::Result<()> {
    #[cfg(test)]
    {
        let fail = FAIL_AFTER.with(|f| {
            let v = f.get();
            if let Some(n) = v {
                if n == 0 {
                    return true;
                }
                f.set(Some(n - 1));
            }
            false
        });
        if fail {
            return Err(crate::error::Error::MemoryIssue);
        }
    }
    Ok(())
}

struct Node {
    tuple: Tuple,
    height: i32,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn leaf(tuple: Tuple) -> Box<Node> {
        Box::new(Node {
            tuple,
            height: 1,
            left: None,
            right: None,
        })
    }

    fn height(n: &Option<Box<Node>>) -> i32 {
        n.as_ref().map(|n| n.height).unwrap_or(0)
    }

    fn balance_factor(n: &Node) -> i32 {
        Node::height(&n.left) - Node::height(&n.right)
    }

    fn update_height(n: &mut Node) {
        n.height = 1 + Node::height(&n.left).max(Node::height(&n.right));
    }

    fn rotate_right(mut n: Box<Node>) -> Box<Node> {
        let mut left = n.left.take().expect("rotate_right needs a left child");
        n.left = left.right.take();
        Node::update_height(&mut n);
        left.right = Some(n);
        Node::update_height(&mut left);
        left
    }

    fn rotate_left(mut n: Box<Node>) -> Box<Node> {
        let mut right = n.right.take().expect("rotate_left needs a right child");
        n.right = right.left.take();
        Node::update_height(&mut n);
        right.left = Some(n);
        Node::update_height(&mut right);
        right
    }

    /// Standard single/double rotation rebalancing, O(log n) per call.
    fn rebalance(mut n: Box<Node>) -> Box<Node> {
        Node::update_height(&mut n);
        let bf = Node::balance_factor(&n);
        if bf > 1 {
            if Node::balance_factor(n.left.as_ref().unwrap()) < 0 {
                let left = n.left.take().unwrap();
                n.left = Some(Node::rotate_left(left));
            }
            return Node::rotate_right(n);
        }
        if bf < -1 {
            if Node::balance_factor(n.right.as_ref().unwrap()) > 0 {
                let right = n.right.take().unwrap();
                n.right = Some(Node::rotate_right(right));
            }
            return Node::rotate_left(n);
        }
        n
    }

    fn find_min(n: &Node) -> &Node {
        match &n.left {
            Some(l) => Node::find_min(l),
            None => n,
        }
    }
}

pub struct AvlIndex {
    name: String,
    key_def: Arc<KeyDef>,
    root: Option<Box<Node>>,
    n_count: usize,
}

impl AvlIndex {
    pub fn new(name: impl Into<String>, key_def: Arc<KeyDef>) -> AvlIndex {
        AvlIndex {
            name: name.into(),
            key_def,
            root: None,
            n_count: 0,
        }
    }

    fn get(&self, t: &Tuple) -> Option<Tuple> {
        let mut cur = self.root.as_deref();
        while let Some(n) = cur {
            match t.compare(&n.tuple, &self.key_def).ok()? {
                std::cmp::Ordering::Less => cur = n.left.as_deref(),
                std::cmp::Ordering::Greater => cur = n.right.as_deref(),
                std::cmp::Ordering::Equal => return Some(n.tuple.clone()),
            }
        }
        None
    }

    fn insert(
        node: Option<Box<Node>>,
        tuple: Tuple,
        key_def: &Arc<KeyDef>,
        displaced: &mut Option<Tuple>,
    ) -> Result<Box<Node>> {
        let mut node = match node {
            None => {
                alloc_ok()?;
                return Ok(Node::leaf(tuple));
            }
            Some(n) => n,
        };
        match tuple.compare(&node.tuple, key_def)? {
            std::cmp::Ordering::Less => {
                node.left = Some(Node::insert(node.left.take(), tuple, key_def, displaced)?);
            }
            std::cmp::Ordering::Greater => {
                node.right = Some(Node::insert(node.right.take(), tuple, key_def, displaced)?);
            }
            std::cmp::Ordering::Equal => {
                *displaced = Some(std::mem::replace(&mut node.tuple, tuple));
                return Ok(node);
            }
        }
        Ok(Node::rebalance(node))
    }

    fn delete(
        node: Option<Box<Node>>,
        probe: &Tuple,
        key_def: &Arc<KeyDef>,
        removed: &mut Option<Tuple>,
    ) -> Result<Option<Box<Node>>> {
        let mut node = match node {
            None => return Ok(None),
            Some(n) => n,
        };
        match probe.compare(&node.tuple, key_def)? {
            std::cmp::Ordering::Less => {
                node.left = Node::delete(node.left.take(), probe, key_def, removed)?;
            }
            std::cmp::Ordering::Greater => {
                node.right = Node::delete(node.right.take(), probe, key_def, removed)?;
            }
            std::cmp::Ordering::Equal => {
                *removed = Some(node.tuple.clone());
                return Ok(match (node.left.take(), node.right.take()) {
                    (None, None) => None,
                    (Some(l), None) => Some(l),
                    (None, Some(r)) => Some(r),
                    (Some(l), Some(r)) => {
                        let successor = Node::find_min(&r).tuple.clone();
                        let mut dummy = None;
                        let new_right =
                            Node::delete(Some(r), &successor, key_def, &mut dummy)?;
                        let mut replacement = Box::new(Node {
                            tuple: successor,
                            height: 1,
                            left: Some(l),
                            right: new_right,
                        });
                        Node::update_height(&mut replacement);
                        Some(replacement)
                    }
                });
            }
        }
        Ok(Some(Node::rebalance(node)))
    }

    fn collect_inorder(node: &Option<Box<Node>>, out: &mut Vec<Tuple>) {
        if let Some(n) = node {
            Self::collect_inorder(&n.left, out);
            out.push(n.tuple.clone());
            Self::collect_inorder(&n.right, out);
        }
    }
}

impl IndexVtab for AvlIndex {
    fn name(&self) -> &str {
        &self.name
    }
    fn key_def(&self) -> &Arc<KeyDef> {
        &self.key_def
    }

    fn size(&self) -> u64 {
        self.n_count as u64
    }

    fn min(&self) -> Option<Tuple> {
        let mut cur = self.root.as_deref()?;
        while let Some(l) = cur.left.as_deref() {
            cur = l;
        }
        Some(cur.tuple.clone())
    }

    fn max(&self) -> Option<Tuple> {
        let mut cur = self.root.as_deref()?;
        while let Some(r) = cur.right.as_deref() {
            cur = r;
        }
        Some(cur.tuple.clone())
    }

    fn random(&self, seed: u32) -> Option<Tuple> {
        if self.n_count == 0 {
            return None;
        }
        let mut all = Vec::new();
        Self::collect_inorder(&self.root, &mut all);
        all.into_iter().nth((seed as usize) % all.len())
    }

    fn find_by_key(&self, key: &[u8], part_count: usize) -> Result<Option<Tuple>> {
        let mut cur = self.root.as_deref();
        while let Some(n) = cur {
            match n.tuple.compare_with_key(key, part_count, &self.key_def)? {
                std::cmp::Ordering::Equal => return Ok(Some(n.tuple.clone())),
                std::cmp::Ordering::Greater => cur = n.left.as_deref(),
                std::cmp::Ordering::Less => cur = n.right.as_deref(),
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
                let mut removed = None;
                self.root = Self::delete(self.root.take(), old, &self.key_def, &mut removed)?;
                if removed.is_some() {
                    self.n_count -= 1;
                }
                Ok(removed)
            }
            (old_hint, Some(new)) => {
                let existing = self.get(new);
                check_replace_mode(&self.name, existing.as_ref(), old_hint, new, mode)?;
                let mut displaced = None;
                self.root = Some(Self::insert(
                    self.root.take(),
                    new.clone(),
                    &self.key_def,
                    &mut displaced,
                )?);
                if displaced.is_none() {
                    self.n_count += 1;
                }
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
        let mut all = Vec::new();
        Self::collect_inorder(&self.root, &mut all);
        let kd = self.key_def.clone();
        let filtered = match (itype, key) {
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
            (IterType::Ge, Some(k)) => all
                .into_iter()
                .filter(|t| {
                    t.compare_with_key(k, part_count, &kd)
                        .map(|o| o != std::cmp::Ordering::Less)
                        .unwrap_or(false)
                })
                .collect(),
            (IterType::Gt, Some(k)) => all
                .into_iter()
                .filter(|t| {
                    t.compare_with_key(k, part_count, &kd)
                        .map(|o| o == std::cmp::Ordering::Greater)
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
#[path = "avl_test.rs"]
mod avl_test;
