//! `RTreeIndex`: a spatial index over axis-aligned rectangles.
//!
//! Single key part only; it must decode as a 2-number array (treated as a
//! degenerate point rectangle) or a 4-number array `[xmin, ymin, xmax,
//! ymax]`. Node shape follows the same recursive-`Box` convention as
//! [`crate::index::avl`], generalised from a binary tree to an N-ary one
//! with a minimal bounding rectangle per node and a linear-split insert,
//! since none of the pack's example crates carry an R-tree of their own to
//! imitate directly.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{IndexIter, IndexVtab, IterType, ReplaceMode, VecIter};
use crate::tuple::{KeyDef, Tuple};

pub const NODE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Rect {
    fn point(x: f64, y: f64) -> Rect {
        Rect {
            min: [x, y],
            max: [x, y],
        }
    }

    fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    fn area(&self) -> f64 {
        (self.max[0] - self.min[0]).max(0.0) * (self.max[1] - self.min[1]).max(0.0)
    }

    fn enlargement(&self, other: &Rect) -> f64 {
        self.union(other).area() - self.area()
    }

    fn overlaps(&self, other: &Rect) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    fn contains(&self, other: &Rect) -> bool {
        self.min[0] <= other.min[0]
            && self.min[1] <= other.min[1]
            && self.max[0] >= other.max[0]
            && self.max[1] >= other.max[1]
    }

    fn strictly_contains(&self, other: &Rect) -> bool {
        self.contains(other) && self != other
    }

    fn eq_rect(&self, other: &Rect) -> bool {
        self == other
    }

    fn center_distance(&self, other: &Rect) -> f64 {
        let cx = (self.min[0] + self.max[0]) / 2.0 - (other.min[0] + other.max[0]) / 2.0;
        let cy = (self.min[1] + self.max[1]) / 2.0 - (other.min[1] + other.max[1]) / 2.0;
        (cx * cx + cy * cy).sqrt()
    }
}

pub fn decode_rect(raw: &[u8]) -> Result<Rect> {
    let (n, mut pos) = crate::tuple::msgpack::read_array_header(raw)?;
    let mut nums = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (s, len) = crate::tuple::msgpack::decode_scalar(&raw[pos..])?;
        pos += len;
        let v = match s {
            crate::tuple::msgpack::Scalar::Int(v) => v as f64,
            crate::tuple::msgpack::Scalar::UInt(v) => v as f64,
            crate::tuple::msgpack::Scalar::Float(v) => v,
            _ => return Err(Error::FormatMismatch("rtree key part must be numeric".into())),
        };
        nums.push(v);
    }
    match nums.len() {
        2 => Ok(Rect::point(nums[0], nums[1])),
        4 => Ok(Rect {
            min: [nums[0], nums[1]],
            max: [nums[2], nums[3]],
        }),
        n => Err(Error::FormatMismatch(format!(
            "rtree key must decode as 2 or 4 numbers, got {}",
            n
        ))),
    }
}

enum Child {
    Leaf(Rect, Tuple),
    Node(Box<RNode>),
}

impl Child {
    fn mbr(&self) -> Rect {
        match self {
            Child::Leaf(r, _) => *r,
            Child::Node(n) => n.mbr,
        }
    }
}

struct RNode {
    mbr: Rect,
    children: Vec<Child>,
}

impl RNode {
    fn empty() -> RNode {
        RNode {
            mbr: Rect::point(0.0, 0.0),
            children: Vec::new(),
        }
    }

    fn recompute_mbr(&mut self) {
        let mut it = self.children.iter();
        if let Some(first) = it.next() {
            let mut mbr = first.mbr();
            for c in it {
                mbr = mbr.union(&c.mbr());
            }
            self.mbr = mbr;
        }
    }

    fn insert(&mut self, rect: Rect, tuple: Tuple, node_capacity: usize) {
        self.children.push(Child::Leaf(rect, tuple));
        self.mbr = if self.children.len() == 1 {
            rect
        } else {
            self.mbr.union(&rect)
        };
        if self.children.len() > node_capacity {
            self.split();
        }
    }

    /// Linear split: pick the two children whose MBRs waste the most area
    /// together, then distribute the rest by minimal enlargement.
    fn split(&mut self) {
        let children = std::mem::take(&mut self.children);
        let n = children.len();
        let mut worst = (0, 1, -1.0);
        for i in 0..n {
            for j in (i + 1)..n {
                let waste = children[i].mbr().union(&children[j].mbr()).area()
                    - children[i].mbr().area()
                    - children[j].mbr().area();
                if waste > worst.2 {
                    worst = (i, j, waste);
                }
            }
        }
        let mut a = RNode::empty();
        let mut b = RNode::empty();
        for (idx, child) in children.into_iter().enumerate() {
            if idx == worst.0 {
                a.mbr = child.mbr();
                a.children.push(child);
            } else if idx == worst.1 {
                b.mbr = child.mbr();
                b.children.push(child);
            } else if a.children.len() < b.children.len() {
                a.mbr = a.mbr.union(&child.mbr());
                a.children.push(child);
            } else {
                b.mbr = b.mbr.union(&child.mbr());
                b.children.push(child);
            }
        }
        self.children = vec![Child::Node(Box::new(a)), Child::Node(Box::new(b))];
        self.recompute_mbr();
    }

    fn collect(&self, out: &mut Vec<(Rect, Tuple)>) {
        for c in &self.children {
            match c {
                Child::Leaf(r, t) => out.push((*r, t.clone())),
                Child::Node(n) => n.collect(out),
            }
        }
    }
}

pub struct RTreeIndex {
    name: String,
    key_def: Arc<KeyDef>,
    root: RNode,
    n_count: usize,
    node_capacity: usize,
}

impl RTreeIndex {
    pub fn new(name: impl Into<String>, key_def: Arc<KeyDef>) -> RTreeIndex {
        Self::with_capacity(name, key_def, NODE_CAPACITY)
    }

    /// As [`RTreeIndex::new`], but with a node fan-out other than
    /// [`NODE_CAPACITY`] — the seam `EngineConfig::rtree_node_capacity`
    /// drives when an alter op builds a fresh `RTreeIndex`.
    pub fn with_capacity(
        name: impl Into<String>,
        key_def: Arc<KeyDef>,
        node_capacity: usize,
    ) -> RTreeIndex {
        RTreeIndex {
            name: name.into(),
            key_def,
            root: RNode::empty(),
            n_count: 0,
            node_capacity: node_capacity.max(1),
        }
    }

    fn rect_of(&self, t: &Tuple) -> Result<Rect> {
        let part = &self.key_def.parts()[0];
        let raw = t
            .field(part.field_no)?
            .ok_or_else(|| Error::FormatMismatch("missing rtree field".into()))?;
        decode_rect(raw)
    }

    fn remove_matching(&mut self, rect: &Rect, tuple: &Tuple) -> Option<Tuple> {
        fn go(node: &mut RNode, rect: &Rect, tuple: &Tuple) -> Option<Tuple> {
            let mut found_idx = None;
            for (i, c) in node.children.iter_mut().enumerate() {
                match c {
                    Child::Leaf(r, t) if r.eq_rect(rect) && t == tuple => {
                        found_idx = Some(i);
                        break;
                    }
                    Child::Node(n) => {
                        if n.mbr.overlaps(rect) {
                            if let Some(found) = go(n, rect, tuple) {
                                node.recompute_mbr();
                                return Some(found);
                            }
                        }
                    }
                    _ => {}
                }
            }
            if let Some(i) = found_idx {
                let removed = node.children.remove(i);
                node.recompute_mbr();
                return match removed {
                    Child::Leaf(_, t) => Some(t),
                    _ => None,
                };
            }
            None
        }
        go(&mut self.root, rect, tuple)
    }
}

impl IndexVtab for RTreeIndex {
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
        self.n_count as u64
    }

    fn min(&self) -> Option<Tuple> {
        let mut all = Vec::new();
        self.root.collect(&mut all);
        all.into_iter().next().map(|(_, t)| t)
    }

    fn max(&self) -> Option<Tuple> {
        let mut all = Vec::new();
        self.root.collect(&mut all);
        all.into_iter().last().map(|(_, t)| t)
    }

    fn random(&self, seed: u32) -> Option<Tuple> {
        let mut all = Vec::new();
        self.root.collect(&mut all);
        if all.is_empty() {
            return None;
        }
        let idx = seed as usize % all.len();
        Some(all.remove(idx).1)
    }

    fn find_by_key(&self, _key: &[u8], _part_count: usize) -> Result<Option<Tuple>> {
        Err(Error::Unsupported("rtree is never unique".into()))
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: ReplaceMode,
    ) -> Result<Option<Tuple>> {
        match (old, new) {
            (Some(old), None) => {
                let rect = self.rect_of(old)?;
                let removed = self.remove_matching(&rect, old);
                if removed.is_some() {
                    self.n_count -= 1;
                }
                Ok(removed)
            }
            (old_hint, Some(new)) => {
                if mode == ReplaceMode::Replace {
                    return Err(Error::Unsupported(
                        "rtree does not support key-based REPLACE".into(),
                    ));
                }
                if let Some(old) = old_hint {
                    let rect = self.rect_of(old)?;
                    self.remove_matching(&rect, old);
                    self.n_count = self.n_count.saturating_sub(1);
                }
                let rect = self.rect_of(new)?;
                self.root.insert(rect, new.clone(), self.node_capacity);
                self.n_count += 1;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    fn iterator(
        &self,
        itype: IterType,
        key: Option<&[u8]>,
        _part_count: usize,
    ) -> Result<Box<dyn IndexIter + '_>> {
        let mut all = Vec::new();
        self.root.collect(&mut all);
        let probe = match key {
            Some(k) => Some(decode_rect(k)?),
            None => None,
        };
        let items: Vec<Tuple> = match (itype, probe) {
            (IterType::All, _) => all.into_iter().map(|(_, t)| t).collect(),
            (IterType::Overlaps, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| r.overlaps(&p))
                .map(|(_, t)| t)
                .collect(),
            (IterType::Eq, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| r.eq_rect(&p))
                .map(|(_, t)| t)
                .collect(),
            (IterType::Neighbor, Some(p)) => {
                let mut v = all;
                v.sort_by(|(a, _), (b, _)| {
                    a.center_distance(&p)
                        .partial_cmp(&b.center_distance(&p))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                v.into_iter().map(|(_, t)| t).collect()
            }
            (IterType::Contains, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| contains(r, &p, false))
                .map(|(_, t)| t)
                .collect(),
            (IterType::StrictContains, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| contains(r, &p, true))
                .map(|(_, t)| t)
                .collect(),
            (IterType::Belongs, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| belongs(r, &p, false))
                .map(|(_, t)| t)
                .collect(),
            (IterType::StrictBelongs, Some(p)) => all
                .into_iter()
                .filter(|(r, _)| belongs(r, &p, true))
                .map(|(_, t)| t)
                .collect(),
            _ => Vec::new(),
        };
        Ok(Box::new(VecIter::new(items)))
    }
}

/// Geometric predicates beyond plain `overlaps`, backing
/// `IterType::Contains`/`StrictContains`/`Belongs`/`StrictBelongs` in
/// `iterator` above.
pub fn contains(container: &Rect, probe: &Rect, strict: bool) -> bool {
    if strict {
        container.strictly_contains(probe)
    } else {
        container.contains(probe)
    }
}

pub fn belongs(point_holder: &Rect, region: &Rect, strict: bool) -> bool {
    contains(region, point_holder, strict)
}

#[cfg(test)]
#[path = "rtree_test.rs"]
mod rtree_test;
