//! The online index builder: constructs a secondary index on a live space
//! by interleaving a yieldable primary-key scan with a trigger chain that
//! mirrors concurrent DML into the new index.
//!
//! Modelled for this crate's single-threaded cooperative scheduling: there
//! are no real OS threads here, so "concurrent" transactions are simulated
//! by the caller driving [`IndexBuildCtx`]'s trigger methods between calls
//! to [`IndexBuildCtx::scan`] — exactly the interleaving the fiber
//! scheduler would produce, just made explicit instead of preemptive.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::index::{IndexIter, IndexVtab, IterType, ReplaceMode};
use crate::tuple::{KeyDef, Tuple, TupleFormat};

pub type TxnId = u64;

fn cmp(a: &Tuple, b: &Tuple, kd: &KeyDef) -> Ordering {
    a.compare(b, kd).unwrap_or(Ordering::Equal)
}

#[derive(Default)]
struct NotConfirmed {
    entries: Vec<(Tuple, u32)>,
}

impl NotConfirmed {
    fn inc(&mut self, key_tuple: &Tuple, kd: &KeyDef) {
        match self.entries.iter_mut().find(|(t, _)| cmp(t, key_tuple, kd) == Ordering::Equal) {
            Some((_, n)) => *n += 1,
            None => self.entries.push((key_tuple.clone(), 1)),
        }
    }
    fn dec(&mut self, key_tuple: &Tuple, kd: &KeyDef) {
        if let Some(pos) = self.entries.iter().position(|(t, _)| cmp(t, key_tuple, kd) == Ordering::Equal) {
            self.entries[pos].1 -= 1;
            if self.entries[pos].1 == 0 {
                self.entries.remove(pos);
            }
        }
    }
    fn contains(&self, key_tuple: &Tuple, kd: &KeyDef) -> bool {
        self.entries.iter().any(|(t, _)| cmp(t, key_tuple, kd) == Ordering::Equal)
    }
}

/// State for one in-flight online build. Owns the index under construction
/// outright (rather than borrowing it) so the whole context can be shared
/// via `Rc<RefCell<_>>` with a `'static` trigger closure — the shape an
/// `on_replace` hook on the live space needs.
pub struct IndexBuildCtx {
    new_index: Box<dyn IndexVtab>,
    new_format: Arc<TupleFormat>,
    /// The primary key's key def: establishes the total order the scan
    /// cursor and `processed`/`write_set` entries are compared under.
    cmp_def: Arc<KeyDef>,
    check_unique: bool,
    yield_every: u32,
    cursor: Option<Tuple>,
    scanned: u64,
    write_set: Vec<(Tuple, TxnId)>,
    processed: Vec<Tuple>,
    not_confirmed: NotConfirmed,
    is_failed: Option<Error>,
    /// Per-statement bookkeeping recorded by `on_replace`, looked up again
    /// by `before_commit`/`on_rollback` using the txn id as key.
    in_flight: Vec<(TxnId, Option<Tuple>, Option<Tuple>, bool)>,
    /// Writers that lost a unique-key race in `before_commit`. A writer's
    /// own subsequent `before_commit`/`on_commit` call must see this and
    /// fail rather than silently succeed as a no-op.
    aborted: Vec<TxnId>,
}

impl IndexBuildCtx {
    pub fn new(
        new_index: Box<dyn IndexVtab>,
        new_format: Arc<TupleFormat>,
        cmp_def: Arc<KeyDef>,
        check_unique: bool,
        yield_every: u32,
    ) -> IndexBuildCtx {
        IndexBuildCtx {
            new_index,
            new_format,
            cmp_def,
            check_unique,
            yield_every: yield_every.max(1),
            cursor: None,
            scanned: 0,
            write_set: Vec::new(),
            processed: Vec::new(),
            not_confirmed: NotConfirmed::default(),
            is_failed: None,
            in_flight: Vec::new(),
            aborted: Vec::new(),
        }
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed.is_some()
    }

    /// The index under construction, for callers that need to inspect it
    /// (tests, or a caller checkpointing mid-build) without tearing the
    /// context down.
    pub fn index(&self) -> &dyn IndexVtab {
        self.new_index.as_ref()
    }

    /// Reclaim the built index once the scan and every in-flight writer
    /// have settled.
    pub fn into_index(self) -> Box<dyn IndexVtab> {
        self.new_index
    }

    /// Has `txn` been aborted by a unique-key conflict with an
    /// already-committed writer (see `before_commit`)?
    pub fn is_aborted(&self, txn: TxnId) -> bool {
        self.aborted.contains(&txn)
    }

    fn fail(&mut self, err: Error) -> Error {
        self.is_failed.get_or_insert_with(|| match &err {
            Error::DuplicateKey { index_name, dup_raw, new_raw } => Error::DuplicateKey {
                index_name: index_name.clone(),
                dup_raw: dup_raw.clone(),
                new_raw: new_raw.clone(),
            },
            other => Error::InternalError(other.to_string()),
        });
        err
    }

    fn discard_processed_before(&mut self, tuple: &Tuple) {
        self.processed.retain(|p| cmp(p, tuple, &self.cmp_def) != Ordering::Less);
    }

    fn is_processed(&self, tuple: &Tuple) -> bool {
        self.processed.iter().any(|p| cmp(p, tuple, &self.cmp_def) == Ordering::Equal)
    }

    /// Run the scan over `pk`, yielding (returning control via the `yield_cb`
    /// closure) every `yield_every` tuples. `yield_cb` returns `Ok(true)` to
    /// keep going, `Ok(false)`/`Err` to stop (fiber cancellation).
    pub fn scan(
        &mut self,
        pk: &dyn IndexVtab,
        mut yield_cb: impl FnMut() -> Result<bool>,
    ) -> Result<()> {
        let mut it = pk.iterator(IterType::All, None, 0)?;
        while let Some(tuple) = it.next()? {
            if let Some(err) = self.is_failed.take() {
                return Err(err);
            }
            self.discard_processed_before(&tuple);
            if self.is_processed(&tuple) {
                continue;
            }
            self.new_format.validate_raw(tuple.raw())?;

            if self.check_unique {
                let new_kd = self.new_index.key_def().clone();
                let key = tuple.extract_key(&new_kd)?;
                if self
                    .new_index
                    .find_by_key(&key, new_kd.part_count())?
                    .is_some()
                {
                    return Err(self.fail(Error::DuplicateKey {
                        index_name: self.new_index.name().to_string(),
                        dup_raw: key.clone(),
                        new_raw: key,
                    }));
                }
                if self.not_confirmed.contains(&tuple, &new_kd) {
                    return Err(self.fail(Error::TransactionConflict(
                        self.new_index.name().to_string(),
                    )));
                }
            }

            self.new_index.replace(None, Some(&tuple), ReplaceMode::InsertOrReplace)?;
            self.cursor = Some(tuple);
            self.scanned += 1;
            if self.scanned % self.yield_every as u64 == 0 {
                trace!(
                    target: "index_build",
                    "{:?}: yielding after {} tuple(s) scanned",
                    self.new_index.name(), self.scanned
                );
                if !yield_cb()? {
                    debug!(target: "index_build", "{:?}: cancelled at {} tuple(s)", self.new_index.name(), self.scanned);
                    return Err(Error::FiberIsCancelled);
                }
                if let Some(err) = self.is_failed.take() {
                    return Err(err);
                }
            }
        }
        debug!(target: "index_build", "{:?}: scan complete, {} tuple(s) total", self.new_index.name(), self.scanned);
        Ok(())
    }

    /// **On replace** — the `on_replace` leg of the trigger chain, run
    /// synchronously by the statement issuing the DML.
    pub fn on_replace(
        &mut self,
        txn: TxnId,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) -> Result<()> {
        if self.check_unique {
            if let Some(new_t) = new {
                let key = new_t.extract_key(self.new_index.key_def())?;
                if let Some(existing) =
                    self.new_index.find_by_key(&key, self.new_index.key_def().part_count())?
                {
                    let is_old = old.map(|o| o == &existing).unwrap_or(false);
                    if !is_old {
                        return Err(Error::DuplicateKey {
                            index_name: self.new_index.name().to_string(),
                            dup_raw: existing.raw().to_vec(),
                            new_raw: new_t.raw().to_vec(),
                        });
                    }
                }
            }
        }
        self.in_flight.push((txn, old.cloned(), new.cloned(), false));
        if let Some(new_t) = new {
            self.write_set.push((new_t.clone(), txn));
        }
        Ok(())
    }

    fn slot(&mut self, txn: TxnId) -> Option<usize> {
        self.in_flight.iter().position(|(t, ..)| *t == txn)
    }

    /// **Before commit.** Fails outright if `txn` was already aborted by
    /// `before_commit`'s own unique-conflict arbitration for another writer
    /// — the real signal that lets the transaction that owns `txn` raise
    /// `Error::TransactionConflict` instead of committing a write the build
    /// has already discarded.
    pub fn before_commit(&mut self, txn: TxnId) -> Result<()> {
        if self.aborted.contains(&txn) {
            return Err(Error::TransactionConflict(self.new_index.name().to_string()));
        }
        let idx = match self.slot(txn) {
            Some(i) => i,
            None => return Ok(()),
        };
        let (_, old, new, _) = self.in_flight[idx].clone();
        let mark = match (&old, &new) {
            (Some(o), Some(n)) => {
                if cmp(o, n, &self.cmp_def) == Ordering::Greater { o.clone() } else { n.clone() }
            }
            (Some(o), None) => o.clone(),
            (None, Some(n)) => n.clone(),
            (None, None) => return Ok(()),
        };

        let scan_has_seen = self
            .cursor
            .as_ref()
            .map(|c| cmp(&mark, c, &self.cmp_def) != Ordering::Greater)
            .unwrap_or(false)
            || self.is_processed(&mark);

        let new_kd = self.new_index.key_def().clone();
        let old_tuple_for_builder = if scan_has_seen { old.clone() } else { None };
        if let Some(ref o) = old_tuple_for_builder {
            self.not_confirmed.inc(o, &new_kd);
        }
        self.new_index.replace(old_tuple_for_builder.as_ref(), new.as_ref(), ReplaceMode::InsertOrReplace)?;

        if !scan_has_seen {
            self.processed.push(mark);
        }

        if self.check_unique {
            self.write_set.retain(|(_, t)| *t != txn);
            if let Some(new_t) = &new {
                let new_key_tuple = new_t.clone();
                let conflicting: Vec<TxnId> = self
                    .write_set
                    .iter()
                    .filter(|(t, other_txn)| {
                        *other_txn != txn && cmp(t, &new_key_tuple, &new_kd) == Ordering::Equal
                    })
                    .map(|(_, t)| *t)
                    .collect();
                for other in conflicting {
                    self.write_set.retain(|(_, t)| *t != other);
                    self.abort_writer(other);
                }
            }
        }
        self.in_flight[idx].3 = true;
        Ok(())
    }

    fn abort_writer(&mut self, txn: TxnId) {
        if let Some(i) = self.slot(txn) {
            self.in_flight.remove(i);
        }
        self.aborted.push(txn);
        debug!(target: "index_build", "{:?}: aborting writer txn {} on unique conflict", self.new_index.name(), txn);
    }

    /// **On commit** — unlink the statement trigger.
    pub fn on_commit(&mut self, txn: TxnId) {
        self.aborted.retain(|t| *t != txn);
        if let Some(i) = self.slot(txn) {
            self.in_flight.remove(i);
        }
    }

    /// **On rollback.**
    pub fn on_rollback(&mut self, txn: TxnId) -> Result<()> {
        self.aborted.retain(|t| *t != txn);
        let idx = match self.slot(txn) {
            Some(i) => i,
            None => return Ok(()),
        };
        let (_, old, new, before_commit_ran) = self.in_flight.remove(idx);
        if before_commit_ran {
            let new_kd = self.new_index.key_def().clone();
            if let Some(o) = &old {
                self.not_confirmed.dec(o, &new_kd);
            }
            self.new_index.replace(new.as_ref(), old.as_ref(), ReplaceMode::InsertOrReplace)?;
            if let Some(o) = &old {
                let conflicting: Vec<TxnId> = self
                    .write_set
                    .iter()
                    .filter(|(t, _)| cmp(t, o, &new_kd) == Ordering::Equal)
                    .map(|(_, t)| *t)
                    .collect();
                for other in conflicting {
                    self.abort_writer(other);
                }
            }
        } else {
            self.write_set.retain(|(_, t)| *t != txn);
        }
        Ok(())
    }

    /// A no-op for this in-memory engine; significant hook point for a
    /// disk-backed one.
    pub fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "index_build_test.rs"]
mod index_build_test;
