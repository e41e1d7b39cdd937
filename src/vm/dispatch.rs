//! `step`: the one-opcode-at-a-time interpreter loop, plus the `Vm` struct
//! that owns the register file, cursor set, and frame stack.

use std::cmp::Ordering;

use crate::engine::EngineContext;
use crate::error::{Error, Result};
use crate::index::{IterType, ReplaceMode};
use crate::mem::{cast, column, make_record, Mem, Payload};
use crate::request::Sequencer;
use crate::tuple::{tuple_new, Tuple};
use crate::txn::Transaction;
use crate::vm::cursor::Cursor;
use crate::vm::opcode::{ArithOp, CompareFlags, CompareOp, Opcode, SavepointOp};

/// A saved sub-program context, pushed by `Gosub`/`Program` and restored by
/// `Return`: the caller's pc plus whichever registers the callee is allowed
/// to clobber.
pub struct Frame {
    pub return_pc: usize,
    pub saved_regs: Vec<Mem>,
    pub first_reg: usize,
}

pub enum StepOutcome {
    Continue,
    ResultRow(Vec<Mem>),
    Halted { rc: i32, message: Option<String> },
}

pub struct Vm<'e> {
    pub engine: &'e mut EngineContext,
    program: Vec<Opcode>,
    pc: usize,
    regs: Vec<Mem>,
    variables: Vec<Mem>,
    cursors: Vec<Option<Cursor>>,
    frames: Vec<Frame>,
    once_flags: Vec<bool>,
    last_compare: Option<Ordering>,
    last_permute: Option<Vec<usize>>,
    fk_immediate: i64,
    fk_deferred: i64,
    pub txn: Transaction,
    savepoint_marks: std::collections::HashMap<Option<String>, usize>,
    sequencer: Option<&'e mut dyn Sequencer>,
    halted: bool,
}

impl<'e> Vm<'e> {
    pub fn new(engine: &'e mut EngineContext, program: Vec<Opcode>, n_regs: usize) -> Vm<'e> {
        let once_flags = program
            .iter()
            .filter(|op| matches!(op, Opcode::Once { .. }))
            .count();
        Vm {
            engine,
            program,
            pc: 0,
            regs: (0..n_regs).map(|_| Mem::null()).collect(),
            variables: Vec::new(),
            cursors: Vec::new(),
            frames: Vec::new(),
            once_flags: vec![false; once_flags.max(1)],
            last_compare: None,
            last_permute: None,
            fk_immediate: 0,
            fk_deferred: 0,
            txn: Transaction::new(),
            savepoint_marks: std::collections::HashMap::new(),
            sequencer: None,
            halted: false,
        }
    }

    pub fn with_sequencer(mut self, sequencer: &'e mut dyn Sequencer) -> Vm<'e> {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn bind(&mut self, variables: Vec<Mem>) {
        self.variables = variables;
    }

    pub fn reg(&self, i: usize) -> &Mem {
        &self.regs[i]
    }

    fn reg_mut(&mut self, i: usize) -> &mut Mem {
        if i >= self.regs.len() {
            self.regs.resize_with(i + 1, Mem::null);
        }
        &mut self.regs[i]
    }

    fn cursor_mut(&mut self, c: usize) -> Result<&mut Cursor> {
        self.cursors
            .get_mut(c)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::InternalError(format!("cursor {} is not open", c)))
    }

    fn set_cursor(&mut self, c: usize, cursor: Cursor) {
        if c >= self.cursors.len() {
            self.cursors.resize_with(c + 1, || None);
        }
        self.cursors[c] = Some(cursor);
    }

    /// Run until the next `ResultRow`, `Halt`, or the program falls off the
    /// end (implicit halt with `rc = 0`).
    pub fn run(&mut self) -> Result<StepOutcome> {
        loop {
            match self.step()? {
                StepOutcome::Continue => {
                    if self.pc >= self.program.len() {
                        self.halted = true;
                        return Ok(StepOutcome::Halted { rc: 0, message: None });
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// Execute exactly one opcode, advancing `pc` (except for jumps, which
    /// set it explicitly).
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.halted {
            return Ok(StepOutcome::Halted { rc: 0, message: None });
        }
        let op = self.program[self.pc].clone();
        let mut next_pc = self.pc + 1;

        macro_rules! jump {
            ($target:expr) => {{
                next_pc = $target;
            }};
        }

        match op {
            Opcode::Init { target } => jump!(target),
            Opcode::Goto { target } => jump!(target),
            Opcode::Halt { rc, message } => {
                self.halted = true;
                return Ok(StepOutcome::Halted { rc, message });
            }
            Opcode::HaltIfNull { reg, target, rc } => {
                if self.reg(reg).is_null() {
                    self.halted = true;
                    return Ok(StepOutcome::Halted {
                        rc,
                        message: Some(format!("NOT NULL constraint failed at register {}", reg)),
                    });
                }
                jump!(target)
            }
            Opcode::Once { flag, target } => {
                if self.once_flags.get(flag).copied().unwrap_or(false) {
                    jump!(target)
                } else {
                    if flag >= self.once_flags.len() {
                        self.once_flags.resize(flag + 1, false);
                    }
                    self.once_flags[flag] = true;
                }
            }
            Opcode::If { reg, target, jump_if_null } => {
                let m = self.reg(reg);
                if m.is_null() {
                    if jump_if_null {
                        jump!(target)
                    }
                } else if m.as_f64().map(|v| v != 0.0).unwrap_or(false) {
                    jump!(target)
                }
            }
            Opcode::IfNot { reg, target, jump_if_null } => {
                let m = self.reg(reg);
                if m.is_null() {
                    if jump_if_null {
                        jump!(target)
                    }
                } else if !m.as_f64().map(|v| v != 0.0).unwrap_or(false) {
                    jump!(target)
                }
            }
            Opcode::IsNull { reg, target } => {
                if self.reg(reg).is_null() {
                    jump!(target)
                }
            }
            Opcode::NotNull { reg, target } => {
                if !self.reg(reg).is_null() {
                    jump!(target)
                }
            }
            Opcode::IfPos { reg, target, decrement_by } => {
                let v = self.reg(reg).as_i64().unwrap_or(0);
                if v > 0 {
                    *self.reg_mut(reg) = Mem::int(v - decrement_by);
                    jump!(target)
                }
            }
            Opcode::IfNotZero { reg, target } => {
                let v = self.reg(reg).as_i64().unwrap_or(0);
                if v != 0 {
                    *self.reg_mut(reg) = Mem::int(v - 1);
                    jump!(target)
                }
            }
            Opcode::DecrJumpZero { reg, target } => {
                let v = self.reg(reg).as_i64().unwrap_or(0) - 1;
                *self.reg_mut(reg) = Mem::int(v);
                if v == 0 {
                    jump!(target)
                }
            }
            Opcode::Jump { lt, eq, gt } => match self.last_compare {
                Some(Ordering::Less) => jump!(lt),
                Some(Ordering::Equal) => jump!(eq),
                Some(Ordering::Greater) => jump!(gt),
                None => return Err(Error::InternalError("Jump with no prior Compare".into())),
            },

            Opcode::InitCoroutine { reg, start, target_if_empty } => {
                *self.reg_mut(reg) = Mem::int(start as i64);
                let _ = target_if_empty;
            }
            Opcode::Yield { reg } => {
                let target = self.reg(reg).as_i64().unwrap_or(0) as usize;
                *self.reg_mut(reg) = Mem::int(next_pc as i64);
                jump!(target)
            }
            Opcode::EndCoroutine { reg } => {
                let target = self.reg(reg).as_i64().unwrap_or(0) as usize;
                jump!(target)
            }
            Opcode::Gosub { reg, target } => {
                *self.reg_mut(reg) = Mem::int(next_pc as i64);
                jump!(target)
            }
            Opcode::Return { reg } => {
                let target = self.reg(reg).as_i64().unwrap_or(0) as usize;
                jump!(target)
            }

            Opcode::Program { first_reg, n_regs, target } => {
                let saved = self.regs[first_reg..first_reg + n_regs].to_vec();
                self.frames.push(Frame { return_pc: next_pc, saved_regs: saved, first_reg });
                jump!(target)
            }
            Opcode::Param { reg, param_no } => {
                let v = self
                    .variables
                    .get(param_no as usize)
                    .cloned()
                    .unwrap_or_else(Mem::null);
                *self.reg_mut(reg) = v;
            }

            Opcode::Integer { value, dst } => *self.reg_mut(dst) = Mem::int(value),
            Opcode::Bool { value, dst } => *self.reg_mut(dst) = Mem::boolean(value),
            Opcode::Real { value, dst } => *self.reg_mut(dst) = Mem::real(value),
            Opcode::String { value, dst } => *self.reg_mut(dst) = Mem::owned_str(value),
            Opcode::Blob { value, dst } => *self.reg_mut(dst) = Mem::owned_blob(value),
            Opcode::Null { first, last } => {
                for r in first..=last {
                    self.reg_mut(r).release();
                }
            }
            Opcode::SoftNull { reg } => self.reg_mut(reg).release(),
            Opcode::Variable { idx, dst } => {
                let v = self.variables.get(idx).cloned().unwrap_or_else(Mem::null);
                *self.reg_mut(dst) = v;
            }
            Opcode::Move { src, dst, count } => {
                for i in 0..count {
                    let mut tmp = std::mem::replace(&mut self.regs[src + i], Mem::null());
                    self.regs[dst + i].move_from(&mut tmp);
                }
            }
            Opcode::Copy { src, dst, count } => {
                for i in 0..count {
                    let v = self.reg(src + i).clone();
                    self.reg_mut(dst + i).copy_from(&v);
                }
            }
            Opcode::SCopy { src, dst } => {
                let v = self.reg(src).clone();
                self.reg_mut(dst).copy_from(&v);
            }
            Opcode::IntCopy { src, dst } => {
                let v = self.reg(src).as_i64().unwrap_or(0);
                *self.reg_mut(dst) = Mem::int(v);
            }
            Opcode::Cast { reg, cast_type } => {
                let v = cast(self.reg(reg), cast_type);
                *self.reg_mut(reg) = v;
            }

            Opcode::Arith { op, lhs, rhs, dst } => {
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                let v = if a.is_null() || b.is_null() {
                    Mem::null()
                } else {
                    arith(op, a, b)?
                };
                *self.reg_mut(dst) = v;
            }
            Opcode::Not { reg, dst } => {
                let v = self.reg(reg);
                let out = if v.is_null() {
                    Mem::null()
                } else {
                    Mem::boolean(!v.as_f64().map(|f| f != 0.0).unwrap_or(false))
                };
                *self.reg_mut(dst) = out;
            }
            Opcode::BitNot { reg, dst } => {
                let v = self.reg(reg);
                let out = if v.is_null() {
                    Mem::null()
                } else {
                    Mem::int(!v.as_i64().unwrap_or(0))
                };
                *self.reg_mut(dst) = out;
            }
            Opcode::AddImm { reg, imm } => {
                let v = self.reg(reg).as_i64().unwrap_or(0) + imm;
                *self.reg_mut(reg) = Mem::int(v);
            }
            Opcode::MustBeInt { reg, on_fail } => {
                let m = self.reg(reg);
                match m.as_i64() {
                    Some(v) if m.as_f64() == Some(v as f64) => *self.reg_mut(reg) = Mem::int(v),
                    _ => match on_fail {
                        Some(target) => jump!(target),
                        None => return Err(Error::Mismatch),
                    },
                }
            }
            Opcode::RealAffinity { reg } => {
                if let Some(v) = self.reg(reg).as_f64() {
                    *self.reg_mut(reg) = Mem::real(v);
                }
            }

            Opcode::Compare2 { op, lhs, rhs, target, flags, store_p2 } => {
                let a = self.reg(lhs);
                let b = self.reg(rhs);
                let result = compare_scalar(op, a, b, flags);
                match result {
                    None => {
                        if flags == CompareFlags::Jumpifnull {
                            jump!(target)
                        }
                        if store_p2 {
                            *self.reg_mut(target) = Mem::null();
                        }
                    }
                    Some(true) => {
                        if store_p2 {
                            *self.reg_mut(target) = Mem::boolean(true);
                        } else {
                            jump!(target)
                        }
                    }
                    Some(false) => {
                        if store_p2 {
                            *self.reg_mut(target) = Mem::boolean(false);
                        }
                    }
                }
            }
            Opcode::ElseNotEq { target } => {
                if self.last_compare != Some(Ordering::Equal) {
                    jump!(target)
                }
            }
            Opcode::Compare { start_a, start_b, n, permute } => {
                let order: Vec<usize> = if permute {
                    self.last_permute.clone().unwrap_or_else(|| (0..n).collect())
                } else {
                    self.last_permute = None;
                    (0..n).collect()
                };
                let mut result = Ordering::Equal;
                for &i in &order {
                    let a = self.reg(start_a + i);
                    let b = self.reg(start_b + i);
                    result = mem_ordering(a, b);
                    if result != Ordering::Equal {
                        break;
                    }
                }
                self.last_compare = Some(result);
            }
            Opcode::Permutation { order } => self.last_permute = Some(order),
            Opcode::Affinity { start, n, affinity } => {
                for i in 0..n {
                    if let Some(a) = affinity.get(i) {
                        let v = cast(self.reg(start + i), *a);
                        *self.reg_mut(start + i) = v;
                    }
                }
            }

            Opcode::MakeRecord { start, n, dst, affinity, is_ephemeral } => {
                let mems: Vec<Mem> = (0..n).map(|i| self.reg(start + i).clone()).collect();
                let raw = make_record(&mems, &affinity);
                *self.reg_mut(dst) = Mem::msgpack_blob(raw);
                let _ = is_ephemeral;
            }
            Opcode::Column { cursor, field_no, dst, default } => {
                let default_mem = default.map(|r| self.reg(r).clone());
                let cur = self.cursor_mut(cursor)?;
                let v = match cur.current() {
                    Some(t) => column(t, field_no, default_mem.as_ref()),
                    None => default_mem.unwrap_or_else(Mem::null),
                };
                *self.reg_mut(dst) = v;
            }

            Opcode::OpenRead { cursor, space_id, iid } | Opcode::OpenWrite { cursor, space_id, iid } => {
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                let is_write = matches!(op, Opcode::OpenWrite { .. });
                self.set_cursor(cursor, Cursor::open_index(space, iid, is_write));
            }
            Opcode::ReopenIdx { cursor, space_id, iid } => {
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                self.set_cursor(cursor, Cursor::open_index(space, iid, false));
            }
            Opcode::SidToPtr { space_id, dst } => {
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                *self.reg_mut(dst) = Mem::uint(space.borrow().id() as u64);
            }
            Opcode::OpenTEphemeral { cursor, n_col: _ } => {
                self.set_cursor(cursor, Cursor::open_ephemeral(Vec::new()));
            }
            Opcode::OpenPseudo { cursor, reg } => {
                self.set_cursor(cursor, Cursor::open_pseudo(reg));
            }
            Opcode::SorterOpen { cursor } => {
                self.set_cursor(cursor, Cursor::open_ephemeral(Vec::new()));
            }
            Opcode::Close { cursor } => {
                if let Some(slot) = self.cursors.get_mut(cursor) {
                    *slot = None;
                }
            }

            Opcode::Rewind { cursor, target_if_empty } => {
                if !self.cursor_mut(cursor)?.rewind()? {
                    jump!(target_if_empty)
                }
            }
            Opcode::Last { cursor, target_if_empty } => {
                if !self.cursor_mut(cursor)?.last()? {
                    jump!(target_if_empty)
                }
            }
            Opcode::Next { cursor, target } | Opcode::NextIfOpen { cursor, target } => {
                let is_open = matches!(op, Opcode::Next { .. }) || self.cursors.get(cursor).map(|c| c.is_some()).unwrap_or(false);
                if is_open && self.cursor_mut(cursor)?.next()? {
                    jump!(target)
                }
            }
            Opcode::Prev { cursor, target } | Opcode::PrevIfOpen { cursor, target } => {
                let is_open = matches!(op, Opcode::Prev { .. }) || self.cursors.get(cursor).map(|c| c.is_some()).unwrap_or(false);
                if is_open && self.cursor_mut(cursor)?.prev()? {
                    jump!(target)
                }
            }
            Opcode::SorterSort { cursor, target_if_empty } => {
                if !self.cursor_mut(cursor)?.rewind()? {
                    jump!(target_if_empty)
                }
            }
            Opcode::SorterNext { cursor, target } => {
                if self.cursor_mut(cursor)?.next()? {
                    jump!(target)
                }
            }
            Opcode::SequenceTest { cursor, target } => {
                if self.cursor_mut(cursor)?.current().is_some() {
                    jump!(target)
                }
            }
            Opcode::SeekGe { cursor, key, n, target_if_miss }
            | Opcode::SeekGt { cursor, key, n, target_if_miss }
            | Opcode::SeekLe { cursor, key, n, target_if_miss }
            | Opcode::SeekLt { cursor, key, n, target_if_miss } => {
                let itype = match op {
                    Opcode::SeekGe { .. } => IterType::Ge,
                    Opcode::SeekGt { .. } => IterType::Gt,
                    Opcode::SeekLe { .. } => IterType::Le,
                    _ => IterType::Lt,
                };
                let key_raw = self.reg(key).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                if !self.cursor_mut(cursor)?.seek(itype, &key_raw, n)? {
                    jump!(target_if_miss)
                }
            }
            Opcode::NoConflict { cursor, key, n, target } => {
                let key_raw = self.reg(key);
                if key_raw.is_null() {
                    jump!(target)
                } else {
                    let raw = key_raw.as_blob().map(|b| b.to_vec()).unwrap_or_default();
                    if !self.cursor_mut(cursor)?.seek(IterType::Eq, &raw, n)? {
                        jump!(target)
                    }
                }
            }
            Opcode::NotFound { cursor, key, n, target } => {
                let raw = self.reg(key).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                if !self.cursor_mut(cursor)?.seek(IterType::Eq, &raw, n)? {
                    jump!(target)
                }
            }
            Opcode::Found { cursor, key, n, target } => {
                let raw = self.reg(key).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                if self.cursor_mut(cursor)?.seek(IterType::Eq, &raw, n)? {
                    jump!(target)
                }
            }

            Opcode::Delete { cursor } => {
                let current = self.cursor_mut(cursor)?.current().cloned();
                if let Some(old) = current {
                    self.cursor_mut(cursor)?.mutate(Some(&old), None, ReplaceMode::Replace)?;
                }
            }
            Opcode::IdxInsert { cursor, reg } => {
                let raw = self.reg(reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let new = tuple_new(cursor_format(self, cursor)?, raw)?;
                self.cursor_mut(cursor)?.mutate(None, Some(&new), ReplaceMode::Insert)?;
            }
            Opcode::IdxReplace { cursor, reg } => {
                let raw = self.reg(reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let new = tuple_new(cursor_format(self, cursor)?, raw)?;
                self.cursor_mut(cursor)?.mutate(None, Some(&new), ReplaceMode::InsertOrReplace)?;
            }
            Opcode::SorterInsert { cursor, reg } => {
                let raw = self.reg(reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let new = tuple_new(cursor_format(self, cursor)?, raw)?;
                self.cursor_mut(cursor)?.mutate(None, Some(&new), ReplaceMode::InsertOrReplace)?;
            }
            Opcode::IdxDelete { cursor, reg } => {
                let raw = self.reg(reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let old = tuple_new(cursor_format(self, cursor)?, raw)?;
                self.cursor_mut(cursor)?.mutate(Some(&old), None, ReplaceMode::Replace)?;
            }
            Opcode::SInsert { space_id, key_reg: _, reg } => {
                let raw = self.reg(reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                let fmt = space.borrow().format.clone();
                let t = tuple_new(fmt, raw)?;
                space
                    .borrow_mut()
                    .replace(None, Some(&t), ReplaceMode::InsertOrReplace)?;
            }
            Opcode::SDelete { space_id, key_reg } => {
                let key_raw = self.reg(key_reg).as_blob().map(|b| b.to_vec()).unwrap_or_default();
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                let found = {
                    let s = space.borrow();
                    let kd = s.primary_key_def().clone();
                    s.index(0)?.find_by_key(&key_raw, kd.part_count())?
                };
                if let Some(old) = found {
                    space
                        .borrow_mut()
                        .replace(Some(&old), None, ReplaceMode::Replace)?;
                }
            }
            Opcode::Clear { space_id } => {
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                let all: Vec<Tuple> = {
                    let s = space.borrow();
                    let mut it = s.index(0)?.iterator(IterType::All, None, 0)?;
                    let mut rows = Vec::new();
                    while let Some(t) = it.next()? {
                        rows.push(t);
                    }
                    rows
                };
                let mut s = space.borrow_mut();
                for t in all {
                    s.replace(Some(&t), None, ReplaceMode::Replace)?;
                }
            }

            Opcode::TransactionBegin => {}
            Opcode::TransactionCommit => {
                self.txn.commit_with_warn(self.engine.config().slow_statement_warn_ms)?
            }
            Opcode::TransactionRollback => self.txn.rollback()?,
            Opcode::TTransaction => {}
            Opcode::Savepoint { op, name } => match op {
                SavepointOp::Begin => {
                    let idx = self.txn.savepoint(name.clone());
                    self.savepoint_marks.insert(name, idx);
                }
                SavepointOp::Release => {
                    let sp = self.savepoint_marks.remove(&name).ok_or_else(|| {
                        Error::InternalError(format!("no such savepoint {:?}", name))
                    })?;
                    self.txn.release_savepoint(sp);
                }
                SavepointOp::Rollback => {
                    let sp = *self.savepoint_marks.get(&name).ok_or_else(|| {
                        Error::InternalError(format!("no such savepoint {:?}", name))
                    })?;
                    self.txn.rollback_to_savepoint(sp)?;
                }
            },

            Opcode::FkCounter { deferred, delta } => {
                if deferred {
                    self.fk_deferred += delta;
                } else {
                    self.fk_immediate += delta;
                }
            }
            Opcode::FkIfZero { deferred, target } => {
                let v = if deferred { self.fk_deferred } else { self.fk_immediate };
                if v == 0 {
                    jump!(target)
                }
            }

            Opcode::AggStep0 { acc, arg } => {
                self.reg_mut(acc).copy_from(&Mem::null());
                let _ = arg;
            }
            Opcode::AggStep { acc, arg } => {
                let v = self.reg(arg).as_f64();
                let accv = self.reg(acc).as_f64().unwrap_or(0.0);
                if let Some(v) = v {
                    *self.reg_mut(acc) = Mem::real(accv + v);
                }
            }
            Opcode::AggFinal { acc, dst } => {
                let v = self.reg(acc).clone();
                *self.reg_mut(dst) = v;
            }

            Opcode::ParseSchema2
            | Opcode::ParseSchema3
            | Opcode::RenameTable { .. }
            | Opcode::DropTrigger { .. }
            | Opcode::LoadAnalysis
            | Opcode::IncMaxid
            | Opcode::NextSequenceId { .. }
            | Opcode::NextIdEphemeral { .. } => {
                return Err(Error::Unsupported(
                    "schema catalog maintenance is outside this engine's core scope".into(),
                ))
            }
            Opcode::DropTable { space_id } => {
                let space = self.engine.cache().get(space_id);
                self.engine.cache_mut().cache_replace(space, None)?;
            }
            Opcode::DropIndex { space_id, iid } => {
                if iid == 0 {
                    return Err(Error::InvalidAlter("cannot drop the primary index".into()));
                }
                let space = self
                    .engine
                    .cache()
                    .get(space_id)
                    .ok_or_else(|| Error::NoSuchSpace(space_id.to_string()))?;
                let mut s = space.borrow_mut();
                let indexes = s.indexes_mut();
                if (iid as usize) < indexes.len() {
                    indexes.remove(iid as usize);
                }
            }
            Opcode::NextAutoincValue { space_id, dst } => match &mut self.sequencer {
                Some(seq) => {
                    let v = seq.next(space_id)?;
                    *self.reg_mut(dst) = Mem::int(v);
                }
                None => return Err(Error::Unsupported("no sequencer bound to this VM".into())),
            },

            Opcode::ResultRow { start, n } => {
                let row: Vec<Mem> = (0..n).map(|i| self.reg(start + i).clone()).collect();
                self.pc = next_pc;
                return Ok(StepOutcome::ResultRow(row));
            }
            Opcode::Noop => {}
        }

        self.pc = next_pc;
        Ok(StepOutcome::Continue)
    }

}

fn cursor_format(vm: &mut Vm<'_>, cursor: usize) -> Result<std::sync::Arc<crate::tuple::TupleFormat>> {
    let (space, _) = vm.cursor_mut(cursor)?.index_space()?;
    let fmt = space.borrow().format.clone();
    Ok(fmt)
}

fn arith(op: ArithOp, a: &Mem, b: &Mem) -> Result<Mem> {
    let both_int = matches!(a.payload(), Payload::Int(_) | Payload::UInt(_) | Payload::Bool(_))
        && matches!(b.payload(), Payload::Int(_) | Payload::UInt(_) | Payload::Bool(_));
    if both_int && matches!(op, ArithOp::Add | ArithOp::Subtract | ArithOp::Multiply) {
        let x = a.as_i64().unwrap_or(0);
        let y = b.as_i64().unwrap_or(0);
        let checked = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Subtract => x.checked_sub(y),
            ArithOp::Multiply => x.checked_mul(y),
            _ => unreachable!(),
        };
        if let Some(v) = checked {
            return Ok(Mem::int(v));
        }
        // overflow: fall through to floating point
    }
    let x = a.as_f64().ok_or(Error::Mismatch)?;
    let y = b.as_f64().ok_or(Error::Mismatch)?;
    let v = match op {
        ArithOp::Add => x + y,
        ArithOp::Subtract => x - y,
        ArithOp::Multiply => x * y,
        ArithOp::Divide => {
            if y == 0.0 {
                return Ok(Mem::null());
            }
            let r = x / y;
            if r.is_nan() {
                return Ok(Mem::null());
            }
            r
        }
        ArithOp::Remainder => {
            let xi = a.as_i64().ok_or(Error::Mismatch)?;
            let yi = b.as_i64().ok_or(Error::Mismatch)?;
            if yi == 0 {
                return Ok(Mem::null());
            }
            return Ok(Mem::int(xi % yi));
        }
        ArithOp::BitAnd => return Ok(Mem::int(a.as_i64().unwrap_or(0) & b.as_i64().unwrap_or(0))),
        ArithOp::BitOr => return Ok(Mem::int(a.as_i64().unwrap_or(0) | b.as_i64().unwrap_or(0))),
        ArithOp::ShiftLeft => return Ok(Mem::int(a.as_i64().unwrap_or(0) << b.as_i64().unwrap_or(0))),
        ArithOp::ShiftRight => return Ok(Mem::int(a.as_i64().unwrap_or(0) >> b.as_i64().unwrap_or(0))),
        ArithOp::And => {
            return Ok(Mem::boolean(
                a.as_f64().map(|v| v != 0.0).unwrap_or(false) && b.as_f64().map(|v| v != 0.0).unwrap_or(false),
            ))
        }
        ArithOp::Or => {
            return Ok(Mem::boolean(
                a.as_f64().map(|v| v != 0.0).unwrap_or(false) || b.as_f64().map(|v| v != 0.0).unwrap_or(false),
            ))
        }
    };
    Ok(Mem::real(v))
}

fn mem_ordering(a: &Mem, b: &Mem) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn compare_scalar(op: CompareOp, a: &Mem, b: &Mem, flags: CompareFlags) -> Option<bool> {
    if a.is_null() || b.is_null() {
        return if flags == CompareFlags::Nulleq && op == CompareOp::Eq {
            Some(a.is_null() && b.is_null())
        } else {
            None
        };
    }
    let ord = mem_ordering(a, b);
    Some(match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    })
}
