//! Transaction statement triggers: `on_commit`/`on_rollback`/`before_commit`
//! registries plus savepoints, the hook points the alter orchestrator and
//! the online index builder both attach to.

use std::time::Instant;

use log::warn;

use crate::error::Result;

pub type TxnHook = Box<dyn FnMut() -> Result<()>>;

/// One DML statement's trigger set. A statement belongs to exactly one
/// `Transaction`; triggers are cleared by the owning transaction on commit
/// or rollback, never freed individually (mirrors the "triggers live in the
/// transaction arena" design note).
#[derive(Default)]
pub struct Statement {
    before_commit: Vec<TxnHook>,
    on_commit: Vec<TxnHook>,
    on_rollback: Vec<TxnHook>,
}

impl Statement {
    pub fn new() -> Statement {
        Statement::default()
    }

    pub fn on_before_commit(&mut self, hook: TxnHook) {
        self.before_commit.push(hook);
    }
    pub fn on_commit(&mut self, hook: TxnHook) {
        self.on_commit.push(hook);
    }
    pub fn on_rollback(&mut self, hook: TxnHook) {
        self.on_rollback.push(hook);
    }

    pub fn run_before_commit(&mut self) -> Result<()> {
        for hook in self.before_commit.iter_mut() {
            hook()?;
        }
        Ok(())
    }
    pub fn run_commit(&mut self) -> Result<()> {
        for hook in self.on_commit.iter_mut() {
            hook()?;
        }
        Ok(())
    }
    pub fn run_rollback(&mut self) -> Result<()> {
        for hook in self.on_rollback.iter_mut() {
            hook()?;
        }
        Ok(())
    }
}

/// A named (or anonymous) point in a transaction; `rollback_to` discards
/// every statement issued after it and re-runs their `on_rollback` hooks in
/// reverse issue order.
pub struct Savepoint {
    pub name: Option<String>,
    stmt_mark: usize,
}

/// One transaction: an ordered list of statements plus its own
/// commit/rollback hooks (used by the alter orchestrator: `on_commit =
/// alter_space_commit`, `on_rollback = alter_space_rollback`).
#[derive(Default)]
pub struct Transaction {
    statements: Vec<Statement>,
    savepoints: Vec<Savepoint>,
    on_commit: Vec<TxnHook>,
    on_rollback: Vec<TxnHook>,
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction::default()
    }

    pub fn begin_statement(&mut self) -> usize {
        self.statements.push(Statement::new());
        self.statements.len() - 1
    }

    pub fn statement_mut(&mut self, idx: usize) -> &mut Statement {
        &mut self.statements[idx]
    }

    pub fn on_commit(&mut self, hook: TxnHook) {
        self.on_commit.push(hook);
    }
    pub fn on_rollback(&mut self, hook: TxnHook) {
        self.on_rollback.push(hook);
    }

    pub fn savepoint(&mut self, name: Option<String>) -> usize {
        let mark = self.statements.len();
        self.savepoints.push(Savepoint { name, stmt_mark: mark });
        self.savepoints.len() - 1
    }

    /// Run the `on_rollback` hook of every statement issued since `sp`, in
    /// reverse (most recent first), and discard them.
    pub fn rollback_to_savepoint(&mut self, sp: usize) -> Result<()> {
        let mark = self.savepoints[sp].stmt_mark;
        while self.statements.len() > mark {
            let mut stmt = self.statements.pop().unwrap();
            stmt.run_rollback()?;
        }
        self.savepoints.truncate(sp);
        Ok(())
    }

    pub fn release_savepoint(&mut self, sp: usize) {
        self.savepoints.truncate(sp);
    }

    /// Run every statement's `before_commit`, then `on_commit`, in
    /// statement-issue order, then the transaction's own `on_commit` hooks.
    pub fn commit(&mut self) -> Result<()> {
        self.commit_with_warn(None)
    }

    /// As [`Transaction::commit`], additionally logging a warning for any
    /// single statement whose trigger chain runs longer than `warn_ms`. Two
    /// passes are kept distinct (all `before_commit` hooks run before any
    /// `on_commit` hook) so a validator like the index builder sees every
    /// statement's pre-commit state before any statement's mutation lands.
    pub fn commit_with_warn(&mut self, warn_ms: Option<u64>) -> Result<()> {
        let mut elapsed_ms = vec![0u64; self.statements.len()];
        for (i, stmt) in self.statements.iter_mut().enumerate() {
            let start = Instant::now();
            stmt.run_before_commit()?;
            elapsed_ms[i] = start.elapsed().as_millis() as u64;
        }
        for (i, stmt) in self.statements.iter_mut().enumerate() {
            let start = Instant::now();
            stmt.run_commit()?;
            elapsed_ms[i] += start.elapsed().as_millis() as u64;
            if let Some(threshold) = warn_ms {
                if elapsed_ms[i] > threshold {
                    warn!(target: "txn", "statement {} triggers took {}ms (> {}ms)", i, elapsed_ms[i], threshold);
                }
            }
        }
        for hook in self.on_commit.iter_mut() {
            hook()?;
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        for stmt in self.statements.iter_mut().rev() {
            stmt.run_rollback()?;
        }
        for hook in self.on_rollback.iter_mut() {
            hook()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "txn_test.rs"]
mod txn_test;
