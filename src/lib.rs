//! An in-memory tuple store: typed tuples grouped into spaces, each space
//! carrying one or more indexes behind a pluggable vtable (tree, AVL,
//! R-tree, hash-via-blackhole), a versioned cache of space handles that
//! readers can pin across a schema alter, an online concurrent index
//! builder, and a register-based bytecode VM that drives reads and writes
//! against all of the above.
//!
//! Tuples carry no on-disk representation here — everything lives in
//! memory for the lifetime of the process, just without ever touching a
//! log or a file.

mod config;
mod engine;
mod error;
mod fkey;
mod index_build;
mod mem;
mod request;
mod txn;

pub mod index;
pub mod space;
pub mod tuple;
pub mod vm;

pub use config::EngineConfig;
pub use engine::{EngineContext, RecoveryState};
pub use error::{Error, FkFieldError, Result};
pub use fkey::{ForeignKeyConstraint, KeyMapping};
pub use index::{IndexIter, IndexVtab, IterType, ReplaceMode};
pub use index_build::IndexBuildCtx;
pub use mem::{Mem, Payload};
pub use request::{IteratorType, Journal, Request, RequestType, Sequencer};
pub use space::cache::{Holder, HolderType, SpaceCache};
pub use space::{Space, SpaceDef};
pub use tuple::{tuple_new, FieldDef, FieldType, KeyDef, KeyPart, Tuple, TupleFormat};
pub use txn::{Savepoint, Statement, Transaction};
pub use vm::{Cursor, Opcode, StepOutcome, Vm};
