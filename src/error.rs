//! Error taxonomy shared by every subsystem in this crate.
//!
//! One flat enum, rather than an error-per-module hierarchy: callers that
//! bridge into a network protocol or a WAL need a single type to map onto
//! their own wire-level status codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Structured attributes carried by foreign-key failures, mirroring the
/// `name`/`field_path`/`field_id` triple the constraint layer raises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkFieldError {
    pub name: String,
    pub field_path: String,
    pub field_id: u32,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("memory allocation failed")]
    MemoryIssue,

    #[error("duplicate key for index {index_name:?}")]
    DuplicateKey {
        index_name: String,
        dup_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },

    #[error("tuple not found")]
    NotFound,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("foreign key {0:?} failed: {1:?}")]
    FieldForeignKeyFailed(String, FkFieldError),

    #[error("complex foreign key {0:?} failed: {1:?}")]
    ComplexForeignKeyFailed(String, FkFieldError),

    #[error("foreign key integrity violation on {0:?}")]
    ForeignKeyIntegrity(String),

    #[error("fiber was cancelled")]
    FiberIsCancelled,

    #[error("transaction aborted by a concurrent index build on {0:?}")]
    TransactionConflict(String),

    #[error("injected fault: {0}")]
    Injection(String),

    #[error("lossy conversion while casting to the requested type")]
    Mismatch,

    #[error("internal invariant violation: {0}")]
    InternalError(String),

    #[error("malformed msgpack data: {0}")]
    DecodeError(String),

    #[error("key def / tuple format mismatch: {0}")]
    FormatMismatch(String),

    #[error("space {0:?} not found")]
    NoSuchSpace(String),

    #[error("index {0} not found on space {1:?}")]
    NoSuchIndex(u32, String),

    #[error("invalid alter operation: {0}")]
    InvalidAlter(String),
}

impl Error {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. })
    }
}
