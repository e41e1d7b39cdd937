//! External interfaces: the already-decoded request object the VM compiles
//! statements against, plus the `Journal`/`Sequencer` collaborator traits.
//! Wire decoding and the journal/sequencer implementations themselves are
//! out of scope — these are the seams a caller plugs its own WAL and
//! sequence generator into.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Insert,
    Replace,
    Delete,
    Update,
    Upsert,
    Select,
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    Eq,
    Req,
    All,
    Gt,
    Ge,
    Lt,
    Le,
}

/// An already-decoded operation. The engine never parses wire bytes; it
/// receives this struct from whatever front end owns the protocol.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_type: RequestType,
    pub space_id: u32,
    pub index_id: u32,
    pub tuple: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub iterator: IteratorType,
    pub limit: Option<u32>,
    pub offset: u32,
    pub update_ops: Option<Vec<u8>>,
}

impl Request {
    pub fn select(space_id: u32, index_id: u32, key: Vec<u8>, iterator: IteratorType) -> Request {
        Request {
            request_type: RequestType::Select,
            space_id,
            index_id,
            tuple: None,
            key: Some(key),
            iterator,
            limit: None,
            offset: 0,
            update_ops: None,
        }
    }

    pub fn insert(space_id: u32, tuple: Vec<u8>) -> Request {
        Request {
            request_type: RequestType::Insert,
            space_id,
            index_id: 0,
            tuple: Some(tuple),
            key: None,
            iterator: IteratorType::Eq,
            limit: None,
            offset: 0,
            update_ops: None,
        }
    }
}

/// Durability collaborator: `journal_sync` yields until every submitted
/// write is durably flushed, `txn_limbo_flush` until in-flight
/// synchronous-replication transactions are confirmed or rolled back.
pub trait Journal {
    fn journal_sync(&self) -> Result<()>;
    fn txn_limbo_flush(&self) -> Result<()>;
}

/// `NextAutoincValue`'s collaborator.
pub trait Sequencer {
    fn next(&mut self, seq_id: u32) -> Result<i64>;
}
