//! # Lodecoin chain database
//!
//! Durable chain storage: an in-memory block-index tree backed by a
//! transactional store, the UTXO set, and append-only flat files holding
//! raw blocks and undo records.
//!
//! The store commit is the linearization point of every state change; a
//! crash at any moment leaves the database at its previous tip, with at
//! worst unreachable trailing bytes in the active flat file.

mod chaindb;
mod entry;
mod store;

pub use chaindb::ChainDb;
pub use entry::{ChainEntry, EntryId};
pub use store::{Column, ReadTxn, Store, WriteTxn};

use lodecoin_primitives::codec;

/// Chain database failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying key-value store failure. The in-flight transaction is
    /// aborted; in-memory state is untouched.
    #[error("storage error: {0}")]
    Store(#[from] rocksdb::Error),

    /// Flat-file or directory I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record failed to parse.
    #[error("decode error: {0}")]
    Decode(#[from] codec::Error),

    /// A structural invariant does not hold; the store is corrupted (or
    /// the caller violated the tip discipline).
    #[error("chain database is corrupted: {0}")]
    Corrupted(&'static str),

    /// The active flat file does not end where the store says it should.
    #[error("flat file {file} has size {actual}, expected {expected}")]
    FileSizeMismatch {
        file: i32,
        expected: u64,
        actual: u64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
