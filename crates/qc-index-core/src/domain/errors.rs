//! Error types for the indexing substrate.

use thiserror::Error;

/// Errors raised by the fixed-width and simple tries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A primary key's bit length did not match the trie's fixed width `S`.
    #[error("primary key of {actual} bits does not match required width of {expected} bits")]
    WrongPrimaryWidth { expected: usize, actual: usize },

    /// `insert_unique` found the (primary, secondary) bucket already occupied.
    #[error("bucket already holds a value for this (primary, secondary) key")]
    BucketOccupied,

    /// An operation was attempted against a store that was never started.
    #[error("store has not been started")]
    NotStarted,

    /// `BlockIndex::store` found the hash already present in the unique index.
    #[error("block index already holds an entry for this hash")]
    DuplicateHash,
}

/// Errors raised by the slab allocator and its backing file.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The backing file could not be grown to the requested size.
    #[error("failed to grow backing file to {requested} bytes: {source}")]
    GrowFailed {
        requested: u64,
        #[source]
        source: std::io::Error,
    },

    /// A position was requested past the allocator's logical size.
    #[error("position {position} is out of bounds (logical size {size})")]
    OutOfBounds { position: u64, size: u64 },

    /// `allocate`/`get` called before `create`/`start`.
    #[error("allocator has not been started")]
    NotStarted,

    /// Underlying I/O failure (header read/write, mmap, flush).
    #[error("allocator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by record codecs and record stores.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A transaction's serialized length does not fit in 32 bits.
    #[error("transaction serialized size {0} exceeds u32::MAX")]
    TransactionTooLarge(u64),

    /// The allocator backing this record store failed.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    /// A record's bytes were shorter than its declared layout required.
    #[error("record truncated: needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },
}

/// Aggregate error type for callers that cross module boundaries.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    #[error(transparent)]
    Record(#[from] RecordError),
}
