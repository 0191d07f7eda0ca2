//! # Index Core
//!
//! In-memory indexing substrate for locating block, transaction, and
//! payment-address records inside memory-mapped append-only files.
//!
//! ## Layers
//!
//! - `domain`: the data structures themselves — bit-strings, the red-black
//!   ordered map, the compressed binary trie, the secondary-key-partitioned
//!   Patricia trie, the slab allocator's logical model, record codecs, the
//!   typed index-store façades, and the block multi-index.
//! - `ports`: the trait a backing file must implement for the slab
//!   allocator to grow and address it.
//! - `adapters`: a memory-mapped-file implementation of that port, plus an
//!   in-memory double for tests that don't need a real file.
//!
//! This crate is synchronous, single-threaded, and has no network or
//! process-boundary surface: callers serialize access to any store they
//! share across threads.

pub mod adapters;
pub mod domain;
pub mod ports;

pub use domain::bitstring::BitString;
pub use domain::block_index::{BlockIndex, BlockIndexEntry, ChainId, Height};
pub use domain::comparator::{Ascending, Comparator, Descending};
pub use domain::errors::{AllocatorError, CoreError, IndexError, RecordError};
pub use domain::indexes::{PaymentAddressIndex, StealthIndex, TransactionIndex};
pub use domain::patricia::{PatriciaTrie, QueryHandle, ValueCursor, ValueRange};
pub use domain::rbtree::RbTree;
pub use domain::records::{HeaderRecord, HeaderStore, MerkleRecord, MerkleStore, TransactionRecord, TransactionStore};
pub use domain::slab::SlabAllocator;
pub use domain::trie::{BinaryTrie, TrieIterator};
