//! Record codecs and slab-backed stores for headers, merkle lists, and transactions.
//!
//! Every record layout leads with a one-byte mark flag — the only field any
//! store ever mutates in place. Everything after it is write-once. Layouts:
//!
//! - header:      `mark(1) | header_bytes(80)`
//! - merkle:      `mark(1) | hash_count_le(4) | header_hash(32) | tx_hash(32) * (hash_count - 1)`
//! - transaction: `mark(1) | tx_len_le(4) | tx_bytes(tx_len)`
//!
//! `hash_count` is `1 + N` transaction hashes; `tx_len` must fit in `u32`.

use tracing::trace;

use crate::domain::errors::{AllocatorError, RecordError};
use crate::domain::slab::SlabAllocator;
use crate::ports::outbound::BackingFile;

/// Mark byte value for a live (unmarked) record.
pub const MARK_LIVE: u8 = 0x00;
/// Mark byte value for a logically-deleted record. Any other byte reads as
/// not-marked, matching the original source's `marked() == (byte == 0xFF)`
/// comparison rather than a looser "anything nonzero" reading.
pub const MARK_MARKED: u8 = 0xFF;

const MARK_LEN: usize = 1;
const HEADER_RECORD_LEN: usize = 80;
const HASH_LEN: usize = 32;
const COUNT_LEN: usize = 4;
const LENGTH_LEN: usize = 4;

fn is_marked(mark_byte: u8) -> bool {
    mark_byte == MARK_MARKED
}

/// A canonical 80-byte block header. Header encoding/validation lives
/// outside this crate; the bytes are opaque payload here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub bytes: [u8; HEADER_RECORD_LEN],
}

impl HeaderRecord {
    pub fn new(bytes: [u8; HEADER_RECORD_LEN]) -> Self {
        HeaderRecord { bytes }
    }

    fn encoded_len(&self) -> usize {
        MARK_LEN + HEADER_RECORD_LEN
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = MARK_LIVE;
        buf[MARK_LEN..MARK_LEN + HEADER_RECORD_LEN].copy_from_slice(&self.bytes);
    }
}

/// A merkle-tree record: the block's header hash plus its transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleRecord {
    pub header_hash: [u8; HASH_LEN],
    pub transaction_hashes: Vec<[u8; HASH_LEN]>,
}

impl MerkleRecord {
    pub fn new(header_hash: [u8; HASH_LEN], transaction_hashes: Vec<[u8; HASH_LEN]>) -> Self {
        MerkleRecord { header_hash, transaction_hashes }
    }

    fn hash_count(&self) -> u32 {
        1 + self.transaction_hashes.len() as u32
    }

    fn encoded_len(&self) -> usize {
        MARK_LEN + COUNT_LEN + HASH_LEN + HASH_LEN * self.transaction_hashes.len()
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut offset = 0;
        buf[offset] = MARK_LIVE;
        offset += MARK_LEN;
        buf[offset..offset + COUNT_LEN].copy_from_slice(&self.hash_count().to_le_bytes());
        offset += COUNT_LEN;
        buf[offset..offset + HASH_LEN].copy_from_slice(&self.header_hash);
        offset += HASH_LEN;
        for hash in &self.transaction_hashes {
            buf[offset..offset + HASH_LEN].copy_from_slice(hash);
            offset += HASH_LEN;
        }
    }
}

/// A transaction record: the canonical serialized transaction bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub bytes: Vec<u8>,
}

impl TransactionRecord {
    pub fn new(bytes: Vec<u8>) -> Self {
        TransactionRecord { bytes }
    }

    fn encoded_len(&self) -> Result<usize, RecordError> {
        if self.bytes.len() > u32::MAX as usize {
            return Err(RecordError::TransactionTooLarge(self.bytes.len() as u64));
        }
        Ok(MARK_LEN + LENGTH_LEN + self.bytes.len())
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut offset = 0;
        buf[offset] = MARK_LIVE;
        offset += MARK_LEN;
        buf[offset..offset + LENGTH_LEN].copy_from_slice(&(self.bytes.len() as u32).to_le_bytes());
        offset += LENGTH_LEN;
        buf[offset..offset + self.bytes.len()].copy_from_slice(&self.bytes);
    }
}

/// A read-only view over a stored header record.
pub struct HeaderView<'a> {
    bytes: &'a [u8],
    size_limit: u64,
}

impl<'a> HeaderView<'a> {
    pub fn mark(&self) -> u8 {
        self.bytes[0]
    }

    pub fn marked(&self) -> bool {
        is_marked(self.bytes[0])
    }

    pub fn header(&self) -> &'a [u8] {
        &self.bytes[MARK_LEN..MARK_LEN + HEADER_RECORD_LEN]
    }

    /// Distance from this record's start to the slab's logical end, bounding
    /// how far a reader may walk past this record's declared layout.
    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }
}

/// A read-only view over a stored merkle record.
pub struct MerkleView<'a> {
    bytes: &'a [u8],
    size_limit: u64,
}

impl<'a> MerkleView<'a> {
    pub fn mark(&self) -> u8 {
        self.bytes[0]
    }

    pub fn marked(&self) -> bool {
        is_marked(self.bytes[0])
    }

    pub fn hash_count(&self) -> u32 {
        u32::from_le_bytes(self.bytes[MARK_LEN..MARK_LEN + COUNT_LEN].try_into().unwrap())
    }

    pub fn header_hash(&self) -> &'a [u8] {
        let start = MARK_LEN + COUNT_LEN;
        &self.bytes[start..start + HASH_LEN]
    }

    pub fn transaction_hashes(&self) -> impl Iterator<Item = &'a [u8]> {
        let n = self.hash_count().saturating_sub(1) as usize;
        let start = MARK_LEN + COUNT_LEN + HASH_LEN;
        let bytes = self.bytes;
        (0..n).map(move |i| &bytes[start + i * HASH_LEN..start + (i + 1) * HASH_LEN])
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }
}

/// A read-only view over a stored transaction record.
pub struct TransactionView<'a> {
    bytes: &'a [u8],
    size_limit: u64,
}

impl<'a> TransactionView<'a> {
    pub fn mark(&self) -> u8 {
        self.bytes[0]
    }

    pub fn marked(&self) -> bool {
        is_marked(self.bytes[0])
    }

    pub fn transaction_len(&self) -> u32 {
        u32::from_le_bytes(self.bytes[MARK_LEN..MARK_LEN + LENGTH_LEN].try_into().unwrap())
    }

    pub fn transaction(&self) -> &'a [u8] {
        let start = MARK_LEN + LENGTH_LEN;
        &self.bytes[start..start + self.transaction_len() as usize]
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }
}

macro_rules! record_store {
    ($store:ident, $record:ty, $view:ident, $min_len:expr) => {
        pub struct $store<F> {
            allocator: SlabAllocator<F>,
        }

        impl<F: BackingFile> $store<F> {
            pub fn new(file: F) -> Self {
                $store { allocator: SlabAllocator::new(file) }
            }

            pub fn create(&mut self) -> Result<(), AllocatorError> {
                self.allocator.create()
            }

            pub fn start(&mut self) -> Result<(), AllocatorError> {
                self.allocator.start()
            }

            pub fn sync(&mut self) -> Result<(), AllocatorError> {
                self.allocator.sync()
            }

            /// Returns a view over the record at `position`.
            pub fn get(&self, position: u64) -> Result<$view<'_>, RecordError> {
                let bytes = self.allocator.get(position)?;
                if bytes.len() < $min_len {
                    return Err(RecordError::Truncated { needed: $min_len, found: bytes.len() });
                }
                Ok($view { bytes, size_limit: self.allocator.to_eof(position) })
            }

            /// Flips the mark byte to [`MARK_MARKED`] in place. The only
            /// mutation any record store ever performs after `store`.
            pub fn mark(&mut self, position: u64) -> Result<(), RecordError> {
                let bytes = self.allocator.get_mut(position)?;
                if bytes.is_empty() {
                    return Err(RecordError::Truncated { needed: MARK_LEN, found: 0 });
                }
                bytes[0] = MARK_MARKED;
                Ok(())
            }
        }
    };
}

record_store!(HeaderStore, HeaderRecord, HeaderView, MARK_LEN + HEADER_RECORD_LEN);
record_store!(MerkleStore, MerkleRecord, MerkleView, MARK_LEN + COUNT_LEN + HASH_LEN);
record_store!(TransactionStore, TransactionRecord, TransactionView, MARK_LEN + LENGTH_LEN);

impl<F: BackingFile> HeaderStore<F> {
    pub fn store(&mut self, record: &HeaderRecord) -> Result<u64, RecordError> {
        let len = record.encoded_len() as u64;
        let position = self.allocator.allocate(len)?;
        record.encode(self.allocator.get_mut(position)?);
        trace!("header stored at position {position}");
        Ok(position)
    }
}

impl<F: BackingFile> MerkleStore<F> {
    pub fn store(&mut self, record: &MerkleRecord) -> Result<u64, RecordError> {
        let len = record.encoded_len() as u64;
        let position = self.allocator.allocate(len)?;
        record.encode(self.allocator.get_mut(position)?);
        trace!("merkle record stored at position {position} ({} tx hashes)", record.transaction_hashes.len());
        Ok(position)
    }
}

impl<F: BackingFile> TransactionStore<F> {
    pub fn store(&mut self, record: &TransactionRecord) -> Result<u64, RecordError> {
        let len = record.encoded_len()? as u64;
        let position = self.allocator.allocate(len)?;
        record.encode(self.allocator.get_mut(position)?);
        trace!("transaction stored at position {position} ({} bytes)", record.bytes.len());
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_file::MemoryFile;

    #[test]
    fn header_round_trip_and_mark() {
        let mut store = HeaderStore::new(MemoryFile::new());
        store.create().unwrap();
        let bytes = [0xAB; HEADER_RECORD_LEN];
        let position = store.store(&HeaderRecord::new(bytes)).unwrap();

        let view = store.get(position).unwrap();
        assert!(!view.marked());
        assert_eq!(view.header(), &bytes[..]);

        store.mark(position).unwrap();
        let view = store.get(position).unwrap();
        assert!(view.marked());
    }

    #[test]
    fn header_mark_byte_only_0xff_counts_as_marked() {
        let mut store = HeaderStore::new(MemoryFile::new());
        store.create().unwrap();
        let position = store.store(&HeaderRecord::new([0u8; HEADER_RECORD_LEN])).unwrap();
        // Directly poke a non-0xFF, non-zero byte into the mark slot.
        store.allocator.get_mut(position).unwrap()[0] = 0x42;
        assert!(!store.get(position).unwrap().marked());
    }

    #[test]
    fn merkle_round_trip_with_multiple_hashes() {
        let mut store = MerkleStore::new(MemoryFile::new());
        store.create().unwrap();
        let header_hash = [1u8; HASH_LEN];
        let tx_hashes = vec![[2u8; HASH_LEN], [3u8; HASH_LEN], [4u8; HASH_LEN]];
        let position = store.store(&MerkleRecord::new(header_hash, tx_hashes.clone())).unwrap();

        let view = store.get(position).unwrap();
        assert_eq!(view.hash_count(), 4);
        assert_eq!(view.header_hash(), &header_hash[..]);
        let collected: Vec<Vec<u8>> = view.transaction_hashes().map(|h| h.to_vec()).collect();
        assert_eq!(collected, tx_hashes.iter().map(|h| h.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn merkle_with_no_transactions_has_count_one() {
        let mut store = MerkleStore::new(MemoryFile::new());
        store.create().unwrap();
        let position = store.store(&MerkleRecord::new([9u8; HASH_LEN], vec![])).unwrap();
        let view = store.get(position).unwrap();
        assert_eq!(view.hash_count(), 1);
        assert_eq!(view.transaction_hashes().count(), 0);
    }

    #[test]
    fn transaction_round_trip() {
        let mut store = TransactionStore::new(MemoryFile::new());
        store.create().unwrap();
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02];
        let position = store.store(&TransactionRecord::new(payload.clone())).unwrap();

        let view = store.get(position).unwrap();
        assert_eq!(view.transaction_len() as usize, payload.len());
        assert_eq!(view.transaction(), &payload[..]);
    }

    #[test]
    fn small_transaction_length_fits() {
        let record = TransactionRecord { bytes: vec![0u8; 64] };
        assert_eq!(record.encoded_len().unwrap(), MARK_LEN + LENGTH_LEN + 64);
    }

    #[test]
    fn get_past_logical_size_is_truncated_error() {
        let mut store = HeaderStore::new(MemoryFile::new());
        store.create().unwrap();
        store.store(&HeaderRecord::new([0u8; HEADER_RECORD_LEN])).unwrap();
        let err = store.get(10_000).unwrap_err();
        assert!(matches!(err, RecordError::Allocator(AllocatorError::OutOfBounds { .. })));
    }

    #[test]
    fn size_limit_reflects_distance_to_logical_end() {
        let mut store = TransactionStore::new(MemoryFile::new());
        store.create().unwrap();
        let a = store.store(&TransactionRecord::new(vec![1, 2, 3])).unwrap();
        let b = store.store(&TransactionRecord::new(vec![4, 5])).unwrap();
        let view_a = store.get(a).unwrap();
        let view_b = store.get(b).unwrap();
        assert!(view_a.size_limit() > view_b.size_limit());
        assert_eq!(view_b.size_limit(), (MARK_LEN + LENGTH_LEN + 2) as u64);
    }
}
