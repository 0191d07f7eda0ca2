//! Typed index-store façades over [`PatriciaTrie`]: fixed bit-width,
//! fixed payload shape, keyed by `(hash-or-prefix, height)`.
//!
//! Each façade constructs the primary [`BitString`] from raw prefix bytes
//! and a `u32` height secondary key, then delegates straight to the trie.
//! Multiple stores at the same (primary, height) are ordered most-recently
//! inserted first, mirroring the trie's own newest-first convention for
//! value ordering.

use std::cmp::Ordering;

use crate::domain::bitstring::BitString;
use crate::domain::block_index::ChainId;
use crate::domain::comparator::{Ascending, Comparator};
use crate::domain::errors::IndexError;
use crate::domain::patricia::{PatriciaTrie, QueryHandle, ValueCursor, ValueRange};

pub type Height = u32;

/// Orders same-bucket entries by insertion recency, newest first.
#[derive(Debug, Clone, Copy, Default)]
struct InsertionOrder;

impl<P> Comparator<IndexValue<P>> for InsertionOrder {
    fn compare(&self, a: &IndexValue<P>, b: &IndexValue<P>) -> Ordering {
        b.seq.cmp(&a.seq)
    }
}

/// An index payload tagged with its insertion sequence number, so the
/// trie's value comparator can order same-bucket entries without requiring
/// `P: Ord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexValue<P> {
    seq: u64,
    pub payload: P,
}

/// Payload for the 256-bit transaction index: where a transaction lives,
/// how many inputs/outputs it has, and which later transaction (if any)
/// spends each output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload {
    pub chain_id: ChainId,
    pub file_offset: u64,
    pub input_count: u32,
    pub output_count: u32,
    /// One entry per output; `None` if that output is unspent.
    pub output_spender: Vec<Option<u64>>,
}

/// Payload for the 32-bit stealth-prefix and 160-bit payment-address
/// indexes: just the owning chain and the record's file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationPayload {
    pub chain_id: ChainId,
    pub file_offset: u64,
}

macro_rules! index_store {
    ($name:ident, $payload:ty, $width:expr, $doc:expr) => {
        #[doc = $doc]
        pub struct $name {
            trie: PatriciaTrie<Height, IndexValue<$payload>, InsertionOrder, Ascending>,
            next_seq: u64,
        }

        impl $name {
            /// Fixed primary-key bit-width this index requires.
            pub const WIDTH: usize = $width;

            pub fn new() -> Self {
                $name { trie: PatriciaTrie::new(Self::WIDTH, InsertionOrder, Ascending), next_seq: 0 }
            }

            pub fn len(&self) -> usize {
                self.trie.len()
            }

            pub fn is_empty(&self) -> bool {
                self.trie.is_empty()
            }

            /// Indexes `payload` under `(prefix_bytes, height)`. `prefix_bytes`
            /// must be exactly `WIDTH / 8` bytes.
            pub fn store(
                &mut self,
                prefix_bytes: &[u8],
                height: Height,
                payload: $payload,
            ) -> Result<ValueCursor, IndexError> {
                let primary = BitString::from_bytes(prefix_bytes);
                let seq = self.next_seq;
                self.next_seq += 1;
                self.trie.insert_equal(&primary, height, IndexValue { seq, payload })
            }

            /// A query handle for the node reached by consuming every bit of
            /// `prefix_bytes` — the whole subtree below it is in scope.
            pub fn get(
                &self,
                prefix_bytes: &[u8],
            ) -> Option<QueryHandle<'_, Height, IndexValue<$payload>, InsertionOrder, Ascending>> {
                let primary = BitString::from_bytes(prefix_bytes);
                self.trie.find_prefixed(&primary)
            }

            pub fn remove_equal(&mut self, prefix_bytes: &[u8], height: &Height) -> bool {
                let primary = BitString::from_bytes(prefix_bytes);
                self.trie.remove_equal(&primary, height)
            }

            pub fn remove_equal_secondary(&mut self, height: &Height) -> usize {
                self.trie.remove_equal_secondary(height)
            }

            pub fn remove_value(&mut self, cursor: ValueCursor) -> Option<ValueCursor> {
                self.trie.remove_value(cursor)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

index_store!(
    TransactionIndex,
    TransactionPayload,
    256,
    "Transaction index: locates a transaction record by its 32-byte hash."
);
index_store!(
    StealthIndex,
    LocationPayload,
    32,
    "Stealth-payment index: locates candidate outputs by a 4-byte stealth prefix."
);
index_store!(
    PaymentAddressIndex,
    LocationPayload,
    160,
    "Payment-address index: locates candidate outputs by a 20-byte address hash."
);

/// A values-only range over an index query, for callers that don't need the
/// underlying cursor.
pub type IndexRange<'a, P> = ValueRange<'a, Height, IndexValue<P>, InsertionOrder, Ascending>;

#[cfg(test)]
mod tests {
    use super::*;

    fn hash32(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    fn location(chain_id: ChainId, file_offset: u64) -> LocationPayload {
        LocationPayload { chain_id, file_offset }
    }

    #[test]
    fn store_then_prefixed_lookup_round_trips() {
        let mut idx = TransactionIndex::new();
        let hash = hash32(0xAB);
        idx.store(
            &hash,
            100,
            TransactionPayload { chain_id: 1, file_offset: 500, input_count: 1, output_count: 2, output_spender: vec![None, None] },
        )
        .unwrap();

        let handle = idx.get(&hash).unwrap();
        let found: Vec<_> = handle.get_exact(&100).map(|(_, v)| v.payload.file_offset).collect();
        assert_eq!(found, vec![500]);
    }

    #[test]
    fn same_bucket_entries_come_back_newest_first() {
        let mut idx = StealthIndex::new();
        let prefix = [0x11u8; 4];
        idx.store(&prefix, 10, location(1, 100)).unwrap();
        idx.store(&prefix, 10, location(1, 200)).unwrap();

        let handle = idx.get(&prefix).unwrap();
        let offsets: Vec<u64> = handle.get_exact(&10).map(|(_, v)| v.payload.file_offset).collect();
        assert_eq!(offsets, vec![200, 100]);
    }

    #[test]
    fn payment_address_index_uses_160_bit_width() {
        assert_eq!(PaymentAddressIndex::WIDTH, 160);
        let mut idx = PaymentAddressIndex::new();
        let prefix = [0x7Fu8; 20];
        idx.store(&prefix, 1, location(3, 42)).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_equal_secondary_clears_one_height_across_prefixes() {
        let mut idx = StealthIndex::new();
        idx.store(&[0x00; 4], 5, location(1, 1)).unwrap();
        idx.store(&[0xFF; 4], 5, location(1, 2)).unwrap();
        idx.store(&[0x00; 4], 6, location(1, 3)).unwrap();

        let removed = idx.remove_equal_secondary(&5);
        assert_eq!(removed, 2);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_value_returns_remaining_cursor_in_bucket() {
        let mut idx = StealthIndex::new();
        let prefix = [0x22u8; 4];
        let first = idx.store(&prefix, 1, location(1, 10)).unwrap();
        let second = idx.store(&prefix, 1, location(1, 20)).unwrap();
        let next = idx.remove_value(second);
        assert_eq!(next, Some(first));
    }
}
