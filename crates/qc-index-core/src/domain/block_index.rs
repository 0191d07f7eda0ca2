//! Block multi-index: hash-unique / (height, chain-id)-non-unique, with a
//! per-chain max-height summary repaired on deletion.
//!
//! Unlike the tries, this index has no prefix-scan requirement, so it is
//! backed by plain hash maps over an arena of entries rather than a trie —
//! the arena-plus-handle shape still matches the rest of the crate.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::domain::errors::IndexError;

pub type ChainId = u32;
pub type Height = u32;

/// A handle to one entry in a [`BlockIndex`]. Stable until that entry is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub hash: [u8; 32],
    pub chain_id: ChainId,
    pub height: Height,
    pub header_offset: u64,
    pub merkle_offset: u64,
}

/// Combined hash-unique / (height, chain_id)-non-unique index over block
/// entries, tracking the highest indexed height per chain.
#[derive(Default)]
pub struct BlockIndex {
    entries: Vec<Option<BlockIndexEntry>>,
    free: Vec<usize>,
    by_hash: HashMap<[u8; 32], EntryId>,
    by_height_chain: HashMap<(Height, ChainId), Vec<EntryId>>,
    max_height: HashMap<ChainId, Height>,
}

impl BlockIndex {
    pub fn new() -> Self {
        BlockIndex::default()
    }

    /// No-op at this layer: the index is rebuilt in memory from record
    /// files, it owns no backing storage of its own.
    pub fn create(&mut self) {}

    /// No-op at this layer, see [`create`](Self::create).
    pub fn start(&mut self) {}

    /// No-op at this layer, see [`create`](Self::create).
    pub fn sync(&mut self) {}

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    fn alloc(&mut self, entry: BlockIndexEntry) -> EntryId {
        if let Some(idx) = self.free.pop() {
            self.entries[idx] = Some(entry);
            EntryId(idx)
        } else {
            self.entries.push(Some(entry));
            EntryId(self.entries.len() - 1)
        }
    }

    fn dealloc(&mut self, id: EntryId) {
        self.entries[id.0] = None;
        self.free.push(id.0);
    }

    fn entry(&self, id: EntryId) -> &BlockIndexEntry {
        self.entries[id.0].as_ref().expect("dangling EntryId")
    }

    /// Inserts `entry`. Fails if its hash is already indexed. On success,
    /// raises `max_height` for `entry.chain_id` if this height exceeds it
    /// (or the chain has no tracked height yet).
    pub fn store(&mut self, entry: BlockIndexEntry) -> Result<EntryId, IndexError> {
        if self.by_hash.contains_key(&entry.hash) {
            return Err(IndexError::DuplicateHash);
        }
        let chain_id = entry.chain_id;
        let height = entry.height;
        let hash = entry.hash;
        let id = self.alloc(entry);
        self.by_hash.insert(hash, id);
        self.by_height_chain.entry((height, chain_id)).or_default().push(id);

        let raise = match self.max_height.get(&chain_id) {
            Some(&current) => height > current,
            None => true,
        };
        if raise {
            self.max_height.insert(chain_id, height);
        }
        trace!("block index store: chain={chain_id} height={height}");
        Ok(id)
    }

    /// The entry at `chain_id`'s tracked top height, if any.
    pub fn get_top(&self, chain_id: ChainId) -> Option<&BlockIndexEntry> {
        let height = *self.max_height.get(&chain_id)?;
        self.get_by_chain_height(chain_id, height)
    }

    /// `(height, chain_id)` is non-unique: distinct hashes can land on the
    /// same height during a reorg-adjacent window. Returns the first entry
    /// still indexed at this key.
    pub fn get_by_chain_height(&self, chain_id: ChainId, height: Height) -> Option<&BlockIndexEntry> {
        let ids = self.by_height_chain.get(&(height, chain_id))?;
        ids.first().map(|id| self.entry(*id))
    }

    pub fn get_by_hash(&self, hash: &[u8; 32]) -> Option<&BlockIndexEntry> {
        self.by_hash.get(hash).map(|id| self.entry(*id))
    }

    /// Removes the entry at `id`, then repeals the chain's top-height
    /// summary if this entry was the one it pointed at. Returns whether an
    /// entry existed.
    pub fn remove_value(&mut self, id: EntryId) -> bool {
        let Some(entry) = self.entries.get(id.0).and_then(|e| e.clone()) else {
            return false;
        };
        self.by_hash.remove(&entry.hash);
        let key = (entry.height, entry.chain_id);
        if let Some(ids) = self.by_height_chain.get_mut(&key) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_height_chain.remove(&key);
            }
        }
        self.dealloc(id);
        self.repeal(entry.chain_id, entry.height);
        true
    }

    /// Scans heights downward from `removed_height - 1` (inclusive of 0)
    /// until a surviving entry for `chain_id` is found, or clears the
    /// summary if none remain. A no-op if `removed_height` was not the
    /// tracked top for this chain.
    fn repeal(&mut self, chain_id: ChainId, removed_height: Height) {
        let Some(&top) = self.max_height.get(&chain_id) else {
            return;
        };
        if top != removed_height {
            return;
        }
        if removed_height == 0 {
            self.max_height.remove(&chain_id);
            debug!("block index repeal: chain={chain_id} has no surviving entries");
            return;
        }
        for h in (0..removed_height).rev() {
            let survives = self.by_height_chain.get(&(h, chain_id)).is_some_and(|ids| !ids.is_empty());
            if survives {
                self.max_height.insert(chain_id, h);
                debug!("block index repeal: chain={chain_id} new top={h}");
                return;
            }
        }
        self.max_height.remove(&chain_id);
        debug!("block index repeal: chain={chain_id} has no surviving entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash_byte: u8, chain_id: ChainId, height: Height) -> BlockIndexEntry {
        BlockIndexEntry {
            hash: [hash_byte; 32],
            chain_id,
            height,
            header_offset: height as u64 * 100,
            merkle_offset: height as u64 * 100 + 50,
        }
    }

    #[test]
    fn store_then_lookup_by_all_three_keys() {
        let mut idx = BlockIndex::new();
        let id = idx.store(entry(1, 5, 15)).unwrap();
        assert_eq!(idx.get_by_hash(&[1; 32]), Some(&entry(1, 5, 15)));
        assert_eq!(idx.get_by_chain_height(5, 15), Some(&entry(1, 5, 15)));
        assert_eq!(idx.get_top(5), Some(&entry(1, 5, 15)));
        assert!(idx.remove_value(id));
    }

    #[test]
    fn duplicate_hash_is_rejected() {
        let mut idx = BlockIndex::new();
        idx.store(entry(7, 1, 1)).unwrap();
        let err = idx.store(entry(7, 1, 2)).unwrap_err();
        assert_eq!(err, IndexError::DuplicateHash);
    }

    #[test]
    fn top_height_tracks_highest_insert_per_chain() {
        let mut idx = BlockIndex::new();
        idx.store(entry(1, 5, 10)).unwrap();
        idx.store(entry(2, 5, 20)).unwrap();
        idx.store(entry(3, 5, 15)).unwrap();
        assert_eq!(idx.get_top(5), Some(&entry(2, 5, 20)));
    }

    #[test]
    fn scenario_s4_repeal_falls_back_to_surviving_height() {
        let mut idx = BlockIndex::new();
        let h1 = idx.store(entry(1, 5, 15)).unwrap();
        let h2 = idx.store(entry(2, 5, 16)).unwrap();

        assert!(idx.remove_value(h2));
        assert_eq!(idx.get_top(5), Some(&entry(1, 5, 15)));

        assert!(idx.remove_value(h1));
        assert_eq!(idx.get_top(5), None);
    }

    #[test]
    fn repeal_scan_reaches_height_zero() {
        let mut idx = BlockIndex::new();
        let h0 = idx.store(entry(1, 9, 0)).unwrap();
        let h1 = idx.store(entry(2, 9, 1)).unwrap();
        assert!(idx.remove_value(h1));
        assert_eq!(idx.get_top(9), Some(&entry(1, 9, 0)));
        assert!(idx.remove_value(h0));
        assert_eq!(idx.get_top(9), None);
    }

    #[test]
    fn removing_non_top_entry_leaves_summary_untouched() {
        let mut idx = BlockIndex::new();
        let low = idx.store(entry(1, 2, 5)).unwrap();
        idx.store(entry(2, 2, 9)).unwrap();
        assert!(idx.remove_value(low));
        assert_eq!(idx.get_top(2), Some(&entry(2, 2, 9)));
    }

    #[test]
    fn two_distinct_hashes_at_the_same_height_chain_both_survive_independently() {
        let mut idx = BlockIndex::new();
        let a = idx.store(entry(1, 1, 5)).unwrap();
        let b = idx.store(entry(2, 1, 5)).unwrap();

        assert!(idx.remove_value(b));
        // `a` is still live at (height=5, chain=1); the summary must still
        // see it even though `b` shared its (height, chain_id) key.
        assert_eq!(idx.get_top(1), Some(&entry(1, 1, 5)));
        assert_eq!(idx.get_by_chain_height(1, 5), Some(&entry(1, 1, 5)));

        assert!(idx.remove_value(a));
        assert_eq!(idx.get_top(1), None);
    }

    #[test]
    fn independent_chains_track_independent_summaries() {
        let mut idx = BlockIndex::new();
        idx.store(entry(1, 1, 100)).unwrap();
        idx.store(entry(2, 2, 5)).unwrap();
        assert_eq!(idx.get_top(1).unwrap().height, 100);
        assert_eq!(idx.get_top(2).unwrap().height, 5);
    }
}
