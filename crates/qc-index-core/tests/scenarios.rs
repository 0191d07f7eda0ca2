//! End-to-end scenarios exercising the trie, red-black map, and slab
//! allocator together, the way a record/index store built on top of this
//! crate would combine them.

use qc_index_core::adapters::mmap_file::MmapFile;
use qc_index_core::{Ascending, BitString, Descending, HeaderRecord, HeaderStore, IndexError, PatriciaTrie, RbTree};

#[test]
fn prefix_scan_enumerates_nested_inserts_in_trie_order() {
    // Each key extends the last by more bits, so every insert lands
    // strictly below the previous one: a chain, not a branch.
    let mut trie: PatriciaTrie<u32, i32, Ascending, Ascending> = PatriciaTrie::new(25, Ascending, Ascending);
    trie.insert_equal(&BitString::new(10, &[0b10101010, 0b11000000]), 1, 97).unwrap();
    trie.insert_equal(&BitString::new(20, &[0b10101010, 0b10111011, 0b11000000]), 1, 112).unwrap();
    trie.insert_equal(&BitString::new(25, &[0b10101010, 0b10111011, 0b11001100, 0b10000000]), 1, 17).unwrap();

    let found: Vec<i32> = trie.find_prefixed_value(&BitString::new(8, &[0b10101010]), &1).map(|(_, v)| *v).collect();
    assert_eq!(found, vec![97, 112, 17]);
}

#[test]
fn out_of_order_inserts_split_the_same_edge_twice() {
    // The second insert splits the first edge; the third insert splits
    // the node the second insert just created.
    let mut trie: PatriciaTrie<u32, i32, Ascending, Ascending> = PatriciaTrie::new(25, Ascending, Ascending);
    trie.insert_equal(&BitString::new(10, &[0b10101010, 0b11000000]), 1, 97).unwrap();
    trie.insert_equal(&BitString::new(25, &[0b10101010, 0b10111011, 0b11001100, 0b10000000]), 1, 17).unwrap();
    trie.insert_equal(&BitString::new(20, &[0b10101010, 0b10111011, 0b00000000]), 1, 112).unwrap();

    let exact: Vec<i32> = trie
        .find_equal_value(&BitString::new(25, &[0b10101010, 0b10111011, 0b11001100, 0b10000000]), &1)
        .map(|(_, v)| *v)
        .collect();
    assert_eq!(exact, vec![17]);
}

#[test]
fn insert_with_wrong_primary_width_leaves_the_trie_empty() {
    let mut trie: PatriciaTrie<u32, i32, Ascending, Ascending> = PatriciaTrie::new(32, Ascending, Ascending);
    let err = trie.insert_equal(&BitString::new(40, &[0; 5]), 2, 17).unwrap_err();
    assert_eq!(err, IndexError::WrongPrimaryWidth { expected: 32, actual: 40 });
    assert!(trie.is_empty());
}

#[test]
fn red_black_delete_with_red_sibling_preserves_order() {
    let mut tree: RbTree<i32, (), Descending> = RbTree::new(Descending);
    for k in [1, 2, 4, 5, 7, 8, 11, 14, 15] {
        tree.add(k, (), false);
    }
    assert!(tree.remove(&4));
    let order: Vec<i32> = tree.iter().map(|(k, _)| *k).collect();
    assert_eq!(order, vec![15, 14, 11, 8, 7, 5, 2, 1]);
}

#[test]
fn slab_allocator_round_trips_through_a_reopened_file_and_keeps_a_mark_flip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("headers.dat");

    let position = {
        let file = MmapFile::open(&path).unwrap();
        let mut store = HeaderStore::new(file);
        store.create().unwrap();
        let position = store.store(&HeaderRecord::new([0x11; 80])).unwrap();
        assert_eq!(position, 0);
        store.sync().unwrap();
        position
    };

    {
        let file = MmapFile::open(&path).unwrap();
        let mut store = HeaderStore::new(file);
        store.start().unwrap();
        let view = store.get(position).unwrap();
        assert!(!view.marked());
        assert_eq!(view.header(), &[0x11; 80][..]);

        store.mark(position).unwrap();
        store.sync().unwrap();
    }

    {
        let file = MmapFile::open(&path).unwrap();
        let mut store = HeaderStore::new(file);
        store.start().unwrap();
        assert!(store.get(position).unwrap().marked());
    }
}
