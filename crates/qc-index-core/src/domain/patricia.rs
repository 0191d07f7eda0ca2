//! Fixed-width binary Patricia trie with per-node secondary-key partitioning.
//!
//! Generalises [`crate::domain::trie::BinaryTrie`] along two axes: every
//! node holds one value bucket *per secondary key* instead of one shared
//! list, and every node caches a `{head_leftmost, tail_rightmost}` summary
//! per secondary key so that a prefix scan can be restricted to a single
//! secondary key without descending the whole subtree.
//!
//! Unlike the simple trie, there is no single global chain over
//! value-bearing nodes — iteration for a fixed secondary key walks the
//! trie structure directly (see [`QueryHandle`]/[`ValueRange`]), visiting
//! only the nodes whose own bucket for that key is non-empty.

use std::cmp::Ordering;

use tracing::{trace, warn};

use crate::domain::bitstring::BitString;
use crate::domain::comparator::Comparator;
use crate::domain::errors::IndexError;
use crate::domain::rbtree::RbTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

/// A handle to a single value inside a [`PatriciaTrie`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueCursor(usize);

/// A node's bucket for one secondary key: its own value list (ground
/// truth, populated only by inserts/removals landing exactly here) and the
/// subtree-wide summary merged in from this node plus its children.
///
/// When a node holds values for this secondary itself, `head_leftmost`
/// leads with them (they precede both children in primary-key order);
/// `tail_rightmost` always prefers the rightmost child that has this
/// secondary, falling back to the node's own tail only if neither child
/// does. This keeps `get_prefixed` a strict superset of `get_exact` even
/// when a node and one of its children both hold the same secondary key.
struct BucketEntry {
    own_head: Option<ValueCursor>,
    own_tail: Option<ValueCursor>,
    head_leftmost: Option<ValueCursor>,
    tail_rightmost: Option<ValueCursor>,
}

impl BucketEntry {
    fn empty() -> Self {
        BucketEntry { own_head: None, own_tail: None, head_leftmost: None, tail_rightmost: None }
    }

    fn is_dangling(&self) -> bool {
        self.head_leftmost.is_none() && self.tail_rightmost.is_none()
    }
}

struct PatriciaNode<Sec, SC> {
    label: BitString,
    parent: Option<NodeId>,
    children: [Option<NodeId>; 2],
    store: RbTree<Sec, BucketEntry, SC>,
}

struct ValueNode<Sec, V> {
    anchor: NodeId,
    secondary: Sec,
    prev: Option<ValueCursor>,
    next: Option<ValueCursor>,
    value: V,
}

/// A binary Patricia trie over fixed-width primary keys, partitioned by a
/// secondary key at every node.
///
/// `Sec` is typically `u32` (block height). `VC` orders values within a
/// bucket (descending by convention); `SC` orders secondary keys within a
/// node's store.
pub struct PatriciaTrie<Sec, V, VC, SC> {
    width: usize,
    value_cmp: VC,
    secondary_cmp: SC,
    nodes: Vec<Option<PatriciaNode<Sec, SC>>>,
    node_free: Vec<usize>,
    values: Vec<Option<ValueNode<Sec, V>>>,
    value_free: Vec<usize>,
    root: NodeId,
    len: usize,
}

impl<Sec, V, VC, SC> PatriciaTrie<Sec, V, VC, SC>
where
    Sec: Clone + PartialEq,
    VC: Comparator<V>,
    SC: Comparator<Sec> + Clone,
{
    /// Builds an empty trie for primary keys of exactly `width` bits.
    pub fn new(width: usize, value_cmp: VC, secondary_cmp: SC) -> Self {
        let root_node = PatriciaNode {
            label: BitString::new(0, &[]),
            parent: None,
            children: [None, None],
            store: RbTree::new(secondary_cmp.clone()),
        };
        PatriciaTrie {
            width,
            value_cmp,
            secondary_cmp,
            nodes: vec![Some(root_node)],
            node_free: Vec::new(),
            values: Vec::new(),
            value_free: Vec::new(),
            root: NodeId(0),
            len: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, cursor: ValueCursor) -> &V {
        &self.value_node(cursor).value
    }

    pub fn get_mut(&mut self, cursor: ValueCursor) -> &mut V {
        &mut self.values[cursor.0].as_mut().expect("dangling ValueCursor").value
    }

    fn node(&self, id: NodeId) -> &PatriciaNode<Sec, SC> {
        self.nodes[id.0].as_ref().expect("dangling NodeId")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut PatriciaNode<Sec, SC> {
        self.nodes[id.0].as_mut().expect("dangling NodeId")
    }

    fn value_node(&self, cursor: ValueCursor) -> &ValueNode<Sec, V> {
        self.values[cursor.0].as_ref().expect("dangling ValueCursor")
    }

    fn value_mut(&mut self, cursor: ValueCursor) -> &mut ValueNode<Sec, V> {
        self.values[cursor.0].as_mut().expect("dangling ValueCursor")
    }

    fn alloc_node(&mut self, label: BitString, parent: Option<NodeId>) -> NodeId {
        let node = PatriciaNode { label, parent, children: [None, None], store: RbTree::new(self.secondary_cmp.clone()) };
        if let Some(idx) = self.node_free.pop() {
            self.nodes[idx] = Some(node);
            NodeId(idx)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn dealloc_node(&mut self, id: NodeId) {
        self.nodes[id.0] = None;
        self.node_free.push(id.0);
    }

    fn alloc_value(&mut self, anchor: NodeId, secondary: Sec, value: V) -> ValueCursor {
        let node = ValueNode { anchor, secondary, prev: None, next: None, value };
        let cursor = if let Some(idx) = self.value_free.pop() {
            self.values[idx] = Some(node);
            ValueCursor(idx)
        } else {
            self.values.push(Some(node));
            ValueCursor(self.values.len() - 1)
        };
        self.len += 1;
        cursor
    }

    fn dealloc_value(&mut self, cursor: ValueCursor) {
        self.values[cursor.0] = None;
        self.value_free.push(cursor.0);
        self.len -= 1;
    }

    fn locate_or_create(&mut self, key: &BitString) -> NodeId {
        let mut cur = self.root;
        let mut offset = 0usize;
        loop {
            if offset == key.size() {
                return cur;
            }
            let slot = key.index(offset) as usize;
            match self.node(cur).children[slot] {
                None => {
                    let suffix = key.substring(offset, None);
                    let new_node = self.alloc_node(suffix, Some(cur));
                    self.node_mut(cur).children[slot] = Some(new_node);
                    return new_node;
                }
                Some(child) => {
                    let label = self.node(child).label.clone();
                    let remaining = key.substring(offset, None);
                    let cpl = label.common_prefix_len(&remaining);
                    if cpl == label.size() {
                        offset += label.size();
                        cur = child;
                        continue;
                    }
                    let common = label.substring(0, Some(cpl));
                    let intermediary = self.alloc_node(common, Some(cur));
                    self.node_mut(cur).children[slot] = Some(intermediary);

                    let shortened = label.substring(cpl, None);
                    let old_child_slot = shortened.index(0) as usize;
                    self.node_mut(child).label = shortened;
                    self.node_mut(child).parent = Some(intermediary);
                    self.node_mut(intermediary).children[old_child_slot] = Some(child);

                    if cpl == remaining.size() {
                        trace!("patricia split: key exhausted at intermediary node");
                        return intermediary;
                    }
                    let new_suffix = remaining.substring(cpl, None);
                    let new_slot = new_suffix.index(0) as usize;
                    let new_node = self.alloc_node(new_suffix, Some(intermediary));
                    self.node_mut(intermediary).children[new_slot] = Some(new_node);
                    trace!("patricia split: new sibling created for remaining key suffix");
                    return new_node;
                }
            }
        }
    }

    fn locate_exact(&self, key: &BitString) -> Option<NodeId> {
        let mut cur = self.root;
        let mut offset = 0usize;
        loop {
            if offset == key.size() {
                return Some(cur);
            }
            let slot = key.index(offset) as usize;
            let child = self.node(cur).children[slot]?;
            let label = &self.node(child).label;
            let remaining_len = key.size() - offset;
            if label.size() > remaining_len {
                return None;
            }
            for i in 0..label.size() {
                if label.index(i) != key.index(offset + i) {
                    return None;
                }
            }
            offset += label.size();
            cur = child;
        }
    }

    fn locate_prefix(&self, key: &BitString) -> Option<NodeId> {
        let mut cur = self.root;
        let mut offset = 0usize;
        loop {
            if offset == key.size() {
                return Some(cur);
            }
            let slot = key.index(offset) as usize;
            let child = self.node(cur).children[slot]?;
            let label = &self.node(child).label;
            let remaining_len = key.size() - offset;
            let cmp_len = label.size().min(remaining_len);
            for i in 0..cmp_len {
                if label.index(i) != key.index(offset + i) {
                    return None;
                }
            }
            if remaining_len <= label.size() {
                return Some(child);
            }
            offset += label.size();
            cur = child;
        }
    }

    fn bucket_handle(&mut self, node: NodeId, secondary: &Sec) -> crate::domain::rbtree::NodeId {
        let (handle, _) = self.node_mut(node).store.add(secondary.clone(), BucketEntry::empty(), false);
        handle
    }

    fn insert_into_bucket(&mut self, node: NodeId, secondary: &Sec, value: V) -> ValueCursor {
        let handle = self.bucket_handle(node, secondary);
        let own_tail = self.node(node).store.value(handle).own_tail;
        let id = self.alloc_value(node, secondary.clone(), value);

        let mut cursor = own_tail;
        while let Some(c) = cursor {
            if self.value_cmp.compare(&self.value_node(c).value, &self.value_node(id).value) == Ordering::Greater {
                cursor = self.value_node(c).prev;
            } else {
                break;
            }
        }

        match cursor {
            None => {
                let old_head = self.node(node).store.value(handle).own_head;
                self.value_mut(id).next = old_head;
                if let Some(h) = old_head {
                    self.value_mut(h).prev = Some(id);
                }
                let entry = self.node_mut(node).store.value_mut(handle);
                entry.own_head = Some(id);
                if entry.own_tail.is_none() {
                    entry.own_tail = Some(id);
                }
            }
            Some(after) => {
                let next = self.value_node(after).next;
                self.value_mut(id).prev = Some(after);
                self.value_mut(id).next = next;
                self.value_mut(after).next = Some(id);
                match next {
                    Some(n) => self.value_mut(n).prev = Some(id),
                    None => self.node_mut(node).store.value_mut(handle).own_tail = Some(id),
                }
            }
        }
        id
    }

    fn own_head_at(&self, node: NodeId, secondary: &Sec) -> Option<ValueCursor> {
        match self.node(node).store.retrieve(secondary) {
            (Some(h), true) => self.node(node).store.value(h).own_head,
            _ => None,
        }
    }

    /// Appends `value` into the `(primary, secondary)` bucket, in
    /// descending order by the value comparator.
    pub fn insert_equal(&mut self, primary: &BitString, secondary: Sec, value: V) -> Result<ValueCursor, IndexError> {
        self.check_width(primary)?;
        let node = self.locate_or_create(primary);
        let id = self.insert_into_bucket(node, &secondary, value);
        self.refresh_secondary_upward(node, &secondary);
        Ok(id)
    }

    /// As [`insert_equal`](Self::insert_equal), but fails if the bucket already has a value.
    pub fn insert_unique(&mut self, primary: &BitString, secondary: Sec, value: V) -> Result<ValueCursor, IndexError> {
        self.check_width(primary)?;
        let node = self.locate_or_create(primary);
        if self.own_head_at(node, &secondary).is_some() {
            warn!("insert_unique rejected: bucket already occupied");
            return Err(IndexError::BucketOccupied);
        }
        let id = self.insert_into_bucket(node, &secondary, value);
        self.refresh_secondary_upward(node, &secondary);
        Ok(id)
    }

    fn check_width(&self, primary: &BitString) -> Result<(), IndexError> {
        if primary.size() != self.width {
            warn!("insert rejected: wrong primary width ({} != {})", primary.size(), self.width);
            return Err(IndexError::WrongPrimaryWidth { expected: self.width, actual: primary.size() });
        }
        Ok(())
    }

    fn recompute_entry(&mut self, n: NodeId, secondary: &Sec) {
        let (own_head, own_tail) = match self.node(n).store.retrieve(secondary) {
            (Some(h), true) => {
                let e = self.node(n).store.value(h);
                (e.own_head, e.own_tail)
            }
            _ => (None, None),
        };

        let child_bounds = |this: &Self, c: Option<NodeId>| -> (Option<ValueCursor>, Option<ValueCursor>) {
            match c {
                Some(cn) => match this.node(cn).store.retrieve(secondary) {
                    (Some(h), true) => {
                        let e = this.node(cn).store.value(h);
                        (e.head_leftmost, e.tail_rightmost)
                    }
                    _ => (None, None),
                },
                None => (None, None),
            }
        };

        let c0 = self.node(n).children[0];
        let c1 = self.node(n).children[1];
        let (c0_left, c0_right) = child_bounds(self, c0);
        let (c1_left, c1_right) = child_bounds(self, c1);

        let head_leftmost = own_head.or(c0_left).or(c1_left);
        let tail_rightmost = c1_right.or(c0_right).or(own_tail);

        let entry = BucketEntry { own_head, own_tail, head_leftmost, tail_rightmost };
        if entry.is_dangling() {
            self.node_mut(n).store.remove(secondary);
        } else {
            self.node_mut(n).store.add(secondary.clone(), entry, true);
        }
    }

    fn refresh_secondary_upward(&mut self, mut n: NodeId, secondary: &Sec) {
        loop {
            self.recompute_entry(n, secondary);
            match self.node(n).parent {
                Some(p) => n = p,
                None => break,
            }
        }
    }

    fn recompute_all_entries(&mut self, n: NodeId) {
        let mut keys: Vec<Sec> = Vec::new();
        for (k, _) in self.node(n).store.iter() {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        for c in self.node(n).children.into_iter().flatten() {
            for (k, _) in self.node(c).store.iter() {
                if !keys.contains(k) {
                    keys.push(k.clone());
                }
            }
        }
        for k in keys {
            self.recompute_entry(n, &k);
        }
    }

    fn recompute_all_upward(&mut self, mut n: NodeId) {
        loop {
            self.recompute_all_entries(n);
            match self.node(n).parent {
                Some(p) => n = p,
                None => break,
            }
        }
    }

    fn has_own_values(&self, n: NodeId) -> bool {
        self.node(n).store.iter().any(|(_, e)| e.own_head.is_some())
    }

    /// Collapses empty, single-child structural nodes upward from `n`.
    fn compress_branch(&mut self, mut n: NodeId) {
        let stop_at;
        loop {
            if n == self.root {
                stop_at = n;
                break;
            }
            if self.has_own_values(n) {
                stop_at = n;
                break;
            }
            let children: Vec<NodeId> = self.node(n).children.iter().filter_map(|c| *c).collect();
            if children.len() == 1 {
                let child = children[0];
                let parent = self.node(n).parent.expect("non-root has parent");
                let mut child_label = self.node(child).label.clone();
                child_label.prepend(&self.node(n).label);
                let slot = if self.node(parent).children[0] == Some(n) { 0 } else { 1 };
                self.node_mut(child).label = child_label;
                self.node_mut(child).parent = Some(parent);
                self.node_mut(parent).children[slot] = Some(child);
                self.dealloc_node(n);
                trace!("patricia compress: fused empty node into sole child");
                stop_at = parent;
                break;
            } else if children.is_empty() {
                let parent = self.node(n).parent.expect("non-root has parent");
                let slot = if self.node(parent).children[0] == Some(n) { 0 } else { 1 };
                self.node_mut(parent).children[slot] = None;
                self.dealloc_node(n);
                trace!("patricia compress: removed empty leaf");
                n = parent;
                continue;
            } else {
                stop_at = n;
                break;
            }
        }
        self.recompute_all_upward(stop_at);
    }

    /// Removes every value in the `(primary, secondary)` bucket. Returns
    /// whether the bucket held any values.
    pub fn remove_equal(&mut self, primary: &BitString, secondary: &Sec) -> bool {
        let Some(node) = self.locate_exact(primary) else { return false };
        let handle = match self.node(node).store.retrieve(secondary) {
            (Some(h), true) => h,
            _ => return false,
        };
        let head = self.node(node).store.value(handle).own_head;
        if head.is_none() {
            return false;
        }
        let mut cur = head;
        while let Some(id) = cur {
            let next = self.value_node(id).next;
            self.dealloc_value(id);
            cur = next;
        }
        let entry = self.node_mut(node).store.value_mut(handle);
        entry.own_head = None;
        entry.own_tail = None;
        self.refresh_secondary_upward(node, secondary);
        if !self.has_own_values(node) {
            self.compress_branch(node);
        }
        true
    }

    /// Removes every value under `secondary` across the whole trie, by
    /// sweeping the root-level prefixed range one node at a time. Returns
    /// the number of values removed.
    pub fn remove_equal_secondary(&mut self, secondary: &Sec) -> usize {
        let mut removed = 0usize;
        let mut cur = self.first_node_with_secondary_in_subtree(self.root, secondary);
        while let Some(node) = cur {
            // Advance before detaching so the walk survives this node's removal.
            let next = self.next_node_with_secondary_within(self.root, node, secondary);
            removed += self.clear_secondary_bucket(node, secondary);
            cur = next;
        }
        removed
    }

    fn clear_secondary_bucket(&mut self, node: NodeId, secondary: &Sec) -> usize {
        let handle = match self.node(node).store.retrieve(secondary) {
            (Some(h), true) => h,
            _ => return 0,
        };
        let mut count = 0usize;
        let mut cur = self.node(node).store.value(handle).own_head;
        while let Some(id) = cur {
            let next = self.value_node(id).next;
            self.dealloc_value(id);
            count += 1;
            cur = next;
        }
        if count > 0 {
            let entry = self.node_mut(node).store.value_mut(handle);
            entry.own_head = None;
            entry.own_tail = None;
            self.refresh_secondary_upward(node, secondary);
            if !self.has_own_values(node) {
                self.compress_branch(node);
            }
        }
        count
    }

    fn has_own_bucket(&self, n: NodeId, secondary: &Sec) -> bool {
        match self.node(n).store.retrieve(secondary) {
            (Some(h), true) => self.node(n).store.value(h).own_head.is_some(),
            _ => false,
        }
    }

    fn first_node_with_secondary_in_subtree(&self, n: NodeId, secondary: &Sec) -> Option<NodeId> {
        if self.has_own_bucket(n, secondary) {
            return Some(n);
        }
        if let Some(c0) = self.node(n).children[0] {
            if let Some(v) = self.first_node_with_secondary_in_subtree(c0, secondary) {
                return Some(v);
            }
        }
        if let Some(c1) = self.node(n).children[1] {
            if let Some(v) = self.first_node_with_secondary_in_subtree(c1, secondary) {
                return Some(v);
            }
        }
        None
    }

    /// The next node after `n`, in preorder, whose own bucket holds
    /// `secondary` — confined to `boundary`'s subtree. Descends into `n`'s
    /// own children first, then climbs toward `boundary` taking each
    /// unvisited right sibling in turn, and never steps above `boundary`.
    fn next_node_with_secondary_within(&self, boundary: NodeId, n: NodeId, secondary: &Sec) -> Option<NodeId> {
        if let Some(c0) = self.node(n).children[0] {
            if let Some(v) = self.first_node_with_secondary_in_subtree(c0, secondary) {
                return Some(v);
            }
        }
        if let Some(c1) = self.node(n).children[1] {
            if let Some(v) = self.first_node_with_secondary_in_subtree(c1, secondary) {
                return Some(v);
            }
        }
        let mut cur = n;
        while cur != boundary {
            let parent = self.node(cur).parent.expect("node above boundary has a parent");
            if self.node(parent).children[0] == Some(cur) {
                if let Some(c1) = self.node(parent).children[1] {
                    if let Some(v) = self.first_node_with_secondary_in_subtree(c1, secondary) {
                        return Some(v);
                    }
                }
            }
            cur = parent;
        }
        None
    }

    /// Removes a single value. Returns the value that was next in its
    /// bucket, or `None` if it was the bucket's last entry.
    pub fn remove_value(&mut self, cursor: ValueCursor) -> Option<ValueCursor> {
        if self.values[cursor.0].is_none() {
            return None;
        }
        let node = self.value_node(cursor).anchor;
        let secondary = self.value_node(cursor).secondary.clone();
        let prev = self.value_node(cursor).prev;
        let next = self.value_node(cursor).next;

        match prev {
            Some(p) => self.value_mut(p).next = next,
            None => {
                if let (Some(h), true) = self.node(node).store.retrieve(&secondary) {
                    self.node_mut(node).store.value_mut(h).own_head = next;
                }
            }
        }
        match next {
            Some(n) => self.value_mut(n).prev = prev,
            None => {
                if let (Some(h), true) = self.node(node).store.retrieve(&secondary) {
                    self.node_mut(node).store.value_mut(h).own_tail = prev;
                }
            }
        }

        self.dealloc_value(cursor);
        self.refresh_secondary_upward(node, &secondary);
        if !self.has_own_values(node) {
            self.compress_branch(node);
        }
        next
    }

    /// A handle to the node whose label-concatenation equals `primary`, if any.
    pub fn find_equal(&self, primary: &BitString) -> Option<QueryHandle<'_, Sec, V, VC, SC>> {
        self.locate_exact(primary).map(|node| QueryHandle { trie: self, node })
    }

    /// Shorthand for `find_equal(primary)?.get_exact(secondary)`.
    pub fn find_equal_value(&self, primary: &BitString, secondary: &Sec) -> ValueRange<'_, Sec, V, VC, SC> {
        match self.find_equal(primary) {
            Some(h) => h.get_exact(secondary),
            None => ValueRange::empty(self, secondary.clone()),
        }
    }

    /// A handle to the closest node reached by consuming `primary`'s bits entirely.
    pub fn find_prefixed(&self, primary: &BitString) -> Option<QueryHandle<'_, Sec, V, VC, SC>> {
        self.locate_prefix(primary).map(|node| QueryHandle { trie: self, node })
    }

    /// Shorthand for `find_prefixed(primary)?.get_prefixed(secondary)`.
    pub fn find_prefixed_value(&self, primary: &BitString, secondary: &Sec) -> ValueRange<'_, Sec, V, VC, SC> {
        match self.find_prefixed(primary) {
            Some(h) => h.get_prefixed(secondary),
            None => ValueRange::empty(self, secondary.clone()),
        }
    }

    /// The range spanning the entire trie for one secondary key.
    pub fn find_secondary_key_bounds(&self, secondary: &Sec) -> ValueRange<'_, Sec, V, VC, SC> {
        QueryHandle { trie: self, node: self.root }.get_prefixed(secondary)
    }
}

/// A handle to a trie node, used to run bucket/subtree queries for a
/// caller-chosen secondary key.
pub struct QueryHandle<'a, Sec, V, VC, SC> {
    trie: &'a PatriciaTrie<Sec, V, VC, SC>,
    node: NodeId,
}

impl<'a, Sec, V, VC, SC> QueryHandle<'a, Sec, V, VC, SC>
where
    Sec: Clone + PartialEq,
    VC: Comparator<V>,
    SC: Comparator<Sec> + Clone,
{
    /// Values anchored at this exact node under `secondary`. Empty if this
    /// node's bucket for `secondary` has no values of its own (even if the
    /// key is present purely as an inherited child summary).
    pub fn get_exact(&self, secondary: &Sec) -> ValueRange<'a, Sec, V, VC, SC> {
        match self.trie.node(self.node).store.retrieve(secondary) {
            (Some(h), true) => {
                let e = self.trie.node(self.node).store.value(h);
                ValueRange::local(self.trie, self.node, secondary.clone(), e.own_head)
            }
            _ => ValueRange::empty(self.trie, secondary.clone()),
        }
    }

    /// As [`get_exact`](Self::get_exact), but uses a lower-bound lookup on
    /// the node's store rather than an exact match. Unlike `get_exact`,
    /// this does not filter out entries anchored to a different node: it
    /// returns the same subtree-wide range [`get_prefixed`](Self::get_prefixed)
    /// would for the key the lookup lands on.
    pub fn get_exact_greater_equal(&self, secondary: &Sec) -> ValueRange<'a, Sec, V, VC, SC> {
        match self.trie.node(self.node).store.retrieve_greater_equal(secondary) {
            (Some(h), _) => {
                let e = self.trie.node(self.node).store.value(h);
                ValueRange::subtree(self.trie, self.node, secondary.clone(), e.head_leftmost)
            }
            _ => ValueRange::empty(self.trie, secondary.clone()),
        }
    }

    /// The full subtree range for `secondary`, cached at this node.
    pub fn get_prefixed(&self, secondary: &Sec) -> ValueRange<'a, Sec, V, VC, SC> {
        match self.trie.node(self.node).store.retrieve(secondary) {
            (Some(h), true) => {
                let e = self.trie.node(self.node).store.value(h);
                ValueRange::subtree(self.trie, self.node, secondary.clone(), e.head_leftmost)
            }
            _ => ValueRange::empty(self.trie, secondary.clone()),
        }
    }

    /// As [`get_prefixed`](Self::get_prefixed), with a lower-bound lookup on the store.
    pub fn get_prefixed_greater_equal(&self, secondary: &Sec) -> ValueRange<'a, Sec, V, VC, SC> {
        match self.trie.node(self.node).store.retrieve_greater_equal(secondary) {
            (Some(h), _) => {
                let e = self.trie.node(self.node).store.value(h);
                ValueRange::subtree(self.trie, self.node, secondary.clone(), e.head_leftmost)
            }
            _ => ValueRange::empty(self.trie, secondary.clone()),
        }
    }
}

/// A range of values for one secondary key, consumed in value-comparator
/// order.
///
/// A node's own bucket is a single intra-node `prev`/`next` chain, so
/// [`QueryHandle::get_exact`] just walks it directly. A subtree range
/// ([`QueryHandle::get_prefixed`]) is different: its values live in more
/// than one node's own bucket (there is no single chain spanning them, see
/// the module docs), so once the current node's chain is exhausted the
/// range steps structurally to the next node — within the query's
/// boundary subtree, in primary-key order — that still holds this
/// secondary key.
pub struct ValueRange<'a, Sec, V, VC, SC> {
    trie: &'a PatriciaTrie<Sec, V, VC, SC>,
    secondary: Sec,
    boundary: NodeId,
    node: Option<NodeId>,
    cursor: Option<ValueCursor>,
    step_across_nodes: bool,
}

impl<'a, Sec, V, VC, SC> ValueRange<'a, Sec, V, VC, SC>
where
    Sec: Clone + PartialEq,
    VC: Comparator<V>,
    SC: Comparator<Sec> + Clone,
{
    fn empty(trie: &'a PatriciaTrie<Sec, V, VC, SC>, secondary: Sec) -> Self {
        ValueRange { trie, secondary, boundary: trie.root, node: None, cursor: None, step_across_nodes: false }
    }

    /// Confined to `node`'s own bucket; never steps to a child or sibling.
    fn local(trie: &'a PatriciaTrie<Sec, V, VC, SC>, node: NodeId, secondary: Sec, cursor: Option<ValueCursor>) -> Self {
        match cursor {
            Some(c) => {
                ValueRange { trie, secondary, boundary: node, node: Some(node), cursor: Some(c), step_across_nodes: false }
            }
            None => Self::empty(trie, secondary),
        }
    }

    /// Spans `boundary`'s whole subtree, starting at `head`'s anchor node.
    fn subtree(trie: &'a PatriciaTrie<Sec, V, VC, SC>, boundary: NodeId, secondary: Sec, head: Option<ValueCursor>) -> Self {
        match head {
            Some(c) => {
                let anchor = trie.value_node(c).anchor;
                ValueRange { trie, secondary, boundary, node: Some(anchor), cursor: Some(c), step_across_nodes: true }
            }
            None => Self::empty(trie, secondary),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }
}

impl<'a, Sec, V, VC, SC> Iterator for ValueRange<'a, Sec, V, VC, SC>
where
    Sec: Clone + PartialEq,
    VC: Comparator<V>,
    SC: Comparator<Sec> + Clone,
{
    type Item = (ValueCursor, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        let cursor = self.cursor?;
        let item = (cursor, &self.trie.value_node(cursor).value);

        match self.trie.value_node(cursor).next {
            Some(n) => self.cursor = Some(n),
            None if self.step_across_nodes => {
                match self.trie.next_node_with_secondary_within(self.boundary, node, &self.secondary) {
                    Some(next_node) => {
                        self.node = Some(next_node);
                        self.cursor = self.trie.own_head_at(next_node, &self.secondary);
                    }
                    None => {
                        self.node = None;
                        self.cursor = None;
                    }
                }
            }
            None => {
                self.node = None;
                self.cursor = None;
            }
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::comparator::{Ascending, Descending};

    fn bits(s: &str) -> BitString {
        let len = s.len();
        let mut bytes = vec![0u8; (len + 7) / 8];
        for (i, c) in s.chars().enumerate() {
            if c == '1' {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        BitString::new(len, &bytes)
    }

    fn trie() -> PatriciaTrie<u32, i32, Descending, Ascending> {
        PatriciaTrie::new(8, Descending, Ascending)
    }

    #[test]
    fn reject_wrong_width() {
        let mut t = trie();
        let err = t.insert_equal(&bits("1010101010"), 1, 99).unwrap_err();
        assert_eq!(err, IndexError::WrongPrimaryWidth { expected: 8, actual: 10 });
        assert!(t.is_empty());
    }

    #[test]
    fn insert_equal_orders_values_descending() {
        let mut t = trie();
        let key = bits("10000000");
        t.insert_equal(&key, 1, 10).unwrap();
        t.insert_equal(&key, 1, 30).unwrap();
        t.insert_equal(&key, 1, 20).unwrap();

        let values: Vec<i32> = t.find_equal_value(&key, &1).map(|(_, v)| *v).collect();
        assert_eq!(values, vec![30, 20, 10]);
    }

    #[test]
    fn insert_unique_rejects_second_value_in_same_bucket() {
        let mut t = trie();
        let key = bits("10000000");
        t.insert_unique(&key, 1, 10).unwrap();
        let err = t.insert_unique(&key, 1, 20).unwrap_err();
        assert_eq!(err, IndexError::BucketOccupied);
    }

    #[test]
    fn find_equal_is_subset_of_find_prefixed() {
        let mut t = trie();
        t.insert_equal(&bits("10000000"), 1, 1).unwrap();
        t.insert_equal(&bits("10000001"), 1, 2).unwrap();
        t.insert_equal(&bits("10000010"), 1, 3).unwrap();

        let exact: Vec<i32> = t.find_equal_value(&bits("10000000"), &1).map(|(_, v)| *v).collect();
        // "10000" is a genuine common prefix of all three keys; "1000000" is
        // not (the third key diverges one bit earlier), so the range must be
        // queried at the prefix they actually share.
        let prefixed: Vec<i32> = t.find_prefixed_value(&bits("10000"), &1).map(|(_, v)| *v).collect();
        for v in &exact {
            assert!(prefixed.contains(v));
        }
        assert_eq!(prefixed.len(), 3);
    }

    #[test]
    fn find_prefixed_walks_a_chain_of_nested_single_child_nodes() {
        // Each successive key extends the previous one by more bits, so
        // every insert lands in its own node, strictly below the last: a
        // chain, not a branch. A prefix query anchored at the shallowest
        // node must still enumerate values anchored two and three levels
        // further down, in primary-key order.
        let mut t: PatriciaTrie<u32, i32, Ascending, Ascending> = PatriciaTrie::new(25, Ascending, Ascending);
        t.insert_equal(&BitString::new(10, &[0b10101010, 0b10000000]), 1, 97).unwrap();
        t.insert_equal(&BitString::new(20, &[0b10101010, 0b10111011, 0b11000000]), 1, 112).unwrap();
        t.insert_equal(&BitString::new(25, &[0b10101010, 0b10111011, 0b11001100, 0b10000000]), 1, 17).unwrap();

        let prefixed: Vec<i32> =
            t.find_prefixed_value(&BitString::new(8, &[0b10101010]), &1).map(|(_, v)| *v).collect();
        assert_eq!(prefixed, vec![97, 112, 17]);
    }

    #[test]
    fn find_secondary_key_bounds_spans_whole_trie() {
        let mut t = trie();
        t.insert_equal(&bits("10000000"), 1, 100).unwrap();
        t.insert_equal(&bits("11000000"), 1, 200).unwrap();
        t.insert_equal(&bits("10000000"), 2, 999).unwrap();

        let for_one: Vec<i32> = t.find_secondary_key_bounds(&1).map(|(_, v)| *v).collect();
        assert_eq!(for_one.len(), 2);
        assert!(for_one.contains(&100));
        assert!(for_one.contains(&200));
    }

    #[test]
    fn remove_value_reports_next_in_bucket() {
        let mut t = trie();
        let key = bits("10000000");
        let a = t.insert_equal(&key, 1, 30).unwrap();
        let b = t.insert_equal(&key, 1, 20).unwrap();
        let next = t.remove_value(a);
        assert_eq!(next, Some(b));
        let remaining: Vec<i32> = t.find_equal_value(&key, &1).map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![20]);
    }

    #[test]
    fn remove_equal_compresses_and_removes_dangling_summary() {
        let mut t = trie();
        t.insert_equal(&bits("10000000"), 1, 1).unwrap();
        t.insert_equal(&bits("10000001"), 1, 2).unwrap();
        assert!(t.remove_equal(&bits("10000000"), &1));
        assert_eq!(t.len(), 1);
        let remaining: Vec<i32> = t.find_prefixed_value(&bits("1000000"), &1).map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2]);
    }

    #[test]
    fn remove_equal_secondary_sweeps_whole_trie() {
        let mut t = trie();
        t.insert_equal(&bits("10000000"), 1, 1).unwrap();
        t.insert_equal(&bits("11000000"), 1, 2).unwrap();
        t.insert_equal(&bits("10000000"), 2, 3).unwrap();

        let removed = t.remove_equal_secondary(&1);
        assert_eq!(removed, 2);
        assert_eq!(t.len(), 1);
        let remaining: Vec<i32> = t.find_secondary_key_bounds(&2).map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![3]);
    }

    #[test]
    fn no_node_other_than_root_has_exactly_one_child() {
        let mut t = trie();
        t.insert_equal(&bits("10000000"), 1, 1).unwrap();
        t.insert_equal(&bits("10000001"), 1, 2).unwrap();
        t.insert_equal(&bits("11000000"), 1, 3).unwrap();
        assert!(t.remove_equal(&bits("10000001"), &1));
        assert!(t.remove_equal(&bits("10000000"), &1));
        // Only one leaf remains; no dangling single-child chain should exist.
        let remaining: Vec<i32> = t.find_secondary_key_bounds(&1).map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![3]);
    }
}
