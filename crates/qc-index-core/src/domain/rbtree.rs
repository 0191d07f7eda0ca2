//! Generic arena-based red-black ordered map.
//!
//! Nodes live in a `Vec<Option<Node<K, V>>>`; `NodeId` is a small `Copy`
//! handle into that arena rather than a pointer. "Nil" is `Option<NodeId>`
//! instead of a shared sentinel node, so the balancing code treats a
//! missing child/parent the same way the textbook algorithm treats the
//! sentinel: colour black, children/parent none.

use std::cmp::Ordering;

use crate::domain::comparator::Comparator;

/// A handle into an [`RbTree`]'s arena. Stable across insert/remove of
/// other entries; invalidated only for the entry it names once removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<K, V> {
    key: K,
    value: V,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// A balanced binary search tree ordered by an explicit [`Comparator`].
pub struct RbTree<K, V, C> {
    arena: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    root: Option<NodeId>,
    comparator: C,
    len: usize,
}

impl<K, V, C: Comparator<K>> RbTree<K, V, C> {
    pub fn new(comparator: C) -> Self {
        RbTree { arena: Vec::new(), free: Vec::new(), root: None, comparator, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key(&self, id: NodeId) -> &K {
        &self.node(id).key
    }

    pub fn value(&self, id: NodeId) -> &V {
        &self.node(id).value
    }

    pub fn value_mut(&mut self, id: NodeId) -> &mut V {
        &mut self.node_mut(id).value
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        self.arena[id.0].as_ref().expect("dangling NodeId")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.arena[id.0].as_mut().expect("dangling NodeId")
    }

    fn color_of(&self, id: Option<NodeId>) -> Color {
        id.map(|n| self.node(n).color).unwrap_or(Color::Black)
    }

    fn set_color(&mut self, id: Option<NodeId>, color: Color) {
        if let Some(n) = id {
            self.node_mut(n).color = color;
        }
    }

    fn parent_of(&self, id: Option<NodeId>) -> Option<NodeId> {
        id.and_then(|n| self.node(n).parent)
    }

    fn left_of(&self, id: Option<NodeId>) -> Option<NodeId> {
        id.and_then(|n| self.node(n).left)
    }

    fn right_of(&self, id: Option<NodeId>) -> Option<NodeId> {
        id.and_then(|n| self.node(n).right)
    }

    fn alloc(&mut self, key: K, value: V) -> NodeId {
        let node = Node { key, value, color: Color::Red, parent: None, left: None, right: None };
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(node);
            NodeId(idx)
        } else {
            self.arena.push(Some(node));
            NodeId(self.arena.len() - 1)
        }
    }

    fn dealloc(&mut self, id: NodeId) {
        self.arena[id.0] = None;
        self.free.push(id.0);
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = self.node(x).right.expect("rotate_left requires a right child");
        let y_left = self.node(y).left;
        self.node_mut(x).right = y_left;
        if let Some(yl) = y_left {
            self.node_mut(yl).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) if self.node(p).left == Some(x) => self.node_mut(p).left = Some(y),
            Some(p) => self.node_mut(p).right = Some(y),
        }
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = self.node(x).left.expect("rotate_right requires a left child");
        let y_right = self.node(y).right;
        self.node_mut(x).left = y_right;
        if let Some(yr) = y_right {
            self.node_mut(yr).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) if self.node(p).right == Some(x) => self.node_mut(p).right = Some(y),
            Some(p) => self.node_mut(p).left = Some(y),
        }
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    /// Exact lookup. Returns `(handle, true)` on a match, `(None, false)` on a miss.
    pub fn retrieve(&self, key: &K) -> (Option<NodeId>, bool) {
        let mut cur = self.root;
        while let Some(n) = cur {
            match self.comparator.compare(key, &self.node(n).key) {
                Ordering::Equal => return (Some(n), true),
                Ordering::Less => cur = self.node(n).left,
                Ordering::Greater => cur = self.node(n).right,
            }
        }
        (None, false)
    }

    /// The least key not greater-ranked than `key` under the comparator
    /// (exact match if present, else the nearest node on the descent path
    /// for which `key` compared "less").
    pub fn retrieve_greater_equal(&self, key: &K) -> (Option<NodeId>, bool) {
        let mut cur = self.root;
        let mut candidate = None;
        while let Some(n) = cur {
            match self.comparator.compare(key, &self.node(n).key) {
                Ordering::Equal => return (Some(n), true),
                Ordering::Less => {
                    candidate = Some(n);
                    cur = self.node(n).left;
                }
                Ordering::Greater => cur = self.node(n).right,
            }
        }
        (candidate, false)
    }

    /// Inserts `key` → `value`.
    ///
    /// If `key` already exists: when `replace` is true the stored value is
    /// overwritten; either way the existing handle is returned with
    /// `inserted = false`. Otherwise inserts a new node and returns
    /// `(handle, true)`.
    pub fn add(&mut self, key: K, value: V, replace: bool) -> (NodeId, bool) {
        let mut parent = None;
        let mut cur = self.root;
        let mut went_left = false;
        while let Some(n) = cur {
            match self.comparator.compare(&key, &self.node(n).key) {
                Ordering::Equal => {
                    if replace {
                        self.node_mut(n).value = value;
                    }
                    return (n, false);
                }
                Ordering::Less => {
                    parent = Some(n);
                    went_left = true;
                    cur = self.node(n).left;
                }
                Ordering::Greater => {
                    parent = Some(n);
                    went_left = false;
                    cur = self.node(n).right;
                }
            }
        }

        let id = self.alloc(key, value);
        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) if went_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }
        self.len += 1;
        self.balance_add(id);
        (id, true)
    }

    fn balance_add(&mut self, mut z: NodeId) {
        while self.color_of(self.parent_of(Some(z))) == Color::Red {
            let parent = self.parent_of(Some(z)).unwrap();
            let grandparent = self.parent_of(Some(parent)).expect("red node must have a parent");
            if Some(parent) == self.left_of(Some(grandparent)) {
                let uncle = self.right_of(Some(grandparent));
                if self.color_of(uncle) == Color::Red {
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    z = grandparent;
                } else {
                    if Some(z) == self.right_of(Some(parent)) {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.parent_of(Some(z)).unwrap();
                    let grandparent = self.parent_of(Some(parent)).unwrap();
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left_of(Some(grandparent));
                if self.color_of(uncle) == Color::Red {
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    z = grandparent;
                } else {
                    if Some(z) == self.left_of(Some(parent)) {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.parent_of(Some(z)).unwrap();
                    let grandparent = self.parent_of(Some(parent)).unwrap();
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    self.rotate_left(grandparent);
                }
            }
            if Some(z) == self.root {
                break;
            }
        }
        self.set_color(self.root, Color::Black);
    }

    fn transplant(&mut self, u: NodeId, v: Option<NodeId>) {
        let u_parent = self.node(u).parent;
        match u_parent {
            None => self.root = v,
            Some(p) if self.node(p).left == Some(u) => self.node_mut(p).left = v,
            Some(p) => self.node_mut(p).right = v,
        }
        if let Some(v) = v {
            self.node_mut(v).parent = u_parent;
        }
    }

    fn tree_minimum(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.node(id).left {
            id = l;
        }
        id
    }

    fn tree_maximum(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.node(id).right {
            id = r;
        }
        id
    }

    /// Removes the entry with this exact key. Returns whether one existed.
    pub fn remove(&mut self, key: &K) -> bool {
        let (found, ok) = self.retrieve(key);
        match found {
            Some(id) if ok => {
                self.remove_node(id);
                true
            }
            _ => false,
        }
    }

    fn remove_node(&mut self, z: NodeId) {
        let mut y = z;
        let mut y_original_color = self.node(y).color;
        let x: Option<NodeId>;
        let x_parent: Option<NodeId>;

        if self.node(z).left.is_none() {
            x = self.node(z).right;
            x_parent = self.node(z).parent;
            self.transplant(z, self.node(z).right);
        } else if self.node(z).right.is_none() {
            x = self.node(z).left;
            x_parent = self.node(z).parent;
            self.transplant(z, self.node(z).left);
        } else {
            y = self.tree_minimum(self.node(z).right.unwrap());
            y_original_color = self.node(y).color;
            x = self.node(y).right;
            if self.node(y).parent == Some(z) {
                x_parent = Some(y);
                if let Some(xn) = x {
                    self.node_mut(xn).parent = Some(y);
                }
            } else {
                x_parent = self.node(y).parent;
                self.transplant(y, self.node(y).right);
                let z_right = self.node(z).right;
                self.node_mut(y).right = z_right;
                if let Some(zr) = z_right {
                    self.node_mut(zr).parent = Some(y);
                }
            }
            self.transplant(z, Some(y));
            let z_left = self.node(z).left;
            self.node_mut(y).left = z_left;
            if let Some(zl) = z_left {
                self.node_mut(zl).parent = Some(y);
            }
            self.node_mut(y).color = self.node(z).color;
        }

        self.dealloc(z);
        self.len -= 1;

        if y_original_color == Color::Black {
            self.balance_remove(x, x_parent);
        }
    }

    fn balance_remove(&mut self, mut x: Option<NodeId>, mut x_parent: Option<NodeId>) {
        while x != self.root && self.color_of(x) == Color::Black {
            let parent = match x_parent {
                Some(p) => p,
                None => break,
            };
            if self.left_of(Some(parent)) == x {
                let mut sibling = self.right_of(Some(parent)).expect("sibling must exist");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.set_color(Some(sibling), Color::Black);
                    self.set_color(Some(parent), Color::Red);
                    self.rotate_left(parent);
                    sibling = self.right_of(Some(parent)).expect("sibling must exist");
                }
                if self.color_of(self.left_of(Some(sibling))) == Color::Black
                    && self.color_of(self.right_of(Some(sibling))) == Color::Black
                {
                    self.set_color(Some(sibling), Color::Red);
                    x = Some(parent);
                    x_parent = self.parent_of(Some(parent));
                } else {
                    if self.color_of(self.right_of(Some(sibling))) == Color::Black {
                        self.set_color(self.left_of(Some(sibling)), Color::Black);
                        self.set_color(Some(sibling), Color::Red);
                        self.rotate_right(sibling);
                        sibling = self.right_of(Some(parent)).expect("sibling must exist");
                    }
                    self.set_color(Some(sibling), self.color_of(Some(parent)));
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(self.right_of(Some(sibling)), Color::Black);
                    self.rotate_left(parent);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut sibling = self.left_of(Some(parent)).expect("sibling must exist");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.set_color(Some(sibling), Color::Black);
                    self.set_color(Some(parent), Color::Red);
                    self.rotate_right(parent);
                    sibling = self.left_of(Some(parent)).expect("sibling must exist");
                }
                if self.color_of(self.right_of(Some(sibling))) == Color::Black
                    && self.color_of(self.left_of(Some(sibling))) == Color::Black
                {
                    self.set_color(Some(sibling), Color::Red);
                    x = Some(parent);
                    x_parent = self.parent_of(Some(parent));
                } else {
                    if self.color_of(self.left_of(Some(sibling))) == Color::Black {
                        self.set_color(self.right_of(Some(sibling)), Color::Black);
                        self.set_color(Some(sibling), Color::Red);
                        self.rotate_left(sibling);
                        sibling = self.left_of(Some(parent)).expect("sibling must exist");
                    }
                    self.set_color(Some(sibling), self.color_of(Some(parent)));
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(self.left_of(Some(sibling)), Color::Black);
                    self.rotate_right(parent);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Ascending (comparator order) traversal of every `(key, value)` pair.
    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter { tree: self, next: self.root.map(|r| self.tree_minimum(r)) }
    }

    /// Descending (reverse comparator order) traversal.
    pub fn iter_rev(&self) -> IterRev<'_, K, V, C> {
        IterRev { tree: self, next: self.root.map(|r| self.tree_maximum(r)) }
    }

    fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.node(id).right {
            return Some(self.tree_minimum(r));
        }
        let mut cur = id;
        let mut parent = self.node(cur).parent;
        while let Some(p) = parent {
            if self.node(p).left == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.node(cur).parent;
        }
        None
    }

    fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(l) = self.node(id).left {
            return Some(self.tree_maximum(l));
        }
        let mut cur = id;
        let mut parent = self.node(cur).parent;
        while let Some(p) = parent {
            if self.node(p).right == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.node(cur).parent;
        }
        None
    }
}

/// Ascending iterator over an [`RbTree`]'s entries.
pub struct Iter<'a, K, V, C> {
    tree: &'a RbTree<K, V, C>,
    next: Option<NodeId>,
}

impl<'a, K, V, C: Comparator<K>> Iterator for Iter<'a, K, V, C> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.successor(id);
        let node = self.tree.node(id);
        Some((&node.key, &node.value))
    }
}

/// Descending iterator over an [`RbTree`]'s entries.
pub struct IterRev<'a, K, V, C> {
    tree: &'a RbTree<K, V, C>,
    next: Option<NodeId>,
}

impl<'a, K, V, C: Comparator<K>> Iterator for IterRev<'a, K, V, C> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.predecessor(id);
        let node = self.tree.node(id);
        Some((&node.key, &node.value))
    }
}
