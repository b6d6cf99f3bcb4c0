//! Free-slot index: a binary search tree over free slot positions whose
//! nodes are the free slots themselves.
//!
//! The tree is built perfectly balanced whenever a buffer is allocated and is
//! never rebalanced afterwards; deletions splice nodes out structurally.

use crate::slot::{FreeLinks, Slot, TreeRef};
use core::cmp::Ordering;

/// Build a balanced tree over `[0, len)` by midpoint split, reporting each
/// node's links through `set`. Returns the root.
pub(crate) fn build_balanced<F>(len: usize, mut set: F) -> TreeRef
where
    F: FnMut(usize, FreeLinks),
{
    split(0, len, TreeRef::NONE, &mut set)
}

fn split<F>(lo: usize, hi: usize, parent: TreeRef, set: &mut F) -> TreeRef
where
    F: FnMut(usize, FreeLinks),
{
    if lo >= hi {
        return TreeRef::NONE;
    }
    let mid = lo + (hi - lo) / 2;
    let me = TreeRef::at(mid);
    let left = split(lo, mid, me, set);
    let right = split(mid + 1, hi, me, set);
    set(mid, FreeLinks { left, right, parent });
    me
}

/// Mutable view of the free tree over an owned slot array.
pub(crate) struct FreeTree<'a, K, V> {
    slots: &'a mut [Slot<K, V>],
    root: &'a mut TreeRef,
}

impl<'a, K, V> FreeTree<'a, K, V> {
    pub(crate) fn new(slots: &'a mut [Slot<K, V>], root: &'a mut TreeRef) -> Self {
        Self { slots, root }
    }

    fn links(&self, pos: usize) -> &FreeLinks {
        self.slots[pos]
            .as_free()
            .expect("free-tree link points at an occupied slot")
    }

    fn links_mut(&mut self, pos: usize) -> &mut FreeLinks {
        self.slots[pos]
            .as_free_mut()
            .expect("free-tree link points at an occupied slot")
    }

    /// Descend as a BST search for `target`. Stops on an exact match or on
    /// the node under which `target` would be attached.
    pub(crate) fn locate_near(&self, target: usize) -> Option<usize> {
        let mut node = self.root.get()?;
        loop {
            let links = self.links(node);
            let child = match target.cmp(&node) {
                Ordering::Equal => return Some(node),
                Ordering::Less => links.left,
                Ordering::Greater => links.right,
            };
            match child.get() {
                Some(next) => node = next,
                None => return Some(node),
            }
        }
    }

    /// Unlink free slot `pos` from the tree. The slot's own links are left
    /// stale; the caller overwrites the slot.
    pub(crate) fn remove(&mut self, pos: usize) {
        let FreeLinks {
            left,
            right,
            parent,
        } = *self.links(pos);
        match (left.get(), right.get()) {
            (None, _) => self.transplant(pos, parent, right),
            (_, None) => self.transplant(pos, parent, left),
            (Some(l), Some(r)) => {
                let successor = self.leftmost(r);
                if successor != r {
                    let succ = *self.links(successor);
                    self.transplant(successor, succ.parent, succ.right);
                    self.links_mut(successor).right = right;
                    self.links_mut(r).parent = TreeRef::at(successor);
                }
                self.transplant(pos, parent, TreeRef::at(successor));
                self.links_mut(successor).left = left;
                self.links_mut(l).parent = TreeRef::at(successor);
            }
        }
    }

    /// Mark slot `pos` free and attach it to the tree.
    pub(crate) fn insert(&mut self, pos: usize) {
        let parent = self.locate_near(pos);
        self.slots[pos] = Slot::Free(FreeLinks {
            parent: parent.map_or(TreeRef::NONE, TreeRef::at),
            ..FreeLinks::DETACHED
        });
        match parent {
            None => *self.root = TreeRef::at(pos),
            Some(parent) => {
                debug_assert_ne!(parent, pos, "slot {pos} is already in the free tree");
                let links = self.links_mut(parent);
                if pos < parent {
                    links.left = TreeRef::at(pos);
                } else {
                    links.right = TreeRef::at(pos);
                }
            }
        }
    }

    fn leftmost(&self, mut pos: usize) -> usize {
        while let Some(left) = self.links(pos).left.get() {
            pos = left;
        }
        pos
    }

    // Replace the subtree rooted at `old` with `new` in `old`'s parent.
    fn transplant(&mut self, old: usize, parent: TreeRef, new: TreeRef) {
        match parent.get() {
            None => *self.root = new,
            Some(p) => {
                let links = self.links_mut(p);
                if links.left == TreeRef::at(old) {
                    links.left = new;
                } else {
                    links.right = new;
                }
            }
        }
        if let Some(n) = new.get() {
            self.links_mut(n).parent = parent;
        }
    }
}
