//! Slot cells and the two link domains that address them.
//!
//! Chain links use the forward domain (`SlotRef`): the raw value is the slot
//! position. Free-tree links use the mirrored domain (`TreeRef`): the raw value
//! is `MIRROR - position`. The mirror is an involution that fixes the shared
//! `NONE` sentinel, and for capacities up to `MAX_CAPACITY` the valid raw
//! values of the two domains never overlap.

use core::fmt;

/// Largest supported slot count. Keeps forward and mirrored raw values disjoint.
pub const MAX_CAPACITY: usize = 1 << 30;

const NONE_RAW: u32 = u32::MAX;
const MIRROR: u32 = u32::MAX - 1;

/// Forward reference to a slot position, stored in chain links.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct SlotRef(u32);

impl SlotRef {
    pub(crate) const NONE: SlotRef = SlotRef(NONE_RAW);

    #[inline]
    pub(crate) fn at(pos: usize) -> Self {
        debug_assert!(pos < MAX_CAPACITY, "slot position {pos} out of range");
        SlotRef(pos as u32)
    }

    #[inline]
    pub(crate) fn get(self) -> Option<usize> {
        if self.0 == NONE_RAW {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    #[inline]
    pub(crate) fn is_none(self) -> bool {
        self.0 == NONE_RAW
    }

    #[cfg(test)]
    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(pos) => write!(f, "@{pos}"),
            None => f.write_str("@none"),
        }
    }
}

/// Mirrored reference to a slot position, stored in free-tree links.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct TreeRef(u32);

impl TreeRef {
    pub(crate) const NONE: TreeRef = TreeRef(NONE_RAW);

    #[inline]
    pub(crate) fn at(pos: usize) -> Self {
        TreeRef::from(SlotRef::at(pos))
    }

    #[inline]
    pub(crate) fn get(self) -> Option<usize> {
        SlotRef::from(self).get()
    }

    #[cfg(test)]
    pub(crate) fn is_none(self) -> bool {
        self.0 == NONE_RAW
    }

    #[cfg(test)]
    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl From<SlotRef> for TreeRef {
    #[inline]
    fn from(r: SlotRef) -> Self {
        TreeRef(MIRROR.wrapping_sub(r.0))
    }
}

impl From<TreeRef> for SlotRef {
    #[inline]
    fn from(t: TreeRef) -> Self {
        SlotRef(MIRROR.wrapping_sub(t.0))
    }
}

impl fmt::Debug for TreeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(pos) => write!(f, "~{pos}"),
            None => f.write_str("~none"),
        }
    }
}

/// Links of a free slot inside the free-slot search tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct FreeLinks {
    pub(crate) left: TreeRef,
    pub(crate) right: TreeRef,
    pub(crate) parent: TreeRef,
}

impl FreeLinks {
    /// Not attached to any tree; placeholder for a slot that is about to be
    /// overwritten or linked.
    pub(crate) const DETACHED: FreeLinks = FreeLinks {
        left: TreeRef::NONE,
        right: TreeRef::NONE,
        parent: TreeRef::NONE,
    };
}

#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) prev: SlotRef,
    pub(crate) next: SlotRef,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn detached(key: K, value: V) -> Self {
        Entry {
            key,
            value,
            prev: SlotRef::NONE,
            next: SlotRef::NONE,
        }
    }

    #[inline]
    pub(crate) fn is_head(&self) -> bool {
        self.prev.is_none()
    }
}

/// One cell of the flat array.
#[derive(Debug)]
pub(crate) enum Slot<K, V> {
    Free(FreeLinks),
    Occupied(Entry<K, V>),
}

impl<K, V> Slot<K, V> {
    #[cfg(test)]
    pub(crate) fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }

    #[inline]
    pub(crate) fn as_free(&self) -> Option<&FreeLinks> {
        match self {
            Slot::Free(links) => Some(links),
            Slot::Occupied(_) => None,
        }
    }

    #[inline]
    pub(crate) fn as_free_mut(&mut self) -> Option<&mut FreeLinks> {
        match self {
            Slot::Free(links) => Some(links),
            Slot::Occupied(_) => None,
        }
    }

    #[inline]
    pub(crate) fn into_entry(self) -> Option<Entry<K, V>> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Free(_) => None,
        }
    }
}
