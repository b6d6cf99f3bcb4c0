//! Backing storage: either the process-wide shared empty buffer or a
//! privately owned slot array.

use crate::error::ReserveError;
use crate::free_tree;
use crate::slot::{Entry, FreeLinks, Slot, TreeRef};
use std::sync::OnceLock;

/// Capacity of the shared empty buffer and floor for every owned buffer.
pub const MIN_CAPACITY: usize = 8;

/// All-free buffer every unallocated table points at. Built once, never
/// mutated, never freed.
#[derive(Debug)]
pub(crate) struct SharedEmpty {
    links: [FreeLinks; MIN_CAPACITY],
    root: TreeRef,
}

static SHARED_EMPTY: OnceLock<SharedEmpty> = OnceLock::new();

impl SharedEmpty {
    pub(crate) fn get() -> &'static SharedEmpty {
        SHARED_EMPTY.get_or_init(|| {
            let mut links = [FreeLinks::DETACHED; MIN_CAPACITY];
            let root = free_tree::build_balanced(MIN_CAPACITY, |pos, l| links[pos] = l);
            SharedEmpty { links, root }
        })
    }

    pub(crate) fn root(&self) -> TreeRef {
        self.root
    }
}

/// Read-only view of one slot, independent of which buffer backs it.
pub(crate) enum SlotView<'a, K, V> {
    Free(&'a FreeLinks),
    Occupied(&'a Entry<K, V>),
}

pub(crate) enum Buffer<K, V> {
    Shared(&'static SharedEmpty),
    Owned(Vec<Slot<K, V>>),
}

impl<K, V> Buffer<K, V> {
    /// The shared empty buffer together with its free-tree root.
    pub(crate) fn shared() -> (Self, TreeRef) {
        let shared = SharedEmpty::get();
        (Buffer::Shared(shared), shared.root())
    }

    /// Allocate `capacity` free slots with a balanced free tree over them.
    /// Nothing is touched on failure.
    pub(crate) fn allocate(capacity: usize) -> Result<(Self, TreeRef), ReserveError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|source| ReserveError::AllocFailed { capacity, source })?;
        slots.resize_with(capacity, || Slot::Free(FreeLinks::DETACHED));
        let root = free_tree::build_balanced(capacity, |pos, links| slots[pos] = Slot::Free(links));
        Ok((Buffer::Owned(slots), root))
    }

    pub(crate) fn is_shared(&self) -> bool {
        matches!(self, Buffer::Shared(_))
    }

    pub(crate) fn capacity(&self) -> usize {
        match self {
            Buffer::Shared(_) => MIN_CAPACITY,
            Buffer::Owned(slots) => slots.len(),
        }
    }

    /// Slots that can take new entries without reallocating. Zero for the
    /// shared buffer, which is never written.
    pub(crate) fn allocatable(&self) -> usize {
        match self {
            Buffer::Shared(_) => 0,
            Buffer::Owned(slots) => slots.len(),
        }
    }

    #[inline]
    pub(crate) fn view(&self, pos: usize) -> SlotView<'_, K, V> {
        match self {
            Buffer::Shared(shared) => SlotView::Free(&shared.links[pos]),
            Buffer::Owned(slots) => match &slots[pos] {
                Slot::Free(links) => SlotView::Free(links),
                Slot::Occupied(entry) => SlotView::Occupied(entry),
            },
        }
    }

    pub(crate) fn slots(&self) -> &[Slot<K, V>] {
        match self {
            Buffer::Shared(_) => &[],
            Buffer::Owned(slots) => slots,
        }
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot<K, V>] {
        match self {
            Buffer::Shared(_) => &mut [],
            Buffer::Owned(slots) => slots,
        }
    }

    /// Consume the buffer, yielding live entries in array order.
    pub(crate) fn into_entries(self) -> impl Iterator<Item = Entry<K, V>> {
        let slots = match self {
            Buffer::Shared(_) => Vec::new(),
            Buffer::Owned(slots) => slots,
        };
        slots.into_iter().filter_map(Slot::into_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_buffer_is_one_instance() {
        let (a, _) = Buffer::<u32, u32>::shared();
        let (b, _) = Buffer::<String, Vec<u8>>::shared();
        match (a, b) {
            (Buffer::Shared(x), Buffer::Shared(y)) => assert!(std::ptr::eq(x, y)),
            _ => panic!("expected shared buffers"),
        }
    }

    #[test]
    fn shared_buffer_is_all_free_and_unwritable() {
        let (mut b, root) = Buffer::<u32, u32>::shared();
        assert!(b.is_shared());
        assert_eq!(b.capacity(), MIN_CAPACITY);
        assert_eq!(b.allocatable(), 0);
        assert!(b.slots().is_empty());
        assert!(b.slots_mut().is_empty());
        for pos in 0..MIN_CAPACITY {
            assert!(matches!(b.view(pos), SlotView::Free(_)));
        }
        assert_eq!(root.get(), Some(MIN_CAPACITY / 2));
        assert_eq!(b.into_entries().count(), 0);
    }

    #[test]
    fn allocate_builds_free_slots_under_a_midpoint_root() {
        let (b, root) = Buffer::<u32, u32>::allocate(32).unwrap();
        assert!(!b.is_shared());
        assert_eq!(b.capacity(), 32);
        assert_eq!(b.allocatable(), 32);
        assert_eq!(root.get(), Some(16));
        assert!(b.slots().iter().all(|s| !s.is_occupied()));
    }

    #[test]
    fn allocate_reports_impossible_sizes() {
        match Buffer::<u64, [u8; 64]>::allocate(usize::MAX / 2) {
            Err(ReserveError::AllocFailed { capacity, .. }) => assert_eq!(capacity, usize::MAX / 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("allocation should not succeed"),
        }
    }
}
