//! RawTable: structural layer. Chain maintenance, slot allocation through
//! the free tree, and growth. No reentrancy protection of its own.
//!
//! Keys hash to a home bucket in the first `capacity / entries_per_bucket`
//! slots. Colliding keys form a doubly linked chain whose head always sits
//! in the shared home bucket, so a lookup starts at the home slot and walks
//! at most one chain. Chain continuations are allocated near their head
//! through the free tree, which lives in the unused slots.

use crate::buffer::{Buffer, SlotView, MIN_CAPACITY};
use crate::diagnostics::{self, DistanceStats, ValidationError};
use crate::error::{InsertError, ReserveError};
use crate::free_tree::FreeTree;
use crate::slot::{Entry, FreeLinks, Slot, SlotRef, TreeRef, MAX_CAPACITY};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};

// Capacity multiplier for automatic growth.
const GROWTH_FACTOR: usize = 2;

pub(crate) struct RawTable<K, V, S> {
    hasher: S,
    buffer: Buffer<K, V>,
    free_root: TreeRef,
    len: usize,
    entries_per_bucket: usize,
}

impl<K, V, S> RawTable<K, V, S> {
    pub(crate) fn new(entries_per_bucket: usize, hasher: S) -> Self {
        let (buffer, free_root) = Buffer::shared();
        Self {
            hasher,
            buffer,
            free_root,
            len: 0,
            entries_per_bucket,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub(crate) fn entries_per_bucket(&self) -> usize {
        self.entries_per_bucket
    }

    pub(crate) fn hasher(&self) -> &S {
        &self.hasher
    }

    pub(crate) fn slots(&self) -> &[Slot<K, V>] {
        self.buffer.slots()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot<K, V>] {
        self.buffer.slots_mut()
    }

    /// Return to the shared empty buffer, handing back the old storage so
    /// the caller decides when entries are dropped.
    pub(crate) fn take_storage(&mut self) -> Buffer<K, V> {
        let (shared, root) = Buffer::shared();
        self.free_root = root;
        self.len = 0;
        core::mem::replace(&mut self.buffer, shared)
    }

    pub(crate) fn distance_stats(&self) -> DistanceStats {
        diagnostics::chain_offsets(&self.buffer)
    }

    fn bucket_count(&self) -> usize {
        self.capacity() / self.entries_per_bucket
    }

    fn entry(&self, pos: usize) -> &Entry<K, V> {
        match self.buffer.view(pos) {
            SlotView::Occupied(entry) => entry,
            SlotView::Free(_) => unreachable!("chain reaches free slot {pos}"),
        }
    }

    fn entry_mut(&mut self, pos: usize) -> &mut Entry<K, V> {
        match &mut self.buffer.slots_mut()[pos] {
            Slot::Occupied(entry) => entry,
            Slot::Free(_) => unreachable!("chain reaches free slot {pos}"),
        }
    }

    fn free_tree(&mut self) -> FreeTree<'_, K, V> {
        FreeTree::new(self.buffer.slots_mut(), &mut self.free_root)
    }

    // Take the entry out of `pos` and close the gap in its chain. The slot is
    // left detached: neither occupied nor in the free tree.
    fn unlink(&mut self, pos: usize) -> Entry<K, V> {
        let slot = core::mem::replace(
            &mut self.buffer.slots_mut()[pos],
            Slot::Free(FreeLinks::DETACHED),
        );
        let Slot::Occupied(entry) = slot else {
            unreachable!("unlinking free slot {pos}");
        };
        if let Some(prev) = entry.prev.get() {
            self.entry_mut(prev).next = entry.next;
        }
        if let Some(next) = entry.next.get() {
            self.entry_mut(next).prev = entry.prev;
        }
        entry
    }

    fn chain_tail(&self, head: usize) -> usize {
        let mut pos = head;
        while let Some(next) = self.entry(pos).next.get() {
            pos = next;
        }
        pos
    }

    #[cfg(test)]
    pub(crate) fn key_at(&self, pos: usize) -> Option<&K> {
        match self.buffer.view(pos) {
            SlotView::Occupied(entry) => Some(&entry.key),
            SlotView::Free(_) => None,
        }
    }
}

impl<K, V, S> RawTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn home_of<Q>(&self, q: &Q) -> usize
    where
        Q: ?Sized + Hash,
    {
        (self.hasher.hash_one(q) % self.bucket_count() as u64) as usize
    }

    fn position_of<Q>(&self, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.len == 0 {
            return None;
        }
        let home = self.home_of(q);
        let mut cursor = match self.buffer.view(home) {
            SlotView::Occupied(entry) if entry.is_head() => Some(home),
            _ => None,
        };
        while let Some(pos) = cursor {
            let entry = self.entry(pos);
            if entry.key.borrow() == q {
                return Some(pos);
            }
            cursor = entry.next.get();
        }
        None
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let pos = self.position_of(q)?;
        Some(&self.entry(pos).value)
    }

    pub(crate) fn find_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let pos = self.position_of(q)?;
        Some(&mut self.entry_mut(pos).value)
    }

    pub(crate) fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.position_of(q).is_some()
    }

    pub(crate) fn probe_distance<Q>(&self, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let target = self.position_of(q)?;
        let mut pos = self.home_of(q);
        let mut distance = 0;
        while pos != target {
            pos = self.entry(pos).next.get()?;
            distance += 1;
        }
        Some(distance)
    }

    pub(crate) fn insert_with<F>(&mut self, key: K, default: F) -> Result<&mut V, InsertError>
    where
        F: FnOnce() -> V,
    {
        if self.position_of(&key).is_some() {
            return Err(InsertError::DuplicateKey);
        }
        if self.len + 1 >= self.buffer.allocatable() {
            let requested = if self.buffer.is_shared() {
                0
            } else {
                self.bucket_count().saturating_mul(GROWTH_FACTOR)
            };
            let capacity = self.target_capacity(requested)?;
            self.rebuild(capacity)?;
        }
        let pos = self.place(key, default());
        self.len += 1;
        Ok(&mut self.entry_mut(pos).value)
    }

    pub(crate) fn remove<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let pos = self.position_of(q)?;
        let entry = self.entry(pos);
        let (removed, freed) = match (entry.is_head(), entry.next.get()) {
            // Pull the continuation into the head so the home slot stays occupied.
            (true, Some(next)) => {
                let successor = self.unlink(next);
                let head = self.entry_mut(pos);
                let key = core::mem::replace(&mut head.key, successor.key);
                let value = core::mem::replace(&mut head.value, successor.value);
                ((key, value), next)
            }
            _ => {
                let entry = self.unlink(pos);
                ((entry.key, entry.value), pos)
            }
        };
        self.free_tree().insert(freed);
        self.len -= 1;
        Some(removed)
    }

    pub(crate) fn reserve(&mut self, expected: usize) -> Result<(), ReserveError> {
        if expected == 0 || expected < self.buffer.allocatable() {
            log::trace!(
                "reserve({expected}) already satisfied by {} slots",
                self.capacity()
            );
            return Ok(());
        }
        let capacity = self.target_capacity(expected)?;
        self.rebuild(capacity)
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        diagnostics::check(
            &self.buffer,
            self.free_root,
            self.len,
            self.entries_per_bucket,
            |k| self.home_of(k),
        )
    }

    // max(requested buckets' worth of slots, requested + 1, len + 1, floor),
    // rounded up to whole buckets.
    fn target_capacity(&self, requested: usize) -> Result<usize, ReserveError> {
        let epb = self.entries_per_bucket;
        requested
            .checked_mul(epb)
            .and_then(|slots| {
                slots
                    .max(requested.saturating_add(1))
                    .max(self.len + 1)
                    .max(MIN_CAPACITY)
                    .checked_next_multiple_of(epb)
            })
            .filter(|&slots| slots <= MAX_CAPACITY)
            .ok_or(ReserveError::CapacityOverflow {
                requested: requested.saturating_mul(epb),
                max: MAX_CAPACITY,
            })
    }

    // Swap in a fresh buffer of `capacity` slots and re-place every entry.
    // The allocation happens first, so failure leaves the table as it was.
    fn rebuild(&mut self, capacity: usize) -> Result<(), ReserveError> {
        let (fresh, root) = Buffer::allocate(capacity)?;
        log::debug!(
            "rebuilding table: {} -> {} slots, {} live entries",
            self.capacity(),
            capacity,
            self.len
        );
        let old = core::mem::replace(&mut self.buffer, fresh);
        self.free_root = root;
        let live = self.len;
        self.len = 0;
        for entry in old.into_entries() {
            self.place(entry.key, entry.value);
            self.len += 1;
        }
        debug_assert_eq!(self.len, live);
        Ok(())
    }

    // Put a key known to be absent into the table; room must already exist.
    // Returns the slot the key landed in.
    //
    // Every hash is computed while the entries it concerns are still linked
    // in, so a panicking `Hash` drops at most the entry being placed.
    fn place(&mut self, key: K, value: V) -> usize {
        let home = self.home_of(&key);
        let pending = Entry::detached(key, value);
        let occupant = match self.buffer.view(home) {
            SlotView::Free(_) => None,
            SlotView::Occupied(entry) => Some(entry.is_head()),
        };
        match occupant {
            None => {
                self.free_tree().remove(home);
                self.buffer.slots_mut()[home] = Slot::Occupied(pending);
                home
            }
            Some(true) => self.append(home, pending),
            // Home slot holds another chain's continuation: evict it and
            // append it to its own chain. That chain's head stays in its home
            // slot, so one step always suffices.
            Some(false) => {
                let victim_home = self.home_of(&self.entry(home).key);
                debug_assert_ne!(victim_home, home);
                let victim = self.unlink(home);
                self.buffer.slots_mut()[home] = Slot::Occupied(pending);
                self.append(victim_home, Entry::detached(victim.key, victim.value));
                home
            }
        }
    }

    // Link `pending` after the tail of the chain headed at `head`, in the free
    // slot the tree offers nearest the head.
    fn append(&mut self, head: usize, mut pending: Entry<K, V>) -> usize {
        let tail = self.chain_tail(head);
        let pos = self
            .free_tree()
            .locate_near(head)
            .expect("growth keeps at least one slot free");
        self.free_tree().remove(pos);
        pending.prev = SlotRef::at(tail);
        self.buffer.slots_mut()[pos] = Slot::Occupied(pending);
        self.entry_mut(tail).next = SlotRef::at(pos);
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::hash::Hasher;

    // u64 keys hash to themselves, so with 4 buckets key k lives at k % 4.
    #[derive(Clone, Default)]
    struct IdentityBuildHasher;
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher(0)
        }
    }
    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | b as u64;
            }
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    fn table() -> RawTable<u64, u64, IdentityBuildHasher> {
        RawTable::new(2, IdentityBuildHasher)
    }

    /// Invariant: a key whose home slot holds another chain's continuation
    /// takes the slot over, and the evicted entry moves back into its own
    /// chain.
    #[test]
    fn displacement_restores_home_slot() {
        let mut t = table();
        t.insert_with(0, || 100).unwrap();
        assert_eq!(t.capacity(), MIN_CAPACITY);

        // Key 4 shares bucket 0; the free tree hands out slot 1 next to it.
        t.insert_with(4, || 104).unwrap();
        assert_eq!(t.key_at(1), Some(&4));
        assert_eq!(t.probe_distance(&4), Some(1));
        t.validate().unwrap();

        // Key 1 owns slot 1, so key 4 is evicted and re-chained under 0.
        *t.insert_with(1, || 0).unwrap() = 101;
        assert_eq!(t.key_at(0), Some(&0));
        assert_eq!(t.key_at(1), Some(&1));
        assert_eq!(t.key_at(2), Some(&4));
        assert_eq!(t.probe_distance(&1), Some(0));
        assert_eq!(t.probe_distance(&4), Some(1));
        assert_eq!(t.find(&1), Some(&101));
        assert_eq!(t.find(&4), Some(&104));
        t.validate().unwrap();
    }

    // Key whose hash panics for one chosen value while `PANIC_ON` is set.
    std::thread_local! {
        static PANIC_ON: core::cell::Cell<Option<u64>> = const { core::cell::Cell::new(None) };
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Fragile(u64);
    impl core::hash::Hash for Fragile {
        fn hash<H: Hasher>(&self, state: &mut H) {
            if PANIC_ON.with(|p| p.get()) == Some(self.0) {
                panic!("hash of {} refused", self.0);
            }
            state.write_u64(self.0);
        }
    }

    /// Invariant: a panicking `Hash` during displacement leaves the occupant
    /// in the table; only the key being inserted is lost.
    #[test]
    fn panicking_hash_during_displacement_keeps_occupant() {
        let mut t: RawTable<Fragile, u64, _> = RawTable::new(2, IdentityBuildHasher);
        t.insert_with(Fragile(0), || 100).unwrap();
        t.insert_with(Fragile(4), || 104).unwrap();
        assert_eq!(t.key_at(1), Some(&Fragile(4)));

        PANIC_ON.with(|p| p.set(Some(4)));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = t.insert_with(Fragile(1), || 101);
        }));
        PANIC_ON.with(|p| p.set(None));
        assert!(res.is_err());

        t.validate().unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.find(&Fragile(4)), Some(&104));
        assert_eq!(t.find(&Fragile(1)), None);

        t.insert_with(Fragile(1), || 101).unwrap();
        assert_eq!(t.key_at(1), Some(&Fragile(1)));
        assert_eq!(t.find(&Fragile(4)), Some(&104));
        t.validate().unwrap();
    }

    /// Invariant: removing a chain head with followers keeps the home slot
    /// occupied by pulling the follower forward and frees the follower's slot.
    #[test]
    fn removing_head_pulls_follower_forward() {
        let mut t = table();
        for k in [0, 4, 8] {
            t.insert_with(k, || k * 10).unwrap();
        }
        let follower_slot = (0..t.capacity())
            .find(|&p| t.key_at(p) == Some(&4))
            .unwrap();

        assert_eq!(t.remove(&0), Some((0, 0)));
        assert_eq!(t.key_at(0), Some(&4));
        assert_eq!(t.key_at(follower_slot), None);
        assert_eq!(t.probe_distance(&4), Some(0));
        assert_eq!(t.probe_distance(&8), Some(1));
        assert_eq!(t.find(&8), Some(&80));
        t.validate().unwrap();

        assert_eq!(t.remove(&8), Some((8, 80)));
        assert_eq!(t.remove(&4), Some((4, 40)));
        assert_eq!(t.len(), 0);
        assert_eq!(t.key_at(0), None);
        t.validate().unwrap();
    }

    #[test]
    fn removing_middle_of_chain_relinks_neighbours() {
        let mut t = table();
        for k in [1, 5, 9, 13] {
            t.insert_with(k, || k).unwrap();
        }
        assert_eq!(t.probe_distance(&13), Some(3));
        assert_eq!(t.remove(&9), Some((9, 9)));
        assert_eq!(t.probe_distance(&13), Some(2));
        assert_eq!(t.probe_distance(&5), Some(1));
        t.validate().unwrap();
    }

    #[test]
    fn growth_triggers_when_table_would_fill() {
        let mut t = table();
        for k in 0..7 {
            t.insert_with(k, || k).unwrap();
        }
        assert_eq!(t.capacity(), 8);
        t.insert_with(7, || 7).unwrap();
        assert_eq!(t.capacity(), 16);
        for k in 0..8 {
            assert_eq!(t.find(&k), Some(&k));
        }
        t.validate().unwrap();

        for k in 8..15 {
            t.insert_with(k, || k).unwrap();
        }
        assert_eq!(t.capacity(), 16);
        t.insert_with(15, || 15).unwrap();
        assert_eq!(t.capacity(), 32);
        t.validate().unwrap();
    }

    #[test]
    fn reserve_pregrows_once() {
        let mut t = table();
        t.reserve(100).unwrap();
        assert_eq!(t.capacity(), 200);
        t.reserve(50).unwrap();
        assert_eq!(t.capacity(), 200);
        for k in 0..100 {
            t.insert_with(k, || k).unwrap();
        }
        assert_eq!(t.capacity(), 200);
        t.validate().unwrap();
    }

    #[test]
    fn reserve_with_one_entry_per_bucket_leaves_a_spare_slot() {
        let mut t: RawTable<u64, u64, _> = RawTable::new(1, IdentityBuildHasher);
        t.reserve(10).unwrap();
        assert_eq!(t.capacity(), 11);
        for k in 0..10 {
            t.insert_with(k, || k).unwrap();
        }
        assert_eq!(t.capacity(), 11);
        t.validate().unwrap();
    }

    #[test]
    fn reserve_rejects_oversized_requests() {
        let mut t = table();
        assert!(matches!(
            t.reserve(usize::MAX),
            Err(ReserveError::CapacityOverflow { .. })
        ));
        assert!(matches!(
            t.reserve(MAX_CAPACITY),
            Err(ReserveError::CapacityOverflow { .. })
        ));
        // Still the shared buffer and still usable.
        assert!(t.buffer.is_shared());
        t.insert_with(3, || 3).unwrap();
        t.validate().unwrap();
    }

    #[test]
    fn take_storage_returns_to_shared_buffer() {
        let mut t = table();
        for k in 0..20 {
            t.insert_with(k, || k).unwrap();
        }
        let old = t.take_storage();
        assert!(!old.is_shared());
        assert!(t.buffer.is_shared());
        assert_eq!(t.len(), 0);
        assert_eq!(t.capacity(), MIN_CAPACITY);
        assert_eq!(t.find(&3), None);
        t.validate().unwrap();
        drop(old);

        t.insert_with(3, || 30).unwrap();
        assert_eq!(t.find(&3), Some(&30));
    }

    #[test]
    fn duplicate_is_rejected_before_growth() {
        let mut t = table();
        for k in 0..7 {
            t.insert_with(k, || k).unwrap();
        }
        let mut called = false;
        let res = t.insert_with(3, || {
            called = true;
            0
        });
        assert!(matches!(res, Err(InsertError::DuplicateKey)));
        assert!(!called);
        assert_eq!(t.capacity(), 8);
        assert_eq!(t.find(&3), Some(&3));
    }

    #[test]
    fn histogram_counts_offsets_per_chain() {
        let mut t = table();
        // Chain at 0 of length 3, chain at 3 of length 1.
        for k in [0, 4, 8, 3] {
            t.insert_with(k, || k).unwrap();
        }
        let stats = t.distance_stats();
        assert_eq!(stats.histogram(), &[2, 1, 1]);
        assert_eq!(stats.entries(), t.len());
    }
}
