//! FlatHashTable: public API over `RawTable` with a debug reentrancy guard.

use crate::buffer::MIN_CAPACITY;
use crate::diagnostics::{DistanceStats, ValidationError};
use crate::error::{InsertError, ReserveError};
use crate::raw_table::RawTable;
use crate::reentrancy::DebugReentrancy;
use crate::slot::Slot;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_map::DefaultHashBuilder;

pub const DEFAULT_ENTRIES_PER_BUCKET: usize = 2;

/// Hash table whose entries, collision chains and free-slot index share a
/// single slot array.
///
/// `entries_per_bucket` sets how many slots back each home bucket: with the
/// default of 2, half the array holds home slots and the rest absorbs chain
/// continuations.
pub struct FlatHashTable<K, V, S = DefaultHashBuilder> {
    raw: RawTable<K, V, S>,
    reentrancy: DebugReentrancy,
}

impl<K, V> FlatHashTable<K, V> {
    /// Empty table with the default hasher; allocates on first insert.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Empty table with `entries_per_bucket` slots per home bucket.
    ///
    /// # Panics
    /// If `entries_per_bucket` is not a power of two in `1..=MIN_CAPACITY`.
    pub fn with_entries_per_bucket(entries_per_bucket: usize) -> Self {
        Self::with_entries_per_bucket_and_hasher(entries_per_bucket, DefaultHashBuilder::default())
    }
}

impl<K, V> Default for FlatHashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> FlatHashTable<K, V, S> {
    /// Empty table using `hasher` and the default bucket width.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_entries_per_bucket_and_hasher(DEFAULT_ENTRIES_PER_BUCKET, hasher)
    }

    /// Empty table with both the bucket width and the hasher chosen.
    ///
    /// # Panics
    /// If `entries_per_bucket` is not a power of two in `1..=MIN_CAPACITY`.
    pub fn with_entries_per_bucket_and_hasher(entries_per_bucket: usize, hasher: S) -> Self {
        assert!(
            entries_per_bucket.is_power_of_two() && entries_per_bucket <= MIN_CAPACITY,
            "entries_per_bucket must be a power of two no larger than {MIN_CAPACITY}, got {entries_per_bucket}"
        );
        Self {
            raw: RawTable::new(entries_per_bucket, hasher),
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.raw.len() == 0
    }

    /// Number of slots, free or occupied. A table that never allocated
    /// reports the size of the shared empty buffer.
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Slots per home bucket, fixed at construction.
    pub fn entries_per_bucket(&self) -> usize {
        self.raw.entries_per_bucket()
    }

    /// The table's hash builder.
    pub fn hasher(&self) -> &S {
        self.raw.hasher()
    }

    /// `len() / capacity()`.
    pub fn load_factor(&self) -> f64 {
        self.raw.len() as f64 / self.raw.capacity() as f64
    }

    /// Drop every entry and go back to the shared empty buffer.
    pub fn clear(&mut self) {
        let guard = self.reentrancy.enter("clear");
        log::trace!("clearing table with {} entries", self.raw.len());
        let old = self.raw.take_storage();
        // Entry destructors may use the table again.
        drop(guard);
        drop(old);
    }

    /// Histogram of entry counts by offset from their chain head.
    pub fn distance_stats(&self) -> DistanceStats {
        let _g = self.reentrancy.enter("distance_stats");
        self.raw.distance_stats()
    }

    /// Entries in array order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.raw.slots().iter(),
            remaining: self.raw.len(),
        }
    }

    /// Entries in array order, with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let remaining = self.raw.len();
        IterMut {
            slots: self.raw.slots_mut().iter_mut(),
            remaining,
        }
    }
}

impl<K, V, S> FlatHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Value stored for `q`, if any.
    pub fn find<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("find");
        self.raw.find(q)
    }

    /// Mutable access to the value stored for `q`.
    pub fn find_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("find_mut");
        self.raw.find_mut(q)
    }

    /// True if `q` is present.
    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("contains_key");
        self.raw.contains_key(q)
    }

    /// Number of chain links a lookup of `q` follows from its home slot.
    pub fn probe_distance<Q>(&self, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("probe_distance");
        self.raw.probe_distance(q)
    }

    /// Insert a new entry, growing first if the table is full. A key that is
    /// already present is rejected and the table is left unchanged.
    ///
    /// If `K::hash` panics, the new entry is dropped and stored entries stay
    /// put, except during a rehash: entries not yet moved into the new
    /// storage are then dropped, as with `hashbrown`.
    pub fn insert(&mut self, key: K, value: V) -> Result<&mut V, InsertError> {
        let _g = self.reentrancy.enter("insert");
        self.raw.insert_with(key, || value)
    }

    /// Like `insert`, but `default` only runs once the key is known to be new.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> Result<&mut V, InsertError>
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter("insert_with");
        self.raw.insert_with(key, default)
    }

    /// Remove `q` and return its entry; the table is untouched when `q` is
    /// absent.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("remove");
        self.raw.remove(q)
    }

    /// Grow ahead of time so that `expected` entries in total fit without a
    /// rehash. A no-op when they already do.
    pub fn reserve(&mut self, expected: usize) -> Result<(), ReserveError> {
        let _g = self.reentrancy.enter("reserve");
        self.raw.reserve(expected)
    }

    /// Walk every chain and the whole free tree, checking that:
    /// - each chain head sits in its key's home bucket;
    /// - chain links are symmetric and hold only keys of that bucket;
    /// - the free tree is an ordered tree with consistent parent links;
    /// - live and free slots add up to the capacity, and the live count
    ///   matches `len()`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let _g = self.reentrancy.enter("validate");
        self.raw.validate()
    }

    /// `validate` that panics on failure in debug builds and does nothing in
    /// release builds.
    #[inline]
    pub fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        {
            if let Err(e) = self.validate() {
                panic!("table invariant violated: {e}");
            }
        }
    }
}

impl<K, V, S> fmt::Debug for FlatHashTable<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over entries in array order.
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied(entry) = slot {
                self.remaining -= 1;
                return Some((&entry.key, &entry.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over entries in array order with mutable values.
pub struct IterMut<'a, K, V> {
    slots: core::slice::IterMut<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied(entry) = slot {
                self.remaining -= 1;
                return Some((&entry.key, &mut entry.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a FlatHashTable<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut FlatHashTable<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}
