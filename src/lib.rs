//! flat-hash-table: a single-threaded hash table that keeps its entries,
//! its collision chains and its free-slot index in one contiguous array.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: chained hashing without per-node allocations and without a side
//!   array for bookkeeping. Every slot of the array is either an entry with
//!   chain links or a node of the free-slot search tree.
//! - Layers:
//!   - `slot`: the cell enum and the two link domains. Chain links hold
//!     forward positions, free-tree links hold mirrored positions, and both
//!     are typed newtypes with explicit conversions.
//!   - `buffer`: the shared all-free empty buffer or an owned `Vec` of slots.
//!   - `free_tree`: BST over free positions living inside the free slots;
//!     built balanced on allocation, spliced (never rebalanced) afterwards.
//!   - `raw_table`: chain maintenance, displacement and growth.
//!   - `FlatHashTable`: public API plus a debug-only reentrancy guard.
//!   - `diagnostics`: `validate` and probe-distance statistics.
//!
//! Invariants
//! - Home slot: a chain head always sits in its key's home bucket
//!   (`hash % (capacity / entries_per_bucket)`), so lookups start there.
//!   Inserting into a home slot held by another chain's continuation evicts
//!   that continuation; removing a head with followers pulls the first
//!   follower into the head.
//! - Every free slot is in the free tree exactly once, and
//!   `len + free = capacity`.
//! - Capacity is at least `MIN_CAPACITY` and a whole number of buckets.
//!
//! Growth
//! - Inserting when `len + 1` would reach the capacity doubles the table:
//!   a new array with a fresh balanced free tree is allocated first, then
//!   every entry is re-placed through the normal insert path. Allocation
//!   failure leaves the table untouched.
//! - A new or cleared table points at a process-wide shared empty buffer
//!   and owns no heap memory until the first insert.
//!
//! Notes and non-goals
//! - Single-threaded; mutation needs `&mut self`.
//! - No shrinking, no ordered iteration (iteration follows array order).
//! - Hashes are never cached: every placement recomputes the key's hash.

mod buffer;
mod diagnostics;
mod error;
pub mod flat_hash_table;
mod free_tree;
mod raw_table;
mod reentrancy;
mod slot;
mod table_proptest;

// Public surface
pub use buffer::MIN_CAPACITY;
pub use diagnostics::{DistanceStats, ValidationError};
pub use error::{InsertError, ReserveError};
pub use flat_hash_table::{FlatHashTable, Iter, IterMut, DEFAULT_ENTRIES_PER_BUCKET};
pub use slot::MAX_CAPACITY;
