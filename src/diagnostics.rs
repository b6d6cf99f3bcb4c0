//! Consistency checks and probe-distance statistics.

use crate::buffer::{Buffer, SlotView, MIN_CAPACITY};
use crate::slot::{SlotRef, TreeRef, MAX_CAPACITY};
use thiserror::Error;

/// A broken table invariant, reported by `FlatHashTable::validate`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "capacity {capacity} is not a multiple of {entries_per_bucket} within [{min}, {max}]",
        min = MIN_CAPACITY,
        max = MAX_CAPACITY
    )]
    BadCapacity {
        capacity: usize,
        entries_per_bucket: usize,
    },

    #[error("chain head at slot {pos} belongs to home bucket {home}")]
    HeadOutOfPlace { pos: usize, home: usize },

    #[error("chain headed at slot {head} holds a key from bucket {home} at slot {pos}")]
    ForeignKeyInChain { head: usize, pos: usize, home: usize },

    #[error("chain link from slot {from} to slot {to} is not mirrored by a back link")]
    BrokenChainLink { from: usize, to: usize },

    #[error("chain headed at slot {head} does not terminate")]
    ChainCycle { head: usize },

    #[error("{occupied} slots are occupied but only {chained} are reachable from chain heads")]
    UnreachableEntries { occupied: usize, chained: usize },

    #[error("free tree reaches occupied or out-of-range slot {pos}")]
    FreeTreeBadNode { pos: usize },

    #[error("free tree node {pos} has an inconsistent parent link")]
    FreeTreeParentMismatch { pos: usize },

    #[error("free tree node {pos} violates search order")]
    FreeTreeOrder { pos: usize },

    #[error("{live} live + {free} free slots do not add up to capacity {capacity}")]
    SizeMismatch {
        live: usize,
        free: usize,
        capacity: usize,
    },

    #[error("table records {stored} entries but holds {counted}")]
    LenMismatch { stored: usize, counted: usize },
}

/// Full walk of both structures. `home_of` maps a stored key to its home
/// bucket under the table's current capacity.
pub(crate) fn check<K, V>(
    buffer: &Buffer<K, V>,
    free_root: TreeRef,
    len: usize,
    entries_per_bucket: usize,
    home_of: impl Fn(&K) -> usize,
) -> Result<(), ValidationError> {
    let capacity = buffer.capacity();
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) || capacity % entries_per_bucket != 0 {
        return Err(ValidationError::BadCapacity {
            capacity,
            entries_per_bucket,
        });
    }

    let mut occupied = 0;
    let mut chained = 0;
    for head in 0..capacity {
        let SlotView::Occupied(entry) = buffer.view(head) else {
            continue;
        };
        occupied += 1;
        if !entry.is_head() {
            continue;
        }
        let home = home_of(&entry.key);
        if home != head {
            return Err(ValidationError::HeadOutOfPlace { pos: head, home });
        }

        let mut cursor = entry;
        let mut pos = head;
        let mut steps = 1;
        while let Some(next) = cursor.next.get() {
            steps += 1;
            if steps > capacity {
                return Err(ValidationError::ChainCycle { head });
            }
            let broken = ValidationError::BrokenChainLink { from: pos, to: next };
            if next >= capacity {
                return Err(broken);
            }
            let SlotView::Occupied(follower) = buffer.view(next) else {
                return Err(broken);
            };
            if follower.prev != SlotRef::at(pos) {
                return Err(broken);
            }
            let home = home_of(&follower.key);
            if home != head {
                return Err(ValidationError::ForeignKeyInChain {
                    head,
                    pos: next,
                    home,
                });
            }
            cursor = follower;
            pos = next;
        }
        chained += steps;
    }
    if chained != occupied {
        return Err(ValidationError::UnreachableEntries { occupied, chained });
    }

    let free = count_free_tree(buffer, free_root)?;
    if occupied + free != capacity {
        return Err(ValidationError::SizeMismatch {
            live: occupied,
            free,
            capacity,
        });
    }
    if occupied != len {
        return Err(ValidationError::LenMismatch {
            stored: len,
            counted: occupied,
        });
    }
    Ok(())
}

// Iterative walk with the open interval each node must fall in. Strictly
// shrinking bounds also rule out cycles.
fn count_free_tree<K, V>(buffer: &Buffer<K, V>, root: TreeRef) -> Result<usize, ValidationError> {
    let capacity = buffer.capacity();
    let Some(root_pos) = root.get() else {
        return Ok(0);
    };
    let mut stack = vec![(root_pos, TreeRef::NONE, 0, capacity)];
    let mut count = 0;
    while let Some((pos, parent, lo, hi)) = stack.pop() {
        if pos >= capacity {
            return Err(ValidationError::FreeTreeBadNode { pos });
        }
        let SlotView::Free(links) = buffer.view(pos) else {
            return Err(ValidationError::FreeTreeBadNode { pos });
        };
        if links.parent != parent {
            return Err(ValidationError::FreeTreeParentMismatch { pos });
        }
        if pos < lo || pos >= hi {
            return Err(ValidationError::FreeTreeOrder { pos });
        }
        count += 1;
        if let Some(left) = links.left.get() {
            stack.push((left, TreeRef::at(pos), lo, pos));
        }
        if let Some(right) = links.right.get() {
            stack.push((right, TreeRef::at(pos), pos + 1, hi));
        }
    }
    Ok(count)
}

/// Histogram over chain offsets, built from every chain in the table.
pub(crate) fn chain_offsets<K, V>(buffer: &Buffer<K, V>) -> DistanceStats {
    let mut histogram: Vec<usize> = Vec::new();
    for head in 0..buffer.capacity() {
        let SlotView::Occupied(mut entry) = buffer.view(head) else {
            continue;
        };
        if !entry.is_head() {
            continue;
        }
        let mut offset = 0;
        loop {
            if histogram.len() <= offset {
                histogram.resize(offset + 1, 0);
            }
            histogram[offset] += 1;
            let Some(next) = entry.next.get() else {
                break;
            };
            let SlotView::Occupied(follower) = buffer.view(next) else {
                unreachable!("chain link into free slot {next}");
            };
            entry = follower;
            offset += 1;
        }
    }
    DistanceStats { histogram }
}

/// Counts of entries by their 0-based offset from the head of their chain.
///
/// Offset 0 means the entry sits in its home slot; offset `d` means a lookup
/// follows `d` chain links to reach it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistanceStats {
    histogram: Vec<usize>,
}

impl DistanceStats {
    /// `histogram()[d]` is the number of entries at offset `d`.
    pub fn histogram(&self) -> &[usize] {
        &self.histogram
    }

    pub fn count_at(&self, offset: usize) -> usize {
        self.histogram.get(offset).copied().unwrap_or(0)
    }

    /// Total number of entries counted.
    pub fn entries(&self) -> usize {
        self.histogram.iter().sum()
    }

    pub fn max_distance(&self) -> Option<usize> {
        self.histogram.iter().rposition(|&c| c > 0)
    }

    /// Mean offset; 0.0 for an empty table.
    pub fn average(&self) -> f64 {
        let total = self.entries();
        if total == 0 {
            return 0.0;
        }
        let weighted: usize = self
            .histogram
            .iter()
            .enumerate()
            .map(|(d, &c)| d * c)
            .sum();
        weighted as f64 / total as f64
    }

    /// Smallest offset `d` such that at least `fraction` of all entries sit
    /// at offset `d` or closer. `fraction` is clamped to `[0, 1]`.
    pub fn percentile(&self, fraction: f64) -> Option<usize> {
        let total = self.entries();
        if total == 0 {
            return None;
        }
        let wanted = ((fraction.clamp(0.0, 1.0) * total as f64).ceil() as usize).max(1);
        let mut seen = 0;
        for (d, &c) in self.histogram.iter().enumerate() {
            seen += c;
            if seen >= wanted {
                return Some(d);
            }
        }
        self.max_distance()
    }
}
