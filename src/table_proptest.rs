#![cfg(test)]

// Property tests for FlatHashTable kept inside the crate so they run against
// the same build the unit tests use. The structural check (`validate`) runs
// after every operation.

use crate::error::InsertError;
use crate::flat_hash_table::FlatHashTable;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Reserve(usize),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<String>, Vec<OpI>)> {
    let epb = proptest::sample::select(vec![1usize, 2, 4, 8]);
    let pool = proptest::collection::hash_set("[a-z]{0,4}", 1..=40)
        .prop_map(|set| set.into_iter().collect::<Vec<String>>());
    (epb, pool).prop_flat_map(|(epb, pool)| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            4 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,4}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => (0usize..80).prop_map(OpI::Reserve),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (epb, pool.clone(), ops))
    })
}

// State-machine equivalence against std::collections::HashMap:
// - Duplicate keys are rejected and leave the stored value alone.
// - `insert_with` runs its default exactly once, and only for new keys.
// - `remove` returns the owned `(K, V)` matching the model; absent keys are a no-op.
// - `find`/`find_mut`/`contains_key` agree with the model, including borrowed `&str` lookups.
// - `iter` yields each live entry exactly once.
// - After every op: `validate` passes, `len` matches, the distance histogram
//   accounts for every entry and `reserve`d room is not exceeded by a rehash.
fn run_state_machine<S>(
    mut sut: FlatHashTable<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let default_calls = Rc::new(Cell::new(0));
    // Capacity promised by the last reserve, cleared by `clear`.
    let mut reserved: Option<(usize, usize)> = None;

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.get(&k).copied();
                match sut.insert(k.clone(), v).map(|slot| *slot) {
                    Ok(stored) => {
                        prop_assert!(already.is_none(), "insert must fail on duplicate");
                        prop_assert_eq!(stored, v);
                        model.insert(k, v);
                    }
                    Err(InsertError::DuplicateKey) => {
                        prop_assert!(already.is_some(), "duplicate error only when key exists");
                        prop_assert_eq!(sut.find(&k).copied(), already);
                    }
                    Err(InsertError::Reserve(e)) => {
                        return Err(TestCaseError::fail(format!("unexpected growth failure: {e}")));
                    }
                }
            }
            OpI::InsertWith(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = default_calls.clone();
                let before = counter.get();
                let outcome = sut
                    .insert_with(k.clone(), move || {
                        counter.set(counter.get() + 1);
                        v
                    })
                    .map(|_| ());
                match outcome {
                    Ok(()) => {
                        prop_assert!(!already, "insert_with must fail on duplicate");
                        prop_assert_eq!(default_calls.get(), before + 1, "default must run exactly once on success");
                        model.insert(k, v);
                    }
                    Err(InsertError::DuplicateKey) => {
                        prop_assert!(already, "duplicate error only when key exists");
                        prop_assert_eq!(default_calls.get(), before, "default must not run on duplicate");
                    }
                    Err(InsertError::Reserve(e)) => {
                        return Err(TestCaseError::fail(format!("unexpected growth failure: {e}")));
                    }
                }
            }
            OpI::Remove(i) => {
                let k = key_from(pool, i);
                let capacity = sut.capacity();
                match (sut.remove(k.0.as_str()), model.remove(&k)) {
                    (Some((kk, vv)), Some(mv)) => {
                        prop_assert_eq!(kk, k);
                        prop_assert_eq!(vv, mv);
                    }
                    (None, None) => {}
                    (s, m) => {
                        return Err(TestCaseError::fail(format!("remove mismatch: table {s:?}, model {m:?}")));
                    }
                }
                prop_assert_eq!(sut.capacity(), capacity, "remove never resizes");
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                prop_assert_eq!(sut.find(&k), model.get(&k));
                prop_assert_eq!(sut.probe_distance(&k).is_some(), model.contains_key(&k));
            }
            OpI::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                match (sut.find_mut(&k), model.get_mut(&k)) {
                    (Some(sv), Some(mv)) => {
                        *sv = sv.saturating_add(d);
                        *mv = mv.saturating_add(d);
                    }
                    (None, None) => {}
                    _ => return Err(TestCaseError::fail("find_mut disagrees with model")),
                }
            }
            OpI::Reserve(n) => {
                if let Err(e) = sut.reserve(n) {
                    return Err(TestCaseError::fail(format!("reserve({n}) failed: {e}")));
                }
                if n > 0 {
                    prop_assert!(sut.capacity() > n, "reserve({}) left capacity {}", n, sut.capacity());
                    reserved = Some((n, sut.capacity()));
                }
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                reserved = None;
                prop_assert_eq!(sut.capacity(), crate::MIN_CAPACITY);
            }
            OpI::Iterate => {
                let s_keys: Vec<_> = sut.iter().map(|(k, _)| k.clone()).collect();
                let unique: BTreeSet<_> = s_keys.iter().cloned().collect();
                prop_assert_eq!(s_keys.len(), unique.len(), "iter yields each entry once");
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(unique, m_keys);
                for (k, v) in &sut {
                    prop_assert_eq!(Some(v), model.get(k));
                }
            }
        }

        // Post-conditions after each op
        if let Err(e) = sut.validate() {
            return Err(TestCaseError::fail(format!("invariant violated: {e}")));
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        prop_assert_eq!(sut.iter().len(), model.len());
        prop_assert_eq!(sut.distance_stats().entries(), model.len());
        prop_assert!(sut.load_factor() < 1.0);
        if let Some((n, capacity)) = reserved {
            if sut.len() <= n {
                prop_assert_eq!(sut.capacity(), capacity, "grew inside reserved room");
            } else {
                reserved = None;
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((epb, pool, ops) in arb_scenario()) {
        let sut = FlatHashTable::with_entries_per_bucket(epb);
        run_state_machine(sut, &pool, ops)?;
    }
}

// Collision variants: a constant hasher puts every key in one chain, and a
// low-entropy hasher produces a handful of long interleaved chains, which is
// what drives continuations into other buckets' home slots.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

#[derive(Clone, Default)]
struct ModSevenBuildHasher;
struct ModSevenHasher(u64);
impl BuildHasher for ModSevenBuildHasher {
    type Hasher = ModSevenHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ModSevenHasher(0)
    }
}
impl Hasher for ModSevenHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(b as u64);
        }
    }
    fn finish(&self) -> u64 {
        self.0 % 7
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((epb, pool, ops) in arb_scenario()) {
        let sut = FlatHashTable::with_entries_per_bucket_and_hasher(epb, ConstBuildHasher);
        run_state_machine(sut, &pool, ops)?;
    }

    #[test]
    fn prop_state_machine_with_few_buckets((epb, pool, ops) in arb_scenario()) {
        let sut = FlatHashTable::with_entries_per_bucket_and_hasher(epb, ModSevenBuildHasher);
        run_state_machine(sut, &pool, ops)?;
    }
}
