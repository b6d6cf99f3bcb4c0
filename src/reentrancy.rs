//! Debug-only reentrancy guard.
//!
//! Table operations call into user code (`Hash`, `Eq`) while the table can be
//! mid-update, for example during a rehash when part of the entries are still
//! in the old storage. A nested call into the same table from that user code
//! would observe the partial state, so debug builds panic on it. Release
//! builds compile the guard away.

use core::cell::Cell;
use core::marker::PhantomData;

/// Embedded in the table; every public entry point takes it with
/// `let _g = self.reentrancy.enter("op");`.
#[derive(Debug, Default)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    active: Cell<Option<&'static str>>,
    // Send + !Sync in every profile, not only when `active` is compiled in.
    _unsync: PhantomData<Cell<()>>,
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(None),
            _unsync: PhantomData,
        }
    }

    /// Mark `op` as running. Panics in debug builds if another operation on
    /// the same table has not finished.
    #[inline]
    pub(crate) fn enter(&self, op: &'static str) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.replace(Some(op)) {
                self.active.set(Some(outer));
                panic!("reentrant `{op}` on a table while `{outer}` is in progress");
            }
            return ReentrancyGuard { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = op;
            return ReentrancyGuard { _owner: PhantomData };
        }
    }
}

pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _owner: PhantomData<&'a DebugReentrancy>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.active.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::DebugReentrancy;

    #[test]
    fn sequential_entries_are_allowed() {
        let r = DebugReentrancy::new();
        drop(r.enter("insert"));
        drop(r.enter("remove"));
        let _g = r.enter("find");
    }

    #[cfg(debug_assertions)]
    #[test]
    fn nested_entry_panics_and_names_both_operations() {
        let r = DebugReentrancy::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _outer = r.enter("insert");
            let _inner = r.enter("find");
        }));
        let err = res.expect_err("nested entry must panic in debug builds");
        let msg = err
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(msg.contains("`find`") && msg.contains("`insert`"), "{msg}");
        // The outer guard was released during unwinding.
        let _g = r.enter("remove");
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn nested_entry_is_a_noop_in_release() {
        let r = DebugReentrancy::new();
        let _a = r.enter("insert");
        let _b = r.enter("find");
    }
}
