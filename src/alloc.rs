//! Fallible allocation used by both the 1-trie and the m-trie.
//!
//! Production builds always succeed here; the global allocator aborts
//! on real exhaustion like everywhere else in Rust. The countdown-based
//! fault injector only compiles into test builds, which is what lets
//! [Testable Property 5] (rollback-on-allocation-failure) be exercised
//! without any runtime cost or surface in the shipped crate.

use crate::error::{TableError, TableResult};

#[cfg(test)]
pub(crate) mod fault {
    use std::cell::Cell;

    thread_local! {
        static COUNTDOWN: Cell<Option<u64>> = const { Cell::new(None) };
    }

    /// Arm the injector: the `after`-th allocation from now on fails.
    /// `arm(0)` fails the very next allocation.
    pub fn arm(after: u64) {
        COUNTDOWN.with(|c| c.set(Some(after)));
    }

    /// Disarm the injector; allocations succeed again.
    pub fn disarm() {
        COUNTDOWN.with(|c| c.set(None));
    }

    pub(super) fn tick() -> bool {
        COUNTDOWN.with(|c| match c.get() {
            None => false,
            Some(0) => {
                c.set(None);
                true
            }
            Some(n) => {
                c.set(Some(n - 1));
                false
            }
        })
    }
}

/// Allocate `value` on the heap, failing with [`TableError::Resources`]
/// when the test-only fault injector has been armed to trip on this
/// call.
pub(crate) fn try_alloc<T>(value: T) -> TableResult<Box<T>> {
    #[cfg(test)]
    if fault::tick() {
        return Err(TableError::Resources);
    }
    Ok(Box::new(value))
}
