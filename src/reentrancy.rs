//! Debug-only reentrancy check for layout mutation.
//!
//! Engine operations call back into element types (hash, compare) while a
//! layout's buckets or slots are being edited. An element type that
//! re-enters the same layout at that point would observe a half-updated
//! table. In debug builds the second entry panics; in release builds the
//! check is skipped.
//!
//! The depth counter is kept in every build so the `#[repr(C)]` layout
//! header has the same size regardless of profile.

use core::cell::Cell;

/// Per-layout busy marker. Guard engine entry-points with
/// `let _g = layout.busy.enter();`.
#[derive(Debug)]
#[repr(transparent)]
pub struct DebugReentrancy {
    depth: Cell<u32>,
}

impl DebugReentrancy {
    pub const fn new() -> Self {
        Self {
            depth: Cell::new(0),
        }
    }

    /// Mark the layout busy until the returned guard drops.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        let d = self.depth.get();
        if cfg!(debug_assertions) {
            assert!(
                d == 0,
                "reentrancy detected: dict layout entered while being modified"
            );
        }
        self.depth.set(d.wrapping_add(1));
        ReentrancyGuard { owner: self }
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.depth.get() != 0
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    owner: &'a DebugReentrancy,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        let d = self.owner.depth.get();
        debug_assert!(d > 0);
        self.owner.depth.set(d.wrapping_sub(1));
    }
}
