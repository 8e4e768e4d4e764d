//! Layout: the shared heap record behind every alias of one dictionary.
//!
//! The header is `#[repr(C)]` and a dictionary value is a single pointer
//! to it (see `shared::SharedLayout`). It owns a `SlotArena` of packed
//! key/value records and a `HashIndex` over them. The methods here work in
//! terms of record sizes, hashes and slot indices only; element
//! construction and destruction stay with the caller (`DictType`), which
//! knows the element types.
//!
//! Every alias reaches the header through `&Layout`. The index and arena
//! live in `UnsafeCell`s and are borrowed for one engine step at a time,
//! so a shared reference held across a mutation (an iterator over slots,
//! say) always re-reads the current buffers.

use core::cell::UnsafeCell;
use core::sync::atomic::AtomicUsize;
use std::ptr::NonNull;

use crate::arena::SlotArena;
use crate::error::Result;
use crate::index::HashIndex;
use crate::reentrancy::DebugReentrancy;

#[repr(C)]
pub struct Layout {
    pub(crate) refcount: AtomicUsize,
    index: UnsafeCell<HashIndex>,
    arena: UnsafeCell<SlotArena>,
    busy: DebugReentrancy,
}

impl Layout {
    /// Allocate an empty layout with a refcount of one.
    pub(crate) fn allocate() -> NonNull<Layout> {
        let boxed = Box::new(Layout {
            refcount: AtomicUsize::new(1),
            index: UnsafeCell::new(HashIndex::new()),
            arena: UnsafeCell::new(SlotArena::new()),
            busy: DebugReentrancy::new(),
        });
        NonNull::from(Box::leak(boxed))
    }

    /// Free the buffers and the header.
    ///
    /// # Safety
    /// `ptr` came from `allocate`, its refcount has reached zero, and every
    /// populated record has already been destroyed.
    pub(crate) unsafe fn free(ptr: NonNull<Layout>, record_size: usize) {
        let mut boxed = Box::from_raw(ptr.as_ptr());
        boxed.arena.get_mut().release_buffers(record_size);
        boxed.index.get_mut().release();
    }

    // Shared views. Callers drop them before the cell is next written.
    #[inline]
    fn arena(&self) -> &SlotArena {
        unsafe { &*self.arena.get() }
    }

    #[inline]
    fn index(&self) -> &HashIndex {
        unsafe { &*self.index.get() }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.index().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    /// Slot capacity of the arena.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.arena().reserved()
    }

    #[inline]
    pub fn slot_populated(&self, slot: usize) -> bool {
        self.arena().is_populated(slot)
    }

    /// Address of the record at `slot`: key bytes, then value bytes.
    #[inline]
    pub fn record(&self, record_size: usize, slot: usize) -> *mut u8 {
        self.arena().record(record_size, slot)
    }

    /// Number of index buckets. Exposed for diagnostics only.
    pub fn bucket_count(&self) -> usize {
        self.index().buckets()
    }

    /// Populated slot indices in storage order.
    ///
    /// Each step reads the arena afresh, so the layout may be mutated
    /// between steps; slots added past the cursor are visited, slots freed
    /// ahead of it are skipped.
    pub fn populated_slots(&self) -> PopulatedSlots<'_> {
        PopulatedSlots {
            layout: self,
            next: 0,
        }
    }

    /// Slot holding a key equal to the probe. `eq` receives the address of
    /// a candidate record and is only invoked on cached-hash matches; it
    /// must not mutate this layout.
    pub fn find<F>(&self, record_size: usize, hash: i32, mut eq: F) -> Result<Option<usize>>
    where
        F: FnMut(*const u8) -> Result<bool>,
    {
        let _g = self.busy.enter();
        self.index()
            .find(hash, |slot| eq(self.arena().record(record_size, slot)))
    }

    /// Claim a slot for a new entry with `hash` and register it in the
    /// index. The record is left unconstructed. On error nothing observable
    /// changes.
    pub(crate) fn add(&self, record_size: usize, hash: i32) -> Result<usize> {
        let _g = self.busy.enter();
        // Safety: each cell is borrowed for one call and nothing else
        // holds a view of it; element callbacks do not run here.
        unsafe {
            (*self.index.get()).reserve_one()?;
            let slot = (*self.arena.get()).allocate_slot(record_size)?;
            (*self.index.get()).insert(hash, slot);
            Ok(slot)
        }
    }

    /// Unlink the entry matching the probe and free its slot. The caller
    /// destroys the record's elements. `eq` must not mutate this layout.
    pub(crate) fn remove<F>(&self, record_size: usize, hash: i32, mut eq: F) -> Result<Option<usize>>
    where
        F: FnMut(*const u8) -> Result<bool>,
    {
        let _g = self.busy.enter();
        // Safety: the comparator only reads the arena while the index is
        // borrowed mutably; the arena is mutated after that borrow ends.
        unsafe {
            let removed = (*self.index.get())
                .remove(hash, |slot| eq(self.arena().record(record_size, slot)))?;
            if let Some(slot) = removed {
                (*self.arena.get()).free_slot(slot);
            }
            Ok(removed)
        }
    }

    /// Check the structural invariants. Used by tests.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let arena = self.arena();
        let populated = arena.populated_count();
        assert!(self.len() <= populated, "more entries than populated slots");
        assert!(populated <= self.slot_count(), "populated beyond capacity");
        assert_eq!(self.len(), populated, "leaked or orphaned slot");
        assert_eq!(arena.free_count(), self.slot_count() - populated);
        assert!(self.len() * 4 <= self.bucket_count() * 3 || self.bucket_count() == 0);
    }
}

/// Iterator returned by `Layout::populated_slots`.
pub struct PopulatedSlots<'a> {
    layout: &'a Layout,
    next: usize,
}

impl Iterator for PopulatedSlots<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let arena = self.layout.arena();
        while self.next < arena.reserved() {
            let slot = self.next;
            self.next += 1;
            if arena.is_populated(slot) {
                return Some(slot);
            }
        }
        None
    }
}
