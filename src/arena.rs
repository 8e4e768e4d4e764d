//! SlotArena: growable storage of fixed-size key/value records.
//!
//! Records are addressed by slot index. A parallel flag array marks which
//! slots hold a live, constructed key/value pair. The arena never
//! constructs or destroys elements itself; it only hands out and reclaims
//! slot indices and grows its buffers.

use std::ptr::{self, NonNull};

use crate::alloc::{allocate, allocate_array, arena_layout, deallocate, deallocate_array};
use crate::cfg::trace;
use crate::error::{DictError, Result};

/// Smallest arena allocated on first insertion.
pub const MIN_ARENA_SLOTS: usize = 4;

/// Largest arena: slot indices are stored as non-negative `i32` in the
/// hash index.
pub const MAX_ARENA_SLOTS: usize = i32::MAX as usize;

// Eight populated flags read as one word.
const ALL_POPULATED: u64 = u64::from_ne_bytes([1; 8]);

#[repr(C)]
pub struct SlotArena {
    items: NonNull<u8>,
    items_populated: NonNull<u8>,
    items_reserved: usize,
    // Every slot below this index is populated.
    free_hint: usize,
    // Unpopulated slots below `items_reserved`.
    items_free: usize,
}

// Capacity after the next growth step.
fn next_capacity(reserved: usize) -> Result<usize> {
    let next = if reserved == 0 {
        MIN_ARENA_SLOTS
    } else {
        reserved.checked_mul(2).ok_or(DictError::CapacityOverflow)?
    };
    if next > MAX_ARENA_SLOTS {
        return Err(DictError::CapacityOverflow);
    }
    Ok(next)
}

impl SlotArena {
    pub const fn new() -> Self {
        Self {
            items: NonNull::dangling(),
            items_populated: NonNull::dangling(),
            items_reserved: 0,
            free_hint: 0,
            items_free: 0,
        }
    }

    /// Allocated slot capacity (not the live count).
    #[inline]
    pub fn reserved(&self) -> usize {
        self.items_reserved
    }

    #[inline]
    pub fn is_populated(&self, slot: usize) -> bool {
        slot < self.items_reserved && unsafe { *self.items_populated.as_ptr().add(slot) != 0 }
    }

    /// Address of the record at `slot`.
    ///
    /// The pointer is valid until the arena next grows.
    #[inline]
    pub fn record(&self, record_size: usize, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.items_reserved);
        unsafe { self.items.as_ptr().add(slot * record_size) }
    }

    #[cfg(test)]
    pub fn populated_count(&self) -> usize {
        (0..self.items_reserved)
            .filter(|&i| self.is_populated(i))
            .count()
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.items_free
    }

    // Lowest unpopulated slot at or after `start`. Whole words of
    // populated flags are skipped eight at a time.
    fn first_free_from(&self, start: usize) -> Option<usize> {
        let flags = self.items_populated.as_ptr();
        let mut i = start;
        while i + 8 <= self.items_reserved {
            let word = unsafe { (flags.add(i) as *const u64).read_unaligned() };
            if word != ALL_POPULATED {
                break;
            }
            i += 8;
        }
        (i..self.items_reserved).find(|&slot| !self.is_populated(slot))
    }

    /// Claim a slot: the lowest unpopulated one, or a fresh one after
    /// growing. On error the arena is unchanged.
    pub fn allocate_slot(&mut self, record_size: usize) -> Result<usize> {
        let free = if self.items_free == 0 {
            None
        } else {
            self.first_free_from(self.free_hint)
        };

        let slot = match free {
            Some(slot) => slot,
            None => {
                let slot = self.items_reserved;
                self.grow(record_size)?;
                slot
            }
        };

        unsafe { *self.items_populated.as_ptr().add(slot) = 1 };
        self.items_free -= 1;
        self.free_hint = slot + 1;
        Ok(slot)
    }

    /// Mark `slot` as free. The caller has already destroyed (or is about
    /// to destroy) the record's elements.
    pub fn free_slot(&mut self, slot: usize) {
        debug_assert!(self.is_populated(slot));
        unsafe { *self.items_populated.as_ptr().add(slot) = 0 };
        self.items_free += 1;
        self.free_hint = self.free_hint.min(slot);
    }

    // Double the capacity. New buffers are fully allocated before the old
    // ones are released.
    fn grow(&mut self, record_size: usize) -> Result<()> {
        let new_reserved = next_capacity(self.items_reserved)?;

        let new_layout = arena_layout(record_size, new_reserved)?;
        let new_items = allocate(new_layout, false)?;
        let new_populated = match allocate_array::<u8>(new_reserved, 0) {
            Ok(p) => p,
            Err(e) => {
                unsafe { deallocate(new_items, new_layout) };
                return Err(e);
            }
        };

        trace!(
            from = self.items_reserved,
            to = new_reserved,
            "growing slot arena"
        );

        let old_reserved = self.items_reserved;
        let old_free = self.items_free;
        let old_hint = self.free_hint;
        unsafe {
            ptr::copy_nonoverlapping(
                self.items.as_ptr(),
                new_items.as_ptr(),
                old_reserved * record_size,
            );
            ptr::copy_nonoverlapping(
                self.items_populated.as_ptr(),
                new_populated.as_ptr(),
                old_reserved,
            );
            self.release_buffers(record_size);
        }

        self.items = new_items;
        self.items_populated = new_populated;
        self.items_reserved = new_reserved;
        self.items_free = old_free + (new_reserved - old_reserved);
        self.free_hint = old_hint.min(old_reserved);
        Ok(())
    }

    /// Free the buffers without touching any record contents.
    ///
    /// # Safety
    /// The caller must have destroyed every populated record first and must
    /// not use the arena afterwards except to drop or reinitialize it.
    pub unsafe fn release_buffers(&mut self, record_size: usize) {
        if self.items_reserved == 0 {
            return;
        }
        if let Ok(layout) = arena_layout(record_size, self.items_reserved) {
            deallocate(self.items, layout);
        }
        deallocate_array(self.items_populated, self.items_reserved);
        *self = Self::new();
    }
}

impl Default for SlotArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: usize = 16;

    #[test]
    fn first_allocation_grows_to_minimum() {
        let mut a = SlotArena::new();
        assert_eq!(a.reserved(), 0);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 0);
        assert_eq!(a.reserved(), MIN_ARENA_SLOTS);
        assert!(a.is_populated(0));
        assert!(!a.is_populated(1));
        unsafe { a.release_buffers(RECORD) };
    }

    #[test]
    fn lowest_free_slot_is_reused_before_growing() {
        let mut a = SlotArena::new();
        for i in 0..MIN_ARENA_SLOTS {
            assert_eq!(a.allocate_slot(RECORD).unwrap(), i);
        }
        a.free_slot(2);
        a.free_slot(1);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 1);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 2);
        assert_eq!(a.reserved(), MIN_ARENA_SLOTS);

        // Full again: the next slot comes from growth.
        assert_eq!(a.allocate_slot(RECORD).unwrap(), MIN_ARENA_SLOTS);
        assert_eq!(a.reserved(), MIN_ARENA_SLOTS * 2);
        assert_eq!(a.populated_count(), MIN_ARENA_SLOTS + 1);
        unsafe { a.release_buffers(RECORD) };
    }

    #[test]
    fn growth_preserves_record_bytes() {
        let mut a = SlotArena::new();
        for i in 0..MIN_ARENA_SLOTS {
            let slot = a.allocate_slot(RECORD).unwrap();
            unsafe { a.record(RECORD, slot).write_bytes(i as u8 + 1, RECORD) };
        }
        a.allocate_slot(RECORD).unwrap();
        for i in 0..MIN_ARENA_SLOTS {
            let byte = unsafe { *a.record(RECORD, i).add(RECORD - 1) };
            assert_eq!(byte, i as u8 + 1);
        }
        unsafe { a.release_buffers(RECORD) };
    }

    #[test]
    fn failed_growth_leaves_arena_unchanged() {
        let mut a = SlotArena::new();
        let huge = usize::MAX / 2;
        assert_eq!(a.allocate_slot(huge), Err(DictError::CapacityOverflow));
        assert_eq!(a.reserved(), 0);
        assert_eq!(a.populated_count(), 0);
    }

    /// Free one low and one high slot in a large arena: both are found
    /// lowest first, across whole words of populated flags, and the free
    /// count drops back to zero before growth resumes.
    #[test]
    fn scattered_free_slots_are_found_lowest_first() {
        let mut a = SlotArena::new();
        for i in 0..40 {
            assert_eq!(a.allocate_slot(RECORD).unwrap(), i);
        }
        assert_eq!(a.reserved(), 64);
        assert_eq!(a.free_count(), 24);

        a.free_slot(37);
        a.free_slot(3);
        assert_eq!(a.free_count(), 26);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 3);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 37);
        assert_eq!(a.allocate_slot(RECORD).unwrap(), 40);
        assert_eq!(a.free_count(), 23);
        assert_eq!(a.populated_count(), 41);
        unsafe { a.release_buffers(RECORD) };
    }

    #[test]
    fn free_count_tracks_growth_and_release() {
        let mut a = SlotArena::new();
        for _ in 0..MIN_ARENA_SLOTS {
            a.allocate_slot(RECORD).unwrap();
        }
        assert_eq!(a.free_count(), 0);
        a.allocate_slot(RECORD).unwrap();
        assert_eq!(a.free_count(), MIN_ARENA_SLOTS - 1);
        assert_eq!(a.free_count(), a.reserved() - a.populated_count());
        unsafe { a.release_buffers(RECORD) };
    }

    /// Slot indices must stay representable as non-negative `i32`.
    #[test]
    fn capacity_is_capped_at_i32_range() {
        assert_eq!(next_capacity(0), Ok(MIN_ARENA_SLOTS));
        assert_eq!(next_capacity(1 << 29), Ok(1 << 30));
        assert_eq!(next_capacity(1 << 30), Err(DictError::CapacityOverflow));
        assert_eq!(next_capacity(usize::MAX), Err(DictError::CapacityOverflow));
    }

    #[test]
    fn zero_sized_records_still_track_population() {
        let mut a = SlotArena::new();
        let s0 = a.allocate_slot(0).unwrap();
        let s1 = a.allocate_slot(0).unwrap();
        assert_eq!((s0, s1), (0, 1));
        a.free_slot(0);
        assert!(!a.is_populated(0));
        assert!(a.is_populated(1));
        unsafe { a.release_buffers(0) };
    }
}
