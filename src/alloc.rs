//! Fallible raw buffer allocation shared by the arena and the index.
//!
//! Every growth path allocates its new buffers through here before
//! touching existing state, so a failure can be reported without leaving
//! a half-grown layout behind.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{DictError, Result};

// Alignment of the record arena. Element types read and write unaligned,
// so this only needs to be good enough for the common 8-byte case.
pub(crate) const ARENA_ALIGN: usize = 8;

// Byte layout for `count` records of `record_size` bytes.
pub(crate) fn arena_layout(record_size: usize, count: usize) -> Result<Layout> {
    let size = record_size
        .checked_mul(count)
        .ok_or(DictError::CapacityOverflow)?;
    Layout::from_size_align(size, ARENA_ALIGN).map_err(|_| DictError::CapacityOverflow)
}

// Allocate `layout`, returning a dangling (but aligned) pointer for
// zero-sized requests.
pub(crate) fn allocate(layout: Layout, zeroed: bool) -> Result<NonNull<u8>> {
    if layout.size() == 0 {
        // Safety: alignment is a non-zero power of two.
        return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
    }

    // Safety: size is non-zero.
    let ptr = unsafe {
        if zeroed {
            alloc::alloc_zeroed(layout)
        } else {
            alloc::alloc(layout)
        }
    };

    NonNull::new(ptr).ok_or(DictError::AllocationFailed {
        size: layout.size(),
        align: layout.align(),
    })
}

// Free a buffer obtained from `allocate` with the same layout.
pub(crate) unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() != 0 {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

// Allocate an array of `len` values of `T`, filled with `fill`.
pub(crate) fn allocate_array<T: Copy>(len: usize, fill: T) -> Result<NonNull<T>> {
    let layout = Layout::array::<T>(len).map_err(|_| DictError::CapacityOverflow)?;
    let ptr = allocate(layout, false)?.cast::<T>();
    for i in 0..len {
        // Safety: `ptr` has room for `len` values.
        unsafe { ptr.as_ptr().add(i).write(fill) };
    }
    Ok(ptr)
}

// Free an array obtained from `allocate_array`.
pub(crate) unsafe fn deallocate_array<T>(ptr: NonNull<T>, len: usize) {
    // The layout was valid when the array was allocated.
    if let Ok(layout) = Layout::array::<T>(len) {
        deallocate(ptr.cast(), layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_requests_do_not_touch_the_allocator() {
        let layout = arena_layout(0, 16).unwrap();
        let ptr = allocate(layout, false).unwrap();
        assert_eq!(ptr.as_ptr() as usize % ARENA_ALIGN, 0);
        unsafe { deallocate(ptr, layout) };
    }

    #[test]
    fn overflowing_arena_is_rejected() {
        assert_eq!(
            arena_layout(usize::MAX / 2, 4).unwrap_err(),
            DictError::CapacityOverflow
        );
    }

    #[test]
    fn arrays_are_filled() {
        let ptr = allocate_array::<i32>(5, -1).unwrap();
        for i in 0..5 {
            assert_eq!(unsafe { *ptr.as_ptr().add(i) }, -1);
        }
        unsafe { deallocate_array(ptr, 5) };
    }
}
