//! SharedLayout: manual retain/release over a `Layout` pointer.
//!
//! A dictionary value *is* one of these: a single pointer to a layout
//! header. Copying a dictionary shares the layout and bumps its atomic
//! count; every alias sees every mutation (there is no copy-on-write).
//!
//! `SharedLayout` has no `Drop`: tearing down a layout requires the key
//! and value element types to destroy the live records, which only the
//! owning `DictType` knows. `release` reports when the caller holds the
//! last reference and must do that teardown.

use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, Ordering};

use crate::layout::Layout;

// Beyond this many aliases we abort rather than risk wrapping the count.
const MAX_REFCOUNT: usize = isize::MAX as usize;

#[repr(transparent)]
pub struct SharedLayout {
    ptr: NonNull<Layout>,
}

impl SharedLayout {
    /// A fresh, empty layout with a count of one.
    pub fn new() -> Self {
        Self {
            ptr: Layout::allocate(),
        }
    }

    /// Address of the layout header; the identity of this dictionary.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<Layout> {
        self.ptr
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        unsafe { self.ptr.as_ref() }
    }

    /// Current number of aliases.
    pub fn refcount(&self) -> usize {
        self.layout().refcount.load(Ordering::Acquire)
    }

    /// Share the layout: a new alias with the count bumped.
    pub fn acquire(&self) -> Self {
        let old = self.layout().refcount.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
        Self { ptr: self.ptr }
    }

    /// Give up this alias. Returns the layout pointer if this was the last
    /// alias; the caller must then destroy the live records and free it.
    ///
    /// # Safety
    /// `self` must not be used again.
    pub unsafe fn release(&self) -> Option<NonNull<Layout>> {
        if self.layout().refcount.fetch_sub(1, Ordering::Release) != 1 {
            return None;
        }
        fence(Ordering::Acquire);
        Some(self.ptr)
    }

    /// Layout pointer stored in dictionary instance bytes at `inst`.
    ///
    /// # Safety
    /// `inst` must hold a live dictionary value.
    #[inline]
    pub unsafe fn peek(inst: *const u8) -> NonNull<Layout> {
        ptr::read_unaligned(inst as *const NonNull<Layout>)
    }

    /// A new counted alias of the dictionary value at `inst`.
    ///
    /// # Safety
    /// As for `peek`.
    pub unsafe fn acquire_from(inst: *const u8) -> Self {
        let borrowed = Self {
            ptr: Self::peek(inst),
        };
        borrowed.acquire()
    }

    /// Take over the alias stored at `inst`, leaving the bytes dead.
    ///
    /// # Safety
    /// As for `peek`; the bytes must not be used as a live value again.
    pub unsafe fn take_from(inst: *const u8) -> Self {
        Self {
            ptr: Self::peek(inst),
        }
    }

    /// Move this alias into instance bytes at `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for a pointer-sized write and hold no live value.
    pub unsafe fn write_to(self, dst: *mut u8) {
        ptr::write_unaligned(dst as *mut NonNull<Layout>, self.ptr);
    }
}

impl Default for SharedLayout {
    fn default() -> Self {
        Self::new()
    }
}
