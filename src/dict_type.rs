//! DictType: the descriptor for `Dict(K->V)` and the engine's public
//! operations.
//!
//! Operations act on *instance pointers*: the address of a dictionary
//! value, which is itself one pointer to a shared `Layout`. This is the
//! surface compiled code uses directly; the safe `Dict` handle is a thin
//! wrapper over it.
//!
//! Insertion is two-phase: `insert_key` constructs the key and returns the
//! address of the still-uninitialized value, which the caller constructs
//! in place. Pointers handed out by `insert_key`, `lookup_value_by_key`,
//! `key_at_slot` and `value_at_slot` stay valid only until the next
//! mutation of the same layout.

use core::any::Any;
use core::fmt::{self, Write};
use core::ptr::NonNull;
use core::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cfg::trace;
use crate::element::{CompareOp, ElementType, TypeRef};
use crate::error::{DictError, Result};
use crate::layout::Layout;
use crate::registry;
use crate::repr::ReprAccumulator;
use crate::shared::SharedLayout;

pub struct DictType {
    name: String,
    key: TypeRef,
    value: TypeRef,
    bytes_per_key: usize,
    bytes_per_key_value_pair: usize,
}

impl fmt::Debug for DictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl DictType {
    pub(crate) fn new(key: TypeRef, value: TypeRef) -> Self {
        Self {
            name: format!("Dict({}->{})", key.name(), value.name()),
            bytes_per_key: key.bytecount(),
            bytes_per_key_value_pair: key.bytecount() + value.bytecount(),
            key,
            value,
        }
    }

    /// The canonical descriptor for `Dict(key->value)`. Repeated calls with
    /// the same element types return the same `Arc`.
    pub fn make(key: TypeRef, value: TypeRef) -> Arc<DictType> {
        registry::make(key, value)
    }

    /// Number of distinct dictionary types interned in this process.
    pub fn registered_types() -> usize {
        registry::registered()
    }

    pub fn type_name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> &TypeRef {
        &self.key
    }

    pub fn value_type(&self) -> &TypeRef {
        &self.value
    }

    pub fn bytes_per_key(&self) -> usize {
        self.bytes_per_key
    }

    pub fn bytes_per_key_value_pair(&self) -> usize {
        self.bytes_per_key_value_pair
    }

    #[inline]
    unsafe fn layout<'a>(inst: *const u8) -> &'a Layout {
        &*SharedLayout::peek(inst).as_ptr()
    }

    // Key comparator handed to the layout's probe loop.
    #[inline]
    fn key_eq(&self, key: *const u8) -> impl FnMut(*const u8) -> Result<bool> + '_ {
        move |stored| unsafe { self.key.compare(key, stored, CompareOp::Eq) }
    }

    /// Construct a new empty dictionary at `inst`.
    ///
    /// # Safety
    /// `inst` must be valid for a pointer-sized write and hold no live
    /// value.
    pub unsafe fn construct(&self, inst: *mut u8) {
        SharedLayout::new().write_to(inst);
    }

    /// Make `dst` another alias of the dictionary at `src`.
    ///
    /// # Safety
    /// `src` holds a live dictionary of this type; `dst` holds none.
    pub unsafe fn copy_instance(&self, dst: *mut u8, src: *const u8) {
        SharedLayout::acquire_from(src).write_to(dst);
    }

    /// Point `dst` at `src`'s layout, releasing whatever `dst` held.
    ///
    /// # Safety
    /// Both hold live dictionaries of this type.
    pub unsafe fn assign_instance(&self, dst: *mut u8, src: *const u8) {
        let incoming = SharedLayout::acquire_from(src);
        let outgoing = SharedLayout::take_from(dst);
        incoming.write_to(dst);
        self.release_layout(outgoing);
    }

    /// Drop the dictionary at `inst`.
    ///
    /// # Safety
    /// `inst` holds a live dictionary of this type; it holds none after.
    pub unsafe fn destroy_instance(&self, inst: *mut u8) {
        self.release_layout(SharedLayout::take_from(inst));
    }

    /// Release one alias; on the last one, destroy every live key and value
    /// and free the layout.
    ///
    /// # Safety
    /// `shared` must be a counted alias of a layout of this type and must not
    /// be used afterwards.
    pub unsafe fn release_layout(&self, shared: SharedLayout) {
        let Some(ptr) = shared.release() else {
            return;
        };
        self.teardown(ptr);
    }

    unsafe fn teardown(&self, ptr: NonNull<Layout>) {
        let record_size = self.bytes_per_key_value_pair;
        {
            let layout = ptr.as_ref();
            trace!(
                name = self.name.as_str(),
                entries = layout.len(),
                "destroying dict layout"
            );
            for slot in layout.populated_slots() {
                let item = layout.record(record_size, slot);
                self.key.destroy(item);
                self.value.destroy(item.add(self.bytes_per_key));
            }
        }
        Layout::free(ptr, record_size);
    }

    /// Number of live entries.
    ///
    /// # Safety
    /// `inst` holds a live dictionary of this type.
    pub unsafe fn size(&self, inst: *const u8) -> usize {
        Self::layout(inst).len()
    }

    /// Arena capacity in slots; iterate `0..slot_count` with
    /// `slot_populated` to visit entries.
    ///
    /// # Safety
    /// As for `size`.
    pub unsafe fn slot_count(&self, inst: *const u8) -> usize {
        Self::layout(inst).slot_count()
    }

    /// # Safety
    /// As for `size`.
    pub unsafe fn slot_populated(&self, inst: *const u8, slot: usize) -> bool {
        Self::layout(inst).slot_populated(slot)
    }

    /// # Safety
    /// As for `size`, and `slot < slot_count`.
    pub unsafe fn key_at_slot(&self, inst: *const u8, slot: usize) -> *mut u8 {
        Self::layout(inst).record(self.bytes_per_key_value_pair, slot)
    }

    /// # Safety
    /// As for `key_at_slot`.
    pub unsafe fn value_at_slot(&self, inst: *const u8, slot: usize) -> *mut u8 {
        self.key_at_slot(inst, slot).add(self.bytes_per_key)
    }

    /// Number of aliases sharing the layout at `inst`.
    ///
    /// # Safety
    /// As for `size`.
    pub unsafe fn refcount(&self, inst: *const u8) -> usize {
        Self::layout(inst).refcount.load(Ordering::Acquire)
    }

    /// Address of the value stored under `key`, or `None`.
    ///
    /// # Safety
    /// `inst` holds a live dictionary of this type; `key` holds a live key.
    pub unsafe fn lookup_value_by_key(
        &self,
        inst: *const u8,
        key: *const u8,
    ) -> Result<Option<*mut u8>> {
        let key_hash = self.key.hash32(key)?;
        let layout = Self::layout(inst);
        let found = layout.find(self.bytes_per_key_value_pair, key_hash, self.key_eq(key))?;
        Ok(found.map(|slot| {
            layout
                .record(self.bytes_per_key_value_pair, slot)
                .add(self.bytes_per_key)
        }))
    }

    /// Add `key` and return the address of its uninitialized value, which
    /// the caller must construct before the next operation on this layout.
    ///
    /// On error the dictionary is unchanged.
    ///
    /// # Safety
    /// `inst` holds a live dictionary of this type; `key` holds a live key
    /// that is not already present and does not live inside this
    /// dictionary's arena.
    pub unsafe fn insert_key(&self, inst: *const u8, key: *const u8) -> Result<*mut u8> {
        let key_hash = self.key.hash32(key)?;
        let layout = Self::layout(inst);
        let slot = layout.add(self.bytes_per_key_value_pair, key_hash)?;
        let item = layout.record(self.bytes_per_key_value_pair, slot);
        self.key.copy_construct(item, key);
        Ok(item.add(self.bytes_per_key))
    }

    /// Remove `key`, destroying its key and value. Returns whether an entry
    /// was removed.
    ///
    /// # Safety
    /// `inst` holds a live dictionary of this type; `key` holds a live key.
    pub unsafe fn delete_key(&self, inst: *const u8, key: *const u8) -> Result<bool> {
        let key_hash = self.key.hash32(key)?;
        let item = {
            let layout = Self::layout(inst);
            match layout.remove(self.bytes_per_key_value_pair, key_hash, self.key_eq(key))? {
                Some(slot) => layout.record(self.bytes_per_key_value_pair, slot),
                None => return Ok(false),
            }
        };

        // The entry is already unlinked, so element destructors may reenter.
        self.key.destroy(item);
        self.value.destroy(item.add(self.bytes_per_key));
        Ok(true)
    }

    /// Structural equality: same layout, or same size and every left entry
    /// present on the right with an equal value.
    ///
    /// # Safety
    /// Both hold live dictionaries of this type.
    pub unsafe fn equal_instances(&self, left: *const u8, right: *const u8) -> Result<bool> {
        let (l, r) = (SharedLayout::peek(left), SharedLayout::peek(right));
        if l == r {
            return Ok(true);
        }

        let layout = l.as_ref();
        if layout.len() != r.as_ref().len() {
            return Ok(false);
        }

        for slot in layout.populated_slots() {
            let key = layout.record(self.bytes_per_key_value_pair, slot);
            let value = key.add(self.bytes_per_key);
            match self.lookup_value_by_key(right, key)? {
                None => return Ok(false),
                Some(other) => {
                    if self.value.compare(value, other, CompareOp::Ne)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    unsafe fn repr_entries(&self, layout: &Layout, out: &mut ReprAccumulator) -> fmt::Result {
        out.write_char('{')?;
        for (i, slot) in layout.populated_slots().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            let key = layout.record(self.bytes_per_key_value_pair, slot);
            self.key.repr(key, out)?;
            out.write_str(": ")?;
            self.value.repr(key.add(self.bytes_per_key), out)?;
        }
        out.write_char('}')
    }
}

impl ElementType for DictType {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytecount(&self) -> usize {
        core::mem::size_of::<SharedLayout>()
    }

    unsafe fn construct_default(&self, dst: *mut u8) {
        self.construct(dst);
    }

    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) {
        self.copy_instance(dst, src);
    }

    unsafe fn assign(&self, dst: *mut u8, src: *const u8) {
        self.assign_instance(dst, src);
    }

    unsafe fn destroy(&self, ptr: *mut u8) {
        self.destroy_instance(ptr);
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8, op: CompareOp) -> Result<bool> {
        if !op.is_equality() {
            return Err(DictError::UnsupportedComparison {
                type_name: self.name.clone(),
                op,
            });
        }
        let equal = self.equal_instances(a, b)?;
        Ok(if op == CompareOp::Eq { equal } else { !equal })
    }

    unsafe fn hash32(&self, _ptr: *const u8) -> Result<i32> {
        Err(DictError::Unhashable {
            type_name: self.name.clone(),
        })
    }

    unsafe fn repr(&self, ptr: *const u8, out: &mut ReprAccumulator) -> fmt::Result {
        let layout = SharedLayout::peek(ptr);
        if let Some(mut scope) = out.enter(layout.as_ptr() as usize) {
            return self.repr_entries(layout.as_ref(), &mut scope);
        }
        write!(out, "{}({:p})", self.name, layout.as_ptr())
    }

    fn is_binary_compatible_with(&self, other: &dyn ElementType) -> bool {
        let other_addr = other as *const dyn ElementType as *const ();
        if core::ptr::eq(other_addr, self as *const Self as *const ()) {
            return true;
        }
        match other.as_any().downcast_ref::<DictType>() {
            Some(other) => {
                self.key.is_binary_compatible_with(&*other.key)
                    && self.value.is_binary_compatible_with(&*other.value)
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
