//! Dict: safe, owning handle to one alias of a dictionary.
//!
//! Cloning a `Dict` does not copy entries; it creates another alias of the
//! same layout, and inserts or removals through either alias are visible
//! through both. Dropping the last alias destroys every live key and value.
//!
//! Because all aliases share mutable state without locking, `Dict` is
//! neither `Send` nor `Sync`. Code that needs to hand dictionaries across
//! threads must use the raw `DictType` instance API and serialize access
//! itself.

use core::any::type_name;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use std::sync::Arc;

use crate::dict_type::DictType;
use crate::element::{CompareOp, Element, ElementType, StaticElement, TypeRef};
use crate::error::{DictError, Result};
use crate::repr::ReprAccumulator;
use crate::shared::SharedLayout;

pub struct Dict {
    ty: Arc<DictType>,
    layout: SharedLayout,
    // !Send + !Sync: aliases mutate shared state without synchronization.
    _nosend: PhantomData<*mut ()>,
}

fn check_fits<T: Element>(value: &T, ty: &TypeRef) -> Result<()> {
    if value.fits(&**ty) {
        Ok(())
    } else {
        Err(DictError::TypeMismatch {
            expected: ty.name().to_string(),
            found: type_name::<T>().to_string(),
        })
    }
}

fn check_stored_as<T: Element>(ty: &TypeRef) -> Result<()> {
    if T::is_stored_as(&**ty) {
        Ok(())
    } else {
        Err(DictError::TypeMismatch {
            expected: ty.name().to_string(),
            found: type_name::<T>().to_string(),
        })
    }
}

impl Dict {
    /// An empty dictionary of type `ty`.
    pub fn new(ty: Arc<DictType>) -> Self {
        Self {
            ty,
            layout: SharedLayout::new(),
            _nosend: PhantomData,
        }
    }

    /// An empty `Dict(K->V)` for statically known element types.
    pub fn of<K: StaticElement, V: StaticElement>() -> Self {
        Self::new(DictType::make(K::element_type(), V::element_type()))
    }

    pub fn dict_type(&self) -> &Arc<DictType> {
        &self.ty
    }

    /// Address of this value in dictionary element representation, for use
    /// with the raw `DictType` API.
    #[inline]
    pub fn instance_ptr(&self) -> *const u8 {
        &self.layout as *const SharedLayout as *const u8
    }

    /// Identity of the shared layout. Equal for all aliases.
    pub fn identity(&self) -> usize {
        self.layout.as_ptr().as_ptr() as usize
    }

    /// Whether `self` and `other` are aliases of the same layout.
    pub fn ptr_eq(&self, other: &Dict) -> bool {
        self.identity() == other.identity()
    }

    pub fn len(&self) -> usize {
        self.layout.layout().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of aliases sharing this layout.
    pub fn refcount(&self) -> usize {
        self.layout.refcount()
    }

    pub fn slot_count(&self) -> usize {
        self.layout.layout().slot_count()
    }

    pub fn slot_populated(&self, slot: usize) -> bool {
        self.layout.layout().slot_populated(slot)
    }

    #[cfg(test)]
    pub(crate) fn raw_layout(&self) -> &crate::layout::Layout {
        self.layout.layout()
    }

    /// Populated slot indices in storage order. Each step re-reads the
    /// layout, so entries may be inserted or removed through any alias
    /// while iterating.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.layout.layout().populated_slots()
    }

    /// Insert or overwrite `key -> value`.
    pub fn insert<K: Element, V: Element>(&self, key: &K, value: &V) -> Result<()> {
        check_fits(key, self.ty.key_type())?;
        check_fits(value, self.ty.value_type())?;

        let inst = self.instance_ptr();
        let value_ty = self.ty.value_type();
        unsafe {
            match self.ty.lookup_value_by_key(inst, key.as_element_ptr())? {
                Some(existing) => value_ty.assign(existing, value.as_element_ptr()),
                None => {
                    let dst = self.ty.insert_key(inst, key.as_element_ptr())?;
                    value_ty.copy_construct(dst, value.as_element_ptr());
                }
            }
        }
        Ok(())
    }

    /// A copy of the value stored under `key`.
    pub fn get<K: Element, V: Element>(&self, key: &K) -> Result<Option<V>> {
        check_fits(key, self.ty.key_type())?;
        check_stored_as::<V>(self.ty.value_type())?;

        let value_ty = self.ty.value_type();
        unsafe {
            let found = self
                .ty
                .lookup_value_by_key(self.instance_ptr(), key.as_element_ptr())?;
            found.map(|p| V::read_from(&**value_ty, p)).transpose()
        }
    }

    pub fn contains_key<K: Element>(&self, key: &K) -> Result<bool> {
        check_fits(key, self.ty.key_type())?;
        unsafe {
            Ok(self
                .ty
                .lookup_value_by_key(self.instance_ptr(), key.as_element_ptr())?
                .is_some())
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove<K: Element>(&self, key: &K) -> Result<bool> {
        check_fits(key, self.ty.key_type())?;
        unsafe { self.ty.delete_key(self.instance_ptr(), key.as_element_ptr()) }
    }

    /// Copy of the entry at `slot`, if populated.
    pub fn entry_at_slot<K: Element, V: Element>(&self, slot: usize) -> Result<Option<(K, V)>> {
        check_stored_as::<K>(self.ty.key_type())?;
        check_stored_as::<V>(self.ty.value_type())?;
        if !self.slot_populated(slot) {
            return Ok(None);
        }
        let inst = self.instance_ptr();
        unsafe {
            let key = K::read_from(&**self.ty.key_type(), self.ty.key_at_slot(inst, slot))?;
            let value = V::read_from(&**self.ty.value_type(), self.ty.value_at_slot(inst, slot))?;
            Ok(Some((key, value)))
        }
    }

    /// Copies of every entry, in storage order.
    pub fn entries<K: Element, V: Element>(&self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::with_capacity(self.len());
        for slot in self.slots() {
            if let Some(entry) = self.entry_at_slot(slot)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Make `self` an alias of `other`, releasing the layout `self` held.
    pub fn assign(&mut self, other: &Dict) -> Result<()> {
        if !Arc::ptr_eq(&self.ty, &other.ty) {
            return Err(DictError::TypeMismatch {
                expected: self.ty.type_name().to_string(),
                found: other.ty.type_name().to_string(),
            });
        }
        let old = mem::replace(&mut self.layout, other.layout.acquire());
        unsafe { self.ty.release_layout(old) };
        Ok(())
    }

    /// Compare with another dictionary. Only `Eq` and `Ne` are supported.
    pub fn compare(&self, other: &Dict, op: CompareOp) -> Result<bool> {
        if !Arc::ptr_eq(&self.ty, &other.ty) {
            return Err(DictError::TypeMismatch {
                expected: self.ty.type_name().to_string(),
                found: other.ty.type_name().to_string(),
            });
        }
        unsafe {
            self.ty
                .compare(self.instance_ptr(), other.instance_ptr(), op)
        }
    }

    /// Always fails: dictionaries are mutable and cannot be hashed.
    pub fn hash32(&self) -> Result<i32> {
        unsafe { self.ty.hash32(self.instance_ptr()) }
    }

    /// Print into an existing session, so identities already being printed
    /// render as placeholders.
    pub fn repr_into(&self, out: &mut ReprAccumulator) -> fmt::Result {
        unsafe { self.ty.repr(self.instance_ptr(), out) }
    }
}

impl Clone for Dict {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty.clone(),
            layout: self.layout.acquire(),
            _nosend: PhantomData,
        }
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        // `SharedLayout` has no drop glue, so moving it out bitwise is fine.
        let alias = unsafe { core::ptr::read(&self.layout) };
        unsafe { self.ty.release_layout(alias) };
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Dict) -> bool {
        matches!(self.compare(other, CompareOp::Eq), Ok(true))
    }
}

impl fmt::Display for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut acc = ReprAccumulator::new();
        self.repr_into(&mut acc)?;
        f.write_str(acc.as_str())
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

unsafe impl Element for Dict {
    fn is_stored_as(ty: &dyn ElementType) -> bool {
        ty.as_any().is::<DictType>()
    }

    fn fits(&self, ty: &dyn ElementType) -> bool {
        let addr = ty as *const dyn ElementType as *const ();
        core::ptr::eq(addr, Arc::as_ptr(&self.ty) as *const ())
    }

    fn as_element_ptr(&self) -> *const u8 {
        self.instance_ptr()
    }

    unsafe fn read_from(ty: &dyn ElementType, src: *const u8) -> Result<Self> {
        let Some(dict_ty) = ty.as_any().downcast_ref::<DictType>() else {
            return Err(DictError::TypeMismatch {
                expected: ty.name().to_string(),
                found: type_name::<Dict>().to_string(),
            });
        };
        Ok(Self {
            // Descriptors are interned, so this returns the `Arc` behind `ty`.
            ty: DictType::make(dict_ty.key_type().clone(), dict_ty.value_type().clone()),
            layout: SharedLayout::acquire_from(src),
            _nosend: PhantomData,
        })
    }
}
