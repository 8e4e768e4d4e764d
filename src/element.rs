//! Element-type interface.
//!
//! A dictionary never knows what its keys and values are. Every byte-level
//! operation (construct, copy, destroy, compare, hash, print) is delegated
//! to an `ElementType` descriptor for the key type and one for the value
//! type. Elements live packed inside arena records, so implementations
//! must read and write through unaligned accesses.
//!
//! The `Element` trait bridges ordinary Rust values to element storage for
//! the safe `Dict` handle.

use core::any::Any;
use core::cmp::Ordering;
use core::fmt::{self, Write};
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ptr;
use std::collections::hash_map::DefaultHasher;
use std::sync::{Arc, OnceLock};

use crate::error::{DictError, Result};
use crate::repr::ReprAccumulator;

/// Shared handle to an element-type descriptor.
pub type TypeRef = Arc<dyn ElementType>;

/// Comparison requested of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn is_equality(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    /// Evaluate the op given the ordering of the left operand relative to
    /// the right one. `None` means unordered (e.g. NaN): only `Ne` holds.
    pub fn holds(self, ord: Option<Ordering>) -> bool {
        match ord {
            None => self == CompareOp::Ne,
            Some(ord) => match self {
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::Ne => ord != Ordering::Equal,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Ge => ord != Ordering::Less,
            },
        }
    }
}

/// Per-type operations the dictionary engine delegates to.
///
/// All pointer arguments address `bytecount()` bytes of element storage,
/// possibly unaligned.
pub trait ElementType: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Fixed size of one element in bytes.
    fn bytecount(&self) -> usize;

    /// # Safety
    /// `dst` must be valid for writes of `bytecount()` bytes and hold no
    /// live element.
    unsafe fn construct_default(&self, dst: *mut u8);

    /// # Safety
    /// `dst` as for `construct_default`; `src` must hold a live element.
    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8);

    /// Replace the live element at `dst` with a copy of `src`.
    ///
    /// # Safety
    /// Both must hold live elements.
    unsafe fn assign(&self, dst: *mut u8, src: *const u8) {
        if dst as *const u8 == src {
            return;
        }
        // Copy first: `src` may only be kept alive by the element at `dst`.
        let mut tmp = vec![0u8; self.bytecount()];
        self.copy_construct(tmp.as_mut_ptr(), src);
        self.destroy(dst);
        ptr::copy_nonoverlapping(tmp.as_ptr(), dst, self.bytecount());
    }

    /// # Safety
    /// `ptr` must hold a live element; it holds none afterwards.
    unsafe fn destroy(&self, ptr: *mut u8);

    /// # Safety
    /// Both must hold live elements.
    unsafe fn compare(&self, a: *const u8, b: *const u8, op: CompareOp) -> Result<bool>;

    /// # Safety
    /// `ptr` must hold a live element.
    unsafe fn hash32(&self, ptr: *const u8) -> Result<i32>;

    /// # Safety
    /// `ptr` must hold a live element.
    unsafe fn repr(&self, ptr: *const u8, out: &mut ReprAccumulator) -> fmt::Result;

    /// Whether memory holding an element of `self` may be reinterpreted as
    /// an element of `other`.
    fn is_binary_compatible_with(&self, other: &dyn ElementType) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Identity of an element type, used as the canonicalization key.
#[inline]
pub fn type_identity(ty: &TypeRef) -> usize {
    Arc::as_ptr(ty) as *const () as usize
}

/// Hash a value with a fixed-key hasher and fold it to 32 bits.
pub fn fold_hash32<T: Hash + ?Sized>(value: &T) -> i32 {
    let mut h = DefaultHasher::new();
    value.hash(&mut h);
    let x = h.finish();
    (x ^ (x >> 32)) as i32
}

/// Plain-old-data scalars stored by value.
pub trait Primitive: Copy + Default + PartialOrd + Send + Sync + 'static {
    const NAME: &'static str;

    fn hash32(self) -> i32;

    fn write_repr(self, out: &mut ReprAccumulator) -> fmt::Result;
}

impl Primitive for i64 {
    const NAME: &'static str = "Int64";

    fn hash32(self) -> i32 {
        fold_hash32(&self)
    }

    fn write_repr(self, out: &mut ReprAccumulator) -> fmt::Result {
        write!(out, "{}", self)
    }
}

impl Primitive for f64 {
    const NAME: &'static str = "Float64";

    fn hash32(self) -> i32 {
        // 0.0 == -0.0, so they must hash alike.
        let bits = if self == 0.0 { 0u64 } else { self.to_bits() };
        fold_hash32(&bits)
    }

    fn write_repr(self, out: &mut ReprAccumulator) -> fmt::Result {
        write!(out, "{:?}", self)
    }
}

impl Primitive for bool {
    const NAME: &'static str = "Bool";

    fn hash32(self) -> i32 {
        self as i32
    }

    fn write_repr(self, out: &mut ReprAccumulator) -> fmt::Result {
        write!(out, "{}", self)
    }
}

/// Element type for a `Primitive` scalar.
pub struct PrimitiveType<T> {
    _t: PhantomData<fn() -> T>,
}

pub type Int64Type = PrimitiveType<i64>;
pub type Float64Type = PrimitiveType<f64>;
pub type BoolType = PrimitiveType<bool>;

impl<T: Primitive> PrimitiveType<T> {
    fn new() -> Self {
        Self { _t: PhantomData }
    }

    #[inline]
    unsafe fn read(p: *const u8) -> T {
        ptr::read_unaligned(p as *const T)
    }
}

impl<T: Primitive> ElementType for PrimitiveType<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn bytecount(&self) -> usize {
        core::mem::size_of::<T>()
    }

    unsafe fn construct_default(&self, dst: *mut u8) {
        ptr::write_unaligned(dst as *mut T, T::default());
    }

    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) {
        ptr::write_unaligned(dst as *mut T, Self::read(src));
    }

    unsafe fn assign(&self, dst: *mut u8, src: *const u8) {
        self.copy_construct(dst, src);
    }

    unsafe fn destroy(&self, _ptr: *mut u8) {}

    unsafe fn compare(&self, a: *const u8, b: *const u8, op: CompareOp) -> Result<bool> {
        Ok(op.holds(Self::read(a).partial_cmp(&Self::read(b))))
    }

    unsafe fn hash32(&self, ptr: *const u8) -> Result<i32> {
        Ok(Self::read(ptr).hash32())
    }

    unsafe fn repr(&self, ptr: *const u8, out: &mut ReprAccumulator) -> fmt::Result {
        Self::read(ptr).write_repr(out)
    }

    fn is_binary_compatible_with(&self, other: &dyn ElementType) -> bool {
        other.as_any().is::<Self>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Element type for owned UTF-8 strings, stored as a `String` header.
pub struct StringType;

impl StringType {
    // Borrow the string at `p` without taking ownership.
    #[inline]
    unsafe fn peek(p: *const u8) -> ManuallyDrop<String> {
        ManuallyDrop::new(ptr::read_unaligned(p as *const String))
    }
}

impl ElementType for StringType {
    fn name(&self) -> &str {
        "String"
    }

    fn bytecount(&self) -> usize {
        core::mem::size_of::<String>()
    }

    unsafe fn construct_default(&self, dst: *mut u8) {
        ptr::write_unaligned(dst as *mut String, String::new());
    }

    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) {
        let s = Self::peek(src);
        ptr::write_unaligned(dst as *mut String, String::clone(&s));
    }

    unsafe fn destroy(&self, ptr: *mut u8) {
        drop(ptr::read_unaligned(ptr as *const String));
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8, op: CompareOp) -> Result<bool> {
        let (a, b) = (Self::peek(a), Self::peek(b));
        Ok(op.holds(Some(a.as_str().cmp(b.as_str()))))
    }

    unsafe fn hash32(&self, ptr: *const u8) -> Result<i32> {
        Ok(fold_hash32(Self::peek(ptr).as_str()))
    }

    unsafe fn repr(&self, ptr: *const u8, out: &mut ReprAccumulator) -> fmt::Result {
        write!(out, "{:?}", Self::peek(ptr).as_str())
    }

    fn is_binary_compatible_with(&self, other: &dyn ElementType) -> bool {
        other.as_any().is::<StringType>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A Rust value that can be copied into and out of element storage.
///
/// # Safety
/// `as_element_ptr` must point at a live element in the representation
/// of every type `fits` accepts, and `read_from` must produce an owned
/// value from such an element without consuming it.
pub unsafe trait Element: Sized {
    /// Whether elements of `ty` can be read back as `Self`.
    fn is_stored_as(ty: &dyn ElementType) -> bool;

    /// Whether this particular value can be stored as an element of `ty`.
    fn fits(&self, ty: &dyn ElementType) -> bool {
        Self::is_stored_as(ty)
    }

    /// Address of this value in element representation.
    fn as_element_ptr(&self) -> *const u8 {
        self as *const Self as *const u8
    }

    /// Copy the element at `src` out as an owned value. Fails with
    /// `TypeMismatch` if `ty` does not store `Self`.
    ///
    /// # Safety
    /// `src` must hold a live element of `ty`.
    unsafe fn read_from(ty: &dyn ElementType, src: *const u8) -> Result<Self> {
        if !Self::is_stored_as(ty) {
            return Err(DictError::TypeMismatch {
                expected: ty.name().to_string(),
                found: core::any::type_name::<Self>().to_string(),
            });
        }
        let mut out = MaybeUninit::<Self>::uninit();
        ty.copy_construct(out.as_mut_ptr() as *mut u8, src);
        Ok(out.assume_init())
    }
}

/// Element values whose type descriptor is fixed at compile time.
pub trait StaticElement: Element {
    fn element_type() -> TypeRef;
}

unsafe impl Element for i64 {
    fn is_stored_as(ty: &dyn ElementType) -> bool {
        ty.as_any().is::<Int64Type>()
    }
}

impl StaticElement for i64 {
    fn element_type() -> TypeRef {
        static TY: OnceLock<TypeRef> = OnceLock::new();
        TY.get_or_init(|| Arc::new(Int64Type::new())).clone()
    }
}

unsafe impl Element for f64 {
    fn is_stored_as(ty: &dyn ElementType) -> bool {
        ty.as_any().is::<Float64Type>()
    }
}

impl StaticElement for f64 {
    fn element_type() -> TypeRef {
        static TY: OnceLock<TypeRef> = OnceLock::new();
        TY.get_or_init(|| Arc::new(Float64Type::new())).clone()
    }
}

unsafe impl Element for bool {
    fn is_stored_as(ty: &dyn ElementType) -> bool {
        ty.as_any().is::<BoolType>()
    }
}

impl StaticElement for bool {
    fn element_type() -> TypeRef {
        static TY: OnceLock<TypeRef> = OnceLock::new();
        TY.get_or_init(|| Arc::new(BoolType::new())).clone()
    }
}

unsafe impl Element for String {
    fn is_stored_as(ty: &dyn ElementType) -> bool {
        ty.as_any().is::<StringType>()
    }
}

impl StaticElement for String {
    fn element_type() -> TypeRef {
        static TY: OnceLock<TypeRef> = OnceLock::new();
        TY.get_or_init(|| Arc::new(StringType)).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_types_are_singletons() {
        assert!(Arc::ptr_eq(&i64::element_type(), &i64::element_type()));
        assert!(Arc::ptr_eq(&String::element_type(), &String::element_type()));
        assert!(!Arc::ptr_eq(&i64::element_type(), &f64::element_type()));
    }

    #[test]
    fn compare_ops_follow_ordering() {
        let ty = i64::element_type();
        let (a, b) = (1i64, 2i64);
        let (pa, pb) = (a.as_element_ptr(), b.as_element_ptr());
        unsafe {
            assert!(ty.compare(pa, pb, CompareOp::Lt).unwrap());
            assert!(ty.compare(pa, pb, CompareOp::Le).unwrap());
            assert!(ty.compare(pa, pb, CompareOp::Ne).unwrap());
            assert!(!ty.compare(pa, pb, CompareOp::Eq).unwrap());
            assert!(!ty.compare(pa, pb, CompareOp::Gt).unwrap());
            assert!(ty.compare(pa, pa, CompareOp::Ge).unwrap());
        }
    }

    #[test]
    fn nan_is_unordered() {
        let ty = f64::element_type();
        let nan = f64::NAN;
        let p = nan.as_element_ptr();
        unsafe {
            assert!(!ty.compare(p, p, CompareOp::Eq).unwrap());
            assert!(ty.compare(p, p, CompareOp::Ne).unwrap());
        }
    }

    #[test]
    fn read_from_rejects_other_element_types() {
        let x = 7i64;
        let res = unsafe { f64::read_from(&*i64::element_type(), x.as_element_ptr()) };
        assert!(matches!(res, Err(DictError::TypeMismatch { .. })));
        let ok = unsafe { i64::read_from(&*i64::element_type(), x.as_element_ptr()) };
        assert_eq!(ok, Ok(7));
    }

    #[test]
    fn signed_zeros_hash_alike() {
        assert_eq!(0.0f64.hash32(), (-0.0f64).hash32());
    }

    #[test]
    fn strings_copy_and_destroy_at_unaligned_addresses() {
        let ty = String::element_type();
        let size = ty.bytecount();
        let mut buf = vec![0u8; size + 1];
        let src = "hello".to_string();
        unsafe {
            let dst = buf.as_mut_ptr().add(1);
            ty.copy_construct(dst, src.as_element_ptr());
            assert!(ty.compare(dst, src.as_element_ptr(), CompareOp::Eq).unwrap());
            assert_eq!(ty.hash32(dst).unwrap(), ty.hash32(src.as_element_ptr()).unwrap());
            let back = String::read_from(&*ty, dst).unwrap();
            assert_eq!(back, "hello");
            ty.destroy(dst);
        }
    }

    #[test]
    fn repr_of_builtins() {
        let mut acc = ReprAccumulator::new();
        unsafe {
            i64::element_type()
                .repr(42i64.as_element_ptr(), &mut acc)
                .unwrap();
            acc.write_str(" ").unwrap();
            f64::element_type()
                .repr(1.5f64.as_element_ptr(), &mut acc)
                .unwrap();
            acc.write_str(" ").unwrap();
            String::element_type()
                .repr("a\"b".to_string().as_element_ptr(), &mut acc)
                .unwrap();
        }
        assert_eq!(acc.as_str(), "42 1.5 \"a\\\"b\"");
    }

    #[test]
    fn binary_compatibility_is_by_concrete_type() {
        let i = i64::element_type();
        let f = f64::element_type();
        assert!(i.is_binary_compatible_with(&*i));
        assert!(!i.is_binary_compatible_with(&*f));
        assert!(!String::element_type().is_binary_compatible_with(&*i));
    }
}
