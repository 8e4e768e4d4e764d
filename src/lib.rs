//! typed-dict: a refcounted, open-addressing dictionary with a fixed,
//! C-compatible memory layout and pluggable element types.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: let compiled code manipulate dictionaries over raw memory
//!   without a generic object layer, while keeping each piece small enough
//!   to reason about on its own.
//! - Layers:
//!   - SlotArena: packed key/value records addressed by slot index, plus a
//!     population flag per slot. Freed slots are reused lowest-first.
//!   - HashIndex: linear-probing index from cached 32-bit hashes to slot
//!     indices, with back-shift deletion (no tombstones).
//!   - Layout: the `#[repr(C)]` header combining arena, index and an atomic
//!     refcount. Knows record sizes, never element types.
//!   - DictType: the `Dict(K->V)` descriptor. Owns the key/value
//!     `ElementType`s and exposes the engine operations over raw instance
//!     pointers (two-phase insert, lookup, delete, equality, printing).
//!   - Dict: safe owning handle; `Clone` shares, `Drop` releases.
//!
//! Constraints
//! - A dictionary value is one pointer to a shared layout. Copies share
//!   the layout: every alias sees every mutation. There is no
//!   copy-on-write.
//! - Refcount updates are atomic; table mutation is not. `Dict` is
//!   `!Send`/`!Sync`; the raw API leaves serialization to the caller.
//! - Dictionaries support only `Eq`/`Ne` comparison and are unhashable.
//! - Pointers returned by the engine are valid until the next mutation of
//!   the same layout (arena growth moves records; index growth does not).
//!
//! Allocation failure
//! - Growth is transactional: new buffers are allocated before old state is
//!   touched, and a failure returns `DictError::AllocationFailed` or
//!   `DictError::CapacityOverflow` with the dictionary unchanged.
//!
//! Type identity
//! - `DictType::make` interns one descriptor per (key type, value type)
//!   pair behind a single lock, so type identity is `Arc::ptr_eq`.
//!
//! Shared access
//! - Every alias reaches its layout through a shared reference. The index
//!   and arena sit in `UnsafeCell`s and are borrowed for one engine step
//!   at a time, so slot walks may interleave with inserts and removals.
//!
//! Reentrancy
//! - Each layout carries a debug-only guard around the sections where its
//!   buckets and slots are being edited; element callbacks that re-enter
//!   the same layout there panic in debug builds. Key and value destructors
//!   run after the entry is unlinked and may re-enter freely.

mod alloc;
mod arena;
mod cfg;
mod dict;
mod dict_type;
pub mod element;
mod error;
mod index;
pub mod layout;
mod registry;
mod reentrancy;
pub mod repr;
pub mod shared;

#[cfg(test)]
mod engine_proptest;

// Public surface
pub use arena::{MAX_ARENA_SLOTS, MIN_ARENA_SLOTS};
pub use dict::Dict;
pub use dict_type::DictType;
pub use element::{
    BoolType, CompareOp, Element, ElementType, Float64Type, Int64Type, StaticElement,
    StringType, TypeRef,
};
pub use error::{DictError, Result};
pub use index::MIN_INDEX_BUCKETS;
pub use repr::ReprAccumulator;
