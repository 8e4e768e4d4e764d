//! HashIndex: open-addressing index from cached 32-bit hashes to arena
//! slot indices.
//!
//! Buckets are two parallel arrays (`slots`, `hashes`) of power-of-two
//! length. Collisions are resolved by linear probing, and removal uses
//! back-shift deletion, so the table never carries tombstones and a probe
//! can always stop at the first empty bucket.

use std::ptr::NonNull;

use crate::alloc::{allocate_array, deallocate_array};
use crate::arena::MAX_ARENA_SLOTS;
use crate::cfg::trace;
use crate::error::{DictError, Result};

/// Slot value marking an empty bucket.
pub const EMPTY_SLOT: i32 = -1;

/// Bucket count allocated on first insertion.
pub const MIN_INDEX_BUCKETS: usize = 8;

// Maximum load factor, as a fraction.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

#[repr(C)]
pub struct HashIndex {
    hash_table_slots: NonNull<i32>,
    hash_table_hashes: NonNull<i32>,
    hash_table_size: usize,
    hash_table_count: usize,
}

#[inline]
fn home(hash: i32, mask: usize) -> usize {
    (hash as u32 as usize) & mask
}

impl HashIndex {
    pub const fn new() -> Self {
        Self {
            hash_table_slots: NonNull::dangling(),
            hash_table_hashes: NonNull::dangling(),
            hash_table_size: 0,
            hash_table_count: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.hash_table_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hash_table_count == 0
    }

    /// Number of buckets.
    #[inline]
    pub fn buckets(&self) -> usize {
        self.hash_table_size
    }

    #[inline]
    fn slot_at(&self, bucket: usize) -> i32 {
        unsafe { *self.hash_table_slots.as_ptr().add(bucket) }
    }

    #[inline]
    fn hash_at(&self, bucket: usize) -> i32 {
        unsafe { *self.hash_table_hashes.as_ptr().add(bucket) }
    }

    #[inline]
    fn set(&mut self, bucket: usize, slot: i32, hash: i32) {
        unsafe {
            *self.hash_table_slots.as_ptr().add(bucket) = slot;
            *self.hash_table_hashes.as_ptr().add(bucket) = hash;
        }
    }

    // Locate the bucket holding a key equal to the probe, as judged by
    // `eq(slot)`. `eq` only runs on cached-hash matches.
    fn find_bucket<F>(&self, hash: i32, mut eq: F) -> Result<Option<usize>>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        if self.hash_table_size == 0 {
            return Ok(None);
        }

        let mask = self.hash_table_size - 1;
        let mut bucket = home(hash, mask);
        loop {
            let slot = self.slot_at(bucket);
            if slot == EMPTY_SLOT {
                return Ok(None);
            }
            if self.hash_at(bucket) == hash && eq(slot as usize)? {
                return Ok(Some(bucket));
            }
            bucket = (bucket + 1) & mask;
        }
    }

    /// Slot index of the entry whose key matches, if any.
    pub fn find<F>(&self, hash: i32, eq: F) -> Result<Option<usize>>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        Ok(self
            .find_bucket(hash, eq)?
            .map(|bucket| self.slot_at(bucket) as usize))
    }

    /// Make room for one more entry, growing and rehashing if the load
    /// factor would be exceeded. On error the index is unchanged.
    pub fn reserve_one(&mut self) -> Result<()> {
        let needed = self.hash_table_count + 1;
        if needed * MAX_LOAD_DEN <= self.hash_table_size * MAX_LOAD_NUM {
            return Ok(());
        }

        let mut new_size = if self.hash_table_size == 0 {
            MIN_INDEX_BUCKETS
        } else {
            self.hash_table_size
                .checked_mul(2)
                .ok_or(DictError::CapacityOverflow)?
        };
        while needed * MAX_LOAD_DEN > new_size * MAX_LOAD_NUM {
            new_size = new_size.checked_mul(2).ok_or(DictError::CapacityOverflow)?;
        }
        self.rehash(new_size)
    }

    fn rehash(&mut self, new_size: usize) -> Result<()> {
        debug_assert!(new_size.is_power_of_two());

        let new_slots = allocate_array::<i32>(new_size, EMPTY_SLOT)?;
        let new_hashes = match allocate_array::<i32>(new_size, 0) {
            Ok(h) => h,
            Err(e) => {
                unsafe { deallocate_array(new_slots, new_size) };
                return Err(e);
            }
        };

        trace!(
            from = self.hash_table_size,
            to = new_size,
            count = self.hash_table_count,
            "rehashing dict index"
        );

        let mut grown = HashIndex {
            hash_table_slots: new_slots,
            hash_table_hashes: new_hashes,
            hash_table_size: new_size,
            hash_table_count: 0,
        };
        for bucket in 0..self.hash_table_size {
            let slot = self.slot_at(bucket);
            if slot != EMPTY_SLOT {
                grown.place(self.hash_at(bucket), slot);
            }
        }

        unsafe { self.release() };
        *self = grown;
        Ok(())
    }

    // Put `(hash, slot)` in the first empty bucket of its probe sequence.
    // Requires a free bucket.
    fn place(&mut self, hash: i32, slot: i32) {
        let mask = self.hash_table_size - 1;
        let mut bucket = home(hash, mask);
        while self.slot_at(bucket) != EMPTY_SLOT {
            bucket = (bucket + 1) & mask;
        }
        self.set(bucket, slot, hash);
        self.hash_table_count += 1;
    }

    /// Register `slot` under `hash`. `reserve_one` must have succeeded
    /// since the last insertion, and `slot` comes from the arena, which
    /// never grows past `MAX_ARENA_SLOTS`.
    pub fn insert(&mut self, hash: i32, slot: usize) {
        debug_assert!((self.hash_table_count + 1) * MAX_LOAD_DEN <= self.hash_table_size * MAX_LOAD_NUM);
        debug_assert!(slot < MAX_ARENA_SLOTS);
        self.place(hash, slot as i32);
    }

    /// Unlink the entry matching the probe and return its slot index.
    pub fn remove<F>(&mut self, hash: i32, eq: F) -> Result<Option<usize>>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        let Some(bucket) = self.find_bucket(hash, eq)? else {
            return Ok(None);
        };
        let slot = self.slot_at(bucket) as usize;

        // Back-shift: pull later members of the cluster into the hole when
        // the hole lies on their probe path.
        let mask = self.hash_table_size - 1;
        let mut hole = bucket;
        let mut next = (bucket + 1) & mask;
        loop {
            let s = self.slot_at(next);
            if s == EMPTY_SLOT {
                break;
            }
            let h = self.hash_at(next);
            let from_home = next.wrapping_sub(home(h, mask)) & mask;
            let from_hole = next.wrapping_sub(hole) & mask;
            if from_home >= from_hole {
                self.set(hole, s, h);
                hole = next;
            }
            next = (next + 1) & mask;
        }
        self.set(hole, EMPTY_SLOT, 0);
        self.hash_table_count -= 1;

        Ok(Some(slot))
    }

    /// Free the bucket arrays.
    ///
    /// # Safety
    /// The index must not be used afterwards except to drop or
    /// reinitialize it.
    pub unsafe fn release(&mut self) {
        if self.hash_table_size != 0 {
            deallocate_array(self.hash_table_slots, self.hash_table_size);
            deallocate_array(self.hash_table_hashes, self.hash_table_size);
        }
        *self = Self::new();
    }
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}
