//! Fixed-Block Pool (C1): a contiguous slab of equally-sized blocks served
//! through an embedded intrusive free list.
//!
//! Every free block's first `size_of::<*mut u8>()` bytes hold the address of
//! the next free block (or null). Allocation and release are O(1); the pool
//! never grows.

use core::mem::size_of;
use core::ptr::NonNull;

use alloc::boxed::Box;
use spin::Mutex;

use crate::error::{AllocError, AllocResult};

/// A single size-segregated pool of fixed-size blocks.
///
/// Cache-line aligned so that the pool header for one size class does not
/// false-share with its neighbors in the facade's pool bank.
#[repr(align(64))]
pub struct FixedBlockPool {
    block_size: usize,
    capacity: usize,
    slab: Box<[u8]>,
    state: Mutex<PoolState>,
}

struct PoolState {
    free_head: *mut u8,
    used: usize,
}

// The slab is owned exclusively by this pool; all mutation of its contents
// happens under `state`'s mutex, so sharing the pool across threads is sound.
unsafe impl Send for FixedBlockPool {}
unsafe impl Sync for FixedBlockPool {}

impl FixedBlockPool {
    /// Allocate a fresh slab of `capacity` blocks of `block_size` bytes and
    /// lay out the initial free list: block 0 -> block 1 -> ... -> null.
    pub fn new(block_size: usize, capacity: usize) -> AllocResult<Self> {
        if block_size < size_of::<*mut u8>() {
            return Err(AllocError::BadConstruction);
        }

        let mut slab = alloc::vec![0u8; block_size * capacity].into_boxed_slice();
        let base = slab.as_mut_ptr();

        // SAFETY: `base` points at `block_size * capacity` freshly allocated
        // bytes; each block's first word is large enough to hold a pointer
        // because of the `block_size` check above.
        unsafe {
            Self::link_free_list(base, block_size, capacity);
        }

        Ok(Self {
            block_size,
            capacity,
            slab,
            state: Mutex::new(PoolState {
                free_head: base,
                used: 0,
            }),
        })
    }

    /// Re-link every block in `[base, base + block_size*capacity)` into an
    /// in-order free list, terminated by null.
    ///
    /// # Safety
    /// `base` must point at at least `block_size * capacity` writable bytes.
    unsafe fn link_free_list(base: *mut u8, block_size: usize, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let mut current = base;
        for _ in 0..capacity - 1 {
            let next = current.add(block_size);
            (current as *mut *mut u8).write(next);
            current = next;
        }
        (current as *mut *mut u8).write(core::ptr::null_mut());
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used_blocks(&self) -> usize {
        self.state.lock().used
    }

    fn base(&self) -> *const u8 {
        self.slab.as_ptr()
    }

    fn contains(&self, ptr: *mut u8) -> bool {
        let base = self.base() as usize;
        let end = base + self.block_size * self.capacity;
        let addr = ptr as usize;
        addr >= base && addr < end
    }

    /// Pop a block off the free list, or return `None` if the pool is
    /// exhausted. The caller (the facade) decides how to handle exhaustion.
    pub fn acquire(&self) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.free_head.is_null() {
            return None;
        }
        let block = state.free_head;
        // SAFETY: `block` is non-null and was linked by `link_free_list` or a
        // previous `release`, so its first word holds a valid next pointer.
        let next = unsafe { *(block as *const *mut u8) };
        state.free_head = next;
        state.used += 1;
        NonNull::new(block)
    }

    /// Return a block to the free list. No-op on null. Fails with
    /// `BadOwnership` if `ptr` does not lie within this pool's slab.
    pub fn release(&self, ptr: Option<NonNull<u8>>) -> AllocResult<()> {
        let ptr = match ptr {
            Some(p) => p.as_ptr(),
            None => return Ok(()),
        };
        if !self.contains(ptr) {
            return Err(AllocError::BadOwnership);
        }
        let mut state = self.state.lock();
        // SAFETY: `ptr` is within the slab and at least pointer-sized.
        unsafe {
            (ptr as *mut *mut u8).write(state.free_head);
        }
        state.free_head = ptr;
        state.used -= 1;
        Ok(())
    }

    /// Re-initialize the free list over the whole slab and reset `used`.
    pub fn clear(&self) {
        let base = self.base() as *mut u8;
        let mut state = self.state.lock();
        // SAFETY: `base` is this pool's own slab, sized `block_size*capacity`.
        unsafe {
            Self::link_free_list(base, self.block_size, self.capacity);
        }
        state.free_head = base;
        state.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let pool = FixedBlockPool::new(8, 4).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.used_blocks(), 2);

        pool.release(Some(a)).unwrap();
        assert_eq!(pool.used_blocks(), 1);
        pool.release(Some(b)).unwrap();
        assert_eq!(pool.used_blocks(), 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = FixedBlockPool::new(8, 2).unwrap();
        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn bad_construction_rejected() {
        assert_eq!(
            FixedBlockPool::new(1, 4).unwrap_err(),
            AllocError::BadConstruction
        );
    }

    #[test]
    fn release_null_is_noop() {
        let pool = FixedBlockPool::new(8, 4).unwrap();
        assert!(pool.release(None).is_ok());
        assert_eq!(pool.used_blocks(), 0);
    }

    #[test]
    fn release_foreign_pointer_is_bad_ownership() {
        let pool = FixedBlockPool::new(8, 4).unwrap();
        let mut stack_var: u64 = 0;
        let foreign = NonNull::new(&mut stack_var as *mut u64 as *mut u8).unwrap();
        assert_eq!(pool.release(Some(foreign)), Err(AllocError::BadOwnership));
    }

    #[test]
    fn clear_resets_pool() {
        let pool = FixedBlockPool::new(8, 4).unwrap();
        let _ = pool.acquire().unwrap();
        let _ = pool.acquire().unwrap();
        pool.clear();
        assert_eq!(pool.used_blocks(), 0);
        for _ in 0..4 {
            assert!(pool.acquire().is_some());
        }
        assert!(pool.acquire().is_none());
    }
}
