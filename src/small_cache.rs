//! Segregated Free-List Cache (C2): a lock-free Treiber stack per exact
//! byte size in `[1, 256]`, falling back to the system allocator when a
//! size class's list is empty.
//!
//! Memory freed onto a list is never returned to the system until
//! `clear_free_lists` runs — intentional cache behavior, not a leak.

use core::mem::size_of;

use portable_atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::sys;

/// Number of distinct size classes, 1..=256, plus an unused slot 0 so the
/// byte size can index the array directly.
const NUM_SLOTS: usize = 257;

/// A cached block must be able to hold an embedded next-pointer once it is
/// freed onto the list, even if the caller's requested size was smaller.
/// Blocks are tracked and reported at their logical size `n`; the backing
/// system allocation is rounded up to this floor.
#[inline]
fn backing_size(n: usize) -> usize {
    n.max(size_of::<*mut u8>())
}

pub struct SmallObjectCache {
    free_lists: [AtomicPtr<u8>; NUM_SLOTS],
    total_allocated: AtomicUsize,
    total_freed: AtomicUsize,
}

impl SmallObjectCache {
    pub const fn new() -> Self {
        // AtomicPtr::new is const; build the array with a macro-free repeat.
        const NULL: AtomicPtr<u8> = AtomicPtr::new(core::ptr::null_mut());
        Self {
            free_lists: [NULL; NUM_SLOTS],
            total_allocated: AtomicUsize::new(0),
            total_freed: AtomicUsize::new(0),
        }
    }

    /// Pop a block of exactly `n` bytes from the cache, or obtain one fresh
    /// from the system allocator if the cache for that size is empty.
    ///
    /// `n` must be in `[1, 256]`.
    pub fn acquire_small(&self, n: usize) -> Option<*mut u8> {
        debug_assert!((1..=256).contains(&n));
        let slot = &self.free_lists[n];
        loop {
            let head = slot.load(Ordering::Acquire);
            if head.is_null() {
                break;
            }
            // SAFETY: `head` was published by a prior `release_small` with
            // its next-pointer written before the publishing CAS.
            let next = unsafe { *(head as *const *mut u8) };
            if slot
                .compare_exchange_weak(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.total_allocated.fetch_add(n, Ordering::Relaxed);
                return Some(head);
            }
        }
        let ptr = sys::system_malloc(backing_size(n));
        if ptr.is_some() {
            self.total_allocated.fetch_add(n, Ordering::Relaxed);
        }
        ptr
    }

    /// Push a block of exactly `n` bytes back onto the cache for that size.
    ///
    /// `n` must be in `[1, 256]`. Caller must guarantee `ptr` was obtained
    /// from `acquire_small` for the same `n` and is not concurrently being
    /// popped by another thread (the facade's registry mutex around
    /// track/untrack provides this serialization — see module docs on the
    /// crate's ABA discipline).
    pub fn release_small(&self, ptr: *mut u8, n: usize) {
        debug_assert!((1..=256).contains(&n));
        let slot = &self.free_lists[n];
        let mut expected = slot.load(Ordering::Relaxed);
        loop {
            // SAFETY: the backing allocation for size class `n` is always
            // rounded up to at least `size_of::<*mut u8>()` (see
            // `backing_size`), so the embedded next-pointer write fits.
            unsafe {
                (ptr as *mut *mut u8).write(expected);
            }
            match slot.compare_exchange_weak(expected, ptr, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => expected = actual,
            }
        }
        self.total_freed.fetch_add(n, Ordering::Relaxed);
    }

    /// Walk every free list, releasing each node to the system allocator,
    /// then coarsely reset `total_freed` to `total_allocated`.
    pub fn clear_free_lists(&self) {
        for (n, slot) in self.free_lists.iter().enumerate() {
            let mut node = slot.swap(core::ptr::null_mut(), Ordering::AcqRel);
            while !node.is_null() {
                // SAFETY: every node on this list was published with its
                // next-pointer written first.
                let next = unsafe { *(node as *const *mut u8) };
                sys::system_free(node, backing_size(n.max(1)));
                node = next;
            }
        }
        self.total_freed
            .store(self.total_allocated.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub fn total_allocated(&self) -> usize {
        self.total_allocated.load(Ordering::Relaxed)
    }

    pub fn total_freed(&self) -> usize {
        self.total_freed.load(Ordering::Relaxed)
    }
}

impl Default for SmallObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_falls_back_to_system_when_empty() {
        let cache = SmallObjectCache::new();
        let ptr = cache.acquire_small(16).expect("system malloc should succeed");
        cache.release_small(ptr, 16);
        assert_eq!(cache.total_allocated(), 16);
        assert_eq!(cache.total_freed(), 16);
    }

    #[test]
    fn released_block_is_reused_before_falling_back() {
        let cache = SmallObjectCache::new();
        let a = cache.acquire_small(32).unwrap();
        cache.release_small(a, 32);
        let b = cache.acquire_small(32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clear_free_lists_releases_cached_nodes() {
        let cache = SmallObjectCache::new();
        let a = cache.acquire_small(64).unwrap();
        cache.release_small(a, 64);
        cache.clear_free_lists();
        assert_eq!(cache.total_freed(), cache.total_allocated());
    }
}
