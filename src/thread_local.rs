//! Per-thread diagnostic containers: `recent_allocations` and
//! `recent_deallocations`. Diagnostic only — they do not participate in any
//! correctness decision the facade makes.
//!
//! `no_std` has no portable thread-local storage primitive, so this module
//! only does anything under the `std` feature; without it the API compiles
//! to no-ops.

#[cfg(feature = "std")]
mod imp {
    use std::cell::RefCell;
    use std::vec::Vec;

    std::thread_local! {
        static RECENT_ALLOCATIONS: RefCell<Vec<(usize, usize)>> = RefCell::new(Vec::new());
        static RECENT_DEALLOCATIONS: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    }

    /// Record an allocation for this thread's diagnostic history. `addr` is
    /// the pointer's numeric value, kept instead of the raw pointer so this
    /// module carries no unsafe `Send`/`Sync` story of its own.
    pub fn record_allocation(addr: usize, size: usize) {
        RECENT_ALLOCATIONS.with(|cell| cell.borrow_mut().push((addr, size)));
    }

    pub fn record_deallocation(addr: usize) {
        RECENT_DEALLOCATIONS.with(|cell| cell.borrow_mut().push(addr));
    }

    pub fn recent_allocations() -> Vec<(usize, usize)> {
        RECENT_ALLOCATIONS.with(|cell| cell.borrow().clone())
    }

    pub fn recent_deallocations() -> Vec<usize> {
        RECENT_DEALLOCATIONS.with(|cell| cell.borrow().clone())
    }

    pub fn clear_thread_local_storage() {
        RECENT_ALLOCATIONS.with(|cell| cell.borrow_mut().clear());
        RECENT_DEALLOCATIONS.with(|cell| cell.borrow_mut().clear());
    }
}

#[cfg(not(feature = "std"))]
mod imp {
    pub fn record_allocation(_addr: usize, _size: usize) {}
    pub fn record_deallocation(_addr: usize) {}

    pub fn recent_allocations() -> alloc::vec::Vec<(usize, usize)> {
        alloc::vec::Vec::new()
    }

    pub fn recent_deallocations() -> alloc::vec::Vec<usize> {
        alloc::vec::Vec::new()
    }

    pub fn clear_thread_local_storage() {}
}

pub use imp::*;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn records_and_clears() {
        clear_thread_local_storage();
        record_allocation(0x1000, 16);
        record_deallocation(0x1000);
        assert_eq!(recent_allocations(), alloc::vec![(0x1000, 16)]);
        assert_eq!(recent_deallocations(), alloc::vec![0x1000]);
        clear_thread_local_storage();
        assert!(recent_allocations().is_empty());
        assert!(recent_deallocations().is_empty());
    }
}
