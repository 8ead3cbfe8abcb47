//! Default Allocator (C4): the small-object cache plus a direct system-malloc
//! fallback for large requests, aligned allocation, usage counters, and the
//! OOM/reporter hooks.

use core::ptr::NonNull;

use alloc::boxed::Box;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

use crate::error::{AllocError, AllocResult};
use crate::small_cache::SmallObjectCache;
use crate::sys;

/// Requests at or below this size are served by the small-object cache;
/// above it, requests go straight to the system allocator.
pub const SMALL_OBJECT_THRESHOLD: usize = 256;

type OomHandler = Box<dyn Fn(usize) + Send + Sync>;
type UsageReporter = Box<dyn Fn(&DefaultAllocator) + Send + Sync>;

/// Composes the small-object cache with a system-malloc fallback, and keeps
/// the allocator's process-wide usage counters.
pub struct DefaultAllocator {
    cache: SmallObjectCache,
    total_allocated: AtomicUsize,
    total_freed: AtomicUsize,
    peak_usage: AtomicUsize,
    double_free_check_enabled: AtomicBool,
    allocated_pointers: Mutex<AllocatedSet>,
    oom_handler: Mutex<Option<OomHandler>>,
    usage_reporter: Mutex<Option<UsageReporter>>,
}

/// Minimal pointer membership set for the optional double-free check.
/// `no_std`-friendly: backed by a `Vec`, fine at the scale this check runs
/// at (it only guards heap-origin allocations, and is off by default).
struct AllocatedSet {
    members: alloc::vec::Vec<*mut u8>,
}

impl AllocatedSet {
    fn new() -> Self {
        Self {
            members: alloc::vec::Vec::new(),
        }
    }

    fn contains(&self, ptr: *mut u8) -> bool {
        self.members.contains(&ptr)
    }

    fn insert(&mut self, ptr: *mut u8) {
        self.members.push(ptr);
    }

    fn remove(&mut self, ptr: *mut u8) {
        self.members.retain(|&p| p != ptr);
    }
}

// `oom_handler`/`usage_reporter` are `Mutex`-guarded `Box<dyn ... + Send +
// Sync>`, and every other field is itself `Send + Sync`, so sharing a
// `DefaultAllocator` across threads is sound.
unsafe impl Send for DefaultAllocator {}
unsafe impl Sync for DefaultAllocator {}

impl DefaultAllocator {
    pub fn new() -> Self {
        Self {
            cache: SmallObjectCache::new(),
            total_allocated: AtomicUsize::new(0),
            total_freed: AtomicUsize::new(0),
            peak_usage: AtomicUsize::new(0),
            double_free_check_enabled: AtomicBool::new(false),
            allocated_pointers: Mutex::new(AllocatedSet::new()),
            oom_handler: Mutex::new(Self::default_oom_handler()),
            usage_reporter: Mutex::new(Self::default_usage_reporter()),
        }
    }

    #[cfg(feature = "std")]
    fn default_oom_handler() -> Option<OomHandler> {
        Some(Box::new(|requested: usize| {
            std::eprintln!("allocity: out of memory (requested {} bytes)", requested);
        }))
    }

    #[cfg(not(feature = "std"))]
    fn default_oom_handler() -> Option<OomHandler> {
        None
    }

    #[cfg(feature = "std")]
    fn default_usage_reporter() -> Option<UsageReporter> {
        Some(Box::new(|alloc: &DefaultAllocator| {
            std::println!(
                "allocity: allocated={} freed={} peak={}",
                alloc.total_allocated(),
                alloc.total_freed(),
                alloc.peak_usage()
            );
        }))
    }

    #[cfg(not(feature = "std"))]
    fn default_usage_reporter() -> Option<UsageReporter> {
        None
    }

    fn bump_peak(&self) {
        let allocated = self.total_allocated.load(Ordering::Relaxed);
        let freed = self.total_freed.load(Ordering::Relaxed);
        let live = allocated.saturating_sub(freed);
        let mut current = self.peak_usage.load(Ordering::Relaxed);
        while live > current {
            match self.peak_usage.compare_exchange_weak(
                current,
                live,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn invoke_oom(&self, requested: usize) {
        if let Some(handler) = self.oom_handler.lock().as_ref() {
            handler(requested);
        }
    }

    /// Allocate `size` bytes. `size == 0` is substituted with `1` (the
    /// facade's own zero-size short-circuit runs before this is reached).
    pub fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        let size = if size == 0 { 1 } else { size };

        let raw = if size <= SMALL_OBJECT_THRESHOLD {
            self.cache.acquire_small(size)
        } else {
            sys::system_malloc(size)
        };

        let ptr = match raw.and_then(NonNull::new) {
            Some(p) => p,
            None => {
                self.invoke_oom(size);
                return Err(AllocError::OutOfMemory { requested: size });
            }
        };

        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        self.bump_peak();

        if self
            .double_free_check_enabled
            .load(Ordering::Relaxed)
        {
            self.allocated_pointers.lock().insert(ptr.as_ptr());
        }

        Ok(ptr)
    }

    /// Release a block of `size` bytes obtained from `allocate`. No-op on a
    /// null-equivalent caller (the facade never passes one through, but this
    /// mirrors the source's own guard).
    pub fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        let size = if size == 0 { 1 } else { size };

        if self
            .double_free_check_enabled
            .load(Ordering::Relaxed)
        {
            let mut guard = self.allocated_pointers.lock();
            if !guard.contains(ptr.as_ptr()) {
                return Err(AllocError::DoubleFree);
            }
            guard.remove(ptr.as_ptr());
        }

        if size <= SMALL_OBJECT_THRESHOLD {
            self.cache.release_small(ptr.as_ptr(), size);
        } else {
            sys::system_free(ptr.as_ptr(), size);
        }
        self.total_freed.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    pub fn aligned_allocate(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        let ptr = match sys::system_aligned_alloc(size, alignment) {
            Some(p) => p,
            None => {
                self.invoke_oom(size);
                return Err(AllocError::OutOfMemory { requested: size });
            }
        };
        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        self.bump_peak();
        Ok(ptr)
    }

    pub fn aligned_deallocate(&self, ptr: NonNull<u8>, size: usize) {
        sys::system_aligned_free(ptr);
        self.total_freed.fetch_add(size, Ordering::Relaxed);
    }

    pub fn total_allocated(&self) -> usize {
        self.total_allocated.load(Ordering::Relaxed)
    }

    pub fn total_freed(&self) -> usize {
        self.total_freed.load(Ordering::Relaxed)
    }

    pub fn peak_usage(&self) -> usize {
        self.peak_usage.load(Ordering::Relaxed)
    }

    pub fn set_enable_double_free_check(&self, enabled: bool) {
        self.double_free_check_enabled
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_out_of_memory_handler(&self, handler: Box<dyn Fn(usize) + Send + Sync>) {
        *self.oom_handler.lock() = Some(handler);
    }

    pub fn set_memory_usage_reporter(&self, reporter: Box<dyn Fn(&DefaultAllocator) + Send + Sync>) {
        *self.usage_reporter.lock() = Some(reporter);
    }

    pub fn report_memory_usage(&self) {
        // Clone the `Option`'s contents out from under the lock so the
        // reporter closure (which may itself call back into `&self`
        // getters) never runs while `usage_reporter` is held.
        let reporter = self.usage_reporter.lock().take();
        if let Some(reporter) = reporter {
            reporter(self);
            *self.usage_reporter.lock() = Some(reporter);
        }
    }

    pub fn clear_small_object_free_lists(&self) {
        self.cache.clear_free_lists();
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new()
    }
}
