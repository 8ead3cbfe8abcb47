//! System allocator passthrough.
//!
//! On Linux this calls straight into libc (`malloc`/`free`/`posix_memalign`),
//! the dependency already carried for Linux-only code paths. Everywhere
//! else it goes through `alloc::alloc`, which is the portable equivalent
//! available on any target that links `alloc` at all.

use core::alloc::Layout;
use core::mem::size_of;
use core::ptr::NonNull;

/// Request exactly `n` bytes from the system allocator. Returns `None` on
/// failure (never panics).
pub fn system_malloc(n: usize) -> Option<*mut u8> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `n` is nonzero-checked by callers of the small-object
        // cache/default allocator before reaching here.
        let ptr = unsafe { libc::malloc(n) } as *mut u8;
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let layout = Layout::from_size_align(n, size_of::<usize>()).ok()?;
        // SAFETY: `layout` has nonzero size (callers never pass n == 0).
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    }
}

/// Release a block obtained from `system_malloc` for exactly `n` bytes.
pub fn system_free(ptr: *mut u8, n: usize) {
    if ptr.is_null() {
        return;
    }
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `ptr` was returned by `libc::malloc` for `n` bytes.
        unsafe { libc::free(ptr as *mut core::ffi::c_void) };
    }
    #[cfg(not(target_os = "linux"))]
    {
        if let Ok(layout) = Layout::from_size_align(n, size_of::<usize>()) {
            // SAFETY: `ptr` was allocated with this exact layout by
            // `system_malloc`.
            unsafe { alloc::alloc::dealloc(ptr, layout) };
        }
    }
}

/// Allocate `size` bytes aligned to `alignment` (a power of two), using the
/// platform's native primitive where available.
pub fn system_aligned_alloc(size: usize, alignment: usize) -> Option<NonNull<u8>> {
    #[cfg(target_os = "linux")]
    {
        let align = alignment.max(size_of::<*mut u8>());
        let mut out: *mut core::ffi::c_void = core::ptr::null_mut();
        // SAFETY: `align` is a power of two and at least `sizeof(void*)`,
        // which `posix_memalign` requires.
        let rc = unsafe { libc::posix_memalign(&mut out, align, size) };
        if rc != 0 || out.is_null() {
            None
        } else {
            NonNull::new(out as *mut u8)
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        aligned_alloc_fallback(size, alignment)
    }
}

/// Release a block obtained from `system_aligned_alloc`.
pub fn system_aligned_free(ptr: NonNull<u8>) {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `ptr` was returned by `posix_memalign`, which `libc::free`
        // can always release regardless of the alignment requested.
        unsafe { libc::free(ptr.as_ptr() as *mut core::ffi::c_void) };
    }
    #[cfg(not(target_os = "linux"))]
    {
        aligned_free_fallback(ptr);
    }
}

/// Header stashed immediately before the aligned address `aligned_alloc_fallback`
/// returns, so `aligned_free_fallback` can recover both the original base
/// (for `system_free`) and the exact size that was requested from it (Rust's
/// global allocator requires the freeing `Layout` to match the allocating
/// one).
#[cfg(not(target_os = "linux"))]
#[repr(C)]
struct FallbackHeader {
    base: *mut u8,
    backing_len: usize,
}

/// Portable over-allocate-and-shift aligned allocation: allocate enough
/// slack to fit the requested size plus a header slot, then hand back the
/// first aligned address past that slot.
#[cfg(not(target_os = "linux"))]
fn aligned_alloc_fallback(size: usize, alignment: usize) -> Option<NonNull<u8>> {
    let header_size = size_of::<FallbackHeader>();
    let space = size
        .checked_add(alignment - 1)?
        .checked_add(header_size)?;
    let base = system_malloc(space)?;

    let raw = base as usize + header_size;
    let aligned = (raw + alignment - 1) & !(alignment - 1);
    let aligned_ptr = aligned as *mut u8;

    // SAFETY: `aligned_ptr - header_size` lies within the `space`-byte
    // allocation starting at `base`, since `aligned <= base + header_size +
    // alignment - 1 + (size - header_size)` by construction above, and
    // `header_size >= size_of::<FallbackHeader>()`.
    unsafe {
        (aligned_ptr.sub(header_size) as *mut FallbackHeader).write(FallbackHeader {
            base,
            backing_len: space,
        });
    }
    NonNull::new(aligned_ptr)
}

#[cfg(not(target_os = "linux"))]
fn aligned_free_fallback(ptr: NonNull<u8>) {
    let header_size = size_of::<FallbackHeader>();
    // SAFETY: `ptr` was produced by `aligned_alloc_fallback`, which always
    // stashes a `FallbackHeader` one header-width before it.
    let header = unsafe { (ptr.as_ptr().sub(header_size) as *const FallbackHeader).read() };
    system_free(header.base, header.backing_len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_roundtrip() {
        let ptr = system_malloc(64).expect("malloc should succeed");
        unsafe {
            core::ptr::write_bytes(ptr, 0xAB, 64);
        }
        system_free(ptr, 64);
    }

    #[test]
    fn aligned_alloc_is_aligned_and_freeable() {
        for alignment in [8usize, 16, 64, 256] {
            let ptr = system_aligned_alloc(100, alignment).expect("aligned alloc should succeed");
            assert_eq!(ptr.as_ptr() as usize % alignment, 0);
            system_aligned_free(ptr);
        }
    }
}
