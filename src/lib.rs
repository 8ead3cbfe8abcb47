#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod default_allocator;
pub mod error;
pub mod facade;
pub mod pool;
pub mod registry;
pub mod small_cache;
pub mod sys;
pub mod thread_local;

pub use default_allocator::DefaultAllocator;
pub use error::{AllocError, AllocResult};
pub use facade::Allocator;
pub use pool::FixedBlockPool;
pub use registry::AllocationOrigin;

#[cfg(all(not(test), not(feature = "std")))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std")))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}
