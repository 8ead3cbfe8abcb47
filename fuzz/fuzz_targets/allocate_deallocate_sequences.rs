#![no_main]

use libfuzzer_sys::fuzz_target;
use arbitrary::{Arbitrary, Unstructured};
use allocity::Allocator;
use std::collections::HashMap;

#[derive(Debug, Arbitrary)]
enum AllocOp {
    Allocate { size: u16 },
    AlignedAllocate { size: u16, alignment_shift: u8 },
    Deallocate { index: u8 },
    AlignedDeallocate { index: u8 },
    DoubleFree { index: u8 },
    ClearAllocationMap,
    ClearSmallObjectFreeLists,
    ToggleDebugMode,
    ToggleDoubleFreeCheck,
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let ops: Result<Vec<AllocOp>, _> = (0..64).map(|_| AllocOp::arbitrary(&mut u)).collect();
    let Ok(ops) = ops else { return };

    let alloc = Allocator::new();
    // index -> (pointer address, whether it came from aligned_allocate)
    let mut live: Vec<(usize, bool)> = Vec::new();
    let mut sizes: HashMap<usize, usize> = HashMap::new();

    for op in ops {
        match op {
            AllocOp::Allocate { size } => {
                let size = size as usize;
                if size == 0 {
                    assert!(alloc.allocate(0).is_none());
                    continue;
                }
                if let Some(p) = alloc.allocate(size) {
                    let addr = p.as_ptr() as usize;
                    assert_eq!(alloc.find_allocation(p), Some(size));
                    sizes.insert(addr, size);
                    live.push((addr, false));
                }
            }
            AllocOp::AlignedAllocate {
                size,
                alignment_shift,
            } => {
                let size = size as usize;
                if size == 0 {
                    continue;
                }
                // Keep alignment a modest power of two so the fallback path
                // never has to satisfy an absurd request.
                let alignment = 1usize << (alignment_shift % 8);
                if let Some(p) = alloc.aligned_allocate(size, alignment) {
                    let addr = p.as_ptr() as usize;
                    assert_eq!(addr % alignment, 0);
                    sizes.insert(addr, size);
                    live.push((addr, true));
                }
            }
            AllocOp::Deallocate { index } => {
                if live.is_empty() {
                    continue;
                }
                let i = index as usize % live.len();
                let (addr, aligned) = live.remove(i);
                if !aligned {
                    let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                    assert!(alloc.deallocate(ptr).is_ok());
                    assert!(alloc.find_allocation(ptr).is_none());
                } else {
                    // Put it back; this op only targets plain allocations.
                    live.push((addr, aligned));
                }
            }
            AllocOp::AlignedDeallocate { index } => {
                if live.is_empty() {
                    continue;
                }
                let i = index as usize % live.len();
                let (addr, aligned) = live.remove(i);
                if aligned {
                    let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                    assert!(alloc.aligned_deallocate(ptr).is_ok());
                } else {
                    live.push((addr, aligned));
                }
            }
            AllocOp::DoubleFree { index } => {
                if live.is_empty() {
                    continue;
                }
                let i = index as usize % live.len();
                let (addr, aligned) = live[i];
                let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                let first = if aligned {
                    alloc.aligned_deallocate(ptr)
                } else {
                    alloc.deallocate(ptr)
                };
                if first.is_ok() {
                    live.remove(i);
                    let second = if aligned {
                        alloc.aligned_deallocate(ptr)
                    } else {
                        alloc.deallocate(ptr)
                    };
                    assert!(second.is_err(), "second free of the same pointer must fail");
                }
            }
            AllocOp::ClearAllocationMap => {
                alloc.clear_allocation_map();
                live.clear();
                sizes.clear();
            }
            AllocOp::ClearSmallObjectFreeLists => {
                alloc.clear_small_object_free_lists();
            }
            AllocOp::ToggleDebugMode => {
                alloc.set_debug_mode(true);
            }
            AllocOp::ToggleDoubleFreeCheck => {
                alloc.set_enable_double_free_check(true);
            }
        }

        assert!(alloc.get_total_allocated() >= alloc.get_total_freed());
        assert!(
            alloc.get_peak_memory_usage() >= alloc.get_total_allocated() - alloc.get_total_freed()
        );
    }

    for (addr, aligned) in live {
        let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
        if aligned {
            let _ = alloc.aligned_deallocate(ptr);
        } else {
            let _ = alloc.deallocate(ptr);
        }
    }

    assert!(alloc.is_empty());
});
