//! Concurrent stress test: many threads hammering one `Allocator` through
//! both the pool bank and the heap path, checking the facade's invariants
//! hold at the end.

use std::sync::Arc;
use std::thread;

use allocity::Allocator;

#[test]
fn many_threads_allocate_and_deallocate_without_corrupting_registry() {
    let alloc = Arc::new(Allocator::new());
    let thread_count = 16;
    let ops_per_thread = 500;

    let mut handles = Vec::new();
    for t in 0..thread_count {
        let alloc = Arc::clone(&alloc);
        handles.push(thread::spawn(move || {
            let mut live = Vec::new();
            for i in 0..ops_per_thread {
                // Mix pool-sized and heap-sized requests, and interleave
                // allocate/deallocate so pointers get freed and reacquired
                // while other threads are also mutating the registry.
                let size = match (t + i) % 4 {
                    0 => 8,
                    1 => 128,
                    2 => 256,
                    _ => 512,
                };
                let p = alloc.allocate(size).expect("allocation should not fail under load");
                live.push((p, size));

                if live.len() > 8 {
                    let (old, _) = live.remove(0);
                    alloc.deallocate(old).expect("deallocate should succeed for a live pointer");
                }
            }
            for (p, _) in live {
                alloc.deallocate(p).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert!(alloc.is_empty());
    assert_eq!(alloc.get_allocation_count(), 0);
    assert!(alloc.get_total_allocated() >= alloc.get_total_freed());
    assert!(alloc.get_peak_memory_usage() >= alloc.get_total_allocated() - alloc.get_total_freed());
}

#[test]
fn concurrent_double_free_attempts_are_serialized_correctly() {
    // Every thread races to free the same pointer; exactly one must win.
    let alloc = Arc::new(Allocator::new());
    let p = alloc.allocate(64).unwrap();
    let addr = p.as_ptr() as usize;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let alloc = Arc::clone(&alloc);
        handles.push(thread::spawn(move || {
            let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
            alloc.deallocate(ptr).is_ok()
        }));
    }

    let successes: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
    assert_eq!(successes, 1, "exactly one deallocate should succeed on a shared pointer");
}

#[test]
fn pool_bank_survives_concurrent_exhaustion() {
    let alloc = Arc::new(Allocator::new());
    let thread_count = 8;

    let mut handles = Vec::new();
    for _ in 0..thread_count {
        let alloc = Arc::clone(&alloc);
        handles.push(thread::spawn(move || {
            let mut pointers = Vec::new();
            for _ in 0..200 {
                pointers.push(alloc.allocate(8).unwrap());
            }
            for p in pointers {
                alloc.deallocate(p).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert!(alloc.is_empty());
}
