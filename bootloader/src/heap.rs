//! Boot-time heap
//!
//! A bump allocator over a fixed in-image region. The loader's dynamic
//! allocations are small and short-lived (sector-cache entries, volume
//! records, file buffers) and all die at the hand-off, so freed blocks
//! are not reclaimed. Only the bare-metal build installs this as the
//! global allocator; hosted tests run on the system allocator.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Sized for the worst observed case: a full discovery pass plus a
/// prelinked kernel cache held in memory during decode.
pub const HEAP_SIZE: usize = 2 * 1024 * 1024;

pub struct BumpHeap {
    region: UnsafeCell<[u8; HEAP_SIZE]>,
    offset: AtomicUsize,
}

impl BumpHeap {
    pub const fn new() -> Self {
        BumpHeap { region: UnsafeCell::new([0; HEAP_SIZE]), offset: AtomicUsize::new(0) }
    }

    pub fn allocated(&self) -> usize {
        self.offset.load(Ordering::Relaxed)
    }

    fn align_up(addr: usize, align: usize) -> usize {
        (addr + align - 1) & !(align - 1)
    }
}

// The loader runs single-threaded; the atomic offset exists to make the
// shared static sound, not for contention.
unsafe impl Send for BumpHeap {}
unsafe impl Sync for BumpHeap {}

unsafe impl GlobalAlloc for BumpHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let base = self.region.get() as *mut u8;
        let mut current = self.offset.load(Ordering::Relaxed);
        loop {
            let start = Self::align_up(current, layout.align().max(8));
            let end = match start.checked_add(layout.size()) {
                Some(end) if end <= HEAP_SIZE => end,
                _ => return core::ptr::null_mut(),
            };
            match self.offset.compare_exchange(current, end, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return unsafe { base.add(start) },
                Err(actual) => current = actual,
            }
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
}

#[cfg(all(not(test), target_os = "none"))]
#[global_allocator]
static HEAP: BumpHeap = BumpHeap::new();

#[cfg(test)]
mod tests {
    use super::*;

    // The 2 MiB region does not fit on a test thread's stack; each test
    // gets its own static, matching how the loader holds the heap.

    #[test]
    fn test_alloc_respects_alignment() {
        static HEAP: BumpHeap = BumpHeap::new();
        let layout = Layout::from_size_align(24, 64).unwrap();
        let ptr = unsafe { HEAP.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 64, 0);
    }

    #[test]
    fn test_alloc_exhaustion_returns_null() {
        static HEAP: BumpHeap = BumpHeap::new();
        let layout = Layout::from_size_align(HEAP_SIZE + 1, 8).unwrap();
        let ptr = unsafe { HEAP.alloc(layout) };
        assert!(ptr.is_null());
    }

    #[test]
    fn test_successive_allocs_do_not_overlap() {
        static HEAP: BumpHeap = BumpHeap::new();
        let layout = Layout::from_size_align(100, 8).unwrap();
        let a = unsafe { HEAP.alloc(layout) } as usize;
        let b = unsafe { HEAP.alloc(layout) } as usize;
        assert!(b >= a + 100);
    }
}
