use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
    config::{ALIGNMENT, HeapConfig},
    heap::Heap,
    kernel::{Kernel, PlatformMemory},
};

/// A [`Heap`] behind a spin lock, usable as `#[global_allocator]`.
///
/// Every operation takes the lock for its whole duration, so the heap itself
/// never sees concurrent calls. A `static` instance is never dropped: its
/// region is mapped on the first allocation and lives for the rest of the
/// process.
///
/// Layouts with an alignment above [`ALIGNMENT`] can't be served and get a
/// null pointer.
///
/// When this is the global allocator the installed logger must not allocate,
/// or logging from inside the heap would try to take the lock again.
///
/// ```no_run
/// use dmalloc::LockedHeap;
///
/// #[global_allocator]
/// static ALLOCATOR: LockedHeap = LockedHeap::new();
///
/// fn main() {
///     let value = Box::new(22);
///     assert_eq!(*value, 22);
/// }
/// ```
pub struct LockedHeap<P: PlatformMemory = Kernel>(Mutex<Heap<P>>);

impl LockedHeap {
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self(Mutex::new(Heap::with_config(config)))
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformMemory> LockedHeap<P> {
    pub const fn with_platform(config: HeapConfig) -> Self {
        Self(Mutex::new(Heap::with_platform(config)))
    }

    /// Locks the heap for direct use, e.g. to read its stats.
    pub fn lock(&self) -> MutexGuard<'_, Heap<P>> {
        self.0.lock()
    }
}

unsafe impl<P: PlatformMemory> GlobalAlloc for LockedHeap<P> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.0
            .lock()
            .alloc(layout.size().max(1))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { self.0.lock().free(ptr) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn alloc_and_dealloc() {
        let heap = LockedHeap::with_config(HeapConfig::new().with_capacity(4096));

        unsafe {
            let a = heap.alloc(layout(24, 8));
            let b = heap.alloc(layout(4, 4));
            assert!(!a.is_null() && !b.is_null());
            assert_ne!(a, b);

            a.cast::<u64>().write(u64::MAX);
            assert_eq!(a.cast::<u64>().read(), u64::MAX);

            heap.dealloc(a, layout(24, 8));
            heap.dealloc(b, layout(4, 4));
        }

        assert_eq!(heap.lock().stats().free_blocks, 1);
    }

    #[test]
    fn rejects_large_alignment() {
        let heap = LockedHeap::with_config(HeapConfig::new().with_capacity(4096));

        let ptr = unsafe { heap.alloc(layout(64, 64)) };
        assert!(ptr.is_null());
    }

    #[test]
    fn zero_sized_layout_gets_a_block() {
        let heap = LockedHeap::with_config(HeapConfig::new().with_capacity(4096));

        unsafe {
            let ptr = heap.alloc(layout(0, 1));
            assert!(!ptr.is_null());
            heap.dealloc(ptr, layout(0, 1));
        }
    }

    #[test]
    fn shared_between_threads() {
        let heap = LockedHeap::with_config(HeapConfig::new().with_capacity(64 * 1024));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for size in 1..64 {
                        unsafe {
                            let ptr = heap.alloc(layout(size, 8));
                            assert!(!ptr.is_null());
                            ptr.write_bytes(0x5A, size);
                            heap.dealloc(ptr, layout(size, 8));
                        }
                    }
                });
            }
        });

        let stats = heap.lock().stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, stats.capacity - crate::block::HEADER_SIZE);
    }
}
