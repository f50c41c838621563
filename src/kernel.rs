use std::ptr::NonNull;

/// Source of the raw memory backing a heap.
///
/// The allocator itself has nothing to do with the concrete syscalls offered by
/// each kernel: it asks for one region when it initializes and gives it back
/// when the heap is dropped. [`Kernel`] is the implementation that talks to the
/// OS; tests plug in their own.
pub trait PlatformMemory {
    /// Request a readable and writable region of `len` bytes. It returns a
    /// pointer to the start of the region or `None` if the underlying syscall
    /// fails.
    ///
    /// # Safety
    ///
    /// The returned region must be valid for reads and writes of `len` bytes,
    /// aligned to at least [`crate::config::ALIGNMENT`], and not be used by
    /// anything else until it is passed to [`PlatformMemory::return_memory`].
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the region of size `len` starting at `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a region obtained from
    /// [`PlatformMemory::request_memory`] that is no longer in use.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);
}

/// Memory straight from the operating system: an anonymous private mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kernel;

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // The heap region is the only mapping we ever make: anonymous, so
            // it starts zeroed and backs no file, and private to this process.
            // It is never resized, so the kernel may place it anywhere.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let region = unsafe { mmap(ptr::null_mut(), len as size_t, PROT, FLAGS, -1, 0) };

            // Mappings are page aligned, which covers ALIGNMENT.
            (region != libc::MAP_FAILED)
                .then(|| NonNull::new(region.cast::<u8>()))
                .flatten()
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            // Only fails for a range that isn't mapped, which would mean the
            // heap was already unmapped.
            let rc = unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) };
            debug_assert_eq!(rc, 0, "heap region was not mapped");
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::Memory;

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Reserve and commit the whole region at once, it never grows.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }
    }
}
