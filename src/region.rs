use std::{fmt, ptr::NonNull};

use snafu::OptionExt as _;

use crate::{
    block::{BlockHeader, HEADER_SIZE, Offset},
    error::{HeapError, OutOfMemorySnafu},
    kernel::PlatformMemory,
};

/// The single mapping every block of a heap lives in.
///
/// Blocks are never handed around as references: the free list stores
/// [`Offset`]s and the region turns them into headers and payload pointers.
/// All the pointer arithmetic of the allocator goes through here.
///
/// ```text
///  base
///   +--------+-----------+--------+-----------+--------+------------------+
///   | header |  payload  | header |  payload  | header |     payload      |
///   +--------+-----------+--------+-----------+--------+------------------+
///   ^ Offset(0)          ^ Offset(HEADER_SIZE + size)                  base + len
/// ```
///
/// The mapping is given back to its [`PlatformMemory`] when the region is dropped.
pub(crate) struct HeapRegion {
    /// Start of the mapping, aligned to at least [`crate::config::ALIGNMENT`].
    base: NonNull<u8>,
    /// Size of the mapping in bytes.
    len: usize,
    /// How to give the mapping back.
    release: unsafe fn(NonNull<u8>, usize),
}

// The region owns its mapping, nothing else points into it while the heap
// is being moved around.
unsafe impl Send for HeapRegion {}

impl HeapRegion {
    /// Requests a region of `len` bytes from `P`.
    pub fn map<P: PlatformMemory>(len: usize) -> Result<Self, HeapError> {
        let base = unsafe { P::request_memory(len) }.context(OutOfMemorySnafu { capacity: len })?;

        Ok(Self {
            base,
            len,
            release: P::return_memory,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn header(&self, at: Offset) -> *mut BlockHeader {
        debug_assert!(at.payload() <= self.len, "block header outside of the region");
        unsafe { self.base.as_ptr().add(at.get()).cast::<BlockHeader>() }
    }

    /// Header of the block starting at `at`.
    ///
    /// `at` has to point to a header previously written with [`HeapRegion::write`].
    #[inline]
    pub fn block(&self, at: Offset) -> &BlockHeader {
        unsafe { &*self.header(at) }
    }

    #[inline]
    pub fn block_mut(&mut self, at: Offset) -> &mut BlockHeader {
        unsafe { &mut *self.header(at) }
    }

    /// Places a fresh header at `at`, overwriting whatever bytes were there.
    pub fn write(&mut self, at: Offset, header: BlockHeader) {
        debug_assert!(at.end(header.size) <= self.len, "block exceeds the region");
        unsafe { self.header(at).write(header) }
    }

    /// Address of the header at `at`.
    #[inline]
    pub fn address(&self, at: Offset) -> NonNull<u8> {
        unsafe { self.base.add(at.get()) }
    }

    /// Pointer handed out to the user for the block at `at`.
    #[inline]
    pub fn payload(&self, at: Offset) -> NonNull<u8> {
        unsafe { self.base.add(at.payload()) }
    }

    /// Recovers the block a payload pointer belongs to by stepping back one
    /// header width.
    #[inline]
    pub fn block_of(&self, payload: NonNull<u8>) -> Offset {
        debug_assert!(self.contains_payload(payload), "pointer not owned by this heap");
        Offset::new(payload.as_ptr() as usize - self.base.as_ptr() as usize - HEADER_SIZE)
    }

    /// Whether `ptr` could be a payload pointer of this region.
    pub fn contains_payload(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize + HEADER_SIZE;
        let end = self.base.as_ptr() as usize + self.len;

        (start..end).contains(&(ptr.as_ptr() as usize))
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { (self.release)(self.base, self.len) }
    }
}

impl fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    #[test]
    fn header_and_payload_addresses() {
        let mut region = HeapRegion::map::<Kernel>(4096).unwrap();
        let block = Offset::new(128);
        region.write(block, BlockHeader::detached(64));

        let payload = region.payload(block);
        assert_eq!(
            payload.as_ptr() as usize - region.address(block).as_ptr() as usize,
            HEADER_SIZE
        );
        assert_eq!(region.block_of(payload), block);
        assert_eq!(region.block(block).size, 64);

        region.block_mut(block).size = 32;
        assert_eq!(region.block(block).size, 32);
    }

    #[test]
    fn payload_bounds() {
        let region = HeapRegion::map::<Kernel>(4096).unwrap();

        assert!(region.contains_payload(region.payload(Offset::START)));
        assert!(!region.contains_payload(region.address(Offset::START)));
        assert!(!region.contains_payload(unsafe { region.address(Offset::START).add(4096) }));
    }
}
