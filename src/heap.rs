use std::{fmt, marker::PhantomData, ptr::NonNull};

use log::{debug, error, trace};
use snafu::ResultExt as _;

use crate::{
    block::{BlockHeader, HEADER_SIZE, Offset},
    config::{ALIGNMENT, HeapConfig},
    error::{AllocError, FragmentedSnafu, HeapError, InitSnafu, TooLargeSnafu},
    freelist::{self, FreeList},
    kernel::{Kernel, PlatformMemory},
    region::HeapRegion,
};

/// A first-fit allocator over a single region of memory.
///
/// The region is requested from `P` the first time the heap is used (or when
/// [`Heap::init`] is called) and never grows afterwards. Every request is served
/// from it by splitting free blocks, and every freed block is merged back with
/// its free neighbours.
///
/// The heap is a plain value: it is not synchronized and can't be shared
/// between threads without a lock. See [`crate::LockedHeap`] for that.
///
/// ```
/// use dmalloc::{Heap, HeapConfig};
///
/// let mut heap = Heap::with_config(HeapConfig::new().with_capacity(4096));
///
/// let ptr = heap.alloc(100).expect("heap has room");
/// assert_eq!(unsafe { heap.usable_size(ptr) }, 104);
///
/// unsafe { heap.free(ptr) };
/// assert_eq!(heap.stats().free_blocks, 1);
/// ```
pub struct Heap<P: PlatformMemory = Kernel> {
    config: HeapConfig,
    arena: Option<Arena>,
    platform: PhantomData<fn() -> P>,
}

/// State of an initialized heap.
#[derive(Debug)]
struct Arena {
    region: HeapRegion,
    free_list: FreeList,
}

impl Heap {
    /// Creates a heap of [`crate::config::MAX_HEAP_SIZE`] bytes backed by the
    /// OS. No memory is requested until the heap is used.
    pub const fn new() -> Self {
        Self::with_platform(HeapConfig::new())
    }

    /// Creates a heap backed by the OS with the given configuration.
    pub const fn with_config(config: HeapConfig) -> Self {
        Self::with_platform(config)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformMemory> Heap<P> {
    /// Creates a heap whose region is requested from `P`.
    pub const fn with_platform(config: HeapConfig) -> Self {
        Self {
            config,
            arena: None,
            platform: PhantomData,
        }
    }

    /// Size of the region managed by this heap, in bytes.
    pub const fn capacity(&self) -> usize {
        self.config.capacity()
    }

    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Maps the heap region. Calling this on an initialized heap does nothing.
    ///
    /// On failure the heap stays uninitialized and the next call (explicit or
    /// through [`Heap::alloc`]) tries again.
    pub fn init(&mut self) -> Result<(), HeapError> {
        self.arena().map(|_| ())
    }

    fn arena(&mut self) -> Result<&mut Arena, HeapError> {
        let arena = match self.arena.take() {
            Some(arena) => arena,
            None => Arena::map::<P>(self.config).inspect_err(|err| error!("heap init: {err}"))?,
        };

        Ok(self.arena.insert(arena))
    }

    /// Allocates `size` bytes, returning `None` when the heap can't be
    /// initialized or no free block is large enough.
    ///
    /// `size` must not be zero. The returned pointer is aligned to
    /// [`ALIGNMENT`] and stays valid until it is passed to [`Heap::free`] or
    /// the heap is dropped.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_alloc(size).ok()
    }

    /// Same as [`Heap::alloc`] but telling why the allocation failed.
    pub fn try_alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(size > 0, "zero sized allocation");

        self.arena().context(InitSnafu)?.alloc(size)
    }

    /// Returns the block of `ptr` to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::alloc`] or [`Heap::try_alloc`]
    /// on this same heap and must not have been freed already. Freeing into a
    /// heap that was never initialized is ignored in release builds.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.is_initialized(), "free on an uninitialized heap");

        if let Some(arena) = self.arena.as_mut() {
            arena.free(ptr);
        }
    }

    /// Number of bytes the allocation at `ptr` can actually hold. This is the
    /// requested size rounded up to [`ALIGNMENT`], or more when the block it
    /// was carved from was too small to split.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::free`]: `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.arena
            .as_ref()
            .map_or(0, |arena| arena.region.block(arena.region.block_of(ptr)).size)
    }

    /// Whether `ptr` points into the payload area of this heap's region.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.arena
            .as_ref()
            .is_some_and(|arena| arena.region.contains_payload(ptr))
    }

    /// The free blocks of the heap, in address order.
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            inner: self
                .arena
                .as_ref()
                .map(|arena| (arena.free_list.iter(&arena.region), &arena.region)),
        }
    }

    /// Summary of the free space of the heap.
    pub fn stats(&self) -> HeapStats {
        self.free_blocks().fold(
            HeapStats {
                capacity: self.capacity(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(block.size);
                stats
            },
        )
    }

    /// Logs every free block at debug level.
    pub fn dump(&self) {
        debug!("free list of {self:?}");

        for block in self.free_blocks() {
            debug!(
                "\tsize: {}, head: {:p}, prev: {:?}, next: {:?}",
                block.size, block.addr, block.prev, block.next
            );
        }
    }
}

impl<P: PlatformMemory> fmt::Debug for Heap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity())
            .field("region", &self.arena.as_ref().map(|arena| &arena.region))
            .finish()
    }
}

impl Arena {
    /// Maps a region for `config` and turns all of it into one free block.
    fn map<P: PlatformMemory>(config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;

        let mut region = HeapRegion::map::<P>(config.capacity())?;
        let mut free_list = FreeList::new();

        region.write(Offset::START, BlockHeader::detached(region.len() - HEADER_SIZE));
        free_list.insert(&mut region, Offset::START);

        debug!("heap initialized: {region:?}");

        Ok(Self { region, free_list })
    }

    fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        // Anything that doesn't fit in the region can't be served, and must not
        // wrap around when aligned or when a header is added to it.
        let Some(size) = size
            .checked_next_multiple_of(ALIGNMENT)
            .filter(|&aligned| aligned < self.region.len())
        else {
            return TooLargeSnafu {
                requested: size,
                capacity: self.region.len(),
            }
            .fail();
        };

        let Some(block) = self.free_list.find_first_fit(&self.region, size) else {
            return FragmentedSnafu {
                requested: size,
                largest_free: self.largest_free(),
            }
            .fail();
        };

        // find_first_fit guarantees room for the request plus a header.
        let remainder = self.region.block(block).size - size - HEADER_SIZE;

        if remainder >= ALIGNMENT {
            // Split: the front is allocated, the rest keeps the list position.
            let rest = Offset::new(block.end(size));
            self.free_list.replace(&mut self.region, block, rest, remainder);
            self.region.block_mut(block).size = size;

            trace!(
                "alloc {size} at +{:#x}, split off {remainder} bytes at +{:#x}",
                block.get(),
                rest.get()
            );
        } else {
            // The remainder couldn't hold a block, hand out the whole thing.
            self.free_list.remove(&mut self.region, block);

            trace!(
                "alloc {size} at +{:#x}, whole block of {}",
                block.get(),
                self.region.block(block).size
            );
        }

        Ok(self.region.payload(block))
    }

    fn free(&mut self, ptr: NonNull<u8>) {
        let block = self.region.block_of(ptr);
        debug_assert!(self.region.block(block).is_detached(), "double free");

        self.free_list.insert(&mut self.region, block);
        let merges = self.free_list.coalesce(&mut self.region);

        trace!(
            "free +{:#x} ({} bytes), {merges} merges",
            block.get(),
            self.region.block(block).size
        );
    }

    fn largest_free(&self) -> usize {
        self.free_list
            .iter(&self.region)
            .map(|(_, header)| header.size)
            .max()
            .unwrap_or(0)
    }
}

/// A free block as reported by [`Heap::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Address of the block header.
    pub addr: NonNull<u8>,
    /// Payload bytes available in the block.
    pub size: usize,
    /// Header address of the previous free block.
    pub prev: Option<NonNull<u8>>,
    /// Header address of the next free block.
    pub next: Option<NonNull<u8>>,
}

impl FreeBlock {
    /// Address right after the header, where an allocation of this block
    /// would start.
    pub fn payload(&self) -> NonNull<u8> {
        unsafe { self.addr.add(HEADER_SIZE) }
    }

    /// Address of the first byte past the block.
    pub fn end(&self) -> NonNull<u8> {
        unsafe { self.payload().add(self.size) }
    }
}

/// Iterator returned by [`Heap::free_blocks`].
pub struct FreeBlocks<'a> {
    inner: Option<(freelist::Iter<'a>, &'a HeapRegion)>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let (iter, region) = self.inner.as_mut()?;
        let (block, header) = iter.next()?;

        Some(FreeBlock {
            addr: region.address(block),
            size: header.size,
            prev: header.prev.get().map(|prev| region.address(prev)),
            next: header.next.get().map(|next| region.address(next)),
        })
    }
}

/// Free space of a [`Heap`] at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Size of the whole region.
    pub capacity: usize,
    /// Payload bytes in free blocks, headers not included.
    pub free_bytes: usize,
    /// Number of blocks on the free list.
    pub free_blocks: usize,
    /// Payload size of the biggest free block.
    pub largest_free: usize,
}
