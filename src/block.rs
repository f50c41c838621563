use std::mem;

use crate::{config::ALIGNMENT, utils::align};

/// Width of a block header in bytes, rounded up to [`ALIGNMENT`] so that the
/// payload right after it stays aligned. On 64 bit targets this is 16.
pub(crate) const HEADER_SIZE: usize = align(mem::size_of::<BlockHeader>(), ALIGNMENT);

/// Position of a block inside the heap region, in bytes from the region start.
///
/// There is only one region per heap, so comparing offsets is the same as
/// comparing addresses and the free list can be kept sorted by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Offset(u32);

impl Offset {
    /// Biggest region (in bytes) whose blocks can all be addressed. `u32::MAX`
    /// itself is reserved as the empty [`Link`].
    pub const MAX_REGION: usize = u32::MAX as usize;

    /// The first block of a region starts right at its base.
    pub const START: Self = Self(0);

    pub fn new(offset: usize) -> Self {
        debug_assert!(offset < Self::MAX_REGION, "block offset out of range");
        Self(offset as u32)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Offset of the payload that follows this block's header.
    #[inline]
    pub fn payload(self) -> usize {
        self.get() + HEADER_SIZE
    }

    /// Offset of the byte right after a payload of `size` bytes, which is
    /// where a memory-adjacent block would have its header.
    #[inline]
    pub fn end(self, size: usize) -> usize {
        self.payload() + size
    }
}

/// Reference from one free block to another, stored inside the header.
///
/// ```text
/// +--------+--------+
/// |  prev  |  next  |   u32 offsets, u32::MAX means "no block"
/// +--------+--------+
/// ```
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link(u32);

impl Link {
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub fn to(offset: Offset) -> Self {
        Self(offset.0)
    }

    #[inline]
    pub fn get(self) -> Option<Offset> {
        (self != Self::NONE).then_some(Offset(self.0))
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl From<Option<Offset>> for Link {
    fn from(offset: Option<Offset>) -> Self {
        offset.map_or(Self::NONE, Self::to)
    }
}

/// Metadata placed in front of every block of the heap, free or allocated.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header (HEADER_SIZE bytes)
/// |   prev   |   next   |        |
/// +---------------------+ <------+ <- pointer handed out by alloc
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+ <- header of the next block
/// ```
///
/// `prev` and `next` are only meaningful while the block is on the free
/// list. Allocated blocks have both links cleared.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHeader {
    /// Usable payload capacity in bytes, not counting this header.
    pub size: usize,
    /// Previous free block in address order.
    pub prev: Link,
    /// Next free block in address order.
    pub next: Link,
}

impl BlockHeader {
    /// Header of a block that is not linked to any other block.
    pub const fn detached(size: usize) -> Self {
        Self {
            size,
            prev: Link::NONE,
            next: Link::NONE,
        }
    }

    /// Whether the block holds no list linkage.
    pub fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}
