//! # dmalloc
//!
//! A first-fit memory allocator that manages a single region of memory
//! obtained once from the operating system.
//!
//! Every block of the region, free or allocated, starts with a small header
//! holding its size. Free blocks additionally link to each other through that
//! header, forming a doubly linked list sorted by address:
//!
//! ```text
//!   head                                                      next
//!    +------------------------------+--------------------------------+
//!    |                              |                                |
//! +--v---+------+---+-------+---+---v--+------+---+-------+---+------v-----------+
//! | hdr  | free |   | hdr   | A |  hdr | free |   | hdr   | B |  hdr |   free    |
//! +------+------+---+-------+---+------+------+---+-------+---+------+-----------+
//! ```
//!
//! - **alloc** walks the list and takes the first block large enough. If what
//!   is left after the request can still hold a header plus one
//!   [`config::ALIGNMENT`] unit, the block is split and the remainder stays on
//!   the list; otherwise the whole block is handed out.
//! - **free** puts the block back at its address-sorted position and merges
//!   every pair of free blocks that touch in memory.
//!
//! No other structure is kept: all the metadata lives inside the managed
//! memory itself.
//!
//! ## Quick start
//!
//! ```
//! use dmalloc::Heap;
//!
//! let mut heap = Heap::new();
//!
//! let ptr = heap.alloc(64).expect("out of memory");
//! unsafe {
//!     ptr.as_ptr().write_bytes(0, 64);
//!     heap.free(ptr);
//! }
//! ```
//!
//! [`LockedHeap`] wraps a [`Heap`] in a lock so it can be installed as the
//! global allocator.
//!
//! ## Limitations
//!
//! - The region never grows: once it is full, allocations fail.
//! - First-fit can fail even if the total free memory would be enough, when no
//!   single block is large enough.
//! - Freeing a pointer twice, or one that didn't come from the heap, is
//!   undefined behaviour. Debug builds catch some of those cases.

mod block;
pub mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod region;
pub mod utils;

pub use config::HeapConfig;
pub use error::{AllocError, HeapError};
pub use global::LockedHeap;
pub use heap::{FreeBlock, FreeBlocks, Heap, HeapStats};
pub use kernel::{Kernel, PlatformMemory};

/// Width in bytes of the header in front of every block. A payload pointer is
/// always this far past the start of its block.
pub const HEADER_SIZE: usize = block::HEADER_SIZE;
