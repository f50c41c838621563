//! Sizing constants and the per-heap configuration.

use snafu::ensure;

use crate::{
    block::{HEADER_SIZE, Offset},
    error::{HeapError, InvalidCapacitySnafu},
    utils::align,
};

/// Default capacity of a heap in bytes. The whole amount is requested from
/// the OS in a single mapping the first time the heap is used.
pub const MAX_HEAP_SIZE: usize = 1024 * 1024;

/// Allocation unit. Every request size is rounded up to a multiple of this
/// value and every payload pointer returned by the allocator is aligned to it.
pub const ALIGNMENT: usize = 8;

const _: () = assert!(ALIGNMENT.is_power_of_two());

/// Configuration of a single [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Configuration with a capacity of [`MAX_HEAP_SIZE`].
    pub const fn new() -> Self {
        Self {
            capacity: MAX_HEAP_SIZE,
        }
    }

    /// Sets the number of bytes mapped for the heap. The value is rounded up
    /// to [`ALIGNMENT`].
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Capacity of the region that will be mapped, already aligned.
    pub const fn capacity(&self) -> usize {
        align(self.capacity, ALIGNMENT)
    }

    /// Checks that the region can hold at least one block with one allocation
    /// unit of payload, and that every byte of it is addressable by an [`Offset`].
    pub fn validate(&self) -> Result<(), HeapError> {
        ensure!(
            self.capacity > 0
                && self.capacity <= Offset::MAX_REGION - ALIGNMENT
                && self.capacity() >= HEADER_SIZE + ALIGNMENT,
            InvalidCapacitySnafu {
                capacity: self.capacity
            }
        );

        Ok(())
    }
}
