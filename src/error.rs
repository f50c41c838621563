use snafu::Snafu;

/// Errors raised while setting up a [`crate::Heap`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    /// The OS refused to map the heap region. The heap stays uninitialized
    /// and can't service any request until a later attempt succeeds.
    #[snafu(display("failed to map a heap region of {capacity} bytes"))]
    OutOfMemory { capacity: usize },
    /// The configured capacity can't hold a single block, or is too large to
    /// be addressed by block offsets.
    #[snafu(display("invalid heap capacity: {capacity} bytes"))]
    InvalidCapacity { capacity: usize },
}

/// Reasons why [`crate::Heap::try_alloc`] returned no memory.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("heap is not initialized"))]
    Init { source: HeapError },
    /// The request is at least as large as the whole region.
    #[snafu(display("request of {requested} bytes exceeds a heap of {capacity} bytes"))]
    TooLarge { requested: usize, capacity: usize },
    /// No single free block is large enough. This can happen even if the
    /// total amount of free memory would suffice.
    #[snafu(display(
        "no free block can hold {requested} bytes (largest free block: {largest_free} bytes)"
    ))]
    Fragmented {
        requested: usize,
        largest_free: usize,
    },
}

impl AllocError {
    /// Whether the heap itself is unusable, as opposed to a single request
    /// failing because of fragmentation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init { .. })
    }
}
