//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to round request sizes up to [`crate::config::ALIGNMENT`]
/// and to compute the aligned width of a [`crate::block::BlockHeader`], which is
/// what keeps every payload pointer we hand out aligned as well.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}
