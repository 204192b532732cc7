//! Error taxonomy for the allocator's single fallible entry point,
//! construction. Everything past construction (allocate/free/reallocate) is
//! infallible by contract — see the module docs on [`crate::facade`] — and
//! signals exhaustion with a null pointer, never a `Result`.

use thiserror::Error;

/// Failure constructing a [`crate::facade::SmallBlockAllocator`].
#[derive(Debug, Error)]
pub enum AllocError {
    /// `Config::bucket_count` was `0` or exceeded
    /// [`crate::size_class::MAX_BUCKET_COUNT`].
    #[error("bucket count {count} out of range (must be 1..={max})")]
    InvalidBucketCount { count: usize, max: usize },

    /// The configured sub-slab size can't hold even one slot of the largest
    /// active bucket.
    #[error(
        "sub-slab size {sub_slab_bytes} too small for largest bucket slot size {largest_slot}"
    )]
    SubSlabTooSmall {
        sub_slab_bytes: usize,
        largest_slot: usize,
    },

    /// The one-time arena allocation from the fallback allocator failed.
    #[error("fallback allocator returned null allocating {requested} bytes (align {align})")]
    ArenaAllocationFailed { requested: usize, align: usize },
}

/// Result alias for the allocator's fallible constructor.
pub type AllocResult<T> = Result<T, AllocError>;
