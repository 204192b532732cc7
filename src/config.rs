//! Allocator construction-time configuration.
//!
//! A [`Config`] describes the shape of the arena (bucket count, sub-slab
//! size) and the default thread-cache warmup policy; it is validated eagerly
//! by [`Config::validate`], which [`crate::facade::SmallBlockAllocator::new`]
//! calls before touching the fallback allocator.

use crate::error::{AllocError, AllocResult};
use crate::size_class::{self, MAX_BUCKET_COUNT};

/// How aggressively a freshly created thread cache pre-populates itself from
/// the master freelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Warmup {
    /// L0 and L1 both start empty.
    #[default]
    Cold,
    /// Half of L1's capacity is pre-populated.
    Warm,
    /// L1 is pre-populated to full capacity.
    Hot,
}

/// Validated construction parameters for a [`crate::facade::SmallBlockAllocator`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) bucket_count: usize,
    pub(crate) sub_slab_bytes: usize,
    pub(crate) default_warmup: Warmup,
    pub(crate) default_capacities: Vec<u32>,
}

impl Config {
    /// Starts building a [`Config`] for `bucket_count` buckets, each owning a
    /// `sub_slab_bytes`-byte sub-slab.
    pub fn builder(bucket_count: usize, sub_slab_bytes: usize) -> ConfigBuilder {
        ConfigBuilder {
            bucket_count,
            sub_slab_bytes,
            default_warmup: Warmup::Cold,
            default_capacities: Vec::new(),
        }
    }

    /// Validates the invariants from the data model: bucket count in
    /// `1..=62`, and the sub-slab large enough for at least one slot of the
    /// largest active class.
    pub fn validate(&self) -> AllocResult<()> {
        if self.bucket_count == 0 || self.bucket_count > MAX_BUCKET_COUNT {
            return Err(AllocError::InvalidBucketCount {
                count: self.bucket_count,
                max: MAX_BUCKET_COUNT,
            });
        }

        let largest_slot = size_class::size(self.bucket_count - 1);
        if self.sub_slab_bytes < largest_slot {
            return Err(AllocError::SubSlabTooSmall {
                sub_slab_bytes: self.sub_slab_bytes,
                largest_slot,
            });
        }

        Ok(())
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn sub_slab_bytes(&self) -> usize {
        self.sub_slab_bytes
    }
}

/// Builder for [`Config`]; validation happens in [`Config::validate`], called
/// by the allocator constructor, not by the builder itself.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    bucket_count: usize,
    sub_slab_bytes: usize,
    default_warmup: Warmup,
    default_capacities: Vec<u32>,
}

impl ConfigBuilder {
    /// Sets the warmup policy a `create_thread_cache` call uses when the
    /// caller doesn't override it explicitly.
    pub fn default_warmup(mut self, warmup: Warmup) -> Self {
        self.default_warmup = warmup;
        self
    }

    /// Sets the default per-bucket L1 capacities; trailing buckets not
    /// covered by the slice default to zero (uncached).
    pub fn default_capacities(mut self, capacities: &[u32]) -> Self {
        self.default_capacities = capacities.to_vec();
        self
    }

    pub fn build(self) -> Config {
        Config {
            bucket_count: self.bucket_count,
            sub_slab_bytes: self.sub_slab_bytes,
            default_warmup: self.default_warmup,
            default_capacities: self.default_capacities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_buckets() {
        let cfg = Config::builder(0, 1 << 20).build();
        assert!(matches!(cfg.validate(), Err(AllocError::InvalidBucketCount { .. })));
    }

    #[test]
    fn rejects_oversize_bucket_count() {
        let cfg = Config::builder(MAX_BUCKET_COUNT + 1, 1 << 20).build();
        assert!(matches!(cfg.validate(), Err(AllocError::InvalidBucketCount { .. })));
    }

    #[test]
    fn rejects_undersized_sub_slab() {
        let cfg = Config::builder(5, 4).build();
        assert!(matches!(cfg.validate(), Err(AllocError::SubSlabTooSmall { .. })));
    }

    #[test]
    fn accepts_reasonable_config() {
        let cfg = Config::builder(5, 48 * 1024 * 1024).build();
        assert!(cfg.validate().is_ok());
    }
}
