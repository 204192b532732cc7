//! The allocator facade: owns the arena, the bucket array, and the fallback
//! allocator instance, and routes each request to the proper bucket or to
//! the fallback.
//!
//! Every operation here past construction is infallible in the `Result`
//! sense: capacity exhaustion degrades to the fallback allocator rather than
//! erroring, and the only way to observe an out-of-memory condition is a
//! null return from `allocate`/`reallocate`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::bucket::PoolBucket;
use crate::cache;
use crate::config::{Config, Warmup};
use crate::error::{AllocError, AllocResult};
use crate::fallback::{FallbackAllocator, SystemFallback};
use crate::size_class;
use crate::utils::{align_up, is_power_of_two};

#[cfg(feature = "stats")]
use crate::bucket::BucketStatsSnapshot;
#[cfg(feature = "stats")]
use crate::stats::{GlobalStats, GlobalStatsSnapshot};

/// Minimum and maximum alignment values the facade accepts.
pub const MIN_ALIGN: usize = 4;
pub const MAX_ALIGN: usize = 4096;

/// Cache-line size the arena is allocated at; matches the bucket alignment
/// used throughout the crate's atomics.
const ARENA_ALIGN: usize = 64;

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    arena: *mut u8,
    arena_len: usize,
    buckets: Vec<PoolBucket>,
    bucket_count: usize,
    sub_slab_bytes: usize,
    fallback: Box<dyn FallbackAllocator>,
    id: u64,
    default_warmup: Warmup,
    default_capacities: Vec<u32>,
    #[cfg(feature = "stats")]
    stats: GlobalStats,
}

// SAFETY: `arena` is an owned heap allocation, exclusively freed once (in
// `Drop`) and otherwise only read through the bucket/cache machinery, which
// disciplines all mutation via atomics or strict thread-local ownership.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        #[cfg(feature = "logging")]
        tracing::info!(
            allocator_id = self.id,
            arena_bytes = self.arena_len,
            "destroying small-block allocator"
        );
        if !self.arena.is_null() {
            // SAFETY: `arena` was obtained from `self.fallback.alloc` in
            // `SmallBlockAllocator::new` and is being freed exactly once,
            // here, with no outstanding borrows (buckets never outlive
            // `Inner`).
            unsafe {
                self.fallback.free(self.arena);
            }
        }
    }
}

/// Opaque handle to a small-block allocator. Cheaply `Clone`able (an `Arc`
/// around the shared arena/bucket state); the arena is released when the
/// last clone is dropped.
#[derive(Clone)]
pub struct SmallBlockAllocator(Arc<Inner>);

impl SmallBlockAllocator {
    /// Constructs a new allocator from a validated [`Config`], allocating its
    /// arena from the platform allocator.
    pub fn new(config: Config) -> AllocResult<Self> {
        config.validate()?;

        let bucket_count = config.bucket_count();
        let sub_slab_bytes = config.sub_slab_bytes();
        let arena_len = bucket_count * sub_slab_bytes;

        let fallback: Box<dyn FallbackAllocator> = Box::new(SystemFallback::new());
        let arena = fallback.alloc(arena_len, ARENA_ALIGN);
        if arena.is_null() {
            return Err(AllocError::ArenaAllocationFailed { requested: arena_len, align: ARENA_ALIGN });
        }

        let mut buckets = Vec::with_capacity(bucket_count);
        for i in 0..bucket_count {
            let slot_size = size_class::size(i);
            let slot_count = sub_slab_bytes / slot_size;
            // SAFETY: i * sub_slab_bytes < arena_len, the size of the buffer
            // just allocated above.
            let data = unsafe { arena.add(i * sub_slab_bytes) };
            let mut bucket = PoolBucket::new(data, slot_size, slot_count);
            bucket.init_freelist();
            buckets.push(bucket);
        }

        let id = NEXT_ALLOCATOR_ID.fetch_add(1, AtomicOrdering::Relaxed);

        #[cfg(feature = "logging")]
        tracing::info!(allocator_id = id, bucket_count, sub_slab_bytes, arena_len, "constructed small-block allocator");

        Ok(Self(Arc::new(Inner {
            arena,
            arena_len,
            buckets,
            bucket_count,
            sub_slab_bytes,
            fallback,
            id,
            default_warmup: config.default_warmup,
            default_capacities: config.default_capacities,
            #[cfg(feature = "stats")]
            stats: GlobalStats::default(),
        })))
    }

    #[inline]
    fn is_readable(p: *mut u8) -> bool {
        (p as usize) > MAX_ALIGN
    }

    #[inline]
    fn find_bucket(&self, p: *mut u8) -> usize {
        let index = (p as usize).wrapping_sub(self.0.arena as usize);
        index / self.0.sub_slab_bytes
    }

    /// Allocates `n` bytes aligned to `align` (a power of two in `[4,
    /// 4096]`). `n == 0` returns the poison value `align` itself.
    pub fn allocate(&self, n: usize, align: usize) -> *mut u8 {
        debug_assert!(is_power_of_two(align) && align >= MIN_ALIGN && align <= MAX_ALIGN);

        if n == 0 {
            return align as *mut u8;
        }

        #[cfg(feature = "stats")]
        self.0.stats.attempts.fetch_add(1, AtomicOrdering::Relaxed);

        let eff = align_up(n, align);
        let mut i = size_class::idx(eff);
        let is_valid_bucket = i < self.0.bucket_count;

        if is_valid_bucket {
            if let Some(offset) = cache::pull(self.0.id, i) {
                #[cfg(feature = "stats")]
                {
                    self.0.stats.served.fetch_add(1, AtomicOrdering::Relaxed);
                    self.0.buckets[i].stats.cache_hit.fetch_add(1, AtomicOrdering::Relaxed);
                }
                // SAFETY: offset was produced by this same bucket's
                // sub-slab, either via warmup or a prior push.
                return unsafe { self.0.buckets[i].data().add(offset as usize) };
            }
        }

        while i < self.0.bucket_count {
            if let Some(ptr) = self.0.buckets[i].allocate() {
                #[cfg(feature = "stats")]
                {
                    self.0.stats.served.fetch_add(1, AtomicOrdering::Relaxed);
                    self.0.buckets[i].stats.hit.fetch_add(1, AtomicOrdering::Relaxed);
                }
                return ptr;
            }
            #[cfg(feature = "stats")]
            self.0.buckets[i].stats.miss.fetch_add(1, AtomicOrdering::Relaxed);
            #[cfg(feature = "logging")]
            tracing::trace!(allocator_id = self.0.id, bucket = i, n, align, "bucket saturated, advancing scan");
            i = size_class::next_aligned(i + 1, align, self.0.bucket_count);
        }

        #[cfg(feature = "stats")]
        {
            self.0.stats.routed_to_fallback.fetch_add(1, AtomicOrdering::Relaxed);
            if is_valid_bucket {
                self.0.stats.routed_by_saturation.fetch_add(1, AtomicOrdering::Relaxed);
            } else {
                self.0.stats.routed_by_size.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        #[cfg(feature = "logging")]
        tracing::debug!(allocator_id = self.0.id, n, align, "routing allocation to fallback");

        self.0.fallback.alloc(n, align)
    }

    /// Frees a pointer previously returned by `allocate`/`reallocate`.
    /// No-op on a poison or null pointer.
    pub fn free(&self, p: *mut u8) {
        if !Self::is_readable(p) {
            return;
        }

        let bucket_index = self.find_bucket(p);
        if bucket_index < self.0.bucket_count {
            #[cfg(feature = "stats")]
            self.0.buckets[bucket_index].stats.free.fetch_add(1, AtomicOrdering::Relaxed);

            // SAFETY: p lies within this bucket's sub-slab, per find_bucket.
            let offset = unsafe { p.offset_from(self.0.buckets[bucket_index].data()) } as u32;
            if !cache::push(self.0.id, bucket_index, offset) {
                self.0.buckets[bucket_index].free_interval(p, p);
            }
            return;
        }

        // SAFETY: p was returned by this allocator's fallback path (it isn't
        // within the arena, and `is_readable` already excluded null/poison).
        unsafe { self.0.fallback.free(p) };
    }

    /// Reallocates `p` to `n` bytes aligned to `align`. `(null|poison, n >
    /// 0)` behaves as `allocate`; `(p, 0)` behaves as `free` and returns
    /// null.
    pub fn reallocate(&self, p: *mut u8, n: usize, align: usize) -> *mut u8 {
        if !Self::is_readable(p) {
            return self.allocate(n, align);
        }

        if n == 0 {
            self.free(p);
            return std::ptr::null_mut();
        }

        let bucket_index = self.find_bucket(p);
        if bucket_index < self.0.bucket_count {
            let elem_size = self.0.buckets[bucket_index].slot_size();
            if n <= elem_size {
                return p;
            }

            let p2 = self.allocate(n, align);
            if Self::is_readable(p2) {
                // SAFETY: p is a valid, live arena slot of size elem_size;
                // p2 is at least n >= elem_size bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(p, p2, elem_size);
                }
            }
            self.free(p);
            return p2;
        }

        // Existing block came from the fallback allocator.
        let eff = align_up(n, align);
        let new_bucket = size_class::idx(eff);
        if new_bucket < self.0.bucket_count {
            let p2 = self.allocate(n, align);
            if Self::is_readable(p2) {
                // SAFETY: p was allocated by `self.0.fallback`.
                let old_usable = unsafe { self.0.fallback.usable_size(p) };
                unsafe {
                    std::ptr::copy_nonoverlapping(p, p2, old_usable.min(n));
                }
            }
            // SAFETY: p was allocated by `self.0.fallback`.
            unsafe { self.0.fallback.free(p) };
            return p2;
        }

        // SAFETY: p was allocated by `self.0.fallback`.
        unsafe { self.0.fallback.realloc(p, n, align) }
    }

    /// Returns the usable size of a pointer previously returned by
    /// `allocate`/`reallocate`. Zero for null or poison.
    pub fn usable_size(&self, p: *mut u8) -> usize {
        if !Self::is_readable(p) {
            return 0;
        }

        let bucket_index = self.find_bucket(p);
        if bucket_index < self.0.bucket_count {
            self.0.buckets[bucket_index].slot_size()
        } else {
            // SAFETY: p was allocated by `self.0.fallback`.
            unsafe { self.0.fallback.usable_size(p) }
        }
    }

    /// Diagnostic: the bucket index owning `p`, or `-1` if `p` isn't an
    /// arena pointer.
    pub fn bucket_of(&self, p: *mut u8) -> i32 {
        if !self.is_my_alloc(p) {
            return -1;
        }
        let bucket_index = self.find_bucket(p);
        if bucket_index >= self.0.bucket_count {
            -1
        } else {
            bucket_index as i32
        }
    }

    #[inline]
    fn is_my_alloc(&self, p: *mut u8) -> bool {
        let addr = p as usize;
        addr >= self.0.arena as usize && addr < (self.0.arena as usize + self.0.arena_len)
    }

    /// Creates this thread's cache with the given warmup policy and
    /// per-bucket L1 capacities. Trailing buckets not covered by
    /// `capacities` default to zero (uncached).
    pub fn create_thread_cache(&self, warmup: Warmup, capacities: &[u32]) {
        let table = cache::ThreadCacheTable::new(self.clone(), warmup, capacities, &self.0.buckets);
        cache::install(self.0.id, table);
    }

    /// Creates this thread's cache using the allocator's configured default
    /// warmup policy and capacities.
    pub fn create_default_thread_cache(&self) {
        let warmup = self.0.default_warmup;
        let capacities = self.0.default_capacities.clone();
        self.create_thread_cache(warmup, &capacities);
    }

    /// Drains and releases this thread's cache, returning every cached slot
    /// to its master bucket.
    pub fn destroy_thread_cache(&self) {
        cache::remove(self.0.id);
    }

    pub fn bucket_count(&self) -> usize {
        self.0.bucket_count
    }

    pub fn sub_slab_bytes(&self) -> usize {
        self.0.sub_slab_bytes
    }

    /// Number of slots a bucket holds in total (not just currently free).
    pub fn bucket_capacity(&self, i: usize) -> usize {
        self.0.buckets.get(i).map(|b| b.slot_count()).unwrap_or(0)
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> GlobalStatsSnapshot {
        self.0.stats.snapshot()
    }

    #[cfg(feature = "stats")]
    pub fn bucket_stats(&self, i: usize) -> Option<BucketStatsSnapshot> {
        self.0.buckets.get(i).map(|b| b.stats.snapshot())
    }
}
