//! Pool bucket: one per size class, owning a contiguous slab of equal-size
//! slots and a lock-free, ABA-safe intrusive freelist over them.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::utils::Backoff;

#[cfg(feature = "stats")]
use core::sync::atomic::AtomicU64 as Counter;

/// Sentinel head value meaning "freelist is empty".
const SENTINEL: u64 = u64::MAX;

#[inline(always)]
const fn pack(tag: u32, offset: u32) -> u64 {
    ((tag as u64) << 32) | (offset as u64)
}

#[inline(always)]
const fn unpack(tagged: u64) -> (u32, u32) {
    ((tagged >> 32) as u32, tagged as u32)
}

/// Per-bucket statistics, relaxed and best-effort.
#[cfg(feature = "stats")]
#[derive(Debug, Default)]
pub struct BucketStats {
    pub(crate) cache_hit: Counter,
    pub(crate) hit: Counter,
    pub(crate) miss: Counter,
    pub(crate) free: Counter,
}

/// Point-in-time copy of [`BucketStats`], safe to print or serialize.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStatsSnapshot {
    pub cache_hit: u64,
    pub hit: u64,
    pub miss: u64,
    pub free: u64,
}

#[cfg(feature = "stats")]
impl BucketStats {
    pub(crate) fn snapshot(&self) -> BucketStatsSnapshot {
        BucketStatsSnapshot {
            cache_hit: self.cache_hit.load(Ordering::Relaxed),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            free: self.free.load(Ordering::Relaxed),
        }
    }
}

/// One size class's master freelist over its sub-slab.
///
/// `data`/`end` bound the sub-slab this bucket owns inside the shared arena.
/// The bucket never allocates or frees that memory itself; the facade owns
/// the arena for the allocator's whole lifetime.
pub struct PoolBucket {
    head: AtomicU64,
    global_tag: AtomicU32,
    data: *mut u8,
    end: *mut u8,
    slot_size: usize,
    slot_count: usize,
    #[cfg(feature = "stats")]
    pub(crate) stats: BucketStats,
}

// SAFETY: `data`/`end` point into a buffer owned by the enclosing allocator
// for its whole lifetime; all mutation of the pointed-to bytes goes through
// the atomic `head` CAS protocol below, never through `&mut PoolBucket`.
unsafe impl Send for PoolBucket {}
unsafe impl Sync for PoolBucket {}

impl PoolBucket {
    /// Builds an uninitialized bucket over `[data, data + slot_size *
    /// slot_count)`. Call [`PoolBucket::init_freelist`] before use.
    pub(crate) fn new(data: *mut u8, slot_size: usize, slot_count: usize) -> Self {
        // SAFETY: slot_count * slot_size fits in the caller-provided sub-slab;
        // the caller computed it from the same arena carve-up.
        let end = unsafe { data.add(slot_size * slot_count) };
        Self {
            head: AtomicU64::new(SENTINEL),
            global_tag: AtomicU32::new(0),
            data,
            end,
            slot_size,
            slot_count,
            #[cfg(feature = "stats")]
            stats: BucketStats::default(),
        }
    }

    /// Chains every slot into a forward-linked freelist (slot 0 -> slot 1 ->
    /// ... -> sentinel) and publishes `head = (tag=0, offset=0)`.
    ///
    /// Must run to completion before any `allocate`/`free_interval` call and
    /// must not race with one; the facade calls this once per bucket during
    /// construction, before publishing the allocator handle to other threads.
    pub(crate) fn init_freelist(&mut self) {
        if self.slot_count == 0 {
            self.head = AtomicU64::new(SENTINEL);
            return;
        }

        for slot in 0..self.slot_count {
            let offset = slot * self.slot_size;
            let next = if slot + 1 < self.slot_count {
                pack(0, ((slot + 1) * self.slot_size) as u32)
            } else {
                SENTINEL
            };
            // SAFETY: offset < slot_count * slot_size == end - data, and the
            // slot is at least 8 bytes (the smallest size class is 16 bytes).
            unsafe {
                self.data.add(offset).cast::<u64>().write_unaligned(next);
            }
        }

        self.head = AtomicU64::new(pack(0, 0));
    }

    /// Pops one slot off the freelist, or returns `None` if empty.
    #[inline]
    pub(crate) fn allocate(&self) -> Option<*mut u8> {
        let mut backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            if head == SENTINEL {
                return None;
            }

            let (_, offset) = unpack(head);
            // SAFETY: every tagged index ever published by this bucket has an
            // offset within [0, slot_count * slot_size), and the slot's first
            // 8 bytes were written either by `init_freelist` or by a prior
            // `free_interval`.
            let slot = unsafe { self.data.add(offset as usize) };
            let next = unsafe { slot.cast::<u64>().read_unaligned() };

            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(slot),
                Err(observed) => {
                    head = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Pushes an already-chained run of slots `[head_ptr ..= tail_ptr]` back
    /// onto the freelist in one CAS. `head_ptr == tail_ptr` is the degenerate
    /// single-slot case. The caller must have already written tagged "next"
    /// links into every node except `tail_ptr`; this function writes only
    /// `tail_ptr`'s link.
    #[inline]
    pub(crate) fn free_interval(&self, head_ptr: *mut u8, tail_ptr: *mut u8) {
        debug_assert!(self.belongs(head_ptr));
        debug_assert!(self.belongs(tail_ptr));

        // Relaxed: the tag only needs to be unique versus recent values, not
        // to synchronize anything.
        let tag = self.global_tag.fetch_add(1, Ordering::Relaxed);
        let offset = unsafe { head_ptr.offset_from(self.data) } as u32;
        let node = pack(tag, offset);

        let mut backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            // SAFETY: tail_ptr belongs to this sub-slab (checked above) and
            // holds at least 8 bytes.
            unsafe {
                tail_ptr.cast::<u64>().write_unaligned(head);
            }

            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => {
                    head = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Pointer range check: does `p` fall inside this bucket's sub-slab?
    #[inline]
    pub(crate) fn belongs(&self, p: *mut u8) -> bool {
        (p as usize) >= (self.data as usize) && (p as usize) < (self.end as usize)
    }

    #[inline]
    pub(crate) fn data(&self) -> *mut u8 {
        self.data
    }

    #[inline]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub(crate) fn slot_count(&self) -> usize {
        self.slot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bucket(slot_size: usize, slot_count: usize) -> (Vec<u8>, PoolBucket) {
        let mut backing = vec![0u8; slot_size * slot_count];
        let mut bucket = PoolBucket::new(backing.as_mut_ptr(), slot_size, slot_count);
        bucket.init_freelist();
        (backing, bucket)
    }

    #[test]
    fn allocate_drains_exactly_slot_count() {
        let (_backing, bucket) = make_bucket(16, 8);
        let mut seen = Vec::new();
        while let Some(p) = bucket.allocate() {
            seen.push(p as usize);
        }
        assert_eq!(seen.len(), 8);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 8, "duplicate slot returned");
    }

    #[test]
    fn free_then_reallocate_round_trips() {
        let (_backing, bucket) = make_bucket(16, 4);
        let p0 = bucket.allocate().unwrap();
        let p1 = bucket.allocate().unwrap();
        bucket.free_interval(p0, p0);
        bucket.free_interval(p1, p1);

        let mut recovered = 0;
        while bucket.allocate().is_some() {
            recovered += 1;
        }
        assert_eq!(recovered, 4);
    }

    #[test]
    fn free_interval_batches_a_chain() {
        let (_backing, bucket) = make_bucket(16, 4);
        let p0 = bucket.allocate().unwrap();
        let p1 = bucket.allocate().unwrap();
        let p2 = bucket.allocate().unwrap();

        // Chain p0 -> p1 -> p2, with tagged links written into p0 and p1 by
        // the caller as the contract requires.
        unsafe {
            p0.cast::<u64>().write_unaligned(pack(0, (p1 as usize - bucket.data() as usize) as u32));
            p1.cast::<u64>().write_unaligned(pack(0, (p2 as usize - bucket.data() as usize) as u32));
        }
        bucket.free_interval(p0, p2);

        let mut recovered = 0;
        while bucket.allocate().is_some() {
            recovered += 1;
        }
        assert_eq!(recovered, 4);
    }

    #[test]
    fn belongs_rejects_outside_pointers() {
        let (_backing, bucket) = make_bucket(16, 4);
        let mut other = [0u8; 16];
        assert!(!bucket.belongs(other.as_mut_ptr()));
    }
}
