//! Thread cache: a thread-local, per-bucket two-level cache (a tiny inline
//! L0, a larger heap-backed L1) that batches refills from and returns to the
//! master pool bucket.
//!
//! There is no locking anywhere in this module: a cache is created, used,
//! and destroyed by exactly one thread, enforced here by keying the
//! thread-local table on the owning [`crate::facade::SmallBlockAllocator`]'s
//! identity.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::bucket::PoolBucket;
use crate::config::Warmup;

/// L0 capacity: 7 entries on 64-bit targets, 10 on 32-bit, matching the
/// reference design's choice to size the inline array by pointer width.
#[cfg(target_pointer_width = "64")]
pub const L0_CAPACITY: usize = 7;
#[cfg(not(target_pointer_width = "64"))]
pub const L0_CAPACITY: usize = 10;

/// One bucket's worth of per-thread cached slots.
struct CacheBucket {
    l0: [u32; L0_CAPACITY],
    l0_len: usize,
    l1: Box<[u32]>,
    l1_len: usize,
    sub_slab_base: *mut u8,
    master: *const PoolBucket,
}

impl CacheBucket {
    fn disabled() -> Self {
        Self {
            l0: [0; L0_CAPACITY],
            l0_len: 0,
            l1: Box::new([]),
            l1_len: 0,
            sub_slab_base: core::ptr::null_mut(),
            master: core::ptr::null(),
        }
    }

    fn new(capacity: u32, bucket: &PoolBucket) -> Self {
        Self {
            l0: [0; L0_CAPACITY],
            l0_len: 0,
            l1: vec![0u32; capacity as usize].into_boxed_slice(),
            l1_len: 0,
            sub_slab_base: bucket.data(),
            master: bucket as *const PoolBucket,
        }
    }

    fn is_enabled(&self) -> bool {
        !self.master.is_null()
    }

    /// SAFETY: `self.master` must be non-null and still valid.
    unsafe fn master(&self) -> &PoolBucket {
        unsafe { &*self.master }
    }

    fn warmup(&mut self, policy: Warmup) {
        if !self.is_enabled() || self.l1.is_empty() {
            return;
        }
        let target = match policy {
            Warmup::Cold => 0,
            Warmup::Warm => self.l1.len() / 2,
            Warmup::Hot => self.l1.len(),
        };
        // SAFETY: cache is enabled, so `master` is valid.
        let master = unsafe { self.master() };
        while self.l1_len < target {
            match master.allocate() {
                Some(slot) => {
                    let offset = unsafe { slot.offset_from(self.sub_slab_base) } as u32;
                    self.l1[self.l1_len] = offset;
                    self.l1_len += 1;
                }
                None => break,
            }
        }
    }

    /// First drains L0 (LIFO), then L1 (LIFO).
    fn pull(&mut self) -> Option<u32> {
        if self.l0_len > 0 {
            self.l0_len -= 1;
            return Some(self.l0[self.l0_len]);
        }
        if self.l1_len > 0 {
            self.l1_len -= 1;
            return Some(self.l1[self.l1_len]);
        }
        None
    }

    /// Pushes `offset` into L0 if there's room, else L1, else returns half
    /// of L1 to the master bucket in one batched `free_interval` before
    /// making room.
    fn push(&mut self, offset: u32) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if self.l0_len < L0_CAPACITY {
            self.l0[self.l0_len] = offset;
            self.l0_len += 1;
            return true;
        }

        if self.l1_len < self.l1.len() {
            self.l1[self.l1_len] = offset;
            self.l1_len += 1;
            return true;
        }

        // L1 is full: bulk-return half of it to reduce CAS traffic, then
        // push the new offset into the freed space.
        let give_back = (self.l1_len / 2).max(1);
        self.return_to_master(give_back);

        if self.l1_len < self.l1.len() {
            self.l1[self.l1_len] = offset;
            self.l1_len += 1;
            return true;
        }
        false
    }

    /// Chains the last `count` slots of L1 into a linked run and pushes it
    /// back to the master bucket in one `free_interval` call.
    fn return_to_master(&mut self, count: usize) {
        let count = count.min(self.l1_len);
        if count == 0 {
            return;
        }

        let first = self.l1_len - count;
        let head_offset = self.l1[first];
        let head_ptr = unsafe { self.sub_slab_base.add(head_offset as usize) };
        let mut prev_ptr = head_ptr;

        for i in (first + 1)..self.l1_len {
            let offset = self.l1[i];
            let ptr = unsafe { self.sub_slab_base.add(offset as usize) };
            // The tag written here is immediately overwritten by
            // `free_interval`'s own tag for the head link; for interior links
            // any value works, `free_interval` only rewrites the tail slot.
            unsafe {
                prev_ptr
                    .cast::<u64>()
                    .write_unaligned(((i as u64) << 32) | offset as u64);
            }
            prev_ptr = ptr;
        }

        // SAFETY: master is non-null because `is_enabled()` gated every path
        // that can reach here.
        unsafe { self.master() }.free_interval(head_ptr, prev_ptr);
        self.l1_len -= count;
    }

    /// Drains every remaining slot (L0 then L1) back to the master bucket.
    fn drain_to_master(&mut self) {
        if !self.is_enabled() {
            return;
        }
        // SAFETY: gated by is_enabled().
        let master = unsafe { self.master() };
        while self.l0_len > 0 {
            self.l0_len -= 1;
            let offset = self.l0[self.l0_len];
            let ptr = unsafe { self.sub_slab_base.add(offset as usize) };
            master.free_interval(ptr, ptr);
        }
        self.return_to_master(self.l1_len);
    }
}

impl Drop for CacheBucket {
    fn drop(&mut self) {
        self.drain_to_master();
    }
}

/// The full set of per-bucket caches belonging to one thread for one
/// allocator instance. Keeps the allocator's shared state alive for as long
/// as the cache entry exists.
pub(crate) struct ThreadCacheTable {
    buckets: Vec<CacheBucket>,
    _keep_alive: crate::facade::SmallBlockAllocator,
}

impl ThreadCacheTable {
    pub(crate) fn new(
        allocator: crate::facade::SmallBlockAllocator,
        warmup: Warmup,
        capacities: &[u32],
        master_buckets: &[PoolBucket],
    ) -> Self {
        let buckets = master_buckets
            .iter()
            .enumerate()
            .map(|(i, bucket)| {
                let cap = capacities.get(i).copied().unwrap_or(0);
                if cap == 0 {
                    CacheBucket::disabled()
                } else {
                    let mut cb = CacheBucket::new(cap, bucket);
                    cb.warmup(warmup);
                    cb
                }
            })
            .collect();

        Self { buckets, _keep_alive: allocator }
    }

    pub(crate) fn pull(&mut self, bucket_index: usize) -> Option<u32> {
        self.buckets.get_mut(bucket_index)?.pull()
    }

    pub(crate) fn push(&mut self, bucket_index: usize, offset: u32) -> bool {
        match self.buckets.get_mut(bucket_index) {
            Some(cb) => cb.push(offset),
            None => false,
        }
    }
}

thread_local! {
    static TLS_CACHES: RefCell<HashMap<u64, ThreadCacheTable>> = RefCell::new(HashMap::new());
}

pub(crate) fn install(id: u64, table: ThreadCacheTable) {
    TLS_CACHES.with(|c| {
        c.borrow_mut().insert(id, table);
    });
}

pub(crate) fn remove(id: u64) {
    TLS_CACHES.with(|c| {
        c.borrow_mut().remove(&id);
    });
}

pub(crate) fn pull(id: u64, bucket_index: usize) -> Option<u32> {
    TLS_CACHES.with(|c| c.borrow_mut().get_mut(&id)?.pull(bucket_index))
}

pub(crate) fn push(id: u64, bucket_index: usize, offset: u32) -> bool {
    TLS_CACHES.with(|c| {
        c.borrow_mut()
            .get_mut(&id)
            .map(|t| t.push(bucket_index, offset))
            .unwrap_or(false)
    })
}
