//! Global, allocator-wide statistics. Best-effort and relaxed: these exist
//! for observability, not for correctness, per the concurrency model.

#[cfg(feature = "stats")]
use core::sync::atomic::{AtomicU64, Ordering};

/// Global allocator-wide counters.
#[cfg(feature = "stats")]
#[derive(Debug, Default)]
pub struct GlobalStats {
    pub(crate) attempts: AtomicU64,
    pub(crate) served: AtomicU64,
    pub(crate) routed_to_fallback: AtomicU64,
    pub(crate) routed_by_size: AtomicU64,
    pub(crate) routed_by_saturation: AtomicU64,
}

/// Point-in-time copy of [`GlobalStats`], safe to print or serialize.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalStatsSnapshot {
    pub attempts: u64,
    pub served: u64,
    pub routed_to_fallback: u64,
    pub routed_by_size: u64,
    pub routed_by_saturation: u64,
}

#[cfg(feature = "stats")]
impl GlobalStats {
    pub(crate) fn snapshot(&self) -> GlobalStatsSnapshot {
        GlobalStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            routed_to_fallback: self.routed_to_fallback.load(Ordering::Relaxed),
            routed_by_size: self.routed_by_size.load(Ordering::Relaxed),
            routed_by_saturation: self.routed_by_saturation.load(Ordering::Relaxed),
        }
    }
}
