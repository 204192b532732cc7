//! # smallblock-alloc
//!
//! A small-block, size-classed, thread-caching memory allocator.
//!
//! Requests are bucketed into fixed-size classes, each backed by a
//! lock-free, ABA-safe intrusive freelist over a pre-reserved arena slab.
//! Threads that opt in get a two-level cache (a small inline array plus a
//! larger heap-backed buffer) in front of each bucket, so the common
//! allocate/free path touches no shared atomic at all. Requests that don't
//! fit any size class, or land on a saturated one, fall through to a
//! pluggable fallback allocator.
//!
//! The arena is sized once, at construction, from a [`Config`]; there is no
//! dynamic growth, no return of pages to the OS, and no coalescing of
//! adjacent free slots. See [`facade`] for the full routing description.
//!
//! ```
//! use smallblock_alloc::{Config, SmallBlockAllocator};
//!
//! let config = Config::builder(8, 1 << 20).build();
//! let alloc = SmallBlockAllocator::new(config).expect("valid config");
//!
//! let p = alloc.allocate(64, 16);
//! assert!(!p.is_null());
//! alloc.free(p);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::missing_safety_doc)]

pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod fallback;
pub mod size_class;
#[cfg(feature = "stats")]
pub mod stats;
pub mod utils;

pub use config::{Config, ConfigBuilder, Warmup};
pub use error::{AllocError, AllocResult};
pub use facade::SmallBlockAllocator;
pub use fallback::{FallbackAllocator, SystemFallback};

#[cfg(feature = "stats")]
pub use bucket::BucketStatsSnapshot;
#[cfg(feature = "stats")]
pub use stats::GlobalStatsSnapshot;
