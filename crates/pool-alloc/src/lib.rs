//! Two-tier pooled memory allocator.
//!
//! This crate serves small, fixed-size allocations from segregated free lists
//! fed by a growing chunk pool, and hands everything else to a primary
//! allocator that wraps a raw [`GlobalAlloc`](core::alloc::GlobalAlloc)
//! backend. The crate is `no_std`; the default `std` feature adds
//! constructors over the system allocator.
//!
//! # Tiers
//!
//! ## [`PrimaryAllocator`]
//!
//! Forwards requests to the backend. When the backend fails, the installed
//! OOM handler runs and the request is retried, up to
//! [`AllocatorConfig::max_oom_retries`] rounds. Without a handler the first
//! failure is final and reported as [`AllocError::OutOfMemory`].
//!
//! ## [`FreeListAllocator`]
//!
//! Rounds requests of up to [`MAX_BYTES`] bytes up to a multiple of
//! [`ALIGN`] and serves them from one of [`NUM_CLASSES`] LIFO free lists.
//! An empty list is refilled with a batch of blocks carved from the chunk
//! pool, which in turn grows geometrically through the primary allocator.
//! When the primary allocator cannot supply a new region, a spare block of a
//! larger class is scavenged instead.
//!
//! ## [`TypedAllocator`]
//!
//! Allocates room for a count of `T` through a [`FreeListAllocator`].
//!
//! # Usage Examples
//!
//! ```rust
//! use pool_alloc::{AllocatorConfig, FreeListAllocator};
//!
//! fn drop_caches() {
//!     // release memory held elsewhere
//! }
//!
//! let allocator = FreeListAllocator::with_config(
//!     std::alloc::System,
//!     AllocatorConfig::new().with_oom_handler(Some(drop_caches)),
//! );
//!
//! // Small requests come from the pool
//! let small = allocator.allocate(24).unwrap();
//! // Large requests go to the primary allocator
//! let large = allocator.allocate(4096).unwrap();
//!
//! unsafe {
//!     allocator.deallocate(small, 24).unwrap();
//!     allocator.deallocate(large, 4096).unwrap();
//! }
//!
//! let stats = allocator.stats();
//! assert_eq!(stats.live_blocks, 0);
//! assert!(stats.is_conserved());
//! ```
//!
//! # Design Considerations
//!
//! ## Memory Safety
//!
//! Releasing memory is `unsafe`: the allocator keeps no per-block header and
//! trusts the caller to hand back blocks it owns. The size passed on release
//! is checked against the size carried by the [`RawBlock`] handle, and a
//! mismatch is reported as [`AllocError::SizeMismatch`].
//!
//! ## Thread Safety
//!
//! Both allocators are `Sync` when their backend is. The pooled state sits
//! behind a single spin lock, which is never held while the OOM handler runs.
//!
//! ## Integration with Global Allocator
//!
//! [`FreeListAllocator`] implements `GlobalAlloc` itself:
//!
//! ```rust,ignore
//! use pool_alloc::FreeListAllocator;
//!
//! #[global_allocator]
//! static ALLOCATOR: FreeListAllocator<std::alloc::System> = FreeListAllocator::system();
//! ```

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod backend;
pub mod block;
mod chunk_pool;
pub mod config;
pub mod error;
mod free_list;
pub mod free_list_allocator;
pub mod primary;
pub mod size_class;
pub mod stats;
pub mod typed;

pub use self::{
    backend::{BackendCounts, CountingBackend},
    block::RawBlock,
    chunk_pool::CHUNK_HEADER_SIZE,
    config::{AllocatorConfig, MAX_REFILL_BATCH, OomHandler},
    error::{AllocError, Location},
    free_list_allocator::FreeListAllocator,
    primary::PrimaryAllocator,
    size_class::{ALIGN, MAX_BYTES, NUM_CLASSES, SizeClass},
    stats::{PoolStats, PrimaryStats},
    typed::{TypedAllocator, TypedBlock},
};
