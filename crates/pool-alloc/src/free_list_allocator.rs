//! The pooled (second-tier) allocator.
//!
//! Requests of up to [`MAX_BYTES`](crate::MAX_BYTES) bytes are rounded up to their
//! [`SizeClass`] and served from a per-class free list. An empty list is
//! refilled with a batch of blocks carved from the chunk pool. Larger
//! requests, and requests aligned beyond [`ALIGN`], bypass the pool and go
//! straight to the [`PrimaryAllocator`].
//!
//! Freed small blocks are never returned to the primary allocator while the
//! allocator is alive; they stay on their free list for reuse. Dropping the
//! allocator releases every pool region at once.
//!
//! # Locking
//!
//! The free lists, the chunk pool and the live-block counters sit behind a
//! single spin lock. The lock is released while a new pool region is
//! requested through the OOM-handler retry loop, so a handler may free (or
//! allocate) pooled blocks without deadlocking.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use crate::{
    block::RawBlock,
    chunk_pool::{ChunkPool, Starved},
    config::{AllocatorConfig, OomHandler},
    error::AllocError,
    free_list::FreeLists,
    primary::{PrimaryAllocator, byte_layout},
    size_class::{ALIGN, SizeClass},
    stats::PoolStats,
    typed::{TypedAllocator, TypedBlock},
};

struct PoolState {
    lists: FreeLists,
    pool: ChunkPool,
    live_blocks: usize,
    live_bytes: usize,
    refills: usize,
}

// The raw pointers in `PoolState` refer to memory owned by the allocator.
unsafe impl Send for PoolState {}

impl PoolState {
    const fn new() -> Self {
        Self {
            lists: FreeLists::new(),
            pool: ChunkPool::new(),
            live_blocks: 0,
            live_bytes: 0,
            refills: 0,
        }
    }

    fn note_handed_out(&mut self, class: SizeClass) {
        self.live_blocks += 1;
        self.live_bytes += class.block_size();
    }

    fn note_returned(&mut self, class: SizeClass) {
        self.live_blocks -= 1;
        self.live_bytes -= class.block_size();
    }
}

/// Size-class allocator for small blocks, backed by a [`PrimaryAllocator`].
///
/// # Examples
///
/// ```
/// use pool_alloc::FreeListAllocator;
///
/// let allocator = FreeListAllocator::system();
/// let block = allocator.allocate(10).unwrap();
/// assert_eq!(allocator.usable_size(10), 16);
///
/// unsafe { allocator.deallocate(block, 10).unwrap() };
///
/// // LIFO reuse: the next request of the same class gets the same block
/// let again = allocator.allocate(12).unwrap();
/// assert_eq!(allocator.stats().live_blocks, 1);
/// unsafe { allocator.deallocate(again, 12).unwrap() };
/// ```
///
/// The allocator can also serve as the global allocator:
///
/// ```ignore
/// use pool_alloc::FreeListAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: FreeListAllocator<std::alloc::System> = FreeListAllocator::system();
/// ```
pub struct FreeListAllocator<B>
where
    B: GlobalAlloc,
{
    primary: PrimaryAllocator<B>,
    state: spin::Mutex<PoolState>,
    refill_batch: usize,
}

#[cfg(feature = "std")]
impl FreeListAllocator<std::alloc::System> {
    /// Creates an allocator over the system allocator with the default
    /// configuration.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(std::alloc::System)
    }
}

impl<B> FreeListAllocator<B>
where
    B: GlobalAlloc,
{
    /// Creates an empty pool over `backend` with the default configuration.
    ///
    /// No memory is requested until the first pooled allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use pool_alloc::{CountingBackend, FreeListAllocator};
    ///
    /// let allocator = FreeListAllocator::new(CountingBackend::system());
    /// assert_eq!(allocator.stats().heap_size, 0);
    /// assert_eq!(allocator.primary().backend().counts().alloc_calls, 0);
    ///
    /// let block = allocator.allocate(8).unwrap();
    /// assert_eq!(allocator.stats().refills, 1);
    /// unsafe { allocator.deallocate(block, 8).unwrap() };
    /// ```
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self::with_config(backend, AllocatorConfig::new())
    }

    /// Creates an empty pool over `backend` using `config`.
    #[must_use]
    pub const fn with_config(backend: B, config: AllocatorConfig) -> Self {
        Self {
            primary: PrimaryAllocator::with_config(backend, config),
            state: spin::Mutex::new(PoolState::new()),
            refill_batch: config.effective_refill_batch(),
        }
    }

    /// Returns the primary allocator behind the pool.
    pub fn primary(&self) -> &PrimaryAllocator<B> {
        &self.primary
    }

    /// Installs `handler` on the primary allocator and returns the one it
    /// replaces.
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.primary.set_oom_handler(handler)
    }

    /// Returns a facade allocating whole elements of `T`.
    pub fn typed<T>(&self) -> TypedAllocator<'_, T, B> {
        TypedAllocator::new(self)
    }

    /// Allocates room for `count` values of `T`.
    ///
    /// Shortcut for [`typed::<T>().allocate(count)`](TypedAllocator::allocate).
    pub fn allocate_n<T>(&self, count: usize) -> Result<TypedBlock<T>, AllocError> {
        self.typed::<T>().allocate(count)
    }

    /// Releases a block obtained from [`allocate_n`](Self::allocate_n).
    ///
    /// # Safety
    ///
    /// See [`TypedAllocator::deallocate`].
    pub unsafe fn deallocate_n<T>(&self, block: TypedBlock<T>, count: usize) -> Result<(), AllocError> {
        unsafe { self.typed::<T>().deallocate(block, count) }
    }

    /// Number of bytes actually reserved for a request of `bytes` bytes.
    ///
    /// Pooled requests are rounded up to their class size; larger ones are
    /// served exactly.
    #[must_use]
    pub fn usable_size(&self, bytes: usize) -> usize {
        SizeClass::for_request(bytes).map_or(bytes, SizeClass::block_size)
    }

    /// Returns a snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            heap_size: state.pool.heap_size(),
            pool_remaining: state.pool.remaining(),
            chunk_count: state.pool.chunk_count(),
            free_blocks: state.lists.lengths(),
            free_bytes: state.lists.free_bytes(),
            live_blocks: state.live_blocks,
            live_bytes: state.live_bytes,
            refills: state.refills,
            growths: state.pool.growths(),
            scavenges: state.pool.scavenges(),
            donated_bytes: state.pool.donated_bytes(),
        }
    }

    /// Allocates a block of at least `bytes` bytes aligned to [`ALIGN`].
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidSize`] if `bytes` is zero
    /// - [`AllocError::TooLarge`] if `bytes` exceeds the maximum layout size
    /// - [`AllocError::OutOfMemory`] if neither the pool nor the primary
    ///   allocator could supply memory
    pub fn allocate(&self, bytes: usize) -> Result<RawBlock, AllocError> {
        let ptr = self.allocate_layout(byte_layout(bytes)?)?;
        Ok(RawBlock::new(ptr, bytes))
    }

    /// Returns `block` to its free list, or to the primary allocator if it
    /// is larger than [`MAX_BYTES`](crate::MAX_BYTES).
    ///
    /// Fails with [`AllocError::SizeMismatch`] without releasing anything if
    /// `bytes` differs from the size `block` was allocated with.
    ///
    /// # Safety
    ///
    /// `block` must have been allocated by this allocator.
    pub unsafe fn deallocate(&self, block: RawBlock, bytes: usize) -> Result<(), AllocError> {
        block.check_size(bytes)?;
        let layout = byte_layout(bytes)?;
        unsafe {
            self.deallocate_layout(block.as_non_null(), layout);
        }
        Ok(())
    }

    /// Resizes `block` from `old_bytes` to `new_bytes`.
    ///
    /// - both sizes above [`MAX_BYTES`](crate::MAX_BYTES): resized by the primary allocator
    /// - both sizes in the same class: the block is kept in place
    /// - otherwise: a new block is allocated, the common prefix copied and
    ///   the old block released
    ///
    /// On failure `block` is left untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// `block` must have been allocated by this allocator.
    pub unsafe fn reallocate(
        &self,
        block: &mut RawBlock,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<(), AllocError> {
        block.check_size(old_bytes)?;
        let old_layout = byte_layout(old_bytes)?;
        let new_layout = byte_layout(new_bytes)?;

        match (Self::pooled_class(old_layout), Self::pooled_class(new_layout)) {
            (None, None) => unsafe { self.primary.reallocate(block, old_bytes, new_bytes) },
            (Some(old_class), Some(new_class)) if old_class == new_class => {
                block.set(block.as_non_null(), new_bytes);
                Ok(())
            }
            _ => {
                let ptr = self.allocate_layout(new_layout)?;
                unsafe {
                    let len = old_bytes.min(new_bytes);
                    ptr::copy_nonoverlapping(block.as_ptr(), ptr.as_ptr(), len);
                    self.deallocate_layout(block.as_non_null(), old_layout);
                }
                block.set(ptr, new_bytes);
                Ok(())
            }
        }
    }

    fn pooled_class(layout: Layout) -> Option<SizeClass> {
        if layout.align() > ALIGN {
            return None;
        }
        SizeClass::for_request(layout.size())
    }

    pub(crate) fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let Some(class) = Self::pooled_class(layout) else {
            return self.primary.allocate_layout(layout);
        };

        {
            let mut state = self.state.lock();
            if let Some(block) = state.lists[class].pop() {
                state.note_handed_out(class);
                return Ok(block);
            }
        }
        self.refill(class)
    }

    /// # Safety
    ///
    /// `ptr` must have been allocated by this allocator with `layout`.
    pub(crate) unsafe fn deallocate_layout(&self, ptr: NonNull<u8>, layout: Layout) {
        let Some(class) = Self::pooled_class(layout) else {
            unsafe {
                self.primary.deallocate_layout(ptr, layout);
            }
            return;
        };

        let mut state = self.state.lock();
        unsafe {
            state.lists[class].push(ptr);
        }
        state.note_returned(class);
    }

    /// Carves a batch of blocks of `class` from the pool and returns the
    /// first of them, threading the rest onto the class's free list.
    fn refill(&self, class: SizeClass) -> Result<NonNull<u8>, AllocError> {
        let block_size = class.block_size();
        let mut state = self.state.lock();
        let growths = state.pool.growths();
        let scavenges = state.pool.scavenges();
        let mut surplus_bytes = 0;

        let chunk = loop {
            let PoolState { lists, pool, .. } = &mut *state;
            match pool.chunk_alloc(lists, &self.primary, block_size, self.refill_batch) {
                Ok(chunk) => break chunk,
                Err(Starved { bytes_to_get }) => {
                    drop(state);
                    let layout = ChunkPool::region_layout(bytes_to_get)?;
                    let region = self.primary.allocate_layout(layout)?;

                    state = self.state.lock();
                    let PoolState { lists, pool, .. } = &mut *state;
                    let adopted = unsafe {
                        pool.adopt(lists, &self.primary, region, bytes_to_get, block_size)
                    };
                    if !adopted {
                        surplus_bytes += bytes_to_get;
                    }
                }
            }
        };

        if chunk.count > 1 {
            unsafe {
                let rest = chunk.first.add(block_size);
                state.lists[class].push_run(rest, block_size, chunk.count - 1);
            }
        }
        state.refills += 1;
        state.note_handed_out(class);

        let grew = state.pool.growths() != growths;
        let scavenged = state.pool.scavenges() != scavenges;
        let heap_size = state.pool.heap_size();
        drop(state);

        if surplus_bytes > 0 {
            log::trace!("pool refilled concurrently, returned {surplus_bytes} bytes");
        }
        if grew {
            log::debug!("pool grew to {heap_size} bytes");
        }
        if scavenged {
            log::warn!("pool starved, scavenged a free block for {block_size}-byte blocks");
        }
        log::trace!("refilled {block_size}-byte class with {} blocks", chunk.count);
        Ok(chunk.first)
    }
}

impl<B> Drop for FreeListAllocator<B>
where
    B: GlobalAlloc,
{
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.live_blocks > 0 {
            log::warn!(
                "dropping allocator with {} pooled blocks ({} bytes) still live",
                state.live_blocks,
                state.live_bytes
            );
        }
        state.lists = FreeLists::new();
        unsafe {
            state.pool.release(&self.primary);
        }
    }
}

unsafe impl<B> GlobalAlloc for FreeListAllocator<B>
where
    B: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_layout(layout)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { self.deallocate_layout(ptr, layout) }
        }
    }
}
