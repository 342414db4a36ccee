//! The primary (first-tier) allocator.
//!
//! [`PrimaryAllocator`] forwards requests to a raw [`GlobalAlloc`] backend
//! (the system allocator by default). When the backend fails it runs the
//! installed OOM handler and tries again, up to
//! [`AllocatorConfig::max_oom_retries`] rounds. Without a handler the first
//! failure is final.
//!
//! The primary allocator keeps no record of what it handed out: every
//! release must name the size the memory was requested with. The
//! [`RawBlock`] handle carries that size so a mismatch is reported as
//! [`AllocError::SizeMismatch`] instead of corrupting the backend.

use core::{
    alloc::{GlobalAlloc, Layout},
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use snafu::{OptionExt as _, ensure};

use crate::{
    block::RawBlock,
    config::{AllocatorConfig, OomHandler},
    error::{AllocError, InvalidSizeSnafu, OutOfMemorySnafu, TooLargeSnafu},
    size_class::ALIGN,
    stats::PrimaryStats,
};

/// Layout used for every byte-count request of `bytes` bytes.
pub(crate) fn byte_layout(bytes: usize) -> Result<Layout, AllocError> {
    ensure!(bytes > 0, InvalidSizeSnafu);
    Layout::from_size_align(bytes, ALIGN)
        .ok()
        .context(TooLargeSnafu { bytes })
}

/// Allocator backed directly by a raw [`GlobalAlloc`] with OOM-handler
/// retries.
///
/// # Examples
///
/// ```
/// use pool_alloc::PrimaryAllocator;
///
/// let primary = PrimaryAllocator::system();
/// let block = primary.allocate(4096).unwrap();
/// assert_eq!(block.size(), 4096);
/// unsafe { primary.deallocate(block, 4096).unwrap() };
/// ```
pub struct PrimaryAllocator<B> {
    backend: B,
    oom_handler: spin::Mutex<Option<OomHandler>>,
    max_oom_retries: usize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    reallocations: AtomicUsize,
    failed_attempts: AtomicUsize,
    oom_handler_calls: AtomicUsize,
    bytes_outstanding: AtomicUsize,
}

#[cfg(feature = "std")]
impl PrimaryAllocator<std::alloc::System> {
    /// Creates a primary allocator over the system allocator with the default
    /// configuration.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(std::alloc::System)
    }
}

impl<B> PrimaryAllocator<B> {
    /// Creates an allocator over `backend` with the default configuration.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self::with_config(backend, AllocatorConfig::new())
    }

    /// Creates an allocator over `backend` using the OOM settings of `config`.
    #[must_use]
    pub const fn with_config(backend: B, config: AllocatorConfig) -> Self {
        Self {
            backend,
            oom_handler: spin::Mutex::new(config.oom_handler),
            max_oom_retries: config.max_oom_retries,
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            reallocations: AtomicUsize::new(0),
            failed_attempts: AtomicUsize::new(0),
            oom_handler_calls: AtomicUsize::new(0),
            bytes_outstanding: AtomicUsize::new(0),
        }
    }

    /// Returns the raw backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Installs `handler` and returns the one it replaces.
    ///
    /// The swap is atomic with respect to other callers, so a handler can be
    /// chained by calling the returned one from the new one, or restored
    /// later.
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        mem::replace(&mut *self.oom_handler.lock(), handler)
    }

    /// Returns the currently installed OOM handler.
    pub fn oom_handler(&self) -> Option<OomHandler> {
        *self.oom_handler.lock()
    }

    /// Returns a snapshot of the allocation counters.
    #[must_use]
    pub fn stats(&self) -> PrimaryStats {
        PrimaryStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            oom_handler_calls: self.oom_handler_calls.load(Ordering::Relaxed),
            bytes_outstanding: self.bytes_outstanding.load(Ordering::Relaxed),
        }
    }

    fn note_allocated(&self, bytes: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_outstanding.fetch_add(bytes, Ordering::Relaxed);
    }

    fn note_released(&self, bytes: usize) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_outstanding.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Runs `attempt` until it yields memory, invoking the OOM handler
    /// between attempts.
    ///
    /// The handler is copied out of its lock before it runs, so it may
    /// replace itself or allocate.
    fn retry_with_handler<F>(&self, bytes: usize, mut attempt: F) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut() -> *mut u8,
    {
        let mut rounds = 0;
        loop {
            if let Some(ptr) = NonNull::new(attempt()) {
                return Ok(ptr);
            }
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);

            let handler = match self.oom_handler() {
                Some(handler) if rounds < self.max_oom_retries => handler,
                _ => {
                    log::error!("out of memory: {bytes} bytes unavailable after {rounds} OOM handler rounds");
                    return OutOfMemorySnafu { bytes }.fail();
                }
            };
            rounds += 1;
            log::warn!("allocation of {bytes} bytes failed, running OOM handler (round {rounds})");
            self.oom_handler_calls.fetch_add(1, Ordering::Relaxed);
            handler();
        }
    }
}

impl<B> PrimaryAllocator<B>
where
    B: GlobalAlloc,
{
    /// Allocates `bytes` bytes aligned to [`ALIGN`].
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidSize`] if `bytes` is zero
    /// - [`AllocError::TooLarge`] if `bytes` exceeds the maximum layout size
    /// - [`AllocError::OutOfMemory`] if the backend failed and the OOM handler
    ///   (if any) could not make room
    pub fn allocate(&self, bytes: usize) -> Result<RawBlock, AllocError> {
        let layout = byte_layout(bytes)?;
        let ptr = self.allocate_layout(layout)?;
        Ok(RawBlock::new(ptr, bytes))
    }

    /// Returns `block` to the backend.
    ///
    /// Fails with [`AllocError::SizeMismatch`] without releasing anything if
    /// `bytes` differs from the size `block` was allocated with.
    ///
    /// # Safety
    ///
    /// `block` must have been allocated by this allocator (or by the
    /// oversized path of a [`FreeListAllocator`](crate::FreeListAllocator)
    /// built on it).
    pub unsafe fn deallocate(&self, block: RawBlock, bytes: usize) -> Result<(), AllocError> {
        block.check_size(bytes)?;
        let layout = byte_layout(bytes)?;
        unsafe {
            self.deallocate_layout(block.as_non_null(), layout);
        }
        Ok(())
    }

    /// Resizes `block` to `new_bytes`, moving it if the backend has to.
    ///
    /// On failure `block` is left untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate).
    pub unsafe fn reallocate(
        &self,
        block: &mut RawBlock,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<(), AllocError> {
        block.check_size(old_bytes)?;
        let old_layout = byte_layout(old_bytes)?;
        let new_layout = byte_layout(new_bytes)?;

        let old_ptr = block.as_ptr();
        let ptr = self.retry_with_handler(new_bytes, || unsafe {
            self.backend.realloc(old_ptr, old_layout, new_layout.size())
        })?;

        self.reallocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_outstanding.fetch_sub(old_bytes, Ordering::Relaxed);
        self.bytes_outstanding.fetch_add(new_bytes, Ordering::Relaxed);
        block.set(ptr, new_bytes);
        Ok(())
    }

    /// Makes a single backend attempt without involving the OOM handler.
    pub(crate) fn try_allocate_layout(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(unsafe { self.backend.alloc(layout) });
        if ptr.is_some() {
            self.note_allocated(layout.size());
        } else {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    /// Allocates `layout`, retrying through the OOM handler.
    pub(crate) fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.retry_with_handler(layout.size(), || unsafe { self.backend.alloc(layout) })?;
        self.note_allocated(layout.size());
        Ok(ptr)
    }

    /// # Safety
    ///
    /// `ptr` must have been allocated through this allocator with `layout`.
    pub(crate) unsafe fn deallocate_layout(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe {
            self.backend.dealloc(ptr.as_ptr(), layout);
        }
        self.note_released(layout.size());
    }
}
