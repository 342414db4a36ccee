//! Construction parameters.

use crate::size_class::MAX_BYTES;

/// Callback run when the backend cannot satisfy an allocation.
///
/// The handler is expected to release memory held elsewhere (caches and the
/// like) so that the allocation can be retried.
pub type OomHandler = fn();

/// Number of blocks requested from the pool when a free list runs dry.
pub const DEFAULT_REFILL_BATCH: usize = 20;

/// Largest batch a refill asks for.
///
/// Larger configured batches are clamped to this value so that the size of
/// a batch, doubled when the pool grows, always fits in a `usize`.
pub const MAX_REFILL_BATCH: usize = usize::MAX / (4 * MAX_BYTES);

/// Number of OOM handler rounds before an allocation gives up.
pub const DEFAULT_MAX_OOM_RETRIES: usize = 8;

/// Parameters for [`PrimaryAllocator`](crate::PrimaryAllocator) and
/// [`FreeListAllocator`](crate::FreeListAllocator).
///
/// # Examples
///
/// ```
/// use pool_alloc::AllocatorConfig;
///
/// fn drop_caches() {}
///
/// let config = AllocatorConfig::new()
///     .with_refill_batch(32)
///     .with_max_oom_retries(3)
///     .with_oom_handler(Some(drop_caches));
/// assert_eq!(config.refill_batch, 32);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Blocks carved per refill. Values below 1 are treated as 1, values above
    /// [`MAX_REFILL_BATCH`] as [`MAX_REFILL_BATCH`].
    pub refill_batch: usize,
    /// OOM handler rounds per allocation. `usize::MAX` retries for as long
    /// as the handler is installed.
    pub max_oom_retries: usize,
    /// Handler installed at construction time.
    pub oom_handler: Option<OomHandler>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorConfig {
    /// Creates a configuration holding the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            refill_batch: DEFAULT_REFILL_BATCH,
            max_oom_retries: DEFAULT_MAX_OOM_RETRIES,
            oom_handler: None,
        }
    }

    /// Sets the number of blocks carved per refill.
    #[must_use]
    pub const fn with_refill_batch(mut self, refill_batch: usize) -> Self {
        self.refill_batch = refill_batch;
        self
    }

    /// Sets the number of OOM handler rounds per allocation.
    #[must_use]
    pub const fn with_max_oom_retries(mut self, max_oom_retries: usize) -> Self {
        self.max_oom_retries = max_oom_retries;
        self
    }

    /// Sets the handler installed at construction time.
    #[must_use]
    pub const fn with_oom_handler(mut self, oom_handler: Option<OomHandler>) -> Self {
        self.oom_handler = oom_handler;
        self
    }

    pub(crate) const fn effective_refill_batch(&self) -> usize {
        if self.refill_batch == 0 {
            1
        } else if self.refill_batch > MAX_REFILL_BATCH {
            MAX_REFILL_BATCH
        } else {
            self.refill_batch
        }
    }
}
