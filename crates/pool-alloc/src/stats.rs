//! Point-in-time counters for both allocator tiers.

use crate::size_class::{NUM_CLASSES, SizeClass};

/// Snapshot of the pooled tier, taken under the pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Usable pool bytes ever obtained from the primary allocator.
    pub heap_size: usize,
    /// Bytes still uncarved in the current pool region.
    pub pool_remaining: usize,
    /// Regions currently owned by the pool.
    pub chunk_count: usize,
    /// Free blocks held by each size class.
    pub free_blocks: [usize; NUM_CLASSES],
    /// Bytes held across every free list.
    pub free_bytes: usize,
    /// Pooled blocks currently owned by callers.
    pub live_blocks: usize,
    /// Bytes of the pooled blocks currently owned by callers, counted at
    /// their class size.
    pub live_bytes: usize,
    /// Times an empty free list was refilled with a batch from the pool.
    pub refills: usize,
    /// Times the pool obtained a new region.
    pub growths: usize,
    /// Times a larger free block was repurposed as pool source.
    pub scavenges: usize,
    /// Pool leftovers handed to a free list before growing.
    pub donated_bytes: usize,
}

impl PoolStats {
    /// Free blocks held by `class`.
    #[must_use]
    pub fn free_blocks_of(&self, class: SizeClass) -> usize {
        self.free_blocks[class.index()]
    }

    /// Bytes the pool can account for: free lists, uncarved pool and live
    /// blocks.
    #[must_use]
    pub fn accounted_bytes(&self) -> usize {
        self.free_bytes + self.pool_remaining + self.live_bytes
    }

    /// Returns `true` if every byte obtained for the pool is accounted for.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.accounted_bytes() == self.heap_size
    }
}

/// Snapshot of the primary allocator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimaryStats {
    /// Successful allocations, including pool regions.
    pub allocations: usize,
    /// Releases back to the backend.
    pub deallocations: usize,
    /// Successful reallocations.
    pub reallocations: usize,
    /// Backend calls that returned no memory.
    pub failed_attempts: usize,
    /// Times the OOM handler ran.
    pub oom_handler_calls: usize,
    /// Bytes currently held from the backend.
    pub bytes_outstanding: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservation() {
        let mut stats = PoolStats {
            heap_size: 320,
            pool_remaining: 160,
            free_bytes: 152,
            live_blocks: 1,
            live_bytes: 8,
            ..PoolStats::default()
        };
        assert_eq!(stats.accounted_bytes(), 320);
        assert!(stats.is_conserved());

        stats.live_bytes = 0;
        assert!(!stats.is_conserved());
    }
}
