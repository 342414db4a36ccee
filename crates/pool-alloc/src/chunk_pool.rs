//! The chunk pool behind the free lists.
//!
//! The pool owns one contiguous region `[start, end)` and carves batches of
//! same-size blocks ("chunks") off its front. When the region cannot supply
//! even one block it grows: the leftover is donated to the free list of its
//! size, and a new region of
//!
//! ```text
//! 2 * block_size * requested + round_up(heap_size >> 4)
//! ```
//!
//! bytes is requested from the primary allocator, so growth scales with both
//! the request and the pool's history. If the primary allocator cannot
//! provide that region, a spare block of the same or a larger class is taken
//! off its free list and used as the region instead.
//!
//! Every region obtained from the primary allocator starts with a
//! [`ChunkHeader`] linking it to the previous one, so the pool can hand all of
//! them back when it is released. Header bytes are not counted in
//! `heap_size`.
//!
//! # State machine
//!
//! ```text
//! Empty ──► Growing ──► Serving ──(exhausted)──► Growing ──► …
//! ```

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use snafu::OptionExt as _;

use crate::{
    error::{AllocError, TooLargeSnafu},
    free_list::FreeLists,
    primary::PrimaryAllocator,
    size_class::{ALIGN, SizeClass, round_up},
};

/// Bookkeeping written at the front of every region owned by the pool.
#[repr(C)]
struct ChunkHeader {
    next: *mut Self,
    layout_size: usize,
}

/// Bytes reserved in front of each region for its [`ChunkHeader`].
pub const CHUNK_HEADER_SIZE: usize = round_up(size_of::<ChunkHeader>());
const _: () = assert!(align_of::<ChunkHeader>() <= ALIGN);

/// A run of `count` consecutive blocks carved from the pool.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) first: NonNull<u8>,
    pub(crate) count: usize,
}

/// The pool could supply nothing and no free block could be scavenged.
///
/// The owner is expected to obtain `bytes_to_get` usable bytes from the
/// primary allocator (with OOM retries) and pass them to
/// [`ChunkPool::adopt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Starved {
    pub(crate) bytes_to_get: usize,
}

pub(crate) struct ChunkPool {
    start: NonNull<u8>,
    end: NonNull<u8>,
    heap_size: usize,
    chunks: *mut ChunkHeader,
    chunk_count: usize,
    growths: usize,
    scavenges: usize,
    donated_bytes: usize,
}

impl ChunkPool {
    pub(crate) const fn new() -> Self {
        Self {
            start: NonNull::dangling(),
            end: NonNull::dangling(),
            heap_size: 0,
            chunks: ptr::null_mut(),
            chunk_count: 0,
            growths: 0,
            scavenges: 0,
            donated_bytes: 0,
        }
    }

    /// Layout of a region holding `bytes` usable bytes behind its header.
    pub(crate) fn region_layout(bytes: usize) -> Result<Layout, AllocError> {
        let size = bytes
            .checked_add(CHUNK_HEADER_SIZE)
            .context(TooLargeSnafu { bytes })?;
        Layout::from_size_align(size, ALIGN)
            .ok()
            .context(TooLargeSnafu { bytes })
    }

    pub(crate) fn remaining(&self) -> usize {
        self.end.as_ptr().addr() - self.start.as_ptr().addr()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub(crate) fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub(crate) fn growths(&self) -> usize {
        self.growths
    }

    pub(crate) fn scavenges(&self) -> usize {
        self.scavenges
    }

    pub(crate) fn donated_bytes(&self) -> usize {
        self.donated_bytes
    }

    /// Carves up to `requested` blocks of `block_size` bytes.
    ///
    /// Returns fewer blocks (but at least one) when the pool is short, and
    /// grows or scavenges when it cannot supply a single block. `block_size`
    /// must be the block size of a size class.
    pub(crate) fn chunk_alloc<B>(
        &mut self,
        lists: &mut FreeLists,
        primary: &PrimaryAllocator<B>,
        block_size: usize,
        requested: usize,
    ) -> Result<Chunk, Starved>
    where
        B: GlobalAlloc,
    {
        debug_assert!(
            SizeClass::for_request(block_size).is_some_and(|class| class.block_size() == block_size)
        );
        debug_assert!(requested > 0);

        loop {
            let total_bytes = block_size.saturating_mul(requested);
            let bytes_left = self.remaining();

            if bytes_left >= total_bytes {
                return Ok(self.carve(block_size, requested));
            }
            if bytes_left >= block_size {
                return Ok(self.carve(block_size, bytes_left / block_size));
            }

            let bytes_to_get = total_bytes
                .saturating_mul(2)
                .saturating_add(round_up(self.heap_size >> 4));
            self.donate_leftover(lists);

            if let Some(region) = Self::region_layout(bytes_to_get)
                .ok()
                .and_then(|layout| primary.try_allocate_layout(layout))
            {
                unsafe {
                    self.install(region, bytes_to_get);
                }
                continue;
            }

            if self.scavenge(lists, block_size) {
                continue;
            }
            return Err(Starved { bytes_to_get });
        }
    }

    /// Installs a region obtained for a [`Starved`] request.
    ///
    /// If the pool has meanwhile been refilled far enough to supply a block
    /// of `block_size`, the region is not needed and goes straight back to
    /// the primary allocator. Returns `false` in that case.
    ///
    /// # Safety
    ///
    /// `region` must have been allocated from `primary` with
    /// [`region_layout(bytes)`](Self::region_layout).
    pub(crate) unsafe fn adopt<B>(
        &mut self,
        lists: &mut FreeLists,
        primary: &PrimaryAllocator<B>,
        region: NonNull<u8>,
        bytes: usize,
        block_size: usize,
    ) -> bool
    where
        B: GlobalAlloc,
    {
        if self.remaining() >= block_size {
            if let Ok(layout) = Self::region_layout(bytes) {
                unsafe {
                    primary.deallocate_layout(region, layout);
                }
            }
            return false;
        }
        self.donate_leftover(lists);
        unsafe {
            self.install(region, bytes);
        }
        true
    }

    /// Returns every region to `primary` and resets the pool to empty.
    ///
    /// # Safety
    ///
    /// No block carved from the pool may be used afterwards, and the free
    /// lists fed by this pool must be discarded.
    pub(crate) unsafe fn release<B>(&mut self, primary: &PrimaryAllocator<B>)
    where
        B: GlobalAlloc,
    {
        let mut chunk = self.chunks;
        while let Some(header) = NonNull::new(chunk) {
            unsafe {
                let ChunkHeader { next, layout_size } = header.read();
                let layout = Layout::from_size_align_unchecked(layout_size, ALIGN);
                primary.deallocate_layout(header.cast(), layout);
                chunk = next;
            }
        }
        self.chunks = ptr::null_mut();
        self.chunk_count = 0;
        self.start = NonNull::dangling();
        self.end = NonNull::dangling();
    }

    fn carve(&mut self, block_size: usize, count: usize) -> Chunk {
        let first = self.start;
        self.start = unsafe { first.add(block_size * count) };
        Chunk { first, count }
    }

    /// Hands the uncarved rest of the region to the free list of its size.
    fn donate_leftover(&mut self, lists: &mut FreeLists) {
        let bytes_left = self.remaining();
        if let Some(class) = SizeClass::for_request(bytes_left) {
            debug_assert_eq!(class.block_size(), bytes_left);
            unsafe {
                lists[class].push(self.start);
            }
            self.donated_bytes += bytes_left;
        }
        self.start = NonNull::dangling();
        self.end = NonNull::dangling();
    }

    /// Turns a spare block of `block_size` bytes or more into the pool
    /// region.
    ///
    /// The part of the block not consumed by the pending request stays in the
    /// pool and is later donated to a smaller class; it does not go back to
    /// the class it was taken from.
    fn scavenge(&mut self, lists: &mut FreeLists, block_size: usize) -> bool {
        let Some(class) = SizeClass::for_request(block_size) else {
            return false;
        };
        let Some(spare) = class.and_larger().find(|&class| !lists[class].is_empty()) else {
            return false;
        };
        let Some(block) = lists[spare].pop() else {
            return false;
        };
        self.start = block;
        self.end = unsafe { block.add(spare.block_size()) };
        self.scavenges += 1;
        true
    }

    /// # Safety
    ///
    /// `region` must be fresh memory of [`region_layout(bytes)`](Self::region_layout)
    /// owned by the pool from now on, and the current region must be empty.
    unsafe fn install(&mut self, region: NonNull<u8>, bytes: usize) {
        debug_assert_eq!(self.remaining(), 0);
        let header = region.cast::<ChunkHeader>();
        unsafe {
            header.write(ChunkHeader {
                next: self.chunks,
                layout_size: bytes + CHUNK_HEADER_SIZE,
            });
            self.start = region.add(CHUNK_HEADER_SIZE);
            self.end = self.start.add(bytes);
        }
        self.chunks = header.as_ptr();
        self.chunk_count += 1;
        self.heap_size += bytes;
        self.growths += 1;
    }
}
