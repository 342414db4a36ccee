//! Owned handles to allocated memory.

use core::ptr::NonNull;

use snafu::ensure;

use crate::error::{AllocError, SizeMismatchSnafu};

/// An allocated byte range together with the size it was requested with.
///
/// Carrying the size lets the allocator check the size passed to
/// `deallocate` against the size passed to `allocate` instead of trusting
/// the caller. A `RawBlock` is neither `Clone` nor `Copy`; handing it back to
/// the allocator consumes it.
#[derive(derive_more::Debug)]
#[debug("RawBlock({ptr:p}, {size})")]
pub struct RawBlock {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for RawBlock {}

impl RawBlock {
    pub(crate) const fn new(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// Reassembles a block from its raw parts.
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must come from [`into_raw_parts`](Self::into_raw_parts)
    /// of a block that has not been released since.
    #[must_use]
    pub const unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// Splits the block into its pointer and requested size.
    #[must_use]
    pub const fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.size)
    }

    /// Returns the start of the block.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the start of the block as a `NonNull`.
    #[must_use]
    pub const fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Number of bytes requested when the block was allocated.
    ///
    /// The usable size may be larger; see
    /// [`FreeListAllocator::usable_size`](crate::FreeListAllocator::usable_size).
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn check_size(&self, bytes: usize) -> Result<(), AllocError> {
        ensure!(
            self.size == bytes,
            SizeMismatchSnafu {
                expected: self.size,
                actual: bytes,
            }
        );
        Ok(())
    }

    pub(crate) fn set(&mut self, ptr: NonNull<u8>, size: usize) {
        self.ptr = ptr;
        self.size = size;
    }
}

#[cfg(test)]
mod tests {
    use std::format;

    use super::*;

    #[test]
    fn test_check_size() {
        let mut byte = 0_u8;
        let block = RawBlock::new(NonNull::from(&mut byte), 1);
        block.check_size(1).unwrap();

        let err = block.check_size(8).unwrap_err();
        assert!(err.is_size_mismatch());
    }

    #[test]
    fn test_raw_parts() {
        let mut byte = 0_u8;
        let ptr = NonNull::from(&mut byte);
        let (raw_ptr, size) = RawBlock::new(ptr, 1).into_raw_parts();
        assert_eq!(raw_ptr, ptr);
        assert_eq!(size, 1);

        let block = unsafe { RawBlock::from_raw_parts(raw_ptr, size) };
        assert_eq!(block.as_ptr(), ptr.as_ptr());
        assert!(format!("{block:?}").starts_with("RawBlock(0x"));
    }
}
