//! Size classes for the segregated free lists.
//!
//! Small requests are rounded up to a multiple of [`ALIGN`] and mapped to one
//! of [`NUM_CLASSES`] classes. Class `k` serves requests in
//! `(ALIGN * k, ALIGN * (k + 1)]` bytes, so the largest class holds
//! [`MAX_BYTES`]-byte blocks. Anything larger never enters a class and is
//! served by the primary allocator.

use core::iter::FusedIterator;

/// Granularity of block sizes, and the alignment of every pooled block.
pub const ALIGN: usize = 8;

/// Largest request served from the free lists.
pub const MAX_BYTES: usize = 128;

/// Number of segregated free lists.
pub const NUM_CLASSES: usize = MAX_BYTES / ALIGN;

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
///
/// # Panics
///
/// Panics in debug builds if the result would overflow `usize`.
#[must_use]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// One of the [`NUM_CLASSES`] block-size buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(usize);

impl SizeClass {
    /// The class holding [`MAX_BYTES`]-byte blocks.
    pub const LARGEST: Self = Self(NUM_CLASSES - 1);

    /// Returns the class serving a request of `bytes` bytes.
    ///
    /// Returns `None` for zero-byte requests and for requests larger than
    /// [`MAX_BYTES`].
    ///
    /// # Examples
    ///
    /// ```
    /// use pool_alloc::SizeClass;
    ///
    /// let class = SizeClass::for_request(13).unwrap();
    /// assert_eq!(class.index(), 1);
    /// assert_eq!(class.block_size(), 16);
    /// assert!(SizeClass::for_request(129).is_none());
    /// ```
    #[must_use]
    pub const fn for_request(bytes: usize) -> Option<Self> {
        if bytes == 0 || bytes > MAX_BYTES {
            return None;
        }
        Some(Self(bytes.div_ceil(ALIGN) - 1))
    }

    /// Returns the class with the given free list index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUM_CLASSES {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Index of this class's free list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Size in bytes of every block in this class.
    #[must_use]
    pub const fn block_size(self) -> usize {
        (self.0 + 1) * ALIGN
    }

    /// Iterates over every class.
    #[must_use]
    pub fn all() -> SizeClasses {
        SizeClasses {
            next: 0,
            end: NUM_CLASSES,
        }
    }

    /// Iterates over this class and every larger class, smallest first.
    #[must_use]
    pub fn and_larger(self) -> SizeClasses {
        SizeClasses {
            next: self.0,
            end: NUM_CLASSES,
        }
    }
}

/// Iterator over a contiguous run of size classes.
#[derive(Debug, Clone)]
pub struct SizeClasses {
    next: usize,
    end: usize,
}

impl Iterator for SizeClasses {
    type Item = SizeClass;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let class = SizeClass(self.next);
        self.next += 1;
        Some(class)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end.saturating_sub(self.next);
        (len, Some(len))
    }
}

impl ExactSizeIterator for SizeClasses {}
impl FusedIterator for SizeClasses {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(127), 128);
        assert_eq!(round_up(129), 136);
    }

    #[test]
    fn test_for_request() {
        assert_eq!(SizeClass::for_request(0), None);
        assert_eq!(SizeClass::for_request(1).map(SizeClass::index), Some(0));
        assert_eq!(SizeClass::for_request(8).map(SizeClass::index), Some(0));
        assert_eq!(SizeClass::for_request(9).map(SizeClass::index), Some(1));
        assert_eq!(SizeClass::for_request(96).map(SizeClass::index), Some(11));
        assert_eq!(SizeClass::for_request(128), Some(SizeClass::LARGEST));

        // Served by the primary allocator
        assert_eq!(SizeClass::for_request(129), None);
        assert_eq!(SizeClass::for_request(4096), None);
    }

    #[test]
    fn test_every_request_fits_its_class() {
        for bytes in 1..=MAX_BYTES {
            let class = SizeClass::for_request(bytes).unwrap();
            assert!(class.block_size() >= bytes);
            assert!(class.block_size() < bytes + ALIGN);
            assert!(class.block_size().is_multiple_of(ALIGN));
            assert_eq!(class.block_size(), round_up(bytes));
        }
    }

    #[test]
    fn test_index_roundtrip() {
        for class in SizeClass::all() {
            assert_eq!(SizeClass::from_index(class.index()), Some(class));
            assert_eq!(SizeClass::for_request(class.block_size()), Some(class));
        }
        assert_eq!(SizeClass::from_index(NUM_CLASSES), None);
    }

    #[test]
    fn test_and_larger() {
        let class = SizeClass::for_request(32).unwrap();
        let sizes = class.and_larger().map(SizeClass::block_size);
        assert!(sizes.clone().eq((32..=MAX_BYTES).step_by(ALIGN)));
        assert_eq!(sizes.len(), 13);
        assert_eq!(SizeClass::LARGEST.and_larger().count(), 1);
        assert_eq!(SizeClass::all().len(), NUM_CLASSES);
    }

    #[test]
    fn test_all() {
        let sizes = SizeClass::all().map(SizeClass::block_size);
        assert!(sizes.eq((ALIGN..=MAX_BYTES).step_by(ALIGN)));
        assert_eq!(SizeClass::all().next(), SizeClass::for_request(1));
    }
}
