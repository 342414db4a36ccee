//! Element-count allocation on top of the pooled allocator.
//!
//! [`TypedAllocator`] converts a count of `T` into a byte size and forwards
//! to its [`FreeListAllocator`]. It stores nothing but a reference, so any
//! number of facades can share one allocator.

use core::{
    alloc::{GlobalAlloc, Layout},
    marker::PhantomData,
    ptr::{self, NonNull},
};

use snafu::{OptionExt as _, ensure};

use crate::{
    error::{AllocError, SizeMismatchSnafu, SizeOverflowSnafu},
    free_list_allocator::FreeListAllocator,
};

/// Storage for `count` values of `T` obtained from a [`TypedAllocator`].
///
/// The storage is uninitialized. A block of zero elements holds no memory
/// and its pointer is null; a block of zero-sized elements holds a dangling
/// pointer.
#[derive(derive_more::Debug)]
pub struct TypedBlock<T> {
    ptr: Option<NonNull<T>>,
    count: usize,
}

unsafe impl<T> Send for TypedBlock<T> where T: Send {}

impl<T> TypedBlock<T> {
    /// A block of zero elements.
    #[must_use]
    pub const fn empty() -> Self {
        Self { ptr: None, count: 0 }
    }

    /// Returns `true` if the block has room for no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of elements the block has room for.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns the start of the block, or null if the block is empty.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Returns the start of the block, or `None` if the block is empty.
    #[must_use]
    pub const fn as_non_null(&self) -> Option<NonNull<T>> {
        self.ptr
    }
}

/// Facade allocating whole elements of `T`.
///
/// # Examples
///
/// ```
/// use pool_alloc::FreeListAllocator;
///
/// let allocator = FreeListAllocator::system();
/// let points = allocator.typed::<[f64; 2]>();
///
/// let block = points.allocate(4).unwrap();
/// assert_eq!(block.len(), 4);
/// unsafe {
///     block.as_ptr().write([1.0, 2.0]);
///     points.deallocate(block, 4).unwrap();
/// }
/// // 4 * 16 bytes fit one pooled block
/// assert_eq!(allocator.stats().live_blocks, 0);
/// assert_eq!(allocator.stats().refills, 1);
/// ```
pub struct TypedAllocator<'a, T, B>
where
    B: GlobalAlloc,
{
    inner: &'a FreeListAllocator<B>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, B> Clone for TypedAllocator<'_, T, B>
where
    B: GlobalAlloc,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, B> Copy for TypedAllocator<'_, T, B> where B: GlobalAlloc {}

impl<'a, T, B> TypedAllocator<'a, T, B>
where
    B: GlobalAlloc,
{
    /// Creates a facade over `inner`.
    ///
    /// Usually obtained through [`FreeListAllocator::typed`].
    #[must_use]
    pub const fn new(inner: &'a FreeListAllocator<B>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns the allocator behind the facade.
    #[must_use]
    pub const fn inner(&self) -> &'a FreeListAllocator<B> {
        self.inner
    }

    /// Allocates uninitialized room for `count` values of `T`.
    ///
    /// `count == 0` returns an [empty](TypedBlock::empty) block without
    /// touching the allocator.
    ///
    /// # Errors
    ///
    /// - [`AllocError::SizeOverflow`] if `count * size_of::<T>()` overflows
    /// - [`AllocError::OutOfMemory`] if the allocator could not supply memory
    pub fn allocate(&self, count: usize) -> Result<TypedBlock<T>, AllocError> {
        let layout = Self::array_layout(count)?;
        if count == 0 {
            return Ok(TypedBlock::empty());
        }
        if layout.size() == 0 {
            return Ok(TypedBlock {
                ptr: Some(NonNull::dangling()),
                count,
            });
        }
        let ptr = self.inner.allocate_layout(layout)?;
        Ok(TypedBlock {
            ptr: Some(ptr.cast()),
            count,
        })
    }

    /// Allocates uninitialized room for one `T`.
    pub fn allocate_one(&self) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        Ok(self.inner.allocate_layout(layout)?.cast())
    }

    /// Releases `block`, which must hold `count` elements.
    ///
    /// Fails with [`AllocError::SizeMismatch`] without releasing anything if
    /// `count` differs from the count `block` was allocated with.
    ///
    /// # Safety
    ///
    /// `block` must have been allocated through a facade over the same
    /// allocator. Values stored in it are not dropped.
    pub unsafe fn deallocate(&self, block: TypedBlock<T>, count: usize) -> Result<(), AllocError> {
        ensure!(
            block.count == count,
            SizeMismatchSnafu {
                expected: block.count.saturating_mul(size_of::<T>()),
                actual: count.saturating_mul(size_of::<T>()),
            }
        );
        let Some(ptr) = block.ptr else {
            return Ok(());
        };
        let layout = Self::array_layout(count)?;
        if layout.size() != 0 {
            unsafe {
                self.inner.deallocate_layout(ptr.cast(), layout);
            }
        }
        Ok(())
    }

    /// Releases a single `T` obtained from [`allocate_one`](Self::allocate_one).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate_one` of a facade over the
    /// same allocator and not released since.
    pub unsafe fn deallocate_one(&self, ptr: NonNull<T>) {
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            unsafe {
                self.inner.deallocate_layout(ptr.cast(), layout);
            }
        }
    }

    fn array_layout(count: usize) -> Result<Layout, AllocError> {
        Layout::array::<T>(count).ok().context(SizeOverflowSnafu {
            count,
            elem_size: size_of::<T>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SizeClass, backend::CountingBackend, config::AllocatorConfig};

    type TestAllocator = FreeListAllocator<CountingBackend<std::alloc::System>>;

    fn with_test_allocator<F>(f: F)
    where
        F: FnOnce(&TestAllocator),
    {
        let allocator =
            FreeListAllocator::with_config(CountingBackend::system(), AllocatorConfig::new());
        f(&allocator);
        assert!(allocator.stats().is_conserved());
    }

    #[repr(C)]
    struct Pair {
        key: u64,
        value: u32,
    }

    #[test]
    fn test_allocate_elements() {
        with_test_allocator(|allocator| {
            let pairs = allocator.typed::<Pair>();
            let block = pairs.allocate(5).unwrap();
            assert_eq!(block.len(), 5);
            assert!(block.as_ptr().is_aligned());

            // 5 * 16 = 80 bytes
            let stats = allocator.stats();
            assert_eq!(stats.live_bytes, 80);
            assert_eq!(stats.free_blocks_of(SizeClass::for_request(80).unwrap()), 19);

            unsafe {
                block.as_ptr().add(4).write(Pair { key: 7, value: 9 });
                let pair = block.as_ptr().add(4).read();
                assert_eq!((pair.key, pair.value), (7, 9));
                pairs.deallocate(block, 5).unwrap();
            }
            assert_eq!(allocator.stats().live_blocks, 0);
        });
    }

    #[test]
    fn test_zero_count() {
        with_test_allocator(|allocator| {
            let words = allocator.typed::<u64>();
            let block = words.allocate(0).unwrap();
            assert!(block.is_empty());
            assert!(block.as_ptr().is_null());
            unsafe { words.deallocate(block, 0).unwrap() };
            assert_eq!(allocator.primary().backend().counts().alloc_calls, 0);
        });
    }

    #[test]
    fn test_zero_sized_elements() {
        with_test_allocator(|allocator| {
            let units = allocator.typed::<()>();
            let block = units.allocate(1000).unwrap();
            assert!(!block.as_ptr().is_null());
            unsafe { units.deallocate(block, 1000).unwrap() };

            let one = units.allocate_one().unwrap();
            unsafe { units.deallocate_one(one) };
            assert_eq!(allocator.primary().backend().counts().alloc_calls, 0);
        });
    }

    #[test]
    fn test_count_overflow() {
        with_test_allocator(|allocator| {
            let err = allocator.typed::<u32>().allocate(usize::MAX / 2).unwrap_err();
            assert!(err.is_size_overflow());
        });
    }

    #[test]
    fn test_count_mismatch() {
        with_test_allocator(|allocator| {
            let words = allocator.typed::<u32>();
            let block = words.allocate(3).unwrap();
            let ptr = block.as_non_null();

            let err = unsafe { words.deallocate(block, 4) }.unwrap_err();
            assert!(err.is_size_mismatch());
            assert_eq!(allocator.stats().live_blocks, 1);

            let block = TypedBlock { ptr, count: 3 };
            unsafe { words.deallocate(block, 3).unwrap() };
        });
    }

    #[test]
    fn test_single_values() {
        with_test_allocator(|allocator| {
            let words = allocator.typed::<u64>();
            let a = words.allocate_one().unwrap();
            let b = words.allocate_one().unwrap();
            assert_ne!(a, b);
            unsafe {
                a.write(1);
                b.write(2);
                assert_eq!(a.read() + b.read(), 3);
                words.deallocate_one(b);
                words.deallocate_one(a);
            }
            assert_eq!(allocator.stats().live_blocks, 0);
        });
    }

    #[test]
    fn test_large_arrays_use_primary() {
        with_test_allocator(|allocator| {
            let words = allocator.typed::<u64>();
            let block = words.allocate(100).unwrap();
            assert_eq!(allocator.primary().backend().counts().last_alloc_size, 800);
            assert_eq!(allocator.stats().heap_size, 0);
            unsafe { words.deallocate(block, 100).unwrap() };
            assert_eq!(allocator.primary().stats().bytes_outstanding, 0);
        });
    }
}
