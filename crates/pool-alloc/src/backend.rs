//! Instrumented backend for exercising out-of-memory paths.
//!
//! [`CountingBackend`] wraps any [`GlobalAlloc`] and counts the calls made
//! through it. It can also be told to fail allocations, which is how the
//! scavenging and OOM-handler paths of the allocator are driven without
//! actually exhausting memory.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Counters collected by a [`CountingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCounts {
    /// `alloc` calls, including the ones made to fail.
    pub alloc_calls: usize,
    /// `dealloc` calls.
    pub dealloc_calls: usize,
    /// `realloc` calls, including the ones made to fail.
    pub realloc_calls: usize,
    /// Calls that returned null because a failure was injected.
    pub injected_failures: usize,
    /// Size of the most recent `alloc` request.
    pub last_alloc_size: usize,
}

/// A [`GlobalAlloc`] wrapper that counts calls and injects failures.
#[derive(Debug, Default)]
pub struct CountingBackend<B> {
    inner: B,
    alloc_calls: AtomicUsize,
    dealloc_calls: AtomicUsize,
    realloc_calls: AtomicUsize,
    injected_failures: AtomicUsize,
    last_alloc_size: AtomicUsize,
    fail_next: AtomicUsize,
    fail_all: AtomicBool,
}

#[cfg(feature = "std")]
impl CountingBackend<std::alloc::System> {
    /// Wraps the system allocator.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(std::alloc::System)
    }
}

impl<B> CountingBackend<B> {
    /// Wraps `inner` with all counters at zero and no failures injected.
    #[must_use]
    pub const fn new(inner: B) -> Self {
        Self {
            inner,
            alloc_calls: AtomicUsize::new(0),
            dealloc_calls: AtomicUsize::new(0),
            realloc_calls: AtomicUsize::new(0),
            injected_failures: AtomicUsize::new(0),
            last_alloc_size: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            fail_all: AtomicBool::new(false),
        }
    }

    /// Makes the next `count` allocation attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::Relaxed);
    }

    /// Makes every allocation attempt fail until switched off again.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    /// Returns the counters recorded so far.
    #[must_use]
    pub fn counts(&self) -> BackendCounts {
        BackendCounts {
            alloc_calls: self.alloc_calls.load(Ordering::Relaxed),
            dealloc_calls: self.dealloc_calls.load(Ordering::Relaxed),
            realloc_calls: self.realloc_calls.load(Ordering::Relaxed),
            injected_failures: self.injected_failures.load(Ordering::Relaxed),
            last_alloc_size: self.last_alloc_size.load(Ordering::Relaxed),
        }
    }

    fn inject_failure(&self) -> bool {
        let fail = self.fail_all.load(Ordering::Relaxed)
            || self
                .fail_next
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
        }
        fail
    }
}

unsafe impl<B> GlobalAlloc for CountingBackend<B>
where
    B: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.alloc_calls.fetch_add(1, Ordering::Relaxed);
        self.last_alloc_size.store(layout.size(), Ordering::Relaxed);
        if self.inject_failure() {
            return ptr::null_mut();
        }
        unsafe { self.inner.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.dealloc_calls.fetch_add(1, Ordering::Relaxed);
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.realloc_calls.fetch_add(1, Ordering::Relaxed);
        if self.inject_failure() {
            return ptr::null_mut();
        }
        unsafe { self.inner.realloc(ptr, layout, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 8).unwrap()
    }

    #[test]
    fn test_counts_calls() {
        let backend = CountingBackend::system();
        unsafe {
            let ptr = backend.alloc(layout(64));
            assert!(!ptr.is_null());
            let ptr = backend.realloc(ptr, layout(64), 256);
            assert!(!ptr.is_null());
            backend.dealloc(ptr, layout(256));
        }

        let counts = backend.counts();
        assert_eq!(counts.alloc_calls, 1);
        assert_eq!(counts.realloc_calls, 1);
        assert_eq!(counts.dealloc_calls, 1);
        assert_eq!(counts.last_alloc_size, 64);
        assert_eq!(counts.injected_failures, 0);
    }

    #[test]
    fn test_fail_next() {
        let backend = CountingBackend::system();
        backend.fail_next(2);
        unsafe {
            assert!(backend.alloc(layout(16)).is_null());
            assert!(backend.alloc(layout(16)).is_null());
            let ptr = backend.alloc(layout(16));
            assert!(!ptr.is_null());
            backend.dealloc(ptr, layout(16));
        }
        assert_eq!(backend.counts().injected_failures, 2);
    }

    #[test]
    fn test_fail_all() {
        let backend = CountingBackend::system();
        backend.set_fail_all(true);
        unsafe {
            for _ in 0..5 {
                assert!(backend.alloc(layout(32)).is_null());
            }
        }
        backend.set_fail_all(false);
        unsafe {
            let ptr = backend.alloc(layout(32));
            assert!(!ptr.is_null());
            backend.dealloc(ptr, layout(32));
        }
        assert_eq!(backend.counts().injected_failures, 5);
        assert_eq!(backend.counts().alloc_calls, 6);
    }
}
