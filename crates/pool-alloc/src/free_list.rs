//! Intrusive free lists.
//!
//! A free block stores nothing but a pointer to the next free block of the
//! same size class, written over its first machine word. The list therefore
//! needs no memory of its own and push/pop are O(1).
//!
//! ```text
//! head ──► ┌──────┬─────────┐   ┌──────┬─────────┐
//!          │ next │ unused  │──►│ next │ unused  │──► null
//!          └──────┴─────────┘   └──────┴─────────┘
//! ```

use core::{
    ops::{Index, IndexMut},
    ptr::{self, NonNull},
};

use crate::size_class::{ALIGN, NUM_CLASSES, SizeClass};

/// Header written into a block while it sits on a free list.
#[repr(C)]
struct FreeNode {
    next: *mut Self,
}
const _: () = assert!(size_of::<FreeNode>() <= ALIGN);
const _: () = assert!(align_of::<FreeNode>() <= ALIGN);

/// A LIFO list of free blocks of one size class.
pub(crate) struct FreeList {
    head: *mut FreeNode,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Unlinks and returns the most recently pushed block.
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = NonNull::new(self.head)?;
        unsafe {
            self.head = (*node.as_ptr()).next;
        }
        self.len -= 1;
        Some(node.cast())
    }

    /// Pushes a block onto the list.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `block` is aligned to [`ALIGN`] and valid for writes of at least
    ///   [`ALIGN`] bytes
    /// - `block` is not live and not already on any free list
    /// - the block's size matches the class this list belongs to
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        let node = block.cast::<FreeNode>();
        debug_assert!(node.is_aligned(), "free block must be aligned");
        unsafe {
            node.write(FreeNode { next: self.head });
        }
        self.head = node.as_ptr();
        self.len += 1;
    }

    /// Threads `count` consecutive blocks starting at `first` onto the list.
    ///
    /// Afterwards the list yields the blocks in ascending address order,
    /// followed by whatever the list held before.
    ///
    /// # Safety
    ///
    /// `first..first + block_size * count` must be a free region satisfying
    /// the requirements of [`push`](Self::push) for every block in it.
    pub(crate) unsafe fn push_run(&mut self, first: NonNull<u8>, block_size: usize, count: usize) {
        for i in (0..count).rev() {
            unsafe {
                self.push(first.add(i * block_size));
            }
        }
    }
}

/// One free list per size class.
pub(crate) struct FreeLists([FreeList; NUM_CLASSES]);

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self([const { FreeList::new() }; NUM_CLASSES])
    }

    /// Number of free blocks held by each class.
    pub(crate) fn lengths(&self) -> [usize; NUM_CLASSES] {
        let mut lengths = [0; NUM_CLASSES];
        for (len, list) in lengths.iter_mut().zip(&self.0) {
            *len = list.len();
        }
        lengths
    }

    /// Total bytes held across every list.
    pub(crate) fn free_bytes(&self) -> usize {
        SizeClass::all()
            .map(|class| self[class].len() * class.block_size())
            .sum()
    }
}

impl Index<SizeClass> for FreeLists {
    type Output = FreeList;

    fn index(&self, class: SizeClass) -> &Self::Output {
        &self.0[class.index()]
    }
}

impl IndexMut<SizeClass> for FreeLists {
    fn index_mut(&mut self, class: SizeClass) -> &mut Self::Output {
        &mut self.0[class.index()]
    }
}
