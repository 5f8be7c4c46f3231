//! Variable-size allocator for caller-supplied memory pools
//!
//! This crate manages blocks of arbitrary size inside a single, fixed memory
//! region, which is handed in by the user. It never allocates memory on its
//! own, so it is usable on `#![no_std]`-targets and inside other allocators.
//! There are two ways to use it:
//! - [`RawAllocator`] borrows a byte slice and hands out [`Allocation`]s.
//!   This is the core of the crate and is completely safe to use.
//! - [`Allocator`] owns a statically sized buffer and implements the
//!   [`core::alloc::GlobalAlloc`]-trait, so it can back the
//!   [`alloc`-crate][alloc].
//!
//! # Usage
//! Managing a pool directly:
//! ```
//! use vsalloc::{Buffer, RawAllocator, HEADER_SIZE};
//!
//! let mut buffer = Buffer::<256>::new();
//! let mut allocator = RawAllocator::new(buffer.as_mut_slice()).unwrap();
//! assert_eq!(allocator.largest_chunk_available(), 256 - 2 * HEADER_SIZE);
//!
//! let block = allocator.alloc(20).unwrap();
//! allocator.memory_of_mut(&block).fill(42);
//! allocator.free(block).unwrap();
//! assert_eq!(allocator.largest_chunk_available(), 256 - 2 * HEADER_SIZE);
//! ```
//!
//! Using the pool as the global allocator (here with a 4K heap):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: vsalloc::Allocator<4096> = vsalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//!
//! # Implementation
//! The pool is a chain of blocks. Every block starts with a header of two
//! words ([`HEADER_SIZE`], 16 bytes on 64-bit targets): the size of the block
//! memory, whose lowest bit marks the block as used, and a constant tag. The
//! last header of the pool is an end marker. There is no list of free blocks
//! or any other index: the next header always directly follows the memory of
//! the current block, so the chain is walked by adding up sizes. The picture
//! below shows a pool of 128 bytes on a 64-bit target, each character standing
//! for 8 bytes.
//! 1.  The pool is initialized.
//!     ```text
//!     HH ffffffffffff EE
//!     ^- ^----------- ^-
//!     FREE size = 96  END
//!     ```
//!     There is a single free block, which spans all the bytes except for its
//!     own header and the end marker.
//! 2.  A block of 5 bytes is allocated.
//!     ```text
//!     HH u HH fffffffff EE
//!     ^- ^ ^- ^-------- ^-
//!     USED FREE size = 72
//!     ```
//!     The request is rounded up to a whole word (8 bytes). The free block is
//!     split into the used block and a new free block, which gets its own
//!     header. Hence the free memory shrunk by 24 bytes, not by 8.
//! 3.  A block of 56 bytes is allocated.
//!     ```text
//!     HH u HH uuuuuuuuu EE
//!     ^- ^ ^- ^-------- ^-
//!     USED USED size = 72
//!     ```
//!     The remainder after splitting would be 16 bytes, which is enough for a
//!     header, but not for a header and at least one word of memory. So the
//!     whole free block is handed out.
//! 4.  Both blocks are freed.
//!     ```text
//!     HH f HH fffffffff EE
//!     ^- ^ ^- ^-------- ^-
//!     FREE FREE size = 72
//!     ```
//!     Freeing only flips the used-bit of the header. Nothing is merged yet,
//!     so there are now two adjacent free blocks.
//! 5.  A block of 80 bytes is allocated.
//!     ```text
//!     HH uuuuuuuuuuuu EE
//!     ^- ^----------- ^-
//!     USED size = 96
//!     ```
//!     The allocation walks the chain and merges every run of adjacent free
//!     blocks into the first header of that run while doing so. Once the
//!     merged run is large enough, the walk stops and the run is split (or,
//!     as here, handed out completely).
//!
//! The same walk is done by
//! [`largest_chunk_available()`](RawAllocator::largest_chunk_available), which
//! therefore merges free blocks as well. This keeps freeing a constant time
//! operation, while the linear scans needed for allocating do the
//! housekeeping.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod macros;
mod raw_allocator;

pub(crate) use macros::{debug, trace};
pub use raw_allocator::{
    Allocation, BlockInfo, Blocks, Buffer, FreeError, InitError, RawAllocator, HEADER_SIZE,
    WORD_SIZE,
};

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr;

/// The memory allocator for `#[global_allocator]`-usage.
///
/// This type wraps a [`RawAllocator`] around a buffer of `N` bytes owned by
/// the allocator itself. Therefore the heap memory usage is statically limited
/// to an upper value. The buffer is zero-initialized, so that a `static`
/// allocator is placed in the `.bss`-section; the block chain is only set up
/// on first use.
///
/// Its usage is simple: just copy and paste the following in the binary crate
/// you're developing. The memory size of the heap is `4096` or 4K in this
/// example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: vsalloc::Allocator<4096> = vsalloc::Allocator::new();
/// ```
///
/// Access to the pool is serialized with a spin lock. The pool itself only
/// provides memory aligned to [`WORD_SIZE`]: for larger alignments the
/// allocator requests `size + align` bytes and stores the address of that
/// block in the word in front of the aligned pointer it returns.
pub struct Allocator<const N: usize> {
    /// The heap memory. It is only ever accessed through raw pointers, as the
    /// blocks handed out are written concurrently to the pool management.
    buffer: UnsafeCell<Buffer<N>>,
    /// Whether the block chain is set up. The lock guards the whole pool.
    initialized: spin::Mutex<bool>,
}
// SAFETY: the headers inside of the buffer are only accessed while holding
// the lock, the blocks belong to whoever allocated them.
unsafe impl<const N: usize> Sync for Allocator<N> {}
impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// # Panics
    /// This function will panic, if the supplied buffer size, i.e. `N` is
    /// less than two headers plus one word or not divisible by the word size.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        assert!(
            N >= 2 * HEADER_SIZE + WORD_SIZE,
            "too small heap memory: minimum size is two headers plus one word"
        );
        assert!(
            N % WORD_SIZE == 0,
            "memory size has to be divisible by the word size"
        );
        Self {
            buffer: UnsafeCell::new(Buffer::new()),
            initialized: spin::Mutex::new(false),
        }
    }

    /// Determine the largest block, that could be allocated right now.
    ///
    /// Just like [`RawAllocator::largest_chunk_available()`], this merges
    /// adjacent free blocks.
    pub fn largest_chunk_available(&self) -> usize {
        self.with_raw(|raw| raw.largest_chunk_available()).unwrap_or(0)
    }
}
impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}
unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= WORD_SIZE {
            return self.alloc_words(layout.size());
        }

        // Over-allocate, so that an aligned address with at least one word in
        // front of it is available. That word stores the original pointer.
        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };
        let ptr = self.alloc_words(size);
        if ptr.is_null() {
            return ptr;
        }
        let address = ptr as usize;
        let mask = layout.align() - 1;
        let offset = ((address + WORD_SIZE + mask) & !mask) - address;

        // SAFETY: `offset` is at most `layout.align()`, so the aligned block
        // (and the word in front of it) is inside of the over-allocated one.
        // The stash word is aligned, as both alignments are powers of two.
        let aligned = ptr.add(offset);
        aligned.sub(WORD_SIZE).cast::<*mut u8>().write(ptr);
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let ptr = if layout.align() <= WORD_SIZE {
            ptr
        } else {
            // SAFETY: `alloc()` stored the original pointer right in front of
            // every over-aligned block.
            ptr.sub(WORD_SIZE).cast::<*mut u8>().read()
        };

        // allocators must not unwind, so invalid pointers are ignored
        let _ = self.with_raw(|raw| raw.free_ptr(ptr));
    }
}
impl<const N: usize> Allocator<N> {
    fn alloc_words(&self, size: usize) -> *mut u8 {
        self.with_raw(|raw| raw.alloc(size).map(|allocation| raw.as_ptr(&allocation)))
            .flatten()
            .unwrap_or(ptr::null_mut())
    }

    /// Run `f` on a [`RawAllocator`] over the heap while holding the lock.
    ///
    /// The block chain is set up on first use. `None` is returned, if that
    /// fails.
    fn with_raw<R>(&self, f: impl FnOnce(&mut RawAllocator<'_>) -> R) -> Option<R> {
        let mut initialized = self.initialized.lock();
        // no reference to the buffer is created: it would cover the blocks
        // handed out, which may be in use right now.
        let base = self.buffer.get().cast::<u8>();

        let mut raw = if *initialized {
            // SAFETY: the pool was set up with the same memory below and the
            // lock serializes every access to the headers.
            unsafe { RawAllocator::resume(base, N) }
        } else {
            // SAFETY: the buffer lives as long as `self` and is only accessed
            // by the allocator while holding the lock.
            let raw = unsafe { RawAllocator::from_raw_parts(base, N) }.ok()?;
            *initialized = true;
            raw
        };
        Some(f(&mut raw))
    }
}
