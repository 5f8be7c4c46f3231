//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one, that simply gets request for a specific memory
//! size but does not need to worry about alignment beyond the word size.
mod buffer;
mod coalesce;
mod entry;

pub use buffer::{BlockInfo, Blocks, Buffer};
pub use entry::{HEADER_SIZE, WORD_SIZE};

use buffer::{Pool, ValidatedOffset};
use coalesce::Coalescer;
use entry::{align_up, Entry, HEADER_TAG};

/// An error occurred when setting up a [`RawAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// The pool memory does not start at a multiple of the word size.
    #[error("pool address {address:#x} is not aligned to the word size")]
    Misaligned {
        /// The address of the first byte of the pool.
        address: usize,
    },
    /// The pool cannot even hold the first header and the end marker.
    #[error("pool of {size} bytes is too small: minimum size is {}", 2 * HEADER_SIZE)]
    TooSmall {
        /// The usable pool size after rounding.
        size: usize,
    },
}

/// An error occurred when calling `free()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    /// There is a double-free detected. An already freed-up-block is freed up
    /// again.
    #[error("double free detected")]
    DoubleFreeDetected,
    /// An invalid pointer was freed up (either a pointer outside of the heap
    /// memory or a pointer, that is not preceded by a block header).
    #[error("freed memory was not allocated from this pool")]
    AllocationNotFound,
}

/// A block handed out by [`RawAllocator::alloc()`].
///
/// The handle is neither `Copy` nor `Clone`: giving it back via
/// [`RawAllocator::free()`] consumes it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the block is leaked unless it is given back to the allocator"]
pub struct Allocation {
    header: ValidatedOffset,
    size: usize,
}
impl Allocation {
    /// The number of usable bytes, which may exceed the requested size.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The offset of the usable memory relative to the start of the pool.
    pub const fn offset(&self) -> usize {
        self.header.get() + HEADER_SIZE
    }
}

/// A memory allocator for variable-sized blocks inside a caller-supplied pool.
///
/// The pool is split into blocks, each preceded by a header. The headers form
/// a chain: the next header is found by skipping the payload of the current
/// one. There is no separate free list, the chain is scanned linearly instead.
/// Freeing a block only marks it as free, adjacent free blocks are merged the
/// next time the chain is scanned, i.e. by [`alloc()`](Self::alloc) and
/// [`largest_chunk_available()`](Self::largest_chunk_available).
///
/// Note, that the allocated memory is always aligned to [`WORD_SIZE`].
pub struct RawAllocator<'pool> {
    pool: Pool<'pool>,
}
impl<'pool> RawAllocator<'pool> {
    /// Create a new [`RawAllocator`] managing the given memory.
    ///
    /// An odd pool length is rounded down to a multiple of the word size,
    /// the remaining bytes are never used. The pool then contains a single
    /// free block spanning everything except the first header and the end
    /// marker, i.e. `len - 2 * HEADER_SIZE` bytes.
    ///
    /// # Errors
    /// The memory must start at a multiple of [`WORD_SIZE`] and hold at least
    /// two headers. [`Buffer`] provides properly aligned memory.
    pub fn new(memory: &'pool mut [u8]) -> Result<Self, InitError> {
        // SAFETY: the memory is exclusively borrowed for `'pool`.
        unsafe { Self::from_raw_parts(memory.as_mut_ptr(), memory.len()) }
    }

    /// Set up a new pool in `len` bytes of memory starting at `base`.
    ///
    /// This is [`new()`](Self::new) for memory, that is not borrowed, but
    /// owned by the caller, e.g. the buffer of an [`Allocator`].
    ///
    /// # Safety
    /// The memory has to be valid for reads and writes for `'pool` and must
    /// not be accessed by anything else, except through the blocks handed
    /// out by this allocator.
    ///
    /// [`Allocator`]: crate::Allocator
    pub(crate) unsafe fn from_raw_parts(base: *mut u8, len: usize) -> Result<Self, InitError> {
        let address = base as usize;
        if address % WORD_SIZE != 0 {
            return Err(InitError::Misaligned { address });
        }

        let mut size = len;
        if size % 2 != 0 {
            size &= !(WORD_SIZE - 1);
        }
        if size < 2 * HEADER_SIZE {
            return Err(InitError::TooSmall { size });
        }

        // SAFETY: `size <= len` and the caller guarantees the rest.
        let mut pool = unsafe { Pool::from_raw_parts(base, size) };
        pool.write(0, Entry::Free(size - 2 * HEADER_SIZE));
        pool.write(size - HEADER_SIZE, Entry::End);
        crate::debug!("initialized pool of {} bytes at {:#x}", size, address);

        Ok(Self { pool })
    }

    /// Continue using memory that was set up by
    /// [`from_raw_parts()`](Self::from_raw_parts) before.
    ///
    /// The chain is not touched.
    ///
    /// # Safety
    /// `base` and `len` have to describe exactly the effective pool of a
    /// previous initialization. The requirements of `from_raw_parts()` apply.
    pub(crate) unsafe fn resume(base: *mut u8, len: usize) -> Self {
        Self {
            // SAFETY: guaranteed by the caller
            pool: unsafe { Pool::from_raw_parts(base, len) },
        }
    }

    /// The number of bytes managed by this allocator (after rounding).
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Allocate a new memory block of size `n`.
    ///
    /// The request is rounded up to a multiple of [`WORD_SIZE`]. The chain is
    /// scanned from the start and adjacent free blocks are merged on the way,
    /// until a run of free blocks is large enough. That run is split into the
    /// allocated block and a new free block, unless the remainder could not
    /// hold a header plus at least one word. In that case the whole run is
    /// handed out.
    ///
    /// If the allocation fails, `None` will be returned. This includes
    /// requests for zero bytes. Free blocks merged during a failing scan stay
    /// merged.
    pub fn alloc(&mut self, n: usize) -> Option<Allocation> {
        if n == 0 {
            return None;
        }
        let n = align_up(n)?;

        let Some(chunk) = Coalescer::new(&mut self.pool).find(|chunk| chunk.size >= n) else {
            crate::debug!("no chunk of {} bytes available", n);
            return None;
        };

        let remaining = chunk.size - n;
        let size = if remaining < HEADER_SIZE + WORD_SIZE {
            chunk.size
        } else {
            let offset = chunk.start.get() + HEADER_SIZE + n;
            self.pool.write(offset, Entry::Free(remaining - HEADER_SIZE));
            n
        };
        self.pool.update(chunk.start, Entry::Used(size));
        crate::trace!("allocated {} bytes at offset {}", size, chunk.start.get());

        Some(Allocation {
            header: chunk.start,
            size,
        })
    }

    /// Give a block back to the allocator.
    ///
    /// This only marks the block as free in constant time. Merging with
    /// adjacent free blocks is deferred to the next scan of the chain.
    ///
    /// # Errors
    /// [`FreeError::AllocationNotFound`] is returned, if there is no header
    /// in front of the block (e.g. since the allocation belongs to another
    /// pool) and [`FreeError::DoubleFreeDetected`] if the block is not
    /// allocated. Both checks are best effort: a header absorbed by merging
    /// still looks like a header.
    pub fn free(&mut self, allocation: Allocation) -> Result<(), FreeError> {
        self.release(allocation.header.get())
    }

    /// Give a block back to the allocator, addressed by a pointer to its
    /// memory.
    ///
    /// This is the same as [`free()`](Self::free), except that the block is
    /// identified by a pointer as returned by [`as_ptr()`](Self::as_ptr). The
    /// pointer is never dereferenced, so a pointer outside of the pool is
    /// reported as [`FreeError::AllocationNotFound`].
    ///
    /// # Errors
    /// See [`free()`](Self::free).
    pub fn free_ptr(&mut self, ptr: *const u8) -> Result<(), FreeError> {
        let header = (ptr as usize)
            .checked_sub(self.pool.base() as usize)
            .and_then(|offset| offset.checked_sub(HEADER_SIZE))
            .ok_or(FreeError::AllocationNotFound)?;
        self.release(header)
    }

    fn release(&mut self, header: usize) -> Result<(), FreeError> {
        let offset = self
            .pool
            .probe(header)
            .ok_or(FreeError::AllocationNotFound)?;
        match self.pool.entry(offset) {
            Entry::Used(size) => {
                self.pool.update(offset, Entry::Free(size));
                crate::trace!("freed {} bytes at offset {}", size, header);
                Ok(())
            }
            Entry::Free(_) => Err(FreeError::DoubleFreeDetected),
            Entry::End => Err(FreeError::AllocationNotFound),
        }
    }

    /// Give a block back to the allocator without validating it.
    ///
    /// The header tag is only checked by a debug assertion, release builds
    /// simply clear the allocation flag. Freeing a block twice is harmless
    /// here, while handing in an allocation of another pool corrupts the
    /// contents of this pool.
    ///
    /// # Panics
    /// Panics in debug builds if the block has no valid header. Panics in
    /// every build if the allocation lies outside of this pool.
    pub fn free_unchecked(&mut self, allocation: Allocation) {
        let offset = allocation.header;
        debug_assert_eq!(self.pool.tag(offset), HEADER_TAG, "invalid block header");

        let size = self.pool.entry(offset).size();
        self.pool.update(offset, Entry::Free(size));
    }

    /// Determine the largest block, that could be allocated right now.
    ///
    /// This performs the same scan as [`alloc()`](Self::alloc) over the whole
    /// chain. Hence it merges every run of adjacent free blocks as a side
    /// effect, which is why it needs mutable access. The sizes reported
    /// afterwards do not change, but the headers inside merged runs are gone.
    pub fn largest_chunk_available(&mut self) -> usize {
        let largest = Coalescer::new(&mut self.pool)
            .map(|chunk| chunk.size)
            .max()
            .unwrap_or(0);
        crate::trace!("largest available chunk: {} bytes", largest);
        largest
    }

    /// Iterate over the blocks of the pool without merging anything.
    pub fn blocks(&self) -> Blocks<'_, 'pool> {
        self.pool.blocks()
    }

    /// The usable memory of an allocated block.
    ///
    /// # Panics
    /// This function panics if the allocation belongs to another, larger
    /// pool and lies outside of this one.
    pub fn memory_of(&self, allocation: &Allocation) -> &[u8] {
        self.pool.memory_of(allocation.header)
    }

    /// The mutable usable memory of an allocated block.
    ///
    /// # Panics
    /// See [`memory_of()`](Self::memory_of).
    pub fn memory_of_mut(&mut self, allocation: &Allocation) -> &mut [u8] {
        self.pool.memory_of_mut(allocation.header)
    }

    /// A raw pointer to the usable memory of an allocated block.
    ///
    /// The pointer stays valid as long as the pool memory does and the block
    /// is not freed. Other calls on the allocator do not invalidate it, but
    /// it must not be used while a slice obtained by
    /// [`memory_of()`](Self::memory_of) or
    /// [`memory_of_mut()`](Self::memory_of_mut) for the same block is alive.
    ///
    /// # Panics
    /// See [`memory_of()`](Self::memory_of).
    pub fn as_ptr(&self, allocation: &Allocation) -> *mut u8 {
        self.pool.payload_ptr(allocation.header)
    }
}
impl core::fmt::Debug for RawAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawAllocator")
            .field("pool_size", &self.pool_size())
            .finish_non_exhaustive()
    }
}
