use super::entry::{Entry, HEADER_SIZE, HEADER_TAG, WORD_SIZE};

use core::marker::PhantomData;
use core::slice;

// `Buffer` is aligned to 8, which has to cover the word size.
const _: () = assert!(WORD_SIZE <= 8, "unsupported word size");

/// An offset into the [`Pool`] at which a header is known to be located.
///
/// Such offsets are only created by walking the header chain, by writing a
/// new header, or by successfully probing a user-supplied address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValidatedOffset(usize);
impl ValidatedOffset {
    /// The byte offset of the header inside the pool.
    pub const fn get(self) -> usize {
        self.0
    }
}

/// A bounds-checked view of the pool memory holding the header chain.
///
/// Every access is done through offsets relative to the start of the pool,
/// so a broken chain results in a panic instead of an out-of-bounds access.
/// The pool only keeps the base pointer and never creates a reference to the
/// whole memory: pointers to the payloads of live blocks, that were handed
/// out earlier, stay valid while headers are read and written.
pub(crate) struct Pool<'pool> {
    base: *mut u8,
    len: usize,
    _memory: PhantomData<&'pool mut [u8]>,
}
// SAFETY: the pool behaves like the `&'pool mut [u8]` it was created from.
unsafe impl Send for Pool<'_> {}
// SAFETY: see above, shared access only reads from the memory.
unsafe impl Sync for Pool<'_> {}
impl<'pool> Pool<'pool> {
    /// Wrap the given memory.
    ///
    /// The memory is used as is: it has to be trimmed to the effective pool
    /// size by the caller.
    #[cfg(test)]
    pub fn new(memory: &'pool mut [u8]) -> Self {
        // SAFETY: the memory is exclusively borrowed for `'pool`.
        unsafe { Self::from_raw_parts(memory.as_mut_ptr(), memory.len()) }
    }

    /// Wrap `len` bytes of memory starting at `base`.
    ///
    /// # Safety
    /// The memory has to be valid for reads and writes for `'pool`. Nothing
    /// else may access it during that time, except for the payloads of blocks
    /// allocated from this pool.
    pub unsafe fn from_raw_parts(base: *mut u8, len: usize) -> Self {
        Self {
            base,
            len,
            _memory: PhantomData,
        }
    }

    /// The number of bytes managed by this pool.
    pub fn len(&self) -> usize {
        self.len
    }

    /// The address of the first byte of the pool.
    pub fn base(&self) -> *const u8 {
        self.base
    }

    /// A pointer to `len` bytes of pool memory at `offset`.
    ///
    /// # Panics
    /// This function panics if the range does not lie inside of the pool.
    fn at(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "access outside of the pool"
        );
        // SAFETY: the range is inside of the pool memory, as asserted above.
        unsafe { self.base.add(offset) }
    }

    /// The offset of the first header, which always exists.
    pub const fn first(&self) -> ValidatedOffset {
        ValidatedOffset(0)
    }

    /// The offset of the sentinel header.
    pub fn end(&self) -> ValidatedOffset {
        ValidatedOffset(self.len() - HEADER_SIZE)
    }

    fn word(&self, offset: usize) -> usize {
        let word = self.at(offset, WORD_SIZE).cast::<usize>();
        // SAFETY: `at()` checked the bounds. Headers need not be aligned
        // inside of pools with an even, but not word-sized, length.
        unsafe { word.read_unaligned() }
    }

    /// Decode the header at the given offset.
    pub fn entry(&self, offset: ValidatedOffset) -> Entry {
        Entry::decode(self.word(offset.0))
    }

    /// Read the tag word of the header at the given offset.
    pub fn tag(&self, offset: ValidatedOffset) -> usize {
        self.word(offset.0 + WORD_SIZE)
    }

    /// Write a complete header (size word and tag) at the given offset.
    ///
    /// # Panics
    /// This function panics if the header would not fit into the pool.
    pub fn write(&mut self, offset: usize, entry: Entry) -> ValidatedOffset {
        let header = self.at(offset, HEADER_SIZE).cast::<[u8; HEADER_SIZE]>();
        // SAFETY: `at()` checked the bounds, a byte array has no alignment.
        unsafe { header.write(entry.as_raw()) };
        ValidatedOffset(offset)
    }

    /// Replace only the size word of an existing header.
    pub fn update(&mut self, offset: ValidatedOffset, entry: Entry) {
        let word = self.at(offset.0, WORD_SIZE).cast::<usize>();
        // SAFETY: see `word()`
        unsafe { word.write_unaligned(entry.encode()) };
    }

    /// The header directly following the one at `offset`.
    ///
    /// Must not be called on the sentinel.
    pub fn following(&self, offset: ValidatedOffset) -> ValidatedOffset {
        let size = self.entry(offset).size();
        ValidatedOffset(offset.0 + HEADER_SIZE + size)
    }

    /// Check whether a header of a block may live at the given offset.
    ///
    /// This checks bounds, alignment and the header tag. It cannot tell a
    /// real header apart from user data, that happens to look like one, nor
    /// a live header from one absorbed by coalescing: it is a diagnostic, not
    /// a proof.
    pub fn probe(&self, offset: usize) -> Option<ValidatedOffset> {
        let in_bounds = offset
            .checked_add(HEADER_SIZE)
            .is_some_and(|end| end <= self.end().0);
        if !in_bounds || offset % WORD_SIZE != 0 {
            return None;
        }

        let offset = ValidatedOffset(offset);
        (self.tag(offset) == HEADER_TAG).then_some(offset)
    }

    /// The payload memory of the block at the given offset.
    pub fn memory_of(&self, offset: ValidatedOffset) -> &[u8] {
        let size = self.entry(offset).size();
        let memory = self.at(offset.0 + HEADER_SIZE, size);
        // SAFETY: `at()` checked the bounds and the borrow of `self` keeps
        // the chain from handing out this memory mutably.
        unsafe { slice::from_raw_parts(memory, size) }
    }

    /// The mutable payload memory of the block at the given offset.
    pub fn memory_of_mut(&mut self, offset: ValidatedOffset) -> &mut [u8] {
        let size = self.entry(offset).size();
        let memory = self.at(offset.0 + HEADER_SIZE, size);
        // SAFETY: `at()` checked the bounds, the mutable borrow of `self`
        // makes the slice the only reference into the pool.
        unsafe { slice::from_raw_parts_mut(memory, size) }
    }

    /// A raw pointer to the payload of the block at the given offset.
    ///
    /// The pointer is derived from the base pointer of the pool, so later
    /// accesses to the headers do not invalidate it.
    pub fn payload_ptr(&self, offset: ValidatedOffset) -> *mut u8 {
        let size = self.entry(offset).size();
        self.at(offset.0 + HEADER_SIZE, size)
    }

    /// Iterate over all headers without modifying them.
    pub fn blocks(&self) -> Blocks<'_, 'pool> {
        Blocks {
            pool: self,
            offset: self.first(),
        }
    }
}

/// The state of one block, as reported by [`RawAllocator::blocks()`].
///
/// [`RawAllocator::blocks()`]: super::RawAllocator::blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The offset of the block header relative to the start of the pool.
    pub offset: usize,
    /// The payload size of the block in bytes.
    pub size: usize,
    /// Whether the block is currently handed out.
    pub allocated: bool,
}

/// A read-only iterator over the header chain.
///
/// Unlike the scans done by allocation and the capacity query, iterating
/// does not coalesce anything, so adjacent free blocks show up individually.
pub struct Blocks<'a, 'pool> {
    pool: &'a Pool<'pool>,
    offset: ValidatedOffset,
}
impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset;
        let (size, allocated) = match self.pool.entry(offset) {
            Entry::End => return None,
            Entry::Free(size) => (size, false),
            Entry::Used(size) => (size, true),
        };
        self.offset = self.pool.following(offset);
        Some(BlockInfo {
            offset: offset.get(),
            size,
            allocated,
        })
    }
}
impl core::iter::FusedIterator for Blocks<'_, '_> {}

/// Word-aligned, statically sized memory usable as a pool.
///
/// The buffer is zero-initialized, so that a `static` holding it ends up in
/// the `.bss`-section and does not occupy any space in the binary image.
#[repr(C, align(8))]
pub struct Buffer<const N: usize>([u8; N]);
impl<const N: usize> Buffer<N> {
    /// Create a new zeroed buffer.
    pub const fn new() -> Self {
        Self([0; N])
    }

    /// The buffer memory.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// The mutable buffer memory, e.g. for passing to
    /// [`RawAllocator::new()`](super::RawAllocator::new).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
impl<const N: usize> Default for Buffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
