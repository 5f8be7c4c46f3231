//! The header codec.
//!
//! Every block in the pool starts with a header of two machine words: the
//! first holds the payload size with the lowest bit reused as "allocated"
//! flag, the second holds a constant tag used to recognize real headers when
//! a block is released. The end of the chain is marked by a sentinel header,
//! whose size word is a value no real block can have.
use core::mem;

/// The alignment unit of the pool. Every size and every payload address is
/// rounded to this.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// The number of bytes occupied by a single header (size word plus tag word).
pub const HEADER_SIZE: usize = 2 * WORD_SIZE;

/// The value stored in the tag word of every header.
pub(crate) const HEADER_TAG: usize = 0xDEAD_BABE;

const ALLOCATED_FLAG: usize = 1;
const END_MARKER: usize = usize::MAX;

/// The decoded state of a single header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// An unused block with a payload of the given size.
    Free(usize),
    /// A block handed out to the user with a payload of the given size.
    Used(usize),
    /// The sentinel terminating the header chain.
    End,
}
impl Entry {
    /// Decode the size word of a header.
    pub const fn decode(word: usize) -> Self {
        if word == END_MARKER {
            Self::End
        } else if word & ALLOCATED_FLAG == 0 {
            Self::Free(word)
        } else {
            Self::Used(word & !ALLOCATED_FLAG)
        }
    }

    /// Encode the entry into the size word of a header.
    ///
    /// # Panics
    /// Panics in debug builds if the size is odd, as it would clash with the
    /// allocation flag.
    pub const fn encode(self) -> usize {
        match self {
            Self::Free(size) => {
                debug_assert!(size & ALLOCATED_FLAG == 0, "block size must be even");
                size
            }
            Self::Used(size) => {
                debug_assert!(size & ALLOCATED_FLAG == 0, "block size must be even");
                size | ALLOCATED_FLAG
            }
            Self::End => END_MARKER,
        }
    }

    /// The payload size of this entry. The sentinel has no payload.
    pub const fn size(self) -> usize {
        match self {
            Self::Free(size) | Self::Used(size) => size,
            Self::End => 0,
        }
    }

    /// The raw header bytes (size word followed by the tag word).
    pub const fn as_raw(self) -> [u8; HEADER_SIZE] {
        let size = self.encode().to_ne_bytes();
        let tag = HEADER_TAG.to_ne_bytes();

        let mut raw = [0; HEADER_SIZE];
        let mut i = 0;
        while i < WORD_SIZE {
            raw[i] = size[i];
            raw[WORD_SIZE + i] = tag[i];
            i += 1;
        }
        raw
    }
}

/// Round `n` up to the next multiple of [`WORD_SIZE`].
///
/// Returns `None` if that would overflow.
pub const fn align_up(n: usize) -> Option<usize> {
    match n.checked_add(WORD_SIZE - 1) {
        Some(n) => Some(n & !(WORD_SIZE - 1)),
        None => None,
    }
}
