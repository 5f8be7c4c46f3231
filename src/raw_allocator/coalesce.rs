//! The chain walker, which merges adjacent free blocks while scanning.
use super::buffer::{Pool, ValidatedOffset};
use super::entry::{Entry, HEADER_SIZE};

/// A run of adjacent free blocks, which are merged into the first header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// The header of the first free block of the run.
    pub start: ValidatedOffset,
    /// The accumulated payload size of the run (including the absorbed
    /// headers).
    pub size: usize,
}

/// An iterator over the header chain, which coalesces free blocks.
///
/// For every free header reached, the iterator yields the chunk that header
/// belongs to, with its size accumulated so far. Whenever a free header
/// follows another free one, its size (plus its header) is folded into the
/// size word of the first header of the run right away. This happens as a
/// side effect of iterating, so stopping early still keeps every merge done
/// up to that point.
pub(crate) struct Coalescer<'a, 'pool> {
    pool: &'a mut Pool<'pool>,
    offset: ValidatedOffset,
    chunk: Option<Chunk>,
}
impl<'a, 'pool> Coalescer<'a, 'pool> {
    /// Start a scan at the first header of the pool.
    pub fn new(pool: &'a mut Pool<'pool>) -> Self {
        let offset = pool.first();
        Self {
            pool,
            offset,
            chunk: None,
        }
    }
}
impl Iterator for Coalescer<'_, '_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.offset;
            match self.pool.entry(offset) {
                Entry::End => return None,
                Entry::Used(_) => {
                    self.chunk = None;
                    self.offset = self.pool.following(offset);
                }
                Entry::Free(size) => {
                    self.offset = self.pool.following(offset);
                    let chunk = match self.chunk {
                        None => Chunk {
                            start: offset,
                            size,
                        },
                        Some(chunk) => {
                            let size = chunk.size + HEADER_SIZE + size;
                            self.pool.update(chunk.start, Entry::Free(size));
                            Chunk {
                                start: chunk.start,
                                size,
                            }
                        }
                    };
                    self.chunk = Some(chunk);
                    return Some(chunk);
                }
            }
        }
    }
}
impl core::iter::FusedIterator for Coalescer<'_, '_> {}
