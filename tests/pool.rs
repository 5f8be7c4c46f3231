//! Behavior of a pool managed by a `RawAllocator`.
use vsalloc::{Buffer, RawAllocator, HEADER_SIZE, WORD_SIZE};

/// Run `f` on an allocator over the first `len` bytes of an aligned buffer.
fn with_pool<R>(len: usize, f: impl FnOnce(&mut RawAllocator<'_>) -> R) -> R {
    let mut buffer = Buffer::<1024>::new();
    let mut allocator = RawAllocator::new(&mut buffer.as_mut_slice()[..len]).unwrap();
    f(&mut allocator)
}

#[cfg(target_pointer_width = "64")]
mod reference_sizes {
    use super::with_pool;

    #[test]
    fn capacity_after_init() {
        with_pool(46, |allocator| assert_eq!(allocator.largest_chunk_available(), 14));
        with_pool(33, |allocator| assert_eq!(allocator.largest_chunk_available(), 0));
    }

    #[test]
    fn alloc_reduces_and_free_restores_capacity() {
        with_pool(100, |allocator| {
            let block = allocator.alloc(8).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 44);

            allocator.free(block).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 68);
        });
    }

    #[test]
    fn only_adjacent_blocks_are_merged() {
        with_pool(129, |allocator| {
            let block1 = allocator.alloc(8).unwrap();
            let block2 = allocator.alloc(24).unwrap();
            let block3 = allocator.alloc(32).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 0);

            allocator.free(block3).unwrap();
            allocator.free(block1).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 32);

            let _block3 = allocator.alloc(32).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 8);

            allocator.free(block2).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 48);
        });
    }

    #[test]
    fn remainder_too_small_for_a_block_is_handed_out() {
        with_pool(129, |allocator| {
            let block1 = allocator.alloc(8).unwrap();
            let _block2 = allocator.alloc(16).unwrap();
            let block3 = allocator.alloc(32).unwrap();
            assert_eq!(block3.size(), 40);
            assert_eq!(allocator.largest_chunk_available(), 0);

            allocator.free(block3).unwrap();
            allocator.free(block1).unwrap();
            assert_eq!(allocator.largest_chunk_available(), 40);
        });
    }
}

#[test]
fn exhaustion_fails_cleanly() {
    with_pool(512, |allocator| {
        let _a = allocator.alloc(40).unwrap();
        let b = allocator.alloc(100).unwrap();
        let _c = allocator.alloc(24).unwrap();
        allocator.free(b).unwrap();

        let largest = allocator.largest_chunk_available();
        let blocks_before = allocator.blocks().count();
        assert!(allocator.alloc(largest + 1).is_none());
        assert_eq!(allocator.largest_chunk_available(), largest);
        assert_eq!(allocator.blocks().count(), blocks_before);

        let block = allocator.alloc(largest).unwrap();
        assert!(block.size() >= largest);
    });
}

#[test]
fn freeing_everything_restores_initial_capacity() {
    // free in allocation order, in reverse order and interleaved
    let orders: [[usize; 6]; 3] = [
        [0, 1, 2, 3, 4, 5],
        [5, 4, 3, 2, 1, 0],
        [3, 0, 5, 1, 4, 2],
    ];
    let sizes = [1, 17, 64, 8, 33, 120];

    for order in orders {
        with_pool(600, |allocator| {
            let initial = allocator.largest_chunk_available();

            let mut blocks = sizes.map(|size| allocator.alloc(size));
            for index in order {
                let block = blocks[index].take().unwrap();
                allocator.free(block).unwrap();
            }
            assert_eq!(allocator.largest_chunk_available(), initial);
            assert_eq!(allocator.blocks().count(), 1);
        });
    }
}

#[test]
fn addresses_and_sizes_are_word_aligned() {
    with_pool(1024, |allocator| {
        let blocks = [1, 3, 8, 13, 40, 7, 99].map(|size| allocator.alloc(size).unwrap());
        for block in &blocks {
            assert_eq!(block.offset() % WORD_SIZE, 0);
            assert_eq!(allocator.as_ptr(block) as usize % WORD_SIZE, 0);
        }

        // free every other block to get some fragmentation
        for (index, block) in blocks.into_iter().enumerate() {
            if index % 2 == 0 {
                allocator.free(block).unwrap();
            }
        }
        // merge whatever became adjacent
        allocator.largest_chunk_available();
        assert!(allocator.blocks().all(|block| block.size % WORD_SIZE == 0));
        assert!(allocator.blocks().all(|block| block.offset % WORD_SIZE == 0));
    });
}

#[test]
fn fragmentation_limits_the_largest_chunk() {
    with_pool(512, |allocator| {
        let a = allocator.alloc(64).unwrap();
        let _b = allocator.alloc(8).unwrap();
        let c = allocator.alloc(64).unwrap();
        let _d = allocator.alloc(8).unwrap();
        let rest = allocator.largest_chunk_available();
        let e = allocator.alloc(rest).unwrap();

        allocator.free(a).unwrap();
        allocator.free(c).unwrap();
        let free: usize = allocator
            .blocks()
            .filter(|block| !block.allocated)
            .map(|block| block.size)
            .sum();
        assert_eq!(free, 128);
        assert_eq!(allocator.largest_chunk_available(), 64);
        assert!(allocator.alloc(65).is_none());

        allocator.free(e).unwrap();
        // the last block is not adjacent to any other free block
        assert_eq!(allocator.largest_chunk_available(), rest);
    });
}

#[test]
fn query_merges_free_blocks() {
    with_pool(256, |allocator| {
        let a = allocator.alloc(16).unwrap();
        let b = allocator.alloc(16).unwrap();
        allocator.free(a).unwrap();
        allocator.free(b).unwrap();
        assert_eq!(allocator.blocks().count(), 3);

        let largest = allocator.largest_chunk_available();
        assert_eq!(largest, 256 - 2 * HEADER_SIZE);
        assert_eq!(allocator.blocks().count(), 1);
        assert_eq!(allocator.largest_chunk_available(), largest);
    });
}
