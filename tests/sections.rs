//! This test ensures, that the allocator heap is not placed in `.data`.
//!
//! The `.data`-section typically contains the non-zero-initialized global
//! variables, so your `static X: u32 = 42` will show up there. Every variable
//! in `.data` also has its initialization data stored in the binary image (on
//! embedded devices: in the non-volatile flash).
//!
//! The heap of the allocator is zero-initialized and the block chain is only
//! written on first use. Therefore the whole allocator has to end up in the
//! `.bss`-section, which takes no space in the image. Writing the initial
//! headers at construction time would move the heap into `.data`.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

static ALLOCATOR: vsalloc::Allocator<{ 128 * 1024 * 1024 }> = vsalloc::Allocator::new();

#[cfg(all(target_arch = "x86_64", target_os = "linux"))] // this is only tested on Linux
#[test]
fn ensure_that_allocator_memory_is_not_initialized() {
    // Just use the allocator in order to make sure that it will actually remain
    // in the binary.
    // SAFETY: we just use the allocator as intended.
    unsafe {
        let layout = Layout::new::<u64>();
        let ptr = ALLOCATOR.alloc(layout);
        ALLOCATOR.dealloc(ptr, layout);
    }

    let memory_map = MemoryMap::new();
    let bss_start = memory_map.bss_start;
    let data_end = memory_map.data_end;
    assert_eq!(bss_start, data_end, "test assumes bss directly after data");

    let addr_allocator = ptr::addr_of!(ALLOCATOR) as usize;
    assert!(addr_allocator >= bss_start, "allocator is placed in .data");
}

/// The (at runtime) reconstructed memory map containing addresses of sections.
struct MemoryMap {
    /// The end of the `.data`-section.
    data_end: usize,
    /// The start address of the `.bss`-section.
    bss_start: usize,
}
impl MemoryMap {
    pub fn new() -> Self {
        // The symbols defined in the (default) linker script
        extern "C" {
            static __bss_start: usize;
            static _edata: usize;
        }

        Self {
            data_end: ptr::addr_of!(_edata) as usize,
            bss_start: ptr::addr_of!(__bss_start) as usize,
        }
    }
}
