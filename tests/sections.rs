//! This test ensures, that the allocator heap is not placed in `.data`.
//!
//! The `.data`-section typically contains the non-zero-initialized global
//! variables, so your `static X: u32 = 42` will show up there. Crucially, this
//! is also the home of partly-initialized memory (i.e. if not all bytes are
//! zeroed). This, however, needs not just the actually used RAM but also flash
//! (on the most micro-controllers and embedded devices): the initialization
//! data for the variables in `.data` (hence the name). So: every variable in
//! `.data` also shows up in the non-volatile flash. This is fine and expected.
//!
//! The aforementioned behavior is bad for the allocator: if the allocator is
//! located in the `.data`-section, the whole initial heap is also stored in
//! the non-volatile flash, despite the fact, that _all but the first header_
//! are uninitialized!
//!
//! Therefore this test makes sure, that a global allocator is not placed in
//! the `.data`-section, for both of this crate's allocator variants.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

static IMPLICIT: boundalloc::ImplicitAllocator<{ 64 * 1024 * 1024 }> =
    boundalloc::ImplicitAllocator::new();
static EXPLICIT: boundalloc::ExplicitAllocator<{ 64 * 1024 * 1024 }> =
    boundalloc::ExplicitAllocator::new();

#[cfg(all(target_arch = "x86_64", target_os = "linux"))] // this is only tested on Linux
#[test]
fn implicit_allocator_memory_is_not_initialized() {
    // SAFETY: we just use the allocator as intended.
    unsafe {
        let layout = Layout::new::<u64>();
        let ptr = IMPLICIT.alloc(layout);
        IMPLICIT.dealloc(ptr, layout);
    }
    assert_not_in_data(ptr::addr_of!(IMPLICIT) as usize);
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))] // this is only tested on Linux
#[test]
fn explicit_allocator_memory_is_not_initialized() {
    // SAFETY: we just use the allocator as intended.
    unsafe {
        let layout = Layout::new::<u64>();
        let ptr = EXPLICIT.alloc(layout);
        EXPLICIT.dealloc(ptr, layout);
    }
    assert_not_in_data(ptr::addr_of!(EXPLICIT) as usize);
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn assert_not_in_data(addr_allocator: usize) {
    let memory_map = MemoryMap::new();
    let bss_start = memory_map.bss_start;
    let data_end = memory_map.data_end;
    assert_eq!(bss_start, data_end, "test assumes bss directly after data");
    assert!(addr_allocator >= bss_start, "allocator is placed in .data");
}

/// The (at runtime) reconstructed memory map containing addresses of sections.
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
struct MemoryMap {
    /// The end of the `.data`-section.
    data_end: usize,
    /// The start address of the `.bss`-section.
    bss_start: usize,
}
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
impl MemoryMap {
    pub fn new() -> Self {
        // The symbols defined in the (default) linker script
        extern "C" {
            static __bss_start: usize;
            static _edata: usize;
        }

        Self {
            data_end: unsafe { ptr::addr_of!(__bss_start) } as usize,
            bss_start: unsafe { ptr::addr_of!(_edata) } as usize,
        }
    }
}
