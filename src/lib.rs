//! Two allocators for embedded systems
//!
//! This crate provides two types, [`ImplicitAllocator`] and
//! [`ExplicitAllocator`], each implementing the
//! [`core::alloc::GlobalAlloc`]-trait, which is required to use the
//! [`alloc`-crate][alloc] on `#![no_std]`-targets. Both allocators manage a
//! fixed-size heap embedded directly in the allocator value (no separate
//! buffer or allocation is needed), but they differ in their internal
//! bookkeeping:
//! - [`ImplicitAllocator`] keeps a single header word per block and finds a
//!   free block by sweeping the whole heap on every allocation. It never
//!   merges adjacent free blocks.
//! - [`ExplicitAllocator`] threads a doubly-linked free list through the free
//!   blocks, so allocation only has to walk the free list instead of the
//!   whole heap, and merges a freed block with its right neighbor when
//!   possible.
//!
//! Both are relatively simple, but reliable: their design is simple, so that
//! errors in the implementation are unlikely. Furthermore the crate is tested
//! by (unit) tests running under `miri`, so there shouldn't be any undefined
//! behavior.
//!
//! # Usage
//! The usage is simple: just copy and paste the following code snipped into
//! your binary crate and potentially adjust the number of bytes of the heap
//! (here 4K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: boundalloc::ExplicitAllocator<4096> = boundalloc::ExplicitAllocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every fancy collection which is
//! normally provided by the `std`.
//!
//! [`ImplicitAllocator`] is a drop-in replacement with the same API, for
//! heaps small enough (or latency-insensitive enough) that the linear sweep
//! is not a concern; it trades the three-word header of the explicit variant
//! for a single word, at the cost of worse fragmentation behavior.
//!
//! Note to users with things like `MPU`s, `MMU`s, etc.: your device might
//! support things like memory remapping or memory protection with setting
//! read/write/execution rights. This crate _doesn't use_ those features at
//! all! If that is desired, you should take the address of the allocator and
//! use that along with the known size `N` to protect the heap memory.
//!
//! # Diagnostics
//! Both allocators expose [`validate()`](ExplicitAllocator::validate) to
//! cross-check their internal bookkeeping (useful under `debug_assertions`
//! or from a panic handler) and [`dump()`](ExplicitAllocator::dump) to write
//! a human-readable block table to any [`core::fmt::Write`] sink, since
//! `#![no_std]` rules out `println!`. Both also call an internal
//! never-inlined trap function whenever they detect misuse (a double free or
//! a pointer that doesn't belong to the heap), giving a debugger a stable
//! place to set a breakpoint.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod raw_allocator;

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;

use spin::Mutex;

use raw_allocator::{explicit, implicit};

/// The memory allocator for embedded systems using a boundary-tag sweep.
///
/// See the [crate-level](crate) documentation for the algorithmic
/// differences to [`ExplicitAllocator`], and for general usage.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: boundalloc::ImplicitAllocator<4096> = boundalloc::ImplicitAllocator::new();
/// ```
pub struct ImplicitAllocator<const N: usize>(Mutex<implicit::RawAllocator<N>>);
impl<const N: usize> ImplicitAllocator<N> {
    /// Create a new [`ImplicitAllocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// # Panics
    /// This function will panic, if the supplied buffer size, i.e. `N`, is
    /// too small to hold a single header plus the minimum payload, or if it
    /// is not divisible by `8`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(Mutex::new(implicit::RawAllocator::new()))
    }

    /// Like [`new()`](Self::new), but rejects any single allocation request
    /// larger than `max_request_size`, even if the heap would otherwise have
    /// room for it.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn with_max_request_size(max_request_size: usize) -> Self {
        Self(Mutex::new(implicit::RawAllocator::with_max_request_size(max_request_size)))
    }

    /// The number of bytes currently handed out to callers (including
    /// headers).
    pub fn used(&self) -> usize {
        self.0.lock().used()
    }

    /// Check that the heap's internal bookkeeping is still consistent.
    ///
    /// Returns `false` (after invoking the debug-trap hook) if the recorded
    /// usage and a from-scratch sweep of the heap disagree.
    pub fn validate(&self) -> bool {
        self.0.lock().validate()
    }

    /// Write a human-readable block table to `w`.
    pub fn dump(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        self.0.lock().dump(w)
    }
}
// SAFETY: `alloc`/`dealloc`/`realloc` only ever touch memory inside this
// allocator's own buffer, behind the `Mutex`, and never unmap or shrink the
// buffer itself; the returned pointers stay valid until freed as required by
// the trait's contract.
unsafe impl<const N: usize> GlobalAlloc for ImplicitAllocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > 8 {
            return core::ptr::null_mut();
        }
        self.0
            .lock()
            .alloc(layout.size())
            .map_or(core::ptr::null_mut(), |memory| memory.as_mut_ptr().cast())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > 8 {
            return core::ptr::null_mut();
        }
        self.0.lock().realloc(ptr, new_size).unwrap_or(core::ptr::null_mut())
    }
}

/// The memory allocator for embedded systems using an explicit free list.
///
/// See the [crate-level](crate) documentation for the algorithmic
/// differences to [`ImplicitAllocator`], and for general usage.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: boundalloc::ExplicitAllocator<4096> = boundalloc::ExplicitAllocator::new();
/// ```
pub struct ExplicitAllocator<const N: usize>(Mutex<explicit::RawAllocator<N>>);
impl<const N: usize> ExplicitAllocator<N> {
    /// Create a new [`ExplicitAllocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// # Panics
    /// This function will panic, if the supplied buffer size, i.e. `N`, is
    /// too small to hold a single header plus the minimum payload, or if it
    /// is not divisible by `8`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(Mutex::new(explicit::RawAllocator::new()))
    }

    /// Like [`new()`](Self::new), but rejects any single allocation request
    /// larger than `max_request_size`, even if the heap would otherwise have
    /// room for it.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn with_max_request_size(max_request_size: usize) -> Self {
        Self(Mutex::new(explicit::RawAllocator::with_max_request_size(max_request_size)))
    }

    /// The number of bytes currently handed out to callers (including
    /// headers).
    pub fn used(&self) -> usize {
        self.0.lock().used()
    }

    /// Check that the heap's internal bookkeeping, including the free list,
    /// is still consistent.
    ///
    /// Returns `false` (after invoking the debug-trap hook) if the recorded
    /// usage, a from-scratch sweep of the heap, and a walk of the free list
    /// disagree with each other.
    pub fn validate(&self) -> bool {
        self.0.lock().validate()
    }

    /// Write a human-readable block table to `w`.
    pub fn dump(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        self.0.lock().dump(w)
    }
}
// SAFETY: see `ImplicitAllocator`'s impl; the same argument applies.
unsafe impl<const N: usize> GlobalAlloc for ExplicitAllocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > 8 {
            return core::ptr::null_mut();
        }
        self.0
            .lock()
            .alloc(layout.size())
            .map_or(core::ptr::null_mut(), |memory| memory.as_mut_ptr().cast())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > 8 {
            return core::ptr::null_mut();
        }
        self.0.lock().realloc(ptr, new_size).unwrap_or(core::ptr::null_mut())
    }
}
