//! The boundary-tag raw allocator: a single header word per block, no free
//! list, first-fit placement via a full address-order sweep.
mod buffer;
mod entry;
use entry::Entry;

use core::mem::{self, MaybeUninit};

use super::{round_up, trap, FreeError, State, MIN_PAYLOAD};

/// A raw memory allocator backed by a `N`-byte buffer, using a boundary-tag
/// sweep to find free blocks.
///
/// This allocator is an intermediate one, which does not need to handle the
/// alignment of a [`Layout`](core::alloc::Layout). This abstracts the parts
/// "allocating of memory" and "getting a pointer with proper alignment" (see
/// [`crate::ImplicitAllocator`] for the latter).
///
/// Note, that the allocated memory is always aligned to 8.
///
/// # Algorithm
/// Every allocation linearly scans the blocks from the start of the buffer
/// and selects the first free block whose payload is large enough
/// (first-fit). If the remainder after carving out the requested size would
/// be at least `size_of::<Entry>() + 8` bytes, the block is split into a used
/// block and a smaller free block; otherwise the whole block is handed out.
/// Freeing a block never merges it with its neighbors: fragmentation left
/// behind by a free is only resolved by a later allocation's scan finding a
/// bigger neighboring free block on its own, or not at all. This trade-off
/// keeps `free` O(1) at the cost of the sweep in `alloc` staying O(n).
pub struct RawAllocator<const N: usize> {
    buffer: buffer::Buffer<N>,
    used: usize,
    max_request_size: usize,
}
impl<const N: usize> RawAllocator<N> {
    /// Create a new [`RawAllocator`] with a given heap size, and no stricter
    /// request-size ceiling than the heap size itself.
    ///
    /// # Panics
    /// This function panics if the buffer size is less than
    /// `size_of::<Entry>() + 8` (the minimum useful allocation heap) or if it
    /// is not divisible by 8.
    pub const fn new() -> Self {
        Self::with_max_request_size(N)
    }

    /// Like [`new()`](Self::new), but rejects any single request larger than
    /// `max_request_size`, even if the heap would otherwise have room.
    pub const fn with_max_request_size(max_request_size: usize) -> Self {
        assert!(
            N >= mem::size_of::<Entry>() + MIN_PAYLOAD,
            "too small heap memory"
        );
        assert!(N % 8 == 0, "memory size has to be divisible by 8");

        Self { buffer: buffer::Buffer::new(), used: 0, max_request_size }
    }

    /// The number of bytes currently handed out to callers (including
    /// headers).
    pub fn used(&self) -> usize {
        self.used
    }

    /// The total size of the backing buffer.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Find the first free block (in address order) whose payload is at
    /// least `r` bytes, if any.
    fn find_fit(&self, r: usize) -> Option<usize> {
        self.buffer.entries().find(|&offset| {
            let entry = self.buffer.entry(offset);
            entry.state() == State::Free && entry.size() >= r
        })
    }

    /// Place a rounded request of `r` bytes, splitting or absorbing the
    /// chosen block as appropriate, and return its offset.
    fn place(&mut self, r: usize) -> Option<usize> {
        let offset = self.find_fit(r)?;
        let entry = self.buffer.entry(offset);
        let payload = entry.size();
        let header_size = mem::size_of::<Entry>();

        if payload - r >= header_size + MIN_PAYLOAD {
            self.buffer.write_entry(offset, Entry::used(r));
            self.buffer
                .write_entry(offset + header_size + r, Entry::free(payload - r - header_size));
            self.used += header_size + r;
        } else {
            self.buffer.write_entry(offset, Entry::used(payload));
            self.used += header_size + payload;
        }
        Some(offset)
    }

    /// Allocate a new memory block of size `n`.
    ///
    /// This method is used for general allocation of multiple contiguous
    /// bytes. It searches for the first sufficiently large free entry and
    /// marks it as "used". As usual with [`RawAllocator`], this does not take
    /// alignment into account.
    ///
    /// Returns `None` if `n` is zero, if the rounded request exceeds the
    /// configured request-size ceiling, or if no free block is large enough.
    pub fn alloc(&mut self, n: usize) -> Option<&mut [MaybeUninit<u8>]> {
        if n == 0 {
            return None;
        }
        let r = round_up(n);
        if r > self.max_request_size || r + self.used > N {
            return None;
        }

        let offset = self.place(r)?;
        Some(self.buffer.memory_mut(offset))
    }

    /// Free a pointer inside a used memory block, reporting misuse instead of
    /// silently ignoring it.
    ///
    /// # Algorithm
    /// The header belonging to `ptr` is recovered in O(1) via pointer
    /// arithmetic and checked for being in-bounds and aligned. If no such
    /// header exists, [`FreeError::AllocationNotFound`] is reported. If the
    /// block is already free, [`FreeError::DoubleFreeDetected`] is reported.
    /// Otherwise the block is flagged free; no coalescing happens.
    pub fn try_free(&mut self, ptr: *mut u8) -> Result<(), FreeError> {
        let offset = self.buffer.offset_of(ptr).ok_or(FreeError::AllocationNotFound)?;
        let entry = self.buffer.entry(offset);
        if entry.state() == State::Free {
            return Err(FreeError::DoubleFreeDetected);
        }

        self.used -= mem::size_of::<Entry>() + entry.size();
        self.buffer.write_entry(offset, Entry::free(entry.size()));
        Ok(())
    }

    /// Free a pointer inside a used memory block, or silently do nothing if
    /// `ptr` is null.
    ///
    /// Misuse detected by [`try_free()`](Self::try_free) invokes the
    /// debug-trap hook and is otherwise ignored: this function never panics,
    /// matching `GlobalAlloc::dealloc`'s contract.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if self.try_free(ptr).is_err() {
            trap();
        }
    }

    /// Resize a previously allocated block, preserving its contents.
    ///
    /// See the crate-level documentation for the two quirks this function
    /// deliberately preserves from its C ancestor: `new_size == 0` returns
    /// the just-freed (now dangling) pointer, and the in-place check compares
    /// against the unrounded `new_size`.
    pub fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Option<*mut u8> {
        if new_size == 0 {
            if !ptr.is_null() {
                self.free(ptr);
            }
            return Some(ptr);
        }

        let r = round_up(new_size);
        if r > self.max_request_size || r + self.used > N {
            return None;
        }
        if ptr.is_null() {
            return self.alloc(new_size).map(|m| m.as_mut_ptr().cast());
        }

        let offset = self.buffer.offset_of(ptr)?;
        let entry = self.buffer.entry(offset);
        if entry.size() > new_size {
            return Some(ptr);
        }

        let dest = self.place(r)?;
        let new_ptr = self.buffer.memory_mut(dest).as_mut_ptr().cast::<u8>();
        let copy_len = entry.size().min(r);
        // SAFETY: `ptr` and `new_ptr` both point into this allocator's own
        // buffer, each with at least `copy_len` readable/writable bytes; the
        // two regions may not overlap (the destination was just placed from
        // a free block, the source is still marked used), but `copy` is used
        // rather than `copy_nonoverlapping` anyway to match the reference's
        // `memmove` and stay correct if that assumption is ever revisited.
        unsafe { core::ptr::copy(ptr, new_ptr, copy_len) };
        self.free(ptr);
        Some(new_ptr)
    }

    /// Check that the heap's internal bookkeeping is consistent.
    ///
    /// Recomputes the used/free totals from a full sweep and cross-checks
    /// them against the live `used` counter and the buffer's total size. On
    /// any mismatch, the debug-trap hook is invoked before returning `false`.
    pub fn validate(&self) -> bool {
        if self.used > N {
            trap();
            return false;
        }

        let header_size = mem::size_of::<Entry>();
        let mut used = 0;
        let mut free = 0;
        for offset in self.buffer.entries() {
            let entry = self.buffer.entry(offset);
            let block = header_size + entry.size();
            match entry.state() {
                State::Used => used += block,
                State::Free => free += block,
            }
        }

        if used + free != N {
            trap();
            return false;
        }
        if used != self.used {
            trap();
            return false;
        }
        true
    }

    /// Write a human-readable block table to `w`.
    pub fn dump(&self, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(w, "implicit heap: {N} bytes, {} used", self.used)?;
        for offset in self.buffer.entries() {
            let entry = self.buffer.entry(offset);
            writeln!(w, "  [{:?}] size={}", entry.state(), entry.size())?;
        }
        Ok(())
    }
}
