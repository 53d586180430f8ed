//! The free-list raw allocator: a doubly-linked LIFO free list threaded
//! through the free blocks, first-fit placement via a list walk.
mod buffer;
mod entry;
use entry::Entry;

use core::mem::{self, MaybeUninit};

use super::{round_up, trap, FreeError, State, MIN_PAYLOAD};

/// A raw memory allocator backed by a `N`-byte buffer, using an explicit
/// doubly-linked free list to find free blocks.
///
/// Like [`crate::raw_allocator::implicit::RawAllocator`], this allocator does
/// not concern itself with the alignment of a [`Layout`](core::alloc::Layout)
/// (see [`crate::ExplicitAllocator`] for that). Allocated memory is always
/// aligned to 8.
///
/// # Algorithm
/// Free blocks are threaded into a doubly-linked list via `prev`/`next`
/// fields in their header, rooted at `free_head`. An allocation walks this
/// list (instead of the whole buffer) looking for the first entry whose
/// payload fits (first-fit). Splitting a block large enough to leave a
/// useful remainder replaces the consumed node in the list with the smaller
/// leftover node, inheriting its links; otherwise the whole node is unlinked.
/// Freeing a block inserts it back at the head of the list (LIFO) and, if its
/// immediate right neighbor in address order is also free, merges the two
/// into a single larger free block first. There is no left-coalescing: a
/// block is only ever merged with the neighbor that follows it.
pub struct RawAllocator<const N: usize> {
    buffer: buffer::Buffer<N>,
    used: usize,
    free_bytes: usize,
    free_head: Option<usize>,
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

        Self {
            buffer: buffer::Buffer::new(),
            used: 0,
            free_bytes: N,
            free_head: Some(0),
            max_request_size,
        }
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

    /// Walk the free list for the first node (head to tail) whose payload is
    /// at least `r` bytes, if any.
    fn find_fit(&self, r: usize) -> Option<usize> {
        let mut current = self.free_head;
        while let Some(offset) = current {
            let entry = self.buffer.entry(offset);
            if entry.size() >= r {
                return Some(offset);
            }
            current = entry.next();
        }
        None
    }

    /// Remove the free node at `offset` from the list, patching its
    /// neighbors' links (or `free_head`, if it was the head).
    fn unlink(&mut self, offset: usize) {
        let entry = self.buffer.entry(offset);
        let prev = entry.prev();
        let next = entry.next();

        match prev {
            Some(prev_offset) => {
                self.buffer.update_entry(prev_offset, |e| e.with_links(e.prev(), next))
            }
            None => self.free_head = next,
        }
        if let Some(next_offset) = next {
            self.buffer.update_entry(next_offset, |e| e.with_links(prev, e.next()));
        }
    }

    /// Insert the free node at `offset` at the head of the list.
    fn insert_front(&mut self, offset: usize) {
        let old_head = self.free_head;
        if let Some(old_head_offset) = old_head {
            self.buffer.update_entry(old_head_offset, |e| e.with_links(Some(offset), e.next()));
        }
        self.buffer.update_entry(offset, |e| e.with_links(None, old_head));
        self.free_head = Some(offset);
    }

    /// Place a rounded request of `r` bytes, splitting or absorbing the
    /// chosen free-list node as appropriate, and return its offset.
    fn place(&mut self, r: usize) -> Option<usize> {
        let offset = self.find_fit(r)?;
        let entry = self.buffer.entry(offset);
        let payload = entry.size();
        let header_size = mem::size_of::<Entry>();
        let prev = entry.prev();
        let next = entry.next();

        if payload - r > header_size + MIN_PAYLOAD {
            let remainder_offset = offset + header_size + r;
            let remainder_size = payload - r - header_size;

            self.buffer.write_entry(offset, Entry::used(r));
            self.buffer
                .write_entry(remainder_offset, Entry::free(remainder_size).with_links(prev, next));
            match prev {
                Some(prev_offset) => {
                    self.buffer.update_entry(prev_offset, |e| e.with_links(e.prev(), Some(remainder_offset)))
                }
                None => self.free_head = Some(remainder_offset),
            }
            if let Some(next_offset) = next {
                self.buffer
                    .update_entry(next_offset, |e| e.with_links(Some(remainder_offset), e.next()));
            }
            self.used += header_size + r;
            self.free_bytes -= header_size + r;
        } else {
            self.unlink(offset);
            self.buffer.write_entry(offset, Entry::used(payload));
            self.used += header_size + payload;
            self.free_bytes -= header_size + payload;
        }
        Some(offset)
    }

    /// Allocate a new memory block of size `n`.
    ///
    /// Returns `None` if `n` is zero, if the rounded request exceeds the
    /// configured request-size ceiling, or if no free-list node is large
    /// enough.
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
    /// arithmetic. If no such header exists,
    /// [`FreeError::AllocationNotFound`] is reported; if the block is already
    /// free, [`FreeError::DoubleFreeDetected`] is reported. Otherwise, if the
    /// block's right neighbor (in address order) is free, the two are merged
    /// into one free block, which inherits the right neighbor's list
    /// position (its `prev`/`next` links, and `free_head` if the right
    /// neighbor was the head) rather than moving to the front. If there is no
    /// free right neighbor to merge with, the freed block is inserted at the
    /// head of the free list instead.
    pub fn try_free(&mut self, ptr: *mut u8) -> Result<(), FreeError> {
        let offset = self.buffer.offset_of(ptr).ok_or(FreeError::AllocationNotFound)?;
        let entry = self.buffer.entry(offset);
        if entry.state() == State::Free {
            return Err(FreeError::DoubleFreeDetected);
        }

        let header_size = mem::size_of::<Entry>();
        let region = header_size + entry.size();
        self.used -= region;
        self.free_bytes += region;

        let right_offset = offset + region;
        let has_right_neighbor = right_offset + header_size <= N;
        if has_right_neighbor && self.buffer.entry(right_offset).state() == State::Free {
            let right = self.buffer.entry(right_offset);
            let merged_size = entry.size() + header_size + right.size();
            let prev = right.prev();
            let next = right.next();

            self.buffer.write_entry(offset, Entry::free(merged_size).with_links(prev, next));
            match prev {
                Some(prev_offset) => {
                    self.buffer.update_entry(prev_offset, |e| e.with_links(e.prev(), Some(offset)))
                }
                None => self.free_head = Some(offset),
            }
            if let Some(next_offset) = next {
                self.buffer.update_entry(next_offset, |e| e.with_links(Some(offset), e.next()));
            }
        } else {
            self.buffer.write_entry(offset, Entry::free(entry.size()));
            self.insert_front(offset);
        }
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
    /// `new_size == 0` frees the block and returns the just-freed (now
    /// dangling) pointer, matching the crate's other variant.
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
        if entry.size() >= r {
            return Some(ptr);
        }

        let dest = self.place(r)?;
        let new_ptr = self.buffer.memory_mut(dest).as_mut_ptr().cast::<u8>();
        let copy_len = entry.size().min(r);
        // SAFETY: see the implicit variant's `realloc`; the same argument
        // applies here.
        unsafe { core::ptr::copy(ptr, new_ptr, copy_len) };
        self.free(ptr);
        Some(new_ptr)
    }

    /// Check that the heap's internal bookkeeping is consistent.
    ///
    /// Recomputes used/free totals from a full address-order sweep and
    /// cross-checks them against the live counters, then walks the free list
    /// (bounded by a step budget derived from the smallest possible block
    /// count, to guard against a cyclic list) and cross-checks its total
    /// against the same free-byte count. On any mismatch, the debug-trap hook
    /// is invoked before returning `false`.
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

        if used + free != N || used != self.used {
            trap();
            return false;
        }

        let mut walked = 0;
        let mut current = self.free_head;
        let mut steps = 0;
        let max_steps = N / header_size + 1;
        while let Some(offset) = current {
            steps += 1;
            if steps > max_steps {
                trap();
                return false;
            }
            let entry = self.buffer.entry(offset);
            walked += header_size + entry.size();
            current = entry.next();
        }

        if walked != free || free != self.free_bytes {
            trap();
            return false;
        }
        true
    }

    /// Write a human-readable block table to `w`.
    pub fn dump(&self, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(w, "explicit heap: {N} bytes, {} used, {} free", self.used, self.free_bytes)?;
        for offset in self.buffer.entries() {
            let entry = self.buffer.entry(offset);
            match entry.state() {
                State::Used => writeln!(w, "  [Used] size={}", entry.size())?,
                State::Free => writeln!(
                    w,
                    "  [Free] size={} prev={:?} next={:?}",
                    entry.size(),
                    entry.prev(),
                    entry.next()
                )?,
            }
        }
        Ok(())
    }
}
