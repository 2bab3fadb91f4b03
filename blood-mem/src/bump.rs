//! # Bump Allocator
//!
//! A single-threaded arena that carves allocations out of page-sized
//! [`MemoryBlock`]s with a bump pointer.
//!
//! ## Block chain
//!
//! ```text
//! tail (newest) --next--> ... --next--> oldest
//! free_list     --next--> ...           (recycled by reset, oldest first)
//! ```
//!
//! Allocation only ever looks at `tail`. When it is full, the first block on
//! the free list that can hold the request is reused, otherwise a new block is
//! created; either way the block becomes the new `tail`.
//!
//! ## Freeing
//!
//! [`free`](BumpAllocator::free) only reclaims the most recent allocation of
//! the current block; anything else is ignored. [`reset`](BumpAllocator::reset)
//! recycles every page without returning memory to the OS, and
//! [`release_all`](BumpAllocator::release_all) returns it.
//!
//! Pointers handed out carry no lifetime: using one after `reset` or
//! `release_all` is the caller's bug.

use std::alloc::Layout;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use crate::align::check_alignment;
use crate::block::{self, MemoryBlock};
use crate::config;
use crate::error::Result;
use crate::log::{self, LogBuilder, LogLevel};
use crate::span::UnsafeSpan;

/// Single-threaded arena allocator.
pub struct BumpAllocator {
    tail: *mut MemoryBlock,
    free_list: *mut MemoryBlock,
    page_size: usize,
    default_align: usize,
}

// SAFETY: the allocator exclusively owns every block it links to.
unsafe impl Send for BumpAllocator {}

impl BumpAllocator {
    /// Create an empty arena using the configured page size.
    ///
    /// No memory is reserved until the first allocation.
    pub fn new() -> Self {
        let config = config::config();
        Self::with_page_size_and_alignment(config.page_size, config.default_alignment)
    }

    /// Create an empty arena with an explicit page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two of at least
    /// [`MIN_PAGE_SIZE`](config::MIN_PAGE_SIZE) bytes.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::with_page_size_and_alignment(page_size, config::config().default_alignment)
    }

    fn with_page_size_and_alignment(page_size: usize, default_align: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && page_size >= config::MIN_PAGE_SIZE,
            "page size {page_size} is not a power of two of at least {}",
            config::MIN_PAGE_SIZE
        );
        Self {
            tail: ptr::null_mut(),
            free_list: ptr::null_mut(),
            page_size,
            default_align,
        }
    }

    /// Page size used for new blocks.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Never fails: the arena grows until the request fits, and an
    /// out-of-memory condition aborts.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two; see
    /// [`try_alloc`](Self::try_alloc) for the checked form.
    pub fn alloc(&mut self, size: usize, align: usize) -> NonNull<u8> {
        match self.try_alloc(size, align) {
            Ok(ptr) => ptr,
            Err(err) => panic!("{err}"),
        }
    }

    /// Allocate `size` bytes aligned to `align`, rejecting an alignment that
    /// is not a power of two with
    /// [`MemoryError::InvalidAlignment`](crate::error::MemoryError::InvalidAlignment).
    pub fn try_alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let align = check_alignment(align)?;
        loop {
            // SAFETY: `tail` is null or a live block owned by this arena.
            if let Some(tail) = unsafe { self.tail.as_ref() } {
                if let Some(ptr) = tail.try_bump(size, align) {
                    return Ok(ptr);
                }
            }
            self.push_block(size, align);
        }
    }

    /// Allocate `size` bytes at the configured default alignment.
    pub fn alloc_default(&mut self, size: usize) -> NonNull<u8> {
        self.alloc(size, self.default_align)
    }

    /// Allocate for a [`Layout`].
    pub fn alloc_layout(&mut self, layout: Layout) -> NonNull<u8> {
        self.alloc(layout.size(), layout.align())
    }

    /// Move `value` into the arena.
    ///
    /// The value is never dropped by the arena.
    pub fn alloc_value<T>(&mut self, value: T) -> NonNull<T> {
        let ptr = self.alloc_layout(Layout::new::<T>()).cast::<T>();
        // SAFETY: freshly allocated, sized and aligned for T.
        unsafe { ptr.as_ptr().write(value) };
        ptr
    }

    /// Copy a slice into the arena and return a view over the copy.
    pub fn alloc_slice_copy<T: Copy>(&mut self, src: &[T]) -> UnsafeSpan<T> {
        let ptr = self
            .alloc(mem::size_of_val(src), mem::align_of::<T>())
            .cast::<T>();
        // SAFETY: the destination was just allocated for `src.len()` elements
        // and cannot overlap `src`.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            UnsafeSpan::from_raw_parts(ptr.as_ptr(), src.len())
        }
    }

    /// Reclaim `[ptr, ptr + size)` if it is the most recent allocation.
    ///
    /// Returns whether anything was reclaimed. Any other pointer is ignored.
    pub fn free(&mut self, ptr: NonNull<u8>, size: usize) -> bool {
        // SAFETY: `tail` is null or a live block owned by this arena.
        match unsafe { self.tail.as_ref() } {
            Some(tail) => tail.try_free_last(ptr.as_ptr(), size),
            None => false,
        }
    }

    /// Forget every allocation, keeping the pages for reuse.
    ///
    /// Allocating the same sequence of sizes after a reset returns the same
    /// addresses.
    pub fn reset(&mut self) {
        if self.tail.is_null() {
            return;
        }
        // SAFETY: the chain and the free list are exclusively owned.
        let (free_list, moved) = unsafe { block::recycle_chain(self.tail, self.free_list) };
        self.free_list = free_list;
        self.tail = ptr::null_mut();
        LogBuilder::new(LogLevel::Debug, "bump")
            .message("reset")
            .field_int("recycled_blocks", moved as i64)
            .emit();
    }

    /// Return every page to the OS. Idempotent.
    pub fn release_all(&mut self) {
        // SAFETY: both chains are exclusively owned and unlinked below.
        let freed = unsafe { block::destroy_chain(self.tail) + block::destroy_chain(self.free_list) };
        self.tail = ptr::null_mut();
        self.free_list = ptr::null_mut();
        if freed > 0 {
            LogBuilder::new(LogLevel::Debug, "bump")
                .message("released all blocks")
                .field_int("blocks", freed as i64)
                .emit();
        }
    }

    /// Number of blocks in the active chain.
    pub fn block_count(&self) -> usize {
        // SAFETY: the chain is owned and not mutated while iterating.
        unsafe { block::chain(self.tail).count() }
    }

    /// Number of recycled blocks waiting for reuse.
    pub fn free_block_count(&self) -> usize {
        // SAFETY: as above.
        unsafe { block::chain(self.free_list).count() }
    }

    /// Bytes consumed in the active chain, including alignment padding.
    pub fn allocated_bytes(&self) -> usize {
        // SAFETY: as above.
        unsafe { block::chain(self.tail).map(|b| b.as_ref().used()).sum() }
    }

    /// Data bytes reserved by every block, active or recycled.
    pub fn reserved_bytes(&self) -> usize {
        // SAFETY: as above.
        unsafe {
            block::chain(self.tail)
                .chain(block::chain(self.free_list))
                .map(|b| b.as_ref().size())
                .sum()
        }
    }

    /// Make a block that can hold the request the new tail.
    fn push_block(&mut self, size: usize, align: usize) {
        // SAFETY: the free list is exclusively owned.
        let block = match unsafe { block::take_fitting(&mut self.free_list, size, align) } {
            Some(block) => {
                if log::would_log(LogLevel::Debug) {
                    // SAFETY: `block` is live.
                    let header = unsafe { block.as_ref() };
                    LogBuilder::new(LogLevel::Debug, "bump")
                        .message("reused page")
                        .field_bytes("size", header.size())
                        .field_addr("base", header.base() as usize)
                        .emit();
                }
                block
            }
            None => {
                let block_size = block::block_size_for(size, self.page_size);
                let block = MemoryBlock::create(block_size, align);
                if log::would_log(LogLevel::Debug) {
                    // SAFETY: `block` is live.
                    let header = unsafe { block.as_ref() };
                    LogBuilder::new(LogLevel::Debug, "bump")
                        .message("created page")
                        .field_bytes("size", block_size)
                        .field_bytes("request", size)
                        .field_addr("base", header.base() as usize)
                        .emit();
                }
                block
            }
        };
        // SAFETY: `block` is unlinked and owned by us from here on.
        unsafe { block.as_ref().set_next(self.tail) };
        self.tail = block.as_ptr();
    }
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BumpAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for BumpAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BumpAllocator")
            .field("page_size", &self.page_size)
            .field("blocks", &self.block_count())
            .field("free_blocks", &self.free_block_count())
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::is_ptr_aligned;
    use crate::error::MemoryError;

    #[test]
    fn test_no_memory_until_first_alloc() {
        let arena = BumpAllocator::with_page_size(4096);
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.reserved_bytes(), 0);
    }

    #[test]
    fn test_sequential_allocations_do_not_overlap() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let a = arena.alloc(24, 8).as_ptr() as usize;
        let b = arena.alloc(24, 8).as_ptr() as usize;
        assert!(b >= a + 24);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.allocated_bytes(), 48);
    }

    #[test]
    fn test_alignment() {
        let mut arena = BumpAllocator::with_page_size(4096);
        for &align in &[8, 16, 32, 64, 128, 256, 4096] {
            arena.alloc(1, 1);
            let ptr = arena.alloc(40, align);
            assert!(is_ptr_aligned(ptr.as_ptr(), align), "align {align}");
        }
    }

    #[test]
    fn test_reset_reuses_same_address() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let first = arena.alloc(64, 8);
        arena.reset();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.free_block_count(), 1);
        let second = arena.alloc(64, 8);
        assert_eq!(first, second);
        assert_eq!(arena.free_block_count(), 0);
    }

    #[test]
    fn test_reset_reuses_pages_in_order() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let first: Vec<_> = (0..3).map(|_| arena.alloc(4000, 8)).collect();
        assert_eq!(arena.block_count(), 3);
        arena.reset();
        let second: Vec<_> = (0..3).map(|_| arena.alloc(4000, 8)).collect();
        assert_eq!(first, second);
        assert_eq!(arena.reserved_bytes(), 3 * 4096);
    }

    #[test]
    fn test_oversized_allocation_gets_dedicated_page() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let size = 4096 * 2;
        let ptr = arena.alloc(size, 8);
        unsafe {
            for i in 0..size {
                *ptr.as_ptr().add(i) = (i % 251) as u8;
            }
            for i in 0..size {
                assert_eq!(*ptr.as_ptr().add(i), (i % 251) as u8);
            }
        }
        assert_eq!(arena.reserved_bytes(), size);
    }

    #[test]
    fn test_free_only_reclaims_last() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let a = arena.alloc(32, 8);
        let b = arena.alloc(32, 8);
        assert!(!arena.free(a, 32));
        assert!(arena.free(b, 32));
        assert_eq!(arena.allocated_bytes(), 32);
        let c = arena.alloc(32, 8);
        assert_eq!(b, c);
    }

    #[test]
    fn test_try_alloc_rejects_bad_alignment() {
        let mut arena = BumpAllocator::with_page_size(4096);
        assert_eq!(arena.try_alloc(8, 0), Err(MemoryError::InvalidAlignment(0)));
        assert_eq!(arena.try_alloc(8, 24), Err(MemoryError::InvalidAlignment(24)));
        assert_eq!(arena.block_count(), 0);
        let ptr = arena.try_alloc(8, 64).unwrap();
        assert!(is_ptr_aligned(ptr.as_ptr(), 64));
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn test_alloc_panics_on_bad_alignment() {
        BumpAllocator::with_page_size(4096).alloc(8, 3);
    }

    #[test]
    fn test_free_on_empty_arena() {
        let mut arena = BumpAllocator::with_page_size(4096);
        assert!(!arena.free(NonNull::dangling(), 8));
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let mut arena = BumpAllocator::with_page_size(4096);
        arena.alloc(100, 8);
        arena.reset();
        arena.alloc(5000, 8);
        arena.release_all();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.free_block_count(), 0);
        arena.release_all();
        // Usable again afterwards.
        arena.alloc(8, 8);
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn test_typed_helpers() {
        let mut arena = BumpAllocator::with_page_size(4096);
        let value = arena.alloc_value(0xDEAD_BEEF_u64);
        assert_eq!(unsafe { *value.as_ptr() }, 0xDEAD_BEEF);
        assert!(is_ptr_aligned(value.as_ptr(), mem::align_of::<u64>()));

        let span = arena.alloc_slice_copy(&[1u32, 2, 3]);
        assert_eq!(span.len(), 3);
        assert_eq!(unsafe { span.as_slice() }, &[1, 2, 3]);

        let raw = arena.alloc_layout(Layout::from_size_align(10, 32).unwrap());
        assert!(is_ptr_aligned(raw.as_ptr(), 32));
    }
}
