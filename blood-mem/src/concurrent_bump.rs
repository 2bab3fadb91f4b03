//! # Concurrent Bump Allocator
//!
//! The thread-safe counterpart of [`BumpAllocator`](crate::bump::BumpAllocator).
//!
//! ## Fast path
//!
//! Allocation reads the current `tail` block and claims a range from it with
//! a compare-and-swap loop on the block's `used` counter. No lock is taken
//! while the tail has room, and each CAS hands its range to exactly one
//! thread.
//!
//! ## Slow path
//!
//! When the tail is full, the thread takes the page lock to install a new
//! tail. While waiting it keeps watching `tail`: if another thread installs a
//! new block in the meantime, it gives up on the lock and retries the fast
//! path instead of creating a second page. After acquiring the lock it checks
//! once more for the same reason.
//!
//! ## Reset and release
//!
//! [`reset`](ConcurrentBumpAllocator::reset) takes the lock unconditionally
//! and may race with allocations in flight: no memory is freed, so racing
//! threads stay memory-safe, but which of their allocations survive the reset
//! is unspecified. [`release_all`](ConcurrentBumpAllocator::release_all)
//! frees pages and therefore requires exclusive access.

use std::alloc::Layout;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

use crate::align::check_alignment;
use crate::block::{self, MemoryBlock};
use crate::config;
use crate::error::Result;
use crate::log::{self, LogBuilder, LogLevel};
use crate::sync::SpinLock;

/// Arena allocator safe to share between threads.
pub struct ConcurrentBumpAllocator {
    tail: CachePadded<AtomicPtr<MemoryBlock>>,
    /// Only touched while `lock` is held.
    free_list: AtomicPtr<MemoryBlock>,
    lock: SpinLock,
    page_size: usize,
    default_align: usize,
}

impl ConcurrentBumpAllocator {
    /// Create an empty arena using the configured page size.
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
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            free_list: AtomicPtr::new(ptr::null_mut()),
            lock: SpinLock::new(),
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
    /// Never fails; an out-of-memory condition aborts.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two; see
    /// [`try_alloc`](Self::try_alloc) for the checked form.
    pub fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        match self.try_alloc(size, align) {
            Ok(ptr) => ptr,
            Err(err) => panic!("{err}"),
        }
    }

    /// Allocate `size` bytes aligned to `align`, rejecting an alignment that
    /// is not a power of two with
    /// [`MemoryError::InvalidAlignment`](crate::error::MemoryError::InvalidAlignment).
    pub fn try_alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let align = check_alignment(align)?;
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: blocks are only freed through `&mut self`.
            if let Some(block) = unsafe { tail.as_ref() } {
                if let Some(ptr) = block.try_bump_atomic(size, align) {
                    return Ok(ptr);
                }
            }
            self.grow(tail, size, align);
        }
    }

    /// Allocate `size` bytes at the configured default alignment.
    pub fn alloc_default(&self, size: usize) -> NonNull<u8> {
        self.alloc(size, self.default_align)
    }

    /// Allocate for a [`Layout`].
    pub fn alloc_layout(&self, layout: Layout) -> NonNull<u8> {
        self.alloc(layout.size(), layout.align())
    }

    /// Move `value` into the arena. The value is never dropped by the arena.
    pub fn alloc_value<T>(&self, value: T) -> NonNull<T> {
        let ptr = self.alloc_layout(Layout::new::<T>()).cast::<T>();
        // SAFETY: freshly allocated, sized and aligned for T, owned by this thread.
        unsafe { ptr.as_ptr().write(value) };
        ptr
    }

    /// Reclaim `[ptr, ptr + size)` if it is still the most recent allocation
    /// of the current block.
    pub fn free(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        // SAFETY: blocks are only freed through `&mut self`.
        match unsafe { tail.as_ref() } {
            Some(block) => block.try_free_last_atomic(ptr.as_ptr(), size),
            None => false,
        }
    }

    /// Forget every allocation, keeping the pages for reuse.
    pub fn reset(&self) {
        let _guard = self.lock.lock();
        let chain = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        if chain.is_null() {
            return;
        }
        // SAFETY: chain links and the free list only change under the lock.
        let (free_list, moved) =
            unsafe { block::recycle_chain(chain, self.free_list.load(Ordering::Relaxed)) };
        self.free_list.store(free_list, Ordering::Relaxed);
        LogBuilder::new(LogLevel::Debug, "concurrent_bump")
            .message("reset")
            .field_int("recycled_blocks", moved as i64)
            .emit();
    }

    /// Return every page to the OS. Idempotent.
    pub fn release_all(&mut self) {
        let tail = std::mem::replace(self.tail.get_mut(), ptr::null_mut());
        let free_list = std::mem::replace(self.free_list.get_mut(), ptr::null_mut());
        // SAFETY: `&mut self` guarantees no other thread holds a block.
        let freed = unsafe { block::destroy_chain(tail) + block::destroy_chain(free_list) };
        if freed > 0 {
            LogBuilder::new(LogLevel::Debug, "concurrent_bump")
                .message("released all blocks")
                .field_int("blocks", freed as i64)
                .emit();
        }
    }

    /// Number of blocks in the active chain.
    pub fn block_count(&self) -> usize {
        let _guard = self.lock.lock();
        // SAFETY: links only change under the lock.
        unsafe { block::chain(self.tail.load(Ordering::Acquire)).count() }
    }

    /// Number of recycled blocks waiting for reuse.
    pub fn free_block_count(&self) -> usize {
        let _guard = self.lock.lock();
        // SAFETY: the free list only changes under the lock.
        unsafe { block::chain(self.free_list.load(Ordering::Relaxed)).count() }
    }

    /// Bytes consumed in the active chain, including alignment padding.
    pub fn allocated_bytes(&self) -> usize {
        let _guard = self.lock.lock();
        // SAFETY: links only change under the lock.
        unsafe {
            block::chain(self.tail.load(Ordering::Acquire))
                .map(|b| b.as_ref().used())
                .sum()
        }
    }

    /// Data bytes reserved by every block, active or recycled.
    pub fn reserved_bytes(&self) -> usize {
        let _guard = self.lock.lock();
        // SAFETY: links only change under the lock.
        unsafe {
            block::chain(self.tail.load(Ordering::Acquire))
                .chain(block::chain(self.free_list.load(Ordering::Relaxed)))
                .map(|b| b.as_ref().size())
                .sum()
        }
    }

    /// Install a new tail unless another thread already replaced `observed`.
    fn grow(&self, observed: *mut MemoryBlock, size: usize, align: usize) {
        let tail_moved = || self.tail.load(Ordering::Acquire) != observed;
        let Some(_guard) = self.lock.lock_unless(tail_moved) else {
            return;
        };
        if tail_moved() {
            return;
        }

        let mut free_list = self.free_list.load(Ordering::Relaxed);
        // SAFETY: the free list only changes under the lock.
        let reused = unsafe { block::take_fitting(&mut free_list, size, align) };
        self.free_list.store(free_list, Ordering::Relaxed);

        let block = match reused {
            Some(block) => {
                log_page("reused page", block, size);
                block
            }
            None => {
                let block = MemoryBlock::create(block::block_size_for(size, self.page_size), align);
                log_page("created page", block, size);
                block
            }
        };

        // SAFETY: `block` is not yet visible to other threads.
        unsafe { block.as_ref().set_next(observed) };
        self.tail.store(block.as_ptr(), Ordering::Release);
    }
}

fn log_page(message: &'static str, block: NonNull<MemoryBlock>, request: usize) {
    if log::would_log(LogLevel::Debug) {
        // SAFETY: the caller holds a live block.
        let header = unsafe { block.as_ref() };
        LogBuilder::new(LogLevel::Debug, "concurrent_bump")
            .message(message)
            .field_bytes("size", header.size())
            .field_bytes("request", request)
            .field_addr("base", header.base() as usize)
            .emit();
    }
}

impl Default for ConcurrentBumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConcurrentBumpAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for ConcurrentBumpAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentBumpAllocator")
            .field("page_size", &self.page_size)
            .field("blocks", &self.block_count())
            .field("free_blocks", &self.free_block_count())
            .finish()
    }
}
