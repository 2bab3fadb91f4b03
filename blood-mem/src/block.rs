//! Arena pages shared by [`BumpAllocator`](crate::bump::BumpAllocator) and
//! [`ConcurrentBumpAllocator`](crate::concurrent_bump::ConcurrentBumpAllocator).
//!
//! ## Layout
//!
//! A block is one raw allocation holding the data area followed by the
//! header:
//!
//! ```text
//! base                                  header
//!  |<----------- size bytes ----------->|<- MemoryBlock ->|
//!  [ used ..............| free ........ ][ next used size ]
//! ```
//!
//! The allocation is aligned to the block alignment, so `base` is aligned for
//! the first request that created the block. `size` is always a multiple of
//! the page size, which keeps the header naturally aligned. The base pointer is
//! recovered from the header address by subtracting `size`.

use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::align::align_up;
use crate::raw::RawAllocator;

/// Header of an arena page, stored directly after the page's data.
///
/// Every mutable field is atomic so the header is only ever touched through
/// `&MemoryBlock`: allocating threads may hold shared references to a block
/// while the lock holder relinks or resets it.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    /// Next block in whichever chain owns this block.
    next: AtomicPtr<MemoryBlock>,
    /// Bytes consumed from the start of the data area.
    used: AtomicUsize,
    /// Usable data bytes.
    size: usize,
    /// Alignment of the underlying raw allocation.
    align: usize,
}

/// Data size for a block that must satisfy a `size`-byte request.
///
/// Requests of at least one page get a dedicated block rounded up to whole
/// pages, so nothing past the request is wasted beyond the rounding.
pub(crate) fn block_size_for(size: usize, page_size: usize) -> usize {
    let wanted = size.max(page_size);
    match wanted.checked_add(page_size - 1) {
        Some(_) => align_up(wanted, page_size),
        None => panic!("capacity overflow: arena request of {size} bytes"),
    }
}

impl MemoryBlock {
    /// Allocate a block with `size` data bytes whose base is aligned to `align`.
    pub(crate) fn create(size: usize, align: usize) -> NonNull<MemoryBlock> {
        let align = align.max(mem::align_of::<MemoryBlock>());
        let total = match size.checked_add(mem::size_of::<MemoryBlock>()) {
            Some(total) => total,
            None => panic!("capacity overflow: arena block of {size} bytes"),
        };
        let base = RawAllocator::alloc(total, align);
        // SAFETY: `total` covers `size` data bytes plus the header, and `size`
        // is a multiple of the header alignment.
        unsafe {
            let header = base.as_ptr().add(size).cast::<MemoryBlock>();
            header.write(MemoryBlock {
                next: AtomicPtr::new(ptr::null_mut()),
                used: AtomicUsize::new(0),
                size,
                align,
            });
            NonNull::new_unchecked(header)
        }
    }

    /// Return the block's memory to the platform allocator.
    ///
    /// # Safety
    ///
    /// `block` must come from [`create`](Self::create) and must not be used
    /// afterwards.
    pub(crate) unsafe fn destroy(block: NonNull<MemoryBlock>) {
        let header = block.as_ref();
        let (size, align) = (header.size, header.align);
        let base = header.base();
        RawAllocator::free(
            NonNull::new_unchecked(base),
            size + mem::size_of::<MemoryBlock>(),
            align,
        );
    }

    /// Start of the data area.
    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        (self as *const MemoryBlock as *mut u8).wrapping_sub(self.size)
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut MemoryBlock {
        self.next.load(Ordering::Acquire)
    }

    /// Relink this block. Chain links only change under the owner's lock or
    /// with exclusive access.
    #[inline]
    pub(crate) fn set_next(&self, next: *mut MemoryBlock) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    pub(crate) fn reset(&self) {
        self.used.store(0, Ordering::Release);
    }

    /// New `used` value after placing `size` bytes at `align` on top of `used`,
    /// with the offset of the placement.
    #[inline]
    fn placement(&self, used: usize, size: usize, align: usize) -> Option<(usize, usize)> {
        let base = self.base() as usize;
        let start = align_up(base + used, align) - base;
        let end = start.checked_add(size)?;
        (end <= self.size).then_some((start, end))
    }

    /// Whether an empty block of this size can hold the request.
    pub(crate) fn fits_empty(&self, size: usize, align: usize) -> bool {
        self.placement(0, size, align).is_some()
    }

    /// Bump allocation for single-threaded owners.
    #[inline]
    pub(crate) fn try_bump(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let used = self.used.load(Ordering::Relaxed);
        let (start, end) = self.placement(used, size, align)?;
        self.used.store(end, Ordering::Relaxed);
        // SAFETY: `start <= size`, so the pointer stays inside the data area.
        Some(unsafe { NonNull::new_unchecked(self.base().add(start)) })
    }

    /// Bump allocation racing other threads on the same block.
    ///
    /// Each successful compare-exchange hands the claimed range to exactly one
    /// caller.
    #[inline]
    pub(crate) fn try_bump_atomic(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let (start, end) = self.placement(used, size, align)?;
            match self
                .used
                .compare_exchange_weak(used, end, Ordering::AcqRel, Ordering::Acquire)
            {
                // SAFETY: `start <= size`, so the pointer stays inside the data area.
                Ok(_) => return Some(unsafe { NonNull::new_unchecked(self.base().add(start)) }),
                Err(current) => used = current,
            }
        }
    }

    /// Offsets of `[ptr, ptr + size)` relative to the base, if the range is
    /// inside this block.
    #[inline]
    fn offsets_of(&self, ptr: *const u8, size: usize) -> Option<(usize, usize)> {
        let offset = (ptr as usize).checked_sub(self.base() as usize)?;
        let end = offset.checked_add(size)?;
        (end <= self.size).then_some((offset, end))
    }

    /// Roll back `used` if `[ptr, ptr + size)` is the most recent allocation.
    pub(crate) fn try_free_last(&self, ptr: *const u8, size: usize) -> bool {
        let Some((offset, end)) = self.offsets_of(ptr, size) else {
            return false;
        };
        if self.used.load(Ordering::Relaxed) != end {
            return false;
        }
        self.used.store(offset, Ordering::Relaxed);
        true
    }

    /// Atomic variant of [`try_free_last`](Self::try_free_last).
    pub(crate) fn try_free_last_atomic(&self, ptr: *const u8, size: usize) -> bool {
        let Some((offset, end)) = self.offsets_of(ptr, size) else {
            return false;
        };
        self.used
            .compare_exchange(end, offset, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Iterate a block chain starting at `first`.
///
/// # Safety
///
/// Every block reachable from `first` must stay alive and unlinked-from only by
/// the caller for the duration of the iteration.
pub(crate) unsafe fn chain(first: *mut MemoryBlock) -> impl Iterator<Item = NonNull<MemoryBlock>> {
    let mut cursor = first;
    std::iter::from_fn(move || {
        let block = NonNull::new(cursor)?;
        cursor = block.as_ref().next();
        Some(block)
    })
}

/// Free every block in a chain.
///
/// # Safety
///
/// The chain must be exclusively owned by the caller.
pub(crate) unsafe fn destroy_chain(first: *mut MemoryBlock) -> usize {
    let mut cursor = first;
    let mut freed = 0;
    while let Some(block) = NonNull::new(cursor) {
        cursor = block.as_ref().next();
        MemoryBlock::destroy(block);
        freed += 1;
    }
    freed
}

/// Move a chain onto the front of `list`, oldest block first, zeroing `used`.
///
/// Returns the new list head and the number of blocks moved.
///
/// # Safety
///
/// Both chains must be exclusively owned by the caller.
pub(crate) unsafe fn recycle_chain(
    newest: *mut MemoryBlock,
    mut list: *mut MemoryBlock,
) -> (*mut MemoryBlock, usize) {
    let mut cursor = newest;
    let mut moved = 0;
    while let Some(block) = NonNull::new(cursor) {
        let header = block.as_ref();
        cursor = header.next();
        header.reset();
        header.set_next(list);
        list = block.as_ptr();
        moved += 1;
    }
    (list, moved)
}

/// Unlink and return the first block in `list` that can hold the request.
///
/// # Safety
///
/// `list` must be exclusively owned by the caller.
pub(crate) unsafe fn take_fitting(
    list: &mut *mut MemoryBlock,
    size: usize,
    align: usize,
) -> Option<NonNull<MemoryBlock>> {
    let mut prev: Option<NonNull<MemoryBlock>> = None;
    let mut cursor = *list;
    while let Some(block) = NonNull::new(cursor) {
        let header = block.as_ref();
        cursor = header.next();
        if header.fits_empty(size, align) {
            match prev {
                Some(prev) => prev.as_ref().set_next(cursor),
                None => *list = cursor,
            }
            header.set_next(ptr::null_mut());
            header.reset();
            return Some(block);
        }
        prev = Some(block);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::is_ptr_aligned;

    #[test]
    fn test_block_size_for() {
        assert_eq!(block_size_for(1, 4096), 4096);
        assert_eq!(block_size_for(4096, 4096), 4096);
        assert_eq!(block_size_for(4097, 4096), 8192);
        assert_eq!(block_size_for(4096 * 2, 4096), 8192);
    }

    #[test]
    fn test_header_follows_data() {
        let block = MemoryBlock::create(4096, 64);
        unsafe {
            let header = block.as_ref();
            assert_eq!(header.size(), 4096);
            assert_eq!(header.used(), 0);
            assert_eq!(header.base().add(4096), block.as_ptr().cast::<u8>());
            assert!(is_ptr_aligned(header.base(), 64));
            MemoryBlock::destroy(block);
        }
    }

    #[test]
    fn test_bump_and_free_last() {
        let block = MemoryBlock::create(256, 8);
        unsafe {
            let header = block.as_ref();
            let a = header.try_bump(10, 8).unwrap();
            let b = header.try_bump(10, 8).unwrap();
            assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
            assert_eq!(header.used(), 26);

            // Only the most recent allocation can be rolled back.
            assert!(!header.try_free_last(a.as_ptr(), 10));
            assert!(header.try_free_last(b.as_ptr(), 10));
            assert_eq!(header.used(), 16);
            assert!(header.try_free_last(a.as_ptr(), 10));
            assert_eq!(header.used(), 0);

            assert!(header.try_bump(257, 8).is_none());
            MemoryBlock::destroy(block);
        }
    }

    #[test]
    fn test_atomic_bump() {
        let block = MemoryBlock::create(128, 16);
        unsafe {
            let header = block.as_ref();
            let a = header.try_bump_atomic(3, 1).unwrap();
            let b = header.try_bump_atomic(16, 16).unwrap();
            assert_eq!(a.as_ptr(), header.base());
            assert!(is_ptr_aligned(b.as_ptr(), 16));
            assert!(header.try_free_last_atomic(b.as_ptr(), 16));
            assert!(!header.try_free_last_atomic(b.as_ptr(), 16));
            MemoryBlock::destroy(block);
        }
    }

    #[test]
    fn test_recycle_and_take_fitting() {
        let small = MemoryBlock::create(64, 8);
        let large = MemoryBlock::create(512, 8);
        unsafe {
            // Chain newest-first: large -> small.
            large.as_ref().set_next(small.as_ptr());
            large.as_ref().try_bump(100, 8).unwrap();

            let (mut list, moved) = recycle_chain(large.as_ptr(), ptr::null_mut());
            assert_eq!(moved, 2);
            assert_eq!(list, small.as_ptr());
            assert_eq!(large.as_ref().used(), 0);

            let taken = take_fitting(&mut list, 200, 8).unwrap();
            assert_eq!(taken, large);
            assert_eq!(list, small.as_ptr());
            assert!(take_fitting(&mut list, 200, 8).is_none());

            MemoryBlock::destroy(taken);
            assert_eq!(destroy_chain(list), 1);
        }
    }

    #[test]
    fn test_relink_keeps_shared_refs_valid() {
        let a = MemoryBlock::create(64, 8);
        let b = MemoryBlock::create(128, 8);
        let c = MemoryBlock::create(128, 8);
        unsafe {
            // An allocating thread keeps its reference across a reset.
            let held = b.as_ref();
            held.try_bump_atomic(64, 8).unwrap();

            c.as_ref().set_next(b.as_ptr());
            b.as_ref().set_next(a.as_ptr());
            let (mut list, moved) = recycle_chain(c.as_ptr(), ptr::null_mut());
            assert_eq!(moved, 3);
            assert_eq!(list, a.as_ptr());
            assert_eq!(held.used(), 0);
            assert_eq!(held.next(), c.as_ptr());

            // `a` is too small, so `b` is unlinked from the middle.
            held.try_bump_atomic(8, 8).unwrap();
            let taken = take_fitting(&mut list, 100, 8).unwrap();
            assert_eq!(taken, b);
            assert!(held.next().is_null());
            assert_eq!(held.used(), 0);
            assert_eq!(list, a.as_ptr());
            assert_eq!(a.as_ref().next(), c.as_ptr());

            assert_eq!(held.try_bump_atomic(8, 8).map(|p| p.as_ptr()), Some(held.base()));
            MemoryBlock::destroy(taken);
            assert_eq!(destroy_chain(list), 2);
        }
    }
}
