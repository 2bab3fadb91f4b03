//! Raw aligned allocation over the platform allocator.
//!
//! [`RawAllocator`] is the single entry point every container and arena uses
//! to obtain memory. It never returns null: allocation failure is routed to
//! [`alloc::handle_alloc_error`], which aborts the process. Zero-sized
//! requests return a dangling, correctly aligned pointer and are never passed
//! to the platform allocator.
//!
//! Callers are responsible for remembering the `(size, align)` pair of every
//! allocation and handing the same pair back on `realloc`/`free`; the
//! allocator keeps no bookkeeping of its own.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;

/// Stateless wrapper over the global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawAllocator;

/// Build a layout or panic with the same message `Vec` uses on overflow.
#[inline]
fn layout_for(size: usize, align: usize) -> Layout {
    match Layout::from_size_align(size, align) {
        Ok(layout) => layout,
        Err(_) => panic!("capacity overflow: {size} bytes with alignment {align}"),
    }
}

#[inline]
fn dangling(align: usize) -> NonNull<u8> {
    // SAFETY: `align` is a non-zero power of two, so the address is non-null.
    unsafe { NonNull::new_unchecked(align as *mut u8) }
}

impl RawAllocator {
    /// Allocate `size` bytes aligned to `align`.
    ///
    /// The returned memory is uninitialized.
    pub fn alloc(size: usize, align: usize) -> NonNull<u8> {
        let layout = layout_for(size, align);
        if size == 0 {
            return dangling(align);
        }
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    /// Allocate `size` zeroed bytes aligned to `align`.
    pub fn alloc_zeroed(size: usize, align: usize) -> NonNull<u8> {
        let layout = layout_for(size, align);
        if size == 0 {
            return dangling(align);
        }
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    /// Resize an allocation, preserving the first `min(old_size, new_size)` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for exactly
    /// `(old_size, align)` and not freed since.
    pub unsafe fn realloc(
        ptr: NonNull<u8>,
        old_size: usize,
        align: usize,
        new_size: usize,
    ) -> NonNull<u8> {
        if old_size == 0 {
            return Self::alloc(new_size, align);
        }
        if new_size == 0 {
            Self::free(ptr, old_size, align);
            return dangling(align);
        }
        let old_layout = layout_for(old_size, align);
        let new_layout = layout_for(new_size, align);
        let new_ptr = alloc::realloc(ptr.as_ptr(), old_layout, new_size);
        NonNull::new(new_ptr).unwrap_or_else(|| alloc::handle_alloc_error(new_layout))
    }

    /// Return an allocation to the platform allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for exactly
    /// `(size, align)` and not freed since.
    pub unsafe fn free(ptr: NonNull<u8>, size: usize, align: usize) {
        if size == 0 {
            return;
        }
        alloc::dealloc(ptr.as_ptr(), layout_for(size, align));
    }

    /// Allocate uninitialized storage for `count` values of `T`.
    pub fn alloc_array<T>(count: usize) -> NonNull<T> {
        let size = array_bytes::<T>(count);
        if size == 0 {
            return NonNull::dangling();
        }
        Self::alloc(size, mem::align_of::<T>()).cast()
    }

    /// Resize an array allocation from `old_count` to `new_count` elements.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`alloc_array`](Self::alloc_array) or
    /// [`realloc_array`](Self::realloc_array) with `old_count` elements.
    pub unsafe fn realloc_array<T>(ptr: NonNull<T>, old_count: usize, new_count: usize) -> NonNull<T> {
        let old_size = array_bytes::<T>(old_count);
        let new_size = array_bytes::<T>(new_count);
        if new_size == 0 {
            Self::free_array(ptr, old_count);
            return NonNull::dangling();
        }
        if old_size == 0 {
            return Self::alloc_array(new_count);
        }
        Self::realloc(ptr.cast(), old_size, mem::align_of::<T>(), new_size).cast()
    }

    /// Free an array allocation. Elements are not dropped.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`alloc_array`](Self::alloc_array) or
    /// [`realloc_array`](Self::realloc_array) with `count` elements.
    pub unsafe fn free_array<T>(ptr: NonNull<T>, count: usize) {
        let size = array_bytes::<T>(count);
        if size != 0 {
            Self::free(ptr.cast(), size, mem::align_of::<T>());
        }
    }
}

#[inline]
fn array_bytes<T>(count: usize) -> usize {
    match mem::size_of::<T>().checked_mul(count) {
        Some(bytes) => bytes,
        None => panic!("capacity overflow: {count} elements"),
    }
}
