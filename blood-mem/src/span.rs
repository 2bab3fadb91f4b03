//! Non-owning views over memory owned elsewhere.
//!
//! [`UnsafeSpan`] and [`StringSpan`] are a pointer and a length. They never
//! allocate, never free, and do not borrow their owner, so they can outlive
//! it: reading through a span whose owner has been reset, released or dropped
//! is undefined behavior, which is why every read is `unsafe`. Copying a span
//! copies the view, not the data.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::{MemoryError, Result};
use crate::string::CharUnit;

/// A view of `len` consecutive `T`s.
pub struct UnsafeSpan<T> {
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<*const T>,
}

impl<T> Clone for UnsafeSpan<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for UnsafeSpan<T> {}

impl<T> UnsafeSpan<T> {
    /// A span of length zero.
    pub const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// View `len` elements starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and aligned, and must point at `len`
    /// initialized elements for as long as the span is read.
    pub unsafe fn from_raw_parts(ptr: *const T, len: usize) -> Self {
        debug_assert!(!ptr.is_null());
        Self {
            ptr: NonNull::new_unchecked(ptr as *mut T),
            len,
            _marker: PhantomData,
        }
    }

    /// View an existing slice.
    ///
    /// The span does not borrow `slice`; the caller keeps the backing memory
    /// alive and unmoved while the span is used.
    pub fn from_slice(slice: &[T]) -> Self {
        // SAFETY: a slice pointer is non-null, aligned and covers `len` elements.
        unsafe { Self::from_raw_parts(slice.as_ptr(), slice.len()) }
    }

    /// View an existing slice that will be written through the span.
    ///
    /// Spans built with [`from_slice`](Self::from_slice) are read-only;
    /// [`as_mut_slice`](Self::as_mut_slice) requires this constructor (or
    /// [`from_raw_parts`](Self::from_raw_parts) over writable memory).
    pub fn from_mut_slice(slice: &mut [T]) -> Self {
        // SAFETY: as for `from_slice`, and the pointer carries write permission.
        unsafe { Self::from_raw_parts(slice.as_mut_ptr(), slice.len()) }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the viewed memory.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Start of the viewed memory as a non-null pointer.
    #[inline]
    pub fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// The viewed elements.
    ///
    /// # Safety
    ///
    /// The backing memory must still be alive and not mutated for `'a`.
    #[inline]
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// The viewed elements, mutably.
    ///
    /// # Safety
    ///
    /// The backing memory must be alive and writable, the span must have been
    /// built from a mutable source (not [`from_slice`](Self::from_slice)), and
    /// no other reference to it may exist for `'a`.
    #[inline]
    pub unsafe fn as_mut_slice<'a>(&mut self) -> &'a mut [T] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    /// Element `index`.
    ///
    /// # Safety
    ///
    /// As for [`as_slice`](Self::as_slice).
    pub unsafe fn get<'a>(&self, index: usize) -> Result<&'a T> {
        self.as_slice()
            .get(index)
            .ok_or(MemoryError::IndexOutOfRange { index, len: self.len })
    }

    /// Sub-view `start..start + count`.
    pub fn slice(&self, start: usize, count: usize) -> Result<Self> {
        match start.checked_add(count) {
            Some(end) if end <= self.len => Ok(Self {
                // SAFETY: `start <= len`, so the offset stays in the view.
                ptr: unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(start)) },
                len: count,
                _marker: PhantomData,
            }),
            _ => Err(MemoryError::InvalidRange {
                start,
                count,
                len: self.len,
            }),
        }
    }
}

impl<T> Default for UnsafeSpan<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> PartialEq for UnsafeSpan<T> {
    /// Spans are equal when they view the same memory.
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.len == other.len
    }
}

impl<T> Eq for UnsafeSpan<T> {}

impl<T> fmt::Debug for UnsafeSpan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsafeSpan")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// A view of a run of UTF-8 bytes or UTF-16 units.
///
/// The viewed text is not NUL-terminated.
pub struct StringSpan<C: CharUnit = u8> {
    units: UnsafeSpan<C>,
}

impl<C: CharUnit> Clone for StringSpan<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: CharUnit> Copy for StringSpan<C> {}

impl<C: CharUnit> StringSpan<C> {
    /// The empty string.
    pub const fn empty() -> Self {
        Self {
            units: UnsafeSpan::empty(),
        }
    }

    /// View `len` code units at `ptr`.
    ///
    /// # Safety
    ///
    /// As for [`UnsafeSpan::from_raw_parts`].
    pub unsafe fn from_raw_parts(ptr: *const C, len: usize) -> Self {
        Self {
            units: UnsafeSpan::from_raw_parts(ptr, len),
        }
    }

    /// View existing code units without borrowing them.
    pub fn from_units(units: &[C]) -> Self {
        Self {
            units: UnsafeSpan::from_slice(units),
        }
    }

    /// Number of code units.
    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the span is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Start of the viewed text.
    #[inline]
    pub fn as_ptr(&self) -> *const C {
        self.units.as_ptr()
    }

    /// The viewed code units.
    ///
    /// # Safety
    ///
    /// As for [`UnsafeSpan::as_slice`].
    #[inline]
    pub unsafe fn as_units<'a>(&self) -> &'a [C] {
        self.units.as_slice()
    }

    /// The underlying untyped view.
    pub fn as_span(&self) -> UnsafeSpan<C> {
        self.units
    }
}

impl StringSpan<u8> {
    /// View a string slice without borrowing it.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        Self::from_units(s.as_bytes())
    }

    /// The viewed bytes as UTF-8, if they are valid.
    ///
    /// # Safety
    ///
    /// As for [`UnsafeSpan::as_slice`].
    pub unsafe fn to_str<'a>(&self) -> Option<&'a str> {
        std::str::from_utf8(self.as_units()).ok()
    }
}

impl<C: CharUnit> Default for StringSpan<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C: CharUnit> PartialEq for StringSpan<C> {
    /// Spans are equal when they view the same memory.
    fn eq(&self, other: &Self) -> bool {
        self.units == other.units
    }
}

impl<C: CharUnit> Eq for StringSpan<C> {}

impl<C: CharUnit> fmt::Debug for StringSpan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringSpan")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}
