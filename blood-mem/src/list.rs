//! Growable array with explicit release.
//!
//! [`UnsafeList`] owns a contiguous buffer obtained from
//! [`RawAllocator`]. It doubles on overflow starting from the configured
//! initial capacity. Unlike `Vec`, it can be released back to a null buffer
//! and used again afterwards, and it exposes its storage as an
//! [`UnsafeSpan`] for callers that pass it across an ownership boundary.

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};

use crate::config;
use crate::error::{MemoryError, Result};
use crate::raw::RawAllocator;
use crate::span::UnsafeSpan;

/// Growable array of `T`.
pub struct UnsafeList<T> {
    data: NonNull<T>,
    len: usize,
    capacity: usize,
}

// SAFETY: the list owns its elements like `Vec` does.
unsafe impl<T: Send> Send for UnsafeList<T> {}
unsafe impl<T: Sync> Sync for UnsafeList<T> {}

impl<T> UnsafeList<T> {
    /// Create an empty list without allocating.
    pub const fn new() -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
        }
    }

    /// Create a list with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut list = Self::new();
        list.ensure_capacity(capacity);
        list
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the buffer holds without growing.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start of the buffer, or null when the list owns no buffer.
    pub fn data_ptr(&self) -> *const T {
        if self.capacity == 0 {
            ptr::null()
        } else {
            self.data.as_ptr()
        }
    }

    /// Grow the buffer to hold at least `capacity` elements.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let initial = config::config().initial_capacity.max(1);
        let doubled = self.capacity.saturating_mul(2);
        let target = capacity.max(doubled).max(initial);
        // SAFETY: `data` holds `self.capacity` elements from this allocator.
        self.data = unsafe { RawAllocator::realloc_array(self.data, self.capacity, target) };
        self.capacity = target;
    }

    #[inline]
    fn reserve_one(&mut self) {
        if self.len == self.capacity {
            self.ensure_capacity(self.len + 1);
        }
    }

    /// Append an element.
    pub fn add(&mut self, value: T) {
        self.reserve_one();
        // SAFETY: `len < capacity` after reserving.
        unsafe { self.data.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Append an element. Alias for [`add`](Self::add).
    #[inline]
    pub fn push(&mut self, value: T) {
        self.add(value);
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: the slot at the old `len - 1` is initialized and now
        // outside the live range.
        Some(unsafe { self.data.as_ptr().add(self.len).read() })
    }

    /// Insert `value` at `index`, shifting later elements right.
    ///
    /// `index == len` appends.
    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        if index > self.len {
            return Err(MemoryError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        self.reserve_one();
        // SAFETY: `index <= len < capacity`; the shifted range stays in the buffer.
        unsafe {
            let slot = self.data.as_ptr().add(index);
            ptr::copy(slot, slot.add(1), self.len - index);
            slot.write(value);
        }
        self.len += 1;
        Ok(())
    }

    /// Remove the element at `index`, shifting later elements left.
    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        self.check_index(index)?;
        // SAFETY: `index < len`; the element is moved out before the shift
        // overwrites its slot.
        let value = unsafe {
            let slot = self.data.as_ptr().add(index);
            let value = slot.read();
            ptr::copy(slot.add(1), slot, self.len - index - 1);
            value
        };
        self.len -= 1;
        Ok(value)
    }

    /// Remove the element at `index`, moving the last element into its place.
    pub fn swap_remove(&mut self, index: usize) -> Result<T> {
        self.check_index(index)?;
        self.len -= 1;
        // SAFETY: `index <= len` (the old last index); both slots are initialized.
        let value = unsafe {
            let base = self.data.as_ptr();
            let value = base.add(index).read();
            if index != self.len {
                ptr::copy_nonoverlapping(base.add(self.len), base.add(index), 1);
            }
            value
        };
        Ok(value)
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Element at `index`, mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(index)
    }

    /// Overwrite the element at `index`, returning the previous value.
    pub fn set(&mut self, index: usize, value: T) -> Result<T> {
        self.check_index(index)?;
        Ok(mem::replace(&mut self.as_mut_slice()[index], value))
    }

    /// The live elements.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` slots are initialized; `data` is dangling
        // but aligned when `len == 0`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// The live elements, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as for `as_slice`, and `&mut self` is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }

    /// A view of the live elements that does not borrow the list.
    ///
    /// The view is invalidated by any operation that grows, shrinks or
    /// releases the list.
    pub fn as_span(&self) -> UnsafeSpan<T> {
        UnsafeSpan::from_slice(self.as_slice())
    }

    /// Iterate over the live elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Iterate mutably over the live elements.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Drop every element, keeping the buffer.
    pub fn clear(&mut self) {
        let live: *mut [T] = self.as_mut_slice();
        // Zero the length first so a panicking destructor leaks instead of
        // double-dropping.
        self.len = 0;
        // SAFETY: the elements were live and are no longer reachable.
        unsafe { ptr::drop_in_place(live) };
    }

    /// Drop every element and free the buffer. Idempotent; the list grows
    /// again on the next insert.
    pub fn release(&mut self) {
        self.clear();
        if self.capacity != 0 {
            // SAFETY: `data` holds `capacity` elements from this allocator.
            unsafe { RawAllocator::free_array(self.data, self.capacity) };
        }
        self.data = NonNull::dangling();
        self.capacity = 0;
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len {
            Ok(())
        } else {
            Err(MemoryError::IndexOutOfRange {
                index,
                len: self.len,
            })
        }
    }
}

impl<T: PartialEq> UnsafeList<T> {
    /// Position of the first element equal to `value`.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        self.iter().position(|item| item == value)
    }

    /// Whether an element equal to `value` is present.
    pub fn contains(&self, value: &T) -> bool {
        self.index_of(value).is_some()
    }

    /// Remove the first element equal to `value`. Returns whether one was found.
    pub fn remove(&mut self, value: &T) -> bool {
        match self.index_of(value) {
            Some(index) => self.remove_at(index).is_ok(),
            None => false,
        }
    }
}

impl<T: Clone> UnsafeList<T> {
    /// Append clones of every element in `items`.
    pub fn extend_from_slice(&mut self, items: &[T]) {
        self.ensure_capacity(self.len + items.len());
        for item in items {
            self.add(item.clone());
        }
    }
}

impl<T> Drop for UnsafeList<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Default for UnsafeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for UnsafeList<T> {
    fn clone(&self) -> Self {
        let mut list = Self::with_capacity(self.len);
        list.extend_from_slice(self.as_slice());
        list
    }
}

impl<T: fmt::Debug> fmt::Debug for UnsafeList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Index<usize> for UnsafeList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!(
                "{}",
                MemoryError::IndexOutOfRange {
                    index,
                    len: self.len
                }
            ),
        }
    }
}

impl<T> IndexMut<usize> for UnsafeList<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        let len = self.len;
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("{}", MemoryError::IndexOutOfRange { index, len }),
        }
    }
}

impl<T> FromIterator<T> for UnsafeList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<T> Extend<T> for UnsafeList<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.ensure_capacity(self.len + iter.size_hint().0);
        for value in iter {
            self.add(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a UnsafeList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    // ========================================================================
    // Growth
    // ========================================================================

    #[test]
    fn test_new_list_owns_nothing() {
        let list: UnsafeList<u32> = UnsafeList::new();
        assert!(list.data_ptr().is_null());
        assert_eq!(list.capacity(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_growth_doubles() {
        let mut list = UnsafeList::with_capacity(4);
        assert_eq!(list.capacity(), 4);
        for i in 0..5u32 {
            list.add(i);
        }
        assert_eq!(list.capacity(), 8);
        for i in 5..1000u32 {
            list.push(i);
        }
        assert_eq!(list.len(), 1000);
        assert!(list.iter().copied().eq(0..1000));
    }

    // ========================================================================
    // Positional edits
    // ========================================================================

    #[test]
    fn test_insert_and_remove_at() {
        let mut list: UnsafeList<i32> = [1, 2, 4].into_iter().collect();
        list.insert(2, 3).unwrap();
        list.insert(4, 5).unwrap();
        list.insert(0, 0).unwrap();
        assert_eq!(list.as_slice(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(
            list.insert(7, 9),
            Err(MemoryError::IndexOutOfRange { index: 7, len: 6 })
        );
        assert_eq!(list.remove_at(1), Ok(1));
        assert_eq!(list.as_slice(), &[0, 2, 3, 4, 5]);
        assert_eq!(
            list.remove_at(5),
            Err(MemoryError::IndexOutOfRange { index: 5, len: 5 })
        );
    }

    #[test]
    fn test_swap_remove() {
        let mut list: UnsafeList<&str> = ["a", "b", "c", "d"].into_iter().collect();
        assert_eq!(list.swap_remove(1), Ok("b"));
        assert_eq!(list.as_slice(), &["a", "d", "c"]);
        assert_eq!(list.swap_remove(2), Ok("c"));
        assert_eq!(list.as_slice(), &["a", "d"]);
    }

    #[test]
    fn test_search_and_remove_value() {
        let mut list: UnsafeList<u8> = [5, 6, 7, 6].into_iter().collect();
        assert_eq!(list.index_of(&6), Some(1));
        assert!(list.contains(&7));
        assert!(list.remove(&6));
        assert_eq!(list.as_slice(), &[5, 7, 6]);
        assert!(!list.remove(&9));
    }

    #[test]
    fn test_set_and_index() {
        let mut list: UnsafeList<u32> = (0..3).collect();
        assert_eq!(list.set(1, 10), Ok(1));
        list[2] += 5;
        assert_eq!(list[1], 10);
        assert_eq!(list[2], 7);
        assert!(list.set(3, 0).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_index_out_of_range_panics() {
        let list: UnsafeList<u32> = UnsafeList::new();
        let _ = list[0];
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    #[test]
    fn test_clear_and_release_drop_elements() {
        let tracker = Rc::new(());
        let mut list = UnsafeList::new();
        for _ in 0..10 {
            list.add(Rc::clone(&tracker));
        }
        assert_eq!(Rc::strong_count(&tracker), 11);
        let capacity = list.capacity();
        list.clear();
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert_eq!(list.capacity(), capacity);

        list.add(Rc::clone(&tracker));
        list.release();
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert!(list.data_ptr().is_null());
        list.release();
    }

    #[test]
    fn test_resurrect_after_release() {
        let mut list: UnsafeList<String> = UnsafeList::new();
        list.add("before".into());
        list.release();
        list.add("after".into());
        assert_eq!(list.as_slice(), &["after".to_string()]);
        assert!(!list.data_ptr().is_null());
    }

    #[test]
    fn test_span_view() {
        let mut list: UnsafeList<u64> = UnsafeList::new();
        list.extend_from_slice(&[1, 2, 3]);
        let span = list.as_span();
        assert_eq!(span.len(), 3);
        assert_eq!(unsafe { span.as_slice() }, &[1, 2, 3]);
        assert_eq!(span.as_ptr(), list.data_ptr());
    }

    #[test]
    fn test_pop_and_clone() {
        let mut list: UnsafeList<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let copy = list.clone();
        assert_eq!(list.pop().as_deref(), Some("y"));
        assert_eq!(list.pop().as_deref(), Some("x"));
        assert_eq!(list.pop(), None);
        assert_eq!(copy.len(), 2);
    }
}
