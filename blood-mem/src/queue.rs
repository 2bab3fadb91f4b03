//! FIFO queue over a circular buffer.
//!
//! The live range starts at `head` and may wrap past the end of the buffer.
//! Growing copies both segments into the front of the new buffer so the queue
//! is linear again afterwards.

use std::fmt;
use std::ptr::{self, NonNull};

use crate::config;
use crate::error::{MemoryError, Result};
use crate::raw::RawAllocator;

const CONTAINER: &str = "UnsafeQueue";

/// First-in first-out queue with explicit release.
pub struct UnsafeQueue<T> {
    data: NonNull<T>,
    head: usize,
    len: usize,
    capacity: usize,
}

// SAFETY: the queue owns its elements.
unsafe impl<T: Send> Send for UnsafeQueue<T> {}
unsafe impl<T: Sync> Sync for UnsafeQueue<T> {}

impl<T> UnsafeQueue<T> {
    /// Create an empty queue without allocating.
    pub const fn new() -> Self {
        Self {
            data: NonNull::dangling(),
            head: 0,
            len: 0,
            capacity: 0,
        }
    }

    /// Create a queue with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut queue = Self::new();
        queue.ensure_capacity(capacity);
        queue
    }

    /// Number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the buffer holds without growing.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn physical(&self, logical: usize) -> usize {
        let index = self.head + logical;
        if index >= self.capacity {
            index - self.capacity
        } else {
            index
        }
    }

    /// The live range as (first segment, wrapped segment).
    fn segments(&self) -> (&[T], &[T]) {
        let first_len = self.len.min(self.capacity - self.head);
        // SAFETY: both ranges lie inside the buffer and hold live elements.
        // With no buffer, `head == len == 0` and the slices are empty.
        unsafe {
            let base = self.data.as_ptr();
            (
                std::slice::from_raw_parts(base.add(self.head), first_len),
                std::slice::from_raw_parts(base, self.len - first_len),
            )
        }
    }

    /// Grow the buffer to hold at least `capacity` elements.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let initial = config::config().initial_capacity.max(1);
        let target = capacity.max(self.capacity.saturating_mul(2)).max(initial);
        let fresh = RawAllocator::alloc_array::<T>(target);
        let (first, second) = self.segments();
        // SAFETY: `fresh` holds `target >= len` slots and does not overlap the
        // old buffer; elements are moved, so the old buffer is freed without
        // dropping them.
        unsafe {
            ptr::copy_nonoverlapping(first.as_ptr(), fresh.as_ptr(), first.len());
            ptr::copy_nonoverlapping(second.as_ptr(), fresh.as_ptr().add(first.len()), second.len());
            if self.capacity != 0 {
                RawAllocator::free_array(self.data, self.capacity);
            }
        }
        self.data = fresh;
        self.head = 0;
        self.capacity = target;
    }

    /// Append to the back.
    pub fn enqueue(&mut self, value: T) {
        if self.len == self.capacity {
            self.ensure_capacity(self.len + 1);
        }
        let tail = self.physical(self.len);
        // SAFETY: `tail` is inside the buffer and outside the live range.
        unsafe { self.data.as_ptr().add(tail).write(value) };
        self.len += 1;
    }

    /// Remove from the front.
    pub fn dequeue(&mut self) -> Result<T> {
        self.try_dequeue().ok_or(MemoryError::Empty {
            container: CONTAINER,
        })
    }

    /// Remove from the front, or `None` when empty.
    pub fn try_dequeue(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        // SAFETY: `head` holds the oldest live element.
        let value = unsafe { self.data.as_ptr().add(self.head).read() };
        self.head = self.physical(1);
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        Some(value)
    }

    /// The front element without removing it.
    pub fn peek(&self) -> Result<&T> {
        self.try_peek().ok_or(MemoryError::Empty {
            container: CONTAINER,
        })
    }

    /// The front element, or `None` when empty.
    pub fn try_peek(&self) -> Option<&T> {
        self.segments().0.first()
    }

    /// Element `index` positions behind the front.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: `index < len`, so the physical slot is live.
        Some(unsafe { &*self.data.as_ptr().add(self.physical(index)) })
    }

    /// Iterate front to back.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        let (first, second) = self.segments();
        Chain {
            first: first.iter(),
            second: second.iter(),
        }
    }

    /// Drop every element, keeping the buffer.
    pub fn clear(&mut self) {
        while let Some(value) = self.try_dequeue() {
            drop(value);
        }
    }

    /// Drop every element and free the buffer. Idempotent.
    pub fn release(&mut self) {
        self.clear();
        if self.capacity != 0 {
            // SAFETY: `data` holds `capacity` slots from this allocator.
            unsafe { RawAllocator::free_array(self.data, self.capacity) };
        }
        self.data = NonNull::dangling();
        self.head = 0;
        self.capacity = 0;
    }
}

impl<T: PartialEq> UnsafeQueue<T> {
    /// Whether an element equal to `value` is queued.
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|item| item == value)
    }
}

/// Two slice iterators back to back, keeping the exact length.
struct Chain<'a, T> {
    first: std::slice::Iter<'a, T>,
    second: std::slice::Iter<'a, T>,
}

impl<'a, T> Iterator for Chain<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.first.next().or_else(|| self.second.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.first.len() + self.second.len();
        (len, Some(len))
    }
}

impl<'a, T> DoubleEndedIterator for Chain<'a, T> {
    fn next_back(&mut self) -> Option<&'a T> {
        self.second.next_back().or_else(|| self.first.next_back())
    }
}

impl<T> ExactSizeIterator for Chain<'_, T> {}

impl<T> Drop for UnsafeQueue<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Default for UnsafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for UnsafeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> FromIterator<T> for UnsafeQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

impl<T> Extend<T> for UnsafeQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}
