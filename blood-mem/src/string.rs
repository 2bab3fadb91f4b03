//! Owning, NUL-terminated strings over UTF-8 bytes or UTF-16 units.
//!
//! [`BasicString`] keeps `len` code units followed by a NUL in a buffer of
//! `capacity + 1` units, so [`c_str`](BasicString::c_str) is always a valid
//! terminated pointer. A string that owns no buffer hands out a static
//! terminator instead. Searching and comparison are ordinal over code units
//! and shared by both widths through [`CharUnit`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};

use crate::config;
use crate::error::{MemoryError, Result};
use crate::external::ValueFormatter;
use crate::raw::RawAllocator;
use crate::span::StringSpan;

/// A code unit of a [`BasicString`]: `u8` for UTF-8, `u16` for UTF-16.
pub trait CharUnit: Copy + Eq + Ord + Hash + Default + fmt::Debug + Send + Sync + 'static {
    /// The terminator unit.
    const NUL: Self;

    /// A terminated empty string, used when no buffer is owned.
    const TERMINATED_EMPTY: &'static [Self];

    /// Feed the encoding of `text` to `push`, one unit at a time.
    fn encode(text: &str, push: impl FnMut(Self));

    /// Decode `units`, replacing invalid sequences with U+FFFD.
    fn decode_lossy(units: &[Self]) -> String;
}

impl CharUnit for u8 {
    const NUL: Self = 0;
    const TERMINATED_EMPTY: &'static [Self] = &[0];

    fn encode(text: &str, push: impl FnMut(Self)) {
        text.bytes().for_each(push);
    }

    fn decode_lossy(units: &[Self]) -> String {
        String::from_utf8_lossy(units).into_owned()
    }
}

impl CharUnit for u16 {
    const NUL: Self = 0;
    const TERMINATED_EMPTY: &'static [Self] = &[0];

    fn encode(text: &str, push: impl FnMut(Self)) {
        text.encode_utf16().for_each(push);
    }

    fn decode_lossy(units: &[Self]) -> String {
        String::from_utf16_lossy(units)
    }
}

/// Owning string of `C` code units.
pub struct BasicString<C: CharUnit> {
    data: NonNull<C>,
    len: usize,
    capacity: usize,
}

/// UTF-8 string.
pub type StdString = BasicString<u8>;

/// UTF-16 string.
pub type StdWString = BasicString<u16>;

// SAFETY: the string owns plain `Copy` units.
unsafe impl<C: CharUnit> Send for BasicString<C> {}
unsafe impl<C: CharUnit> Sync for BasicString<C> {}

impl<C: CharUnit> BasicString<C> {
    /// Create an empty string without allocating.
    pub const fn new() -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
        }
    }

    /// Create an empty string with room for `capacity` units.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut s = Self::new();
        s.ensure_capacity(capacity);
        s
    }

    /// Copy `units` into a new string.
    pub fn from_units(units: &[C]) -> Self {
        let mut s = Self::with_capacity(units.len());
        s.append(units);
        s
    }

    /// Encode `text` into a new string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Self {
        let mut s = Self::new();
        s.append_str(text);
        s
    }

    /// Number of code units, excluding the terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Units the buffer holds without growing, excluding the terminator.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn buffer_len(capacity: usize) -> usize {
        if capacity == 0 {
            0
        } else {
            capacity + 1
        }
    }

    /// Grow the buffer to hold at least `capacity` units plus the terminator.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let initial = config::config().initial_capacity.max(1);
        let target = capacity.max(self.capacity.saturating_mul(2)).max(initial);
        // SAFETY: `data` holds `buffer_len(capacity)` units from this allocator.
        self.data = unsafe {
            RawAllocator::realloc_array(
                self.data,
                Self::buffer_len(self.capacity),
                Self::buffer_len(target),
            )
        };
        self.capacity = target;
        self.terminate();
    }

    #[inline]
    fn terminate(&mut self) {
        if self.capacity != 0 {
            // SAFETY: `len <= capacity` and the buffer has `capacity + 1` slots.
            unsafe { self.data.as_ptr().add(self.len).write(C::NUL) };
        }
    }

    /// The code units, excluding the terminator.
    #[inline]
    pub fn as_units(&self) -> &[C] {
        // SAFETY: the first `len` units are initialized; `data` is dangling
        // but aligned when `len == 0`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// The code units, mutably. The terminator is not exposed.
    #[inline]
    pub fn as_units_mut(&mut self) -> &mut [C] {
        // SAFETY: as for `as_units`, and `&mut self` is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }

    /// Pointer to the NUL-terminated contents.
    pub fn c_str(&self) -> *const C {
        if self.capacity == 0 {
            C::TERMINATED_EMPTY.as_ptr()
        } else {
            self.data.as_ptr()
        }
    }

    /// A view of the contents that does not borrow the string.
    pub fn as_span(&self) -> StringSpan<C> {
        StringSpan::from_units(self.as_units())
    }

    /// Replace `start..start + count` with `with`.
    fn splice(&mut self, start: usize, count: usize, with: &[C]) -> Result<()> {
        let end = match start.checked_add(count) {
            Some(end) if end <= self.len => end,
            _ => {
                return Err(MemoryError::InvalidRange {
                    start,
                    count,
                    len: self.len,
                })
            }
        };
        let new_len = self.len - count + with.len();
        self.ensure_capacity(new_len);
        // SAFETY: every range stays inside `0..capacity`; the tail move uses
        // `copy` because source and destination may overlap, and `with`
        // cannot alias the buffer while `self` is mutably borrowed.
        unsafe {
            let base = self.data.as_ptr();
            ptr::copy(base.add(end), base.add(start + with.len()), self.len - end);
            ptr::copy_nonoverlapping(with.as_ptr(), base.add(start), with.len());
        }
        self.len = new_len;
        self.terminate();
        Ok(())
    }

    /// Append code units.
    pub fn append(&mut self, units: &[C]) {
        let len = self.len;
        // The range `len..len` is always valid.
        let _ = self.splice(len, 0, units);
    }

    /// Append the encoding of `text`.
    pub fn append_str(&mut self, text: &str) {
        self.ensure_capacity(self.len + text.len());
        C::encode(text, |unit| self.push(unit));
    }

    /// Append one code unit.
    pub fn push(&mut self, unit: C) {
        if self.len == self.capacity {
            self.ensure_capacity(self.len + 1);
        }
        // SAFETY: `len < capacity` after growing.
        unsafe { self.data.as_ptr().add(self.len).write(unit) };
        self.len += 1;
        self.terminate();
    }

    /// Insert `units` before position `index`.
    pub fn insert(&mut self, index: usize, units: &[C]) -> Result<()> {
        if index > self.len {
            return Err(MemoryError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        self.splice(index, 0, units)
    }

    /// Remove `count` units starting at `start`.
    pub fn erase(&mut self, start: usize, count: usize) -> Result<()> {
        self.splice(start, count, &[])
    }

    /// Replace `count` units starting at `start` with `with`.
    pub fn replace(&mut self, start: usize, count: usize, with: &[C]) -> Result<()> {
        self.splice(start, count, with)
    }

    /// Replace every non-overlapping occurrence of `from`, scanning left to
    /// right. Returns the number of replacements.
    pub fn replace_all(&mut self, from: &[C], to: &[C]) -> usize {
        if from.is_empty() {
            return 0;
        }
        let mut out = Self::new();
        let mut replaced = 0;
        let mut rest = self.as_units();
        while let Some(at) = find_units(rest, from) {
            out.append(&rest[..at]);
            out.append(to);
            rest = &rest[at + from.len()..];
            replaced += 1;
        }
        if replaced != 0 {
            out.append(rest);
            *self = out;
        }
        replaced
    }

    /// Position of the first occurrence of `needle`. An empty needle matches
    /// at 0.
    pub fn find(&self, needle: &[C]) -> Option<usize> {
        find_units(self.as_units(), needle)
    }

    /// Position of the last occurrence of `needle`. An empty needle matches
    /// at `len`.
    pub fn rfind(&self, needle: &[C]) -> Option<usize> {
        if needle.is_empty() {
            return Some(self.len);
        }
        self.as_units()
            .windows(needle.len())
            .rposition(|window| window == needle)
    }

    /// Whether the string begins with `prefix`.
    pub fn starts_with(&self, prefix: &[C]) -> bool {
        self.as_units().starts_with(prefix)
    }

    /// Whether the string ends with `suffix`.
    pub fn ends_with(&self, suffix: &[C]) -> bool {
        self.as_units().ends_with(suffix)
    }

    /// Ordinal comparison by code unit.
    pub fn compare(&self, other: &[C]) -> Ordering {
        self.as_units().cmp(other)
    }

    /// Truncate, or extend with NUL units, to exactly `new_len` units.
    pub fn resize(&mut self, new_len: usize) {
        self.resize_with(new_len, C::NUL);
    }

    /// Truncate, or extend with `fill`, to exactly `new_len` units.
    pub fn resize_with(&mut self, new_len: usize, fill: C) {
        if new_len > self.len {
            self.ensure_capacity(new_len);
            // SAFETY: `len..new_len` is inside the buffer.
            unsafe {
                let base = self.data.as_ptr();
                for i in self.len..new_len {
                    base.add(i).write(fill);
                }
            }
        }
        self.len = new_len;
        self.terminate();
    }

    /// Remove every unit, keeping the buffer.
    pub fn clear(&mut self) {
        self.len = 0;
        self.terminate();
    }

    /// Free the buffer. Idempotent; the string grows again on the next write.
    pub fn release(&mut self) {
        if self.capacity != 0 {
            // SAFETY: `data` holds `capacity + 1` units from this allocator.
            unsafe { RawAllocator::free_array(self.data, self.capacity + 1) };
        }
        self.data = NonNull::dangling();
        self.len = 0;
        self.capacity = 0;
    }

    /// Decode the contents, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        C::decode_lossy(self.as_units())
    }

    /// Append `value` rendered by `formatter`.
    pub fn append_formatted<T, F>(&mut self, formatter: &F, value: &T) -> fmt::Result
    where
        T: ?Sized,
        F: ValueFormatter<T> + ?Sized,
    {
        formatter.write_value(value, self)
    }
}

impl StdString {
    /// The contents as UTF-8, if valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_units()).ok()
    }
}

fn find_units<C: CharUnit>(haystack: &[C], needle: &[C]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

impl<C: CharUnit> Drop for BasicString<C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C: CharUnit> Default for BasicString<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CharUnit> Clone for BasicString<C> {
    fn clone(&self) -> Self {
        Self::from_units(self.as_units())
    }
}

impl<C: CharUnit> PartialEq for BasicString<C> {
    fn eq(&self, other: &Self) -> bool {
        self.as_units() == other.as_units()
    }
}

impl<C: CharUnit> Eq for BasicString<C> {}

impl<C: CharUnit> PartialOrd for BasicString<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: CharUnit> Ord for BasicString<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other.as_units())
    }
}

impl<C: CharUnit> Hash for BasicString<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_units().hash(state);
    }
}

impl<C: CharUnit> fmt::Write for BasicString<C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s);
        Ok(())
    }
}

impl<C: CharUnit> fmt::Debug for BasicString<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string_lossy(), f)
    }
}

impl<C: CharUnit> fmt::Display for BasicString<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl<C: CharUnit> From<&str> for BasicString<C> {
    fn from(text: &str) -> Self {
        Self::from_str(text)
    }
}
