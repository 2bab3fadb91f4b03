//! Owning hash set over a linear probing table.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use crate::linear_table::LinearTable;

/// Hash set with explicit release.
///
/// Like [`UnsafeDictionary`](crate::dictionary::UnsafeDictionary), a default
/// set owns no memory and allocates on the first insert.
pub struct UnsafeHashSet<T> {
    table: LinearTable<T, ()>,
}

impl<T> UnsafeHashSet<T> {
    /// Create an empty set without allocating.
    pub const fn new() -> Self {
        Self {
            table: LinearTable::new("hash_set"),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Remove every element, keeping the slots.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Drop every element and free the slots. Idempotent.
    pub fn release(&mut self) {
        self.table.release();
    }

    /// Iterate in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.table.iter().map(|(k, _)| k)
    }
}

impl<T: Hash + Eq> UnsafeHashSet<T> {
    /// Create a set with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut set = Self::new();
        set.ensure_capacity(capacity);
        set
    }

    /// Make room for at least `capacity` elements without rebuilding.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.table.ensure_capacity(capacity);
    }

    /// Insert `value`. Returns `false` if an equal element was present, in
    /// which case `value` is dropped.
    pub fn add(&mut self, value: T) -> bool {
        self.table.find_or_insert_with(value, || ()).1
    }

    /// The stored element equal to `value`, inserting `value` if there is
    /// none. The flag reports whether `value` was inserted.
    pub fn get_or_add(&mut self, value: T) -> (&T, bool) {
        let (index, inserted) = self.table.find_or_insert_with(value, || ());
        match self.table.entry_at(index) {
            Some((stored, _)) => (stored, inserted),
            None => unreachable!("slot {index} was just filled"),
        }
    }

    /// The stored element equal to `value`.
    pub fn get<Q>(&self, value: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(value).map(|(k, _)| k)
    }

    /// Whether an equal element is present.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(value).is_some()
    }

    /// Remove and return the element equal to `value`.
    pub fn take<Q>(&mut self, value: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove_entry(value).map(|(k, _)| k)
    }

    /// Remove the element equal to `value`. Returns whether it was present.
    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.take(value).is_some()
    }
}

impl<T> Default for UnsafeHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for UnsafeHashSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Hash + Eq> FromIterator<T> for UnsafeHashSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<T: Hash + Eq> Extend<T> for UnsafeHashSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_contains_remove() {
        let mut set = UnsafeHashSet::new();
        assert!(set.add(3u32));
        assert!(!set.add(3));
        assert!(set.contains(&3));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&3));
        assert!(!set.remove(&3));
        assert!(set.is_empty());
    }

    #[test]
    fn test_get_or_add_returns_stored() {
        let mut set: UnsafeHashSet<String> = UnsafeHashSet::new();
        let (first, inserted) = set.get_or_add("pool".to_string());
        assert!(inserted);
        let first = first.as_ptr();
        let (second, inserted) = set.get_or_add("pool".to_string());
        assert!(!inserted);
        assert_eq!(second.as_ptr(), first);
    }

    #[test]
    fn test_take() {
        let mut set: UnsafeHashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(set.take("a"), Some("a".to_string()));
        assert_eq!(set.get("b").map(String::as_str), Some("b"));
        assert!(set.get("a").is_none());
    }

    #[test]
    fn test_many_elements() {
        let set: UnsafeHashSet<u64> = (0..1000).collect();
        assert_eq!(set.len(), 1000);
        assert!((0..1000).all(|i| set.contains(&i)));
        assert!(!set.contains(&1000));
        assert_eq!(set.iter().count(), 1000);
    }

    #[test]
    fn test_release_and_resurrect() {
        let mut set = UnsafeHashSet::with_capacity(16);
        set.add(1u8);
        set.release();
        assert_eq!(set.capacity(), 0);
        set.release();
        set.add(2);
        assert!(set.contains(&2));
        assert!(!set.contains(&1));
        set.clear();
        assert!(set.is_empty());
    }
}
