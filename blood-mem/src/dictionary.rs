//! Owning key/value dictionary over a linear probing table.
//!
//! A default-constructed dictionary owns no memory and allocates on the first
//! insert, so it can be used without any explicit setup:
//!
//! ```
//! use blood_mem::UnsafeDictionary;
//!
//! let mut dict: UnsafeDictionary<u32, i32> = UnsafeDictionary::default();
//! dict.set(1, 2);
//! assert_eq!(dict[&1], 2);
//! ```
//!
//! Indexing never inserts. `dict[&k] = v` only overwrites a key that is
//! already present and panics otherwise; [`set`](UnsafeDictionary::set) is the
//! inserting form:
//!
//! ```
//! use blood_mem::UnsafeDictionary;
//!
//! let mut dict: UnsafeDictionary<u32, i32> = UnsafeDictionary::default();
//! dict.set(1, 2); // insert
//! dict[&1] = 5; // overwrite in place
//! assert_eq!(dict.set(1, 7), Some(5));
//! assert!(dict.try_get(&2).is_none());
//! ```
//!
//! ```should_panic
//! use blood_mem::UnsafeDictionary;
//!
//! let mut dict: UnsafeDictionary<u32, i32> = UnsafeDictionary::default();
//! dict[&1] = 2; // missing key: use `set`
//! ```
//!
//! Enumeration follows slot order, which is unrelated to insertion order and
//! changes across rebuilds.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::ops::{Index, IndexMut};

use crate::error::{MemoryError, Result};
use crate::linear_table::LinearTable;

/// Hash dictionary with explicit release.
pub struct UnsafeDictionary<K, V> {
    table: LinearTable<K, V>,
}

impl<K, V> UnsafeDictionary<K, V> {
    /// Create an empty dictionary without allocating.
    pub const fn new() -> Self {
        Self {
            table: LinearTable::new("dictionary"),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Slots holding a tombstone.
    pub fn tombstones(&self) -> usize {
        self.table.tombstones()
    }

    /// Remove every entry, keeping the slots.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Drop every entry and free the slots. Idempotent; the dictionary
    /// reallocates on the next insert.
    pub fn release(&mut self) {
        self.table.release();
    }

    /// Iterate over entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.table.iter()
    }

    /// Iterate over entries with mutable values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> + '_ {
        self.table.iter_mut()
    }

    /// Iterate over keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.table.iter().map(|(k, _)| k)
    }

    /// Iterate over values in slot order.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.table.iter().map(|(_, v)| v)
    }
}

impl<K: Hash + Eq, V> UnsafeDictionary<K, V> {
    /// Create a dictionary with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut dict = Self::new();
        dict.ensure_capacity(capacity);
        dict
    }

    /// Make room for at least `capacity` entries without rebuilding.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.table.ensure_capacity(capacity);
    }

    /// Insert a key that must not be present yet.
    pub fn add(&mut self, key: K, value: V) -> Result<()> {
        self.table.try_add(key, value)
    }

    /// Insert or overwrite, returning the previous value.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.table.insert(key, value)
    }

    /// Value for `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.table.get_or_insert_with(key, make)
    }

    /// Look up a value.
    pub fn try_get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|(_, v)| v)
    }

    /// Look up a value that must exist.
    pub fn get<Q>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_get(key).ok_or(MemoryError::KeyNotFound)
    }

    /// Look up a value for modification.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get_mut(key)
    }

    /// Whether `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).is_some()
    }

    /// Remove an entry and return it.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove_entry(key)
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove_entry(key).is_some()
    }
}

impl<K, V> Default for UnsafeDictionary<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for UnsafeDictionary<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, Q, V> Index<&Q> for UnsafeDictionary<K, V>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        match self.try_get(key) {
            Some(value) => value,
            None => panic!("{}", MemoryError::KeyNotFound),
        }
    }
}

/// Mutable access to an existing value. Panics with
/// [`MemoryError::KeyNotFound`] for a missing key; insert with
/// [`set`](UnsafeDictionary::set).
impl<K, Q, V> IndexMut<&Q> for UnsafeDictionary<K, V>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
{
    fn index_mut(&mut self, key: &Q) -> &mut V {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("{}", MemoryError::KeyNotFound),
        }
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for UnsafeDictionary<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::new();
        dict.extend(iter);
        dict
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for UnsafeDictionary<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dictionary_accepts_writes() {
        let mut dict: UnsafeDictionary<u32, i32> = UnsafeDictionary::default();
        assert_eq!(dict.capacity(), 0);
        assert_eq!(dict.set(1, 2), None);
        assert_eq!(dict[&1], 2);
        dict[&1] = 5;
        assert_eq!(dict.try_get(&1), Some(&5));
    }

    #[test]
    #[should_panic(expected = "was not present")]
    fn test_index_mut_does_not_insert() {
        let mut dict: UnsafeDictionary<u32, i32> = UnsafeDictionary::default();
        dict[&1] = 2;
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut dict = UnsafeDictionary::new();
        dict.add("a", 1).unwrap();
        assert_eq!(dict.add("a", 2), Err(MemoryError::DuplicateKey));
        assert_eq!(dict.get(&"a"), Ok(&1));
        assert_eq!(dict.get(&"b"), Err(MemoryError::KeyNotFound));
    }

    #[test]
    fn test_remove() {
        let mut dict: UnsafeDictionary<String, u32> = UnsafeDictionary::new();
        dict.set("x".into(), 1);
        assert!(dict.contains_key("x"));
        assert!(dict.remove("x"));
        assert!(!dict.remove("x"));
        assert!(!dict.contains_key("x"));
        assert_eq!(dict.tombstones(), 1);
        dict.set("y".into(), 2);
        assert_eq!(dict.remove_entry("y"), Some(("y".to_string(), 2)));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut counts: UnsafeDictionary<char, usize> = UnsafeDictionary::new();
        for c in "mississippi".chars() {
            *counts.get_or_insert_with(c, || 0) += 1;
        }
        assert_eq!(counts[&'s'], 4);
        assert_eq!(counts[&'i'], 4);
        assert_eq!(counts[&'p'], 2);
        assert_eq!(counts[&'m'], 1);
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut dict = UnsafeDictionary::with_capacity(2);
        for i in 0..500u32 {
            dict.add(i, i * i).unwrap();
        }
        for i in 0..500u32 {
            assert_eq!(dict.try_get(&i), Some(&(i * i)));
        }
        assert!(dict.len() * 4 <= dict.capacity() * 3);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut dict: UnsafeDictionary<u32, u32> = (0..10).map(|i| (i, i)).collect();
        let capacity = dict.capacity();
        dict.clear();
        assert!(dict.is_empty());
        assert_eq!(dict.capacity(), capacity);
        assert_eq!(dict.iter().count(), 0);
    }

    #[test]
    fn test_release_and_resurrect() {
        let mut dict: UnsafeDictionary<u32, Vec<u8>> = UnsafeDictionary::new();
        dict.set(1, vec![1]);
        dict.release();
        dict.release();
        assert_eq!(dict.capacity(), 0);
        assert_eq!(dict.len(), 0);
        dict.set(2, vec![2]);
        assert_eq!(dict[&2], vec![2]);
    }

    #[test]
    fn test_iter_mut() {
        let mut dict: UnsafeDictionary<u32, u32> = (0..5).map(|i| (i, i)).collect();
        for (_, v) in dict.iter_mut() {
            *v *= 10;
        }
        let mut values: Vec<_> = dict.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
        assert_eq!(dict.keys().count(), 5);
    }
}
