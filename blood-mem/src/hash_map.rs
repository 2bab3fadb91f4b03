//! # Tagged Hash Map
//!
//! Open addressing with a one-byte [`Tag`] per slot kept apart from the
//! key/value pairs:
//!
//! ```text
//! tags:  [t0 t1 t2 ... t63][t64 ... t127] ...   one probe group per row
//! pairs: [p0 p1 p2 ... p63][p64 ... p127] ...   touched only on a tag hit
//! ```
//!
//! A lookup hashes the key, derives its tag, and starts at the group that
//! contains `hash & (capacity - 1)`. Each group is checked with a single
//! vector compare; only slots whose tag matches have their key compared.
//! With 7 tag bits about one in 128 foreign keys shares a tag, so a tag hit
//! is never trusted on its own. A group that still has an empty slot ends the
//! search; otherwise the next group is tried, wrapping around.
//!
//! Capacity is a power of two and a multiple of the prober width (64 with
//! AVX2, 8 otherwise). The table doubles when an insert would exceed
//! capacity, rebuilding every entry synchronously. Removal leaves a
//! tombstone that is only cleared by the next rebuild.
//!
//! The map is single-writer: it is `Send`/`Sync` like a `std` collection,
//! but mutation needs `&mut self`.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ops::Index;
use std::ptr::{self, NonNull};

use crate::align::next_power_of_two;
use crate::error::{MemoryError, Result};
use crate::hash::{hash_key, Tag};
use crate::log::{self, LogBuilder, LogLevel};
use crate::probe::{BitIter, Prober};
use crate::raw::RawAllocator;

struct Pair<K, V> {
    key: K,
    value: V,
}

/// Open-addressed hash map with tag-group probing.
pub struct HashMap<K, V> {
    tags: NonNull<Tag>,
    pairs: NonNull<Pair<K, V>>,
    capacity: usize,
    len: usize,
    tombstones: usize,
    prober: Prober,
    _marker: PhantomData<(K, V)>,
}

// SAFETY: the map owns its keys and values like `std::collections::HashMap`.
unsafe impl<K: Send, V: Send> Send for HashMap<K, V> {}
// SAFETY: shared access only hands out shared references.
unsafe impl<K: Sync, V: Sync> Sync for HashMap<K, V> {}

impl<K, V> HashMap<K, V> {
    /// Create an empty map using the process-wide prober. Nothing is
    /// allocated until the first insert.
    pub fn new() -> Self {
        Self::with_prober(Prober::detect())
    }

    /// Create an empty map with a specific prober.
    pub fn with_prober(prober: Prober) -> Self {
        Self {
            tags: NonNull::dangling(),
            pairs: NonNull::dangling(),
            capacity: 0,
            len: 0,
            tombstones: 0,
            prober,
            _marker: PhantomData,
        }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots holding a tombstone.
    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// The prober this map probes with.
    #[inline]
    pub fn prober(&self) -> Prober {
        self.prober
    }

    #[inline]
    fn tag_slice(&self) -> &[Tag] {
        // SAFETY: `tags` holds `capacity` initialized tags (or is dangling with 0).
        unsafe { std::slice::from_raw_parts(self.tags.as_ptr(), self.capacity) }
    }

    #[inline]
    fn set_tag(&mut self, index: usize, tag: Tag) {
        debug_assert!(index < self.capacity);
        // SAFETY: in bounds.
        unsafe { *self.tags.as_ptr().add(index) = tag };
    }

    /// # Safety
    ///
    /// Slot `index` must be filled.
    #[inline]
    unsafe fn pair(&self, index: usize) -> &Pair<K, V> {
        &*self.pairs.as_ptr().add(index)
    }

    /// # Safety
    ///
    /// Slot `index` must be filled.
    #[inline]
    unsafe fn pair_mut(&mut self, index: usize) -> &mut Pair<K, V> {
        &mut *self.pairs.as_ptr().add(index)
    }

    #[inline]
    fn first_group(&self, hash: u64) -> usize {
        (hash as usize & (self.capacity - 1)) & !(self.prober.width() - 1)
    }

    /// First empty-or-tombstone slot on the probe path of `hash`.
    ///
    /// # Panics
    ///
    /// Panics if a full cycle finds no free slot, which means a resize was
    /// missed.
    fn find_free_slot(&self, hash: u64) -> usize {
        let width = self.prober.width();
        let start = self.first_group(hash);
        let mut group = start;
        loop {
            let tags = &self.tag_slice()[group..group + width];
            if let Some(bit) = BitIter::new(self.prober.match_free(tags)).next() {
                return group + bit;
            }
            group = (group + width) & (self.capacity - 1);
            if group == start {
                panic!("hash map probe cycle: no free slot in {} slots", self.capacity);
            }
        }
    }

    /// Slot holding `key`, if present.
    fn find<Q>(&self, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if self.capacity == 0 {
            return None;
        }
        let width = self.prober.width();
        let tag = Tag::from_hash(hash);
        let start = self.first_group(hash);
        let mut group = start;
        loop {
            let tags = &self.tag_slice()[group..group + width];
            for bit in BitIter::new(self.prober.match_tag(tags, tag)) {
                let index = group + bit;
                // SAFETY: a matching tag is a filled tag.
                if unsafe { self.pair(index) }.key.borrow() == key {
                    return Some(index);
                }
            }
            if self.prober.match_empty(tags) != 0 {
                return None;
            }
            group = (group + width) & (self.capacity - 1);
            if group == start {
                return None;
            }
        }
    }

    /// Write a new entry into a free slot.
    fn place(&mut self, hash: u64, key: K, value: V) -> usize {
        let index = self.find_free_slot(hash);
        // SAFETY: the tags are initialized, and `index` is in bounds.
        if unsafe { *self.tags.as_ptr().add(index) } == Tag::TOMBSTONE {
            self.tombstones -= 1;
        }
        self.set_tag(index, Tag::from_hash(hash));
        // SAFETY: free slots hold no live pair.
        unsafe { self.pairs.as_ptr().add(index).write(Pair { key, value }) };
        self.len += 1;
        index
    }

    fn capacity_for(&self, requested: usize) -> usize {
        next_power_of_two(requested).max(self.prober.width())
    }

    /// Drop every live pair and mark every slot empty.
    fn drop_entries(&mut self) {
        if mem::needs_drop::<Pair<K, V>>() && self.len > 0 {
            let width = self.prober.width();
            for group in (0..self.capacity).step_by(width) {
                let mask = self.prober.match_filled(&self.tag_slice()[group..group + width]);
                for bit in BitIter::new(mask) {
                    // SAFETY: filled slot; its tag is cleared below.
                    unsafe { ptr::drop_in_place(self.pairs.as_ptr().add(group + bit)) };
                }
            }
        }
        if self.capacity > 0 {
            // SAFETY: `tags` holds `capacity` bytes.
            unsafe { ptr::write_bytes(self.tags.as_ptr(), Tag::EMPTY.raw(), self.capacity) };
        }
        self.len = 0;
        self.tombstones = 0;
    }

    fn free_storage(&mut self) {
        if self.capacity > 0 {
            // SAFETY: both arrays were allocated with `capacity` elements.
            unsafe {
                RawAllocator::free(self.tags.cast(), self.capacity, 1);
                RawAllocator::free_array(self.pairs, self.capacity);
            }
        }
        self.tags = NonNull::dangling();
        self.pairs = NonNull::dangling();
        self.capacity = 0;
    }

    /// Remove every entry, keeping the slots.
    pub fn clear(&mut self) {
        self.drop_entries();
    }

    /// Remove every entry and free the slots. Idempotent; the map stays
    /// usable and reallocates on the next insert.
    pub fn release(&mut self) {
        self.drop_entries();
        self.free_storage();
    }

    /// Iterate over `(key, value)` pairs in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            group: 0,
            bits: BitIter::new(0),
            remaining: self.len,
        }
    }

    /// Iterate over keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate over values in slot order.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: Hash + Eq, V> HashMap<K, V> {
    /// Create an empty map with room for at least `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.ensure_capacity(capacity);
        map
    }

    /// Grow so that at least `capacity` entries fit without a rebuild.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.resize(self.capacity_for(capacity));
        }
    }

    fn grow(&mut self) {
        let requested = (self.capacity * 2).max(self.len + 1);
        self.resize(self.capacity_for(requested));
    }

    /// Rebuild into `new_capacity` slots, dropping all tombstones.
    fn resize(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity.is_power_of_two() && new_capacity >= self.len);
        let old_tags = self.tags;
        let old_pairs = self.pairs;
        let old_capacity = self.capacity;

        self.tags = RawAllocator::alloc_zeroed(new_capacity, 1).cast();
        self.pairs = RawAllocator::alloc_array(new_capacity);
        self.capacity = new_capacity;
        let len = mem::replace(&mut self.len, 0);
        self.tombstones = 0;

        let width = self.prober.width();
        for group in (0..old_capacity).step_by(width) {
            // SAFETY: the old tag array is still allocated and initialized.
            let tags = unsafe { std::slice::from_raw_parts(old_tags.as_ptr().add(group), width) };
            for bit in BitIter::new(self.prober.match_filled(tags)) {
                // SAFETY: filled slot, moved out exactly once.
                let pair = unsafe { old_pairs.as_ptr().add(group + bit).read() };
                self.place(hash_key(&pair.key), pair.key, pair.value);
            }
        }
        debug_assert_eq!(self.len, len);

        if old_capacity > 0 {
            // SAFETY: the old arrays were allocated with `old_capacity`
            // elements and every pair has been moved out.
            unsafe {
                RawAllocator::free(old_tags.cast(), old_capacity, 1);
                RawAllocator::free_array(old_pairs, old_capacity);
            }
        }

        if log::would_log(LogLevel::Trace) {
            LogBuilder::new(LogLevel::Trace, "hash_map")
                .message("resized")
                .field_int("from", old_capacity as i64)
                .field_int("to", new_capacity as i64)
                .field_int("len", len as i64)
                .emit();
        }
    }

    /// Insert a new entry.
    ///
    /// Fails with [`MemoryError::DuplicateKey`] if `key` is present, leaving
    /// the map untouched.
    pub fn add(&mut self, key: K, value: V) -> Result<()> {
        let hash = hash_key(&key);
        if self.find(hash, &key).is_some() {
            return Err(MemoryError::DuplicateKey);
        }
        if self.len + 1 > self.capacity {
            self.grow();
        }
        self.place(hash, key, value);
        Ok(())
    }

    /// Insert or overwrite, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = hash_key(&key);
        if let Some(index) = self.find(hash, &key) {
            // SAFETY: `find` returns filled slots.
            let pair = unsafe { self.pair_mut(index) };
            return Some(mem::replace(&mut pair.value, value));
        }
        if self.len + 1 > self.capacity {
            self.grow();
        }
        self.place(hash, key, value);
        None
    }

    /// Look up a value.
    pub fn try_get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(hash_key(key), key)?;
        // SAFETY: `find` returns filled slots.
        Some(unsafe { &self.pair(index).value })
    }

    /// Look up a value for modification.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(hash_key(key), key)?;
        // SAFETY: `find` returns filled slots.
        Some(unsafe { &mut self.pair_mut(index).value })
    }

    /// Look up a value that must exist.
    pub fn get_required<Q>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_get(key).ok_or(MemoryError::KeyNotFound)
    }

    /// Whether `key` is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(hash_key(key), key).is_some()
    }

    /// Remove an entry, returning it.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(hash_key(key), key)?;
        self.set_tag(index, Tag::TOMBSTONE);
        self.len -= 1;
        self.tombstones += 1;
        // SAFETY: the slot was filled and is now marked as a tombstone.
        let pair = unsafe { self.pairs.as_ptr().add(index).read() };
        Some((pair.key, pair.value))
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).is_some()
    }
}

impl<K, V> Drop for HashMap<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, V> Default for HashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for HashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, Q, V> Index<&Q> for HashMap<K, V>
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

impl<K: Hash + Eq, V> FromIterator<(K, V)> for HashMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for HashMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Iterator over a [`HashMap`] in slot order.
pub struct Iter<'a, K, V> {
    map: &'a HashMap<K, V>,
    group: usize,
    bits: BitIter,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let width = self.map.prober.width();
        loop {
            if let Some(bit) = self.bits.next() {
                self.remaining -= 1;
                // `group` was advanced past the group these bits came from.
                let index = self.group - width + bit;
                // SAFETY: the bit came from a filled mask.
                let pair = unsafe { self.map.pair(index) };
                return Some((&pair.key, &pair.value));
            }
            let tags = &self.map.tag_slice()[self.group..self.group + width];
            self.bits = BitIter::new(self.map.prober.match_filled(tags));
            self.group += width;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a HashMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::SimdProber;
    use std::rc::Rc;

    fn probers() -> Vec<Prober> {
        let mut probers = vec![Prober::portable()];
        if let Some(simd) = SimdProber::detect() {
            probers.push(Prober::Simd(simd));
        }
        probers
    }

    // ============================================================
    // Basic operations
    // ============================================================

    #[test]
    fn test_add_and_get() {
        for prober in probers() {
            let mut map = HashMap::with_prober(prober);
            assert_eq!(map.capacity(), 0);
            map.add(1u32, "one").unwrap();
            map.add(2u32, "two").unwrap();
            assert_eq!(map.len(), 2);
            assert_eq!(map.try_get(&1), Some(&"one"));
            assert_eq!(map.try_get(&2), Some(&"two"));
            assert_eq!(map.try_get(&3), None);
            assert_eq!(map.capacity(), prober.width());
        }
    }

    #[test]
    fn test_duplicate_add_does_not_mutate() {
        let mut map = HashMap::with_prober(Prober::portable());
        map.add(7u64, 70).unwrap();
        let capacity = map.capacity();
        assert_eq!(map.add(7, 71), Err(MemoryError::DuplicateKey));
        assert_eq!(map.try_get(&7), Some(&70));
        assert_eq!(map.len(), 1);
        assert_eq!(map.capacity(), capacity);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut map = HashMap::with_prober(Prober::portable());
        assert_eq!(map.insert("a".to_string(), 1), None);
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map["a"], 2);
        *map.get_mut("a").unwrap() += 5;
        assert_eq!(map.get_required("a"), Ok(&7));
        assert_eq!(map.get_required("b"), Err(MemoryError::KeyNotFound));
    }

    #[test]
    fn test_remove() {
        for prober in probers() {
            let mut map = HashMap::with_prober(prober);
            map.add(10i32, 100).unwrap();
            assert!(map.contains(&10));
            assert!(map.remove(&10));
            assert!(!map.contains(&10));
            assert!(!map.remove(&10));
            assert_eq!(map.len(), 0);
            assert_eq!(map.tombstones(), 1);
        }
    }

    #[test]
    fn test_remove_entry_returns_owned() {
        let mut map = HashMap::with_prober(Prober::portable());
        map.add("k".to_string(), vec![1, 2]).unwrap();
        assert_eq!(map.remove_entry("k"), Some(("k".to_string(), vec![1, 2])));
        assert_eq!(map.remove_entry("k"), None);
    }

    // ============================================================
    // Resizing
    // ============================================================

    #[test]
    fn test_resize_preserves_contents() {
        for prober in probers() {
            let mut map = HashMap::with_prober(prober);
            map.ensure_capacity(2);
            for i in 0..100u32 {
                map.add(i, i * 3).unwrap();
            }
            assert_eq!(map.len(), 100);
            assert!(map.capacity() >= 100);
            assert!(map.capacity().is_power_of_two());
            assert_eq!(map.capacity() % prober.width(), 0);
            for i in 0..100u32 {
                assert_eq!(map.try_get(&i), Some(&(i * 3)));
            }
        }
    }

    #[test]
    fn test_table_can_fill_completely() {
        let mut map = HashMap::with_prober(Prober::portable());
        for i in 0..8u8 {
            map.add(i, ()).unwrap();
        }
        assert_eq!(map.capacity(), 8);
        assert_eq!(map.len(), 8);
        assert!(!map.contains(&200));
        map.add(8, ()).unwrap();
        assert_eq!(map.capacity(), 16);
    }

    #[test]
    fn test_tombstones_survive_until_resize() {
        let mut map = HashMap::with_prober(Prober::portable());
        map.ensure_capacity(64);
        for round in 0..50u32 {
            for i in 0..10u32 {
                map.add(round * 100 + i, i).unwrap();
            }
            for i in 0..10u32 {
                assert!(map.remove(&(round * 100 + i)));
            }
            assert_eq!(map.len(), 0);
            assert!(map.tombstones() <= map.capacity());
        }
        assert_eq!(map.capacity(), 64);
        assert!(map.tombstones() > 0);

        map.ensure_capacity(128);
        assert_eq!(map.tombstones(), 0);
        assert_eq!(map.capacity(), 128);
    }

    #[test]
    fn test_lookup_continues_past_tombstones() {
        let mut map = HashMap::with_prober(Prober::portable());
        for i in 0..8u32 {
            map.add(i, i).unwrap();
        }
        for i in 0..7u32 {
            map.remove(&i);
        }
        assert_eq!(map.try_get(&7), Some(&7));
        // Re-adding a present key behind tombstones is still a duplicate.
        assert_eq!(map.add(7, 0), Err(MemoryError::DuplicateKey));
        map.add(3, 33).unwrap();
        assert_eq!(map.try_get(&3), Some(&33));
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    #[test]
    fn test_clear_keeps_capacity() {
        let mut map: HashMap<u32, u32> = (0..20).map(|i| (i, i)).collect();
        let capacity = map.capacity();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.tombstones(), 0);
        assert!(!map.contains(&1));
    }

    #[test]
    fn test_release_and_resurrect() {
        let mut map = HashMap::with_prober(Prober::portable());
        map.add(1, 1).unwrap();
        map.release();
        assert_eq!(map.capacity(), 0);
        assert_eq!(map.len(), 0);
        map.release();
        assert!(!map.contains(&1));
        map.add(2, 2).unwrap();
        assert_eq!(map.try_get(&2), Some(&2));
    }

    #[test]
    fn test_drops_values() {
        let tracker = Rc::new(());
        {
            let mut map = HashMap::with_prober(Prober::portable());
            for i in 0..20 {
                map.add(i, Rc::clone(&tracker)).unwrap();
            }
            assert_eq!(Rc::strong_count(&tracker), 21);
            map.remove(&0);
            assert_eq!(Rc::strong_count(&tracker), 20);
            map.clear();
            assert_eq!(Rc::strong_count(&tracker), 1);
            map.add(1, Rc::clone(&tracker)).unwrap();
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_iteration() {
        let mut map = HashMap::with_prober(Prober::portable());
        for i in 0..30u32 {
            map.add(i, i * 2).unwrap();
        }
        map.remove(&5);
        let mut seen: Vec<_> = map.iter().map(|(&k, &v)| (k, v)).collect();
        seen.sort_unstable();
        let expected: Vec<_> = (0..30u32).filter(|&i| i != 5).map(|i| (i, i * 2)).collect();
        assert_eq!(seen, expected);
        assert_eq!(map.iter().len(), 29);
        assert_eq!(map.keys().count(), 29);
        assert_eq!(map.values().copied().sum::<u32>(), (0..30).sum::<u32>() * 2 - 10);
    }

    #[test]
    fn test_churn() {
        let mut map = HashMap::with_prober(Prober::portable());
        for i in 0..100_000u64 {
            map.add(i, i).unwrap();
            assert_eq!(map.try_get(&i), Some(&i));
            if i % 3 == 0 {
                assert!(map.remove(&i));
            }
        }
        for i in 0..100_000u64 {
            map.remove(&i);
        }
        assert_eq!(map.len(), 0);
    }
}
