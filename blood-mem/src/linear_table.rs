//! Linear open addressing shared by [`UnsafeDictionary`] and [`UnsafeHashSet`].
//!
//! One array of [`Bucket`]s, probed from `hash % capacity` one slot at a time
//! with wraparound. Slot state is an enum rather than reserved hash values,
//! so every 32-bit hash is a legal stored hash.
//!
//! Inserting a new key takes the first empty-or-tombstone slot on its path,
//! but duplicate detection keeps scanning past tombstones until an empty slot
//! proves the key absent. The table rebuilds when live entries plus
//! tombstones would exceed three quarters of the slots: it doubles when live
//! entries need the room, and otherwise rebuilds in place to shed tombstones.
//!
//! [`UnsafeDictionary`]: crate::dictionary::UnsafeDictionary
//! [`UnsafeHashSet`]: crate::hash_set::UnsafeHashSet

use std::borrow::Borrow;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use crate::config;
use crate::error::{MemoryError, Result};
use crate::hash::hash_key;
use crate::log::{self, LogBuilder, LogLevel};
use crate::raw::RawAllocator;

/// One slot of a linear table.
pub(crate) enum Bucket<K, V> {
    /// Never used since the last rebuild; ends a probe.
    Empty,
    /// Previously used; probing continues past it.
    Tombstone,
    /// A live entry with its cached hash.
    Occupied { hash: u32, key: K, value: V },
}

#[inline]
pub(crate) fn table_hash<Q: Hash + ?Sized>(key: &Q) -> u32 {
    let h = hash_key(key);
    (h ^ (h >> 32)) as u32
}

/// Slots needed to hold `entries` under the load factor.
#[inline]
fn slots_for(entries: usize) -> usize {
    entries
        .checked_mul(4)
        .map(|n| n.div_ceil(3))
        .unwrap_or_else(|| panic!("capacity overflow: {entries} entries"))
}

#[inline]
fn over_load(used: usize, capacity: usize) -> bool {
    used * 4 > capacity * 3
}

pub(crate) struct LinearTable<K, V> {
    buckets: NonNull<Bucket<K, V>>,
    capacity: usize,
    len: usize,
    tombstones: usize,
    component: &'static str,
    _marker: PhantomData<(K, V)>,
}

// SAFETY: the table owns its entries.
unsafe impl<K: Send, V: Send> Send for LinearTable<K, V> {}
// SAFETY: shared access only hands out shared references.
unsafe impl<K: Sync, V: Sync> Sync for LinearTable<K, V> {}

impl<K, V> LinearTable<K, V> {
    pub(crate) const fn new(component: &'static str) -> Self {
        Self {
            buckets: NonNull::dangling(),
            capacity: 0,
            len: 0,
            tombstones: 0,
            component,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn tombstones(&self) -> usize {
        self.tombstones
    }

    #[inline]
    fn buckets(&self) -> &[Bucket<K, V>] {
        // SAFETY: `capacity` initialized buckets, or dangling with 0.
        unsafe { std::slice::from_raw_parts(self.buckets.as_ptr(), self.capacity) }
    }

    #[inline]
    fn buckets_mut(&mut self) -> &mut [Bucket<K, V>] {
        // SAFETY: as above, with unique access.
        unsafe { std::slice::from_raw_parts_mut(self.buckets.as_ptr(), self.capacity) }
    }

    /// Slot holding `key`.
    pub(crate) fn find<Q>(&self, hash: u32, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let buckets = self.buckets();
        if buckets.is_empty() {
            return None;
        }
        let mut index = hash as usize % buckets.len();
        for _ in 0..buckets.len() {
            match &buckets[index] {
                Bucket::Empty => return None,
                Bucket::Occupied { hash: h, key: k, .. } if *h == hash && k.borrow() == key => {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + 1) % buckets.len();
        }
        None
    }

    /// First empty-or-tombstone slot on the path of `hash`.
    fn free_slot(&self, hash: u32) -> usize {
        let buckets = self.buckets();
        let mut index = hash as usize % buckets.len();
        for _ in 0..buckets.len() {
            if !matches!(buckets[index], Bucket::Occupied { .. }) {
                return index;
            }
            index = (index + 1) % buckets.len();
        }
        panic!("{}: probe cycle with no free slot in {} slots", self.component, buckets.len());
    }

    /// Write a new entry into a free slot.
    fn place(&mut self, hash: u32, key: K, value: V) -> usize {
        let index = self.free_slot(hash);
        let slot = &mut self.buckets_mut()[index];
        let was_tombstone = matches!(slot, Bucket::Tombstone);
        // The slot holds no key or value, so overwriting drops nothing.
        *slot = Bucket::Occupied { hash, key, value };
        if was_tombstone {
            self.tombstones -= 1;
        }
        self.len += 1;
        index
    }

    /// Make room for one more entry.
    fn reserve_one(&mut self) {
        if self.capacity == 0 {
            self.resize(config::config().initial_capacity.max(slots_for(1)));
        } else if over_load(self.len + self.tombstones + 1, self.capacity) {
            // Shed tombstones in place while live entries stay under half.
            let target = if (self.len + 1) * 2 > self.capacity {
                self.capacity * 2
            } else {
                self.capacity
            };
            self.resize(target);
        }
    }

    pub(crate) fn ensure_capacity(&mut self, entries: usize) {
        let needed = slots_for(entries);
        if needed > self.capacity {
            self.resize(needed);
        }
    }

    /// Rebuild into `new_capacity` slots.
    fn resize(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > 0);
        let old = self.buckets;
        let old_capacity = self.capacity;

        let buckets = RawAllocator::alloc_array::<Bucket<K, V>>(new_capacity);
        for i in 0..new_capacity {
            // SAFETY: in bounds of the fresh allocation.
            unsafe { buckets.as_ptr().add(i).write(Bucket::Empty) };
        }
        self.buckets = buckets;
        self.capacity = new_capacity;
        self.len = 0;
        self.tombstones = 0;

        for i in 0..old_capacity {
            // SAFETY: every old bucket is initialized and read exactly once.
            if let Bucket::Occupied { hash, key, value } = unsafe { old.as_ptr().add(i).read() } {
                self.place(hash, key, value);
            }
        }
        if old_capacity > 0 {
            // SAFETY: allocated with `old_capacity` elements, all moved out.
            unsafe { RawAllocator::free_array(old, old_capacity) };
        }

        if log::would_log(LogLevel::Trace) {
            LogBuilder::new(LogLevel::Trace, self.component)
                .message("resized")
                .field_int("from", old_capacity as i64)
                .field_int("to", new_capacity as i64)
                .field_int("len", self.len as i64)
                .emit();
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(table_hash(key), key)?;
        self.entry_at(index)
    }

    pub(crate) fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(table_hash(key), key)?;
        match &mut self.buckets_mut()[index] {
            Bucket::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    pub(crate) fn entry_at(&self, index: usize) -> Option<(&K, &V)> {
        match &self.buckets()[index] {
            Bucket::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        }
    }

    fn value_at_mut(&mut self, index: usize) -> &mut V {
        match &mut self.buckets_mut()[index] {
            Bucket::Occupied { value, .. } => value,
            _ => unreachable!("slot {index} is not occupied"),
        }
    }

    /// Slot of `key`, inserting `make()` first if absent. The flag reports
    /// whether an insert happened.
    pub(crate) fn find_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> (usize, bool)
    where
        K: Hash + Eq,
    {
        let hash = table_hash(&key);
        if let Some(index) = self.find(hash, &key) {
            return (index, false);
        }
        self.reserve_one();
        (self.place(hash, key, make()), true)
    }

    pub(crate) fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V
    where
        K: Hash + Eq,
    {
        let (index, _) = self.find_or_insert_with(key, make);
        self.value_at_mut(index)
    }

    /// Insert a key that must not be present.
    pub(crate) fn try_add(&mut self, key: K, value: V) -> Result<()>
    where
        K: Hash + Eq,
    {
        let hash = table_hash(&key);
        if self.find(hash, &key).is_some() {
            return Err(MemoryError::DuplicateKey);
        }
        self.reserve_one();
        self.place(hash, key, value);
        Ok(())
    }

    /// Insert or overwrite, returning the previous value.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<V>
    where
        K: Hash + Eq,
    {
        let hash = table_hash(&key);
        if let Some(index) = self.find(hash, &key) {
            return Some(mem::replace(self.value_at_mut(index), value));
        }
        self.reserve_one();
        self.place(hash, key, value);
        None
    }

    pub(crate) fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(table_hash(key), key)?;
        let slot = mem::replace(&mut self.buckets_mut()[index], Bucket::Tombstone);
        self.len -= 1;
        self.tombstones += 1;
        match slot {
            Bucket::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        }
    }

    /// Empty every slot, keeping the capacity.
    pub(crate) fn clear(&mut self) {
        for slot in self.buckets_mut() {
            *slot = Bucket::Empty;
        }
        self.len = 0;
        self.tombstones = 0;
    }

    /// Drop every entry and free the slots. Idempotent.
    pub(crate) fn release(&mut self) {
        if self.capacity > 0 {
            // SAFETY: the buckets are initialized and owned; the pointer is
            // reset to dangling right after.
            unsafe {
                ptr::drop_in_place(self.buckets_mut() as *mut [Bucket<K, V>]);
                RawAllocator::free_array(self.buckets, self.capacity);
            }
        }
        self.buckets = NonNull::dangling();
        self.capacity = 0;
        self.len = 0;
        self.tombstones = 0;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.buckets().iter().filter_map(|slot| match slot {
            Bucket::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> + '_ {
        self.buckets_mut().iter_mut().filter_map(|slot| match slot {
            Bucket::Occupied { key, value, .. } => Some((&*key, value)),
            _ => None,
        })
    }
}

impl<K, V> Drop for LinearTable<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_for() {
        assert_eq!(slots_for(0), 0);
        assert_eq!(slots_for(3), 4);
        assert_eq!(slots_for(4), 6);
        assert!(!over_load(3, 4));
        assert!(over_load(4, 4));
    }

    #[test]
    fn test_lazy_allocation() {
        let mut table: LinearTable<u32, u32> = LinearTable::new("test");
        assert_eq!(table.capacity(), 0);
        assert!(table.get(&1).is_none());
        table.insert(1, 10);
        assert!(table.capacity() >= 2);
        assert_eq!(table.get(&1), Some((&1, &10)));
    }

    #[test]
    fn test_load_factor_growth() {
        let mut table: LinearTable<u32, ()> = LinearTable::new("test");
        for i in 0..100 {
            table.insert(i, ());
            assert!(!over_load(table.len(), table.capacity()));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_duplicate_detected_past_tombstone() {
        let mut table: LinearTable<u32, u32> = LinearTable::new("test");
        table.ensure_capacity(16);
        let capacity = table.capacity() as u32;
        // Interleave tombstones with live keys; every live key must still
        // be found and rejected as a duplicate.
        for i in 0..capacity / 2 {
            table.insert(i, i);
        }
        for i in (0..capacity / 2).step_by(2) {
            table.remove_entry(&i);
        }
        for i in (1..capacity / 2).step_by(2) {
            assert_eq!(table.try_add(i, 0), Err(MemoryError::DuplicateKey));
            assert_eq!(table.get(&i), Some((&i, &i)));
        }
    }

    #[test]
    fn test_churn_does_not_grow_without_bound() {
        let mut table: LinearTable<u64, u64> = LinearTable::new("test");
        for i in 0..10_000u64 {
            table.insert(i, i);
            table.remove_entry(&i);
        }
        assert_eq!(table.len(), 0);
        assert!(table.capacity() <= 8, "capacity {}", table.capacity());
    }

    #[test]
    fn test_clear_and_release() {
        let mut table: LinearTable<String, u32> = LinearTable::new("test");
        table.insert("a".into(), 1);
        table.insert("b".into(), 2);
        let capacity = table.capacity();
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), capacity);
        assert!(table.get("a").is_none());
        table.insert("c".into(), 3);
        table.release();
        table.release();
        assert_eq!(table.capacity(), 0);
        table.insert("d".into(), 4);
        assert_eq!(table.get("d").map(|(_, v)| *v), Some(4));
    }
}
