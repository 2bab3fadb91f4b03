//! Property-based tests for the Blood memory runtime.
//!
//! Each container is driven with random operation sequences and compared
//! against the matching std collection.

use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet, VecDeque};

use blood_mem::probe::{concat_portable, GroupProber, PortableProber};
use blood_mem::{
    align, BumpAllocator, HashMap, Prober, SimdProber, StdString, StringPool, Tag,
    UnsafeDictionary, UnsafeHashSet, UnsafeList, UnsafeQueue,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum MapOp {
    Insert(u16, u32),
    Remove(u16),
    Get(u16),
}

/// Keys drawn from a small range so inserts and removes collide.
fn map_op() -> impl Strategy<Value = MapOp> {
    prop_oneof![
        (0u16..64, any::<u32>()).prop_map(|(k, v)| MapOp::Insert(k, v)),
        (0u16..64).prop_map(MapOp::Remove),
        (0u16..64).prop_map(MapOp::Get),
    ]
}

#[derive(Debug, Clone)]
enum ListOp {
    Push(i32),
    Pop,
    Insert(usize, i32),
    RemoveAt(usize),
    SwapRemove(usize),
}

fn list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        any::<i32>().prop_map(ListOp::Push),
        Just(ListOp::Pop),
        (0usize..40, any::<i32>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
        (0usize..40).prop_map(ListOp::RemoveAt),
        (0usize..40).prop_map(ListOp::SwapRemove),
    ]
}

/// A valid slot tag: empty, tombstone or filled.
fn tag_byte() -> impl Strategy<Value = u8> {
    prop_oneof![Just(0x00u8), Just(0x7Fu8), 0x80u8..=0xFF]
}

fn check_map(prober: Prober, ops: &[MapOp]) -> Result<(), TestCaseError> {
    let mut map = HashMap::with_prober(prober);
    let mut model = StdHashMap::new();
    for op in ops {
        match *op {
            MapOp::Insert(k, v) => {
                prop_assert_eq!(map.insert(k, v), model.insert(k, v));
            }
            MapOp::Remove(k) => {
                prop_assert_eq!(map.remove_entry(&k), model.remove_entry(&k));
            }
            MapOp::Get(k) => {
                prop_assert_eq!(map.try_get(&k), model.get(&k));
            }
        }
        prop_assert_eq!(map.len(), model.len());
    }
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
    let mut expected: Vec<_> = model.into_iter().collect();
    entries.sort_unstable();
    expected.sort_unstable();
    prop_assert_eq!(entries, expected);
    Ok(())
}

proptest! {
    /// The portable-probed map behaves like std's HashMap
    #[test]
    fn hash_map_portable_matches_model(ops in prop::collection::vec(map_op(), 0..400)) {
        check_map(Prober::portable(), &ops)?;
    }

    /// The SIMD-probed map behaves like std's HashMap, where AVX2 exists
    #[test]
    fn hash_map_simd_matches_model(ops in prop::collection::vec(map_op(), 0..400)) {
        if let Some(prober) = Prober::simd() {
            check_map(prober, &ops)?;
        }
    }

    /// UnsafeDictionary behaves like std's HashMap
    #[test]
    fn dictionary_matches_model(ops in prop::collection::vec(map_op(), 0..400)) {
        let mut dict = UnsafeDictionary::new();
        let mut model = StdHashMap::new();
        for op in ops {
            match op {
                MapOp::Insert(k, v) => prop_assert_eq!(dict.set(k, v), model.insert(k, v)),
                MapOp::Remove(k) => prop_assert_eq!(dict.remove_entry(&k), model.remove_entry(&k)),
                MapOp::Get(k) => prop_assert_eq!(dict.try_get(&k), model.get(&k)),
            }
            prop_assert_eq!(dict.len(), model.len());
        }
        prop_assert!(dict.len() * 4 <= dict.capacity().max(1) * 3);
    }

    /// UnsafeHashSet behaves like std's HashSet
    #[test]
    fn hash_set_matches_model(ops in prop::collection::vec((any::<bool>(), 0u8..50), 0..300)) {
        let mut set = UnsafeHashSet::new();
        let mut model = StdHashSet::new();
        for (add, value) in ops {
            if add {
                prop_assert_eq!(set.add(value), model.insert(value));
            } else {
                prop_assert_eq!(set.remove(&value), model.remove(&value));
            }
        }
        prop_assert_eq!(set.len(), model.len());
        prop_assert!(model.iter().all(|v| set.contains(v)));
    }

    /// UnsafeList behaves like Vec, including out-of-range errors
    #[test]
    fn list_matches_model(ops in prop::collection::vec(list_op(), 0..300)) {
        let mut list = UnsafeList::new();
        let mut model: Vec<i32> = Vec::new();
        for op in ops {
            match op {
                ListOp::Push(v) => {
                    list.push(v);
                    model.push(v);
                }
                ListOp::Pop => prop_assert_eq!(list.pop(), model.pop()),
                ListOp::Insert(i, v) => {
                    let ok = i <= model.len();
                    prop_assert_eq!(list.insert(i, v).is_ok(), ok);
                    if ok {
                        model.insert(i, v);
                    }
                }
                ListOp::RemoveAt(i) => {
                    let expected = (i < model.len()).then(|| model.remove(i));
                    prop_assert_eq!(list.remove_at(i).ok(), expected);
                }
                ListOp::SwapRemove(i) => {
                    let expected = (i < model.len()).then(|| model.swap_remove(i));
                    prop_assert_eq!(list.swap_remove(i).ok(), expected);
                }
            }
            prop_assert_eq!(list.as_slice(), model.as_slice());
        }
    }

    /// UnsafeQueue behaves like VecDeque used as a FIFO
    #[test]
    fn queue_matches_model(ops in prop::collection::vec(prop::option::of(any::<u16>()), 0..500)) {
        let mut queue = UnsafeQueue::new();
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Some(v) => {
                    queue.enqueue(v);
                    model.push_back(v);
                }
                None => prop_assert_eq!(queue.try_dequeue(), model.pop_front()),
            }
            prop_assert_eq!(queue.len(), model.len());
        }
        prop_assert!(queue.iter().eq(model.iter()));
    }

    /// Bump allocations are aligned and never overlap
    #[test]
    fn bump_allocations_disjoint(
        requests in prop::collection::vec((1usize..300, 0u32..7), 1..200),
        page_shift in 6u32..12,
    ) {
        let mut arena = BumpAllocator::with_page_size(1 << page_shift);
        let mut ranges = Vec::new();
        for (size, align_shift) in requests {
            let alignment = 1usize << align_shift;
            let ptr = arena.alloc(size, alignment).as_ptr() as usize;
            prop_assert!(align::is_aligned(ptr, alignment));
            ranges.push((ptr, ptr + size));
        }
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
        let total: usize = ranges.iter().map(|(start, end)| end - start).sum();
        prop_assert!(arena.allocated_bytes() >= total);
    }

    /// Interning returns one span per distinct content
    #[test]
    fn string_pool_dedups(words in prop::collection::vec("[a-d]{1,4}", 0..200)) {
        let mut pool = StringPool::with_page_size(128);
        let mut seen = StdHashMap::new();
        for word in &words {
            let span = pool.take_str(word);
            let first = *seen.entry(word.clone()).or_insert(span.as_ptr());
            prop_assert_eq!(span.as_ptr(), first);
            prop_assert_eq!(unsafe { span.to_str() }, Some(word.as_str()));
        }
        prop_assert_eq!(pool.len(), seen.len());
    }

    /// StdString edits agree with String
    #[test]
    fn string_edits_match_model(
        base in "[a-c]{0,20}",
        insert_at in 0usize..25,
        piece in "[x-z]{0,5}",
        from in "[a-c]{1,2}",
    ) {
        let mut s = StdString::from_str(&base);
        let mut model = base.clone();
        let ok = insert_at <= model.len();
        prop_assert_eq!(s.insert(insert_at, piece.as_bytes()).is_ok(), ok);
        if ok {
            model.insert_str(insert_at, &piece);
        }
        prop_assert_eq!(s.as_str(), Some(model.as_str()));
        prop_assert_eq!(s.find(from.as_bytes()), model.find(&from));
        prop_assert_eq!(s.rfind(from.as_bytes()), model.rfind(&from));
        let count = model.matches(&from).count();
        prop_assert_eq!(s.replace_all(from.as_bytes(), b"_"), count);
        let replaced = model.replace(&from, "_");
        prop_assert_eq!(s.as_str(), Some(replaced.as_str()));
        prop_assert_eq!(unsafe { *s.c_str().add(s.len()) }, 0);
    }

    /// The portable prober agrees with a byte-by-byte scan
    #[test]
    fn portable_prober_matches_scan(raw in prop::array::uniform8(tag_byte()), query in 0x80u8..=0xFF) {
        let group: Vec<Tag> = raw.iter().map(|&b| Tag::from_raw(b)).collect();
        let scan = |pred: &dyn Fn(u8) -> bool| {
            raw.iter().enumerate().fold(0u64, |m, (i, &b)| if pred(b) { m | 1 << i } else { m })
        };
        let p = PortableProber;
        prop_assert_eq!(p.match_tag(&group, Tag::from_raw(query)), scan(&|b| b == query));
        prop_assert_eq!(p.match_empty(&group), scan(&|b| b == 0x00));
        prop_assert_eq!(p.match_free(&group), scan(&|b| b < 0x80));
        prop_assert_eq!(p.match_filled(&group), scan(&|b| b >= 0x80));
    }

    /// The SIMD prober agrees with eight portable groups
    #[test]
    fn simd_prober_matches_portable(raw in prop::collection::vec(tag_byte(), 64), query in 0x80u8..=0xFF) {
        if let Some(simd) = SimdProber::detect() {
            let group: Vec<Tag> = raw.iter().map(|&b| Tag::from_raw(b)).collect();
            let tag = Tag::from_raw(query);
            let p = PortableProber;
            prop_assert_eq!(simd.match_tag(&group, tag), concat_portable(&group, |g| p.match_tag(g, tag)));
            prop_assert_eq!(simd.match_empty(&group), concat_portable(&group, |g| p.match_empty(g)));
            prop_assert_eq!(simd.match_free(&group), concat_portable(&group, |g| p.match_free(g)));
            prop_assert_eq!(simd.match_filled(&group), concat_portable(&group, |g| p.match_filled(g)));
        }
    }
}
