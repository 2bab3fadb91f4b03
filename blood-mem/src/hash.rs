//! Key hashing and slot tags.
//!
//! Keys are hashed with [`FxHasher`], which is deterministic across runs and
//! cheap for the small integer and byte-string keys these tables hold.
//!
//! The tagged hash map keeps one [`Tag`] byte per slot:
//!
//! ```text
//! 0x00         empty
//! 0x7F         tombstone
//! 0x80 | h7    filled, h7 = 7 bits derived from the key hash
//! ```
//!
//! Only filled tags have the top bit set, so "free" (empty or tombstone) is a
//! single bit test that vector code can extract with a movemask.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Multiplier used to spread the hash before folding it into a tag.
pub const TAG_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Hash a key with the crate-wide hasher.
#[inline]
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// One byte of per-slot metadata.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u8);

impl Tag {
    /// A slot that has never held an entry since the last rebuild.
    pub const EMPTY: Tag = Tag(0x00);
    /// A slot whose entry was removed.
    pub const TOMBSTONE: Tag = Tag(0x7F);
    /// Bit set on every filled tag.
    pub const FILLED_BIT: u8 = 0x80;

    /// Derive the filled tag for a key hash.
    #[inline]
    pub fn from_hash(hash: u64) -> Tag {
        let mut h = hash.wrapping_mul(TAG_MIX);
        h ^= h >> 32;
        h ^= h >> 16;
        h ^= h >> 8;
        Tag(Self::FILLED_BIT | (h as u8 & 0x7F))
    }

    /// The raw byte as stored in the tag array.
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Rebuild a tag from a raw byte.
    #[inline]
    pub const fn from_raw(raw: u8) -> Tag {
        Tag(raw)
    }

    /// Whether the slot holds a live entry.
    #[inline]
    pub const fn is_filled(self) -> bool {
        self.0 & Self::FILLED_BIT != 0
    }

    /// Whether the slot can take a new entry.
    #[inline]
    pub const fn is_free(self) -> bool {
        !self.is_filled()
    }

    /// Structured view of the tag.
    pub fn state(self) -> SlotState {
        match self {
            Tag::EMPTY => SlotState::Empty,
            Tag::TOMBSTONE => SlotState::Tombstone,
            Tag(raw) if raw & Self::FILLED_BIT != 0 => SlotState::Filled(raw & 0x7F),
            // Bytes 0x01..=0x7E are never written.
            Tag(_) => SlotState::Empty,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            SlotState::Empty => f.write_str("Tag::EMPTY"),
            SlotState::Tombstone => f.write_str("Tag::TOMBSTONE"),
            SlotState::Filled(h7) => write!(f, "Tag::Filled({h7:#04x})"),
        }
    }
}

/// What a slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never used since the last rebuild; ends a probe sequence.
    Empty,
    /// Previously used; probing continues past it.
    Tombstone,
    /// Holds an entry whose hash folds to this 7-bit fragment.
    Filled(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_is_always_filled() {
        for i in 0..10_000u64 {
            let tag = Tag::from_hash(hash_key(&i));
            assert!(tag.is_filled());
            assert_ne!(tag, Tag::EMPTY);
            assert_ne!(tag, Tag::TOMBSTONE);
            assert!(matches!(tag.state(), SlotState::Filled(_)));
        }
    }

    #[test]
    fn test_tag_derivation_is_stable() {
        // Zero mixes to zero.
        assert_eq!(Tag::from_hash(0).raw(), 0x80);
        // 1 * TAG_MIX folded: the low byte after the three xor-shifts.
        let mut h = TAG_MIX;
        h ^= h >> 32;
        h ^= h >> 16;
        h ^= h >> 8;
        assert_eq!(Tag::from_hash(1).raw(), 0x80 | (h as u8 & 0x7F));
    }

    #[test]
    fn test_tags_spread() {
        let mut seen = [false; 128];
        for i in 0..4096u64 {
            let SlotState::Filled(h7) = Tag::from_hash(hash_key(&i)).state() else {
                unreachable!()
            };
            seen[h7 as usize] = true;
        }
        assert!(seen.iter().filter(|&&s| s).count() > 100);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(Tag::EMPTY.state(), SlotState::Empty);
        assert_eq!(Tag::TOMBSTONE.state(), SlotState::Tombstone);
        assert!(Tag::EMPTY.is_free());
        assert!(Tag::TOMBSTONE.is_free());
        assert_eq!(format!("{:?}", Tag::TOMBSTONE), "Tag::TOMBSTONE");
    }

    #[test]
    fn test_hash_key_is_deterministic() {
        assert_eq!(hash_key("blood"), hash_key("blood"));
        assert_ne!(hash_key(&1u32), hash_key(&2u32));
    }
}
