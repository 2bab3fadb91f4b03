//! Deduplicating string interner.
//!
//! [`StringPool`] copies each new string into its own [`BumpAllocator`] and
//! remembers it in an [`UnsafeHashSet`] keyed by content. Interning content
//! that is already present hands back the existing span.
//!
//! A take always copies first and looks up second. When the content turns
//! out to be a duplicate, the copy is still the most recent arena allocation,
//! so [`BumpAllocator::free`] can roll it back. Any change that allocates from
//! the arena between the copy and the lookup breaks that rollback.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::bump::BumpAllocator;
use crate::hash_set::UnsafeHashSet;
use crate::log::{self, LogBuilder, LogLevel};
use crate::span::{StringSpan, UnsafeSpan};

const COMPONENT: &str = "string_pool";

/// A pooled string, hashed and compared by content.
///
/// Keys only live inside the pool's set, and the set is cleared whenever the
/// arena is reset, so the viewed bytes are alive whenever a key is read.
struct PooledKey(UnsafeSpan<u8>);

impl PooledKey {
    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: see the type-level invariant.
        unsafe { self.0.as_slice() }
    }
}

impl Hash for PooledKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes().hash(state);
    }
}

impl PartialEq for PooledKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for PooledKey {}

impl Borrow<[u8]> for PooledKey {
    fn borrow(&self) -> &[u8] {
        self.bytes()
    }
}

/// String interner backed by a bump arena.
///
/// Spans returned by [`take`](Self::take) stay valid until the pool is
/// cleared or dropped.
pub struct StringPool {
    set: UnsafeHashSet<PooledKey>,
    arena: BumpAllocator,
}

// SAFETY: the keys point into the arena the pool owns.
unsafe impl Send for StringPool {}

impl StringPool {
    /// Create an empty pool using the configured page size.
    pub fn new() -> Self {
        Self {
            set: UnsafeHashSet::new(),
            arena: BumpAllocator::new(),
        }
    }

    /// Create an empty pool whose arena uses `page_size` pages.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            set: UnsafeHashSet::new(),
            arena: BumpAllocator::with_page_size(page_size),
        }
    }

    /// Intern `bytes`, returning the pooled copy.
    ///
    /// Equal contents always return the same span.
    pub fn take(&mut self, bytes: &[u8]) -> StringSpan<u8> {
        if bytes.is_empty() {
            return StringSpan::empty();
        }
        let copy = self.arena.alloc_slice_copy(bytes);
        let (stored, inserted) = self.set.get_or_add(PooledKey(copy));
        let stored = stored.0;
        if !inserted {
            let freed = self.arena.free(copy.as_non_null(), copy.len());
            debug_assert!(freed, "duplicate copy was not the last allocation");
        }
        // SAFETY: `stored` views live arena bytes.
        unsafe { StringSpan::from_raw_parts(stored.as_ptr(), stored.len()) }
    }

    /// Intern the UTF-8 bytes of `text`.
    pub fn take_str(&mut self, text: &str) -> StringSpan<u8> {
        self.take(text.as_bytes())
    }

    /// Whether `bytes` has been interned.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        bytes.is_empty() || self.set.contains(bytes)
    }

    /// Number of distinct non-empty strings interned.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Whether nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Bytes the arena currently hands out.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Forget every string, keeping the arena pages for reuse.
    ///
    /// Spans handed out earlier must not be read afterwards.
    pub fn clear(&mut self) {
        if log::would_log(LogLevel::Debug) {
            LogBuilder::new(LogLevel::Debug, COMPONENT)
                .message("pool cleared")
                .field_int("strings", self.set.len() as i64)
                .field_bytes("bytes", self.arena.allocated_bytes())
                .emit();
        }
        self.set.clear();
        self.arena.reset();
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringPool")
            .field("len", &self.set.len())
            .field("arena", &self.arena)
            .finish()
    }
}
