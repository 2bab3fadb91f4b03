//! # Blood Memory Runtime
//!
//! Manual memory management for Blood programs that want C-like control
//! over allocation:
//!
//! - **Arenas**: [`BumpAllocator`] for one thread and
//!   [`ConcurrentBumpAllocator`] with a lock-free fast path
//! - **Tagged Hash Map**: open addressing with one-byte tags, probed a whole
//!   group at a time by AVX2 or a portable SWAR fallback
//! - **Unsafe Containers**: list, queue, hash set, dictionary and strings
//!   built directly on [`RawAllocator`], each releasable on demand
//! - **Sync Primitives**: fence, light semaphore, reader/writer lock, mutex
//!
//! Nothing here is garbage collected or reference counted. Containers own
//! their buffers, spans only view memory owned elsewhere, and arena pointers
//! carry no lifetime.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BLOOD MEMORY                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  StringPool  │  │  Containers  │  │   HashMap    │          │
//! │  │(string_pool) │  │ (list, ...)  │  │ (hash_map)   │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                 │                 │                   │
//! │  ┌──────────────┐         │          ┌──────────────┐          │
//! │  │    Arenas    │         │          │   Probers    │          │
//! │  │ (bump, ...)  │         │          │  (probe.rs)  │          │
//! │  └──────────────┘         │          └──────────────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │     Sync     │  │ RawAllocator │  │ Config / Log │          │
//! │  │  (sync.rs)   │  │   (raw.rs)   │  │              │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! Only [`ConcurrentBumpAllocator`] and the types in [`sync`] may be used
//! from several threads at once. Every container is single-writer; callers
//! serialize access themselves.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod align;
pub mod bump;
pub mod concurrent_bump;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod external;
pub mod hash;
pub mod hash_map;
pub mod hash_set;
pub mod list;
pub mod log;
pub mod probe;
pub mod queue;
pub mod raw;
pub mod span;
pub mod string;
pub mod string_pool;
pub mod sync;

mod block;
mod linear_table;

// Re-exports
pub use bump::BumpAllocator;
pub use concurrent_bump::ConcurrentBumpAllocator;
pub use config::{ConfigError, MemoryConfig, MemoryConfigBuilder, ProbeMode};
pub use dictionary::UnsafeDictionary;
pub use error::{MemoryError, Result};
pub use external::{DirectoryEntries, DirectoryEntry, DisplayFormatter, FsDirectoryEntries, ValueFormatter};
pub use hash::{SlotState, Tag};
pub use hash_map::HashMap;
pub use hash_set::UnsafeHashSet;
pub use list::UnsafeList;
pub use probe::{GroupProber, PortableProber, Prober, SimdProber};
pub use queue::UnsafeQueue;
pub use raw::RawAllocator;
pub use span::{StringSpan, UnsafeSpan};
pub use string::{BasicString, CharUnit, StdString, StdWString};
pub use string_pool::StringPool;
pub use sync::{Deadline, Fence, ReadWriteLock, SemaphoreLight, SpinLock, UnsafeMutex};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_reexports_compose() {
        let mut pool = StringPool::new();
        let mut names: UnsafeDictionary<&str, StringSpan> = UnsafeDictionary::new();
        names.set("greeting", pool.take_str("hello"));
        let mut list: UnsafeList<StringSpan> = UnsafeList::new();
        list.add(pool.take_str("hello"));
        assert_eq!(names[&"greeting"], list[0]);
    }
}
