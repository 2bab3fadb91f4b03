//! Interfaces to services the memory runtime consumes but does not own.
//!
//! Directory enumeration and value formatting live outside this crate. The
//! runtime only needs the shapes below; the `std` backed implementations are
//! here so the interfaces can be exercised without a host.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::list::UnsafeList;

// ============================================================================
// Directory enumeration
// ============================================================================

/// Kind and permission bits of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryAttributes {
    /// The entry is a directory.
    pub is_dir: bool,
    /// The entry is a symbolic link.
    pub is_symlink: bool,
    /// The entry cannot be written.
    pub readonly: bool,
}

/// One record produced by a [`DirectoryEntries`] provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Full path of the entry.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Creation time, where the platform records one.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Last access time.
    pub accessed: Option<SystemTime>,
    /// Kind and permissions.
    pub attributes: EntryAttributes,
}

/// Enumerates the entries of one directory.
pub trait DirectoryEntries {
    /// Iterator over the entries of a directory.
    type Iter: Iterator<Item = io::Result<DirectoryEntry>>;

    /// Start enumerating `dir`. Order is unspecified.
    fn entries(&self, dir: &Path) -> io::Result<Self::Iter>;

    /// Enumerate `dir` into a list, stopping at the first error.
    fn collect_entries(&self, dir: &Path) -> io::Result<UnsafeList<DirectoryEntry>> {
        let mut list = UnsafeList::new();
        for entry in self.entries(dir)? {
            list.add(entry?);
        }
        Ok(list)
    }
}

/// [`DirectoryEntries`] over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDirectoryEntries;

/// Iterator returned by [`FsDirectoryEntries`].
#[derive(Debug)]
pub struct FsEntryIter {
    inner: fs::ReadDir,
}

impl Iterator for FsEntryIter {
    type Item = io::Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        Some(describe(entry))
    }
}

fn describe(entry: fs::DirEntry) -> io::Result<DirectoryEntry> {
    let file_type = entry.file_type()?;
    let meta = entry.metadata()?;
    Ok(DirectoryEntry {
        path: entry.path(),
        size: meta.len(),
        created: meta.created().ok(),
        modified: meta.modified().ok(),
        accessed: meta.accessed().ok(),
        attributes: EntryAttributes {
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
            readonly: meta.permissions().readonly(),
        },
    })
}

impl DirectoryEntries for FsDirectoryEntries {
    type Iter = FsEntryIter;

    fn entries(&self, dir: &Path) -> io::Result<FsEntryIter> {
        Ok(FsEntryIter {
            inner: fs::read_dir(dir)?,
        })
    }
}

// ============================================================================
// Value formatting
// ============================================================================

/// Renders values of `T` as text.
///
/// [`BasicString::append_formatted`](crate::string::BasicString::append_formatted)
/// drives a formatter into a string of either width.
pub trait ValueFormatter<T: ?Sized> {
    /// Write the text for `value` to `out`.
    fn write_value(&self, value: &T, out: &mut dyn fmt::Write) -> fmt::Result;
}

/// Formats through `Display`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayFormatter;

impl<T: fmt::Display + ?Sized> ValueFormatter<T> for DisplayFormatter {
    fn write_value(&self, value: &T, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{value}")
    }
}

/// Formats integers as `0x`-prefixed lowercase hex, zero padded to `width`
/// digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexFormatter {
    /// Minimum number of digits.
    pub width: usize,
}

impl<T: fmt::LowerHex + ?Sized> ValueFormatter<T> for HexFormatter {
    fn write_value(&self, value: &T, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "0x{:0width$x}", value, width = self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::{StdString, StdWString};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "blood-mem-external-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_fs_entries() {
        let dir = scratch_dir();
        fs::write(dir.join("a.txt"), b"12345").unwrap();
        fs::create_dir(dir.join("sub")).unwrap();

        let entries = FsDirectoryEntries.collect_entries(&dir).unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries
            .iter()
            .find(|e| e.path.ends_with("a.txt"))
            .unwrap();
        assert_eq!(file.size, 5);
        assert!(!file.attributes.is_dir);
        assert!(file.modified.is_some());
        let sub = entries.iter().find(|e| e.path.ends_with("sub")).unwrap();
        assert!(sub.attributes.is_dir);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = scratch_dir().join("missing");
        assert!(FsDirectoryEntries.entries(&dir).is_err());
    }

    #[test]
    fn test_display_formatter_into_strings() {
        let mut s = StdString::from_str("n=");
        s.append_formatted(&DisplayFormatter, &42).unwrap();
        s.append_formatted(&DisplayFormatter, " ok").unwrap();
        assert_eq!(s.as_str(), Some("n=42 ok"));

        let mut w = StdWString::new();
        w.append_formatted(&DisplayFormatter, &1.5f64).unwrap();
        assert_eq!(w.to_string_lossy(), "1.5");
    }

    #[test]
    fn test_hex_formatter() {
        let mut s = StdString::new();
        s.append_formatted(&HexFormatter { width: 4 }, &0xABu32).unwrap();
        assert_eq!(s.as_str(), Some("0x00ab"));
    }
}
