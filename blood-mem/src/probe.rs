//! Group probing over tag arrays.
//!
//! A *group* is `WIDTH` consecutive tags starting at a `WIDTH`-aligned slot.
//! Probers answer four questions about a group at once, each as a bitmask in
//! which bit `i` refers to slot `group_start + i`:
//!
//! | Query | Bit set when the tag... |
//! |-------|-------------------------|
//! | `match_tag` | equals the target tag |
//! | `match_free` | is empty or a tombstone |
//! | `match_empty` | is empty |
//! | `match_filled` | holds an entry |
//!
//! Two implementations exist. [`SimdProber`] uses AVX2: two 32-byte loads,
//! a byte compare each, and two movemasks combined into one 64-bit mask.
//! [`PortableProber`] loads 8 tags as a `u64` and finds matching bytes with
//! SWAR arithmetic. For the same 64 tags the SIMD mask equals the eight
//! portable masks concatenated, so a table built with one prober reads
//! correctly with the other.
//!
//! [`Prober`] picks one at startup according to
//! [`ProbeMode`](crate::config::ProbeMode).

use std::fmt;
use std::sync::OnceLock;

use crate::config::{self, ProbeMode};
use crate::hash::Tag;
use crate::log::{LogBuilder, LogLevel};

/// Vector-width tag matching.
pub trait GroupProber: Copy + fmt::Debug {
    /// Tags per group.
    const WIDTH: usize;

    /// Slots whose tag equals `tag`.
    fn match_tag(&self, group: &[Tag], tag: Tag) -> u64;

    /// Slots that are empty or tombstones.
    fn match_free(&self, group: &[Tag]) -> u64;

    /// Slots that are empty.
    fn match_empty(&self, group: &[Tag]) -> u64;

    /// Slots that hold an entry.
    fn match_filled(&self, group: &[Tag]) -> u64;
}

/// Iterator over the set bit positions of a mask, lowest first.
#[derive(Debug, Clone, Copy)]
pub struct BitIter(u64);

impl BitIter {
    /// Iterate the set bits of `mask`.
    #[inline]
    pub fn new(mask: u64) -> Self {
        Self(mask)
    }
}

impl Iterator for BitIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

// ============================================================================
// Portable (SWAR)
// ============================================================================

const LO_SEVEN: u64 = 0x7F7F_7F7F_7F7F_7F7F;
const HIGH_BITS: u64 = 0x8080_8080_8080_8080;
const ONES: u64 = 0x0101_0101_0101_0101;

/// 0x80 in every byte of `x` that is zero, 0x00 elsewhere.
///
/// Unlike the borrow-based `(x - ONES) & !x & HIGH_BITS` test this has no
/// false positives, so the result is exact for every byte.
#[inline]
const fn zero_bytes(x: u64) -> u64 {
    !(((x & LO_SEVEN) + LO_SEVEN) | x | LO_SEVEN)
}

/// Compress the per-byte top bits of `x` into the low 8 bits.
#[inline]
const fn compact(x: u64) -> u64 {
    ((x & HIGH_BITS) >> 7).wrapping_mul(0x0102_0408_1020_4080) >> 56
}

/// 8-wide prober built from 64-bit integer arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortableProber;

impl PortableProber {
    #[inline]
    fn load(group: &[Tag]) -> u64 {
        let mut bytes = [0u8; 8];
        for (byte, tag) in bytes.iter_mut().zip(&group[..8]) {
            *byte = tag.raw();
        }
        u64::from_le_bytes(bytes)
    }
}

impl GroupProber for PortableProber {
    const WIDTH: usize = 8;

    #[inline]
    fn match_tag(&self, group: &[Tag], tag: Tag) -> u64 {
        compact(zero_bytes(Self::load(group) ^ (ONES * tag.raw() as u64)))
    }

    #[inline]
    fn match_free(&self, group: &[Tag]) -> u64 {
        compact(!Self::load(group))
    }

    #[inline]
    fn match_empty(&self, group: &[Tag]) -> u64 {
        compact(zero_bytes(Self::load(group)))
    }

    #[inline]
    fn match_filled(&self, group: &[Tag]) -> u64 {
        compact(Self::load(group))
    }
}

// ============================================================================
// SIMD (AVX2)
// ============================================================================

/// 64-wide AVX2 prober.
///
/// A value of this type can only be obtained through
/// [`SimdProber::detect`], which proves the CPU supports AVX2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdProber {
    _detected: (),
}

impl SimdProber {
    /// Returns the prober if the running CPU supports AVX2.
    pub fn detect() -> Option<Self> {
        has_avx2().then_some(Self { _detected: () })
    }
}

/// Check if AVX2 is available at runtime.
#[inline]
pub fn has_avx2() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::{
        __m256i, _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8,
        _mm256_set1_epi8,
    };

    #[inline]
    fn combine(lo: i32, hi: i32) -> u64 {
        (lo as u32 as u64) | ((hi as u32 as u64) << 32)
    }

    /// # Safety
    ///
    /// AVX2 must be available and `ptr` must be valid for 64 byte reads.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn match_byte(ptr: *const u8, byte: u8) -> u64 {
        let needle = _mm256_set1_epi8(byte as i8);
        let lo = _mm256_loadu_si256(ptr.cast::<__m256i>());
        let hi = _mm256_loadu_si256(ptr.add(32).cast::<__m256i>());
        combine(
            _mm256_movemask_epi8(_mm256_cmpeq_epi8(lo, needle)),
            _mm256_movemask_epi8(_mm256_cmpeq_epi8(hi, needle)),
        )
    }

    /// # Safety
    ///
    /// AVX2 must be available and `ptr` must be valid for 64 byte reads.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn top_bits(ptr: *const u8) -> u64 {
        let lo = _mm256_loadu_si256(ptr.cast::<__m256i>());
        let hi = _mm256_loadu_si256(ptr.add(32).cast::<__m256i>());
        combine(_mm256_movemask_epi8(lo), _mm256_movemask_epi8(hi))
    }
}

#[cfg(target_arch = "x86_64")]
impl GroupProber for SimdProber {
    const WIDTH: usize = 64;

    #[inline]
    fn match_tag(&self, group: &[Tag], tag: Tag) -> u64 {
        let group = &group[..Self::WIDTH];
        // SAFETY: `self` proves AVX2 support; the slice holds 64 one-byte tags.
        unsafe { avx2::match_byte(group.as_ptr().cast(), tag.raw()) }
    }

    #[inline]
    fn match_free(&self, group: &[Tag]) -> u64 {
        !self.match_filled(group)
    }

    #[inline]
    fn match_empty(&self, group: &[Tag]) -> u64 {
        self.match_tag(group, Tag::EMPTY)
    }

    #[inline]
    fn match_filled(&self, group: &[Tag]) -> u64 {
        let group = &group[..Self::WIDTH];
        // SAFETY: as in `match_tag`.
        unsafe { avx2::top_bits(group.as_ptr().cast()) }
    }
}

// A `SimdProber` cannot be constructed off x86_64; these bodies keep the type
// usable in generic code there.
#[cfg(not(target_arch = "x86_64"))]
impl GroupProber for SimdProber {
    const WIDTH: usize = 64;

    fn match_tag(&self, group: &[Tag], tag: Tag) -> u64 {
        concat_portable(group, |g| PortableProber.match_tag(g, tag))
    }

    fn match_free(&self, group: &[Tag]) -> u64 {
        concat_portable(group, |g| PortableProber.match_free(g))
    }

    fn match_empty(&self, group: &[Tag]) -> u64 {
        concat_portable(group, |g| PortableProber.match_empty(g))
    }

    fn match_filled(&self, group: &[Tag]) -> u64 {
        concat_portable(group, |g| PortableProber.match_filled(g))
    }
}

/// Run an 8-wide query over 64 tags and concatenate the masks.
pub fn concat_portable(group: &[Tag], query: impl Fn(&[Tag]) -> u64) -> u64 {
    group[..64]
        .chunks_exact(8)
        .enumerate()
        .fold(0, |mask, (i, chunk)| mask | (query(chunk) << (i * 8)))
}

// ============================================================================
// Runtime selection
// ============================================================================

/// The prober a table uses, chosen at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prober {
    /// 64-wide AVX2 probing.
    Simd(SimdProber),
    /// 8-wide SWAR probing.
    Portable(PortableProber),
}

static DETECTED: OnceLock<Prober> = OnceLock::new();

impl Prober {
    /// The portable prober.
    pub const fn portable() -> Self {
        Prober::Portable(PortableProber)
    }

    /// The SIMD prober, if the CPU supports it.
    pub fn simd() -> Option<Self> {
        SimdProber::detect().map(Prober::Simd)
    }

    /// Resolve a probe mode against the running CPU.
    pub fn for_mode(mode: ProbeMode) -> Self {
        match mode {
            ProbeMode::Portable => Self::portable(),
            ProbeMode::Auto => Self::simd().unwrap_or_else(Self::portable),
            ProbeMode::Simd => Self::simd().unwrap_or_else(|| {
                LogBuilder::new(LogLevel::Warn, "probe")
                    .message("SIMD probing requested but AVX2 is unavailable; using portable")
                    .emit();
                Self::portable()
            }),
        }
    }

    /// The prober selected by the installed configuration.
    ///
    /// Resolved once per process.
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let mode = config::config().probe_mode;
            let prober = Self::for_mode(mode);
            LogBuilder::new(LogLevel::Info, "probe")
                .message("selected group prober")
                .field_str("mode", mode.as_str())
                .field_str("prober", prober.name())
                .field_int("width", prober.width() as i64)
                .emit();
            prober
        })
    }

    /// Tags per group.
    #[inline]
    pub const fn width(&self) -> usize {
        match self {
            Prober::Simd(_) => SimdProber::WIDTH,
            Prober::Portable(_) => PortableProber::WIDTH,
        }
    }

    /// Whether this is the SIMD prober.
    pub const fn is_simd(&self) -> bool {
        matches!(self, Prober::Simd(_))
    }

    /// Short name for diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Prober::Simd(_) => "simd",
            Prober::Portable(_) => "portable",
        }
    }

    /// See [`GroupProber::match_tag`].
    #[inline]
    pub fn match_tag(&self, group: &[Tag], tag: Tag) -> u64 {
        match self {
            Prober::Simd(p) => p.match_tag(group, tag),
            Prober::Portable(p) => p.match_tag(group, tag),
        }
    }

    /// See [`GroupProber::match_free`].
    #[inline]
    pub fn match_free(&self, group: &[Tag]) -> u64 {
        match self {
            Prober::Simd(p) => p.match_free(group),
            Prober::Portable(p) => p.match_free(group),
        }
    }

    /// See [`GroupProber::match_empty`].
    #[inline]
    pub fn match_empty(&self, group: &[Tag]) -> u64 {
        match self {
            Prober::Simd(p) => p.match_empty(group),
            Prober::Portable(p) => p.match_empty(group),
        }
    }

    /// See [`GroupProber::match_filled`].
    #[inline]
    pub fn match_filled(&self, group: &[Tag]) -> u64 {
        match self {
            Prober::Simd(p) => p.match_filled(group),
            Prober::Portable(p) => p.match_filled(group),
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_key;

    fn tags(raw: &[u8]) -> Vec<Tag> {
        raw.iter().map(|&b| Tag::from_raw(b)).collect()
    }

    #[test]
    fn test_zero_bytes_is_exact() {
        // 0x01 after a zero byte is the classic false positive of the
        // borrow-based test.
        let x = u64::from_le_bytes([0x00, 0x01, 0x80, 0x00, 0x7F, 0xFF, 0x00, 0x01]);
        assert_eq!(compact(zero_bytes(x)), 0b0100_1001);
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact(HIGH_BITS), 0xFF);
        assert_eq!(compact(0x80), 0b1);
        assert_eq!(compact(0x8000_0000_0000_0000), 0b1000_0000);
        assert_eq!(compact(0x0000_0080_0000_8000), 0b0001_0010);
    }

    #[test]
    fn test_portable_queries() {
        let p = PortableProber;
        let a = Tag::from_raw(0x9A);
        let group = tags(&[
            0x00,
            a.raw(),
            0x7F,
            0x80,
            a.raw(),
            0xFF,
            0x00,
            0x85,
        ]);
        assert_eq!(p.match_tag(&group, a), 0b0001_0010);
        assert_eq!(p.match_empty(&group), 0b0100_0001);
        assert_eq!(p.match_free(&group), 0b0100_0101);
        assert_eq!(p.match_filled(&group), 0b1011_1010);
    }

    #[test]
    fn test_bit_iter() {
        let bits: Vec<_> = BitIter::new(0b1010_0001).collect();
        assert_eq!(bits, vec![0, 5, 7]);
        assert_eq!(BitIter::new(0).count(), 0);
        assert_eq!(BitIter::new(u64::MAX).count(), 64);
    }

    #[test]
    fn test_simd_matches_portable() {
        let Some(simd) = SimdProber::detect() else {
            return;
        };
        let mut raw = [0u8; 64];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = match i % 5 {
                0 => 0x00,
                1 => 0x7F,
                _ => Tag::from_hash(hash_key(&(i / 3))).raw(),
            };
        }
        let group = tags(&raw);
        let probe = Tag::from_hash(hash_key(&4usize));
        assert_eq!(
            simd.match_tag(&group, probe),
            concat_portable(&group, |g| PortableProber.match_tag(g, probe))
        );
        assert_eq!(
            simd.match_free(&group),
            concat_portable(&group, |g| PortableProber.match_free(g))
        );
        assert_eq!(
            simd.match_empty(&group),
            concat_portable(&group, |g| PortableProber.match_empty(g))
        );
        assert_eq!(
            simd.match_filled(&group),
            concat_portable(&group, |g| PortableProber.match_filled(g))
        );
    }

    #[test]
    fn test_for_mode() {
        assert_eq!(Prober::for_mode(ProbeMode::Portable), Prober::portable());
        let auto = Prober::for_mode(ProbeMode::Auto);
        assert_eq!(auto.is_simd(), has_avx2());
        assert_eq!(auto.width(), if has_avx2() { 64 } else { 8 });
        // Requesting SIMD never fails.
        let _ = Prober::for_mode(ProbeMode::Simd);
    }
}
