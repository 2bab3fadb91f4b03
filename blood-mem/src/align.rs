//! Alignment arithmetic for power-of-two alignments.
//!
//! All functions assume `align` is a non-zero power of two; this is checked
//! with `debug_assert!` only, since the helpers sit on every allocation path.

/// Round `value` up to the next multiple of `align`.
///
/// ```
/// use blood_mem::align::align_up;
///
/// assert_eq!(align_up(13, 8), 16);
/// assert_eq!(align_up(16, 8), 16);
/// assert_eq!(align_up(0, 4096), 0);
/// ```
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to the previous multiple of `align`.
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Whether `value` is a multiple of `align`.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Whether the pointer address is a multiple of `align`.
#[inline]
pub fn is_ptr_aligned<T>(ptr: *const T, align: usize) -> bool {
    is_aligned(ptr as usize, align)
}

/// Padding needed to move `addr` up to the next multiple of `align`.
#[inline]
pub const fn padding_for(addr: usize, align: usize) -> usize {
    align_up(addr, align) - addr
}

/// Smallest power of two that is `>= value`, with `0` mapping to `1`.
#[inline]
pub const fn next_power_of_two(value: usize) -> usize {
    if value <= 1 {
        1
    } else {
        value.next_power_of_two()
    }
}

/// Validate an alignment argument.
pub fn check_alignment(align: usize) -> crate::error::Result<usize> {
    if align.is_power_of_two() {
        Ok(align)
    } else {
        Err(crate::error::MemoryError::InvalidAlignment(align))
    }
}
