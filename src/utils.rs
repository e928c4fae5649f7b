//! Code that doesn't have a great place elsewhere at the moment.
//!
//! Nothing in here should be exported.

use crate::{ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE, SPLIT_SLACK};

/// Aligns `value` up to the next multiple of `ALIGNMENT`.
///
/// Saturates instead of overflowing; callers bound their inputs well below `usize::MAX`.
#[inline]
pub(crate) const fn align_up(value: usize) -> usize {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => v & !(ALIGNMENT - 1),
        None => usize::MAX & !(ALIGNMENT - 1),
    }
}

/// Aligns `value` down to the previous multiple of `ALIGNMENT`.
#[inline]
pub(crate) const fn align_down(value: usize) -> usize {
    value & !(ALIGNMENT - 1)
}

/// Returns whether `value` is a multiple of `ALIGNMENT`.
#[inline]
pub(crate) const fn is_aligned(value: usize) -> bool {
    value % ALIGNMENT == 0
}

/// The block size needed to service a request of `size` bytes.
///
/// Requests are rounded up to the alignment unit and promoted to the minimum
/// block size, so that the block can hold a free-list node once released.
#[inline]
pub(crate) const fn required_size(size: usize) -> usize {
    let size = align_up(size);
    if size < MIN_BLOCK_SIZE {
        MIN_BLOCK_SIZE
    } else {
        size
    }
}

/// Returns whether `leftover` bytes are worth carving into a block of their own.
/// The header offset following the block at `header` with payload `size`, if it doesn't overflow.
#[inline]
pub(crate) const fn block_after(header: usize, size: usize) -> Option<usize> {
    match header.checked_add(HEADER_SIZE) {
        Some(payload) => payload.checked_add(size),
        None => None,
    }
}

#[inline]
pub(crate) const fn is_split_size(leftover: usize) -> bool {
    leftover >= SPLIT_SLACK
}

#[cfg(not(any(test, feature = "error-scanning")))]
#[inline(always)]
pub(crate) fn scan_for_errors(_: &crate::Segalloc<'_>) {}

#[cfg(any(test, feature = "error-scanning"))]
/// Debugging function for checking every invariant after each operation.
#[track_caller]
pub(crate) fn scan_for_errors(segalloc: &crate::Segalloc<'_>) {
    let report = segalloc.scan();
    if let Some(violation) = report.violation {
        panic!("heap invariant violated: {}", violation);
    }
}
