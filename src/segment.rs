use core::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{utils::*, InitError, ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE};

/// The fixed byte range under management.
///
/// A `Segment` holds the exclusive borrow of its memory for `'s` and hands out
/// access by offset only. Every accessor bounds-checks its offset, so a corrupt
/// offset panics instead of touching memory outside the segment.
///
/// The segment is aligned inward to [`ALIGNMENT`] on creation; offset `0` is
/// always the first block's header.
pub struct Segment<'s> {
    base: NonNull<u8>,
    size: usize,
    _borrow: PhantomData<&'s mut [u8]>,
}

// SAFETY: a `Segment` is an exclusive borrow of its bytes, just like `&mut [u8]`
unsafe impl Send for Segment<'_> {}

impl fmt::Debug for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}..{:p}", self.base.as_ptr(), self.base.as_ptr().wrapping_add(self.size))
    }
}

impl<'s> Segment<'s> {
    /// Takes ownership of `mem` for the lifetime `'s`.
    pub fn from_slice(mem: &'s mut [u8]) -> Result<Self, InitError> {
        // SAFETY: the slice is valid for reads and writes and borrowed for 's
        unsafe { Self::from_raw_parts(mem.as_mut_ptr(), mem.len()) }
    }

    /// Takes ownership of `length` bytes starting at `start`.
    ///
    /// # Safety
    /// `start..start + length` must be valid for reads and writes for `'s`,
    /// and must not be accessed other than through the returned `Segment`
    /// (and the payloads it hands out) for that lifetime.
    pub unsafe fn from_raw_parts(start: *mut u8, length: usize) -> Result<Self, InitError> {
        let base = NonNull::new(start).ok_or(InitError::NullStart)?;

        if length == 0 {
            return Err(InitError::EmptySegment);
        }

        // align the extent inward, i.e. base up and acme down
        let addr = start as usize;
        let aligned_base = align_up(addr);
        let aligned_acme = match addr.checked_add(length) {
            Some(acme) => align_down(acme),
            None => align_down(usize::MAX),
        };

        let size = aligned_acme.saturating_sub(aligned_base);
        if size < HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(InitError::TooSmall { size: length });
        }

        // aligned_base lies within the range, so this stays in bounds
        let base = NonNull::new_unchecked(base.as_ptr().add(aligned_base - addr));

        Ok(Self { base, size, _borrow: PhantomData })
    }

    /// The number of managed bytes, after alignment.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The address of the segment's first byte.
    #[inline]
    pub const fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// Returns whether `offset` lies within `[0, size)`.
    #[inline]
    pub const fn contains(&self, offset: usize) -> bool {
        offset < self.size
    }

    /// The address at `offset`. The offset may equal `size` (the segment's end).
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.size, "offset {:#x} beyond segment of {:#x}", offset, self.size);
        // SAFETY: within or one past the end of the segment
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// The offset of `ptr` relative to the segment base, if within the segment.
    #[inline]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = (ptr as usize).checked_sub(self.base.as_ptr() as usize)?;
        self.contains(offset).then_some(offset)
    }

    #[inline]
    #[track_caller]
    fn check_word(&self, offset: usize) {
        assert!(
            offset % ALIGNMENT == 0 && offset <= self.size - 8,
            "word offset {:#x} invalid for segment of {:#x}",
            offset,
            self.size
        );
    }

    /// Reads the 64-bit word at `offset`.
    ///
    /// # Panics
    /// Panics if `offset` is misaligned or the word extends past the segment.
    #[inline]
    #[track_caller]
    pub fn read_word(&self, offset: usize) -> u64 {
        self.check_word(offset);
        // SAFETY: in bounds and aligned, as the base is aligned
        unsafe { self.base.as_ptr().add(offset).cast::<u64>().read() }
    }

    /// Writes the 64-bit word at `offset`.
    ///
    /// # Panics
    /// Panics if `offset` is misaligned or the word extends past the segment.
    #[inline]
    #[track_caller]
    pub fn write_word(&mut self, offset: usize, word: u64) {
        self.check_word(offset);
        // SAFETY: in bounds and aligned, as the base is aligned
        unsafe { self.base.as_ptr().add(offset).cast::<u64>().write(word) }
    }

    #[inline]
    #[track_caller]
    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).map_or(false, |acme| acme <= self.size),
            "range {:#x}+{:#x} beyond segment of {:#x}",
            offset,
            len,
            self.size
        );
    }

    /// The bytes `offset..offset + len`.
    #[track_caller]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        // SAFETY: in bounds, and shared access to self prevents writes
        unsafe { core::slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }

    /// The bytes `offset..offset + len`, mutably.
    #[track_caller]
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.check_range(offset, len);
        // SAFETY: in bounds, and exclusive access to self prevents aliasing
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len) }
    }

    /// Copies `len` bytes from `src` to `dst`. The ranges must not overlap.
    #[track_caller]
    pub fn copy_nonoverlapping(&mut self, src: usize, dst: usize, len: usize) {
        self.check_range(src, len);
        self.check_range(dst, len);
        assert!(src + len <= dst || dst + len <= src, "overlapping copy");

        // SAFETY: both ranges are in bounds and disjoint
        unsafe {
            let base = self.base.as_ptr();
            core::ptr::copy_nonoverlapping(base.add(src), base.add(dst), len);
        }
    }
}
