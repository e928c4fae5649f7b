//! A `Tag` is the header word at the base of every block: the block's
//! payload size with status flags in the least significant bits.

use crate::ALIGNMENT;

/// Header word for block metadata.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Tag(pub(crate) u64);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("is_used", &self.is_used())
            .field("size", &self.size())
            .finish()
    }
}

impl Tag {
    pub const USED_FLAG: u64 = 1 << 0; // sizes are always multiples of ALIGNMENT

    const FLAG_BITS: u64 = ALIGNMENT as u64 - 1;

    #[inline]
    pub fn free(size: usize) -> Self {
        debug_assert!(size as u64 & Self::FLAG_BITS == 0);
        Self(size as u64)
    }

    #[inline]
    pub fn used(size: usize) -> Self {
        debug_assert!(size as u64 & Self::FLAG_BITS == 0);
        Self(size as u64 | Self::USED_FLAG)
    }

    #[inline]
    pub fn size(self) -> usize {
        (self.0 & !Self::FLAG_BITS) as usize
    }

    #[inline]
    pub fn is_used(self) -> bool {
        self.0 & Self::USED_FLAG != 0
    }

    #[inline]
    pub fn is_free(self) -> bool {
        !self.is_used()
    }

    /// Returns whether none of the reserved flag bits are set.
    #[inline]
    pub fn is_well_formed(self) -> bool {
        self.0 & Self::FLAG_BITS & !Self::USED_FLAG == 0
    }
}
