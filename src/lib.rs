#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "allocator")]
mod cell;
#[cfg(feature = "counters")]
mod counters;
#[cfg(test)]
mod test_utils;

mod block;
mod check;
mod llist;
mod segment;
mod tag;
mod utils;

pub use block::{BlockInfo, Blocks, Payload};
#[cfg(feature = "allocator")]
pub use cell::SegallocCell;
pub use check::{Report, Violation};
#[cfg(feature = "counters")]
pub use counters::Counters;
pub use segment::Segment;

use block::{read_tag, write_tag, BlockRef, Descriptor, Status};
use llist::FreeList;
use tag::Tag;
use utils::*;

use core::ptr::NonNull;

use log::{debug, trace, warn};

// Used block:
//   ?? | TAG: size|USED (u64) |  client data (size bytes)            | ??
// Free block (MIN_BLOCK_SIZE payload at minimum):
//   ?? | TAG: size (u64)      | NEXT (u64), PREV (u64), ..???..      | ??

// blocks tile the segment exactly, there is no footer and so no way to
// find the block below; coalescing only ever looks at the block above

/// The alignment unit. Sizes and payload offsets are multiples of this.
pub const ALIGNMENT: usize = 8;
/// The size of a block's header.
pub const HEADER_SIZE: usize = core::mem::size_of::<u64>();
/// The size of the free-list node embedded in a free block's payload.
pub const NODE_SIZE: usize = core::mem::size_of::<u64>() * 2;
/// Minimum payload capacity of any block.
pub const MIN_BLOCK_SIZE: usize = NODE_SIZE;
/// Extra room demanded on top of a header and node before a block is split.
pub const SPLIT_MARGIN: usize = ALIGNMENT;
/// Leftover bytes below this are handed out with the allocation instead of being split off.
pub const SPLIT_SLACK: usize = HEADER_SIZE + NODE_SIZE + SPLIT_MARGIN;
/// The largest request [`Segalloc`] will service.
pub const MAX_REQUEST: usize = 1 << 30;

/// Why a [`Segalloc`] couldn't be set up over the given memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The segment's start address is null.
    NullStart,
    /// The segment has no bytes.
    EmptySegment,
    /// After alignment, the segment can't hold a single block.
    TooSmall { size: usize },
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            InitError::NullStart => f.write_str("segment starts at the null address"),
            InitError::EmptySegment => f.write_str("segment is empty"),
            InitError::TooSmall { size } => {
                write!(f, "segment of {} bytes is too small to hold a block", size)
            }
        }
    }
}

/// Why a request couldn't be serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-sized allocation was requested, or a block was resized to zero.
    ZeroSize,
    /// The request is larger than [`MAX_REQUEST`].
    TooLarge { requested: usize },
    /// No free block is large enough.
    Exhausted { requested: usize },
    /// The handle passed to [`resize`](Segalloc::resize) lies within the segment
    /// but doesn't refer to a live allocation.
    InvalidPayload,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            AllocError::ZeroSize => f.write_str("zero-sized request"),
            AllocError::TooLarge { requested } => {
                write!(f, "request of {} bytes exceeds the maximum of {}", requested, MAX_REQUEST)
            }
            AllocError::Exhausted { requested } => {
                write!(f, "no free block can hold {} bytes", requested)
            }
            AllocError::InvalidPayload => f.write_str("handle does not refer to an allocation"),
        }
    }
}

/// The explicit free-list allocator.
///
/// Construct with [`new`](Segalloc::new) over a byte slice, or
/// [`initialize`](Segalloc::initialize) over raw memory.
///
/// Wrap in a [`SegallocCell`] to use the [`Allocator`](allocator_api2::alloc::Allocator) API.
pub struct Segalloc<'s> {
    segment: Segment<'s>,
    free_list: FreeList,

    #[cfg(feature = "counters")]
    counters: counters::Counters,
}

impl core::fmt::Debug for Segalloc<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segalloc")
            .field("segment", &self.segment)
            .field("free_list_head", &self.free_list.head().map(|n| n.offset()))
            .finish()
    }
}

impl<'s> Segalloc<'s> {
    /// Set up the allocator over `mem`.
    ///
    /// The memory is aligned inward to [`ALIGNMENT`], then carved into a single free block.
    pub fn new(mem: &'s mut [u8]) -> Result<Self, InitError> {
        Ok(Self::with_segment(Segment::from_slice(mem)?))
    }

    /// Set up the allocator over `length` bytes at `start`.
    ///
    /// Fails if `start` is null, `length` is zero, or the range can't hold a single block.
    ///
    /// # Safety
    /// See [`Segment::from_raw_parts`].
    pub unsafe fn initialize(start: *mut u8, length: usize) -> Result<Self, InitError> {
        Ok(Self::with_segment(Segment::from_raw_parts(start, length)?))
    }

    /// Set up the allocator over an existing [`Segment`].
    pub fn with_segment(segment: Segment<'s>) -> Self {
        let size = segment.size() - HEADER_SIZE;

        let mut segalloc = Self {
            #[cfg(feature = "counters")]
            counters: counters::Counters::new(segment.size()),

            segment,
            free_list: FreeList::new(),
        };

        segalloc.register(BlockRef::FIRST, size);

        debug!("segalloc: initialized over {} with a free block of {} bytes", segalloc.segment, size);
        scan_for_errors(&segalloc);

        segalloc
    }

    /// Registers `block` as free with the given `size`.
    #[inline]
    fn register(&mut self, block: BlockRef, size: usize) {
        debug_assert!(size >= MIN_BLOCK_SIZE);
        debug_assert!(!self.free_list.contains(&self.segment, block));

        write_tag(&mut self.segment, block, Tag::free(size));
        self.free_list.insert(&mut self.segment, block);

        #[cfg(feature = "counters")]
        self.counters.account_register_gap(size);
    }

    /// Deregisters the free `block` of `size` bytes, not allowing it to be allocated.
    #[inline]
    fn deregister(&mut self, block: BlockRef, size: usize) {
        debug_assert!(read_tag(&self.segment, block).is_free());

        self.free_list.remove(&mut self.segment, block);

        #[cfg(feature = "counters")]
        self.counters.account_deregister_gap(size);
        #[cfg(not(feature = "counters"))]
        let _ = size;
    }

    /// Returns the block following `block` if it's free, along with its size.
    #[inline]
    fn free_above(&self, block: BlockRef, size: usize) -> Option<(BlockRef, usize)> {
        let above = block.next_header(size);
        if !self.segment.contains(above) {
            return None;
        }

        let above = BlockRef::at(above);
        let tag = read_tag(&self.segment, above);
        tag.is_free().then_some((above, tag.size()))
    }

    /// If the block above `block` is free, deregisters it and raises `size` to cover it.
    #[inline]
    fn try_recombine_above(&mut self, block: BlockRef, size: &mut usize) {
        if let Some((above, above_size)) = self.free_above(block, *size) {
            self.deregister(above, above_size);
            *size += HEADER_SIZE + above_size;

            trace!("segalloc: coalesced {:#x} into {:#x}", above.header(), block.header());
        }
    }

    /// Marks `block` as used for `size` out of its `capacity` bytes.
    ///
    /// If the leftover is large enough it is split off and registered,
    /// otherwise the whole capacity is handed out. Returns the block's new size.
    fn occupy(&mut self, block: BlockRef, size: usize, capacity: usize) -> usize {
        debug_assert!(capacity >= size);

        let leftover = capacity - size;
        if is_split_size(leftover) {
            Descriptor { size, status: Status::Used }.write(&mut self.segment, block);

            let rest = BlockRef::at(block.next_header(size));
            let mut rest_size = leftover - HEADER_SIZE;
            self.try_recombine_above(rest, &mut rest_size);
            self.register(rest, rest_size);

            trace!("segalloc: split {:#x} at {:#x}", block.header(), rest.header());
            size
        } else {
            Descriptor { size: capacity, status: Status::Used }.write(&mut self.segment, block);
            capacity
        }
    }

    /// Resolves a handle into its block, if it plausibly names one.
    fn resolve(&self, payload: Payload) -> Option<(BlockRef, Tag)> {
        let offset = payload.offset();
        if offset < HEADER_SIZE || !is_aligned(offset) || !self.segment.contains(offset) {
            return None;
        }

        let block = BlockRef::from_payload(payload);
        let tag = read_tag(&self.segment, block);

        let fits = offset.checked_add(tag.size()).map_or(false, |acme| acme <= self.segment.size());
        if !(tag.is_well_formed() && tag.size() >= MIN_BLOCK_SIZE && fits) {
            return None;
        }

        // client data can look like a tag, so only trust headers the tiling reaches
        self.is_block_boundary(block).then_some((block, tag))
    }

    /// Walks the tiling from the first block, returning whether a header lies at `block`.
    fn is_block_boundary(&self, block: BlockRef) -> bool {
        let mut header = BlockRef::FIRST.header();
        while header < block.header() {
            let size = read_tag(&self.segment, BlockRef::at(header)).size();
            match block_after(header, size) {
                Some(next) if self.segment.contains(next) => header = next,
                _ => return false,
            }
        }

        header == block.header()
    }

    /// First-fit search of the free list for a block of at least `required` bytes.
    fn find_fit(&self, required: usize) -> Option<(BlockRef, usize)> {
        self.free_list
            .iter(&self.segment)
            .map(BlockRef::from_node)
            .map(|block| (block, read_tag(&self.segment, block).size()))
            .find(|&(_, capacity)| capacity >= required)
    }

    /// Allocate a block with a payload of at least `size` bytes.
    ///
    /// The request is rounded up to [`ALIGNMENT`] and to [`MIN_BLOCK_SIZE`].
    /// The first free block large enough is used, splitting off the rest if
    /// at least [`SPLIT_SLACK`] bytes would be left over.
    pub fn allocate(&mut self, size: usize) -> Result<Payload, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if size > MAX_REQUEST {
            return Err(AllocError::TooLarge { requested: size });
        }

        let required = required_size(size);

        let Some((block, capacity)) = self.find_fit(required) else {
            trace!("segalloc: allocate({}) failed, segment exhausted", size);
            return Err(AllocError::Exhausted { requested: size });
        };

        self.deregister(block, capacity);
        let _used = self.occupy(block, required, capacity);

        #[cfg(feature = "counters")]
        self.counters.account_alloc(_used);

        trace!("segalloc: allocate({}) -> {}", size, block.payload());
        scan_for_errors(self);

        Ok(block.payload())
    }

    /// Release a previously allocated block.
    ///
    /// `None`, handles outside the segment, and handles to blocks that are
    /// already free are ignored. The block is coalesced with the block
    /// above it if that one is free; the block below is never looked at.
    pub fn release(&mut self, payload: impl Into<Option<Payload>>) {
        let Some(payload) = payload.into() else {
            return;
        };

        let Some((block, tag)) = self.resolve(payload) else {
            warn!("segalloc: ignoring release of {}, not a block in {}", payload, self.segment);
            return;
        };

        if tag.is_free() {
            warn!("segalloc: ignoring release of {}, already free", payload);
            return;
        }

        let mut size = tag.size();

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(size);

        self.try_recombine_above(block, &mut size);
        self.register(block, size);

        trace!("segalloc: release({}), free block of {} bytes", payload, size);
        scan_for_errors(self);
    }

    /// Resize a previously allocated block to hold at least `new_size` bytes.
    ///
    /// - `None` or a handle outside the segment allocates afresh.
    /// - A `new_size` of zero releases the block and returns [`AllocError::ZeroSize`].
    /// - Shrinking is done in place if the freed tail can become a block of its own.
    /// - Growing is done in place if the block above is free and large enough.
    ///
    /// Otherwise a new block is allocated, the payload copied over, and the old
    /// block released. If that allocation fails, the old block is left untouched.
    pub fn resize(
        &mut self,
        payload: impl Into<Option<Payload>>,
        new_size: usize,
    ) -> Result<Payload, AllocError> {
        let payload = match payload.into() {
            Some(payload) if self.segment.contains(payload.offset()) => payload,
            _ => return self.allocate(new_size),
        };

        if new_size > MAX_REQUEST {
            return Err(AllocError::TooLarge { requested: new_size });
        }

        let Some((block, tag)) = self.resolve(payload).filter(|(_, tag)| tag.is_used()) else {
            warn!("segalloc: refusing to resize {}, not an allocation", payload);
            return Err(AllocError::InvalidPayload);
        };

        if new_size == 0 {
            self.release(payload);
            return Err(AllocError::ZeroSize);
        }

        let size = tag.size();
        let required = required_size(new_size);

        if required == size {
            return Ok(payload);
        }

        #[cfg(not(feature = "disable-realloc-in-place"))]
        {
            let in_place = if required < size {
                self.shrink_in_place(block, size, required)
            } else {
                self.grow_in_place(block, size, required)
            };

            if in_place {
                trace!("segalloc: resize({}, {}) in place", payload, new_size);
                scan_for_errors(self);
                return Ok(payload);
            }
        }
        #[cfg(feature = "disable-realloc-in-place")]
        let _ = block;

        // in-place failed; reallocate the slow way
        let allocation = self.allocate(new_size)?;
        self.segment.copy_nonoverlapping(
            payload.offset(),
            allocation.offset(),
            size.min(new_size),
        );
        self.release(payload);

        trace!("segalloc: resize({}, {}) -> {}", payload, new_size, allocation);
        Ok(allocation)
    }

    /// Shrinks the used `block` from `size` to `required` bytes, if the tail
    /// (including a free block above) is big enough to become a free block.
    #[cfg(not(feature = "disable-realloc-in-place"))]
    fn shrink_in_place(&mut self, block: BlockRef, size: usize, required: usize) -> bool {
        debug_assert!(required < size);

        let room = size + self.free_above(block, size).map_or(0, |(_, s)| HEADER_SIZE + s);
        if !is_split_size(room - required) {
            return false;
        }

        let mut capacity = size;
        self.try_recombine_above(block, &mut capacity);
        debug_assert!(capacity == room);

        let _used = self.occupy(block, required, capacity);
        debug_assert!(_used == required);

        #[cfg(feature = "counters")]
        self.counters.account_shrink_in_place(size, _used);

        true
    }

    /// Grows the used `block` from `size` to `required` bytes, if the block
    /// above is free and large enough to make up the difference.
    #[cfg(not(feature = "disable-realloc-in-place"))]
    fn grow_in_place(&mut self, block: BlockRef, size: usize, required: usize) -> bool {
        debug_assert!(required > size);

        let Some((_, above_size)) = self.free_above(block, size) else {
            return false;
        };

        if size + HEADER_SIZE + above_size < required {
            return false;
        }

        let mut capacity = size;
        self.try_recombine_above(block, &mut capacity);

        let _used = self.occupy(block, required, capacity);

        #[cfg(feature = "counters")]
        self.counters.account_grow_in_place(size, _used);

        true
    }

    /// Returns the managed [`Segment`].
    pub fn segment(&self) -> &Segment<'s> {
        &self.segment
    }

    /// The number of managed bytes, after alignment.
    pub fn segment_size(&self) -> usize {
        self.segment.size()
    }

    /// The payload capacity of the allocation, which may exceed the requested size.
    pub fn usable_size(&self, payload: Payload) -> Option<usize> {
        self.resolve(payload).filter(|(_, tag)| tag.is_used()).map(|(_, tag)| tag.size())
    }

    /// The allocation's bytes.
    pub fn payload(&self, payload: Payload) -> Option<&[u8]> {
        let size = self.usable_size(payload)?;
        Some(self.segment.bytes(payload.offset(), size))
    }

    /// The allocation's bytes, mutably.
    pub fn payload_mut(&mut self, payload: Payload) -> Option<&mut [u8]> {
        let size = self.usable_size(payload)?;
        Some(self.segment.bytes_mut(payload.offset(), size))
    }

    /// The address of the payload.
    pub fn payload_ptr(&self, payload: Payload) -> Option<NonNull<u8>> {
        self.segment.contains(payload.offset()).then(|| self.segment.ptr_at(payload.offset()))
    }

    /// The handle for a payload address, if the address lies within the segment.
    pub fn payload_of(&self, ptr: *const u8) -> Option<Payload> {
        self.segment.offset_of(ptr).and_then(Payload::from_offset)
    }

    /// Iterate over all the blocks in the segment, in address order.
    pub fn blocks(&self) -> Blocks<'_, 's> {
        Blocks::new(&self.segment)
    }

    /// Iterate over the free blocks, in free-list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.free_list.iter(&self.segment).map(BlockRef::from_node).map(|block| {
            let descriptor = Descriptor::read(&self.segment, block);
            debug_assert!(matches!(descriptor.status, Status::Free(_)));

            BlockInfo { payload: block.payload(), size: descriptor.size, is_free: true }
        })
    }

    /// The number of blocks in the free list.
    pub fn free_list_len(&self) -> usize {
        self.free_list.iter(&self.segment).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::words_as_bytes;

    fn fill(segalloc: &mut Segalloc<'_>, payload: Payload, len: usize, byte: u8) {
        segalloc.payload_mut(payload).unwrap()[..len].fill(byte);
    }

    fn holds(segalloc: &Segalloc<'_>, payload: Payload, len: usize, byte: u8) -> bool {
        segalloc.payload(payload).unwrap()[..len].iter().all(|&b| b == byte)
    }

    #[test]
    fn initialize_test() {
        assert!(matches!(
            unsafe { Segalloc::initialize(core::ptr::null_mut(), 64) },
            Err(InitError::NullStart)
        ));

        let mut arena = [0u64; 8];
        let bytes = words_as_bytes(&mut arena);
        assert!(matches!(
            unsafe { Segalloc::initialize(bytes.as_mut_ptr(), 0) },
            Err(InitError::EmptySegment)
        ));

        let segalloc = unsafe { Segalloc::initialize(bytes.as_mut_ptr(), bytes.len()) }.unwrap();
        assert!(segalloc.segment_size() == 64);
        assert!(segalloc.free_list_len() == 1);

        let blocks: Vec<_> = segalloc.blocks().collect();
        assert!(blocks.len() == 1);
        assert!(blocks[0].is_free && blocks[0].size == 64 - HEADER_SIZE);
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn small_segment_test() {
        let mut arena = [0u64; 8];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(8).unwrap();
        assert!(a.offset() < 64);
        assert!(segalloc.usable_size(a) == Some(MIN_BLOCK_SIZE));

        let ptr = segalloc.payload_ptr(a).unwrap().as_ptr();
        let base = segalloc.segment().base_ptr().as_ptr();
        assert!(ptr >= base && ptr < base.wrapping_add(64));
        assert!(ptr as usize % ALIGNMENT == 0);
        assert!(segalloc.payload_of(ptr) == Some(a));
    }

    #[test]
    fn zero_and_oversized_test() {
        let mut arena = [0u64; 64];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        assert!(segalloc.allocate(0) == Err(AllocError::ZeroSize));
        assert!(
            segalloc.allocate(MAX_REQUEST + 1)
                == Err(AllocError::TooLarge { requested: MAX_REQUEST + 1 })
        );
        assert!(
            segalloc.allocate(MAX_REQUEST) == Err(AllocError::Exhausted { requested: MAX_REQUEST })
        );
        assert!(segalloc.free_list_len() == 1);
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn allocate_release_round_trip_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(100).unwrap();
        assert!(segalloc.usable_size(a) == Some(104));
        segalloc.release(a);

        assert!(segalloc.check_invariants());
        assert!(segalloc.free_list_len() == 1);
        let free: Vec<_> = segalloc.free_blocks().collect();
        assert!(free[0].size == 1024 - HEADER_SIZE);

        let b = segalloc.allocate(100).unwrap();
        assert!(b == a);
    }

    #[test]
    fn whole_block_handed_out_test() {
        let mut arena = [0u64; 8];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        // 56 free, 40 requested: 16 left over isn't worth a block
        let a = segalloc.allocate(40).unwrap();
        assert!(segalloc.usable_size(a) == Some(64 - HEADER_SIZE));
        assert!(segalloc.free_list_len() == 0);
        assert!(segalloc.allocate(8) == Err(AllocError::Exhausted { requested: 8 }));

        segalloc.release(a);
        assert!(segalloc.free_list_len() == 1);
    }

    #[test]
    fn release_reverse_order_merges_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(16).unwrap();
        let b = segalloc.allocate(16).unwrap();
        segalloc.release(b);
        segalloc.release(a);

        let report = segalloc.scan();
        assert!(report.violation.is_none());
        assert!(report.block_count == 1);
        assert!(report.free_count == 1);
        assert!(report.adjacent_free_pairs == 0);
    }

    #[test]
    fn release_forward_order_leaves_pair_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(16).unwrap();
        let b = segalloc.allocate(16).unwrap();
        segalloc.release(a);
        segalloc.release(b);

        // b merged with the rest of the segment, but a is never merged with b
        let report = segalloc.scan();
        assert!(report.violation.is_none());
        assert!(report.block_count == 2);
        assert!(report.free_count == 2);
        assert!(report.adjacent_free_pairs == 1);

        // b was listed last, so it's found first
        let c = segalloc.allocate(16).unwrap();
        assert!(c == b);

        // the rest split off b goes to the head, ahead of a
        let d = segalloc.allocate(16).unwrap();
        assert!(d.offset() == b.offset() + HEADER_SIZE + 16);

        assert!(segalloc.free_list_len() == 2);
        let first = segalloc.blocks().next().unwrap();
        assert!(first.payload == a && first.is_free);
    }

    #[test]
    fn release_ignores_stale_interior_handle_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(16).unwrap();
        let b = segalloc.allocate(16).unwrap();
        segalloc.release(b);
        segalloc.release(a);

        // c reuses a, and b's old header now lies inside c's data
        let c = segalloc.allocate(100).unwrap();
        assert!(c == a);

        // write what looks like a used 16 byte tag where b's header was
        let stale = b.offset() - HEADER_SIZE - c.offset();
        segalloc.payload_mut(c).unwrap()[stale..stale + 8].copy_from_slice(&17u64.to_ne_bytes());
        let before: Vec<_> = segalloc.blocks().collect();

        segalloc.release(b);
        assert!(segalloc.resize(b, 32) == Err(AllocError::InvalidPayload));
        assert!(segalloc.usable_size(b).is_none());

        assert!(before == segalloc.blocks().collect::<Vec<_>>());
        assert!(segalloc.free_list_len() == 1);
        assert!(segalloc.usable_size(c) == Some(104));
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn release_ignores_bad_handles_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();
        let a = segalloc.allocate(64).unwrap();
        let before: Vec<_> = segalloc.blocks().collect();

        segalloc.release(None);
        segalloc.release(Payload::from_offset(4096).unwrap());
        segalloc.release(Payload::from_offset(4).unwrap());
        segalloc.release(Payload::from_offset(a.offset() + 3).unwrap());
        // zeroed client data doesn't look like a block
        segalloc.release(Payload::from_offset(a.offset() + 16).unwrap());

        let after: Vec<_> = segalloc.blocks().collect();
        assert!(before == after);

        segalloc.release(a);
        let after_release: Vec<_> = segalloc.blocks().collect();
        // double release
        segalloc.release(a);
        assert!(after_release == segalloc.blocks().collect::<Vec<_>>());
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn exhaustion_test() {
        let mut arena = [0u64; 512];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let mut allocations = Vec::new();
        loop {
            match segalloc.allocate(40) {
                Ok(payload) => allocations.push(payload),
                Err(err) => {
                    assert!(err == AllocError::Exhausted { requested: 40 });
                    break;
                }
            }
        }

        // 4096 bytes in 48-byte blocks, the last one absorbing the slack
        assert!(allocations.len() == 4096 / 48);
        assert!(segalloc.free_list_len() == 0);
        assert!(segalloc.check_invariants());

        for payload in allocations.into_iter().rev() {
            segalloc.release(payload);
        }

        assert!(segalloc.blocks().count() == 1);
        assert!(segalloc.free_list_len() == 1);
    }

    #[test]
    fn resize_null_allocates_test() {
        let mut arena_a = [0u64; 128];
        let mut arena_b = [0u64; 128];
        let mut a = Segalloc::new(words_as_bytes(&mut arena_a)).unwrap();
        let mut b = Segalloc::new(words_as_bytes(&mut arena_b)).unwrap();

        let pa = a.resize(None, 32).unwrap();
        let pb = b.allocate(32).unwrap();
        assert!(pa == pb);
        assert!(a.blocks().eq(b.blocks()));

        // out of the segment is treated the same way
        let pa = a.resize(Payload::from_offset(1 << 20).unwrap(), 32).unwrap();
        let pb = b.allocate(32).unwrap();
        assert!(pa == pb);

        assert!(a.resize(None, 0) == Err(AllocError::ZeroSize));
    }

    #[test]
    fn resize_to_zero_releases_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        assert!(segalloc.resize(a, 0) == Err(AllocError::ZeroSize));
        assert!(segalloc.usable_size(a).is_none());
        assert!(segalloc.blocks().count() == 1);
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn resize_rejects_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        fill(&mut segalloc, a, 64, 0x5a);
        let before: Vec<_> = segalloc.blocks().collect();

        assert!(
            segalloc.resize(a, MAX_REQUEST + 1)
                == Err(AllocError::TooLarge { requested: MAX_REQUEST + 1 })
        );
        assert!(segalloc.resize(a, 64) == Ok(a));
        assert!(segalloc.resize(a, 60) == Ok(a));
        assert!(before == segalloc.blocks().collect::<Vec<_>>());
        assert!(holds(&segalloc, a, 64, 0x5a));

        segalloc.release(a);
        assert!(segalloc.resize(a, 32) == Err(AllocError::InvalidPayload));
    }

    #[cfg(not(feature = "disable-realloc-in-place"))]
    #[test]
    fn grow_in_place_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        fill(&mut segalloc, a, 64, 0xab);

        let b = segalloc.resize(a, 256).unwrap();
        assert!(b == a);
        assert!(segalloc.usable_size(b) == Some(256));
        assert!(holds(&segalloc, b, 64, 0xab));
        assert!(segalloc.blocks().count() == 2);

        // growing into the whole rest of the segment leaves no sliver
        let c = segalloc.resize(b, 1024 - HEADER_SIZE - 8).unwrap();
        assert!(c == a);
        assert!(segalloc.usable_size(c) == Some(1024 - HEADER_SIZE));
        assert!(segalloc.free_list_len() == 0);
        assert!(holds(&segalloc, c, 64, 0xab));
    }

    #[cfg(not(feature = "disable-realloc-in-place"))]
    #[test]
    fn shrink_in_place_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(256).unwrap();
        fill(&mut segalloc, a, 256, 0x11);

        let b = segalloc.resize(a, 64).unwrap();
        assert!(b == a);
        assert!(segalloc.usable_size(b) == Some(64));
        assert!(holds(&segalloc, b, 64, 0x11));

        // the freed tail merged with the free block above
        let report = segalloc.scan();
        assert!(report.block_count == 2);
        assert!(report.free_count == 1);
        assert!(report.adjacent_free_pairs == 0);
    }

    #[test]
    fn grow_moves_when_blocked_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        let b = segalloc.allocate(64).unwrap();
        fill(&mut segalloc, a, 64, 0xcd);
        fill(&mut segalloc, b, 64, 0xef);

        let c = segalloc.resize(a, 256).unwrap();
        assert!(c != a);
        assert!(holds(&segalloc, c, 64, 0xcd));
        assert!(holds(&segalloc, b, 64, 0xef));
        assert!(segalloc.usable_size(a).is_none());
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn shrink_moves_when_tail_too_small_test() {
        let mut arena = [0u64; 128];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        let b = segalloc.allocate(64).unwrap();
        fill(&mut segalloc, a, 64, 0x77);

        // a 16 byte tail can't be split off, and the block above is used
        let c = segalloc.resize(a, 48).unwrap();
        assert!(c != a);
        assert!(segalloc.usable_size(c) == Some(48));
        assert!(holds(&segalloc, c, 48, 0x77));
        assert!(segalloc.usable_size(b) == Some(64));
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn failed_fallback_leaves_block_test() {
        let mut arena = [0u64; 16];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(40).unwrap();
        let b = segalloc.allocate(72).unwrap();
        assert!(segalloc.free_list_len() == 0);
        fill(&mut segalloc, a, 40, 0x42);

        assert!(segalloc.resize(a, 32) == Err(AllocError::Exhausted { requested: 32 }));
        assert!(segalloc.resize(a, 96) == Err(AllocError::Exhausted { requested: 96 }));
        assert!(segalloc.usable_size(a) == Some(40));
        assert!(segalloc.usable_size(b) == Some(72));
        assert!(holds(&segalloc, a, 40, 0x42));
        assert!(segalloc.check_invariants());
    }

    #[test]
    fn random_actions_test() {
        const ARENA_WORDS: usize = 1 << 13;

        let mut arena = vec![0u64; ARENA_WORDS];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();
        let rng = fastrand::Rng::with_seed(0x5e6a_110c);

        // (payload, requested size, fill byte)
        let mut allocations: Vec<(Payload, usize, u8)> = Vec::new();

        for _ in 0..4000 {
            match rng.u8(0..4) {
                0 | 1 => {
                    let size = rng.usize(1..600);
                    if let Ok(payload) = segalloc.allocate(size) {
                        let byte = rng.u8(..);
                        fill(&mut segalloc, payload, size, byte);
                        allocations.push((payload, size, byte));
                    }
                }
                2 if !allocations.is_empty() => {
                    let (payload, size, byte) =
                        allocations.swap_remove(rng.usize(0..allocations.len()));
                    assert!(holds(&segalloc, payload, size, byte));
                    segalloc.release(payload);
                }
                3 if !allocations.is_empty() => {
                    let index = rng.usize(0..allocations.len());
                    let (payload, size, byte) = allocations[index];
                    let new_size = rng.usize(1..900);

                    if let Ok(new_payload) = segalloc.resize(payload, new_size) {
                        assert!(holds(&segalloc, new_payload, size.min(new_size), byte));
                        fill(&mut segalloc, new_payload, new_size, byte);
                        allocations[index] = (new_payload, new_size, byte);
                    } else {
                        assert!(holds(&segalloc, payload, size, byte));
                    }
                }
                _ => {}
            }
        }

        for (payload, size, byte) in allocations.drain(..).rev() {
            assert!(holds(&segalloc, payload, size, byte));
            segalloc.release(payload);
        }

        let report = segalloc.scan();
        assert!(report.violation.is_none());
        assert!(report.used_bytes == 0);
        assert!(report.free_bytes + report.block_count * HEADER_SIZE == ARENA_WORDS * 8);
    }
}
