//! Block layout: the arithmetic between a block's header, its payload, and the
//! free-list node embedded in a free block's payload, as well as reading and
//! writing block metadata to the segment.
//!
//! ```not_rust
//!  used block:   | TAG: size|USED (8) | client data ......... (size) |
//!  free block:   | TAG: size      (8) | NEXT (8) | PREV (8) | ...... |
//!                ^ header             ^ payload = node
//! ```
//!
//! Blocks tile the segment; the next header is at `header + HEADER_SIZE + size`.

use core::num::NonZeroUsize;

use crate::{segment::Segment, tag::Tag, HEADER_SIZE, NODE_SIZE};

const NODE_NEXT_OFFSET: usize = 0;
const NODE_PREV_OFFSET: usize = NODE_SIZE / 2;

/// A handle to an allocation: the offset of its payload within the segment.
///
/// Handles are validated against the segment whenever they're passed back in.
/// A handle that isn't a block boundary of the current tiling is rejected, as is
/// a release of a block that's already free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Payload(NonZeroUsize);

impl Payload {
    /// Create a handle from a raw segment offset. Returns `None` for zero.
    #[inline]
    pub const fn from_offset(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    /// The payload's offset from the segment base.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0.get()
    }
}

impl core::fmt::Display for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "payload@{:#x}", self.offset())
    }
}

/// A block, identified by the offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BlockRef(usize);

impl BlockRef {
    pub const FIRST: BlockRef = BlockRef(0);

    #[inline]
    pub const fn at(header: usize) -> Self {
        Self(header)
    }

    #[inline]
    pub const fn header(self) -> usize {
        self.0
    }

    #[inline]
    pub fn payload(self) -> Payload {
        // SAFETY: HEADER_SIZE is nonzero
        Payload(unsafe { NonZeroUsize::new_unchecked(self.0 + HEADER_SIZE) })
    }

    /// The node lives at the start of the payload.
    #[inline]
    pub fn node(self) -> NodeRef {
        NodeRef(self.payload().0)
    }

    #[inline]
    pub fn from_payload(payload: Payload) -> Self {
        debug_assert!(payload.offset() >= HEADER_SIZE);
        Self(payload.offset() - HEADER_SIZE)
    }

    #[inline]
    pub fn from_node(node: NodeRef) -> Self {
        debug_assert!(node.offset() >= HEADER_SIZE);
        Self(node.offset() - HEADER_SIZE)
    }

    /// Where the following block's header is, given this block's `size`.
    /// Only a header if it's below the segment's end.
    #[inline]
    pub const fn next_header(self, size: usize) -> usize {
        self.0 + HEADER_SIZE + size
    }
}

/// A free-list node, identified by its offset. Never zero, as a header precedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub(crate) struct NodeRef(NonZeroUsize);

impl NodeRef {
    #[inline]
    pub const fn offset(self) -> usize {
        self.0.get()
    }

    /// Zero encodes `None`.
    #[inline]
    fn encode(node: Option<NodeRef>) -> u64 {
        node.map_or(0, |n| n.offset() as u64)
    }

    #[inline]
    fn decode(word: u64) -> Option<NodeRef> {
        usize::try_from(word).ok().and_then(NonZeroUsize::new).map(NodeRef)
    }
}

/// The intrusive links of a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Links {
    pub next: Option<NodeRef>,
    pub prev: Option<NodeRef>,
}

/// A block's status. Only free blocks carry links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Free(Links),
    Used,
}

/// Everything stored in the segment about a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Descriptor {
    pub size: usize,
    pub status: Status,
}

impl Descriptor {
    pub fn read(segment: &Segment<'_>, block: BlockRef) -> Self {
        let tag = read_tag(segment, block);
        let status = if tag.is_used() {
            Status::Used
        } else {
            Status::Free(read_links(segment, block.node()))
        };

        Self { size: tag.size(), status }
    }

    pub fn write(self, segment: &mut Segment<'_>, block: BlockRef) {
        match self.status {
            Status::Used => write_tag(segment, block, Tag::used(self.size)),
            Status::Free(links) => {
                write_tag(segment, block, Tag::free(self.size));
                write_links(segment, block.node(), links);
            }
        }
    }
}

#[inline]
pub(crate) fn read_tag(segment: &Segment<'_>, block: BlockRef) -> Tag {
    Tag(segment.read_word(block.header()))
}

#[inline]
pub(crate) fn write_tag(segment: &mut Segment<'_>, block: BlockRef, tag: Tag) {
    segment.write_word(block.header(), tag.0);
}

#[inline]
pub(crate) fn read_links(segment: &Segment<'_>, node: NodeRef) -> Links {
    Links {
        next: NodeRef::decode(segment.read_word(node.offset() + NODE_NEXT_OFFSET)),
        prev: NodeRef::decode(segment.read_word(node.offset() + NODE_PREV_OFFSET)),
    }
}

#[inline]
pub(crate) fn write_links(segment: &mut Segment<'_>, node: NodeRef, links: Links) {
    set_next(segment, node, links.next);
    set_prev(segment, node, links.prev);
}

#[inline]
pub(crate) fn set_next(segment: &mut Segment<'_>, node: NodeRef, next: Option<NodeRef>) {
    segment.write_word(node.offset() + NODE_NEXT_OFFSET, NodeRef::encode(next));
}

#[inline]
pub(crate) fn set_prev(segment: &mut Segment<'_>, node: NodeRef, prev: Option<NodeRef>) {
    segment.write_word(node.offset() + NODE_PREV_OFFSET, NodeRef::encode(prev));
}

/// A summary of one block, as yielded by [`Segalloc::blocks`](crate::Segalloc::blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The block's payload handle. Only valid for allocation calls if the block is used.
    pub payload: Payload,
    /// The block's payload capacity in bytes.
    pub size: usize,
    pub is_free: bool,
}

/// An iterator over the blocks tiling a segment, in address order.
///
/// This `struct` is created by [`Segalloc::blocks`](crate::Segalloc::blocks).
#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Blocks<'a, 's> {
    segment: &'a Segment<'s>,
    next: usize,
}

impl<'a, 's> Blocks<'a, 's> {
    pub(crate) fn new(segment: &'a Segment<'s>) -> Self {
        Self { segment, next: 0 }
    }
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.segment.contains(self.next) {
            return None;
        }

        let block = BlockRef::at(self.next);
        let tag = read_tag(self.segment, block);

        // stop rather than walk off a corrupt tiling, the checker reports those
        self.next = (block.header() + HEADER_SIZE)
            .checked_add(tag.size())
            .filter(|&next| next <= self.segment.size())
            .unwrap_or(self.segment.size());

        Some(BlockInfo { payload: block.payload(), size: tag.size(), is_free: tag.is_free() })
    }
}
