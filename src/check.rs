//! The heap checker: a read-only walk over the block tiling and the free list.

use log::{error, trace};

use crate::{
    block::{read_links, read_tag, BlockRef, NodeRef},
    utils::is_aligned,
    Segalloc, HEADER_SIZE, MIN_BLOCK_SIZE, NODE_SIZE,
};

/// An inconsistency found by [`Segalloc::scan`].
///
/// Offsets are relative to the segment base. Block offsets are header offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The block at `offset` extends past the segment's end.
    Overrun { offset: usize },
    /// The tag at `offset` has reserved bits set.
    MalformedTag { offset: usize },
    /// The block at `offset` is too small to ever hold a free-list node.
    Undersized { offset: usize, size: usize },
    /// The block at `offset` is free but missing from the free list.
    FreeNotListed { offset: usize },
    /// The block at `offset` is used but present in the free list.
    UsedButListed { offset: usize },
    /// The free-list node at `node` doesn't point back at its predecessor.
    BrokenLink { node: usize },
    /// The free list contains an offset that can't hold a node.
    BadNode { node: usize },
    /// The free list is longer than the segment could hold; it's probably cyclic.
    ListTooLong,
    /// The free list contains nodes that aren't free block boundaries.
    StrayNodes { listed: usize, free: usize },
}

impl core::fmt::Display for Violation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Violation::Overrun { offset } => {
                write!(f, "block at {:#x} extends past the segment", offset)
            }
            Violation::MalformedTag { offset } => {
                write!(f, "block at {:#x} has a malformed tag", offset)
            }
            Violation::Undersized { offset, size } => {
                write!(f, "block at {:#x} is undersized ({} bytes)", offset, size)
            }
            Violation::FreeNotListed { offset } => {
                write!(f, "block at {:#x} is free but not in the free list", offset)
            }
            Violation::UsedButListed { offset } => {
                write!(f, "block at {:#x} is used but in the free list", offset)
            }
            Violation::BrokenLink { node } => {
                write!(f, "free-list node at {:#x} has an inconsistent prev link", node)
            }
            Violation::BadNode { node } => write!(f, "free-list node at {:#x} is invalid", node),
            Violation::ListTooLong => write!(f, "the free list is cyclic"),
            Violation::StrayNodes { listed, free } => {
                write!(f, "{} nodes listed but {} blocks free", listed, free)
            }
        }
    }
}

/// The result of a heap scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    /// Number of blocks tiling the segment.
    pub block_count: usize,
    /// Number of free blocks in the tiling.
    pub free_count: usize,
    /// Number of nodes reachable from the free-list head.
    pub listed_count: usize,
    /// Sum of used blocks' sizes.
    pub used_bytes: usize,
    /// Sum of free blocks' sizes.
    pub free_bytes: usize,
    /// Number of physically adjacent free block pairs.
    ///
    /// These aren't a violation. Coalescing only looks forward, so releasing a
    /// block before its successor leaves the two uncoalesced.
    pub adjacent_free_pairs: usize,
    /// The first violation found, if any.
    pub violation: Option<Violation>,
}

impl Report {
    fn flag(&mut self, violation: Violation) {
        error!("heap check: {}", violation);
        self.violation.get_or_insert(violation);
    }
}

impl Segalloc<'_> {
    /// Returns whether the heap is consistent.
    ///
    /// Inconsistencies are logged at the error level.
    /// See [`scan`](Segalloc::scan) for details.
    pub fn check_invariants(&self) -> bool {
        self.scan().violation.is_none()
    }

    /// Walk the block tiling and the free list, checking that:
    /// - blocks exactly tile the segment
    /// - every block's tag is well formed and can hold a free-list node
    /// - a block is free if and only if it's in the free list
    /// - the free list's links are mutually consistent
    ///
    /// Never panics, regardless of the state of the segment.
    pub fn scan(&self) -> Report {
        let segment = &self.segment;
        let mut report = Report::default();

        // the most blocks that could possibly fit, to detect cycles
        let max_nodes = segment.size() / (HEADER_SIZE + MIN_BLOCK_SIZE);

        let is_valid_node = |node: NodeRef| {
            let offset = node.offset();
            is_aligned(offset)
                && offset >= HEADER_SIZE
                && offset.checked_add(NODE_SIZE).map_or(false, |acme| acme <= segment.size())
        };

        // walk the free list, only trusting the prefix that's well linked
        let mut prev = None;
        let mut current = self.free_list.head();
        while let Some(node) = current {
            if !is_valid_node(node) {
                report.flag(Violation::BadNode { node: node.offset() });
                break;
            }
            if report.listed_count == max_nodes {
                report.flag(Violation::ListTooLong);
                break;
            }

            let links = read_links(segment, node);
            if links.prev != prev {
                report.flag(Violation::BrokenLink { node: node.offset() });
            }

            report.listed_count += 1;
            prev = Some(node);
            current = links.next;
        }

        let listed = report.listed_count;
        let is_listed =
            |block: BlockRef| self.free_list.iter(segment).take(listed).any(|n| n == block.node());

        // walk the tiling
        let mut header = 0;
        let mut prev_free = false;
        while segment.contains(header) {
            let block = BlockRef::at(header);
            let tag = read_tag(segment, block);
            let size = tag.size();

            trace!(
                "heap check: block {:#x} size {} {}",
                header,
                size,
                if tag.is_used() { "used" } else { "free" }
            );

            if !tag.is_well_formed() {
                report.flag(Violation::MalformedTag { offset: header });
            }
            if size < MIN_BLOCK_SIZE {
                report.flag(Violation::Undersized { offset: header, size });
            }

            let next = match (header + HEADER_SIZE).checked_add(size) {
                Some(next) if next <= segment.size() => next,
                _ => {
                    report.flag(Violation::Overrun { offset: header });
                    break;
                }
            };

            report.block_count += 1;

            match (tag.is_free(), is_listed(block)) {
                (true, true) => {}
                (true, false) => report.flag(Violation::FreeNotListed { offset: header }),
                (false, true) => report.flag(Violation::UsedButListed { offset: header }),
                (false, false) => {}
            }

            if tag.is_free() {
                report.free_count += 1;
                report.free_bytes += size;
                if prev_free {
                    report.adjacent_free_pairs += 1;
                    trace!("heap check: block {:#x} follows a free block", header);
                }
            } else {
                report.used_bytes += size;
            }

            prev_free = tag.is_free();
            header = next;
        }

        if report.violation.is_none() && report.listed_count != report.free_count {
            report.flag(Violation::StrayNodes {
                listed: report.listed_count,
                free: report.free_count,
            });
        }

        report
    }
}
