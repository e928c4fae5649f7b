use crate::{
    block::{
        read_links, read_tag, set_next, set_prev, write_links, BlockRef, Descriptor, Links, NodeRef,
        Status,
    },
    segment::Segment,
};

/// The list of free blocks.
///
/// The list is:
///  * **Intrusive**: nodes live in the payload of the free blocks themselves
///  * **Doubly linked** to allow O(1) removal given only the node
///  * **Unordered**: insertion is always at the head (LIFO)
///
/// Nodes are segment offsets rather than pointers, so all reads and writes go
/// through the (bounds-checked) [`Segment`].
///
/// It's the caller's responsibility to only insert blocks that aren't already
/// listed and only remove blocks that are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FreeList {
    head: Option<NodeRef>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn head(&self) -> Option<NodeRef> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Push `block` to the front of the list, marking it free.
    pub fn insert(&mut self, segment: &mut Segment<'_>, block: BlockRef) {
        let node = block.node();
        let size = read_tag(segment, block).size();

        let links = Links { next: self.head, prev: None };
        Descriptor { size, status: Status::Free(links) }.write(segment, block);

        if let Some(old_head) = self.head {
            set_prev(segment, old_head, Some(node));
        }

        self.head = Some(node);
    }

    /// Unlink `block` from the list, patching its neighbors.
    ///
    /// Does nothing if the list is empty. The block's status is left as is.
    pub fn remove(&mut self, segment: &mut Segment<'_>, block: BlockRef) {
        if self.is_empty() {
            return;
        }

        let node = block.node();
        let Links { next, prev } = read_links(segment, node);

        match (prev, next) {
            // only node in list
            (None, None) => {
                debug_assert!(self.head == Some(node));
                self.head = None;
            }
            // first in list
            (None, Some(next)) => {
                debug_assert!(self.head == Some(node));
                self.head = Some(next);
                set_prev(segment, next, None);
            }
            // last in list
            (Some(prev), None) => {
                set_next(segment, prev, None);
            }
            // somewhere in between
            (Some(prev), Some(next)) => {
                set_next(segment, prev, Some(next));
                set_prev(segment, next, Some(prev));
            }
        }

        write_links(segment, node, Links::default());
    }

    /// Creates an iterator over the list's nodes, from the head.
    ///
    /// The list must not be modified while iterating.
    pub fn iter<'a, 's>(&self, segment: &'a Segment<'s>) -> Iter<'a, 's> {
        Iter { segment, current: self.head }
    }

    /// Walks the list looking for `block`.
    pub fn contains(&self, segment: &Segment<'_>, block: BlockRef) -> bool {
        let node = block.node();
        self.iter(segment).any(|n| n == node)
    }
}

/// An iterator over the nodes of a [`FreeList`], head first.
#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct Iter<'a, 's> {
    segment: &'a Segment<'s>,
    current: Option<NodeRef>,
}

impl Iterator for Iter<'_, '_> {
    type Item = NodeRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = read_links(self.segment, current).next;
        Some(current)
    }
}
