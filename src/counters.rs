//! Track allocation counters for Segalloc.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of active allocations.
    pub allocation_count: usize,
    /// Total number of allocations.
    pub total_allocation_count: u64,

    /// Sum of active allocations' block sizes.
    pub allocated_bytes: usize,
    /// Sum of all allocations' block sizes.
    ///
    /// In-place reallocations's unchanged bytes are not recounted.
    pub total_allocated_bytes: u64,

    /// Number of bytes available for allocation.
    pub available_bytes: usize,
    /// Number of free blocks.
    pub fragment_count: usize,

    /// Size of the managed segment.
    pub segment_bytes: usize,
}

impl Counters {
    pub const fn new(segment_bytes: usize) -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            available_bytes: 0,
            fragment_count: 0,
            segment_bytes,
        }
    }

    /// Returns the number of bytes taken up by block headers.
    pub const fn overhead_bytes(&self) -> usize {
        self.segment_bytes - self.available_bytes - self.allocated_bytes
    }

    /// Returns the total number of allocated bytes freed.
    pub const fn total_freed_bytes(&self) -> u64 {
        self.total_allocated_bytes - self.allocated_bytes as u64
    }

    pub(crate) fn account_register_gap(&mut self, size: usize) {
        self.available_bytes += size;
        self.fragment_count += 1;
    }
    pub(crate) fn account_deregister_gap(&mut self, size: usize) {
        self.available_bytes -= size;
        self.fragment_count -= 1;
    }

    pub(crate) fn account_alloc(&mut self, alloc_size: usize) {
        self.allocation_count += 1;
        self.allocated_bytes += alloc_size;

        self.total_allocation_count += 1;
        self.total_allocated_bytes += alloc_size as u64;
    }

    pub(crate) fn account_dealloc(&mut self, alloc_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= alloc_size;
    }

    pub(crate) fn account_grow_in_place(&mut self, old_alloc_size: usize, new_alloc_size: usize) {
        self.allocated_bytes += new_alloc_size - old_alloc_size;
        self.total_allocated_bytes += (new_alloc_size - old_alloc_size) as u64;
    }

    pub(crate) fn account_shrink_in_place(&mut self, old_alloc_size: usize, new_alloc_size: usize) {
        self.allocated_bytes -= old_alloc_size - new_alloc_size;
        self.total_allocated_bytes -= (old_alloc_size - new_alloc_size) as u64;
    }
}

impl crate::Segalloc<'_> {
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use crate::{test_utils::words_as_bytes, *};

    #[test]
    fn test_alloc_free_counters() {
        let mut arena = [0u64; 1024];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let initial = *segalloc.counters();
        assert!(initial.segment_bytes == 8192);
        assert!(initial.available_bytes == 8192 - HEADER_SIZE);
        assert!(initial.fragment_count == 1);
        assert!(initial.allocation_count == 0);
        assert!(initial.overhead_bytes() == HEADER_SIZE);

        let a = segalloc.allocate(100).unwrap();
        let b = segalloc.allocate(200).unwrap();

        let counters = *segalloc.counters();
        assert!(counters.allocation_count == 2);
        assert!(counters.total_allocation_count == 2);
        assert!(counters.allocated_bytes == 104 + 200);
        assert!(counters.fragment_count == 1);
        assert!(counters.overhead_bytes() == 3 * HEADER_SIZE);
        assert!(counters.overhead_bytes() == segalloc.blocks().count() * HEADER_SIZE);

        segalloc.release(b);
        segalloc.release(a);

        let counters = *segalloc.counters();
        assert!(counters.allocation_count == 0);
        assert!(counters.total_allocation_count == 2);
        assert!(counters.allocated_bytes == 0);
        assert!(counters.total_freed_bytes() == 104 + 200);
        assert!(counters.available_bytes == initial.available_bytes);
        assert!(counters.fragment_count == 1);
    }

    #[cfg(not(feature = "disable-realloc-in-place"))]
    #[test]
    fn test_resize_counters() {
        let mut arena = [0u64; 256];
        let mut segalloc = Segalloc::new(words_as_bytes(&mut arena)).unwrap();

        let a = segalloc.allocate(64).unwrap();
        let a = segalloc.resize(a, 512).unwrap();
        assert!(segalloc.counters().allocation_count == 1);
        assert!(segalloc.counters().allocated_bytes == 512);

        let a = segalloc.resize(a, 128).unwrap();
        assert!(segalloc.counters().allocation_count == 1);
        assert!(segalloc.counters().allocated_bytes == 128);
        assert!(
            segalloc.counters().overhead_bytes() == segalloc.blocks().count() * HEADER_SIZE
        );

        segalloc.release(a);
        assert!(segalloc.counters().allocated_bytes == 0);
        assert!(segalloc.counters().fragment_count == 1);
        assert!(segalloc.counters().available_bytes == 2048 - HEADER_SIZE);
    }
}
