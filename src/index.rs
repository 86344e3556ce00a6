use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Number of free blocks an index tracks unless told otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Entry of the [`FreeIndex`]: a free block and its payload size.
///
/// `addr` is the address of the block header, not of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapNode {
    pub size: usize,
    pub addr: NonNull<u8>,
}

impl HeapNode {
    /// Filler for slots past `len`. Never handed out.
    const VACANT: Self = Self {
        size: 0,
        addr: NonNull::dangling(),
    };

    pub const fn new(size: usize, addr: NonNull<u8>) -> Self {
        Self { size, addr }
    }
}

/// Index of free blocks ordered by size.
///
/// This is a binary min-heap stored in a fixed array, so it never needs to
/// allocate, which is a must for something that lives inside the allocator.
///
/// ```text
///                 +----+
///                 | 16 |              slot 0: smallest free block
///                 +----+
///               /        \
///          +----+        +----+
///          | 32 |        | 24 |       slots 1, 2
///          +----+        +----+
///          /    \
///     +----+    +----+
///     | 64 |    | 48 |                slots 3, 4
///     +----+    +----+
///
///   nodes: [16, 32, 24, 64, 48, _, _, ...]   len = 5
/// ```
///
/// Every node is `<=` than its children (`nodes[i] <= nodes[2i + 1]` and
/// `nodes[i] <= nodes[2i + 2]`). Only the size takes part in the comparison,
/// equal sizes end up in whatever order the sifting leaves them.
///
/// The only query is "smallest block we know about". Callers that need a
/// block of at least `n` bytes take the minimum and check it themselves.
pub struct FreeIndex<const N: usize = DEFAULT_CAPACITY> {
    nodes: [HeapNode; N],
    len: usize,
}

impl<const N: usize> FreeIndex<N> {
    /// Creates a new empty index.
    pub const fn new() -> Self {
        Self {
            nodes: [HeapNode::VACANT; N],
            len: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Smallest node, without removing it.
    pub fn peek(&self) -> Option<&HeapNode> {
        self.as_slice().first()
    }

    /// Live nodes in heap order (not sorted).
    pub fn as_slice(&self) -> &[HeapNode] {
        &self.nodes[..self.len]
    }

    /// Adds a free block of `size` bytes whose header lives at `addr`.
    ///
    /// When the index is full nothing is stored and
    /// [`Error::IndexOverflow`] is returned. The block is then unknown to the
    /// index, it is up to the caller what to do with it.
    pub fn insert(&mut self, size: usize, addr: NonNull<u8>) -> Result<()> {
        if self.is_full() {
            return Err(Error::IndexOverflow { capacity: N });
        }

        let slot = self.len;
        self.nodes[slot] = HeapNode::new(size, addr);
        self.len += 1;
        self.sift_up(slot);

        Ok(())
    }

    /// Removes and returns the smallest node.
    ///
    /// Fails with [`Error::IndexUnderflow`] when there is nothing to take.
    pub fn extract_min(&mut self) -> Result<HeapNode> {
        if self.is_empty() {
            return Err(Error::IndexUnderflow);
        }

        let min = self.nodes[0];
        self.len -= 1;
        self.nodes[0] = self.nodes[self.len];
        self.nodes[self.len] = HeapNode::VACANT;
        self.sift_down(0);

        Ok(min)
    }

    /// Checks the heap order of every live node.
    pub fn check_order(&self) -> Result<()> {
        for child in 1..self.len {
            let parent = (child - 1) / 2;
            if self.nodes[parent].size > self.nodes[child].size {
                return Err(Error::HeapOrder { parent, child });
            }
        }

        Ok(())
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.nodes[slot].size >= self.nodes[parent].size {
                break;
            }

            self.nodes.swap(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;

            if left < self.len && self.nodes[left].size < self.nodes[smallest].size {
                smallest = left;
            }
            if right < self.len && self.nodes[right].size < self.nodes[smallest].size {
                smallest = right;
            }

            if smallest == slot {
                break;
            }

            self.nodes.swap(slot, smallest);
            slot = smallest;
        }
    }
}

impl<const N: usize> Default for FreeIndex<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: usize) -> NonNull<u8> {
        NonNull::new((n * 16 + 16) as *mut u8).unwrap()
    }

    #[test]
    fn new_index_is_empty() {
        let index: FreeIndex<8> = FreeIndex::new();

        assert_eq!(index.len(), 0);
        assert_eq!(index.capacity(), 8);
        assert!(index.is_empty());
        assert!(index.peek().is_none());
    }

    #[test]
    fn extracts_in_size_order() {
        let mut index: FreeIndex<16> = FreeIndex::new();
        let sizes = [64, 8, 48, 16, 16, 120, 32, 8, 96];

        for (n, size) in sizes.iter().enumerate() {
            index.insert(*size, addr(n)).unwrap();
            index.check_order().unwrap();
        }
        assert_eq!(index.peek().map(|node| node.size), Some(8));

        let mut extracted = Vec::new();
        while let Ok(node) = index.extract_min() {
            index.check_order().unwrap();
            extracted.push(node.size);
        }

        let mut expected = sizes.to_vec();
        expected.sort();
        assert_eq!(expected, extracted);
    }

    #[test]
    fn extract_keeps_address() {
        let mut index: FreeIndex<4> = FreeIndex::new();
        index.insert(32, addr(1)).unwrap();
        index.insert(24, addr(2)).unwrap();

        assert_eq!(HeapNode::new(24, addr(2)), index.extract_min().unwrap());
        assert_eq!(HeapNode::new(32, addr(1)), index.extract_min().unwrap());
    }

    #[test]
    fn underflow() {
        let mut index: FreeIndex<4> = FreeIndex::new();

        assert_eq!(Err(Error::IndexUnderflow), index.extract_min());

        index.insert(8, addr(0)).unwrap();
        index.extract_min().unwrap();
        assert_eq!(Err(Error::IndexUnderflow), index.extract_min());
    }

    #[test]
    fn overflow_drops_entry() {
        let mut index: FreeIndex<2> = FreeIndex::new();
        index.insert(16, addr(0)).unwrap();
        index.insert(8, addr(1)).unwrap();

        assert!(index.is_full());
        assert_eq!(
            Err(Error::IndexOverflow { capacity: 2 }),
            index.insert(4, addr(2))
        );

        // The rejected node never made it in.
        assert_eq!(index.len(), 2);
        assert_eq!(index.extract_min().unwrap().size, 8);
        assert_eq!(index.extract_min().unwrap().size, 16);
    }

    #[test]
    fn zero_capacity_always_overflows() {
        let mut index: FreeIndex<0> = FreeIndex::new();

        assert!(index.is_full());
        assert_eq!(
            Err(Error::IndexOverflow { capacity: 0 }),
            index.insert(8, addr(0))
        );
    }

    #[test]
    fn equal_sizes() {
        let mut index: FreeIndex<8> = FreeIndex::new();
        for n in 0..5 {
            index.insert(40, addr(n)).unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(node) = index.extract_min() {
            assert_eq!(node.size, 40);
            seen.push(node.addr);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn check_order_reports_violation() {
        let mut index: FreeIndex<4> = FreeIndex::new();
        index.insert(8, addr(0)).unwrap();
        index.insert(16, addr(1)).unwrap();
        index.insert(24, addr(2)).unwrap();

        index.nodes[2].size = 4;

        assert_eq!(
            Err(Error::HeapOrder {
                parent: 0,
                child: 2
            }),
            index.check_order()
        );
    }
}
