use log::trace;

use crate::{
    block::{BlockHeader, HEADER_SIZE, Link, Offset},
    region::HeapRegion,
};

/// Address-ordered, doubly linked list of the free blocks of a [`HeapRegion`].
///
/// The list doesn't own any memory. Its only state is the head link, the rest
/// of the links live inside the [`BlockHeader`] of each free block:
///
/// ```text
///   head
///    |
///    v
/// +------+--------+   +-------+   +------+--------+   +-------+   +------+--------+
/// | Free |        |   | Block |   | Free |        |   | Block |   | Free |        |
/// +------+--------+   +-------+   +------+--------+   +-------+   +------+--------+
///    |  ^                            |  ^                            ^
///    |  +----------------------------+  +----------------------------+  prev
///    +------------------------------>+------------------------------>   next
/// ```
///
/// While the heap is consistent the list keeps these properties:
///
/// - Members are sorted by strictly increasing offset.
/// - No two members are memory-adjacent, they would have been coalesced.
/// - Allocated blocks are never reachable and have both links cleared.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Link,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: Link::NONE }
    }

    /// Iterates the free blocks in address order.
    pub fn iter<'a>(&self, region: &'a HeapRegion) -> Iter<'a> {
        Iter {
            region,
            current: self.head.get(),
        }
    }

    /// Returns the first block, in address order, whose payload can hold
    /// `size` bytes plus a header.
    ///
    /// Blocks smaller than a header are skipped. Coalescing never leaves one
    /// of those on the list, so this only guards against a corrupted heap.
    pub fn find_first_fit(&self, region: &HeapRegion, size: usize) -> Option<Offset> {
        let needed = size.checked_add(HEADER_SIZE)?;

        self.iter(region)
            .filter(|(_, header)| header.size >= HEADER_SIZE)
            .find(|(_, header)| header.size >= needed)
            .map(|(block, _)| block)
    }

    /// Links `block` at its address-sorted position.
    pub fn insert(&mut self, region: &mut HeapRegion, block: Offset) {
        let Some(head) = self.head.get() else {
            // The list is empty, the block becomes its only member.
            Self::link(region, block, None, None);
            self.head = Link::to(block);
            return;
        };

        debug_assert_ne!(block, head, "block is already free");

        if block < head {
            // Goes before the current head.
            Self::link(region, block, None, Some(head));
            region.block_mut(head).prev = Link::to(block);
            self.head = Link::to(block);
            return;
        }

        let mut current = head;

        loop {
            match region.block(current).next.get() {
                Some(next) if block < next => {
                    // Falls between two members.
                    Self::link(region, block, Some(current), Some(next));
                    region.block_mut(current).next = Link::to(block);
                    region.block_mut(next).prev = Link::to(block);
                    return;
                }
                Some(next) => {
                    debug_assert_ne!(block, next, "block is already free");
                    current = next;
                }
                None => {
                    // Goes after the current tail.
                    Self::link(region, block, Some(current), None);
                    region.block_mut(current).next = Link::to(block);
                    return;
                }
            }
        }
    }

    /// Unlinks `block` from its neighbours and clears its own links.
    pub fn remove(&mut self, region: &mut HeapRegion, block: Offset) {
        let BlockHeader { prev, next, .. } = *region.block(block);

        match prev.get() {
            Some(prev) => region.block_mut(prev).next = next,
            None => {
                debug_assert_eq!(self.head, Link::to(block), "block is not on the free list");
                self.head = next;
            }
        }

        if let Some(next) = next.get() {
            region.block_mut(next).prev = prev;
        }

        Self::link(region, block, None, None);
    }

    /// Writes a new free block of `size` bytes at `new` and gives it the list
    /// position of `old`, which is unlinked.
    ///
    /// `new` has to lie between `old` and the member that follows it, which is
    /// always the case for the remainder of a split.
    pub fn replace(&mut self, region: &mut HeapRegion, old: Offset, new: Offset, size: usize) {
        let BlockHeader { prev, next, .. } = *region.block(old);
        debug_assert!(old < new && next.get().is_none_or(|next| new < next));

        region.write(new, BlockHeader { size, prev, next });

        match prev.get() {
            Some(prev) => region.block_mut(prev).next = Link::to(new),
            None => self.head = Link::to(new),
        }

        if let Some(next) = next.get() {
            region.block_mut(next).prev = Link::to(new);
        }

        Self::link(region, old, None, None);
    }

    /// Merges every pair of memory-adjacent members, returning how many merges
    /// took place.
    ///
    /// Since the list is sorted, a block can only be adjacent to the member
    /// right after it. The scan starts over from the head after each merge and
    /// ends once a full pass finds nothing to merge.
    pub fn coalesce(&mut self, region: &mut HeapRegion) -> usize {
        let mut merges = 0;
        let mut current = self.head.get();

        while let Some(block) = current {
            let BlockHeader { size, next, .. } = *region.block(block);

            match next.get() {
                Some(next) if next.get() == block.end(size) => {
                    Self::absorb(region, block, next);
                    merges += 1;
                    current = self.head.get();
                }
                next => current = next,
            }
        }

        merges
    }

    /// Extends `block` over `next`, which must directly follow it both in
    /// memory and in the list. The header of `next` is erased.
    fn absorb(region: &mut HeapRegion, block: Offset, next: Offset) {
        let absorbed = *region.block(next);

        if let Some(after) = absorbed.next.get() {
            region.block_mut(after).prev = Link::to(block);
        }

        let header = region.block_mut(block);
        header.next = absorbed.next;
        header.size += HEADER_SIZE + absorbed.size;

        trace!(
            "merged block at +{:#x} into +{:#x} (size {})",
            next.get(),
            block.get(),
            header.size
        );

        *region.block_mut(next) = BlockHeader::detached(0);
    }

    #[inline]
    fn link(region: &mut HeapRegion, block: Offset, prev: Option<Offset>, next: Option<Offset>) {
        let header = region.block_mut(block);
        header.prev = prev.into();
        header.next = next.into();
    }
}

/// Iterator over the members of a [`FreeList`], yielding each block with a
/// copy of its header.
pub(crate) struct Iter<'a> {
    region: &'a HeapRegion,
    current: Option<Offset>,
}

impl Iterator for Iter<'_> {
    type Item = (Offset, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        let header = *self.region.block(block);
        self.current = header.next.get();

        Some((block, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    const REGION: usize = 4096;

    /// Region holding blocks of `size` bytes back to back, none of them linked.
    fn carve(sizes: &[usize]) -> (HeapRegion, Vec<Offset>) {
        let mut region = HeapRegion::map::<Kernel>(REGION).unwrap();
        let mut blocks = Vec::new();
        let mut at = 0;

        for &size in sizes {
            let block = Offset::new(at);
            region.write(block, BlockHeader::detached(size));
            blocks.push(block);
            at = block.end(size);
        }

        (region, blocks)
    }

    fn members(list: &FreeList, region: &HeapRegion) -> Vec<Offset> {
        list.iter(region).map(|(block, _)| block).collect()
    }

    fn assert_linked(list: &FreeList, region: &HeapRegion) {
        let mut prev = Link::NONE;

        for (block, header) in list.iter(region) {
            assert_eq!(header.prev, prev);
            if let Some(before) = prev.get() {
                assert!(before < block);
            }
            prev = Link::to(block);
        }
    }

    #[test]
    fn new_list_is_empty() {
        let (region, _) = carve(&[]);
        let list = FreeList::new();

        assert!(list.head.is_none());
        assert!(list.iter(&region).next().is_none());
    }

    #[test]
    fn insert_keeps_address_order() {
        let (mut region, blocks) = carve(&[32, 32, 32, 32, 32]);
        let mut list = FreeList::new();

        // empty, append, new head, between two members, between again
        for i in [1, 4, 0, 2, 3] {
            list.insert(&mut region, blocks[i]);
        }

        assert_eq!(members(&list, &region), blocks);
        assert_eq!(list.head.get(), Some(blocks[0]));
        assert_linked(&list, &region);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let (mut region, blocks) = carve(&[16, 16, 16, 16]);
        let mut list = FreeList::new();
        for &block in &blocks {
            list.insert(&mut region, block);
        }

        list.remove(&mut region, blocks[0]);
        assert_eq!(list.head.get(), Some(blocks[1]));
        assert!(region.block(blocks[0]).is_detached());

        list.remove(&mut region, blocks[2]);
        list.remove(&mut region, blocks[3]);
        assert_eq!(members(&list, &region), vec![blocks[1]]);
        assert_linked(&list, &region);

        list.remove(&mut region, blocks[1]);
        assert!(list.head.is_none());
    }

    #[test]
    fn replace_takes_over_position() {
        let (mut region, blocks) = carve(&[64, 16, 64]);
        let mut list = FreeList::new();
        list.insert(&mut region, blocks[0]);
        list.insert(&mut region, blocks[2]);

        let rest = Offset::new(blocks[0].end(16));
        list.replace(&mut region, blocks[0], rest, 64 - 16 - HEADER_SIZE);

        assert_eq!(members(&list, &region), vec![rest, blocks[2]]);
        assert_eq!(region.block(rest).size, 64 - 16 - HEADER_SIZE);
        assert!(region.block(blocks[0]).is_detached());
        assert_linked(&list, &region);
    }

    #[test]
    fn first_fit_needs_room_for_a_header() {
        let (mut region, blocks) = carve(&[24, 40, 200]);
        let mut list = FreeList::new();
        for &block in &blocks {
            list.insert(&mut region, block);
        }

        assert_eq!(list.find_first_fit(&region, 8), Some(blocks[0]));
        assert_eq!(list.find_first_fit(&region, 24), Some(blocks[1]));
        assert_eq!(list.find_first_fit(&region, 40), Some(blocks[2]));
        assert_eq!(list.find_first_fit(&region, 200), None);
        assert_eq!(list.find_first_fit(&region, usize::MAX), None);
    }

    #[test]
    fn first_fit_skips_degenerate_blocks() {
        let (mut region, blocks) = carve(&[8, 64]);
        let mut list = FreeList::new();
        list.insert(&mut region, blocks[0]);
        list.insert(&mut region, blocks[1]);

        // A zero sized request would fit the 8 byte block if it wasn't skipped.
        assert_eq!(list.find_first_fit(&region, 0), Some(blocks[1]));
    }

    #[test]
    fn coalesce_merges_adjacent_runs() {
        let (mut region, blocks) = carve(&[32, 32, 32, 32, 32]);
        let mut list = FreeList::new();
        for i in [0, 1, 3, 4] {
            list.insert(&mut region, blocks[i]);
        }

        assert_eq!(list.coalesce(&mut region), 2);
        assert_eq!(members(&list, &region), vec![blocks[0], blocks[3]]);
        assert_eq!(region.block(blocks[0]).size, 32 + HEADER_SIZE + 32);
        assert_eq!(region.block(blocks[1]).size, 0);
        assert!(region.block(blocks[1]).is_detached());
        assert_linked(&list, &region);

        list.insert(&mut region, blocks[2]);
        assert_eq!(list.coalesce(&mut region), 2);
        assert_eq!(members(&list, &region), vec![blocks[0]]);
        assert_eq!(region.block(blocks[0]).size, 5 * 32 + 4 * HEADER_SIZE);
    }

    #[test]
    fn coalesce_leaves_separated_blocks() {
        let (mut region, blocks) = carve(&[32, 32, 32]);
        let mut list = FreeList::new();
        list.insert(&mut region, blocks[0]);
        list.insert(&mut region, blocks[2]);

        assert_eq!(list.coalesce(&mut region), 0);
        assert_eq!(members(&list, &region), vec![blocks[0], blocks[2]]);
    }
}
