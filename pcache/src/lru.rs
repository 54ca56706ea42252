use log::trace;

use crate::arena::{Arena, NodeId};

/// Position in the LRU ring: either the anchor or a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RingPos {
    Anchor,
    Slot(usize),
}

/// Neighbours of a ring member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RingLinks {
    pub(crate) prev: RingPos,
    pub(crate) next: RingPos,
}

/// Circular doubly-linked list of unpinned resident pages, most recently unpinned first.
///
/// The anchor is a position of its own and never refers to a page, so an empty ring is
/// simply the anchor linked to itself.
pub(crate) struct LruRing {
    anchor: RingLinks,
    len: usize,
}

impl Default for LruRing {
    fn default() -> Self {
        Self {
            anchor: RingLinks {
                prev: RingPos::Anchor,
                next: RingPos::Anchor,
            },
            len: 0,
        }
    }
}

impl LruRing {
    /// Number of pages on the ring, i.e. pages that can be recycled.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn links_mut<'a>(&'a mut self, arena: &'a mut Arena, pos: RingPos) -> &'a mut RingLinks {
        match pos {
            RingPos::Anchor => &mut self.anchor,
            RingPos::Slot(slot) => arena
                .node_mut(NodeId::Resident(slot))
                .lru
                .as_mut()
                .unwrap_or_else(|| panic!("pcache: slot {slot} linked to LRU but not on it")),
        }
    }

    /// Puts unreferenced resident page at the head of the ring.
    pub(crate) fn unpin(&mut self, arena: &mut Arena, slot: usize) {
        let head = self.anchor.next;
        let node = arena.node_mut(NodeId::Resident(slot));
        assert!(node.page.is_resident(), "pcache: unpinning private page");
        assert!(!node.page.is_dirty(), "pcache: unpinning dirty page in slot {slot}");
        assert_eq!(node.ref_count, 0, "pcache: unpinning referenced page in slot {slot}");
        assert!(node.lru.is_none(), "pcache: page in slot {slot} already on LRU");

        node.lru = Some(RingLinks {
            prev: RingPos::Anchor,
            next: head,
        });
        self.links_mut(arena, head).prev = RingPos::Slot(slot);
        self.anchor.next = RingPos::Slot(slot);
        self.len += 1;

        trace!("pcache/unpin slot {slot}");
    }

    /// Takes page off the ring if it is there. Returns false if it was not linked.
    pub(crate) fn pin(&mut self, arena: &mut Arena, slot: usize) -> bool {
        let node = arena.node_mut(NodeId::Resident(slot));
        let Some(links) = node.lru.take() else {
            return false;
        };
        assert_eq!(node.ref_count, 0, "pcache: referenced page in slot {slot} found on LRU");

        self.links_mut(arena, links.prev).next = links.next;
        self.links_mut(arena, links.next).prev = links.prev;
        self.len -= 1;

        trace!("pcache/pin slot {slot}");
        true
    }

    /// Least recently unpinned slot, `None` if the ring is empty.
    pub(crate) fn tail(&self) -> Option<usize> {
        match self.anchor.prev {
            RingPos::Anchor => None,
            RingPos::Slot(slot) => Some(slot),
        }
    }

    /// Slots from most to least recently unpinned.
    #[cfg(test)]
    pub(crate) fn slots(&self, arena: &Arena) -> Vec<usize> {
        let mut slots = Vec::with_capacity(self.len);
        let mut cur = self.anchor.next;
        while let RingPos::Slot(slot) = cur {
            slots.push(slot);
            cur = arena
                .node(NodeId::Resident(slot))
                .lru
                .expect("ring member without links")
                .next;
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arena::Node, page::Page};

    fn arena_with_slots(n: usize) -> Arena {
        let mut arena = Arena::default();
        arena.extend_slots(n);
        for slot in 0..n {
            arena.set_slot(slot, Some(Node::new(Page::resident(slot, 16).unwrap())));
        }
        arena
    }

    #[test]
    fn empty_ring_has_no_tail() {
        let ring = LruRing::default();
        assert_eq!(ring.tail(), None);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn tail_is_least_recently_unpinned() {
        let mut arena = arena_with_slots(3);
        let mut ring = LruRing::default();
        ring.unpin(&mut arena, 0);
        ring.unpin(&mut arena, 1);
        ring.unpin(&mut arena, 2);

        assert_eq!(ring.slots(&arena), vec![2, 1, 0]);
        assert_eq!(ring.tail(), Some(0));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn pin_splices_out_of_any_position() {
        let mut arena = arena_with_slots(4);
        let mut ring = LruRing::default();
        for slot in 0..4 {
            ring.unpin(&mut arena, slot);
        }

        assert!(ring.pin(&mut arena, 2));
        assert_eq!(ring.slots(&arena), vec![3, 1, 0]);
        assert!(ring.pin(&mut arena, 0));
        assert_eq!(ring.tail(), Some(1));
        assert!(ring.pin(&mut arena, 3));
        assert!(ring.pin(&mut arena, 1));
        assert_eq!(ring.tail(), None);
        assert_eq!(ring.len(), 0);

        // Not linked anymore.
        assert!(!ring.pin(&mut arena, 1));
    }

    #[test]
    fn unpinned_again_moves_to_head() {
        let mut arena = arena_with_slots(2);
        let mut ring = LruRing::default();
        ring.unpin(&mut arena, 0);
        ring.unpin(&mut arena, 1);
        ring.pin(&mut arena, 0);
        ring.unpin(&mut arena, 0);
        assert_eq!(ring.slots(&arena), vec![0, 1]);
        assert_eq!(ring.tail(), Some(1));
    }

    #[test]
    #[should_panic(expected = "already on LRU")]
    fn double_unpin_panics() {
        let mut arena = arena_with_slots(1);
        let mut ring = LruRing::default();
        ring.unpin(&mut arena, 0);
        ring.unpin(&mut arena, 0);
    }

    #[test]
    #[should_panic(expected = "dirty page")]
    fn unpin_dirty_panics() {
        let mut arena = arena_with_slots(1);
        arena.node(NodeId::Resident(0)).page.set_dirty(true);
        let mut ring = LruRing::default();
        ring.unpin(&mut arena, 0);
    }
}
