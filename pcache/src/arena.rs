//! Arena module - storage for every page the cache knows about.
//!
//! Hash chains, the LRU ring and the free list are all threaded through [`Node`]s by index,
//! so a page can be spliced in and out of any of them in O(1) without owning pointers.

use std::{collections::TryReserveError, sync::Arc};

use crate::{lru::RingLinks, page::Page, page_id::PageId};

/// Index of a node in the [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum NodeId {
    /// Slot of the fixed pool.
    Resident(usize),
    /// Entry of the private page table.
    Private(usize),
}

/// Cache-side bookkeeping of a single page. Only touched under the cache lock.
pub(crate) struct Node {
    pub(crate) page: Arc<Page>,
    /// Key the page currently holds. `None` until the page is first handed out.
    pub(crate) page_id: Option<PageId>,
    /// Number of active holders.
    pub(crate) ref_count: usize,
    /// Set to true while the node is linked into the hash index.
    pub(crate) indexed: bool,
    pub(crate) hash_next: Option<NodeId>,
    /// Position in the LRU ring, `None` when not linked.
    pub(crate) lru: Option<RingLinks>,
    pub(crate) free_next: Option<usize>,
}

impl Node {
    pub(crate) fn new(page: Arc<Page>) -> Self {
        Self {
            page,
            page_id: None,
            ref_count: 0,
            indexed: false,
            hash_next: None,
            lru: None,
            free_next: None,
        }
    }
}

/// Slot table of resident pages plus the table of private pages.
#[derive(Default)]
pub(crate) struct Arena {
    /// Slot table. May be longer than the cache capacity while a shrink is draining.
    resident: Vec<Option<Node>>,
    private: Vec<Option<Node>>,
    /// Vacant entries of [`Arena::private`].
    vacant: Vec<usize>,
}

impl Arena {
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        let node = match id {
            NodeId::Resident(slot) => self.resident.get(slot),
            NodeId::Private(idx) => self.private.get(idx),
        };
        node.and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("pcache: dangling node reference {id:?}"))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        let node = match id {
            NodeId::Resident(slot) => self.resident.get_mut(slot),
            NodeId::Private(idx) => self.private.get_mut(idx),
        };
        node.and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("pcache: dangling node reference {id:?}"))
    }

    pub(crate) fn slot(&self, slot: usize) -> Option<&Node> {
        self.resident.get(slot).and_then(Option::as_ref)
    }

    /// Length of the slot table.
    pub(crate) fn slot_count(&self) -> usize {
        self.resident.len()
    }

    /// Number of slots holding a page.
    pub(crate) fn live_slots(&self) -> usize {
        self.resident.iter().flatten().count()
    }

    /// Makes sure the slot table can hold `len` slots without reallocating.
    pub(crate) fn reserve_slots(&mut self, len: usize) -> Result<(), TryReserveError> {
        self.resident
            .try_reserve_exact(len.saturating_sub(self.resident.len()))
    }

    /// Extends the slot table with empty slots up to `len`.
    pub(crate) fn extend_slots(&mut self, len: usize) {
        if self.resident.len() < len {
            self.resident.resize_with(len, || None);
        }
    }

    /// Drops empty slots from the end of the table, never going below `len`.
    pub(crate) fn trim_slots(&mut self, len: usize) {
        while self.resident.len() > len && matches!(self.resident.last(), Some(None)) {
            self.resident.pop();
        }
        self.resident.shrink_to(len);
    }

    /// Puts `node` into slot `slot` returning previous occupant.
    pub(crate) fn set_slot(&mut self, slot: usize, node: Option<Node>) -> Option<Node> {
        std::mem::replace(&mut self.resident[slot], node)
    }

    pub(crate) fn insert_private(&mut self, node: Node) -> NodeId {
        match self.vacant.pop() {
            Some(idx) => {
                self.private[idx] = Some(node);
                NodeId::Private(idx)
            }
            None => {
                self.private.push(Some(node));
                NodeId::Private(self.private.len() - 1)
            }
        }
    }

    pub(crate) fn remove_private(&mut self, idx: usize) -> Node {
        let node = self.private[idx]
            .take()
            .unwrap_or_else(|| panic!("pcache: private page {idx} removed twice"));
        self.vacant.push(idx);
        node
    }

    /// Number of private pages currently alive.
    pub(crate) fn private_count(&self) -> usize {
        self.private.len() - self.vacant.len()
    }

    /// Iterates over every live node.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        let resident = self
            .resident
            .iter()
            .enumerate()
            .filter_map(|(slot, n)| n.as_ref().map(|n| (NodeId::Resident(slot), n)));
        let private = self
            .private
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| n.as_ref().map(|n| (NodeId::Private(idx), n)));
        resident.chain(private)
    }

    /// Drops every page.
    pub(crate) fn clear(&mut self) {
        self.resident.clear();
        self.private.clear();
        self.vacant.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident_node(slot: usize) -> Node {
        Node::new(Page::resident(slot, 16).unwrap())
    }

    #[test]
    fn private_entries_are_reused() {
        let mut arena = Arena::default();
        let a = arena.insert_private(Node::new(Page::private(vec![0; 16].into())));
        let b = arena.insert_private(Node::new(Page::private(vec![0; 16].into())));
        assert_eq!(a, NodeId::Private(0));
        assert_eq!(b, NodeId::Private(1));
        assert_eq!(arena.private_count(), 2);

        arena.remove_private(0);
        assert_eq!(arena.private_count(), 1);
        let c = arena.insert_private(Node::new(Page::private(vec![0; 16].into())));
        assert_eq!(c, NodeId::Private(0));
    }

    #[test]
    fn slot_table_grows_and_trims() {
        let mut arena = Arena::default();
        arena.reserve_slots(4).unwrap();
        arena.extend_slots(4);
        assert_eq!(arena.slot_count(), 4);
        for slot in 0..4 {
            arena.set_slot(slot, Some(resident_node(slot)));
        }
        assert_eq!(arena.live_slots(), 4);

        arena.set_slot(3, None);
        arena.set_slot(1, None);
        arena.trim_slots(1);
        // Slot 2 is still alive, so only slot 3 can go.
        assert_eq!(arena.slot_count(), 3);
        assert!(arena.slot(2).is_some());
        assert!(arena.slot(1).is_none());
        assert_eq!(arena.live_slots(), 2);
    }

    #[test]
    #[should_panic(expected = "dangling node reference")]
    fn missing_node_panics() {
        let arena = Arena::default();
        arena.node(NodeId::Resident(0));
    }

    #[test]
    fn nodes_lists_resident_then_private() {
        let mut arena = Arena::default();
        arena.extend_slots(2);
        arena.set_slot(1, Some(resident_node(1)));
        arena.insert_private(Node::new(Page::private(vec![0; 16].into())));

        let ids: Vec<_> = arena.nodes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![NodeId::Resident(1), NodeId::Private(0)]);
    }
}
