use crate::arena::{Arena, NodeId};

/// Singly-linked list of pool slots whose pages are not used for anything.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<usize>,
    len: usize,
}

impl FreeList {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, arena: &mut Arena, slot: usize) {
        let node = arena.node_mut(NodeId::Resident(slot));
        debug_assert!(node.free_next.is_none());
        node.free_next = self.head;
        self.head = Some(slot);
        self.len += 1;
    }

    pub(crate) fn pop(&mut self, arena: &mut Arena) -> Option<usize> {
        let slot = self.head?;
        let node = arena.node_mut(NodeId::Resident(slot));
        self.head = node.free_next.take();
        self.len -= 1;
        Some(slot)
    }

    /// Unlinks every slot for which `keep` returns false and returns them in list order.
    pub(crate) fn unlink_unless<F>(&mut self, arena: &mut Arena, keep: F) -> Vec<usize>
    where
        F: Fn(usize) -> bool,
    {
        let mut removed = Vec::new();
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(slot) = cur {
            let next = arena.node(NodeId::Resident(slot)).free_next;
            if keep(slot) {
                prev = Some(slot);
            } else {
                match prev {
                    Some(p) => arena.node_mut(NodeId::Resident(p)).free_next = next,
                    None => self.head = next,
                }
                arena.node_mut(NodeId::Resident(slot)).free_next = None;
                self.len -= 1;
                removed.push(slot);
            }
            cur = next;
        }
        removed
    }

    /// Slots in list order.
    #[cfg(test)]
    pub(crate) fn slots(&self, arena: &Arena) -> Vec<usize> {
        let mut slots = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(slot) = cur {
            slots.push(slot);
            cur = arena.node(NodeId::Resident(slot)).free_next;
        }
        slots
    }
}
