use std::collections::TryReserveError;

use log::trace;

use crate::{
    arena::{Arena, NodeId},
    page_id::PageId,
};

/// Minimum number of buckets, used for very small caches.
pub(crate) const MIN_BUCKETS: usize = 8;

/// Chained hash table mapping [`PageId`] to the node currently holding it.
///
/// Chains are threaded through [`crate::arena::Node::hash_next`]. The number of buckets is
/// fixed when the table is created.
pub(crate) struct HashIndex {
    buckets: Vec<Option<NodeId>>,
    len: usize,
}

impl HashIndex {
    /// Creates table with `max(capacity, MIN_BUCKETS)` buckets.
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let n = capacity.max(MIN_BUCKETS);
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(n)?;
        buckets.resize(n, None);
        Ok(Self { buckets, len: 0 })
    }

    /// Number of indexed nodes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn bucket(&self, page_id: &PageId) -> usize {
        page_id.hash_value() as usize % self.buckets.len()
    }

    pub(crate) fn lookup(&self, arena: &Arena, page_id: &PageId) -> Option<NodeId> {
        let mut cur = self.buckets[self.bucket(page_id)];
        while let Some(id) = cur {
            let node = arena.node(id);
            if node.page_id.as_ref() == Some(page_id) {
                return Some(id);
            }
            cur = node.hash_next;
        }
        None
    }

    /// Links node `id` at the front of its chain. The node must already carry its key.
    pub(crate) fn insert(&mut self, arena: &mut Arena, id: NodeId) {
        let page_id = arena
            .node(id)
            .page_id
            .unwrap_or_else(|| panic!("pcache: indexing page {id:?} without a key"));
        let bucket = self.bucket(&page_id);
        let head = self.buckets[bucket];

        let node = arena.node_mut(id);
        assert!(!node.indexed, "pcache: page {page_id} indexed twice");
        node.hash_next = head;
        node.indexed = true;
        self.buckets[bucket] = Some(id);
        self.len += 1;

        trace!("pcache/add page {page_id} {id:?} to hash {bucket}");
    }

    /// Unlinks node `id` from its chain. Returns false if the node was not indexed.
    pub(crate) fn remove(&mut self, arena: &mut Arena, id: NodeId) -> bool {
        let node = arena.node(id);
        if !node.indexed {
            return false;
        }
        let page_id = node
            .page_id
            .unwrap_or_else(|| panic!("pcache: indexed page {id:?} without a key"));
        let bucket = self.bucket(&page_id);

        let mut prev: Option<NodeId> = None;
        let mut cur = self.buckets[bucket];
        while let Some(c) = cur {
            let next = arena.node(c).hash_next;
            if c == id {
                match prev {
                    Some(p) => arena.node_mut(p).hash_next = next,
                    None => self.buckets[bucket] = next,
                }
                let node = arena.node_mut(id);
                node.hash_next = None;
                node.indexed = false;
                self.len -= 1;
                trace!("pcache/remove page {page_id} {id:?} from hash {bucket}");
                return true;
            }
            prev = Some(c);
            cur = next;
        }
        panic!("pcache: page {page_id} marked indexed but missing from hash {bucket}");
    }

    /// Every indexed node, bucket by bucket.
    #[cfg(test)]
    pub(crate) fn entries(&self, arena: &Arena) -> Vec<NodeId> {
        let mut entries = Vec::with_capacity(self.len);
        for head in &self.buckets {
            let mut cur = *head;
            while let Some(id) = cur {
                entries.push(id);
                cur = arena.node(id).hash_next;
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arena::Node, page::Page, page_id::FileId};

    fn keyed_arena(keys: &[PageId]) -> Arena {
        let mut arena = Arena::default();
        arena.extend_slots(keys.len());
        for (slot, key) in keys.iter().enumerate() {
            let mut node = Node::new(Page::resident(slot, 16).unwrap());
            node.page_id = Some(*key);
            arena.set_slot(slot, Some(node));
        }
        arena
    }

    fn key(page_no: u32) -> PageId {
        PageId::new(FileId::from_slice(b"file"), page_no)
    }

    #[test]
    fn bucket_count_has_minimum() {
        assert_eq!(HashIndex::with_capacity(0).unwrap().buckets.len(), MIN_BUCKETS);
        assert_eq!(HashIndex::with_capacity(3).unwrap().buckets.len(), MIN_BUCKETS);
        assert_eq!(HashIndex::with_capacity(100).unwrap().buckets.len(), 100);
    }

    #[test]
    fn lookup_finds_inserted_nodes() {
        let keys: Vec<_> = (0..20).map(key).collect();
        let mut arena = keyed_arena(&keys);
        let mut hash = HashIndex::with_capacity(4).unwrap();
        for slot in 0..keys.len() {
            hash.insert(&mut arena, NodeId::Resident(slot));
        }
        assert_eq!(hash.len(), 20);

        for (slot, k) in keys.iter().enumerate() {
            assert_eq!(hash.lookup(&arena, k), Some(NodeId::Resident(slot)));
        }
        assert_eq!(hash.lookup(&arena, &key(99)), None);
    }

    #[test]
    fn remove_unlinks_from_any_chain_position() {
        // 8 buckets and keys 8 apart land in the same chain.
        let keys = [key(1), key(9), key(17)];
        let mut arena = keyed_arena(&keys);
        let mut hash = HashIndex::with_capacity(0).unwrap();
        for slot in 0..keys.len() {
            hash.insert(&mut arena, NodeId::Resident(slot));
        }
        assert_eq!(hash.entries(&arena).len(), 3);

        // Middle of the chain.
        assert!(hash.remove(&mut arena, NodeId::Resident(1)));
        assert_eq!(hash.lookup(&arena, &keys[1]), None);
        assert_eq!(hash.lookup(&arena, &keys[0]), Some(NodeId::Resident(0)));
        assert_eq!(hash.lookup(&arena, &keys[2]), Some(NodeId::Resident(2)));

        // Head of the chain, then the last one.
        assert!(hash.remove(&mut arena, NodeId::Resident(2)));
        assert!(hash.remove(&mut arena, NodeId::Resident(0)));
        assert_eq!(hash.len(), 0);
        assert!(hash.entries(&arena).is_empty());

        // Not indexed anymore.
        assert!(!hash.remove(&mut arena, NodeId::Resident(0)));
    }

    #[test]
    #[should_panic(expected = "indexed twice")]
    fn double_insert_panics() {
        let mut arena = keyed_arena(&[key(1)]);
        let mut hash = HashIndex::with_capacity(0).unwrap();
        hash.insert(&mut arena, NodeId::Resident(0));
        hash.insert(&mut arena, NodeId::Resident(0));
    }
}
