//! Cache module - fixed pool of pages shared by every transaction of a single pager.

use std::{cmp::Ordering, collections::TryReserveError, sync::Arc};

use log::{debug, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    arena::{Arena, Node, NodeId},
    config::{ConfigError, PageCacheConfig},
    free_list::FreeList,
    hash_index::HashIndex,
    lru::LruRing,
    page::{Page, PageRef},
    page_id::PageId,
    txn::{AllocError, Transaction},
};

/// Error for cache related operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to allocate page: {0}")]
    Alloc(#[from] AllocError),
    #[error("failed to allocate {table}: {source}")]
    Table {
        table: &'static str,
        #[source]
        source: TryReserveError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Nominal number of pool slots.
    pub capacity: usize,
    /// Pool slots currently holding a page. Can exceed `capacity` after a shrink.
    pub slots: usize,
    /// Pages reachable through the hash index.
    pub indexed: usize,
    /// Pages on the free list.
    pub free: usize,
    /// Unreferenced resident pages on the LRU ring.
    pub recyclable: usize,
    /// Private pages currently held.
    pub private: usize,
}

/// Everything guarded by the cache lock.
struct CacheState {
    page_size: usize,
    capacity: usize,
    arena: Arena,
    hash: HashIndex,
    free: FreeList,
    lru: LruRing,
}

impl CacheState {
    fn new(page_size: usize, capacity: usize) -> Result<Self, CacheError> {
        let hash = HashIndex::with_capacity(capacity).map_err(|source| CacheError::Table {
            table: "hash table",
            source,
        })?;
        let mut state = Self {
            page_size,
            capacity: 0,
            arena: Arena::default(),
            hash,
            free: FreeList::default(),
            lru: LruRing::default(),
        };
        state.grow(capacity)?;
        state.capacity = capacity;
        Ok(state)
    }

    fn fetch(&mut self, page_id: &PageId, txn: &dyn Transaction) -> Result<PageRef, CacheError> {
        let found = self.hash.lookup(&self.arena, page_id);
        if let Some(id) = found
            && (self.arena.node(id).page.is_resident() || txn.is_write())
        {
            if let NodeId::Resident(slot) = id {
                self.lru.pin(&mut self.arena, slot);
            }
            return Ok(self.hold(id));
        }

        // Either a miss, or a read transaction found a page private to some writer. The
        // latter must not be shared, the reader gets its own copy of it instead.
        let id = self.acquire(txn)?;
        let node = self.arena.node_mut(id);
        node.page_id = Some(*page_id);
        node.page.detach();

        match found {
            Some(src) => {
                // The writer cannot release the source while the cache lock is held here.
                let source = self.arena.node(src).page.clone();
                self.arena.node(id).page.copy_from(&source);
                debug!("pcache/fetch page {page_id} copied from private page of a writer");
            }
            None => {
                if matches!(id, NodeId::Resident(_)) || txn.is_write() {
                    self.hash.insert(&mut self.arena, id);
                }
            }
        }
        Ok(self.hold(id))
    }

    /// Takes a reference on node `id` and wraps it in a [`PageRef`].
    fn hold(&mut self, id: NodeId) -> PageRef {
        let node = self.arena.node_mut(id);
        node.ref_count += 1;
        let page_id = node
            .page_id
            .unwrap_or_else(|| panic!("pcache: handing out page {id:?} without a key"));
        PageRef::new(id, page_id, node.page.clone())
    }

    /// Finds a page to hold a new key: free slot, then least recently used slot, then a
    /// private page allocated by `txn`.
    fn acquire(&mut self, txn: &dyn Transaction) -> Result<NodeId, CacheError> {
        if let Some(slot) = self.free.pop(&mut self.arena) {
            let id = NodeId::Resident(slot);
            self.assert_unreferenced(id);
            trace!("pcache/acquire free slot {slot}");
            return Ok(id);
        }

        if let Some(slot) = self.lru.tail() {
            let id = NodeId::Resident(slot);
            self.hash.remove(&mut self.arena, id);
            self.lru.pin(&mut self.arena, slot);
            self.assert_unreferenced(id);
            trace!("pcache/acquire recycled slot {slot}");
            return Ok(id);
        }

        let buffer = txn.alloc_page(self.page_size)?;
        assert_eq!(
            buffer.len(),
            self.page_size,
            "pcache: transaction allocated page of wrong size"
        );
        let id = self.arena.insert_private(Node::new(Page::private(buffer)));
        trace!("pcache/acquire private page {id:?}");
        Ok(id)
    }

    fn assert_unreferenced(&self, id: NodeId) {
        let ref_count = self.arena.node(id).ref_count;
        assert_eq!(ref_count, 0, "pcache: reusing page {id:?} with {ref_count} holders");
    }

    /// Drops one reference on node `id`. The last one sends resident page to the LRU ring
    /// and destroys private one.
    fn unref(&mut self, id: NodeId, txn: &dyn Transaction) {
        let node = self.arena.node_mut(id);
        assert!(node.ref_count > 0, "pcache: releasing page {id:?} that is not held");
        node.ref_count -= 1;
        if node.ref_count > 0 {
            return;
        }

        match id {
            NodeId::Resident(slot) if slot >= self.capacity => self.reclaim(slot),
            NodeId::Resident(slot) => self.lru.unpin(&mut self.arena, slot),
            NodeId::Private(idx) => {
                // Only pages private to a writer are indexed, and they must not stay
                // discoverable once released.
                self.hash.remove(&mut self.arena, id);
                let node = self.arena.remove_private(idx);
                txn.free_page(node.page.take_buffer());
                trace!("pcache/destroy private page {id:?}");
            }
        }
    }

    /// Destroys page of a slot left above capacity by a shrink.
    fn reclaim(&mut self, slot: usize) {
        let id = NodeId::Resident(slot);
        assert!(
            !self.arena.node(id).page.is_dirty(),
            "pcache: reclaiming dirty page in slot {slot}"
        );
        self.hash.remove(&mut self.arena, id);
        self.arena.set_slot(slot, None);
        self.arena.trim_slots(self.capacity);
        debug!("pcache/reclaim slot {slot} above capacity {}", self.capacity);
    }

    fn alter(&mut self, capacity: usize) -> Result<(), CacheError> {
        match capacity.cmp(&self.capacity) {
            Ordering::Equal => return Ok(()),
            Ordering::Greater => self.grow(capacity)?,
            Ordering::Less => self.shrink(capacity),
        }
        debug!("pcache/alter capacity {} -> {capacity}", self.capacity);
        self.capacity = capacity;
        Ok(())
    }

    /// Creates pages for slots between current capacity and `capacity`. Slots that still
    /// hold a page from before a shrink are kept as they are.
    fn grow(&mut self, capacity: usize) -> Result<(), CacheError> {
        self.arena
            .reserve_slots(capacity)
            .map_err(|source| CacheError::Table {
                table: "slot table",
                source,
            })?;

        // Everything is allocated up front, so failure leaves the cache untouched.
        let mut fresh = Vec::new();
        for slot in self.capacity..capacity {
            if self.arena.slot(slot).is_none() {
                fresh.push((slot, Page::resident(slot, self.page_size)?));
            }
        }

        self.arena.extend_slots(capacity);
        // Pushed in reverse so the lowest slot is handed out first.
        for (slot, page) in fresh.into_iter().rev() {
            self.arena.set_slot(slot, Some(Node::new(page)));
            self.free.push(&mut self.arena, slot);
        }
        Ok(())
    }

    /// Destroys free pages whose slot does not fit in `capacity`. Pages that are held or
    /// on the LRU ring are left alone.
    fn shrink(&mut self, capacity: usize) {
        let removed = self
            .free
            .unlink_unless(&mut self.arena, |slot| slot < capacity);
        for slot in &removed {
            self.arena.set_slot(*slot, None);
        }
        self.arena.trim_slots(capacity);

        let excess = (capacity..self.arena.slot_count())
            .filter(|slot| self.arena.slot(*slot).is_some())
            .count();
        if excess > 0 {
            debug!(
                "pcache/shrink to {capacity}: destroyed {} free pages, {excess} busy slots left above capacity",
                removed.len()
            );
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            slots: self.arena.live_slots(),
            indexed: self.hash.len(),
            free: self.free.len(),
            recyclable: self.lru.len(),
            private: self.arena.private_count(),
        }
    }
}

/// Responsible for caching [`Page`]s of a single pager and distributing them to transactions.
///
/// A fixed pool of resident pages is allocated up front. Resident pages are looked up through
/// a hash index and, once nobody holds them, recycled in least recently used order. When the
/// pool is exhausted, pages are allocated privately through the transaction asking for them
/// and destroyed when released.
///
/// Pages that a write transaction got outside the pool are never shared with readers: a read
/// transaction asking for such a page gets its own copy of it.
///
/// Every operation is serialized by one lock owned by the instance.
pub struct PageCache {
    page_size: usize,
    state: Mutex<CacheState>,
}

impl PageCache {
    /// Opens cache of `capacity` pre-allocated pages, each `page_size` bytes long.
    ///
    /// Any non-zero page size is accepted. [`PageCacheConfig::validate`] is stricter.
    pub fn open(page_size: usize, capacity: usize) -> Result<Self, CacheError> {
        if page_size == 0 {
            return Err(ConfigError::ZeroPageSize.into());
        }
        let state = CacheState::new(page_size, capacity)?;
        debug!("pcache/open page size {page_size} capacity {capacity}");
        Ok(Self {
            page_size,
            state: Mutex::new(state),
        })
    }

    /// Opens cache described by `config`.
    pub fn with_config(config: &PageCacheConfig) -> Result<Self, CacheError> {
        Self::open(config.page_size, config.capacity)
    }

    /// Size of every page in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Nominal number of pool slots, as set by [`PageCache::open`] or [`PageCache::alter`].
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats()
    }

    /// Returns page `page_id` with one more reference held on it.
    ///
    /// A page coming back without a pager attached was not in the cache and its content must
    /// be initialized by the caller's pager (see [`Page::attach_with`]). A read transaction
    /// asking for a page held privately by a writer gets a copy of it, waiting under the cache
    /// lock until the writer's pager has initialized that page.
    pub fn fetch(&self, page_id: &PageId, txn: &dyn Transaction) -> Result<PageRef, CacheError> {
        let page = self.state.lock().fetch(page_id, txn)?;
        debug!("pcache/fetch page {page_id} {:?}", page.kind());
        Ok(page)
    }

    /// Gives back reference obtained from [`PageCache::fetch`].
    ///
    /// Resident page released by its last holder must not be dirty.
    pub fn release(&self, page: PageRef, txn: &dyn Transaction) {
        let mut state = self.state.lock();
        let owned = Arc::ptr_eq(&state.arena.node(page.node()).page, page.arc());
        assert!(
            owned,
            "pcache: releasing page {} not owned by this cache",
            page.page_id()
        );
        state.unref(page.node(), txn);
        debug!("pcache/release page {} {:?}", page.page_id(), page.kind());
    }

    /// Changes number of pool slots.
    ///
    /// Growing allocates new pages right away. Shrinking only destroys free pages above the
    /// new capacity; the rest are destroyed when released by their last holder.
    pub fn alter(&self, capacity: usize) -> Result<(), CacheError> {
        self.state.lock().alter(capacity)
    }

    /// Destroys every page. No page may be held anymore.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let held = state
            .arena
            .nodes()
            .filter(|(_, node)| node.ref_count > 0)
            .count();
        if held > 0 {
            warn!("pcache: closing cache with {held} pages still held");
        }
        state.arena.clear();
        debug!("pcache/close");
    }
}
