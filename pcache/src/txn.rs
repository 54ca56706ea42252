//! Transaction module - the part of a transaction the cache relies on.
//!
//! Pages that do not fit in the cache's fixed pool are allocated and freed through the
//! transaction that asked for them, so the transaction decides where that memory comes from.

use std::{
    collections::TryReserveError,
    sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

/// Error for page buffer allocation.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("out of memory while allocating {size} bytes: {source}")]
    OutOfMemory {
        size: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("transaction reached its limit of {limit} private pages")]
    LimitReached { limit: usize },
}

/// Allocates zeroed page buffer of `size` bytes, reporting failure instead of aborting.
pub fn alloc_buffer(size: usize) -> Result<Box<[u8]>, AllocError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|source| AllocError::OutOfMemory { size, source })?;
    buffer.resize(size, 0);
    Ok(buffer.into_boxed_slice())
}

/// Transaction context passed by reference into [`crate::PageCache::fetch`] and
/// [`crate::PageCache::release`]. The cache never mutates it.
pub trait Transaction {
    /// Returns true for write transactions.
    fn is_write(&self) -> bool;

    /// Allocates buffer for a private page. Must return exactly `page_size` bytes.
    fn alloc_page(&self, page_size: usize) -> Result<Box<[u8]>, AllocError>;

    /// Takes back buffer previously returned by [`Transaction::alloc_page`].
    fn free_page(&self, buffer: Box<[u8]>);
}

/// [`Transaction`] backed by the global allocator.
///
/// It keeps track of private pages it has handed out and not yet got back, and can be
/// limited to a maximum number of such pages.
#[derive(Debug)]
pub struct HeapTransaction {
    write: bool,
    limit: Option<usize>,
    outstanding: AtomicUsize,
}

impl HeapTransaction {
    fn new(write: bool) -> Self {
        Self {
            write,
            limit: None,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Creates read-only transaction.
    pub fn read() -> Self {
        Self::new(false)
    }

    /// Creates write transaction.
    pub fn write() -> Self {
        Self::new(true)
    }

    /// Limits number of private pages that can be outstanding at the same time.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of private pages allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Transaction for HeapTransaction {
    fn is_write(&self) -> bool {
        self.write
    }

    fn alloc_page(&self, page_size: usize) -> Result<Box<[u8]>, AllocError> {
        if let Some(limit) = self.limit
            && self.outstanding() >= limit
        {
            return Err(AllocError::LimitReached { limit });
        }
        let buffer = alloc_buffer(page_size)?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(buffer)
    }

    fn free_page(&self, buffer: Box<[u8]>) {
        drop(buffer);
        let freed = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        assert!(freed.is_ok(), "pcache: transaction freed page it never allocated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_buffer_is_zeroed_and_sized() {
        let buffer = alloc_buffer(512).unwrap();
        assert_eq!(buffer.len(), 512);
        assert!(buffer.iter().all(|b| *b == 0));
    }

    #[test]
    fn heap_transaction_tracks_outstanding_pages() {
        let txn = HeapTransaction::write();
        assert!(txn.is_write());

        let a = txn.alloc_page(64).unwrap();
        let b = txn.alloc_page(64).unwrap();
        assert_eq!(txn.outstanding(), 2);

        txn.free_page(a);
        txn.free_page(b);
        assert_eq!(txn.outstanding(), 0);
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn freeing_foreign_page_panics() {
        let txn = HeapTransaction::read();
        txn.free_page(vec![0u8; 64].into_boxed_slice());
    }

    #[test]
    fn heap_transaction_respects_limit() {
        let txn = HeapTransaction::read().with_limit(1);
        assert!(!txn.is_write());

        let page = txn.alloc_page(64).unwrap();
        let err = txn.alloc_page(64).unwrap_err();
        assert!(matches!(err, AllocError::LimitReached { limit: 1 }));

        txn.free_page(page);
        assert!(txn.alloc_page(64).is_ok());
    }
}
