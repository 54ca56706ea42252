//! In-memory page cache shared by the transactions of a single pager.
//!
//! See [`PageCache`] for the entry point.

mod arena;
pub mod cache;
pub mod config;
mod free_list;
mod hash_index;
mod lru;
pub mod page;
pub mod page_id;
pub mod pager;
pub mod txn;

pub use cache::{CacheError, CacheStats, PageCache};
pub use config::{ConfigError, PageCacheConfig};
pub use page::{Page, PageKind, PageRef};
pub use page_id::{FILE_ID_LEN, FileId, PageId, PageNo};
pub use pager::{CellSizeFn, PageLayout, Pager};
pub use txn::{AllocError, HeapTransaction, Transaction, alloc_buffer};
