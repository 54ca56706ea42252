//! Pager module - the part of the pager's per-page state that the cache carries around.
//!
//! The cache never interprets any of it. It only copies a [`PageLayout`] verbatim when a
//! read-only transaction gets a private copy of a page held by a writer.

use std::{fmt, sync::Arc};

/// External collaborator that owns page I/O and knows how to interpret page contents.
pub trait Pager: Send + Sync {}

/// Function returning the size of the cell stored at the start of the given slice.
pub type CellSizeFn = fn(&[u8]) -> usize;

/// Layout metadata attached to a page by its [`Pager`] once the page content is initialized.
#[derive(Clone)]
pub struct PageLayout {
    /// Pager that owns the page.
    pub pager: Arc<dyn Pager>,
    /// Offset of the interpreted page header inside the buffer.
    pub header_offset: usize,
    /// Cell size accessor used by the B-tree layer.
    pub cell_size: Option<CellSizeFn>,
    /// Fixed key length hint, negative for variable length.
    pub key_len: i32,
    /// Fixed value length hint, negative for variable length.
    pub value_len: i32,
    /// Maximum payload stored locally in a cell.
    pub max_local: usize,
    /// Minimum payload stored locally in a cell.
    pub min_local: usize,
}

impl PageLayout {
    /// Creates layout with no cell metadata, only the pager back-reference and header offset.
    pub fn new(pager: Arc<dyn Pager>, header_offset: usize) -> Self {
        Self {
            pager,
            header_offset,
            cell_size: None,
            key_len: -1,
            value_len: -1,
            max_local: 0,
            min_local: 0,
        }
    }

    /// Returns true if both layouts belong to the same pager instance.
    pub fn same_pager(&self, other: &PageLayout) -> bool {
        Arc::ptr_eq(&self.pager, &other.pager)
    }
}

impl fmt::Debug for PageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageLayout")
            .field("pager", &Arc::as_ptr(&self.pager))
            .field("header_offset", &self.header_offset)
            .field("cell_size", &self.cell_size.is_some())
            .field("key_len", &self.key_len)
            .field("value_len", &self.value_len)
            .field("max_local", &self.max_local)
            .field("min_local", &self.min_local)
            .finish()
    }
}
