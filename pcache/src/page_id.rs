use std::fmt;

use byteorder::{ByteOrder, NativeEndian};

/// Length of the opaque file identifier in bytes.
pub const FILE_ID_LEN: usize = 24;

/// Type representing page number inside a single file, should be used instead of bare `u32`.
pub type PageNo = u32;

/// Opaque identifier of the file a page belongs to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct FileId([u8; FILE_ID_LEN]);

impl FileId {
    pub fn new(bytes: [u8; FILE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds identifier from `bytes`, zero-padding or truncating it to [`FILE_ID_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut id = [0u8; FILE_ID_LEN];
        let len = bytes.len().min(FILE_ID_LEN);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_ID_LEN] {
        &self.0
    }

    /// Wrapping sum of the identifier read as native-endian 32-bit words.
    fn word_sum(&self) -> u32 {
        self.0
            .chunks_exact(size_of::<u32>())
            .map(NativeEndian::read_u32)
            .fold(0u32, u32::wrapping_add)
    }
}

/// Structure for referring to single page in a single file. This is the cache key.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct PageId {
    file_id: FileId,
    page_no: PageNo,
}

impl PageId {
    pub fn new(file_id: FileId, page_no: PageNo) -> Self {
        Self { file_id, page_no }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    /// Raw (not yet reduced) hash of the key, used by the hash index.
    pub(crate) fn hash_value(&self) -> u32 {
        self.file_id.word_sum().wrapping_add(self.page_no)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{}", self.file_id.word_sum(), self.page_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_value_adds_words_and_page_no() {
        let mut bytes = [0u8; FILE_ID_LEN];
        for (i, word) in bytes.chunks_exact_mut(4).enumerate() {
            NativeEndian::write_u32(word, i as u32 + 1);
        }
        let id = PageId::new(FileId::new(bytes), 10);
        // 1 + 2 + 3 + 4 + 5 + 6 + 10
        assert_eq!(id.hash_value(), 31);
    }

    #[test]
    fn hash_value_wraps_instead_of_overflowing() {
        let id = PageId::new(FileId::new([0xff; FILE_ID_LEN]), 7);
        let expected = (0..6).fold(0u32, |acc, _| acc.wrapping_add(u32::MAX));
        assert_eq!(id.hash_value(), expected.wrapping_add(7));
    }

    #[test]
    fn from_slice_pads_and_truncates() {
        let short = FileId::from_slice(b"table1");
        assert_eq!(&short.as_bytes()[..6], b"table1");
        assert!(short.as_bytes()[6..].iter().all(|b| *b == 0));

        let long = FileId::from_slice(&[7u8; 40]);
        assert_eq!(long.as_bytes(), &[7u8; FILE_ID_LEN]);
    }

    #[test]
    fn page_ids_differ_by_file_or_number() {
        let a = PageId::new(FileId::from_slice(b"a"), 1);
        assert_eq!(a, PageId::new(FileId::from_slice(b"a"), 1));
        assert_ne!(a, PageId::new(FileId::from_slice(b"b"), 1));
        assert_ne!(a, PageId::new(FileId::from_slice(b"a"), 2));
    }
}
