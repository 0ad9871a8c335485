//! Page identifiers for MarrowDB storage.

use serde::{Deserialize, Serialize};

/// Size of a page in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Logical identifier of a page on disk.
///
/// Page ids are allocated monotonically by the buffer pool and never reused
/// within a process. The sentinel [`PageId::INVALID`] marks unoccupied frames
/// and empty directory slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(-1);

    /// Returns true if this id refers to an actual page.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page within the data file.
    ///
    /// Only meaningful for valid page ids.
    #[inline]
    pub fn offset(&self) -> u64 {
        debug_assert!(self.is_valid());
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
