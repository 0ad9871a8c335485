//! Page table mapping page ids to frame ids.

use crate::frame::FrameId;
use marrow_common::page::PageId;
use std::collections::HashMap;

/// Page id to frame id mapping.
///
/// Maintained exclusively by the buffer pool while holding the pool latch,
/// so no interior locking is needed. The mapping is unique in both
/// directions for valid page ids.
#[derive(Debug, Default)]
pub struct PageTable {
    map: HashMap<PageId, FrameId>,
}

impl PageTable {
    /// Creates an empty page table sized for the given frame count.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Looks up a page ID and returns its frame ID if resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.get(&page_id).copied()
    }

    /// Inserts a page ID to frame ID mapping.
    #[inline]
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) {
        self.map.insert(page_id, frame_id);
    }

    /// Removes a page ID mapping. Returns the frame ID if it was present.
    #[inline]
    pub fn remove(&mut self, page_id: PageId) -> Option<FrameId> {
        self.map.remove(&page_id)
    }

    /// Returns true if the page ID is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all entries, calling the provided function for each.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId),
    {
        for (&page_id, &frame_id) in &self.map {
            f(page_id, frame_id);
        }
    }
}
