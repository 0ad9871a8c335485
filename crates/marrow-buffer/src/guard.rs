//! RAII page guards.
//!
//! A guard holds one pin on a fetched page and, for the latched variants,
//! the page's read-write latch. Dropping a guard releases the latch first
//! and then unpins, carrying the guard's dirty flag back to the pool. Guards
//! are move-only and are the sole success-path mechanism for pin release.

use crate::frame::BufferFrame;
use crate::pool::BufferPoolManager;
use marrow_common::page::{PageId, PAGE_SIZE};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

/// Pin-only guard around a fetched page.
///
/// Data access latches the page transiently per call. Upgrade to a
/// [`ReadPageGuard`] or [`WritePageGuard`] to hold the latch across
/// accesses.
pub struct BasicPageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame: &'a BufferFrame,
        page_id: PageId,
    ) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: false,
        }
    }

    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read-latches the page for the duration of the returned borrow.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Write-latches the page for the duration of the returned borrow and
    /// marks the guard dirty.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty = true;
        self.frame.write_data()
    }

    /// Marks the page dirty without touching its contents.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Disassembles the guard without running its destructor. The pin is
    /// transferred to the caller.
    fn into_parts(self) -> (&'a BufferPoolManager, &'a BufferFrame, PageId, bool) {
        let parts = (self.pool, self.frame, self.page_id, self.dirty);
        std::mem::forget(self);
        parts
    }

    /// Acquires the read latch, converting this guard into a
    /// [`ReadPageGuard`]. The pin is carried over.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let (pool, frame, page_id, dirty) = self.into_parts();
        let latch = frame.read_data();
        ReadPageGuard {
            pool,
            page_id,
            dirty,
            latch: Some(latch),
        }
    }

    /// Acquires the write latch, converting this guard into a
    /// [`WritePageGuard`]. The pin is carried over.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let (pool, frame, page_id, dirty) = self.into_parts();
        let latch = frame.write_data();
        WritePageGuard {
            pool,
            page_id,
            dirty,
            latch: Some(latch),
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

/// Guard holding a pin and the page's read latch.
pub struct ReadPageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    dirty: bool,
    latch: Option<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard<'_> {
    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page contents.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        match &self.latch {
            Some(latch) => latch,
            // The latch is only taken in drop.
            None => unreachable!("read latch released before drop"),
        }
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch release precedes unpin; unpin takes the pool latch and must
        // not be called while holding a page latch.
        self.latch.take();
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

/// Guard holding a pin and the page's write latch.
pub struct WritePageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    dirty: bool,
    latch: Option<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard<'_> {
    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page contents.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        match &self.latch {
            Some(latch) => latch,
            None => unreachable!("write latch released before drop"),
        }
    }

    /// Returns the page contents mutably and marks the guard dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.dirty = true;
        match &mut self.latch {
            Some(latch) => latch,
            None => unreachable!("write latch released before drop"),
        }
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}
