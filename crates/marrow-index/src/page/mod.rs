//! On-page layouts for the extendible hash index.

mod bucket;
mod directory;
mod header;

pub use bucket::{bucket_capacity, HashBucketPage};
pub use directory::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, DIRECTORY_MAX_DEPTH};
pub use header::{HashHeaderPage, HEADER_ARRAY_SIZE, HEADER_MAX_DEPTH};

use marrow_common::page::PageId;

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_page_id(buf: &[u8], offset: usize) -> PageId {
    PageId(i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

#[inline]
pub(crate) fn write_page_id(buf: &mut [u8], offset: usize, page_id: PageId) {
    buf[offset..offset + 4].copy_from_slice(&page_id.0.to_le_bytes());
}
