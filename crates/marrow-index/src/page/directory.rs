//! Directory page: routes the low `global_depth` bits of a hash to a bucket.

use super::{read_page_id, read_u32, write_page_id, write_u32};
use marrow_common::page::PageId;

/// Maximum directory depth.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;

/// Number of bucket slots in a directory page. The directory grows in powers
/// of two up to this bound; local depths are stored as one byte per slot.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

const OFFSET_MAX_DEPTH: usize = 0;
const OFFSET_GLOBAL_DEPTH: usize = 4;
const OFFSET_LOCAL_DEPTHS: usize = 8;
const OFFSET_BUCKET_IDS: usize = OFFSET_LOCAL_DEPTHS + DIRECTORY_ARRAY_SIZE;

/// Typed view over a directory page's bytes.
///
/// Layout: `max_depth` u32, `global_depth` u32, `local_depths` u8 array,
/// `bucket_page_ids` i32 array. Entries at index `>= 1 << global_depth` are
/// stale and never consulted.
pub struct HashDirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashDirectoryPage<B> {
    /// Wraps page bytes in a directory view.
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Returns the maximum depth this directory may grow to.
    pub fn max_depth(&self) -> u32 {
        read_u32(self.data.as_ref(), OFFSET_MAX_DEPTH)
    }

    /// Returns the number of hash bits currently indexing the directory.
    pub fn global_depth(&self) -> u32 {
        read_u32(self.data.as_ref(), OFFSET_GLOBAL_DEPTH)
    }

    /// Returns the number of live directory entries.
    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    /// Routes a hash to a bucket slot using its low `global_depth` bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> u32 {
        hash & (self.size() - 1)
    }

    /// Returns the bucket page id in the given slot.
    pub fn bucket_page_id(&self, bucket_idx: u32) -> PageId {
        debug_assert!((bucket_idx as usize) < DIRECTORY_ARRAY_SIZE);
        read_page_id(
            self.data.as_ref(),
            OFFSET_BUCKET_IDS + bucket_idx as usize * 4,
        )
    }

    /// Returns the number of hash bits the bucket in the given slot
    /// discriminates on.
    pub fn local_depth(&self, bucket_idx: u32) -> u32 {
        debug_assert!((bucket_idx as usize) < DIRECTORY_ARRAY_SIZE);
        self.data.as_ref()[OFFSET_LOCAL_DEPTHS + bucket_idx as usize] as u32
    }

    /// Mask selecting the hash bits the bucket in the given slot
    /// discriminates on.
    pub fn local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1 << self.local_depth(bucket_idx)) - 1
    }

    /// The slot whose index differs from `bucket_idx` in exactly bit
    /// `local_depth - 1`.
    ///
    /// Meaningless at local depth zero; callers must guard first.
    pub fn split_image_index(&self, bucket_idx: u32) -> u32 {
        let local_depth = self.local_depth(bucket_idx);
        debug_assert!(local_depth > 0, "no split image at local depth 0");
        bucket_idx ^ (1 << (local_depth - 1))
    }

    /// True when every live entry's local depth is strictly below the
    /// global depth, so the upper directory half is redundant.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth() == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth())
    }

    /// Asserts the directory invariants.
    ///
    /// Intended for tests: panics on violation.
    pub fn verify_integrity(&self) {
        let global_depth = self.global_depth();
        assert!(global_depth <= self.max_depth());

        let size = self.size();
        for i in 0..size {
            assert!(
                self.local_depth(i) <= global_depth,
                "local depth of slot {} above global depth",
                i
            );
        }
        // Two entries share a bucket iff they agree on the bucket's local
        // depth bits and carry equal local depths.
        for i in 0..size {
            if !self.bucket_page_id(i).is_valid() {
                continue;
            }
            for j in 0..size {
                let same_page = self.bucket_page_id(i) == self.bucket_page_id(j);
                let congruent = (i & self.local_depth_mask(i)) == (j & self.local_depth_mask(i))
                    && self.local_depth(i) == self.local_depth(j);
                assert_eq!(
                    same_page, congruent,
                    "slots {} and {} break the aliasing invariant",
                    i, j
                );
            }
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashDirectoryPage<B> {
    /// Initializes a fresh directory: depth zero, every slot unallocated.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= DIRECTORY_MAX_DEPTH,
            "directory depth {} exceeds maximum {}",
            max_depth,
            DIRECTORY_MAX_DEPTH
        );
        let buf = self.data.as_mut();
        write_u32(buf, OFFSET_MAX_DEPTH, max_depth);
        write_u32(buf, OFFSET_GLOBAL_DEPTH, 0);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            buf[OFFSET_LOCAL_DEPTHS + i] = 0;
            write_page_id(buf, OFFSET_BUCKET_IDS + i * 4, PageId::INVALID);
        }
    }

    /// Sets the bucket page id in the given slot.
    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, page_id: PageId) {
        debug_assert!((bucket_idx as usize) < DIRECTORY_ARRAY_SIZE);
        write_page_id(
            self.data.as_mut(),
            OFFSET_BUCKET_IDS + bucket_idx as usize * 4,
            page_id,
        );
    }

    /// Sets the local depth of the given slot.
    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u32) {
        debug_assert!((bucket_idx as usize) < DIRECTORY_ARRAY_SIZE);
        debug_assert!(local_depth <= DIRECTORY_MAX_DEPTH);
        self.data.as_mut()[OFFSET_LOCAL_DEPTHS + bucket_idx as usize] = local_depth as u8;
    }

    /// Increments the local depth of the given slot.
    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        let depth = self.local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth + 1);
    }

    /// Decrements the local depth of the given slot.
    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        let depth = self.local_depth(bucket_idx);
        debug_assert!(depth > 0);
        self.set_local_depth(bucket_idx, depth - 1);
    }

    /// Doubles the directory, cloning the lower half's page ids and local
    /// depths into the new upper half.
    ///
    /// # Panics
    ///
    /// Panics when already at `max_depth`.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(
            global_depth < self.max_depth(),
            "directory already at maximum depth {}",
            self.max_depth()
        );

        let old_size = 1u32 << global_depth;
        for i in 0..old_size {
            let page_id = self.bucket_page_id(i);
            let local_depth = self.local_depth(i);
            self.set_bucket_page_id(old_size + i, page_id);
            self.set_local_depth(old_size + i, local_depth);
        }
        write_u32(self.data.as_mut(), OFFSET_GLOBAL_DEPTH, global_depth + 1);
    }

    /// Halves the directory. The dropped upper half becomes stale.
    ///
    /// # Panics
    ///
    /// Panics at global depth zero.
    pub fn decr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(global_depth > 0, "cannot shrink an empty directory");
        write_u32(self.data.as_mut(), OFFSET_GLOBAL_DEPTH, global_depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marrow_common::page::PAGE_SIZE;

    fn fresh_directory(buf: &mut [u8], max_depth: u32) -> HashDirectoryPage<&mut [u8]> {
        let mut directory = HashDirectoryPage::new(buf);
        directory.init(max_depth);
        directory
    }

    #[test]
    fn test_directory_layout_fits_page() {
        assert!(OFFSET_BUCKET_IDS + DIRECTORY_ARRAY_SIZE * 4 <= PAGE_SIZE);
    }

    #[test]
    fn test_directory_init() {
        let mut buf = [0u8; PAGE_SIZE];
        let directory = fresh_directory(&mut buf, 4);

        assert_eq!(directory.max_depth(), 4);
        assert_eq!(directory.global_depth(), 0);
        assert_eq!(directory.size(), 1);
        assert_eq!(directory.bucket_page_id(0), PageId::INVALID);
        assert_eq!(directory.local_depth(0), 0);
    }

    #[test]
    fn test_directory_hash_routing_uses_low_bits() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        // Depth zero: everything routes to slot 0.
        assert_eq!(directory.hash_to_bucket_index(0xFFFF_FFFF), 0);

        directory.incr_global_depth();
        directory.incr_global_depth();
        assert_eq!(directory.size(), 4);
        assert_eq!(directory.hash_to_bucket_index(0b1011), 0b11);
        assert_eq!(directory.hash_to_bucket_index(0b1000), 0b00);
    }

    #[test]
    fn test_directory_grow_clones_lower_half() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        directory.set_bucket_page_id(0, PageId(10));
        directory.set_local_depth(0, 0);

        directory.incr_global_depth();
        assert_eq!(directory.global_depth(), 1);
        assert_eq!(directory.bucket_page_id(1), PageId(10));
        assert_eq!(directory.local_depth(1), 0);

        directory.set_local_depth(0, 1);
        directory.set_local_depth(1, 1);
        directory.set_bucket_page_id(1, PageId(20));
        directory.incr_global_depth();

        assert_eq!(directory.bucket_page_id(2), PageId(10));
        assert_eq!(directory.bucket_page_id(3), PageId(20));
        assert_eq!(directory.local_depth(2), 1);
        assert_eq!(directory.local_depth(3), 1);
    }

    #[test]
    #[should_panic(expected = "maximum depth")]
    fn test_directory_grow_beyond_max_panics() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 1);
        directory.incr_global_depth();
        directory.incr_global_depth();
    }

    #[test]
    fn test_directory_split_image_index() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        directory.set_local_depth(0b010, 2);
        assert_eq!(directory.split_image_index(0b010), 0b000);

        directory.set_local_depth(0b011, 3);
        assert_eq!(directory.split_image_index(0b011), 0b111);
    }

    #[test]
    fn test_directory_local_depth_mask() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        assert_eq!(directory.local_depth_mask(0), 0);
        directory.set_local_depth(0, 3);
        assert_eq!(directory.local_depth_mask(0), 0b111);
    }

    #[test]
    fn test_directory_can_shrink() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        // Depth zero never shrinks.
        assert!(!directory.can_shrink());

        directory.incr_global_depth();
        // Both entries at local depth 0 < global depth 1.
        assert!(directory.can_shrink());

        directory.set_local_depth(1, 1);
        assert!(!directory.can_shrink());

        directory.set_local_depth(1, 0);
        directory.decr_global_depth();
        assert_eq!(directory.global_depth(), 0);
    }

    #[test]
    fn test_directory_integrity_check() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        // Two buckets at depth one.
        directory.incr_global_depth();
        directory.set_bucket_page_id(0, PageId(10));
        directory.set_bucket_page_id(1, PageId(11));
        directory.set_local_depth(0, 1);
        directory.set_local_depth(1, 1);
        directory.verify_integrity();

        // One shared bucket at depth zero across both entries.
        directory.set_bucket_page_id(1, PageId(10));
        directory.set_local_depth(0, 0);
        directory.set_local_depth(1, 0);
        directory.verify_integrity();
    }

    #[test]
    #[should_panic(expected = "aliasing invariant")]
    fn test_directory_integrity_detects_violation() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut directory = fresh_directory(&mut buf, 4);

        directory.incr_global_depth();
        // Same page claimed at local depth 1 by both entries: indices differ
        // in the discriminating bit, which is a violation.
        directory.set_bucket_page_id(0, PageId(10));
        directory.set_bucket_page_id(1, PageId(10));
        directory.set_local_depth(0, 1);
        directory.set_local_depth(1, 1);
        directory.verify_integrity();
    }
}
