//! Disk-resident extendible hash table.

use crate::page::{
    bucket_capacity, HashBucketPage, HashDirectoryPage, HashHeaderPage, DIRECTORY_MAX_DEPTH,
    HEADER_MAX_DEPTH,
};
use crate::types::{DefaultKeyHasher, KeyHash, Storable};
use log::debug;
use marrow_buffer::{BufferPoolManager, WritePageGuard};
use marrow_common::page::PageId;
use marrow_common::{MarrowError, Result};
use std::marker::PhantomData;
use std::sync::Arc;

/// Disk-resident extendible hash table mapping fixed-width keys to
/// fixed-width values. Duplicate keys are refused.
///
/// A key's 32-bit hash is consumed from both ends: the top
/// `header_max_depth` bits pick the directory, the low `global_depth` bits
/// of that directory pick the bucket. Directory and bucket pages are
/// allocated lazily on first insert along each path.
///
/// Latching is top-down (header, then directory, then bucket). Lookups
/// release each parent as soon as the child is latched; mutations keep the
/// directory write-latched across splits and merges because a structural
/// change is in flight.
pub struct DiskExtendibleHashTable<K, V, H = DefaultKeyHasher> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<fn(K, V)>,
}

impl<K: Storable, V: Storable, H: KeyHash<K>> DiskExtendibleHashTable<K, V, H> {
    /// Creates a new index, allocating its header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        hasher: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        Self::validate_params(header_max_depth, directory_max_depth, bucket_max_size)?;

        let header_page_id = {
            let mut header_guard = bpm.new_page()?.upgrade_write();
            let page_id = header_guard.page_id();
            HashHeaderPage::new(header_guard.data_mut()).init(header_max_depth);
            page_id
        };

        Ok(Self {
            name: name.into(),
            bpm,
            hasher,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    /// Re-attaches to an existing index by its header page id, e.g. after
    /// the pool was rebuilt over the same data file.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        hasher: H,
        header_page_id: PageId,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        let header_max_depth = {
            let header_guard = bpm.fetch_page_read(header_page_id)?;
            HashHeaderPage::new(header_guard.data()).max_depth()
        };
        Self::validate_params(header_max_depth, directory_max_depth, bucket_max_size)?;

        Ok(Self {
            name: name.into(),
            bpm,
            hasher,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    fn validate_params(
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<()> {
        if header_max_depth > HEADER_MAX_DEPTH {
            return Err(MarrowError::InvalidParameter {
                name: "header_max_depth".to_string(),
                value: header_max_depth.to_string(),
            });
        }
        if directory_max_depth > DIRECTORY_MAX_DEPTH {
            return Err(MarrowError::InvalidParameter {
                name: "directory_max_depth".to_string(),
                value: directory_max_depth.to_string(),
            });
        }
        if bucket_max_size == 0 {
            return Err(MarrowError::InvalidParameter {
                name: "bucket_max_size".to_string(),
                value: "0".to_string(),
            });
        }
        let capacity = bucket_capacity::<K, V>();
        if bucket_max_size as usize > capacity {
            return Err(MarrowError::BucketTooLarge {
                requested: bucket_max_size as usize,
                capacity,
            });
        }
        Ok(())
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the header page id; pass it to [`open`](Self::open) to
    /// re-attach after a restart.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up a key, returning every stored value (at most one: the
    /// index refuses duplicates).
    pub fn get_value(&self, key: &K) -> Result<Vec<V>> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let directory_page_id = {
            let header = HashHeaderPage::new(header_guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        if !directory_page_id.is_valid() {
            return Ok(Vec::new());
        }
        drop(header_guard);

        let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let bucket_page_id = {
            let directory = HashDirectoryPage::new(directory_guard.data());
            directory.bucket_page_id(directory.hash_to_bucket_index(hash))
        };
        if !bucket_page_id.is_valid() {
            return Ok(Vec::new());
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
        drop(directory_guard);

        let bucket = HashBucketPage::<_, K, V>::new(bucket_guard.data());
        Ok(bucket.lookup(key).into_iter().collect())
    }

    /// Inserts a key-value pair.
    ///
    /// Returns false when the key is already present, or when the bucket
    /// overflows with its directory already at maximum depth.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        if !self.get_value(&key)?.is_empty() {
            return Ok(false);
        }
        let hash = self.hasher.hash_key(&key);

        // A split changes the routing, so retry from the top afterwards.
        // Each split raises a local depth, bounding the iterations by the
        // directory's maximum depth.
        loop {
            let header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
            let (directory_idx, directory_page_id) = {
                let header = HashHeaderPage::new(header_guard.data());
                let idx = header.hash_to_directory_index(hash);
                (idx, header.directory_page_id(idx))
            };
            if !directory_page_id.is_valid() {
                return self.insert_to_new_directory(header_guard, directory_idx, hash, key, value);
            }
            drop(header_guard);

            let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
            let (bucket_idx, bucket_page_id) = {
                let directory = HashDirectoryPage::new(directory_guard.data());
                let idx = directory.hash_to_bucket_index(hash);
                (idx, directory.bucket_page_id(idx))
            };
            if !bucket_page_id.is_valid() {
                return self.insert_to_new_bucket(&mut directory_guard, bucket_idx, key, value);
            }

            let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
            {
                let mut bucket = HashBucketPage::<_, K, V>::new(bucket_guard.data_mut());
                if bucket.insert(key, value) {
                    return Ok(true);
                }
                // A concurrent insert of the same key can land between the
                // unlatched pre-check and this point; that is a duplicate,
                // not an overflow.
                if bucket.lookup(&key).is_some() {
                    return Ok(false);
                }
            }

            // Overflow: grow the directory if this bucket already uses
            // every global bit, then split and retry.
            let (global_depth, local_depth, max_depth) = {
                let directory = HashDirectoryPage::new(directory_guard.data());
                (
                    directory.global_depth(),
                    directory.local_depth(bucket_idx),
                    directory.max_depth(),
                )
            };
            if local_depth == global_depth {
                if global_depth >= max_depth {
                    debug!(
                        "index {}: refusing insert, directory at max depth {}",
                        self.name, max_depth
                    );
                    return Ok(false);
                }
                HashDirectoryPage::new(directory_guard.data_mut()).incr_global_depth();
            }

            self.split_bucket(
                &mut directory_guard,
                &mut bucket_guard,
                bucket_idx,
                bucket_page_id,
            )?;
        }
    }

    /// Creates the directory for an empty header slot, then the bucket,
    /// then inserts. The header stays write-latched throughout.
    fn insert_to_new_directory(
        &self,
        mut header_guard: WritePageGuard<'_>,
        directory_idx: u32,
        hash: u32,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut directory_guard = self.bpm.new_page()?.upgrade_write();
        let directory_page_id = directory_guard.page_id();
        HashDirectoryPage::new(directory_guard.data_mut()).init(self.directory_max_depth);

        HashHeaderPage::new(header_guard.data_mut())
            .set_directory_page_id(directory_idx, directory_page_id);
        debug!(
            "index {}: new directory page {} for header slot {}",
            self.name, directory_page_id, directory_idx
        );

        let bucket_idx = {
            let directory = HashDirectoryPage::new(directory_guard.data());
            directory.hash_to_bucket_index(hash)
        };
        self.insert_to_new_bucket(&mut directory_guard, bucket_idx, key, value)
    }

    /// Creates a bucket for an empty directory slot and inserts into it.
    fn insert_to_new_bucket(
        &self,
        directory_guard: &mut WritePageGuard<'_>,
        bucket_idx: u32,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut bucket_guard = self.bpm.new_page()?.upgrade_write();
        let bucket_page_id = bucket_guard.page_id();

        let mut bucket = HashBucketPage::<_, K, V>::new(bucket_guard.data_mut());
        bucket.init(self.bucket_max_size);
        let inserted = bucket.insert(key, value);

        HashDirectoryPage::new(directory_guard.data_mut())
            .set_bucket_page_id(bucket_idx, bucket_page_id);
        debug!(
            "index {}: new bucket page {} for directory slot {}",
            self.name, bucket_page_id, bucket_idx
        );
        Ok(inserted)
    }

    /// Splits a full bucket into itself and a fresh split-image page,
    /// rewriting every directory alias and redistributing the entries.
    fn split_bucket(
        &self,
        directory_guard: &mut WritePageGuard<'_>,
        bucket_guard: &mut WritePageGuard<'_>,
        bucket_idx: u32,
        bucket_page_id: PageId,
    ) -> Result<()> {
        let mut split_guard = self.bpm.new_page()?.upgrade_write();
        let split_page_id = split_guard.page_id();
        HashBucketPage::<_, K, V>::new(split_guard.data_mut()).init(self.bucket_max_size);

        let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
        let new_local_depth = directory.local_depth(bucket_idx) + 1;
        debug_assert!(new_local_depth <= directory.global_depth());
        let split_bit = 1u32 << (new_local_depth - 1);

        // Every alias of the overflowing bucket gets the new local depth;
        // aliases on the split-bit side move to the new page.
        for i in 0..directory.size() {
            if directory.bucket_page_id(i) == bucket_page_id {
                if (i & split_bit) != (bucket_idx & split_bit) {
                    directory.set_bucket_page_id(i, split_page_id);
                }
                directory.set_local_depth(i, new_local_depth);
            }
        }
        debug!(
            "index {}: split bucket page {} into {} at local depth {}",
            self.name, bucket_page_id, split_page_id, new_local_depth
        );

        // Drain and redistribute by each entry's new routing.
        let entries: Vec<(K, V)> = {
            let bucket = HashBucketPage::<_, K, V>::new(bucket_guard.data());
            (0..bucket.size()).map(|i| bucket.entry_at(i)).collect()
        };
        HashBucketPage::<_, K, V>::new(bucket_guard.data_mut()).clear();

        for (key, value) in entries {
            let target_idx = directory.hash_to_bucket_index(self.hasher.hash_key(&key));
            let target_page_id = directory.bucket_page_id(target_idx);
            let reinserted = if target_page_id == bucket_page_id {
                HashBucketPage::<_, K, V>::new(bucket_guard.data_mut()).insert(key, value)
            } else {
                debug_assert_eq!(target_page_id, split_page_id);
                HashBucketPage::<_, K, V>::new(split_guard.data_mut()).insert(key, value)
            };
            debug_assert!(reinserted, "redistributed entry must fit");
        }
        Ok(())
    }

    /// Removes a key.
    ///
    /// Returns false if the key is absent. Emptied buckets merge with
    /// their split image while possible, and the directory shrinks while
    /// every local depth sits below the global depth.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let directory_page_id = {
            let header = HashHeaderPage::new(header_guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        if !directory_page_id.is_valid() {
            return Ok(false);
        }
        drop(header_guard);

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let (bucket_idx, bucket_page_id) = {
            let directory = HashDirectoryPage::new(directory_guard.data());
            let idx = directory.hash_to_bucket_index(hash);
            (idx, directory.bucket_page_id(idx))
        };
        if !bucket_page_id.is_valid() {
            return Ok(false);
        }

        let removed = {
            let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
            HashBucketPage::<_, K, V>::new(bucket_guard.data_mut()).remove(key)
        };
        if !removed {
            return Ok(false);
        }

        self.merge_after_remove(&mut directory_guard, bucket_idx, bucket_page_id)?;

        {
            let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
            while directory.can_shrink() {
                directory.decr_global_depth();
                debug!(
                    "index {}: directory shrank to global depth {}",
                    self.name,
                    directory.global_depth()
                );
            }
        }
        Ok(true)
    }

    /// Folds empty buckets into their split images while local depths
    /// allow. The caller holds the directory write latch.
    fn merge_after_remove(
        &self,
        directory_guard: &mut WritePageGuard<'_>,
        bucket_idx: u32,
        bucket_page_id: PageId,
    ) -> Result<()> {
        let mut check_page_id = bucket_page_id;
        loop {
            let (local_depth, sibling_idx, sibling_local_depth, sibling_page_id) = {
                let directory = HashDirectoryPage::new(directory_guard.data());
                let local_depth = directory.local_depth(bucket_idx);
                if local_depth == 0 {
                    return Ok(());
                }
                let sibling_idx = directory.split_image_index(bucket_idx);
                (
                    local_depth,
                    sibling_idx,
                    directory.local_depth(sibling_idx),
                    directory.bucket_page_id(sibling_idx),
                )
            };
            // A sibling at a different depth covers a different hash range;
            // merging would corrupt the routing.
            if sibling_local_depth != local_depth {
                return Ok(());
            }

            let check_empty = {
                let guard = self.bpm.fetch_page_read(check_page_id)?;
                HashBucketPage::<_, K, V>::new(guard.data()).is_empty()
            };
            let sibling_empty = {
                let guard = self.bpm.fetch_page_read(sibling_page_id)?;
                HashBucketPage::<_, K, V>::new(guard.data()).is_empty()
            };
            if !check_empty && !sibling_empty {
                return Ok(());
            }

            // Delete whichever bucket is empty; the other survives. Guards
            // were dropped above, so the pages are unpinned and deletable.
            let survivor_page_id = if check_empty {
                self.bpm.delete_page(check_page_id);
                sibling_page_id
            } else {
                self.bpm.delete_page(sibling_page_id);
                check_page_id
            };

            let new_local_depth = local_depth - 1;
            {
                let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
                let mask = (1u32 << new_local_depth) - 1;
                for i in 0..directory.size() {
                    if (i & mask) == (bucket_idx & mask) {
                        directory.set_bucket_page_id(i, survivor_page_id);
                        directory.set_local_depth(i, new_local_depth);
                    }
                }
            }
            debug!(
                "index {}: merged slots {} and {} into page {} at local depth {}",
                self.name, bucket_idx, sibling_idx, survivor_page_id, new_local_depth
            );
            check_page_id = survivor_page_id;
        }
    }

    /// Walks every directory and bucket, asserting the structural
    /// invariants. Intended for tests; panics on violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let directory_page_ids = {
            let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
            let header = HashHeaderPage::new(header_guard.data());
            (0..header.max_size())
                .map(|i| header.directory_page_id(i))
                .filter(|id| id.is_valid())
                .collect::<Vec<_>>()
        };

        for directory_page_id in directory_page_ids {
            let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
            let directory = HashDirectoryPage::new(directory_guard.data());
            directory.verify_integrity();

            let buckets: Vec<(PageId, u32, u32)> = (0..directory.size())
                .filter(|&i| directory.bucket_page_id(i).is_valid())
                .map(|i| {
                    (
                        directory.bucket_page_id(i),
                        i,
                        directory.local_depth_mask(i),
                    )
                })
                .collect();
            drop(directory_guard);

            for (bucket_page_id, slot, mask) in buckets {
                let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
                let bucket = HashBucketPage::<_, K, V>::new(bucket_guard.data());
                for i in 0..bucket.size() {
                    let (key, _) = bucket.entry_at(i);
                    assert_eq!(
                        self.hasher.hash_key(&key) & mask,
                        slot & mask,
                        "key {:?} stored outside its bucket's hash range",
                        key
                    );
                }
            }
        }
        Ok(())
    }
}
