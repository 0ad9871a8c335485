//! Disk-resident extendible hash index for MarrowDB.
//!
//! The index is a three-level structure living entirely in buffer-pool
//! pages:
//! - A header page routes the top bits of a key's hash to a directory page
//! - A directory page routes the low `global_depth` bits to a bucket page
//! - Bucket pages hold packed fixed-width key-value pairs
//!
//! Buckets split when full (growing the directory as needed) and merge with
//! their split image when empty, shrinking the directory back.

mod extendible;
mod page;
mod types;

pub use extendible::DiskExtendibleHashTable;
pub use page::{
    bucket_capacity, HashBucketPage, HashDirectoryPage, HashHeaderPage, DIRECTORY_ARRAY_SIZE,
    DIRECTORY_MAX_DEPTH, HEADER_ARRAY_SIZE, HEADER_MAX_DEPTH,
};
pub use types::{DefaultKeyHasher, FxHasher64, GenericKey, IdentityKeyHasher, KeyHash, Rid, Storable};
