//! Error types for MarrowDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using MarrowError.
pub type Result<T> = std::result::Result<T, MarrowError>;

/// Errors that can occur in MarrowDB storage operations.
#[derive(Debug, Error)]
pub enum MarrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk scheduler has shut down")]
    SchedulerShutdown,

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page not resident: {0}")]
    PageNotResident(PageId),

    // Index errors
    #[error("duplicate key")]
    DuplicateKey,

    #[error("directory at maximum depth, cannot split further")]
    DirectoryFull,

    #[error("bucket size {requested} exceeds page capacity {capacity}")]
    BucketTooLarge { requested: usize, capacity: usize },

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}
