//! Buffer pool management for MarrowDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - LRU-K eviction policy
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back through the disk scheduler
//! - RAII page guards enforcing unpin and latch release

mod frame;
mod guard;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
pub use page_table::PageTable;
pub use pool::{BufferPoolConfig, BufferPoolManager, BufferPoolStats};
pub use replacer::{LruKReplacer, Replacer};
