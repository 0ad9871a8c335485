//! Disk I/O layer for MarrowDB.
//!
//! This crate provides:
//! - Synchronous page-granular file I/O through the disk manager
//! - A FIFO request channel with an end-of-stream sentinel
//! - A disk scheduler that serializes all I/O through one worker thread
//!   and completes per-request futures

mod channel;
mod manager;
mod scheduler;

pub use channel::Channel;
pub use manager::{DiskManager, DiskManagerConfig};
pub use scheduler::{io_pair, DiskRequest, DiskScheduler, IoFuture, IoPromise};
