//! Disk scheduler serializing page I/O through one worker thread.

use crate::channel::Channel;
use crate::manager::DiskManager;
use log::trace;
use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::{MarrowError, Result};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Sending half of a single-shot I/O completion.
///
/// Created by [`io_pair`], moved into a [`DiskRequest`], and consumed exactly
/// once by the scheduler's worker.
pub struct IoPromise<T> {
    tx: mpsc::Sender<Result<T>>,
}

impl<T> IoPromise<T> {
    /// Resolves the paired future. The result is dropped if the waiter is
    /// gone.
    pub fn complete(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

/// Receiving half of a single-shot I/O completion.
pub struct IoFuture<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> IoFuture<T> {
    /// Blocks until the paired promise resolves.
    ///
    /// I/O errors from the disk layer surface here. A disconnected promise
    /// (scheduler torn down before servicing the request) reports
    /// [`MarrowError::SchedulerShutdown`].
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(MarrowError::SchedulerShutdown),
        }
    }
}

/// Creates a connected promise/future pair.
pub fn io_pair<T>() -> (IoPromise<T>, IoFuture<T>) {
    let (tx, rx) = mpsc::channel();
    (IoPromise { tx }, IoFuture { rx })
}

/// A request to perform disk I/O on one page.
pub enum DiskRequest {
    /// Read the page into a fresh buffer, delivered through the completion.
    Read {
        page_id: PageId,
        completion: IoPromise<Box<[u8; PAGE_SIZE]>>,
    },
    /// Write the buffer to the page.
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        completion: IoPromise<()>,
    },
}

impl DiskRequest {
    /// The page this request targets.
    pub fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } => *page_id,
            DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// Schedules disk I/O requests onto a single background worker.
///
/// `schedule` enqueues and returns immediately; the caller awaits the
/// request's [`IoFuture`]. Requests are serviced in FIFO order across all
/// callers, so a write scheduled before a read of the same page completes
/// before that read. Dropping the scheduler enqueues an end-of-stream
/// sentinel and joins the worker; no requests may be scheduled afterwards.
pub struct DiskScheduler {
    queue: Arc<Channel<Option<DiskRequest>>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler and spawns its worker thread.
    pub fn new(disk: Arc<DiskManager>) -> Self {
        let queue = Arc::new(Channel::new());
        let worker_queue = Arc::clone(&queue);

        let worker = std::thread::spawn(move || {
            Self::worker_loop(worker_queue, disk);
        });

        Self {
            queue,
            worker: Some(worker),
        }
    }

    fn worker_loop(queue: Arc<Channel<Option<DiskRequest>>>, disk: Arc<DiskManager>) {
        trace!("disk worker started");
        loop {
            let request = match queue.take() {
                Some(request) => request,
                None => break,
            };
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    trace!("disk worker: read page {}", page_id);
                    completion.complete(disk.read_page(page_id));
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    trace!("disk worker: write page {}", page_id);
                    completion.complete(disk.write_page(page_id, &data));
                }
            }
        }
        trace!("disk worker exiting");
    }

    /// Enqueues a request. Returns immediately; completion is signalled
    /// through the request's promise.
    pub fn schedule(&self, request: DiskRequest) {
        self.queue.put(Some(request));
    }

    /// Schedules a page read and returns the future for its buffer.
    pub fn schedule_read(&self, page_id: PageId) -> IoFuture<Box<[u8; PAGE_SIZE]>> {
        let (completion, future) = io_pair();
        self.schedule(DiskRequest::Read {
            page_id,
            completion,
        });
        future
    }

    /// Schedules a page write and returns the future for its completion.
    pub fn schedule_write(&self, page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> IoFuture<()> {
        let (completion, future) = io_pair();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            completion,
        });
        future
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.queue.put(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
