//! FIFO request channel for the disk scheduler.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Unbounded blocking FIFO channel.
///
/// `put` never blocks; `take` blocks until an item is available. Items come
/// out in the order they went in, across all producers. The disk scheduler
/// sends `Option<DiskRequest>` through this channel and uses `None` as the
/// end-of-stream sentinel for its worker.
pub struct Channel<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Channel<T> {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueues an item and wakes one waiting consumer.
    pub fn put(&self, item: T) {
        let mut queue = self.queue.lock();
        queue.push_back(item);
        self.available.notify_one();
    }

    /// Dequeues the oldest item, blocking until one is available.
    pub fn take(&self) -> T {
        let mut queue = self.queue.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }
            self.available.wait(&mut queue);
        }
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_channel_put_take() {
        let channel = Channel::new();
        channel.put(1);
        channel.put(2);
        channel.put(3);

        assert_eq!(channel.len(), 3);
        assert_eq!(channel.take(), 1);
        assert_eq!(channel.take(), 2);
        assert_eq!(channel.take(), 3);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_channel_blocking_take() {
        let channel = Arc::new(Channel::new());
        let producer = Arc::clone(&channel);

        let handle = thread::spawn(move || {
            // Give the consumer a chance to block first.
            thread::sleep(std::time::Duration::from_millis(20));
            producer.put(42);
        });

        assert_eq!(channel.take(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_channel_fifo_across_producers() {
        let channel = Arc::new(Channel::new());
        let mut handles = Vec::new();

        for i in 0..4 {
            let producer = Arc::clone(&channel);
            handles.push(thread::spawn(move || {
                for j in 0..25 {
                    producer.put(i * 25 + j);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<i32> = (0..100).map(|_| channel.take()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_channel_sentinel() {
        let channel: Channel<Option<u32>> = Channel::new();
        channel.put(Some(1));
        channel.put(None);

        assert_eq!(channel.take(), Some(1));
        assert_eq!(channel.take(), None);
    }
}
