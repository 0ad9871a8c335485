//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable or pinned.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Combined operation: records access and pins the frame (sets
    /// non-evictable). Single lock acquisition instead of two separate calls.
    fn access_and_pin(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction and forgets its history.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame's history explicitly.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Per-frame bookkeeping.
struct LruKEntry {
    /// Number of recorded accesses.
    hit_count: usize,
    /// Whether the frame may be chosen as a victim.
    is_evictable: bool,
}

struct LruKInner {
    entries: HashMap<FrameId, LruKEntry>,
    /// Frames with fewer than k accesses. Front = most recently entered;
    /// eviction scans from the back (FIFO).
    history: VecDeque<FrameId>,
    /// Frames with at least k accesses. Front = most recently accessed;
    /// eviction scans from the back (LRU).
    cached: VecDeque<FrameId>,
    /// Number of evictable frames.
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// A frame sits in the history list until it accumulates k accesses, evicted
/// FIFO by entry order (the "+infinity backward distance" rule). Once it
/// reaches k accesses it moves to the cached list, evicted by least-recent
/// access. History frames are always preferred as victims over cached ones.
pub struct LruKReplacer {
    num_frames: usize,
    k: usize,
    inner: Mutex<LruKInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking `num_frames` frames with parameter `k`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                entries: HashMap::with_capacity(num_frames),
                history: VecDeque::new(),
                cached: VecDeque::new(),
                curr_size: 0,
            }),
        }
    }

    /// Returns the k parameter.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            (frame_id.0 as usize) < self.num_frames,
            "frame id {} out of range for replacer of size {}",
            frame_id,
            self.num_frames
        );
    }

    fn detach(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
        if let Some(pos) = list.iter().position(|&f| f == frame_id) {
            list.remove(pos);
        }
    }

    fn record_access_locked(&self, inner: &mut LruKInner, frame_id: FrameId) {
        let entry = inner.entries.entry(frame_id).or_insert(LruKEntry {
            hit_count: 0,
            is_evictable: false,
        });
        entry.hit_count += 1;
        let count = entry.hit_count;

        if count == 1 {
            if self.k == 1 {
                inner.cached.push_front(frame_id);
            } else {
                inner.history.push_front(frame_id);
            }
        } else if count == self.k {
            Self::detach(&mut inner.history, frame_id);
            inner.cached.push_front(frame_id);
        } else if count > self.k {
            Self::detach(&mut inner.cached, frame_id);
            inner.cached.push_front(frame_id);
        }
        // Accesses strictly between 1 and k leave the history position
        // unchanged (FIFO within under-k frames).
    }

    fn set_evictable_locked(&self, inner: &mut LruKInner, frame_id: FrameId, evictable: bool) {
        let Some(entry) = inner.entries.get_mut(&frame_id) else {
            return;
        };
        if !entry.is_evictable && evictable {
            inner.curr_size += 1;
        } else if entry.is_evictable && !evictable {
            inner.curr_size -= 1;
        }
        entry.is_evictable = evictable;
    }
}

impl Replacer for LruKReplacer {
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range for this replacer.
    fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
    }

    /// # Panics
    ///
    /// Panics if `frame_id` is out of range for this replacer.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        self.set_evictable_locked(&mut inner, frame_id, evictable);
    }

    fn access_and_pin(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
        self.set_evictable_locked(&mut inner, frame_id, false);
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // Oldest-entered evictable frame in the history list wins.
        let mut victim = inner
            .history
            .iter()
            .rev()
            .copied()
            .find(|f| inner.entries[f].is_evictable);

        if victim.is_none() {
            // Fall back to the least-recently-used cached frame.
            victim = inner
                .cached
                .iter()
                .rev()
                .copied()
                .find(|f| inner.entries[f].is_evictable);
        }

        let frame_id = victim?;
        Self::detach(&mut inner.history, frame_id);
        Self::detach(&mut inner.cached, frame_id);
        inner.entries.remove(&frame_id);
        inner.curr_size -= 1;
        Some(frame_id)
    }

    /// # Panics
    ///
    /// Panics if `frame_id` is out of range, or if the frame is tracked but
    /// not evictable. Unknown frames are a no-op.
    fn remove(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get(&frame_id) else {
            return;
        };
        assert!(
            entry.is_evictable,
            "cannot remove pinned {} from replacer",
            frame_id
        );

        if entry.hit_count < self.k {
            Self::detach(&mut inner.history, frame_id);
        } else {
            Self::detach(&mut inner.cached, frame_id);
        }
        inner.entries.remove(&frame_id);
        inner.curr_size -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
