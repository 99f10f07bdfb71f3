//! Latest-wins frame hand-off between the device and the worker

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use crate::capture::Frame;
use crate::utils;

/// Single in-flight slot. A newer frame always replaces an unconsumed one.
const SLOTS: usize = 1;

/// Outcome of [`FrameQueue::pop_blocking`].
#[derive(Debug)]
pub enum Popped {
    Frame(Frame),
    Timeout,
    Closed,
}

/// Bounded channel of capacity one with an overwrite policy.
///
/// `push` never waits on the consumer; `pop_blocking` parks only the caller
/// and for at most the given timeout.
pub struct FrameQueue {
    slot: Mutex<Slot>,
    ready: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct Slot {
    ring: HeapRb<Frame>,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                ring: HeapRb::new(SLOTS),
                closed: false,
            }),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        utils::lock(&self.slot)
    }

    /// Producer: hand over a frame. Returns `false` if the queue is closed, in
    /// which case the frame is released immediately.
    pub fn push(&self, frame: Frame) -> bool {
        let replaced = {
            let mut slot = self.lock();
            if slot.closed {
                return false;
            }
            slot.ring.push_overwrite(frame)
        };
        self.ready.notify_one();

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("chroma_frames_pushed_total").increment(1);
        if let Some(stale) = replaced {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("chroma_frames_dropped_total").increment(1);
            trace!(sequence = stale.meta.sequence, "dropped stale frame");
            // Released here, outside the lock.
            drop(stale);
        }
        true
    }

    /// Consumer: wait up to `timeout` for the newest frame.
    pub fn pop_blocking(&self, timeout: Duration) -> Popped {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Popped::Closed;
            }
            if let Some(frame) = slot.ring.try_pop() {
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                return Popped::Frame(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Popped::Timeout;
            }
            slot = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Close the queue, release any pending frame and wake every waiter.
    /// Returns the number of frames released.
    pub fn close(&self) -> usize {
        let pending = {
            let mut slot = self.lock();
            slot.closed = true;
            let mut pending = Vec::with_capacity(SLOTS);
            while let Some(frame) = slot.ring.try_pop() {
                pending.push(frame);
            }
            pending
        };
        self.ready.notify_all();
        pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
