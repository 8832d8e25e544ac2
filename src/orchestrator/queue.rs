//! Shared priority queue feeding the worker pool.
//!
//! Three FIFO lanes drained highest-priority-first. A semaphore carries one
//! permit per queued job, so `pop` suspends without spinning and closing the
//! semaphore drains the pool on shutdown.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::domain::{CacheKey, Priority};

/// One logical "please fetch this key" intent, queued for a worker.
#[derive(Debug)]
pub(super) struct QueuedFetch {
    pub key: CacheKey,
    pub params: BTreeMap<String, String>,
    pub priority: Priority,
    /// Upstream attempts made so far; the worker increments per try.
    pub attempt: u32,
    pub enqueued_at: Instant,
}

impl QueuedFetch {
    pub fn new(key: CacheKey, params: BTreeMap<String, String>, priority: Priority) -> Self {
        Self {
            key,
            params,
            priority,
            attempt: 0,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<QueuedFetch>,
    normal: VecDeque<QueuedFetch>,
    low: VecDeque<QueuedFetch>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedFetch> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop_highest(&mut self) -> Option<QueuedFetch> {
        for priority in Priority::DESCENDING {
            if let Some(job) = self.lane_mut(priority).pop_front() {
                return Some(job);
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

pub(super) struct PriorityQueue {
    lanes: Mutex<Lanes>,
    permits: Semaphore,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            permits: Semaphore::new(0),
        }
    }

    /// Enqueue a job. Returns false when the queue is closed (shutdown).
    pub fn push(&self, job: QueuedFetch) -> bool {
        // The closed check and the insert share the lanes lock: `drain`
        // takes the same lock, so a push that passed the check lands its
        // job before a post-close drain empties the lanes, never after.
        let mut lanes = self.lanes.lock();
        if self.permits.is_closed() {
            return false;
        }
        lanes.lane_mut(job.priority).push_back(job);
        self.permits.add_permits(1);
        true
    }

    /// Wait for the next job, highest priority first, FIFO within a level.
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<QueuedFetch> {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.lanes.lock().pop_highest()
            }
            Err(_closed) => None,
        }
    }

    /// Stop accepting jobs and wake every idle worker.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Remove all still-queued jobs (for shutdown resolution).
    pub fn drain(&self) -> Vec<QueuedFetch> {
        let mut lanes = self.lanes.lock();
        let mut drained = Vec::with_capacity(lanes.len());
        while let Some(job) = lanes.pop_highest() {
            drained.push(job);
        }
        drained
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }
}
