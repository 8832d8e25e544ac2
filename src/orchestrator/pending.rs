//! In-flight request table for deduplication.
//!
//! At most one upstream call is ever in flight per key: the first caller
//! inserts a broadcast channel and enqueues the fetch; later callers
//! subscribe to the same channel and share its eventual resolution (fan-out,
//! not fan-in duplication).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::FetchResult;
use crate::domain::CacheKey;

/// Terminal outcome of one pending fetch, fanned out to every waiter.
#[derive(Debug, Clone)]
pub(super) enum Resolution {
    /// A result — live, cached, or explicitly stale.
    Data(FetchResult),
    /// The key has no history anywhere and the fetch could not produce one.
    NoData,
}

pub(super) struct PendingTable {
    inflight: DashMap<CacheKey, broadcast::Sender<Resolution>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Join the pending fetch for `key`, creating it if absent.
    ///
    /// Returns `(created, receiver)`: `created` is true for the caller that
    /// must actually dispatch the fetch. Subscription happens under the map
    /// entry lock, so a resolution can never slip between attach and recv.
    pub fn attach(&self, key: &CacheKey) -> (bool, broadcast::Receiver<Resolution>) {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => (false, entry.get().subscribe()),
            Entry::Vacant(slot) => {
                // Capacity 1: exactly one message is ever sent per channel.
                let (tx, rx) = broadcast::channel(1);
                slot.insert(tx);
                (true, rx)
            }
        }
    }

    /// Resolve the pending fetch for `key`, notifying every attached caller
    /// and removing the entry. Returns the number of notified waiters.
    pub fn resolve(&self, key: &CacheKey, resolution: Resolution) -> usize {
        match self.inflight.remove(key) {
            Some((_, tx)) => tx.send(resolution).unwrap_or(0),
            None => 0,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }
}
