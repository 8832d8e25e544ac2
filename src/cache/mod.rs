//! Three-tier adaptive cache: memory, snapshot files, historical record.
//!
//! `get` walks the tiers fastest-first and promotes hits into the faster
//! tiers; `put` writes memory and file synchronously and appends to the
//! history record fire-and-forget. The store never answers "not found" for a
//! key it has ever seen — stale entries are still entries.

mod history;
mod memory;
mod snapshot;

pub use history::HistoryTier;
pub use memory::MemoryTier;
pub use snapshot::SnapshotTier;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{CacheEntry, CacheKey, Tier, TtlPolicy};
use crate::error::Result;

/// Tiered cache store.
///
/// Shared behind an `Arc` by the orchestrator and its workers.
pub struct CacheStore {
    memory: MemoryTier,
    snapshots: SnapshotTier,
    history: HistoryTier,
    ttl: TtlPolicy,
}

impl CacheStore {
    #[must_use]
    pub fn new(snapshots: SnapshotTier, history: HistoryTier, ttl: TtlPolicy) -> Self {
        Self {
            memory: MemoryTier::new(),
            snapshots,
            history,
            ttl,
        }
    }

    /// Most recent known entry for `key`, trying memory, then snapshot
    /// files, then the historical record.
    ///
    /// A hit in a slower tier is promoted into the faster tiers so the next
    /// read is cheap. A corrupt stored entry is logged and treated as
    /// absent. Returns `None` only for keys with zero history.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key) {
            return Some(entry.served_from(Tier::Memory));
        }

        match self.snapshots.read(key) {
            Ok(Some(entry)) => {
                self.memory.insert(entry.served_from(Tier::Memory));
                return Some(entry);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "snapshot tier unreadable, falling through");
            }
        }

        let history = self.history.clone();
        let lookup_key = key.clone();
        let fallback_ttl = self.ttl.default_ttl();
        let from_history = tokio::task::spawn_blocking(move || {
            history.latest(&lookup_key, fallback_ttl)
        })
        .await;

        match from_history {
            Ok(Ok(Some(entry))) => {
                // Promote into both faster tiers.
                self.memory.insert(entry.served_from(Tier::Memory));
                if let Err(e) = self.snapshots.write(&entry) {
                    warn!(key = %key, error = %e, "failed to promote history entry to snapshot tier");
                }
                Some(entry)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "history tier unreadable");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "history lookup task failed");
                None
            }
        }
    }

    /// Store a freshly fetched payload.
    ///
    /// The TTL comes from the event-proximity policy. Memory and file writes
    /// are synchronous; the history append is spawned fire-and-forget — a
    /// failed append is logged and never fails the caller's request.
    ///
    /// # Errors
    /// Returns an error if the snapshot file cannot be written.
    pub fn put(
        &self,
        key: &CacheKey,
        payload: Vec<u8>,
        event_time: Option<DateTime<Utc>>,
    ) -> Result<CacheEntry> {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at: now,
            ttl: self.ttl.ttl_for(event_time, now),
            tier: Tier::Live,
            event_time,
        };

        self.memory.insert(entry.served_from(Tier::Memory));
        self.snapshots.write(&entry)?;

        let history = self.history.clone();
        let record = entry.clone();
        tokio::spawn(async move {
            let key = record.key.clone();
            let appended = tokio::task::spawn_blocking(move || history.append(&record)).await;
            match appended {
                Ok(Ok(())) => debug!(key = %key, "history appended"),
                Ok(Err(e)) => warn!(key = %key, error = %e, "history append failed"),
                Err(e) => warn!(key = %key, error = %e, "history append task failed"),
            }
        });

        Ok(entry)
    }

    /// Whether `entry`'s freshness window has expired.
    #[must_use]
    pub fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.is_stale()
    }

    /// The TTL policy in force (for observability and tests).
    #[must_use]
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::TimeDelta;
    use tempfile::TempDir;

    use super::*;
    use crate::db::{create_pool, run_migrations};

    struct Fixture {
        store: CacheStore,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let url = dir.path().join("history.db").display().to_string();
        let pool = create_pool(&url).unwrap();
        run_migrations(&pool).unwrap();
        let store = CacheStore::new(
            SnapshotTier::open(dir.path().join("snapshots")).unwrap(),
            HistoryTier::new(pool),
            TtlPolicy::default(),
        );
        Fixture { store, _dir: dir }
    }

    fn key(endpoint: &str) -> CacheKey {
        CacheKey::new(endpoint, &BTreeMap::new())
    }

    #[tokio::test]
    async fn put_then_get_hits_memory() {
        let fx = fixture();
        let key = key("oddsapi/v4/odds");

        fx.store.put(&key, b"lines".to_vec(), None).unwrap();
        let entry = fx.store.get(&key).await.unwrap();
        assert_eq!(entry.tier, Tier::Memory);
        assert_eq!(entry.payload, b"lines");
        assert!(!fx.store.is_stale(&entry));
    }

    #[tokio::test]
    async fn snapshot_hit_promotes_to_memory() {
        let fx = fixture();
        let key = key("oddsapi/v4/odds");
        fx.store.put(&key, b"lines".to_vec(), None).unwrap();

        // A second store over the same directories simulates a restart:
        // memory is empty, the snapshot file survives.
        let url = fx._dir.path().join("history.db").display().to_string();
        let pool = create_pool(&url).unwrap();
        let restarted = CacheStore::new(
            SnapshotTier::open(fx._dir.path().join("snapshots")).unwrap(),
            HistoryTier::new(pool),
            TtlPolicy::default(),
        );

        let entry = restarted.get(&key).await.unwrap();
        assert_eq!(entry.tier, Tier::File);

        // Promoted: the next read is a memory hit.
        let entry = restarted.get(&key).await.unwrap();
        assert_eq!(entry.tier, Tier::Memory);
    }

    #[tokio::test]
    async fn ttl_follows_event_proximity() {
        let fx = fixture();
        let now = Utc::now();

        let soon = fx
            .store
            .put(&key("oddsapi/a"), b"x".to_vec(), Some(now + TimeDelta::minutes(30)))
            .unwrap();
        assert_eq!(soon.ttl, Duration::from_secs(120));

        let far = fx
            .store
            .put(&key("oddsapi/b"), b"x".to_vec(), Some(now + TimeDelta::days(3)))
            .unwrap();
        assert_eq!(far.ttl, Duration::from_secs(3_600));
    }

    #[tokio::test]
    async fn get_returns_none_only_for_never_seen_keys() {
        let fx = fixture();
        assert!(fx.store.get(&key("schedules/nfl")).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_through_to_history() {
        let fx = fixture();
        let key = key("oddsapi/v4/odds");
        fx.store.put(&key, b"lines".to_vec(), None).unwrap();

        // Wait for the fire-and-forget history append to land.
        let mut appended = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let url = fx._dir.path().join("history.db").display().to_string();
            let pool = create_pool(&url).unwrap();
            let history = HistoryTier::new(pool);
            if history
                .latest(&key, Duration::from_secs(60))
                .unwrap()
                .is_some()
            {
                appended = true;
                break;
            }
        }
        assert!(appended, "history append never landed");

        // Corrupt the snapshot and restart with an empty memory tier.
        let snap_dir = fx._dir.path().join("snapshots").join(key.file_stem());
        let pointed = std::fs::read_to_string(snap_dir.join("latest")).unwrap();
        std::fs::write(snap_dir.join(pointed.trim()), b"garbage").unwrap();

        let url = fx._dir.path().join("history.db").display().to_string();
        let pool = create_pool(&url).unwrap();
        let restarted = CacheStore::new(
            SnapshotTier::open(fx._dir.path().join("snapshots")).unwrap(),
            HistoryTier::new(pool),
            TtlPolicy::default(),
        );

        let entry = restarted.get(&key).await.unwrap();
        assert_eq!(entry.tier, Tier::History);
        assert_eq!(entry.payload, b"lines");
    }
}
