//! Cache entries and the storage tiers that serve them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CacheKey;

/// Which layer answered (or produced) a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process memory map.
    Memory,
    /// On-disk snapshot files.
    File,
    /// Append-only historical record.
    History,
    /// A live upstream call.
    Live,
}

impl Tier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::File => "file",
            Tier::History => "history",
            Tier::Live => "live",
        }
    }
}

/// One cached payload with its freshness metadata.
///
/// At most one current entry exists per key per tier; a refresh supersedes
/// the previous value rather than merging with it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Opaque payload bytes as returned by the provider.
    pub payload: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    /// Freshness window computed at write time from event proximity.
    pub ttl: Duration,
    /// Tier that last served this entry.
    pub tier: Tier,
    /// Real-world timestamp the payload describes (game start), when known.
    pub event_time: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Age of the entry at `now`. Zero if the clock went backwards.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Whether the freshness window has expired at `now`.
    ///
    /// Staleness is monotonic for a fixed entry: false until
    /// `fetched_at + ttl`, true ever after.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.ttl
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Copy of this entry attributed to a different serving tier.
    #[must_use]
    pub fn served_from(&self, tier: Tier) -> CacheEntry {
        CacheEntry {
            tier,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeDelta;

    use super::*;

    fn entry(fetched_at: DateTime<Utc>, ttl: Duration) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new("oddsapi/v4/odds", &BTreeMap::new()),
            payload: b"{}".to_vec(),
            fetched_at,
            ttl,
            tier: Tier::Memory,
            event_time: None,
        }
    }

    #[test]
    fn fresh_until_exactly_ttl_then_stale_forever() {
        let fetched = Utc::now();
        let e = entry(fetched, Duration::from_secs(120));

        assert!(!e.is_stale_at(fetched));
        assert!(!e.is_stale_at(fetched + TimeDelta::seconds(120)));
        assert!(e.is_stale_at(fetched + TimeDelta::seconds(121)));
        assert!(e.is_stale_at(fetched + TimeDelta::days(30)));
    }

    #[test]
    fn age_is_zero_when_clock_goes_backwards() {
        let fetched = Utc::now();
        let e = entry(fetched, Duration::from_secs(60));
        assert_eq!(e.age_at(fetched - TimeDelta::seconds(5)), Duration::ZERO);
    }

    #[test]
    fn served_from_changes_only_the_tier() {
        let e = entry(Utc::now(), Duration::from_secs(60));
        let promoted = e.served_from(Tier::File);
        assert_eq!(promoted.tier, Tier::File);
        assert_eq!(promoted.payload, e.payload);
        assert_eq!(promoted.fetched_at, e.fetched_at);
    }
}
