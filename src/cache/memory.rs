//! Thread-safe in-process cache tier.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::{CacheEntry, CacheKey};

/// Fastest tier: a process-local map of current entries.
///
/// Entries evict only on process restart; a refresh supersedes the previous
/// value for its key.
pub struct MemoryTier {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryTier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or supersede the entry for its key.
    pub fn insert(&self, entry: CacheEntry) {
        self.entries.write().insert(entry.key.clone(), entry);
    }

    /// Snapshot of the current entry for `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::domain::Tier;

    fn entry(key: &CacheKey, payload: &[u8]) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            payload: payload.to_vec(),
            fetched_at: Utc::now(),
            ttl: Duration::from_secs(60),
            tier: Tier::Memory,
            event_time: None,
        }
    }

    #[test]
    fn insert_and_get() {
        let tier = MemoryTier::new();
        let key = CacheKey::new("oddsapi/v4/odds", &BTreeMap::new());

        assert!(tier.get(&key).is_none());
        tier.insert(entry(&key, b"first"));
        assert_eq!(tier.get(&key).unwrap().payload, b"first");
    }

    #[test]
    fn newer_entry_supersedes_older() {
        let tier = MemoryTier::new();
        let key = CacheKey::new("oddsapi/v4/odds", &BTreeMap::new());

        tier.insert(entry(&key, b"first"));
        tier.insert(entry(&key, b"second"));
        assert_eq!(tier.get(&key).unwrap().payload, b"second");
        assert_eq!(tier.len(), 1);
    }
}
