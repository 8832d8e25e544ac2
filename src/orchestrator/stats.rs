//! Orchestrator observability counters and the read-only stats snapshot.
//!
//! The snapshot feeds external dashboards and has no feedback into the
//! orchestration algorithm itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::Tier;

/// Lock-free counters updated on the fetch path.
#[derive(Debug, Default)]
pub(super) struct StatsRecorder {
    requests: AtomicU64,
    memory_hits: AtomicU64,
    file_hits: AtomicU64,
    history_hits: AtomicU64,
    live_fetches: AtomicU64,
    stale_serves: AtomicU64,
    no_data: AtomicU64,
    dedup_attaches: AtomicU64,
    upstream_attempts: AtomicU64,
    upstream_failures: AtomicU64,
}

impl StatsRecorder {
    pub(super) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn cache_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Memory => &self.memory_hits,
            Tier::File => &self.file_hits,
            Tier::History => &self.history_hits,
            Tier::Live => &self.live_fetches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn live_fetch(&self) {
        self.live_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn stale_serve(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn no_data(&self) {
        self.no_data.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn dedup_attach(&self) {
        self.dedup_attaches.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn upstream_attempt(&self) {
        self.upstream_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn tier_counts(&self) -> TierCounts {
        TierCounts {
            requests: self.requests.load(Ordering::Relaxed),
            memory: self.memory_hits.load(Ordering::Relaxed),
            file: self.file_hits.load(Ordering::Relaxed),
            history: self.history_hits.load(Ordering::Relaxed),
            live: self.live_fetches.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            no_data: self.no_data.load(Ordering::Relaxed),
            dedup_attaches: self.dedup_attaches.load(Ordering::Relaxed),
            upstream_attempts: self.upstream_attempts.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

pub(super) struct TierCounts {
    pub requests: u64,
    pub memory: u64,
    pub file: u64,
    pub history: u64,
    pub live: u64,
    pub stale_serves: u64,
    pub no_data: u64,
    pub dedup_attaches: u64,
    pub upstream_attempts: u64,
    pub upstream_failures: u64,
}

/// Read-only snapshot for dashboards and CLIs.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Total `fetch` calls seen.
    pub requests: u64,
    /// Answers per tier (live counts first-hand fetches).
    pub hits_per_tier: BTreeMap<String, u64>,
    /// Fraction of all requests answered by each tier.
    pub hit_rate_per_tier: BTreeMap<String, f64>,
    /// Responses served stale after a degraded refresh path.
    pub stale_serves: u64,
    /// Requests that failed with `NoDataAvailable`.
    pub no_data: u64,
    /// Callers that attached to an in-flight request instead of fetching.
    pub dedup_attaches: u64,
    pub upstream_attempts: u64,
    pub upstream_failures: u64,
    /// Tokens left per provider.
    pub remaining_budget_per_provider: BTreeMap<String, f64>,
    /// Circuit status per endpoint seen so far.
    pub breaker_status_per_endpoint: BTreeMap<String, String>,
}

impl StatsSnapshot {
    pub(super) fn assemble(
        counts: TierCounts,
        budgets: Vec<(String, f64)>,
        breakers: Vec<(String, crate::breaker::CircuitStatus)>,
    ) -> Self {
        let mut hits_per_tier = BTreeMap::new();
        hits_per_tier.insert("memory".to_string(), counts.memory);
        hits_per_tier.insert("file".to_string(), counts.file);
        hits_per_tier.insert("history".to_string(), counts.history);
        hits_per_tier.insert("live".to_string(), counts.live);

        let hit_rate_per_tier = hits_per_tier
            .iter()
            .map(|(tier, hits)| {
                let rate = if counts.requests == 0 {
                    0.0
                } else {
                    *hits as f64 / counts.requests as f64
                };
                (tier.clone(), rate)
            })
            .collect();

        Self {
            requests: counts.requests,
            hits_per_tier,
            hit_rate_per_tier,
            stale_serves: counts.stale_serves,
            no_data: counts.no_data,
            dedup_attaches: counts.dedup_attaches,
            upstream_attempts: counts.upstream_attempts,
            upstream_failures: counts.upstream_failures,
            remaining_budget_per_provider: budgets.into_iter().collect(),
            breaker_status_per_endpoint: breakers
                .into_iter()
                .map(|(endpoint, status)| (endpoint, status.as_str().to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitStatus;

    #[test]
    fn hit_rates_divide_by_total_requests() {
        let recorder = StatsRecorder::default();
        for _ in 0..4 {
            recorder.request();
        }
        recorder.cache_hit(Tier::Memory);
        recorder.cache_hit(Tier::Memory);
        recorder.cache_hit(Tier::File);
        recorder.live_fetch();

        let snapshot = StatsSnapshot::assemble(recorder.tier_counts(), vec![], vec![]);
        assert_eq!(snapshot.hits_per_tier["memory"], 2);
        assert!((snapshot.hit_rate_per_tier["memory"] - 0.5).abs() < f64::EPSILON);
        assert!((snapshot.hit_rate_per_tier["live"] - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_requests_yields_zero_rates() {
        let recorder = StatsRecorder::default();
        let snapshot = StatsSnapshot::assemble(recorder.tier_counts(), vec![], vec![]);
        assert_eq!(snapshot.hit_rate_per_tier["memory"], 0.0);
    }

    #[test]
    fn snapshot_serializes_breaker_and_budget_maps() {
        let recorder = StatsRecorder::default();
        let snapshot = StatsSnapshot::assemble(
            recorder.tier_counts(),
            vec![("oddsapi".to_string(), 42.5)],
            vec![("oddsapi/v4/odds".to_string(), CircuitStatus::Open)],
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["remaining_budget_per_provider"]["oddsapi"], 42.5);
        assert_eq!(json["breaker_status_per_endpoint"]["oddsapi/v4/odds"], "open");
    }
}
