//! End-to-end orchestrator behavior: deduplication, retry/backoff, breaker
//! and budget fallbacks, and the degrade-never-fail guarantee.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use oddsgate::breaker::{BreakerSettings, CircuitBreaker};
use oddsgate::cache::{CacheStore, HistoryTier, SnapshotTier};
use oddsgate::db::{create_pool, run_migrations};
use oddsgate::domain::{Priority, Tier, TtlPolicy};
use oddsgate::error::Error;
use oddsgate::fetch::UpstreamFetcher;
use oddsgate::limiter::RateLimiter;
use oddsgate::orchestrator::{Orchestrator, OrchestratorSettings};
use oddsgate::testkit::{GatedFetcher, ScriptedCall, ScriptedFetcher, StaticFetcher};

const ENDPOINT: &str = "oddsapi/v4/odds";

struct Harness {
    orchestrator: Arc<Orchestrator>,
    _dir: TempDir,
}

fn settings(max_attempts: u32) -> OrchestratorSettings {
    OrchestratorSettings {
        workers: 2,
        max_attempts,
        request_timeout: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

fn harness(
    fetcher: Arc<dyn UpstreamFetcher>,
    breaker: BreakerSettings,
    settings: OrchestratorSettings,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let url = dir.path().join("history.db").display().to_string();
    let pool = create_pool(&url).unwrap();
    run_migrations(&pool).unwrap();

    let cache = Arc::new(CacheStore::new(
        SnapshotTier::open(dir.path().join("snapshots")).unwrap(),
        HistoryTier::new(pool),
        TtlPolicy::default(),
    ));
    // A generous bucket so budget tests opt in to starvation explicitly.
    let limiter = Arc::new(RateLimiter::new([("oddsapi".to_string(), 1_000.0, 10.0)]));
    let breaker = Arc::new(CircuitBreaker::new(breaker, HashMap::new()));

    Harness {
        orchestrator: Arc::new(Orchestrator::new(settings, cache, limiter, breaker, fetcher)),
        _dir: dir,
    }
}

fn no_params() -> BTreeMap<String, String> {
    BTreeMap::new()
}

#[tokio::test]
async fn live_fetch_then_memory_hit() {
    let fetcher = Arc::new(StaticFetcher::new(b"lines-v1".to_vec()));
    let hx = harness(fetcher.clone(), BreakerSettings::default(), settings(3));

    let first = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(first.tier, Tier::Live);
    assert!(!first.stale);
    assert_eq!(first.payload, b"lines-v1");

    let second = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(second.tier, Tier::Memory);
    assert!(!second.stale);

    // The cache answered; no second upstream call happened.
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn concurrent_fetches_for_one_key_share_one_upstream_call() {
    let fetcher = Arc::new(GatedFetcher::new(b"shared".to_vec()));
    let hx = harness(fetcher.clone(), BreakerSettings::default(), settings(3));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let orchestrator = hx.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .fetch(ENDPOINT, &no_params(), Priority::High, Duration::from_secs(60))
                .await
        }));
    }

    // Let every caller reach the pending table while the call is parked.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fetcher.release();

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.payload, b"shared");
    }
    assert_eq!(fetcher.calls(), 1, "dedup must collapse to one upstream call");

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.dedup_attaches, 7);
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Fail,
        ScriptedCall::Fail,
        ScriptedCall::Ok(b"finally".to_vec(), None),
    ]));
    let hx = harness(fetcher.clone(), BreakerSettings::default(), settings(3));

    let result = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(result.tier, Tier::Live);
    assert_eq!(result.payload, b"finally");
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_serve_stale_cache() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Ok(b"v1".to_vec(), None),
        ScriptedCall::Fail,
        ScriptedCall::Fail,
        ScriptedCall::Fail,
    ]));
    // Threshold high enough that the breaker stays out of the way.
    let breaker = BreakerSettings {
        failure_threshold: 10,
        ..BreakerSettings::default()
    };
    let hx = harness(fetcher.clone(), breaker, settings(3));

    let seed = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(seed.tier, Tier::Live);

    // max_age zero forces a refresh attempt, which fails three times.
    let degraded = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(degraded.stale);
    assert_eq!(degraded.payload, b"v1");
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn open_breaker_serves_stale_without_calling_upstream() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Ok(b"v1".to_vec(), None),
        ScriptedCall::Fail,
    ]));
    let breaker = BreakerSettings {
        failure_threshold: 1,
        cooldown: Duration::from_secs(3_600),
        max_cooldown_multiplier: 8,
    };
    let hx = harness(fetcher.clone(), breaker, settings(1));

    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();

    // One failure trips the breaker; the caller still gets stale data.
    let tripped = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(tripped.stale);
    assert_eq!(fetcher.calls(), 2);

    // While open: fallback served with no upstream attempt at all.
    let while_open = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(while_open.stale);
    assert_eq!(while_open.payload, b"v1");
    assert_eq!(fetcher.calls(), 2, "open breaker must block the call");

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.breaker_status_per_endpoint[ENDPOINT], "open");
}

#[tokio::test]
async fn circuit_opening_mid_job_halts_remaining_retries() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Ok(b"v1".to_vec(), None),
        ScriptedCall::Fail,
        ScriptedCall::Fail,
        ScriptedCall::Fail,
    ]));
    let breaker = BreakerSettings {
        failure_threshold: 1,
        cooldown: Duration::from_secs(3_600),
        max_cooldown_multiplier: 8,
    };
    let hx = harness(fetcher.clone(), breaker, settings(3));

    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();

    // The first failed attempt trips the breaker; attempts two and three
    // must never reach the provider.
    let degraded = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(degraded.stale);
    assert_eq!(degraded.payload, b"v1");
    assert_eq!(fetcher.calls(), 2, "retries must stop once the circuit opens");

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.breaker_status_per_endpoint[ENDPOINT], "open");
}

#[tokio::test]
async fn elapsed_cooldown_grants_one_trial_that_closes_on_success() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Fail,
        ScriptedCall::Ok(b"recovered".to_vec(), None),
    ]));
    // Zero cooldown: the circuit re-arms its trial immediately.
    let breaker = BreakerSettings {
        failure_threshold: 1,
        cooldown: Duration::ZERO,
        max_cooldown_multiplier: 8,
    };
    let hx = harness(fetcher.clone(), breaker, settings(1));

    let first = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await;
    assert!(matches!(first, Err(Error::NoDataAvailable { .. })));

    let trial = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(trial.tier, Tier::Live);
    assert_eq!(trial.payload, b"recovered");
    assert_eq!(fetcher.calls(), 2);

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.breaker_status_per_endpoint[ENDPOINT], "closed");
}

#[tokio::test]
async fn exhausted_budget_serves_stale_without_spending() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![ScriptedCall::Ok(
        b"v1".to_vec(),
        None,
    )]));

    let dir = TempDir::new().unwrap();
    let url = dir.path().join("history.db").display().to_string();
    let pool = create_pool(&url).unwrap();
    run_migrations(&pool).unwrap();
    let cache = Arc::new(CacheStore::new(
        SnapshotTier::open(dir.path().join("snapshots")).unwrap(),
        HistoryTier::new(pool),
        TtlPolicy::default(),
    ));
    // Exactly one token and a negligible refill rate.
    let limiter = Arc::new(RateLimiter::new([("oddsapi".to_string(), 1.0, 1e-9)]));
    let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::default(), HashMap::new()));
    let orchestrator = Orchestrator::new(settings(3), cache, limiter.clone(), breaker, fetcher.clone());

    orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 1);

    let degraded = orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(degraded.stale);
    assert_eq!(degraded.payload, b"v1");
    assert_eq!(fetcher.calls(), 1, "no budget means no upstream call");
    assert!(limiter.remaining("oddsapi") < 1.0);
}

#[tokio::test]
async fn never_fetched_key_is_the_only_hard_failure() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![ScriptedCall::Fail]));
    let hx = harness(fetcher, BreakerSettings::default(), settings(1));

    let result = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await;
    match result {
        Err(Error::NoDataAvailable { key }) => assert_eq!(key, ENDPOINT),
        other => panic!("expected NoDataAvailable, got {other:?}"),
    }
}

#[tokio::test]
async fn timed_out_call_counts_as_failure_and_degrades() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        ScriptedCall::Ok(b"v1".to_vec(), None),
        ScriptedCall::Hang,
    ]));
    let hx = harness(fetcher.clone(), BreakerSettings::default(), settings(1));

    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();

    let degraded = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert!(degraded.stale);
    assert_eq!(degraded.payload, b"v1");

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.upstream_failures, 1);
}

#[tokio::test]
async fn stats_track_tiers_budget_and_breakers() {
    let fetcher = Arc::new(StaticFetcher::new(b"lines".to_vec()));
    let hx = harness(fetcher, BreakerSettings::default(), settings(3));

    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();

    let stats = hx.orchestrator.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.hits_per_tier["live"], 1);
    assert_eq!(stats.hits_per_tier["memory"], 1);
    assert!((stats.hit_rate_per_tier["memory"] - 0.5).abs() < f64::EPSILON);
    assert!(stats.remaining_budget_per_provider.contains_key("oddsapi"));
    assert_eq!(stats.breaker_status_per_endpoint[ENDPOINT], "closed");
}

#[tokio::test]
async fn distinct_keys_fetch_independently() {
    let fetcher = Arc::new(StaticFetcher::new(b"lines".to_vec()));
    let hx = harness(fetcher.clone(), BreakerSettings::default(), settings(3));

    let mut nba = BTreeMap::new();
    nba.insert("sport".to_string(), "nba".to_string());
    let mut nfl = BTreeMap::new();
    nfl.insert("sport".to_string(), "nfl".to_string());

    hx.orchestrator
        .fetch(ENDPOINT, &nba, Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    hx.orchestrator
        .fetch(ENDPOINT, &nfl, Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn shutdown_drains_workers() {
    let fetcher = Arc::new(StaticFetcher::new(b"lines".to_vec()));
    let hx = harness(fetcher, BreakerSettings::default(), settings(3));

    hx.orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    hx.orchestrator.shutdown().await;

    // Post-shutdown fetches still answer from cache.
    let cached = hx
        .orchestrator
        .fetch(ENDPOINT, &no_params(), Priority::Normal, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cached.tier, Tier::Memory);
}
