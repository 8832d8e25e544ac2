//! Request orchestration façade.
//!
//! Every caller goes through [`Orchestrator::fetch`]: cache first, then — if
//! a refresh is needed and allowed by the circuit breaker and the rate
//! budget — one deduplicated upstream call through a bounded worker pool.
//! The orchestrator always returns a result (live, cached, or explicitly
//! stale); the only caller-visible failure is `NoDataAvailable` for keys
//! with zero history.

mod pending;
mod queue;
mod stats;
mod worker;

pub use stats::StatsSnapshot;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::cache::CacheStore;
use crate::domain::{CacheKey, Priority, Tier};
use crate::error::{Error, FetchError, Result};
use crate::fetch::UpstreamFetcher;
use crate::limiter::RateLimiter;

use pending::{PendingTable, Resolution};
use queue::{PriorityQueue, QueuedFetch};
use stats::StatsRecorder;

/// What a fetch resolved to.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Which layer answered: a cache tier or a live call.
    pub tier: Tier,
    /// Age of the payload at resolution time (zero for live).
    pub age: Duration,
    /// True when the freshness window had expired and no fresher answer was
    /// obtainable.
    pub stale: bool,
}

/// Tunables for the orchestrator's queue, pool, and retry behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Fixed worker-pool size.
    pub workers: usize,
    /// Upstream attempts per job before falling back to stale data.
    pub max_attempts: u32,
    /// Bound on each individual upstream call.
    pub request_timeout: Duration,
    /// First retry delay; doubles per attempt.
    pub initial_backoff: Duration,
    /// Ceiling on the retry delay.
    pub max_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(2, 8),
            max_attempts: 3,
            request_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

struct Inner {
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    fetcher: Arc<dyn UpstreamFetcher>,
    queue: PriorityQueue,
    pending: PendingTable,
    stats: StatsRecorder,
    settings: OrchestratorSettings,
}

/// The façade all callers use.
///
/// Components are injected rather than owned globals, so each is
/// independently testable and production wiring and test doubles share one
/// contract.
pub struct Orchestrator {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the orchestrator and spawn its worker pool.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(
        settings: OrchestratorSettings,
        cache: Arc<CacheStore>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        fetcher: Arc<dyn UpstreamFetcher>,
    ) -> Self {
        let inner = Arc::new(Inner {
            cache,
            limiter,
            breaker,
            fetcher,
            queue: PriorityQueue::new(),
            pending: PendingTable::new(),
            stats: StatsRecorder::default(),
            settings,
        });

        let workers = (0..inner.settings.workers.max(1))
            .map(|worker_id| tokio::spawn(worker::run(inner.clone(), worker_id)))
            .collect();
        info!(workers = inner.settings.workers.max(1), "orchestrator started");

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Fetch `endpoint` with `params`, tolerating results up to `max_age`
    /// old.
    ///
    /// Returns a live result when a refresh happens, a cached result when it
    /// is fresh enough, and a stale cached result when the provider is
    /// rate-limited, broken, or failing.
    ///
    /// # Errors
    /// Only [`Error::NoDataAvailable`], and only when the key has never been
    /// successfully fetched.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
        priority: Priority,
        max_age: Duration,
    ) -> Result<FetchResult> {
        self.inner.fetch(endpoint, params, priority, max_age).await
    }

    /// Enqueue low-priority refreshes for a set of resources, without
    /// waiting for the results. For background cache warmers.
    pub fn warm<I>(&self, targets: I)
    where
        I: IntoIterator<Item = (String, BTreeMap<String, String>)>,
    {
        for (endpoint, params) in targets {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = inner
                    .fetch(&endpoint, &params, Priority::Low, Duration::ZERO)
                    .await
                {
                    debug!(endpoint, error = %e, "warm fetch produced no data");
                }
            });
        }
    }

    /// Read-only statistics snapshot for external monitoring. No feedback
    /// into the orchestration algorithm.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::assemble(
            self.inner.stats.tier_counts(),
            self.inner.limiter.remaining_all(),
            self.inner.breaker.statuses(),
        )
    }

    /// Stop accepting work, resolve still-queued jobs from cache, and wait
    /// for the workers to drain.
    pub async fn shutdown(&self) {
        self.inner.queue.close();
        for job in self.inner.queue.drain() {
            worker::resolve_fallback(&self.inner, &job.key).await;
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("orchestrator stopped");
    }
}

impl Inner {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
        priority: Priority,
        max_age: Duration,
    ) -> Result<FetchResult> {
        self.stats.request();
        let key = CacheKey::new(endpoint, params);

        // 1. Fresh-enough cache answer: no network, no queue.
        if let Some(entry) = self.cache.get(&key).await {
            let age = entry.age();
            if !entry.is_stale() && age <= max_age {
                self.stats.cache_hit(entry.tier);
                return Ok(FetchResult {
                    payload: entry.payload,
                    tier: entry.tier,
                    age,
                    stale: false,
                });
            }
        }

        // 2. Join an in-flight fetch for the same key, or become the caller
        //    that dispatches it.
        let (created, rx) = self.pending.attach(&key);
        if !created {
            self.stats.dedup_attach();
            return self.await_resolution(rx, &key).await;
        }

        // 3. Circuit gate. A rejected endpoint degrades to stale data.
        if !self.breaker.allow(endpoint) {
            let reason = FetchError::CircuitOpen {
                endpoint: endpoint.to_string(),
            };
            debug!(key = %key, %reason, "serving fallback");
            worker::resolve_fallback(self, &key).await;
            return self.await_resolution(rx, &key).await;
        }

        // 4. Budget gate (non-mutating; the worker does the consuming).
        if !self.limiter.check(key.provider(), 1.0) {
            let reason = FetchError::RateLimited {
                provider: key.provider().to_string(),
            };
            debug!(key = %key, %reason, "serving fallback");
            // Release the half-open trial if step 3 claimed one.
            self.breaker.cancel_trial(endpoint);
            worker::resolve_fallback(self, &key).await;
            return self.await_resolution(rx, &key).await;
        }

        // 5. Hand off to the worker pool.
        let job = QueuedFetch::new(key.clone(), params.clone(), priority);
        if !self.queue.push(job) {
            debug!(key = %key, "queue closed, serving fallback");
            // Same compensation as the budget gate: the claimed half-open
            // trial will never be attempted.
            self.breaker.cancel_trial(endpoint);
            worker::resolve_fallback(self, &key).await;
        }

        self.await_resolution(rx, &key).await
    }

    async fn await_resolution(
        &self,
        mut rx: broadcast::Receiver<Resolution>,
        key: &CacheKey,
    ) -> Result<FetchResult> {
        match rx.recv().await {
            Ok(Resolution::Data(result)) => Ok(result),
            Ok(Resolution::NoData) => Err(Error::NoDataAvailable {
                key: key.as_str().to_string(),
            }),
            Err(_lagged_or_closed) => {
                // The sender vanished without resolving (shutdown race).
                // Degrade to whatever the cache holds.
                match self.cache.get(key).await {
                    Some(entry) => {
                        let age = entry.age();
                        Ok(FetchResult {
                            payload: entry.payload,
                            tier: entry.tier,
                            age,
                            stale: true,
                        })
                    }
                    None => Err(Error::NoDataAvailable {
                        key: key.as_str().to_string(),
                    }),
                }
            }
        }
    }
}
