//! Worker pool: dequeues fetch jobs, performs the upstream call with
//! timeout/retry/backoff, and resolves the pending request for every waiter.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::pending::Resolution;
use super::queue::QueuedFetch;
use super::{FetchResult, Inner};
use crate::breaker::CircuitStatus;
use crate::domain::{CacheKey, Tier};
use crate::error::FetchError;

pub(super) async fn run(inner: Arc<Inner>, worker_id: usize) {
    debug!(worker_id, "worker started");
    while let Some(job) = inner.queue.pop().await {
        process(&inner, job).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn process(inner: &Inner, mut job: QueuedFetch) {
    let endpoint = job.key.endpoint().to_string();
    let provider = job.key.provider().to_string();
    debug!(
        key = %job.key,
        priority = ?job.priority,
        queued_ms = job.enqueued_at.elapsed().as_millis() as u64,
        "job dispatched"
    );

    loop {
        job.attempt += 1;

        // Each attempt is one real upstream call, so each debits the bucket.
        if !inner.limiter.consume(&provider, 1.0) {
            debug!(
                key = %job.key,
                provider,
                attempt = job.attempt,
                "budget ran out before dispatch, serving fallback"
            );
            // Release a half-open trial claimed on the caller path.
            inner.breaker.cancel_trial(&endpoint);
            resolve_fallback(inner, &job.key).await;
            return;
        }

        inner.stats.upstream_attempt();
        let outcome = tokio::time::timeout(
            inner.settings.request_timeout,
            inner.fetcher.fetch(job.key.endpoint(), &job.params),
        )
        .await;

        let error = match outcome {
            Ok(Ok(payload)) => {
                inner.breaker.record_success(&endpoint);
                inner.stats.live_fetch();
                let bytes = match inner.cache.put(&job.key, payload.bytes, payload.event_time) {
                    Ok(entry) => entry.payload,
                    Err(e) => {
                        // The payload is still good; cache trouble must not
                        // fail the request.
                        warn!(key = %job.key, error = %e, "cache write failed");
                        return_payload_without_cache(inner, &job.key).await;
                        return;
                    }
                };
                inner.pending.resolve(
                    &job.key,
                    Resolution::Data(FetchResult {
                        payload: bytes,
                        tier: Tier::Live,
                        age: Duration::ZERO,
                        stale: false,
                    }),
                );
                return;
            }
            Ok(Err(e)) => e,
            Err(_elapsed) => FetchError::Timeout {
                endpoint: endpoint.clone(),
                timeout: inner.settings.request_timeout,
            },
        };

        inner.stats.upstream_failure();
        inner.breaker.record_failure(&endpoint);
        warn!(
            key = %job.key,
            attempt = job.attempt,
            max_attempts = inner.settings.max_attempts,
            error = %error,
            "upstream call failed"
        );

        // That failure may have opened the circuit (threshold reached, or a
        // failed half-open trial). An open circuit means no further upstream
        // calls, remaining attempts or not.
        if inner.breaker.status(&endpoint) == CircuitStatus::Open {
            debug!(key = %job.key, "circuit opened mid-job, serving fallback");
            resolve_fallback(inner, &job.key).await;
            return;
        }

        if job.attempt >= inner.settings.max_attempts {
            resolve_fallback(inner, &job.key).await;
            return;
        }
        tokio::time::sleep(backoff_delay(
            inner.settings.initial_backoff,
            inner.settings.max_backoff,
            job.attempt,
        ))
        .await;
    }
}

/// Resolve with the best available cached entry marked stale, or `NoData`
/// when the key has zero history.
pub(super) async fn resolve_fallback(inner: &Inner, key: &CacheKey) {
    match inner.cache.get(key).await {
        Some(entry) => {
            inner.stats.stale_serve();
            let age = entry.age();
            inner.pending.resolve(
                key,
                Resolution::Data(FetchResult {
                    payload: entry.payload,
                    tier: entry.tier,
                    age,
                    stale: true,
                }),
            );
        }
        None => {
            inner.stats.no_data();
            inner.pending.resolve(key, Resolution::NoData);
        }
    }
}

/// A live payload arrived but the synchronous cache write failed; serve
/// whatever the cache now holds (the memory insert may have succeeded), or
/// re-read nothing and fall back to `NoData` semantics via the stale path.
async fn return_payload_without_cache(inner: &Inner, key: &CacheKey) {
    match inner.cache.get(key).await {
        Some(entry) => {
            let age = entry.age();
            let stale = entry.is_stale();
            inner.pending.resolve(
                key,
                Resolution::Data(FetchResult {
                    payload: entry.payload,
                    tier: entry.tier,
                    age,
                    stale,
                }),
            );
        }
        None => {
            inner.stats.no_data();
            inner.pending.resolve(key, Resolution::NoData);
        }
    }
}

/// Exponential backoff with jitter: `initial * 2^(attempt-1)`, capped, then
/// scaled by a random factor in [0.5, 1.0] to de-synchronize retries.
fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = initial
        .saturating_mul(2u32.saturating_pow(exp))
        .min(max);
    base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(400);

        let first = backoff_delay(initial, max, 1);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

        let third = backoff_delay(initial, max, 3);
        assert!(third <= Duration::from_millis(400));

        let tenth = backoff_delay(initial, max, 10);
        assert!(tenth <= Duration::from_millis(400));
    }
}
