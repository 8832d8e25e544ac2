//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! Three mock fetcher types for different testing needs:
//!
//! - [`ScriptedFetcher`] — Pre-loaded per-call outcomes with a call counter.
//!   Best for: retry/backoff, breaker transitions, stale fallback.
//!
//! - [`GatedFetcher`] — Blocks every call until released.
//!   Best for: deduplication tests needing a request held in flight.
//!
//! - [`StaticFetcher`] — Always succeeds with a fixed payload.
//!   Best for: cache-tier and TTL behavior.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::fetch::{UpstreamFetcher, UpstreamPayload};
use crate::error::FetchError;

fn upstream_err(endpoint: &str) -> FetchError {
    FetchError::Upstream {
        endpoint: endpoint.to_string(),
        status: Some(500),
        message: "scripted failure".into(),
    }
}

/// One scripted outcome for a [`ScriptedFetcher`] call.
pub enum ScriptedCall {
    /// Succeed with this payload and optional event time.
    Ok(Vec<u8>, Option<DateTime<Utc>>),
    /// Fail with a generic upstream error.
    Fail,
    /// Sleep longer than any sane test timeout, to trigger the
    /// orchestrator's call timeout.
    Hang,
}

/// A mock fetcher that pops one scripted outcome per call.
///
/// When the script is exhausted, further calls fail; tests that want
/// open-ended success should use [`StaticFetcher`].
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<ScriptedCall>>,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    #[must_use]
    pub fn new(script: Vec<ScriptedCall>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Total upstream calls made so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        endpoint: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<UpstreamPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedCall::Ok(bytes, event_time)) => Ok(UpstreamPayload { bytes, event_time }),
            Some(ScriptedCall::Hang) => {
                tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
                Err(upstream_err(endpoint))
            }
            Some(ScriptedCall::Fail) | None => Err(upstream_err(endpoint)),
        }
    }
}

/// A mock fetcher that parks every call on a gate until the test releases
/// it, then succeeds with a fixed payload.
pub struct GatedFetcher {
    payload: Vec<u8>,
    gate: Arc<Notify>,
    released: Mutex<bool>,
    calls: AtomicU32,
}

impl GatedFetcher {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            gate: Arc::new(Notify::new()),
            released: Mutex::new(false),
            calls: AtomicU32::new(0),
        }
    }

    /// Let every parked (and future) call proceed.
    pub fn release(&self) {
        *self.released.lock() = true;
        self.gate.notify_waiters();
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for GatedFetcher {
    async fn fetch(
        &self,
        _endpoint: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<UpstreamPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        loop {
            let wait = self.gate.notified();
            tokio::pin!(wait);
            // Register before checking the flag so a release between the
            // check and the await still wakes this call.
            wait.as_mut().enable();
            if *self.released.lock() {
                break;
            }
            wait.await;
        }
        Ok(UpstreamPayload {
            bytes: self.payload.clone(),
            event_time: None,
        })
    }
}

/// A mock fetcher that always succeeds with a fixed payload.
pub struct StaticFetcher {
    payload: Vec<u8>,
    event_time: Option<DateTime<Utc>>,
    calls: AtomicU32,
}

impl StaticFetcher {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            event_time: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Attach an event time to every payload, driving the TTL policy.
    #[must_use]
    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = Some(event_time);
        self
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for StaticFetcher {
    async fn fetch(
        &self,
        _endpoint: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<UpstreamPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UpstreamPayload {
            bytes: self.payload.clone(),
            event_time: self.event_time,
        })
    }
}
