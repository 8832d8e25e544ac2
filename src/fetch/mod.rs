//! Upstream fetch port.
//!
//! The orchestrator's correctness does not depend on which implementation is
//! injected: production wiring uses [`HttpFetcher`]; tests inject doubles
//! from the testkit. Implementations perform exactly one provider call per
//! invocation and leave retries, timeouts, and breaker accounting to the
//! orchestrator.

mod http;

pub use http::HttpFetcher;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// Payload returned by one upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamPayload {
    /// Opaque response bytes, stored and served as-is.
    pub bytes: Vec<u8>,
    /// Real-world timestamp the payload is "about" (e.g. game start), when
    /// the fetcher can extract one. Drives the TTL policy.
    pub event_time: Option<DateTime<Utc>>,
}

/// One call to a third-party provider.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<UpstreamPayload, FetchError>;
}
