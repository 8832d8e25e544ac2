//! Cache key derivation from an endpoint and its normalized parameters.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of one logical upstream resource.
///
/// Derived from the endpoint path plus its parameters sorted by name, so two
/// calls for the same resource always collapse to the same key regardless of
/// parameter order. The key doubles as the deduplication identity: concurrent
/// fetches for an equal `CacheKey` share one upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: String,
    canonical: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(endpoint: &str, params: &BTreeMap<String, String>) -> Self {
        let canonical = if params.is_empty() {
            endpoint.to_string()
        } else {
            let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{endpoint}?{}", query.join("&"))
        };
        Self {
            endpoint: endpoint.to_string(),
            canonical,
        }
    }

    /// The endpoint this key was derived from (circuit-breaker identity).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The provider owning this endpoint: its first path segment.
    ///
    /// `oddsapi/v4/odds` belongs to provider `oddsapi`. Endpoints without a
    /// path separator are their own provider.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.endpoint
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.endpoint)
    }

    /// Canonical string form: `endpoint?k1=v1&k2=v2` with sorted parameters.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Filesystem-safe form used for snapshot directories.
    ///
    /// Replaces path-hostile characters and appends a short hash of the
    /// canonical form so distinct keys cannot collide after sanitization.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let sanitized: String = self
            .canonical
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let mut hasher = DefaultHasher::new();
        self.canonical.hash(&mut hasher);
        format!("{sanitized}-{:08x}", hasher.finish() as u32)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
