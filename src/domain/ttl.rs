//! Event-proximity TTL policy.
//!
//! Odds for a game tipping off in twenty minutes go stale far faster than
//! odds for a game next weekend. The policy maps "time until the event" to a
//! freshness window; payloads with no known event time get the default.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// One proximity band: entries describing an event closer than `horizon`
/// get `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlBand {
    pub horizon: Duration,
    pub ttl: Duration,
}

/// Monotonic staleness policy keyed to time-until-event.
///
/// Bands are consulted nearest-first; an event already underway (or in the
/// past) falls in the nearest band. The boundary values are configuration,
/// not hardcoded law.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    bands: Vec<TtlBand>,
    default_ttl: Duration,
}

impl TtlPolicy {
    /// Build a policy from proximity bands.
    ///
    /// Bands are sorted by horizon, nearest first. `default_ttl` applies to
    /// events past the furthest horizon and to payloads with no event time.
    #[must_use]
    pub fn new(mut bands: Vec<TtlBand>, default_ttl: Duration) -> Self {
        bands.sort_by_key(|b| b.horizon);
        Self { bands, default_ttl }
    }

    /// TTL for a payload about an event at `event_time`, evaluated at `now`.
    ///
    /// Pure function: no clock access, no shared state.
    #[must_use]
    pub fn ttl_for(&self, event_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(event_time) = event_time else {
            return self.default_ttl;
        };
        // An event in the past is treated as maximally near.
        let until = (event_time - now).to_std().unwrap_or(Duration::ZERO);
        for band in &self.bands {
            if until < band.horizon {
                return band.ttl;
            }
        }
        self.default_ttl
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for TtlPolicy {
    /// The standard table: <1h → 2min, 1–6h → 15min, 6–24h → 30min,
    /// further out or unknown → 60min.
    fn default() -> Self {
        Self::new(
            vec![
                TtlBand {
                    horizon: Duration::from_secs(3_600),
                    ttl: Duration::from_secs(120),
                },
                TtlBand {
                    horizon: Duration::from_secs(6 * 3_600),
                    ttl: Duration::from_secs(900),
                },
                TtlBand {
                    horizon: Duration::from_secs(24 * 3_600),
                    ttl: Duration::from_secs(1_800),
                },
            ],
            Duration::from_secs(3_600),
        )
    }
}
