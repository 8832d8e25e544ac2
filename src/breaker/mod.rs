//! Per-endpoint circuit breaking.
//!
//! A pure state machine with no I/O of its own: the orchestrator asks
//! [`CircuitBreaker::allow`] before dispatching and reports outcomes through
//! `record_success`/`record_failure`. Repeated failures open the circuit;
//! after a cooldown a single half-open trial call probes the endpoint.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

/// Health of one endpoint's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Normal operation; calls flow.
    Closed,
    /// Failing; calls are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed; one trial call is in flight.
    HalfOpen,
}

impl CircuitStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Thresholds for one endpoint's circuit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Base wait before a half-open trial is permitted.
    pub cooldown: Duration,
    /// Cap on cooldown growth: the cooldown doubles per failed trial but
    /// never exceeds `cooldown * max_cooldown_multiplier`.
    pub max_cooldown_multiplier: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown_multiplier: 8,
        }
    }
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Instant,
    current_cooldown: Duration,
    settings: BreakerSettings,
}

impl CircuitState {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: Instant::now(),
            current_cooldown: settings.cooldown,
            settings,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        match self.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                if now.saturating_duration_since(self.opened_at) >= self.current_cooldown {
                    // Claim the single half-open trial atomically with the
                    // transition; concurrent callers see HalfOpen and are
                    // rejected until the trial resolves.
                    self.status = CircuitStatus::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => false,
        }
    }

    fn record_success(&mut self) {
        self.status = CircuitStatus::Closed;
        self.consecutive_failures = 0;
        self.current_cooldown = self.settings.cooldown;
    }

    fn record_failure(&mut self, now: Instant) -> CircuitStatus {
        match self.status {
            CircuitStatus::HalfOpen => {
                // Failed trial: reopen and back off harder, capped.
                let cap = self.settings.cooldown * self.settings.max_cooldown_multiplier.max(1);
                self.current_cooldown = (self.current_cooldown * 2).min(cap);
                self.consecutive_failures += 1;
                self.status = CircuitStatus::Open;
                self.opened_at = now;
            }
            CircuitStatus::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.settings.failure_threshold {
                    self.status = CircuitStatus::Open;
                    self.opened_at = now;
                }
            }
            CircuitStatus::Open => {
                self.consecutive_failures += 1;
            }
        }
        self.status
    }

    fn cancel_trial(&mut self) {
        if self.status == CircuitStatus::HalfOpen {
            // Keep opened_at: the cooldown already elapsed, so the next
            // allow() re-arms the trial immediately.
            self.status = CircuitStatus::Open;
        }
    }
}

/// Registry of per-endpoint circuits.
///
/// Endpoints inherit the default settings unless an override is configured.
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
    defaults: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(defaults: BreakerSettings, overrides: HashMap<String, BreakerSettings>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            defaults,
            overrides,
        }
    }

    /// Whether a call to `endpoint` may proceed right now.
    ///
    /// In the open state this flips to half-open once the cooldown has
    /// elapsed and grants exactly one trial, no matter how many callers ask
    /// concurrently.
    pub fn allow(&self, endpoint: &str) -> bool {
        self.allow_at(endpoint, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock, for deterministic tests.
    pub fn allow_at(&self, endpoint: &str, now: Instant) -> bool {
        let mut states = self.states.lock();
        self.state(&mut states, endpoint).allow(now)
    }

    /// Record a successful call: closes the circuit and zeroes the counter.
    pub fn record_success(&self, endpoint: &str) {
        let mut states = self.states.lock();
        let state = self.state(&mut states, endpoint);
        if state.status != CircuitStatus::Closed {
            debug!(endpoint, "circuit closed after successful trial");
        }
        state.record_success();
    }

    /// Record a failed call, tripping the circuit at the threshold.
    pub fn record_failure(&self, endpoint: &str) {
        self.record_failure_at(endpoint, Instant::now());
    }

    /// [`record_failure`](Self::record_failure) with an explicit clock.
    pub fn record_failure_at(&self, endpoint: &str, now: Instant) {
        let mut states = self.states.lock();
        let state = self.state(&mut states, endpoint);
        let before = state.status;
        let after = state.record_failure(now);
        if before != CircuitStatus::Open && after == CircuitStatus::Open {
            warn!(
                endpoint,
                failures = state.consecutive_failures,
                cooldown_secs = state.current_cooldown.as_secs(),
                "circuit opened"
            );
        }
    }

    /// Release a claimed half-open trial that will not be attempted after
    /// all (e.g. the rate budget ran out between the claim and the call).
    /// The next `allow()` re-arms the trial.
    pub fn cancel_trial(&self, endpoint: &str) {
        let mut states = self.states.lock();
        self.state(&mut states, endpoint).cancel_trial();
    }

    /// Current status of one endpoint (Closed for endpoints never seen).
    #[must_use]
    pub fn status(&self, endpoint: &str) -> CircuitStatus {
        let mut states = self.states.lock();
        self.state(&mut states, endpoint).status
    }

    /// Status of every endpoint seen so far, for the stats snapshot.
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, CircuitStatus)> {
        let states = self.states.lock();
        states
            .iter()
            .map(|(endpoint, state)| (endpoint.clone(), state.status))
            .collect()
    }

    fn state<'a>(
        &self,
        states: &'a mut HashMap<String, CircuitState>,
        endpoint: &str,
    ) -> &'a mut CircuitState {
        states.entry(endpoint.to_string()).or_insert_with(|| {
            let settings = self
                .overrides
                .get(endpoint)
                .copied()
                .unwrap_or(self.defaults);
            CircuitState::new(settings)
        })
    }
}
