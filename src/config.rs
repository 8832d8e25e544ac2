//! Configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with per-field defaults, so an
//! empty file (or no file at all) yields a working orchestrator. Sensitive
//! or deployment-specific values (`ODDSGATE_DATABASE_URL`,
//! `ODDSGATE_SNAPSHOT_DIR`) can be overridden from the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::breaker::BreakerSettings;
use crate::domain::{TtlBand, TtlPolicy};
use crate::error::{ConfigError, Result};
use crate::orchestrator::OrchestratorSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Per-provider call budgets, keyed by provider name (the first path
    /// segment of its endpoints). Providers missing here get the limiter's
    /// default bucket.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

/// Cache-store configuration: snapshot directory, history database, and the
/// event-proximity TTL table.
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub ttl: TtlConfig,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("data/snapshots")
}

fn default_database_url() -> String {
    "data/history.db".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            database_url: default_database_url(),
            ttl: TtlConfig::default(),
        }
    }
}

/// TTL table keyed to time-until-event. The boundary values are
/// deployment configuration, not hardcoded law.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlConfig {
    /// TTL for events less than an hour out.
    #[serde(default = "default_ttl_under_1h")]
    pub under_1h_secs: u64,
    /// TTL for events one to six hours out.
    #[serde(default = "default_ttl_under_6h")]
    pub under_6h_secs: u64,
    /// TTL for events six to twenty-four hours out.
    #[serde(default = "default_ttl_under_24h")]
    pub under_24h_secs: u64,
    /// TTL for events further out, or with no known event time.
    #[serde(default = "default_ttl_far")]
    pub default_secs: u64,
}

fn default_ttl_under_1h() -> u64 {
    120
}

fn default_ttl_under_6h() -> u64 {
    900
}

fn default_ttl_under_24h() -> u64 {
    1_800
}

fn default_ttl_far() -> u64 {
    3_600
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            under_1h_secs: default_ttl_under_1h(),
            under_6h_secs: default_ttl_under_6h(),
            under_24h_secs: default_ttl_under_24h(),
            default_secs: default_ttl_far(),
        }
    }
}

impl TtlConfig {
    #[must_use]
    pub fn policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            vec![
                TtlBand {
                    horizon: Duration::from_secs(3_600),
                    ttl: Duration::from_secs(self.under_1h_secs),
                },
                TtlBand {
                    horizon: Duration::from_secs(6 * 3_600),
                    ttl: Duration::from_secs(self.under_6h_secs),
                },
                TtlBand {
                    horizon: Duration::from_secs(24 * 3_600),
                    ttl: Duration::from_secs(self.under_24h_secs),
                },
            ],
            Duration::from_secs(self.default_secs),
        )
    }
}

/// Worker-pool and retry tunables.
#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_workers() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            workers: self.workers,
            max_attempts: self.max_attempts,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Call budget for one provider.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProviderConfig {
    /// Maximum tokens in the bucket.
    pub capacity: f64,
    /// Continuous refill rate, tokens per second.
    pub refill_per_sec: f64,
}

/// Circuit-breaker defaults plus per-endpoint overrides.
#[derive(Debug, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_cooldown_multiplier")]
    pub max_cooldown_multiplier: u32,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointBreakerConfig>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_max_cooldown_multiplier() -> u32 {
    8
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_cooldown_multiplier: default_max_cooldown_multiplier(),
            endpoints: HashMap::new(),
        }
    }
}

/// Per-endpoint breaker override; unset fields inherit the defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EndpointBreakerConfig {
    pub failure_threshold: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

impl BreakerConfig {
    #[must_use]
    pub fn defaults(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold.max(1),
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_cooldown_multiplier: self.max_cooldown_multiplier.max(1),
        }
    }

    #[must_use]
    pub fn overrides(&self) -> HashMap<String, BreakerSettings> {
        let defaults = self.defaults();
        self.endpoints
            .iter()
            .map(|(endpoint, o)| {
                (
                    endpoint.clone(),
                    BreakerSettings {
                        failure_threshold: o.failure_threshold.unwrap_or(defaults.failure_threshold),
                        cooldown: o
                            .cooldown_secs
                            .map(Duration::from_secs)
                            .unwrap_or(defaults.cooldown),
                        max_cooldown_multiplier: defaults.max_cooldown_multiplier,
                    },
                )
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file is unreadable, unparseable, or
    /// holds invalid values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ODDSGATE_DATABASE_URL") {
            self.cache.database_url = url;
        }
        if let Ok(dir) = std::env::var("ODDSGATE_SNAPSHOT_DIR") {
            self.cache.snapshot_dir = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.workers",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.max_attempts",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        for (name, provider) in &self.providers {
            if provider.capacity <= 0.0 || provider.refill_per_sec <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "providers",
                    reason: format!("provider '{name}' needs positive capacity and refill rate"),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Provider budgets in the shape the limiter consumes.
    #[must_use]
    pub fn provider_budgets(&self) -> Vec<(String, f64, f64)> {
        self.providers
            .iter()
            .map(|(name, p)| (name.clone(), p.capacity, p.refill_per_sec))
            .collect()
    }
}
