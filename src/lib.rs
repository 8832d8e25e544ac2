//! Oddsgate - Rate-aware request orchestration and adaptive caching for
//! sports data feeds.
//!
//! This crate mediates every outbound call to rate-limited third-party data
//! providers (odds feeds, schedule feeds) under four competing constraints:
//! never exceed a provider's call quota, keep served data fresh relative to
//! how soon the event it describes occurs, survive provider outages without
//! surfacing errors whenever any prior data exists, and never issue
//! redundant concurrent calls for the same resource.
//!
//! # Architecture
//!
//! Four components, composed bottom-up and injected into the façade:
//!
//! - [`limiter::RateLimiter`] - one lazily-refilled token bucket per provider
//! - [`cache::CacheStore`] - three ordered tiers: in-process memory, on-disk
//!   snapshot files, and an append-only historical record (SQLite)
//! - [`breaker::CircuitBreaker`] - per-endpoint health state machine
//! - [`orchestrator::Orchestrator`] - the façade all callers use: cache
//!   consultation, request deduplication, a priority queue feeding a bounded
//!   worker pool, and retry/backoff around a pluggable
//!   [`fetch::UpstreamFetcher`]
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files with env overrides
//! - [`domain`] - Cache keys, entries, tiers, priorities, the TTL policy
//! - [`error`] - Error types for the crate
//! - [`fetch`] - Upstream fetch port and the reqwest implementation
//! - [`db`] - Diesel pool and schema for the history tier
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use oddsgate::breaker::CircuitBreaker;
//! use oddsgate::cache::{CacheStore, HistoryTier, SnapshotTier};
//! use oddsgate::config::Config;
//! use oddsgate::db::{create_pool, run_migrations};
//! use oddsgate::domain::Priority;
//! use oddsgate::fetch::HttpFetcher;
//! use oddsgate::limiter::RateLimiter;
//! use oddsgate::orchestrator::Orchestrator;
//!
//! # async fn run() -> oddsgate::error::Result<()> {
//! let config = Config::load("config.toml")?;
//! config.logging.init();
//!
//! let pool = create_pool(&config.cache.database_url)?;
//! run_migrations(&pool)?;
//!
//! let cache = Arc::new(CacheStore::new(
//!     SnapshotTier::open(&config.cache.snapshot_dir)?,
//!     HistoryTier::new(pool),
//!     config.cache.ttl.policy(),
//! ));
//! let limiter = Arc::new(RateLimiter::new(config.provider_budgets()));
//! let breaker = Arc::new(CircuitBreaker::new(
//!     config.breaker.defaults(),
//!     config.breaker.overrides(),
//! ));
//! let fetcher = Arc::new(HttpFetcher::new("https://api.example.com".into()));
//!
//! let orchestrator = Orchestrator::new(
//!     config.orchestrator.settings(),
//!     cache,
//!     limiter,
//!     breaker,
//!     fetcher,
//! );
//!
//! let mut params = BTreeMap::new();
//! params.insert("sport".to_string(), "nba".to_string());
//! let result = orchestrator
//!     .fetch("oddsapi/v4/odds", &params, Priority::High, Duration::from_secs(60))
//!     .await?;
//! println!("{} bytes from {:?} (stale: {})", result.payload.len(), result.tier, result.stale);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod orchestrator;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
