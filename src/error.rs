use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Failures on the upstream fetch path.
///
/// Every variant here is absorbed inside the orchestrator and converted into
/// a stale-but-valid response when any cached value exists; only
/// [`Error::NoDataAvailable`] ever reaches a caller.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("rate budget exhausted for provider '{provider}'")]
    RateLimited { provider: String },

    #[error("upstream call to '{endpoint}' failed (status {status:?}): {message}")]
    Upstream {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("upstream call to '{endpoint}' timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("cached entry for '{key}' failed to deserialize: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The only failure surfaced to callers: the key has never been
    /// successfully fetched and a live fetch could not be attempted or
    /// did not succeed.
    #[error("no data has ever been available for key '{key}'")]
    NoDataAvailable { key: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, Error>;
