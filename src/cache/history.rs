//! Append-only historical record tier.
//!
//! Every successfully fetched payload is appended with its fetch timestamp
//! for line-movement/CLV analysis by external collaborators. This layer
//! appends always; it reads the record back only as the last-resort cache
//! tier, never for its own freshness decisions. Rows are never updated or
//! deleted here; retention is an external concern.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;

use crate::db::model::{HistoryRow, NewHistoryRow};
use crate::db::schema::history::dsl;
use crate::db::DbPool;
use crate::domain::{CacheEntry, CacheKey, Tier};
use crate::error::{Error, Result};

/// Slowest tier: the append-only history table.
#[derive(Clone)]
pub struct HistoryTier {
    pool: DbPool,
}

impl HistoryTier {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one snapshot row. Synchronous; the cache store wraps this in a
    /// fire-and-forget task so append failures never fail a caller.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn append(&self, entry: &CacheEntry) -> Result<()> {
        let row = NewHistoryRow {
            fetched_at: entry.fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            cache_key: entry.key.as_str().to_string(),
            endpoint: entry.key.endpoint().to_string(),
            payload: entry.payload.clone(),
        };

        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::insert_into(dsl::history)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Most recent recorded payload for `key`, if any.
    ///
    /// The row carries no TTL; the caller assigns `fallback_ttl` (the policy
    /// default), which in practice marks the entry stale on arrival.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn latest(&self, key: &CacheKey, fallback_ttl: Duration) -> Result<Option<CacheEntry>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;

        let row: Option<HistoryRow> = dsl::history
            .filter(dsl::cache_key.eq(key.as_str()))
            .order(dsl::fetched_at.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let fetched_at = DateTime::parse_from_rfc3339(&row.fetched_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Database(format!("bad fetched_at in history row: {e}")))?;

        Ok(Some(CacheEntry {
            key: key.clone(),
            payload: row.payload,
            fetched_at,
            ttl: fallback_ttl,
            tier: Tier::History,
            event_time: None,
        }))
    }
}
