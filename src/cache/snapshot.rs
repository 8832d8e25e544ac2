//! On-disk snapshot tier.
//!
//! One timestamped JSON file per cache write, grouped in a per-key
//! directory, plus a `latest` pointer file naming the most recent snapshot
//! for the key. The pointer is rewritten atomically (temp file + rename) so
//! a concurrent reader never sees a torn pointer.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CacheEntry, CacheKey, Tier};
use crate::error::{Error, FetchError, Result};

const LATEST_POINTER: &str = "latest";

/// Serialized form of one snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    key: String,
    endpoint: String,
    fetched_at: DateTime<Utc>,
    event_time: Option<DateTime<Utc>>,
    ttl_secs: u64,
    payload_b64: String,
}

/// Middle tier: snapshot files surviving process restarts.
///
/// Old snapshot files are never deleted here; they age out by external
/// directory retention.
pub struct SnapshotTier {
    root: PathBuf,
}

impl SnapshotTier {
    /// Open (creating if needed) the snapshot directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write one snapshot file for `entry` and repoint `latest` at it.
    ///
    /// # Errors
    /// Returns an error if the file or pointer cannot be written.
    pub fn write(&self, entry: &CacheEntry) -> Result<()> {
        let dir = self.key_dir(&entry.key);
        fs::create_dir_all(&dir)?;

        let file_name = format!("{}.json", entry.fetched_at.timestamp_millis());
        let snapshot = SnapshotFile {
            key: entry.key.as_str().to_string(),
            endpoint: entry.key.endpoint().to_string(),
            fetched_at: entry.fetched_at,
            event_time: entry.event_time,
            ttl_secs: entry.ttl.as_secs(),
            payload_b64: BASE64.encode(&entry.payload),
        };
        fs::write(dir.join(&file_name), serde_json::to_vec(&snapshot)?)?;

        write_pointer(&dir, &file_name)?;
        debug!(key = %entry.key, file = %file_name, "snapshot written");
        Ok(())
    }

    /// Read the most recent snapshot for `key`.
    ///
    /// Returns `Ok(None)` when the key has never been snapshotted.
    ///
    /// # Errors
    /// Returns [`FetchError::CacheCorrupt`] when a snapshot or its pointer
    /// exists but fails to deserialize; the caller logs and falls through to
    /// the next tier.
    pub fn read(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let dir = self.key_dir(key);
        let pointer = dir.join(LATEST_POINTER);
        let file_name = match fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let path = dir.join(file_name.trim());
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupt(key, "latest pointer names a missing file"));
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: SnapshotFile =
            serde_json::from_slice(&raw).map_err(|e| corrupt(key, &e.to_string()))?;
        let payload = BASE64
            .decode(&snapshot.payload_b64)
            .map_err(|e| corrupt(key, &e.to_string()))?;

        Ok(Some(CacheEntry {
            key: key.clone(),
            payload,
            fetched_at: snapshot.fetched_at,
            ttl: Duration::from_secs(snapshot.ttl_secs),
            tier: Tier::File,
            event_time: snapshot.event_time,
        }))
    }

    fn key_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_stem())
    }
}

fn write_pointer(dir: &Path, file_name: &str) -> Result<()> {
    let tmp = dir.join(format!("{LATEST_POINTER}.tmp"));
    fs::write(&tmp, file_name)?;
    fs::rename(&tmp, dir.join(LATEST_POINTER))?;
    Ok(())
}

fn corrupt(key: &CacheKey, reason: &str) -> Error {
    FetchError::CacheCorrupt {
        key: key.as_str().to_string(),
        reason: reason.to_string(),
    }
    .into()
}
