//! JSON response cache.
//!
//! Layout: `{cache_dir}/{key}.json`, one raw API payload per key with a
//! `_fetched_at` epoch-seconds stamp embedded in the top-level object.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Whole-entry overwrite on refresh, never patched in place
//! - Fail-closed reads: a missing, truncated or unparseable entry is a miss
//! - Freshness check by elapsed time since `_fetched_at`

use super::provider::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Field stamped into every cached payload.
pub const FETCHED_AT_FIELD: &str = "_fetched_at";

/// The JSON cache.
#[derive(Debug, Clone)]
pub struct JsonCache {
    cache_dir: PathBuf,
}

impl JsonCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the entry for a key: `{cache_dir}/{key}.json`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Read a cached payload.
    ///
    /// Returns `None` when the entry is absent or cannot be parsed as a JSON
    /// object. Corrupt entries are logged and left for the next write to
    /// overwrite.
    pub fn read(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&content) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                warn!(path = %path.display(), "cache entry is not a JSON object, treating as miss");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Write a payload for a key, replacing any previous entry.
    pub fn write(&self, key: &str, payload: &Value) -> Result<(), DataError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec(payload)
            .map_err(|e| DataError::Cache(format!("payload serialization: {e}")))?;

        fs::write(&tmp_path, json)
            .map_err(|e| DataError::Cache(format!("write {}: {e}", tmp_path.display())))?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            // Clean up temp file on rename failure
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;

        Ok(())
    }

    /// List every cached entry with its fetch time.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, DataError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| DataError::Cache(format!("read dir: {e}")))?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| DataError::Cache(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let fetched_at = self
                .read(&key)
                .and_then(|payload| fetched_at(&payload))
                .and_then(epoch_to_datetime);
            entries.push(CacheEntry {
                key,
                path,
                size_bytes,
                fetched_at,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove an entry. Removing a missing entry is not an error.
    pub fn remove(&self, key: &str) -> Result<(), DataError> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| DataError::Cache(format!("remove {}: {e}", path.display())))?;
        }
        Ok(())
    }
}

/// One cached payload as seen by `cache status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `None` when the entry is corrupt or carries no stamp.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            Some(at) => age_secs(at.timestamp_millis() as f64 / 1000.0, now) < ttl.as_secs_f64(),
            None => false,
        }
    }
}

/// Stamp a payload with the fetch instant. Non-object payloads are wrapped
/// so the stamp always lives at the top level.
pub fn stamp_fetched_at(payload: &mut Value, now: DateTime<Utc>) {
    let epoch = now.timestamp_millis() as f64 / 1000.0;
    if !payload.is_object() {
        let inner = payload.take();
        *payload = serde_json::json!({ "payload": inner });
    }
    if let Value::Object(map) = payload {
        map.insert(FETCHED_AT_FIELD.to_string(), Value::from(epoch));
    }
}

/// The `_fetched_at` stamp of a cached payload, in epoch seconds.
pub fn fetched_at(meta: &Value) -> Option<f64> {
    meta.get(FETCHED_AT_FIELD).and_then(Value::as_f64)
}

/// Whether a cached payload is younger than `ttl`.
///
/// Entries without a usable stamp are stale.
pub fn is_fresh(meta: &Value, ttl: Duration) -> bool {
    is_fresh_at(meta, ttl, Utc::now())
}

/// `is_fresh` against an explicit clock.
pub fn is_fresh_at(meta: &Value, ttl: Duration, now: DateTime<Utc>) -> bool {
    match fetched_at(meta) {
        Some(at) if at.is_finite() => age_secs(at, now) < ttl.as_secs_f64(),
        _ => false,
    }
}

fn age_secs(fetched_epoch: f64, now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0 - fetched_epoch
}

fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((epoch * 1000.0).round() as i64)
}
