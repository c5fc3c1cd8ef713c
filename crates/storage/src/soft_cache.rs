//! Stale-while-revalidate cache over Redis.
//!
//! Entries are Redis hashes so the binary payload and its bookkeeping
//! fields travel together. A soft-stale entry keeps serving its old value;
//! the caller enqueues a background refresh of the recorded request path
//! instead of blocking. Only a hard invalidation deletes the key.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;

use maps_common::{MapsError, MapsResult};

/// Key namespace for soft cache entries.
pub const SOFT_CACHE_PREFIX: &str = "SOFT_CACHE_";

/// Key namespace for the per-key refresh debounce guards.
const REFRESH_GUARD_PREFIX: &str = "SOFT_CACHE_REFRESHING_";

/// One cached response with its soft-expiry bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Bytes,
    pub invalidated: bool,
    /// Path (with canonical query string) that recomputes this entry.
    pub request_path: Option<String>,
    /// `None` means the entry never soft-expires.
    pub expired_at: Option<DateTime<Utc>>,
}

/// Freshness of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    /// Serve the old value and trigger a background refresh.
    Stale,
}

impl CacheEntry {
    /// Entry state at `now`. Invalidated entries are stale regardless of
    /// their expiry timestamp.
    pub fn state(&self, now: DateTime<Utc>) -> EntryState {
        if self.invalidated {
            return EntryState::Stale;
        }
        match self.expired_at {
            Some(expired_at) if now >= expired_at => EntryState::Stale,
            _ => EntryState::Fresh,
        }
    }
}

/// Redis-backed soft cache client.
pub struct SoftCache {
    conn: MultiplexedConnection,
}

impl SoftCache {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> MapsResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| MapsError::CacheError(format!("Redis connection failed: {}", e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| MapsError::CacheError(format!("Redis connection failed: {}", e)))?;

        Ok(Self { conn })
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", SOFT_CACHE_PREFIX, key)
    }

    /// Get an entry. `None` is a true miss (absent or hard-invalidated).
    pub async fn get(&mut self, key: &str) -> MapsResult<Option<CacheEntry>> {
        let fields: HashMap<String, Vec<u8>> = self
            .conn
            .hgetall(Self::redis_key(key))
            .await
            .map_err(|e| MapsError::CacheError(format!("Cache get failed: {}", e)))?;

        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(entry_from_fields(fields)?))
    }

    /// Store an entry as fresh.
    ///
    /// `soft_ttl = None` means the entry only goes stale through an explicit
    /// soft invalidation.
    pub async fn set(
        &mut self,
        key: &str,
        value: &[u8],
        request_path: Option<&str>,
        soft_ttl: Option<Duration>,
    ) -> MapsResult<()> {
        let redis_key = Self::redis_key(key);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&redis_key);
        pipe.hset(&redis_key, "value", value);
        pipe.hset(&redis_key, "invalidated", "0");
        if let Some(path) = request_path {
            pipe.hset(&redis_key, "request_path", path);
        }
        if let Some(ttl) = soft_ttl {
            let expired_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
            pipe.hset(&redis_key, "expired_at", expired_at.timestamp());
        }

        let _: () = pipe
            .query_async(&mut self.conn)
            .await
            .map_err(|e| MapsError::CacheError(format!("Cache set failed: {}", e)))?;

        Ok(())
    }

    /// Invalidate one key. Hard deletes outright; soft marks the entry so
    /// the next read serves stale and refreshes.
    pub async fn invalidate(&mut self, key: &str, hard: bool) -> MapsResult<()> {
        let redis_key = Self::redis_key(key);

        if hard {
            let _: () = self
                .conn
                .del(&redis_key)
                .await
                .map_err(|e| MapsError::CacheError(format!("Cache delete failed: {}", e)))?;
        } else {
            // Only mark existing entries; a soft invalidate must not create
            // a value-less hash.
            let exists: bool = self
                .conn
                .exists(&redis_key)
                .await
                .map_err(|e| MapsError::CacheError(format!("Cache exists failed: {}", e)))?;
            if exists {
                let _: () = self
                    .conn
                    .hset(&redis_key, "invalidated", "1")
                    .await
                    .map_err(|e| MapsError::CacheError(format!("Cache mark failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Invalidate every key under a logical-key prefix.
    pub async fn invalidate_prefix(&mut self, prefix: &str, hard: bool) -> MapsResult<u64> {
        let pattern = format!("{}{}*", SOFT_CACHE_PREFIX, prefix);

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| MapsError::CacheError(format!("Pattern search failed: {}", e)))?;

        let count = keys.len() as u64;
        for key in keys {
            if hard {
                let _: () = self
                    .conn
                    .del(&key)
                    .await
                    .map_err(|e| MapsError::CacheError(format!("Delete failed: {}", e)))?;
            } else {
                let _: () = self
                    .conn
                    .hset(&key, "invalidated", "1")
                    .await
                    .map_err(|e| MapsError::CacheError(format!("Mark failed: {}", e)))?;
            }
        }

        Ok(count)
    }

    /// Per-key single-flight guard for refresh enqueues.
    ///
    /// Returns true for the caller that should enqueue; concurrent stale
    /// reads within `ttl` are debounced. Duplicate refreshes stay
    /// correctness-safe either way since refreshing is idempotent.
    pub async fn try_acquire_refresh(&mut self, key: &str, ttl: Duration) -> MapsResult<bool> {
        let guard_key = format!("{}{}", REFRESH_GUARD_PREFIX, key);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&guard_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut self.conn)
            .await
            .map_err(|e| MapsError::CacheError(format!("Refresh guard failed: {}", e)))?;

        Ok(acquired.is_some())
    }
}

fn entry_from_fields(mut fields: HashMap<String, Vec<u8>>) -> MapsResult<CacheEntry> {
    let value = fields
        .remove("value")
        .ok_or_else(|| MapsError::CacheError("cache entry without value field".into()))?;

    let invalidated = fields
        .remove("invalidated")
        .map(|v| v == b"1")
        .unwrap_or(false);

    let request_path = fields
        .remove("request_path")
        .map(|v| String::from_utf8_lossy(&v).into_owned());

    let expired_at = fields
        .remove("expired_at")
        .and_then(|v| String::from_utf8_lossy(&v).parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    Ok(CacheEntry {
        value: Bytes::from(value),
        invalidated,
        request_path,
        expired_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(invalidated: bool, expired_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry {
            value: Bytes::from_static(b"payload"),
            invalidated,
            request_path: Some("/api/accounts/layers/1/info/?country_id=1".into()),
            expired_at,
        }
    }

    #[test]
    fn test_fresh_until_expiry() {
        let now = Utc::now();
        let entry = entry(false, Some(now + ChronoDuration::seconds(60)));
        assert_eq!(entry.state(now), EntryState::Fresh);
        assert_eq!(entry.state(now + ChronoDuration::seconds(59)), EntryState::Fresh);
        // Expiry boundary is stale
        assert_eq!(entry.state(now + ChronoDuration::seconds(60)), EntryState::Stale);
        assert_eq!(entry.state(now + ChronoDuration::seconds(120)), EntryState::Stale);
    }

    #[test]
    fn test_never_expires_without_timestamp() {
        let now = Utc::now();
        let entry = entry(false, None);
        assert_eq!(entry.state(now + ChronoDuration::days(365)), EntryState::Fresh);
    }

    #[test]
    fn test_invalidated_is_stale_even_when_unexpired() {
        let now = Utc::now();
        let entry = entry(true, Some(now + ChronoDuration::seconds(600)));
        assert_eq!(entry.state(now), EntryState::Stale);
    }

    #[test]
    fn test_entry_round_trip_through_hash_fields() {
        let expired = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), b"tile-bytes".to_vec());
        fields.insert("invalidated".to_string(), b"0".to_vec());
        fields.insert("request_path".to_string(), b"/api/x/?a=1".to_vec());
        fields.insert(
            "expired_at".to_string(),
            expired.timestamp().to_string().into_bytes(),
        );

        let entry = entry_from_fields(fields).unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"tile-bytes"));
        assert!(!entry.invalidated);
        assert_eq!(entry.request_path.as_deref(), Some("/api/x/?a=1"));
        assert_eq!(entry.expired_at, Some(expired));
    }

    #[test]
    fn test_minimal_entry_never_soft_expires() {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), b"v".to_vec());

        let entry = entry_from_fields(fields).unwrap();
        assert!(!entry.invalidated);
        assert!(entry.request_path.is_none());
        assert_eq!(entry.state(Utc::now()), EntryState::Fresh);
    }

    #[test]
    fn test_entry_without_value_is_an_error() {
        let mut fields = HashMap::new();
        fields.insert("invalidated".to_string(), b"1".to_vec());
        assert!(entry_from_fields(fields).is_err());
    }
}
