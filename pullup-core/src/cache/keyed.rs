use std::time::Duration;

use deadpool_redis::Pool;
use log::warn;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use super::{CacheCodec, CacheError, CacheResult, JsonCodec};

/// Page size used when walking keys with SCAN.
const SCAN_COUNT: usize = 10;

/// The keyed object cache.
///
/// Values are encoded through the injected codec on set and decoded into the
/// caller's target type on get. All failures degrade to a miss (get) or a
/// logged no-op (set/evict) so the caller's request never fails on a cache
/// problem.
#[derive(Clone)]
pub struct CacheStore<C = JsonCodec>
where
    C: CacheCodec,
{
    pool: Pool,
    codec: C,
}

impl<C> CacheStore<C>
where
    C: CacheCodec,
{
    pub fn new(pool: Pool, codec: C) -> Self {
        Self { pool, codec }
    }

    /// Fetches and decodes a value, or `None` on miss or error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache get failed for {key}: {err}");
                None
            }
        }
    }

    /// Encodes and stores a value with an expiration. Values that would
    /// poison the cache (encode failures, empty payloads) are skipped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(err) = self.try_set(key, value, ttl).await {
            warn!("Cache set failed for {key}: {err}");
        }
    }

    /// Deletes a single key.
    pub async fn evict(&self, key: &str) {
        if let Err(err) = self.try_evict(key).await {
            warn!("Cache evict failed for {key}: {err}");
        }
    }

    /// Deletes every key matching a glob pattern, walking the keyspace with
    /// a SCAN cursor. The cursor starts at zero and the scan is done when it
    /// returns to zero.
    pub async fn evict_pattern(&self, pattern: &str) {
        if let Err(err) = self.try_evict_pattern(pattern).await {
            warn!("Cache pattern evict failed for {pattern}: {err}");
        }
    }

    /// Collects the keys matching a glob pattern. Used by patch-in-place
    /// mutations that rewrite cached pages rather than dropping them.
    pub async fn keys_matching(&self, pattern: &str) -> Vec<String> {
        match self.try_keys_matching(pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!("Cache key scan failed for {pattern}: {err}");
                Vec::new()
            }
        }
    }

    async fn try_get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let bytes: Option<Vec<u8>> = conn.get(key).await?;

        match bytes {
            Some(bytes) if !bytes.is_empty() => Ok(Some(self.codec.decode(&bytes)?)),
            _ => Ok(None),
        }
    }

    async fn try_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let bytes = self.codec.encode(value)?;

        if bytes.is_empty() || bytes == b"null" {
            return Err(CacheError::EmptyPayload);
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        conn.set_ex::<_, _, ()>(key, bytes, ttl.as_secs().max(1))
            .await?;

        Ok(())
    }

    async fn try_evict(&self, key: &str) -> CacheResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn try_evict_pattern(&self, pattern: &str) -> CacheResult<()> {
        let keys = self.try_keys_matching(pattern).await?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        for key in keys {
            conn.del::<_, ()>(key).await?;
        }

        Ok(())
    }

    async fn try_keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = next;

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}
