use deadpool_redis::Pool;
use log::warn;
use redis::AsyncCommands;

use super::{keys, CacheError, CacheResult};

const DAY_IN_SECONDS: i64 = 24 * 60 * 60;

/// Atomic counters backed by Redis: per-user daily quotas, the click rank
/// store, and the unique visitor estimators.
#[derive(Clone)]
pub struct Counters {
    pool: Pool,
}

impl Counters {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Atomically increments a per-user per-day quota key and returns the
    /// new count. The expiration is set on the first increment of the day,
    /// which makes the quota race-free without a lock.
    pub async fn increment_daily(&self, kind: &str, user_id: i64, date: &str) -> CacheResult<i64> {
        let key = keys::daily_quota(kind, user_id, date);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let count: i64 = conn.incr(&key, 1).await?;

        if count == 1 {
            if let Err(err) = conn.expire::<_, ()>(&key, DAY_IN_SECONDS).await {
                // The quota still works, the key just lives longer.
                warn!("Failed to set expiry on quota key {key}: {err}");
            }
        }

        Ok(count)
    }

    /// Current value of a daily quota key, zero when absent.
    pub async fn daily_count(&self, kind: &str, user_id: i64, date: &str) -> CacheResult<i64> {
        let key = keys::daily_quota(kind, user_id, date);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let count: Option<i64> = conn.get(&key).await?;
        Ok(count.unwrap_or(0))
    }

    /// Adds buffered clicks for a marker into the durable rank store.
    pub async fn add_clicks(&self, marker_id: i64, clicks: i64) -> CacheResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        conn.zincr::<_, _, _, ()>(keys::MARKER_CLICKS, marker_id, clicks)
            .await?;

        Ok(())
    }

    /// The `limit` most clicked markers, descending, with their counts.
    pub async fn top_clicked(&self, limit: isize) -> CacheResult<Vec<(i64, i64)>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let ranked: Vec<(i64, i64)> = conn
            .zrevrange_withscores(keys::MARKER_CLICKS, 0, limit - 1)
            .await?;

        Ok(ranked)
    }

    /// Click count for a single marker, zero when it was never clicked.
    pub async fn clicks_for(&self, marker_id: i64) -> CacheResult<i64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let score: Option<i64> = conn.zscore(keys::MARKER_CLICKS, marker_id).await?;
        Ok(score.unwrap_or(0))
    }

    /// Removes a deleted marker's click counter.
    pub async fn remove_clicks(&self, marker_id: i64) {
        let result: CacheResult<()> = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;

            conn.zrem::<_, _, ()>(keys::MARKER_CLICKS, marker_id)
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!("Failed to remove click counter for marker {marker_id}: {err}");
        }
    }

    /// Registers a visitor IP against a marker's probabilistic counter.
    pub async fn record_unique_visitor(&self, marker_id: &str, visitor_ip: &str) {
        let result: CacheResult<()> = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;

            redis::cmd("PFADD")
                .arg(keys::unique_visitors(marker_id))
                .arg(visitor_ip)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!("Failed to record unique visitor for marker {marker_id}: {err}");
        }
    }

    /// Estimated unique visitor count for a marker.
    pub async fn unique_visitor_count(&self, marker_id: &str) -> i64 {
        let result: CacheResult<i64> = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;

            let count: i64 = redis::cmd("PFCOUNT")
                .arg(keys::unique_visitors(marker_id))
                .query_async(&mut conn)
                .await?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => count,
            Err(err) => {
                warn!("Failed to count unique visitors for marker {marker_id}: {err}");
                0
            }
        }
    }
}
