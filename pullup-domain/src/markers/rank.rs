use std::time::Duration;

use dashmap::DashMap;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::watch;

use pullup_core::db::{MarkerSimpleWithAddr, PrimaryKey};

use super::MarkerError;
use crate::DomainContext;

/// Click buffering and marker popularity.
///
/// Views call [RankService::buffer_click], which only touches an in-process
/// map. A background ticker flushes the coalesced counts into the durable
/// rank store.
pub struct RankService {
    context: DomainContext,
    buffer: DashMap<PrimaryKey, i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMarker {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub clicks: i64,
}

impl RankService {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
            buffer: DashMap::new(),
        }
    }

    /// Records one click. Never blocks the caller on the network.
    pub fn buffer_click(&self, marker_id: PrimaryKey) {
        *self.buffer.entry(marker_id).or_insert(0) += 1;
    }

    /// Drains the buffer into the durable store.
    pub async fn flush(&self) {
        let drained: Vec<(PrimaryKey, i64)> = self
            .buffer
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        self.buffer.clear();

        for (marker_id, clicks) in drained {
            if let Err(err) = self.context.counters.add_clicks(marker_id, clicks).await {
                warn!("Failed to flush {clicks} clicks for marker {marker_id}: {err}");
            }
        }
    }

    /// Periodically flushes until shutdown. The final flush runs on exit so
    /// buffered clicks survive a clean stop.
    pub async fn run_flusher(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.context.config.click_flush_seconds);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                _ = shutdown.changed() => {
                    self.flush().await;
                    info!("Click flusher stopped");
                    return;
                }
            }
        }
    }

    /// Drops a deleted marker's pending and durable clicks.
    pub async fn remove_marker(&self, marker_id: PrimaryKey) {
        self.buffer.remove(&marker_id);
        self.context.counters.remove_clicks(marker_id).await;
    }

    /// The globally most clicked markers, joined with their details.
    pub async fn top_markers(&self, limit: isize) -> Result<Vec<RankedMarker>, MarkerError> {
        let ranked = self
            .context
            .counters
            .top_clicked(limit)
            .await
            .unwrap_or_default();

        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<_> = ranked.iter().map(|(id, _)| *id).collect();
        let details = self
            .context
            .db
            .markers_by_ids(&ids)
            .await
            .map_err(MarkerError::Db)?;

        // Preserve the rank order from the store.
        let markers = ranked
            .into_iter()
            .filter_map(|(marker_id, clicks)| {
                details
                    .iter()
                    .find(|d| d.marker_id == marker_id)
                    .map(|d: &MarkerSimpleWithAddr| RankedMarker {
                        marker_id,
                        latitude: d.latitude,
                        longitude: d.longitude,
                        address: d.address.clone(),
                        clicks,
                    })
            })
            .collect();

        Ok(markers)
    }

    /// Registers a visitor IP against the marker's probabilistic counter.
    pub async fn record_visitor(&self, marker_id: &str, visitor_ip: &str) {
        self.context
            .counters
            .record_unique_visitor(marker_id, visitor_ip)
            .await;
    }

    /// Estimated unique visitors for a marker.
    pub async fn unique_visitors(&self, marker_id: &str) -> i64 {
        self.context.counters.unique_visitor_count(marker_id).await
    }

    #[cfg(test)]
    fn buffered(&self, marker_id: PrimaryKey) -> i64 {
        self.buffer.get(&marker_id).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[tokio::test]
    async fn test_click_buffering_coalesces() {
        let context = test_context();
        let rank = RankService::new(&context);

        rank.buffer_click(5);
        rank.buffer_click(5);
        rank.buffer_click(9);

        assert_eq!(rank.buffered(5), 2, "clicks on one marker coalesce");
        assert_eq!(rank.buffered(9), 1);
        assert_eq!(rank.buffered(1), 0, "unclicked markers have no entry");
    }
}
