use std::time::Duration;

use serde::{Deserialize, Serialize};

use pullup_core::cache::keys;
use pullup_core::db::PrimaryKey;
use pullup_core::util::{clamp_page, total_pages, PageParams, Point};

use super::MarkerError;
use crate::DomainContext;

/// Close-marker pages are cached by their full parameter tuple.
const CLOSE_MARKERS_TTL: Duration = Duration::from_secs(60 * 10);

/// The widest radius a close-markers query may use, in meters.
pub const MAX_SEARCH_DISTANCE: i64 = 50_000;

/// The fixed radius of the area ranking.
const AREA_RADIUS: f64 = 10_000.0;

/// How deep into the click ranking the area ranking looks.
const AREA_RANK_POOL: isize = 200;

/// Radius search and ranking over the geo index, with a SQL fallback.
pub struct MarkerLocator {
    context: DomainContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerWithDistance {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMarkers {
    pub markers: Vec<MarkerWithDistance>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_markers: i64,
}

impl MarkerLocator {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Markers within `distance` meters of a point, ascending by distance,
    /// paginated. A page beyond the end clamps to the last page.
    pub async fn close_markers(
        &self,
        center: Point,
        distance: i64,
        page: PageParams,
    ) -> Result<(CloseMarkers, bool), MarkerError> {
        if distance > MAX_SEARCH_DISTANCE {
            return Err(MarkerError::DistanceTooLarge(MAX_SEARCH_DISTANCE));
        }

        let cache_key = keys::close_markers(
            center.latitude,
            center.longitude,
            distance,
            page.page,
            page.page_size,
        );

        if let Some(cached) = self.context.cache.get::<CloseMarkers>(&cache_key).await {
            return Ok((cached, true));
        }

        let all = self.markers_within(center, distance as f64).await?;

        let total = all.len() as i64;
        let total_pages = total_pages(total, page.page_size);
        let current_page = clamp_page(page.page, total_pages);
        let offset = ((current_page - 1) * page.page_size) as usize;

        let markers = all
            .into_iter()
            .skip(offset)
            .take(page.page_size as usize)
            .collect();

        let response = CloseMarkers {
            markers,
            current_page,
            total_pages,
            total_markers: total,
        };

        self.context
            .cache
            .set(&cache_key, &response, CLOSE_MARKERS_TTL)
            .await;

        Ok((response, false))
    }

    /// The most clicked markers within 10km of a point. An empty area yields
    /// an empty list, never an error.
    pub async fn area_ranking(
        &self,
        center: Point,
        limit: usize,
    ) -> Result<Vec<MarkerWithDistance>, MarkerError> {
        let in_area = self.markers_within(center, AREA_RADIUS).await?;

        if in_area.is_empty() {
            return Ok(Vec::new());
        }

        let ranked = self
            .context
            .counters
            .top_clicked(AREA_RANK_POOL)
            .await
            .unwrap_or_default();

        let mut result: Vec<_> = ranked
            .iter()
            .filter_map(|(marker_id, _clicks)| {
                in_area.iter().find(|m| m.marker_id == *marker_id).cloned()
            })
            .take(limit)
            .collect();

        // The ranking may not cover the area; pad with closest markers.
        if result.len() < limit {
            for marker in in_area {
                if result.len() >= limit {
                    break;
                }
                if !result.iter().any(|m| m.marker_id == marker.marker_id) {
                    result.push(marker);
                }
            }
        }

        Ok(result)
    }

    /// Every marker within the radius, sorted ascending by distance with the
    /// marker id breaking ties. Probes the geo index first and falls back to
    /// a SQL bounding-box pre-filter with a haversine post-filter.
    async fn markers_within(
        &self,
        center: Point,
        radius: f64,
    ) -> Result<Vec<MarkerWithDistance>, MarkerError> {
        let hits = self.context.geo.search_radius(center, radius).await;

        let mut markers: Vec<MarkerWithDistance> = if hits.is_empty() {
            let candidates = self
                .context
                .db
                .markers_in_bounding_box(center.bounding_box(radius))
                .await
                .map_err(MarkerError::Db)?;

            candidates
                .into_iter()
                .filter_map(|m| {
                    let distance = center.distance_to(&Point::new(m.latitude, m.longitude));

                    (distance <= radius).then_some(MarkerWithDistance {
                        marker_id: m.marker_id,
                        latitude: m.latitude,
                        longitude: m.longitude,
                        distance,
                        address: m.address,
                    })
                })
                .collect()
        } else {
            let ids: Vec<_> = hits.iter().map(|h| h.marker_id).collect();
            let details = self
                .context
                .db
                .markers_by_ids(&ids)
                .await
                .unwrap_or_default();

            hits.into_iter()
                .map(|hit| {
                    let address = details
                        .iter()
                        .find(|d| d.marker_id == hit.marker_id)
                        .and_then(|d| d.address.clone());

                    MarkerWithDistance {
                        marker_id: hit.marker_id,
                        latitude: hit.point.latitude,
                        longitude: hit.point.longitude,
                        distance: hit.distance_in_meters,
                        address,
                    }
                })
                .collect()
        };

        markers.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.marker_id.cmp(&b.marker_id))
        });

        Ok(markers)
    }
}
