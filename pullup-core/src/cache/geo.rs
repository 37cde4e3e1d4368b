use deadpool_redis::Pool;
use log::warn;

use super::{keys, CacheError, CacheResult};
use crate::util::Point;

/// One hit from a radius query, sorted ascending by distance.
#[derive(Debug, Clone)]
pub struct GeoHit {
    pub marker_id: i64,
    pub distance_in_meters: f64,
    pub point: Point,
}

/// The geospatial index over markers: a sorted set keyed `geo:markers` whose
/// member is the marker id and whose score is the geohash of the coordinate.
#[derive(Clone)]
pub struct GeoIndex {
    pool: Pool,
}

impl GeoIndex {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Adds a single marker to the index.
    pub async fn add(&self, marker_id: i64, point: Point) {
        if let Err(err) = self.try_add_many(&[(marker_id, point)]).await {
            warn!("Geo index add failed for marker {marker_id}: {err}");
        }
    }

    /// Adds a batch of markers, typically on startup warm-up.
    pub async fn add_many(&self, markers: &[(i64, Point)]) {
        if let Err(err) = self.try_add_many(markers).await {
            warn!("Geo index warm-up failed: {err}");
        }
    }

    /// Removes a marker from the index.
    pub async fn remove(&self, marker_id: i64) {
        if let Err(err) = self.try_remove(marker_id).await {
            warn!("Geo index remove failed for marker {marker_id}: {err}");
        }
    }

    /// Radius search around a point, ascending by distance, with coordinates
    /// and distances included. An error degrades to an empty result so the
    /// caller can fall back to SQL.
    pub async fn search_radius(&self, center: Point, radius_in_meters: f64) -> Vec<GeoHit> {
        match self.try_search(center, radius_in_meters).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!("Geo radius search failed: {err}");
                Vec::new()
            }
        }
    }

    async fn try_add_many(&self, markers: &[(i64, Point)]) -> CacheResult<()> {
        if markers.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let mut cmd = redis::cmd("GEOADD");
        cmd.arg(keys::GEO_MARKERS);

        for (marker_id, point) in markers {
            cmd.arg(point.longitude).arg(point.latitude).arg(marker_id);
        }

        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn try_remove(&self, marker_id: i64) -> CacheResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        redis::cmd("ZREM")
            .arg(keys::GEO_MARKERS)
            .arg(marker_id)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn try_search(&self, center: Point, radius_in_meters: f64) -> CacheResult<Vec<GeoHit>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        // GEOSEARCH <key> FROMLONLAT lng lat BYRADIUS r M ASC WITHCOORD WITHDIST
        let raw: Vec<(String, f64, (f64, f64))> = redis::cmd("GEOSEARCH")
            .arg(keys::GEO_MARKERS)
            .arg("FROMLONLAT")
            .arg(center.longitude)
            .arg(center.latitude)
            .arg("BYRADIUS")
            .arg(radius_in_meters)
            .arg("M")
            .arg("ASC")
            .arg("WITHCOORD")
            .arg("WITHDIST")
            .query_async(&mut conn)
            .await?;

        let hits = raw
            .into_iter()
            .filter_map(|(member, distance, (lng, lat))| {
                let marker_id = member.parse::<i64>().ok()?;

                Some(GeoHit {
                    marker_id,
                    distance_in_meters: distance,
                    point: Point::new(lat, lng),
                })
            })
            .collect();

        Ok(hits)
    }
}
