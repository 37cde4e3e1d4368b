use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use pullup_core::cache::{keys, BulkSlot};
use pullup_core::db::{
    FacilityEntry, FacilityRow, MarkerDetailRow, MarkerSimpleWithAddr,
    MarkerSimpleWithDescription, NewMarker, PhotoRow, PrimaryKey,
};
use pullup_core::util::{clamp_page, contains_bad_word, remove_urls, total_pages, PageParams, Point};

use super::{MarkerError, PhotoUpload};
use crate::DomainContext;

const FACILITIES_TTL: Duration = Duration::from_secs(60 * 60);
const USER_MARKERS_TTL: Duration = Duration::from_secs(60 * 10);

/// The radius probed by the nearby-guard. Wider than the rule itself so the
/// haversine post-filter sees every candidate that could possibly violate it.
const GUARD_PROBE_RADIUS: f64 = 10.0;

/// Marker CRUD and the caches hanging off of it.
pub struct MarkerManager {
    context: DomainContext,
}

/// The response to a successful creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerCreated {
    pub marker_id: PrimaryKey,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub photo_urls: Vec<String>,
}

/// Full marker detail including per-requester flags.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerDetail {
    pub marker_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub username: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub address: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub dislike_count: i64,
    pub photos: Vec<PhotoRow>,
    pub disliked: bool,
    pub favorited: bool,
    pub is_chulbong: bool,
}

/// One cached page of a user's own markers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMarkersPage {
    pub markers: Vec<MarkerSimpleWithDescription>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_markers: i64,
}

/// Who is asking, as far as marker details care.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: PrimaryKey,
    pub is_chulbong: bool,
    pub is_admin: bool,
}

impl MarkerManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Rejects locations outside South Korea and profane descriptions.
    pub fn check_validity(&self, point: Point, description: &str) -> Result<(), MarkerError> {
        if !point.in_south_korea() {
            return Err(MarkerError::OutsideKorea);
        }

        if contains_bad_word(description) {
            return Err(MarkerError::InvalidContent);
        }

        Ok(())
    }

    /// Whether a non-deleted marker already sits within the nearby threshold.
    ///
    /// The geo index is probed first. The SQL bounding-box fallback runs when
    /// the index comes back empty, so an unavailable index degrades to a
    /// correct, slower answer rather than a wrong one.
    pub async fn is_nearby(&self, point: Point) -> Result<bool, MarkerError> {
        let hits = self.context.geo.search_radius(point, GUARD_PROBE_RADIUS).await;

        if hits
            .iter()
            .any(|hit| point.is_nearby(&hit.point))
        {
            return Ok(true);
        }

        if !hits.is_empty() {
            return Ok(false);
        }

        let candidates = self
            .context
            .db
            .markers_in_bounding_box(point.bounding_box(GUARD_PROBE_RADIUS))
            .await
            .map_err(MarkerError::Db)?;

        Ok(candidates
            .iter()
            .any(|m| point.is_nearby(&Point::new(m.latitude, m.longitude))))
    }

    /// Creates a marker with its photos.
    ///
    /// Photos are ingested after the row insert so they land under the
    /// marker's folder. Any failure along the way removes the marker row and
    /// the blobs uploaded so far, leaving no partial state behind.
    pub async fn create_marker(
        &self,
        point: Point,
        description: &str,
        user_id: PrimaryKey,
        photos: Vec<PhotoUpload>,
    ) -> Result<MarkerCreated, MarkerError> {
        self.check_validity(point, description)?;

        if self.is_nearby(point).await? {
            return Err(MarkerError::NearbyMarker);
        }

        let description = remove_urls(description);

        let marker_id = self
            .context
            .db
            .create_marker(NewMarker {
                user_id,
                latitude: point.latitude,
                longitude: point.longitude,
                description: description.clone(),
                address: None,
            })
            .await
            .map_err(MarkerError::Db)?;

        let folder = format!("markers/{marker_id}");
        let mut photo_urls = Vec::with_capacity(photos.len());

        for photo in photos {
            match self
                .context
                .storage
                .put(&folder, &photo.file_name, photo.bytes)
                .await
            {
                Ok(url) => photo_urls.push(url),
                Err(err) => {
                    error!("Photo upload failed for marker {marker_id}: {err}");
                    self.undo_creation(marker_id, &photo_urls).await;
                    return Err(MarkerError::Upload);
                }
            }
        }

        if let Err(err) = self.context.db.add_marker_photos(marker_id, &photo_urls).await {
            error!("Photo rows failed for marker {marker_id}: {err}");
            self.undo_creation(marker_id, &photo_urls).await;
            return Err(MarkerError::Db(err));
        }

        // Readers must not see the new marker in stale lists.
        self.context.bulk.clear(BulkSlot::AllMarkers);
        self.context
            .cache
            .evict_pattern(&format!("userMarkers:{user_id}:page:*"))
            .await;
        self.context.geo.add(marker_id, point).await;

        info!("User {user_id} created marker {marker_id}");

        Ok(MarkerCreated {
            marker_id,
            latitude: point.latitude,
            longitude: point.longitude,
            description,
            photo_urls,
        })
    }

    async fn undo_creation(&self, marker_id: PrimaryKey, uploaded: &[String]) {
        for url in uploaded {
            if let Err(err) = self.context.storage.delete(url).await {
                warn!("Also failed to delete blob {url}: {err}");
            }
        }

        if let Err(err) = self.context.db.delete_marker_cascade(marker_id).await {
            error!("Failed to undo marker {marker_id}: {err}");
        }
    }

    /// The full lightweight list as serialized JSON, from the byte slot when
    /// warm. The boolean reports whether this was a cache hit.
    pub async fn all_markers_bytes(&self) -> Result<(Arc<Vec<u8>>, bool), MarkerError> {
        if let Some(bytes) = self.context.bulk.get(BulkSlot::AllMarkers) {
            return Ok((bytes, true));
        }

        let markers = self
            .context
            .db
            .all_markers_simple()
            .await
            .map_err(MarkerError::Db)?;

        let bytes = serde_json::to_vec(&markers)
            .map_err(|e| MarkerError::Db(pullup_core::db::DatabaseError::Internal(Box::new(e))))?;

        self.context.bulk.set(BulkSlot::AllMarkers, bytes.clone());

        Ok((Arc::new(bytes), false))
    }

    /// Recently added markers, paginated.
    pub async fn new_markers(
        &self,
        page: PageParams,
    ) -> Result<Vec<MarkerSimpleWithAddr>, MarkerError> {
        self.context
            .db
            .new_markers(page.page_size, page.offset)
            .await
            .map_err(MarkerError::Db)
    }

    /// Joins the marker with its photos and the requester's flags.
    pub async fn marker_detail(
        &self,
        marker_id: PrimaryKey,
        requester: Option<Requester>,
    ) -> Result<MarkerDetail, MarkerError> {
        let row = self
            .context
            .db
            .marker_detail(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let photos = self
            .context
            .db
            .photos_of_marker(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let mut detail = assemble_detail(row, photos);

        if let Some(requester) = requester {
            detail.disliked = self
                .context
                .db
                .is_disliked(requester.user_id, marker_id)
                .await
                .unwrap_or(false);
            detail.favorited = self
                .context
                .db
                .is_favorited(requester.user_id, marker_id)
                .await
                .unwrap_or(false);

            // Ownership grants the flag even without the role.
            detail.is_chulbong = match detail.user_id {
                Some(owner) if !requester.is_chulbong => owner == requester.user_id,
                _ => requester.is_chulbong,
            };
        }

        Ok(detail)
    }

    /// Updates the description after profanity screening.
    pub async fn update_description(
        &self,
        marker_id: PrimaryKey,
        description: &str,
    ) -> Result<String, MarkerError> {
        if contains_bad_word(description) {
            return Err(MarkerError::InvalidContent);
        }

        let description = remove_urls(description);

        self.context
            .db
            .update_marker_description(marker_id, &description)
            .await
            .map_err(MarkerError::Db)?;

        Ok(description)
    }

    /// Deletes a marker if the requester owns it or is an admin, then runs
    /// the full invalidation sweep.
    pub async fn delete_marker(
        &self,
        marker_id: PrimaryKey,
        requester: Requester,
    ) -> Result<(), MarkerError> {
        let marker = self
            .context
            .db
            .marker_by_id(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let is_owner = marker.user_id == Some(requester.user_id);

        if !is_owner && !requester.is_admin {
            return Err(MarkerError::Forbidden);
        }

        let photo_urls = self
            .context
            .db
            .delete_marker_cascade(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        // DB first, blobs after commit, best-effort.
        for url in photo_urls {
            if let Err(err) = self.context.storage.delete(&url).await {
                warn!("Failed to delete blob {url}: {err}");
            }
        }

        self.context.bulk.clear(BulkSlot::AllMarkers);
        self.context.cache.evict(&keys::facilities(marker_id)).await;

        if let Some(owner) = marker.user_id {
            self.context
                .cache
                .evict_pattern(&keys::user_markers_pattern(owner))
                .await;
        }

        self.context.geo.remove(marker_id).await;
        self.context.counters.remove_clicks(marker_id).await;

        info!("User {} deleted marker {marker_id}", requester.user_id);

        Ok(())
    }

    /// One page of the requester's markers, cache-first. The database result
    /// is cached from a background task so the response is not delayed.
    pub async fn user_markers_page(
        &self,
        user_id: PrimaryKey,
        page: PageParams,
    ) -> Result<(UserMarkersPage, bool), MarkerError> {
        let cache_key = keys::user_markers_page(user_id, page.page);

        if let Some(cached) = self.context.cache.get::<UserMarkersPage>(&cache_key).await {
            return Ok((cached, true));
        }

        let (markers, total) = self
            .context
            .db
            .markers_by_user(user_id, page.page_size, page.offset)
            .await
            .map_err(MarkerError::Db)?;

        let total_pages = total_pages(total, page.page_size);
        let response = UserMarkersPage {
            markers,
            current_page: clamp_page(page.page, total_pages),
            total_pages,
            total_markers: total,
        };

        let cache = self.context.cache.clone();
        let to_cache = UserMarkersPage {
            markers: response.markers.clone(),
            ..response
        };

        tokio::spawn(async move {
            cache.set(&cache_key, &to_cache, USER_MARKERS_TTL).await;
        });

        Ok((response, false))
    }

    /// Facility set for a marker, cache-first.
    pub async fn facilities(
        &self,
        marker_id: PrimaryKey,
    ) -> Result<(Vec<FacilityRow>, bool), MarkerError> {
        let cache_key = keys::facilities(marker_id);

        if let Some(cached) = self.context.cache.get::<Vec<FacilityRow>>(&cache_key).await {
            return Ok((cached, true));
        }

        let facilities = self
            .context
            .db
            .facilities_of_marker(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let cache = self.context.cache.clone();
        let to_cache = facilities.clone();

        tokio::spawn(async move {
            cache.set(&cache_key, &to_cache, FACILITIES_TTL).await;
        });

        Ok((facilities, false))
    }

    /// Replaces the facility set for a marker.
    pub async fn set_facilities(
        &self,
        marker_id: PrimaryKey,
        facilities: &[FacilityEntry],
    ) -> Result<(), MarkerError> {
        self.context
            .db
            .replace_facilities(marker_id, facilities)
            .await
            .map_err(MarkerError::Db)?;

        self.context.cache.evict(&keys::facilities(marker_id)).await;

        Ok(())
    }

    /// Attaches photos to an existing marker, uploading the blobs first.
    /// Used by the admin upload endpoint.
    pub async fn add_photos(
        &self,
        marker_id: PrimaryKey,
        photos: Vec<PhotoUpload>,
    ) -> Result<Vec<String>, MarkerError> {
        // Ensure the marker exists before uploading anything.
        self.context
            .db
            .marker_by_id(marker_id)
            .await
            .map_err(MarkerError::Db)?;

        let folder = format!("markers/{marker_id}");
        let mut photo_urls = Vec::with_capacity(photos.len());

        for photo in photos {
            match self
                .context
                .storage
                .put(&folder, &photo.file_name, photo.bytes)
                .await
            {
                Ok(url) => photo_urls.push(url),
                Err(err) => {
                    error!("Photo upload failed for marker {marker_id}: {err}");

                    for url in &photo_urls {
                        if let Err(err) = self.context.storage.delete(url).await {
                            warn!("Also failed to delete blob {url}: {err}");
                        }
                    }

                    return Err(MarkerError::Upload);
                }
            }
        }

        self.context
            .db
            .add_marker_photos(marker_id, &photo_urls)
            .await
            .map_err(MarkerError::Db)?;

        Ok(photo_urls)
    }

    /// Loads every marker into the geo index, called once on startup.
    pub async fn warm_geo_index(&self) -> Result<usize, MarkerError> {
        let markers = self
            .context
            .db
            .all_markers_simple()
            .await
            .map_err(MarkerError::Db)?;

        let entries: Vec<_> = markers
            .iter()
            .map(|m| (m.marker_id, Point::new(m.latitude, m.longitude)))
            .collect();

        self.context.geo.add_many(&entries).await;

        Ok(entries.len())
    }
}

fn assemble_detail(row: MarkerDetailRow, photos: Vec<PhotoRow>) -> MarkerDetail {
    MarkerDetail {
        marker_id: row.marker_id,
        user_id: row.user_id,
        username: row.username,
        latitude: row.latitude,
        longitude: row.longitude,
        description: row.description,
        address: row.address,
        created_at: row.created_at,
        updated_at: row.updated_at,
        dislike_count: row.dislike_count,
        photos,
        disliked: false,
        favorited: false,
        is_chulbong: false,
    }
}
