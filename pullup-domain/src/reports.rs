use log::warn;
use thiserror::Error;

use pullup_core::cache::BulkSlot;
use pullup_core::db::{
    DatabaseError, NewReport, PrimaryKey, ReportResolution, ReportWithPhotos,
};
use pullup_core::util::{contains_bad_word, Point};

use super::markers::PhotoUpload;
use crate::DomainContext;

/// How far a correction may move a marker, plus the measurement slack.
pub const MAX_DISPLACEMENT_IN_METERS: f64 = 30.0;
pub const DISPLACEMENT_TOLERANCE_IN_METERS: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Operations are only allowed within South Korea")]
    OutsideKorea,
    #[error("Description contains inappropriate language")]
    InvalidContent,
    #[error("New location is too far from the original, add a new marker instead")]
    TooFar,
    #[error("Upload at least one photo")]
    NoPhotos,
    #[error("An error happened during file upload")]
    Upload,
    #[error("Marker does not exist")]
    MarkerNotFound,
    #[error("Report is not pending")]
    NotPending,
    #[error("Report does not exist")]
    NotFound,
    #[error(transparent)]
    Db(DatabaseError),
}

#[derive(Debug)]
pub struct NewCorrectionReport {
    pub marker_id: PrimaryKey,
    /// None for guest reports.
    pub user_id: Option<PrimaryKey>,
    pub location: Point,
    /// Defaults to the original location when the reporter did not move it.
    pub new_location: Option<Point>,
    pub description: String,
    pub does_exist: bool,
    pub photos: Vec<PhotoUpload>,
}

/// Correction proposals against markers and their approval workflow.
pub struct ReportService {
    context: DomainContext,
}

impl ReportService {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Files a correction report. Requires at least one photo, a location
    /// inside South Korea, and a displacement of at most 30m (+1m slack).
    pub async fn create(&self, new_report: NewCorrectionReport) -> Result<PrimaryKey, ReportError> {
        let location = new_report.location;
        let proposed = new_report.new_location.unwrap_or(location);

        if displacement_too_far(location, proposed) {
            return Err(ReportError::TooFar);
        }

        if !location.in_south_korea() {
            return Err(ReportError::OutsideKorea);
        }

        if contains_bad_word(&new_report.description) {
            return Err(ReportError::InvalidContent);
        }

        if new_report.photos.is_empty() {
            return Err(ReportError::NoPhotos);
        }

        let folder = format!("reports/{}", new_report.marker_id);
        let mut photo_urls = Vec::with_capacity(new_report.photos.len());

        for photo in new_report.photos {
            match self
                .context
                .storage
                .put(&folder, &photo.file_name, photo.bytes)
                .await
            {
                Ok(url) => photo_urls.push(url),
                Err(err) => {
                    warn!("Report upload failed: {err}");
                    self.cleanup_blobs(&photo_urls).await;
                    return Err(ReportError::Upload);
                }
            }
        }

        let report_id = self
            .context
            .db
            .create_report(NewReport {
                marker_id: new_report.marker_id,
                user_id: new_report.user_id,
                latitude: location.latitude,
                longitude: location.longitude,
                new_latitude: proposed.latitude,
                new_longitude: proposed.longitude,
                description: new_report.description,
                does_exist: new_report.does_exist,
                photo_urls,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => ReportError::MarkerNotFound,
                err => ReportError::Db(err),
            })?;

        Ok(report_id)
    }

    pub async fn for_marker(
        &self,
        marker_id: PrimaryKey,
    ) -> Result<Vec<ReportWithPhotos>, ReportError> {
        self.context
            .db
            .reports_for_marker(marker_id)
            .await
            .map_err(ReportError::Db)
    }

    pub async fn by_user(&self, user_id: PrimaryKey) -> Result<Vec<ReportWithPhotos>, ReportError> {
        self.context
            .db
            .reports_by_user(user_id)
            .await
            .map_err(ReportError::Db)
    }

    pub async fn for_owned_markers(
        &self,
        owner_id: PrimaryKey,
    ) -> Result<Vec<ReportWithPhotos>, ReportError> {
        self.context
            .db
            .reports_for_owned_markers(owner_id)
            .await
            .map_err(ReportError::Db)
    }

    /// pending → approved. The marker moves to the proposed location, or is
    /// removed entirely when the report says the spot is gone. Either way
    /// the affected caches are invalidated.
    pub async fn approve(&self, report_id: PrimaryKey) -> Result<(), ReportError> {
        let resolution = self
            .context
            .db
            .approve_report(report_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => ReportError::NotFound,
                DatabaseError::Conflict { .. } => ReportError::NotPending,
                err => ReportError::Db(err),
            })?;

        self.context.bulk.clear(BulkSlot::AllMarkers);

        if let ReportResolution::Removed { photo_urls } = resolution {
            self.cleanup_blobs(&photo_urls).await;
        }

        Ok(())
    }

    /// pending → denied.
    pub async fn deny(&self, report_id: PrimaryKey) -> Result<(), ReportError> {
        self.context
            .db
            .deny_report(report_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => ReportError::NotPending,
                err => ReportError::Db(err),
            })
    }

    async fn cleanup_blobs(&self, urls: &[String]) {
        for url in urls {
            if let Err(err) = self.context.storage.delete(url).await {
                warn!("Also failed to delete blob {url}: {err}");
            }
        }
    }
}

fn displacement_too_far(from: Point, to: Point) -> bool {
    from.distance_to(&to) > MAX_DISPLACEMENT_IN_METERS + DISPLACEMENT_TOLERANCE_IN_METERS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meters_north(point: Point, meters: f64) -> Point {
        Point::new(point.latitude + meters / 111_320.0, point.longitude)
    }

    #[test]
    fn test_displacement_boundary() {
        let origin = Point::new(37.5, 127.0);

        assert!(!displacement_too_far(origin, meters_north(origin, 29.0)));
        assert!(
            !displacement_too_far(origin, meters_north(origin, 30.5)),
            "the slack admits a little past 30m"
        );
        assert!(displacement_too_far(origin, meters_north(origin, 32.0)));
    }
}
