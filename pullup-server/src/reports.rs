use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use serde_json::json;

use pullup_core::util::Point;
use pullup_domain::{NewCorrectionReport, PhotoUpload};

use crate::{
    auth::{AdminSession, Session, SoftSession},
    errors::{ServerError, ServerResult},
    Router, ServerContext,
};

struct ReportForm {
    marker_id: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    new_latitude: Option<f64>,
    new_longitude: Option<f64>,
    description: String,
    does_exist: bool,
    photos: Vec<PhotoUpload>,
}

pub(crate) async fn parse_report_form(mut multipart: Multipart) -> ServerResult<ReportForm> {
    let mut form = ReportForm {
        marker_id: None,
        latitude: None,
        longitude: None,
        new_latitude: None,
        new_longitude: None,
        description: String::new(),
        does_exist: true,
        photos: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::BadRequest("failed to parse form".to_string()))?
    {
        match field.name() {
            Some("markerId") => {
                form.marker_id = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            Some("latitude") => {
                form.latitude = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            Some("longitude") => {
                form.longitude = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            Some("newLatitude") => {
                form.new_latitude = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            Some("newLongitude") => {
                form.new_longitude = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            Some("description") => {
                form.description = field.text().await.unwrap_or_default();
            }
            Some("doesExist") => {
                form.does_exist = field
                    .text()
                    .await
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(true);
            }
            Some("photos") => {
                let file_name = field.file_name().unwrap_or("report.jpg").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ServerError::BadRequest("failed to read photo".to_string()))?;

                form.photos.push(PhotoUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    tag = "reports",
    responses(
        (status = 200, description = "Report created"),
        (status = 406, description = "Proposed location too far from the original"),
        (status = 409, description = "Missing photos or marker")
    )
)]
pub(crate) async fn create_report(
    context: ServerContext,
    session: SoftSession,
    multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let form = parse_report_form(multipart).await?;

    let (latitude, longitude) = form.latitude.zip(form.longitude).ok_or_else(|| {
        ServerError::BadRequest("latitude and longitude are required".to_string())
    })?;

    let marker_id = form
        .marker_id
        .ok_or_else(|| ServerError::BadRequest("markerId is required".to_string()))?;

    let new_location = form
        .new_latitude
        .zip(form.new_longitude)
        .map(|(lat, lng)| Point::new(lat, lng));

    context
        .domain
        .reports
        .create(NewCorrectionReport {
            marker_id,
            user_id: session.0.map(|details| details.user_id),
            location: Point::new(latitude, longitude),
            new_location,
            description: form.description,
            does_exist: form.does_exist,
            photos: form.photos,
        })
        .await?;

    Ok(Json(json!({ "message": "report created successfully" })))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/marker/{markerId}",
    tag = "reports",
    responses((status = 200, description = "Reports filed against the marker"))
)]
pub(crate) async fn reports_for_marker(
    context: ServerContext,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let reports = context.domain.reports.for_marker(marker_id).await?;

    Ok(Json(reports))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/my",
    tag = "reports",
    responses((status = 200, description = "Reports the requester filed"))
)]
pub(crate) async fn my_reports(
    context: ServerContext,
    session: Session,
) -> ServerResult<impl IntoResponse> {
    let reports = context.domain.reports.by_user(session.user_id).await?;

    Ok(Json(reports))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/for-my-markers",
    tag = "reports",
    responses((status = 200, description = "Reports against markers the requester owns"))
)]
pub(crate) async fn reports_for_my_markers(
    context: ServerContext,
    session: Session,
) -> ServerResult<impl IntoResponse> {
    let reports = context
        .domain
        .reports
        .for_owned_markers(session.user_id)
        .await?;

    Ok(Json(reports))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/approve/{reportId}",
    tag = "reports",
    responses(
        (status = 200, description = "Marker updated per the report"),
        (status = 409, description = "Report is not pending")
    )
)]
pub(crate) async fn approve_report(
    context: ServerContext,
    _session: AdminSession,
    Path(report_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context.domain.reports.approve(report_id).await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/deny/{reportId}",
    tag = "reports",
    responses((status = 200), (status = 409, description = "Report is not pending"))
)]
pub(crate) async fn deny_report(
    context: ServerContext,
    _session: AdminSession,
    Path(report_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context.domain.reports.deny(report_id).await?;

    Ok(StatusCode::OK)
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_report))
        .route("/marker/:markerId", get(reports_for_marker))
        .route("/my", get(my_reports))
        .route("/for-my-markers", get(reports_for_my_markers))
        .route("/approve/:reportId", post(approve_report))
        .route("/deny/:reportId", post(deny_report))
}
