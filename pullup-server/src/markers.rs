use std::time::Duration;

use axum::{
    body::Body,
    extract::{Multipart, Path},
    extract::Query,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use pullup_core::util::{PageConfig, Point};
use pullup_domain::{PhotoUpload, Requester};

use crate::{
    auth::{AdminSession, Session, SoftSession},
    errors::{ServerError, ServerResult},
    schemas::{SetFacilitiesSchema, UpdateDescriptionSchema, ValidatedJson},
    ServerContext,
};
use crate::{stories, Router};

/// Photo ingestion may stream several files; give it a generous budget.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatLngQuery {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseQuery {
    latitude: f64,
    longitude: f64,
    distance: i64,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AreaQuery {
    latitude: f64,
    longitude: f64,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkerIdQuery {
    marker_id: String,
}

pub fn cache_header(hit: bool) -> [(&'static str, &'static str); 1] {
    [("x-cache", if hit { "hit" } else { "miss" })]
}

fn parse_point(latitude: f64, longitude: f64) -> ServerResult<Point> {
    let point = Point::new(latitude, longitude);

    if !point.in_south_korea() {
        return Err(ServerError::BadRequest(
            "latitude must be 32..39 and longitude 123..133".to_string(),
        ));
    }

    Ok(point)
}

fn requester(session: &Session) -> Requester {
    Requester {
        user_id: session.user_id,
        is_chulbong: session.is_chulbong(),
        is_admin: session.is_admin(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/markers",
    tag = "markers",
    responses((status = 200, description = "Every marker as a lightweight JSON array"))
)]
pub(crate) async fn all_markers(context: ServerContext) -> ServerResult<Response> {
    let (bytes, hit) = context.domain.markers.all_markers_bytes().await?;

    let response = (
        [(header::CONTENT_TYPE.as_str(), "application/json")],
        cache_header(hit),
        Body::from(bytes.to_vec()),
    );

    Ok(response.into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/new",
    tag = "markers",
    responses((status = 200, description = "Recently added markers, paginated"))
)]
pub(crate) async fn new_markers(
    context: ServerContext,
    Query(query): Query<PageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = PageConfig::default().resolve(query.page, query.page_size);
    let markers = context.domain.markers.new_markers(page).await?;

    Ok(Json(markers))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/{markerId}/details",
    tag = "markers",
    responses(
        (status = 200, description = "Marker detail including per-user flags"),
        (status = 404, description = "Marker not found")
    )
)]
pub(crate) async fn marker_detail(
    context: ServerContext,
    session: SoftSession,
    headers: HeaderMap,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let requester = session.0.as_ref().map(|details| Requester {
        user_id: details.user_id,
        is_chulbong: details.is_chulbong(),
        is_admin: details.is_admin(),
    });

    let detail = context
        .domain
        .markers
        .marker_detail(marker_id, requester)
        .await?;

    context.domain.rank.buffer_click(marker_id);

    if let Some(ip) = client_ip(&headers) {
        let rank = context.domain.rank.clone();
        let marker_key = marker_id.to_string();

        tokio::spawn(async move { rank.record_visitor(&marker_key, &ip).await });
    }

    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/markers",
    tag = "markers",
    responses(
        (status = 201, description = "Marker created"),
        (status = 409, description = "A marker already exists nearby")
    )
)]
pub(crate) async fn create_marker(
    context: ServerContext,
    session: Session,
    mut multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let mut latitude = None;
    let mut longitude = None;
    let mut description = String::new();
    let mut photos = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::BadRequest("failed to parse form".to_string()))?
    {
        match field.name() {
            Some("latitude") => {
                latitude = field.text().await.ok().and_then(|v| v.parse::<f64>().ok());
            }
            Some("longitude") => {
                longitude = field.text().await.ok().and_then(|v| v.parse::<f64>().ok());
            }
            Some("description") => {
                description = field.text().await.unwrap_or_default();
            }
            Some("photos") => {
                let file_name = field
                    .file_name()
                    .unwrap_or("photo.jpg")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ServerError::BadRequest("failed to read photo".to_string()))?;

                photos.push(PhotoUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let (latitude, longitude) = latitude.zip(longitude).ok_or_else(|| {
        ServerError::BadRequest("latitude and longitude are required".to_string())
    })?;

    let point = Point::new(latitude, longitude);

    let created = tokio::time::timeout(
        CREATE_TIMEOUT,
        context
            .domain
            .markers
            .create_marker(point, &description, session.user_id, photos),
    )
    .await
    .map_err(|_| ServerError::Unknown("marker creation timed out".to_string()))??;

    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/api/v1/markers/{markerId}",
    tag = "markers",
    request_body = UpdateDescriptionSchema,
    responses((status = 200), (status = 400, description = "Description contains profanity"))
)]
pub(crate) async fn update_marker(
    context: ServerContext,
    _session: Session,
    Path(marker_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<UpdateDescriptionSchema>,
) -> ServerResult<impl IntoResponse> {
    let description = context
        .domain
        .markers
        .update_description(marker_id, &body.description)
        .await?;

    Ok(Json(json!({ "description": description })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/markers/{markerId}",
    tag = "markers",
    responses((status = 200), (status = 403, description = "Not the owner or an admin"))
)]
pub(crate) async fn delete_marker(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .markers
        .delete_marker(marker_id, requester(&session))
        .await?;

    // Pending buffered clicks must not resurrect the rank entry.
    context.domain.rank.remove_marker(marker_id).await;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/close",
    tag = "markers",
    responses(
        (status = 200, description = "Markers within the distance, paginated"),
        (status = 403, description = "Distance exceeds 50km")
    )
)]
pub(crate) async fn close_markers(
    context: ServerContext,
    Query(query): Query<CloseQuery>,
) -> ServerResult<impl IntoResponse> {
    let point = parse_point(query.latitude, query.longitude)?;
    let page = PageConfig::with_page_size(4).resolve(query.page, query.page_size);

    let (response, hit) = context
        .domain
        .locator
        .close_markers(point, query.distance, page)
        .await?;

    Ok((cache_header(hit), Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/area-ranking",
    tag = "ranking",
    responses((status = 200, description = "Top markers within 10km"))
)]
pub(crate) async fn area_ranking(
    context: ServerContext,
    Query(query): Query<AreaQuery>,
) -> ServerResult<impl IntoResponse> {
    let point = parse_point(query.latitude, query.longitude)?;
    let limit = query.limit.unwrap_or(10);

    let ranking = context.domain.locator.area_ranking(point, limit).await?;

    Ok(Json(ranking))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/ranking",
    tag = "ranking",
    responses((status = 200, description = "Global top 50 by click count"))
)]
pub(crate) async fn global_ranking(context: ServerContext) -> ServerResult<impl IntoResponse> {
    let ranking = context.domain.rank.top_markers(50).await?;

    Ok(Json(ranking))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/unique-ranking",
    tag = "ranking",
    responses((status = 200, description = "Estimated unique visitors for a marker"))
)]
pub(crate) async fn unique_visitors(
    context: ServerContext,
    Query(query): Query<MarkerIdQuery>,
) -> ServerResult<impl IntoResponse> {
    if query.marker_id.is_empty() {
        return Err(ServerError::BadRequest("invalid marker id".to_string()));
    }

    let visitors = context.domain.rank.unique_visitors(&query.marker_id).await;

    Ok(Json(json!({ "markerId": query.marker_id, "visitors": visitors })))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/verify",
    tag = "markers",
    responses(
        (status = 200),
        (status = 403, description = "Outside South Korea"),
        (status = 409, description = "A marker already exists nearby")
    )
)]
pub(crate) async fn verify_location(
    context: ServerContext,
    Query(query): Query<LatLngQuery>,
) -> ServerResult<&'static str> {
    let point = Point::new(query.latitude, query.longitude);

    context.domain.markers.check_validity(point, "")?;

    if context.domain.markers.is_nearby(point).await? {
        return Err(ServerError::NearbyMarker);
    }

    Ok("OK")
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/my",
    tag = "markers",
    responses((status = 200, description = "The requester's markers, paginated"))
)]
pub(crate) async fn my_markers(
    context: ServerContext,
    session: Session,
    Query(query): Query<PageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = PageConfig::with_page_size(5).resolve(query.page, query.page_size);

    let (response, hit) = context
        .domain
        .markers
        .user_markers_page(session.user_id, page)
        .await?;

    Ok((cache_header(hit), Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/{markerId}/facilities",
    tag = "markers",
    responses((status = 200, description = "Facility set at the marker"))
)]
pub(crate) async fn facilities(
    context: ServerContext,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let (facilities, hit) = context.domain.markers.facilities(marker_id).await?;

    Ok((cache_header(hit), Json(facilities)))
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/facilities",
    tag = "markers",
    request_body = SetFacilitiesSchema,
    responses((status = 200))
)]
pub(crate) async fn set_facilities(
    context: ServerContext,
    _session: Session,
    ValidatedJson(body): ValidatedJson<SetFacilitiesSchema>,
) -> ServerResult<impl IntoResponse> {
    let entries: Vec<_> = body
        .facilities
        .iter()
        .map(|f| pullup_core::db::FacilityEntry {
            facility_id: f.facility_id,
            quantity: f.quantity,
        })
        .collect();

    context
        .domain
        .markers
        .set_facilities(body.marker_id, &entries)
        .await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/{markerId}/dislike",
    tag = "markers",
    responses((status = 200))
)]
pub(crate) async fn add_dislike(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .interactions
        .add_dislike(session.user_id, marker_id)
        .await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/api/v1/markers/{markerId}/dislike",
    tag = "markers",
    responses((status = 200), (status = 404, description = "No dislike to undo"))
)]
pub(crate) async fn remove_dislike(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .interactions
        .remove_dislike(session.user_id, marker_id)
        .await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/{markerId}/dislike-status",
    tag = "markers",
    responses((status = 200))
)]
pub(crate) async fn dislike_status(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let disliked = context
        .domain
        .interactions
        .is_disliked(session.user_id, marker_id)
        .await?;

    Ok(Json(json!({ "disliked": disliked })))
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/{markerId}/favorites",
    tag = "markers",
    responses((status = 200), (status = 409, description = "Maximum favorites reached"))
)]
pub(crate) async fn add_favorite(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .interactions
        .add_favorite(session.user_id, marker_id)
        .await?;

    Ok(Json(json!({ "message": "Favorite added successfully" })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/markers/{markerId}/favorites",
    tag = "markers",
    responses((status = 204))
)]
pub(crate) async fn remove_favorite(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .interactions
        .remove_favorite(session.user_id, marker_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Admin utility: attach photos to an existing marker.
#[utoipa::path(
    post,
    path = "/api/v1/markers/upload",
    tag = "markers",
    responses((status = 200), (status = 403, description = "Admin only"))
)]
pub(crate) async fn upload_photos(
    context: ServerContext,
    _session: AdminSession,
    mut multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let mut marker_id = None;
    let mut photos = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::BadRequest("failed to parse form".to_string()))?
    {
        match field.name() {
            Some("markerId") => {
                marker_id = field.text().await.ok().and_then(|v| v.parse::<i64>().ok());
            }
            Some("photos") => {
                let file_name = field.file_name().unwrap_or("photo.jpg").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ServerError::BadRequest("failed to read photo".to_string()))?;

                photos.push((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let marker_id = marker_id
        .ok_or_else(|| ServerError::BadRequest("markerId is required".to_string()))?;

    let uploads = photos
        .into_iter()
        .map(|(file_name, bytes)| PhotoUpload { file_name, bytes })
        .collect();

    let urls = context.domain.markers.add_photos(marker_id, uploads).await?;

    Ok(Json(json!({ "urls": urls })))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(all_markers).post(create_marker))
        .route("/new", get(new_markers))
        .route("/close", get(close_markers))
        .route("/ranking", get(global_ranking))
        .route("/area-ranking", get(area_ranking))
        .route("/unique-ranking", get(unique_visitors))
        .route("/verify", get(verify_location))
        .route("/my", get(my_markers))
        .route("/upload", post(upload_photos))
        .route("/facilities", post(set_facilities))
        .route("/:markerId", put(update_marker).delete(delete_marker))
        .route("/:markerId/details", get(marker_detail))
        .route("/:markerId/facilities", get(facilities))
        .route("/:markerId/dislike", post(add_dislike).delete(remove_dislike))
        .route("/:markerId/dislike-status", get(dislike_status))
        .route(
            "/:markerId/favorites",
            post(add_favorite).delete(remove_favorite),
        )
        .merge(stories::router())
}
