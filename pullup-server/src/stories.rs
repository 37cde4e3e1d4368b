use axum::{
    extract::{Multipart, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use pullup_core::db::ReactionKind;
use pullup_core::util::PageConfig;

use crate::{
    auth::{Session, SoftSession},
    errors::{ServerError, ServerResult},
    markers::cache_header,
    schemas::{ReactionSchema, StoryReportSchema, ValidatedJson},
    Router, ServerContext,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryPageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

fn parse_reaction(value: &str) -> ServerResult<ReactionKind> {
    match value {
        "thumbsup" => Ok(ReactionKind::ThumbsUp),
        "thumbsdown" => Ok(ReactionKind::ThumbsDown),
        other => Err(ServerError::BadRequest(format!(
            "unknown reaction type {other}"
        ))),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/stories",
    tag = "stories",
    responses((status = 200, description = "The global story feed, paginated"))
)]
pub(crate) async fn all_stories(
    context: ServerContext,
    Query(query): Query<StoryPageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = PageConfig::default().resolve(query.page, query.page_size);

    let (stories, hit) = context
        .domain
        .stories
        .all_stories(page.page, page.page_size)
        .await?;

    Ok((cache_header(hit), Json(stories)))
}

#[utoipa::path(
    get,
    path = "/api/v1/markers/{markerId}/stories",
    tag = "stories",
    responses((status = 200, description = "The marker's active stories"))
)]
pub(crate) async fn marker_stories(
    context: ServerContext,
    session: SoftSession,
    Path(marker_id): Path<i64>,
    Query(query): Query<StoryPageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = PageConfig::with_page_size(4).resolve(query.page, query.page_size);
    let requester = session.0.map(|details| details.user_id);

    let (stories, hit) = context
        .domain
        .stories
        .stories_for_marker(requester, marker_id, page.offset, page.page_size)
        .await?;

    Ok((cache_header(hit), Json(stories)))
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/{markerId}/stories",
    tag = "stories",
    responses(
        (status = 201, description = "Story posted"),
        (status = 409, description = "An active story already exists")
    )
)]
pub(crate) async fn add_story(
    context: ServerContext,
    session: Session,
    Path(marker_id): Path<i64>,
    mut multipart: Multipart,
) -> ServerResult<impl IntoResponse> {
    let mut caption = String::new();
    let mut photo: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::BadRequest("failed to parse form".to_string()))?
    {
        match field.name() {
            Some("caption") => caption = field.text().await.unwrap_or_default(),
            Some("photo") => {
                let file_name = field.file_name().unwrap_or("story.jpg").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ServerError::BadRequest("failed to read photo".to_string()))?;

                photo = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        photo.ok_or_else(|| ServerError::BadRequest("photo is required".to_string()))?;

    let story = context
        .domain
        .stories
        .add_story(marker_id, session.user_id, &caption, &file_name, bytes)
        .await?;

    Ok((StatusCode::CREATED, Json(story)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/markers/{markerId}/stories/{storyId}",
    tag = "stories",
    responses((status = 200), (status = 403, description = "Not the owner or an admin"))
)]
pub(crate) async fn delete_story(
    context: ServerContext,
    session: Session,
    Path((marker_id, story_id)): Path<(i64, i64)>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .stories
        .delete_story(marker_id, story_id, session.user_id, session.is_admin())
        .await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/stories/{storyId}/reactions",
    tag = "stories",
    request_body = ReactionSchema,
    responses((status = 200, description = "The story's fresh aggregate counts"))
)]
pub(crate) async fn add_reaction(
    context: ServerContext,
    session: Session,
    Path(story_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<ReactionSchema>,
) -> ServerResult<impl IntoResponse> {
    let kind = parse_reaction(&body.reaction_type)?;

    let counts = context
        .domain
        .stories
        .react(story_id, session.user_id, kind)
        .await?;

    Ok(Json(counts))
}

#[utoipa::path(
    delete,
    path = "/api/v1/markers/stories/{storyId}/reactions",
    tag = "stories",
    responses((status = 200, description = "The story's fresh aggregate counts"))
)]
pub(crate) async fn remove_reaction(
    context: ServerContext,
    session: Session,
    Path(story_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let counts = context
        .domain
        .stories
        .remove_reaction(story_id, session.user_id)
        .await?;

    Ok(Json(counts))
}

#[utoipa::path(
    post,
    path = "/api/v1/markers/stories/{storyId}/report",
    tag = "stories",
    request_body = StoryReportSchema,
    responses((status = 200), (status = 409, description = "Already reported"))
)]
pub(crate) async fn report_story(
    context: ServerContext,
    session: Session,
    Path(story_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<StoryReportSchema>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .stories
        .report_story(story_id, session.user_id, &body.reason)
        .await?;

    Ok(Json(json!({ "message": "report received" })))
}

pub fn router() -> Router {
    Router::new()
        .route("/stories", get(all_stories))
        .route("/:markerId/stories", get(marker_stories).post(add_story))
        .route("/:markerId/stories/:storyId", axum::routing::delete(delete_story))
        .route(
            "/stories/:storyId/reactions",
            post(add_reaction).delete(remove_reaction),
        )
        .route("/stories/:storyId/report", post(report_story))
}
