use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json,
};

use pullup_core::util::PageConfig;

use crate::{
    auth::Session,
    errors::ServerResult,
    markers::PageQuery,
    schemas::{NewCommentSchema, UpdateCommentSchema, ValidatedJson},
    Router, ServerContext,
};

#[utoipa::path(
    post,
    path = "/api/v1/comments",
    tag = "comments",
    request_body = NewCommentSchema,
    responses(
        (status = 201, description = "Comment posted"),
        (status = 429, description = "Comment quota exceeded")
    )
)]
pub(crate) async fn create_comment(
    context: ServerContext,
    session: Session,
    ValidatedJson(body): ValidatedJson<NewCommentSchema>,
) -> ServerResult<impl IntoResponse> {
    let comment = context
        .domain
        .comments
        .create(body.marker_id, session.user_id, &body.comment_text)
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/comments/{markerId}/comments",
    tag = "comments",
    responses((status = 200, description = "The marker's comments, paginated"))
)]
pub(crate) async fn marker_comments(
    context: ServerContext,
    Path(marker_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = PageConfig::default().resolve(query.page, query.page_size);

    let comments = context.domain.comments.for_marker(marker_id, page).await?;

    Ok(Json(comments))
}

#[utoipa::path(
    patch,
    path = "/api/v1/comments/{commentId}",
    tag = "comments",
    request_body = UpdateCommentSchema,
    responses((status = 200), (status = 404, description = "Not found or not owned"))
)]
pub(crate) async fn update_comment(
    context: ServerContext,
    session: Session,
    Path(comment_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<UpdateCommentSchema>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .comments
        .update(comment_id, session.user_id, &body.comment_text)
        .await?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{commentId}",
    tag = "comments",
    responses((status = 200), (status = 404, description = "Not found or already deleted"))
)]
pub(crate) async fn remove_comment(
    context: ServerContext,
    session: Session,
    Path(comment_id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    context
        .domain
        .comments
        .remove(comment_id, session.user_id)
        .await?;

    Ok(StatusCode::OK)
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_comment))
        .route("/:id/comments", get(marker_comments))
        .route("/:id", patch(update_comment).delete(remove_comment))
}
